mod file;
mod http_kv;

pub use file::FileCursorStore;
pub use http_kv::HttpKvCursorStore;

use pgcdc_core::{CdcResult, Lsn};

/// Persistence surface for the last confirmed LSN per replication slot.
///
/// Implementations must be safe against concurrent processes sharing one
/// `slotName` — file writes atomic via rename, key-value stores via
/// conditional set — because PostgreSQL itself serialises slot consumers;
/// the store only needs to bootstrap the start LSN on restart, not
/// arbitrate concurrent writers.
pub trait CursorStore: Send + Sync {
    /// Read the persisted LSN for `slot_name`, or `None` if never set.
    fn get(&self, slot_name: &str) -> impl std::future::Future<Output = CdcResult<Option<Lsn>>> + Send;

    /// Persist `lsn` as the confirmed position for `slot_name`.
    fn set(&self, slot_name: &str, lsn: Lsn) -> impl std::future::Future<Output = CdcResult<()>> + Send;

    /// Release any held resources (connections, file handles). Called once
    /// when the session transitions to CLOSING.
    fn close(&self) -> impl std::future::Future<Output = CdcResult<()>> + Send;
}
