use crate::error::CdcError;
use crate::lsn::Lsn;
use crate::value::RowBody;

/// The kind of change a [`RowEvent`] represents, plus the trailing
/// synthetic commit marker appended to every non-empty [`TransactionBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    Truncate,
    /// Synthetic marker closing a batch; carries no row body.
    Commit,
}

/// One materialised row change, or the synthetic commit marker that closes
/// a [`TransactionBatch`].
#[derive(Debug, Clone)]
pub struct RowEvent {
    pub lsn: Lsn,
    pub relation_id: u32,
    pub kind: EventKind,
    pub schema_name: String,
    pub table_name: String,
    pub body: RowBody,
    /// `Some` only for `Update`; names where `new[c] != old[c]`, in the
    /// relation's column-declaration order. Never hash order.
    pub changed_columns: Option<Vec<String>>,
}

impl RowEvent {
    /// Build the synthetic commit marker that closes every delivered batch.
    pub fn commit_marker(lsn: Lsn) -> Self {
        Self {
            lsn,
            relation_id: 0,
            kind: EventKind::Commit,
            schema_name: String::new(),
            table_name: String::new(),
            body: RowBody::new(),
            changed_columns: None,
        }
    }
}

/// Ordered sequence of [`RowEvent`]s between a `Begin` and its matching
/// `Commit`, delivered to the handler as one atomic unit. The last element
/// is always the commit marker.
#[derive(Debug, Clone, Default)]
pub struct TransactionBatch {
    pub events: Vec<RowEvent>,
    pub commit_lsn: Lsn,
}

impl TransactionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn push(&mut self, event: RowEvent) {
        self.events.push(event);
    }
}

/// What the handler tells the session to do after observing one batch.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// Send standby status for `commitLSN`, persist the cursor, clear the
    /// batch, and resume streaming.
    Success,
    /// Clear the batch without sending status or persisting the cursor.
    /// For buffered consumers that acknowledge later out-of-band.
    Continue,
    /// Propagate the error to the caller and begin closing the session.
    Fatal(CdcError),
}

/// The user-supplied consumer of replicated transactions.
///
/// The batch is a borrowed view; implementations that need to retain data
/// past return must copy it first.
pub trait ChangeHandler: Send + Sync {
    fn handle(
        &self,
        batch: &TransactionBatch,
    ) -> impl std::future::Future<Output = HandlerOutcome> + Send;

    /// Called once, after `START_REPLICATION` succeeds, before any batch is
    /// delivered. Default is a no-op; most handlers don't need it.
    fn ready(&self) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }
}
