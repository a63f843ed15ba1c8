pub mod connect;
pub mod replication;

pub use connect::{connect_control, connect_replication};
pub use replication::{ReplicationSession, SessionConfig};
