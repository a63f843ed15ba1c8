mod envelope;
mod identity;
mod pgoutput;
mod publication;
mod relation_set;
mod session;
mod slot;
mod type_decode;

pub use envelope::{build_standby_status, parse_server_frame, ServerFrame};
pub use identity::{set_replica_identity, ReplicaIdentityMode};
pub use pgoutput::{
    decode as decode_pgoutput, BeginMessage, ColumnInfo, CommitMessage, DeleteMessage,
    InsertMessage, OriginMessage, PgOutputMessage, RelationMessage, ReplicaIdentity, TruncateMessage,
    TupleData, TupleField, TypeMessage, UpdateMessage,
};
pub use publication::{
    create_publication, drop_publication, quote_ident, quote_literal, quote_table_name,
};
pub use relation_set::{RelationDescriptor, RelationSet};
pub use session::{ReplicationSession, SessionConfig};
pub use slot::{create_slot, drop_slot, get_confirmed_flush_lsn, slot_exists};
pub use type_decode::decode_value;
