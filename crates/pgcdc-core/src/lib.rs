mod error;
mod event;
mod lsn;
mod value;

pub use error::{
    classify_ddl_error, CdcError, CdcResult, ConfigError, CursorError, DecodeError, ProtocolError,
    SchemaError, TransientSqlError, TransportError, SQLSTATE_DUPLICATE_OBJECT,
    SQLSTATE_UNDEFINED_OBJECT,
};
pub use event::{ChangeHandler, EventKind, HandlerOutcome, RowEvent, TransactionBatch};
pub use lsn::{format_lsn, parse_lsn, Lsn};
pub use value::{RowBody, Value};
