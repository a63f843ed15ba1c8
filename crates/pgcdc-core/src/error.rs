use thiserror::Error;

/// Unified error type returned from every fallible library operation.
///
/// No variant here causes a panic or process exit anywhere in the session;
/// every failure is handed back to the caller, per the error handling
/// design: the library does not log errors it returns, only the caller does.
#[derive(Debug, Error)]
pub enum CdcError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("cursor error: {0}")]
    Cursor(#[from] CursorError),

    #[error(transparent)]
    TransientSql(#[from] TransientSqlError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("slot name {0:?} must match [a-z0-9_]{{3,64}}")]
    InvalidSlotName(String),

    #[error("requireColumnDiff is set but no tables were listed")]
    ColumnDiffRequiresTables,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),
}

impl From<tokio_postgres::Error> for TransportError {
    fn from(e: tokio_postgres::Error) -> Self {
        TransportError::Connection(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown message tag: {0:?}")]
    Unknown(u8),
}

#[derive(Debug, Error)]
#[error("no relation descriptor seen for relationID {relation_id}")]
pub struct SchemaError {
    pub relation_id: u32,
}

#[derive(Debug, Error)]
#[error("failed to decode column {column:?} (oid {oid}): {cause}")]
pub struct DecodeError {
    pub column: String,
    pub oid: u32,
    pub cause: String,
}

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor store read failed: {0}")]
    Read(String),

    #[error("cursor store write failed: {0}")]
    Write(String),
}

/// A swallowed-or-fatal SQL error surfaced during setup/teardown DDL.
///
/// `42710` (duplicate object) and `42704` (undefined object) are swallowed
/// by callers that match on [`TransientSqlError::code`]; this variant only
/// exists to carry the non-swallowed case forward as a typed error.
#[derive(Debug, Error)]
#[error("sql error {code}: {message}")]
pub struct TransientSqlError {
    pub code: String,
    pub message: String,
}

/// SQL states swallowed during idempotent setup/teardown DDL.
pub const SQLSTATE_DUPLICATE_OBJECT: &str = "42710";
pub const SQLSTATE_UNDEFINED_OBJECT: &str = "42704";

/// Run a DDL statement, swallowing the two transient SQL states that make
/// setup/teardown idempotent, surfacing everything else as a [`CdcError`].
pub fn classify_ddl_error(e: tokio_postgres::Error) -> Option<CdcError> {
    if let Some(db_err) = e.as_db_error() {
        let code = db_err.code().code();
        if code == SQLSTATE_DUPLICATE_OBJECT || code == SQLSTATE_UNDEFINED_OBJECT {
            return None;
        }
        return Some(CdcError::TransientSql(TransientSqlError {
            code: code.to_string(),
            message: db_err.message().to_string(),
        }));
    }
    Some(CdcError::Transport(TransportError::from(e)))
}

pub type CdcResult<T> = Result<T, CdcError>;
