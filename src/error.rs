use thiserror::Error;

/// Errors surfaced by the metadata store. Each variant maps 1:1 onto a
/// protocol-layer response kind; the mapping itself is the caller's job,
/// this crate only distinguishes the kinds.
#[derive(Debug, Error)]
pub enum TableStoreError {
    #[error("table already exists: {account}/{table}")]
    TableAlreadyExists { account: String, table: String },

    /// Raised by entity operations against a missing table.
    #[error("table does not exist: {account}/{table}")]
    TableNotExist { account: String, table: String },

    /// Raised by `setTableACL`-style lookups against a missing registry
    /// record. Distinct from `TableNotExist`, which entity operations raise
    /// against a missing entity collection — the two map to different
    /// protocol-layer responses.
    #[error("table not found: {account}/{table}")]
    TableNotFound { account: String, table: String },

    #[error("resource not found")]
    ResourceNotFound,

    #[error("entity already exists: pk={partition_key} rk={row_key}")]
    EntityAlreadyExists {
        partition_key: String,
        row_key: String,
    },

    #[error("entity not found")]
    EntityNotFound,

    #[error("precondition failed")]
    PreconditionFailed,

    #[error("properties need value")]
    PropertiesNeedValue,

    #[error("query condition invalid: {0}")]
    QueryConditionInvalid(String),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("a batch transaction is already in flight")]
    TransactionOverlap,

    #[error("durable collection storage error")]
    Storage(#[from] rusqlite::Error),

    #[error("durable collection I/O error")]
    Io(#[from] std::io::Error),

    #[error("record serialization error")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TableStoreError>;
