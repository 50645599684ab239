use thiserror::Error;

use super::entity::EntityKind;

/// Errors produced by the document store and surfaced through [crate::app::App].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A bucket on the nested path does not exist. Usually means the parent record was deleted
    /// or the database predates the current layout.
    #[error("collection {path} not found")]
    CollectionNotFound { path: String },

    #[error("{kind} {id} not found")]
    EntityNotFound { kind: EntityKind, id: u64 },

    #[error("unsupported comparison operator {0:?}")]
    UnsupportedOperator(String),

    /// Queries only compare integers and strings. Anything else fails instead of matching.
    #[error("field {field:?} of {kind} can't be compared or assigned")]
    UnsupportedFieldKind { kind: EntityKind, field: String },

    #[error("{0} is stored under a parent and needs a parent id")]
    MissingParent(EntityKind),

    /// Ends before it starts, or spans more milliseconds than fit in an `i64`.
    #[error("invalid interval from {start} to {end}")]
    InvalidInterval { start: i64, end: i64 },

    #[error("total time of record {id} would overflow")]
    TotalOverflow { id: u64 },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
