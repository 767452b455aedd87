//! Errors for Frame Store operations (C3, §4.7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FrameStoreError>;

#[derive(Debug, Error)]
pub enum FrameStoreError {
    #[error("frame '{0}' is not configured")]
    FrameNotFound(String),

    #[error("row with {field}={value} not found in frame '{frame}'")]
    RowNotFound {
        frame: String,
        field: String,
        value: String,
    },

    #[error("I/O error loading frame '{frame}': {source}")]
    Io {
        frame: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error loading frame '{frame}': {source}")]
    Csv {
        frame: String,
        #[source]
        source: csv::Error,
    },

    #[error("invalid where-condition: {0}")]
    InvalidCondition(String),

    #[error("nested transactions are not supported")]
    NestedTransaction,

    #[error("no transaction is active to commit/rollback")]
    NoActiveTransaction,
}
