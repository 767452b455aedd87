use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory kind '{0}' is not bound to a store")]
    UnknownKind(String),

    #[error("memory backend error: {0}")]
    Backend(String),

    #[error("could not parse 'created_at' timestamp '{0}': {1}")]
    BadTimestamp(String, String),
}
