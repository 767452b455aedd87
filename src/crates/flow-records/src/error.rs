//! Record Layer error taxonomy. Field-level failures carry the record and
//! field name so the caller can build a precise, user-facing message; the
//! wire-observable code for a missing required/primary-key value is
//! `N3L-1502`, matching the error codes table.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecordError>;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record definition '{0}' is not registered")]
    UnknownRecord(String),

    #[error("[N3L-1502] '{record}.{field}' is required and was not provided")]
    MissingRequired { record: String, field: String },

    #[error("'{record}.{field}' could not be coerced to {expected}: {reason}")]
    CoercionFailed { record: String, field: String, expected: &'static str, reason: String },

    #[error("'{record}.{field}' must be one of {allowed:?}, got '{value}'")]
    EnumViolation { record: String, field: String, allowed: Vec<String>, value: String },

    #[error("'{record}.{field}' must be >= {min}, got {value}")]
    BelowMinimum { record: String, field: String, min: f64, value: f64 },

    #[error("'{record}.{field}' must be <= {max}, got {value}")]
    AboveMaximum { record: String, field: String, max: f64, value: f64 },

    #[error("'{record}.{field}' must be at most {max} characters, got {len}")]
    TooLong { record: String, field: String, max: usize, len: usize },

    #[error("'{record}.{field}' must be at least {min} characters, got {len}")]
    TooShort { record: String, field: String, min: usize, len: usize },

    #[error("'{record}.{field}' does not match the required pattern")]
    PatternMismatch { record: String, field: String },

    #[error("'{record}.{field}' value '{value}' is already used (unique constraint violated)")]
    UniqueConflict { record: String, field: String, value: String },

    #[error("'{record}.{field}' references '{target_record}.{target_field}' = '{value}', which does not exist")]
    ForeignKeyMissing { record: String, field: String, target_record: String, target_field: String, value: String },

    #[error("'{record}.{field}' references unconfigured record '{target_record}': {reason}")]
    ForeignKeyConfig { record: String, field: String, target_record: String, reason: String },

    #[error(transparent)]
    Store(#[from] flow_store::FrameStoreError),
}
