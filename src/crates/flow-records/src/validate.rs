//! Post-coercion validation: enum membership, numeric/length bounds, regex.

use crate::error::{RecordError, Result};
use crate::schema::FieldDef;
use flow_core::Value;

pub fn validate_field(record: &str, field: &FieldDef, value: &Value) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }

    if let Some(allowed) = &field.enum_values {
        let as_str = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
        if !allowed.iter().any(|a| a == &as_str) {
            return Err(RecordError::EnumViolation {
                record: record.to_string(),
                field: field.name.clone(),
                allowed: allowed.clone(),
                value: as_str,
            });
        }
    }

    if let Some(min) = field.min {
        if let Some(n) = value.as_f64() {
            if n < min {
                return Err(RecordError::BelowMinimum { record: record.to_string(), field: field.name.clone(), min, value: n });
            }
        }
    }
    if let Some(max) = field.max {
        if let Some(n) = value.as_f64() {
            if n > max {
                return Err(RecordError::AboveMaximum { record: record.to_string(), field: field.name.clone(), max, value: n });
            }
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count();
        if let Some(min_len) = field.min_length {
            if len < min_len {
                return Err(RecordError::TooShort { record: record.to_string(), field: field.name.clone(), min: min_len, len });
            }
        }
        if let Some(max_len) = field.max_length {
            if len > max_len {
                return Err(RecordError::TooLong { record: record.to_string(), field: field.name.clone(), max: max_len, len });
            }
        }
        if let Some(re) = field.compiled_pattern() {
            if !re.is_match(s) {
                return Err(RecordError::PatternMismatch { record: record.to_string(), field: field.name.clone() });
            }
        }
    }

    Ok(())
}
