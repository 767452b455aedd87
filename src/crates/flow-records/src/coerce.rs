//! Per-field type coercion applied before validation. Each failure is a
//! field-specific [`RecordError::CoercionFailed`].

use crate::error::{RecordError, Result};
use crate::schema::{DefaultValue, FieldDef, FieldType};
use chrono::{DateTime, Utc};
use flow_core::Value;
use rust_decimal::Decimal;
use std::str::FromStr;

pub fn resolve_default(record: &str, field: &FieldDef) -> Result<Option<Value>> {
    match &field.default {
        None => Ok(None),
        Some(DefaultValue::Literal(v)) => Ok(Some(v.clone())),
        Some(DefaultValue::Now) => match field.field_type {
            FieldType::DateTime => Ok(Some(Value::Str(Utc::now().to_rfc3339()))),
            _ => Err(RecordError::CoercionFailed {
                record: record.to_string(),
                field: field.name.clone(),
                expected: "a now()-compatible type",
                reason: "'now' default only applies to datetime fields".into(),
            }),
        },
    }
}

/// Coerce `raw` into the shape `field.field_type` demands. `uuid` is kept
/// as its string form; `datetime` is parsed and re-serialized as
/// RFC3339/ISO-8601; `decimal` uses arbitrary-precision parsing; `array`/
/// `json` accept either an already-structured [`Value`] or a JSON-encoded
/// string.
pub fn coerce_field(record: &str, field: &FieldDef, raw: Value) -> Result<Value> {
    let fail = |reason: String| RecordError::CoercionFailed {
        record: record.to_string(),
        field: field.name.clone(),
        expected: field.field_type.name(),
        reason,
    };

    if raw.is_null() {
        return Ok(Value::Null);
    }

    match field.field_type {
        FieldType::String | FieldType::Text => match raw {
            Value::Str(s) => Ok(Value::Str(s)),
            other => Ok(Value::Str(other.to_string())),
        },
        FieldType::Int => match raw {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Float(f) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
            Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|e| fail(e.to_string())),
            other => Err(fail(format!("cannot coerce {} to int", other.type_name()))),
        },
        FieldType::Float => match raw {
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::Float(f) => Ok(Value::Float(f)),
            Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|e| fail(e.to_string())),
            other => Err(fail(format!("cannot coerce {} to float", other.type_name()))),
        },
        FieldType::Bool => match raw {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::Str(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                other => Err(fail(format!("cannot coerce '{other}' to bool"))),
            },
            other => Err(fail(format!("cannot coerce {} to bool", other.type_name()))),
        },
        FieldType::Uuid => match raw {
            Value::Str(s) => uuid::Uuid::parse_str(&s).map(|u| Value::Str(u.to_string())).map_err(|e| fail(e.to_string())),
            other => Err(fail(format!("cannot coerce {} to uuid", other.type_name()))),
        },
        FieldType::DateTime => match raw {
            Value::Str(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Value::Str(dt.with_timezone(&Utc).to_rfc3339()))
                .map_err(|e| fail(e.to_string())),
            other => Err(fail(format!("cannot coerce {} to datetime", other.type_name()))),
        },
        FieldType::Decimal => match raw {
            Value::Str(s) => Decimal::from_str(&s).map(|d| Value::Str(d.to_string())).map_err(|e| fail(e.to_string())),
            Value::Int(i) => Ok(Value::Str(Decimal::from(i).to_string())),
            Value::Float(f) => Decimal::try_from(f).map(|d| Value::Str(d.to_string())).map_err(|e| fail(e.to_string())),
            other => Err(fail(format!("cannot coerce {} to decimal", other.type_name()))),
        },
        FieldType::Array => match raw {
            Value::List(l) => Ok(Value::List(l)),
            Value::Str(s) => serde_json::from_str::<serde_json::Value>(&s)
                .map(Value::from_json)
                .map_err(|e| fail(e.to_string()))
                .and_then(|v| match v {
                    Value::List(_) => Ok(v),
                    _ => Err(fail("parsed JSON was not an array".into())),
                }),
            other => Err(fail(format!("cannot coerce {} to array", other.type_name()))),
        },
        FieldType::Json => match raw {
            Value::Map(_) | Value::List(_) => Ok(raw),
            Value::Str(s) => serde_json::from_str::<serde_json::Value>(&s).map(Value::from_json).map_err(|e| fail(e.to_string())),
            other => Ok(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    #[test]
    fn coerces_numeric_looking_string_to_int() {
        let field = FieldDef::new("age", FieldType::Int);
        let v = coerce_field("User", &field, Value::Str(" 42 ".into())).unwrap();
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn rejects_non_iso_datetime() {
        let field = FieldDef::new("created_at", FieldType::DateTime);
        assert!(coerce_field("User", &field, Value::Str("not-a-date".into())).is_err());
    }

    #[test]
    fn array_field_accepts_json_string() {
        let field = FieldDef::new("tags", FieldType::Array);
        let v = coerce_field("User", &field, Value::Str("[1,2,3]".into())).unwrap();
        assert_eq!(v, Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }
}
