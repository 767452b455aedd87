//! Record operation dispatch (§4.7): `db_create` / `db_bulk_create` /
//! `find` (`db_get`) / `db_update` / `db_bulk_update` / `db_delete` /
//! `db_bulk_delete`. Each op runs coercion, then validation, then
//! uniqueness, then foreign-key checks, in that order, before touching the
//! frame store.

use crate::coerce::{coerce_field, resolve_default};
use crate::error::{RecordError, Result};
use crate::schema::RecordDef;
use crate::validate::validate_field;
use flow_core::Value;
use flow_store::{CompareOp, Condition, FrameStore, QueryOptions, Row};
use indexmap::IndexMap;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct RecordRegistry {
    defs: IndexMap<String, RecordDef>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: RecordDef) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Result<&RecordDef> {
        self.defs.get(name).ok_or_else(|| RecordError::UnknownRecord(name.to_string()))
    }
}

/// Values that a unique field must not collide with, combining what is
/// already at rest in the frame store and what earlier rows in the same
/// batch have already claimed (§4.17 intra-batch uniqueness tracking).
#[derive(Default)]
struct BatchGuard {
    claimed: HashSet<(String, String, String)>,
}

impl BatchGuard {
    fn claim(&mut self, field: &str, scope: &str, value: &str) -> bool {
        self.claimed.insert((field.to_string(), scope.to_string(), value.to_string()))
    }
}

fn scope_key(row: &IndexMap<String, Value>, scope_field: Option<&str>) -> String {
    match scope_field {
        Some(f) => row.get(f).map(|v| v.to_string()).unwrap_or_default(),
        None => String::new(),
    }
}

/// Coerces + validates every field of `input` against `def`, filling
/// defaults and rejecting missing required values. `existing` supplies the
/// row's pre-coercion values for fields not present in `input` (used by
/// partial updates).
fn build_row(def: &RecordDef, input: &IndexMap<String, Value>) -> Result<Row> {
    let mut row = Row::new();
    for field in def.fields.values() {
        let raw = match input.get(&field.name) {
            Some(v) => Some(v.clone()),
            None => resolve_default(&def.name, field)?,
        };
        let raw = match raw {
            Some(v) => v,
            None => {
                if field.required {
                    return Err(RecordError::MissingRequired { record: def.name.clone(), field: field.name.clone() });
                }
                Value::Null
            }
        };
        let coerced = coerce_field(&def.name, field, raw)?;
        validate_field(&def.name, field, &coerced)?;
        row.insert(field.name.clone(), coerced);
    }
    Ok(row)
}

fn check_unique(
    store: &dyn FrameStore,
    def: &RecordDef,
    row: &Row,
    exclude_pk: Option<&Value>,
    guard: &mut BatchGuard,
) -> Result<()> {
    let pk_field = def.primary_key_field().map(|f| f.name.clone());
    for field in def.unique_fields() {
        let Some(value) = row.get(&field.name) else { continue };
        if value.is_null() {
            continue;
        }
        let scope = scope_key(row, field.unique_scope_field.as_deref());
        if !guard.claim(&field.name, &scope, &value.to_string()) {
            return Err(RecordError::UniqueConflict { record: def.name.clone(), field: field.name.clone(), value: value.to_string() });
        }

        let mut condition = Condition::Leaf { field: field.name.clone(), op: CompareOp::Eq, value: value.clone() };
        if let Some(scope_field) = &field.unique_scope_field {
            if let Some(scope_value) = row.get(scope_field) {
                condition = Condition::And(vec![
                    condition,
                    Condition::Leaf { field: scope_field.clone(), op: CompareOp::Eq, value: scope_value.clone() },
                ]);
            }
        }
        let matches = store.query(&def.frame, &QueryOptions { condition, ..Default::default() })?;
        let conflicting = matches.into_iter().any(|existing| match (&pk_field, exclude_pk) {
            (Some(pk), Some(excl)) => existing.get(pk).map(|v| !v.values_equal(excl)).unwrap_or(true),
            _ => true,
        });
        if conflicting {
            return Err(RecordError::UniqueConflict { record: def.name.clone(), field: field.name.clone(), value: value.to_string() });
        }
    }
    Ok(())
}

fn check_foreign_keys(store: &dyn FrameStore, registry: &RecordRegistry, def: &RecordDef, row: &Row) -> Result<()> {
    for field in def.fields.values() {
        let (Some(target_record), Some(target_field)) = (&field.references_record, &field.reference_target_field) else {
            continue;
        };
        let Some(value) = row.get(&field.name) else { continue };
        if value.is_null() {
            continue;
        }
        let target_def = registry.get(target_record).map_err(|_| RecordError::ForeignKeyConfig {
            record: def.name.clone(),
            field: field.name.clone(),
            target_record: target_record.clone(),
            reason: "target record is not registered".into(),
        })?;
        let condition = Condition::Leaf { field: target_field.clone(), op: CompareOp::Eq, value: value.clone() };
        let matches = store.query(&target_def.frame, &QueryOptions { condition, ..Default::default() })?;
        if matches.is_empty() {
            return Err(RecordError::ForeignKeyMissing {
                record: def.name.clone(),
                field: field.name.clone(),
                target_record: target_record.clone(),
                target_field: target_field.clone(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

pub fn create(store: &dyn FrameStore, registry: &RecordRegistry, def: &RecordDef, input: IndexMap<String, Value>) -> Result<Row> {
    store.ensure_frame(&def.frame);
    let row = build_row(def, &input)?;
    let mut guard = BatchGuard::default();
    check_unique(store, def, &row, None, &mut guard)?;
    check_foreign_keys(store, registry, def, &row)?;
    Ok(store.insert(&def.frame, row)?)
}

pub fn bulk_create(
    store: &dyn FrameStore,
    registry: &RecordRegistry,
    def: &RecordDef,
    inputs: Vec<IndexMap<String, Value>>,
) -> Result<Vec<Row>> {
    store.ensure_frame(&def.frame);
    let mut guard = BatchGuard::default();
    let mut out = Vec::with_capacity(inputs.len());
    for input in inputs {
        let row = build_row(def, &input)?;
        check_unique(store, def, &row, None, &mut guard)?;
        check_foreign_keys(store, registry, def, &row)?;
        out.push(store.insert(&def.frame, row)?);
    }
    Ok(out)
}

pub fn update(
    store: &dyn FrameStore,
    registry: &RecordRegistry,
    def: &RecordDef,
    condition: &Condition,
    updates: IndexMap<String, Value>,
) -> Result<usize> {
    let pk_field = def.primary_key_field().map(|f| f.name.clone());
    let targets = store.query(&def.frame, &QueryOptions { condition: condition.clone(), ..Default::default() })?;
    let mut guard = BatchGuard::default();
    let mut count = 0;
    for existing in &targets {
        let mut merged = existing.clone();
        for (k, v) in &updates {
            let field = def.fields.get(k);
            let coerced = match field {
                Some(f) => {
                    let c = coerce_field(&def.name, f, v.clone())?;
                    validate_field(&def.name, f, &c)?;
                    c
                }
                None => v.clone(),
            };
            merged.insert(k.clone(), coerced);
        }
        let exclude_pk = pk_field.as_deref().and_then(|pk| existing.get(pk));
        check_unique(store, def, &merged, exclude_pk, &mut guard)?;
        check_foreign_keys(store, registry, def, &merged)?;

        let mut row_condition = condition.clone();
        if let Some(pk) = &pk_field {
            if let Some(pk_value) = existing.get(pk) {
                row_condition = Condition::Leaf { field: pk.clone(), op: CompareOp::Eq, value: pk_value.clone() };
            }
        }
        count += store.update(&def.frame, &row_condition, &updates_row(&updates, def)?)?;
    }
    Ok(count)
}

fn updates_row(updates: &IndexMap<String, Value>, def: &RecordDef) -> Result<Row> {
    let mut row = Row::new();
    for (k, v) in updates {
        let coerced = match def.fields.get(k) {
            Some(f) => coerce_field(&def.name, f, v.clone())?,
            None => v.clone(),
        };
        row.insert(k.clone(), coerced);
    }
    Ok(row)
}

pub fn bulk_update(
    store: &dyn FrameStore,
    registry: &RecordRegistry,
    def: &RecordDef,
    ops: Vec<(Condition, IndexMap<String, Value>)>,
) -> Result<usize> {
    let mut total = 0;
    for (condition, updates) in ops {
        total += update(store, registry, def, &condition, updates)?;
    }
    Ok(total)
}

pub fn delete(store: &dyn FrameStore, def: &RecordDef, condition: &Condition) -> Result<usize> {
    Ok(store.delete(&def.frame, condition)?)
}

pub fn bulk_delete(store: &dyn FrameStore, def: &RecordDef, conditions: &[Condition]) -> Result<usize> {
    let mut total = 0;
    for condition in conditions {
        total += delete(store, def, condition)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType};
    use flow_store::InMemoryFrameStore;

    fn user_def() -> RecordDef {
        RecordDef::new("User")
            .field(FieldDef::new("id", FieldType::Int).primary_key())
            .field(FieldDef::new("email", FieldType::String).required().unique())
    }

    fn input(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let store = InMemoryFrameStore::new();
        let registry = RecordRegistry::new();
        let def = user_def();
        let err = create(&store, &registry, &def, input(&[("id", Value::Int(1))])).unwrap_err();
        assert!(matches!(err, RecordError::MissingRequired { .. }));
    }

    #[test]
    fn duplicate_unique_email_is_rejected_on_second_insert() {
        let store = InMemoryFrameStore::new();
        let registry = RecordRegistry::new();
        let def = user_def();
        create(&store, &registry, &def, input(&[("id", Value::Int(1)), ("email", Value::Str("a@b.com".into()))])).unwrap();
        let err = create(&store, &registry, &def, input(&[("id", Value::Int(2)), ("email", Value::Str("a@b.com".into()))])).unwrap_err();
        assert!(matches!(err, RecordError::UniqueConflict { .. }));
        assert_eq!(store.all("User").unwrap().len(), 1);
    }

    #[test]
    fn bulk_create_rejects_intra_batch_duplicate() {
        let store = InMemoryFrameStore::new();
        let registry = RecordRegistry::new();
        let def = user_def();
        let err = bulk_create(
            &store,
            &registry,
            &def,
            vec![
                input(&[("id", Value::Int(1)), ("email", Value::Str("a@b.com".into()))]),
                input(&[("id", Value::Int(2)), ("email", Value::Str("a@b.com".into()))]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, RecordError::UniqueConflict { .. }));
    }

    #[test]
    fn foreign_key_missing_target_is_rejected() {
        let store = InMemoryFrameStore::new();
        let mut registry = RecordRegistry::new();
        registry.register(user_def());
        let post_def = RecordDef::new("Post")
            .field(FieldDef::new("id", FieldType::Int).primary_key())
            .field(FieldDef::new("author_id", FieldType::Int).references("User", "id"));
        let err = create(&store, &registry, &post_def, input(&[("id", Value::Int(1)), ("author_id", Value::Int(99))])).unwrap_err();
        assert!(matches!(err, RecordError::ForeignKeyMissing { .. }));
    }

    #[test]
    fn update_excludes_self_from_unique_conflict() {
        let store = InMemoryFrameStore::new();
        let registry = RecordRegistry::new();
        let def = user_def();
        create(&store, &registry, &def, input(&[("id", Value::Int(1)), ("email", Value::Str("a@b.com".into()))])).unwrap();
        let condition = Condition::Leaf { field: "id".into(), op: CompareOp::Eq, value: Value::Int(1) };
        let count = update(&store, &registry, &def, &condition, input(&[("email", Value::Str("a@b.com".into()))])).unwrap();
        assert_eq!(count, 1);
    }
}
