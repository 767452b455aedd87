//! `find <plural> where …` (§4.7): translate already-normalized where-trees
//! into [`flow_store::Condition`], choose the primary-key fast path when
//! possible, apply order/offset/limit, and attach relationship joins.

use crate::error::Result;
use crate::schema::RecordDef;
use flow_core::Value;
use flow_store::{Condition, FrameStore, QueryOptions, Row};
use indexmap::IndexMap;

/// A single relationship join: batch-fetch rows of `target_record` whose
/// `target_field` matches this record's `local_field`, attaching the
/// matches (list) under `attachment_field`.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub local_field: String,
    pub target_frame: String,
    pub target_field: String,
    pub attachment_field: String,
}

#[derive(Debug, Clone, Default)]
pub struct FindRequest {
    pub condition: Condition,
    pub order_by: Vec<(String, flow_store::SortDirection)>,
    pub offset: usize,
    pub limit: Option<usize>,
    pub joins: Vec<JoinSpec>,
}

/// Runs a `find`, using the primary-key fast path when the where-tree
/// reduces to a single `pk = literal` leaf (§4.17), then attaches any
/// requested relationship joins via a batched fetch per join.
pub fn find(store: &dyn FrameStore, def: &RecordDef, req: &FindRequest) -> Result<Vec<Row>> {
    let rows = if let Some(pk_field) = def.primary_key_field().map(|f| f.name.clone()) {
        if let Some(pk_value) = req.condition.as_primary_key_eq(&pk_field) {
            let row = store.get_by_primary_key(&def.frame, &pk_field, pk_value)?;
            row.into_iter().collect()
        } else {
            scan(store, def, req)?
        }
    } else {
        scan(store, def, req)?
    };

    attach_joins(store, rows, &req.joins)
}

fn scan(store: &dyn FrameStore, def: &RecordDef, req: &FindRequest) -> Result<Vec<Row>> {
    let options = QueryOptions {
        condition: req.condition.clone(),
        order_by: req.order_by.clone(),
        offset: req.offset,
        limit: req.limit,
    };
    Ok(store.query(&def.frame, &options)?)
}

fn attach_joins(store: &dyn FrameStore, mut rows: Vec<Row>, joins: &[JoinSpec]) -> Result<Vec<Row>> {
    for join in joins {
        let mut cache: IndexMap<String, Vec<Row>> = IndexMap::new();
        for row in rows.iter_mut() {
            let Some(key) = row.get(&join.local_field).cloned() else { continue };
            let key_str = key.to_string();
            if !cache.contains_key(&key_str) {
                let condition = Condition::Leaf {
                    field: join.target_field.clone(),
                    op: flow_store::CompareOp::Eq,
                    value: key.clone(),
                };
                let matches = store.query(&join.target_frame, &QueryOptions { condition, ..Default::default() })?;
                cache.insert(key_str.clone(), matches);
            }
            let attached = cache.get(&key_str).cloned().unwrap_or_default();
            row.insert(join.attachment_field.clone(), Value::List(attached.into_iter().map(row_to_value).collect()));
        }
    }
    Ok(rows)
}

fn row_to_value(row: Row) -> Value {
    Value::Map(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_store::InMemoryFrameStore;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn pk_fast_path_returns_single_row() {
        let store = InMemoryFrameStore::new();
        store.ensure_frame("users");
        store.insert("users", row(&[("id", Value::Int(1)), ("email", Value::Str("a@b.com".into()))])).unwrap();
        let def = RecordDef::new("User").field(crate::schema::FieldDef::new("id", crate::schema::FieldType::Int).primary_key());
        let req = FindRequest {
            condition: Condition::Leaf { field: "id".into(), op: flow_store::CompareOp::Eq, value: Value::Int(1) },
            ..Default::default()
        };
        let found = find(&store, &def, &req).unwrap();
        assert_eq!(found.len(), 1);
    }
}
