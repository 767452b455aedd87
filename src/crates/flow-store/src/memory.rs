//! In-memory Frame Store (§4.7): "memory-backed frames live in an internal
//! dict-of-lists."

use crate::error::{FrameStoreError, Result};
use crate::traits::{Condition, FrameStore, QueryOptions, Row, SortDirection, Snapshot};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::cmp::Ordering;

#[derive(Debug, Default)]
pub struct InMemoryFrameStore {
    frames: RwLock<IndexMap<String, Vec<Row>>>,
}

impl InMemoryFrameStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameStore for InMemoryFrameStore {
    fn ensure_frame(&self, name: &str) {
        self.frames.write().entry(name.to_string()).or_default();
    }

    fn insert(&self, frame: &str, row: Row) -> Result<Row> {
        let mut frames = self.frames.write();
        let rows = frames.entry(frame.to_string()).or_default();
        rows.push(row.clone());
        Ok(row)
    }

    fn get_by_primary_key(&self, frame: &str, pk_field: &str, pk: &flow_core::Value) -> Result<Option<Row>> {
        let frames = self.frames.read();
        let rows = frames
            .get(frame)
            .ok_or_else(|| FrameStoreError::FrameNotFound(frame.to_string()))?;
        Ok(rows
            .iter()
            .find(|r| r.get(pk_field).is_some_and(|v| v.values_equal(pk)))
            .cloned())
    }

    fn query(&self, frame: &str, options: &QueryOptions) -> Result<Vec<Row>> {
        let frames = self.frames.read();
        let rows = frames
            .get(frame)
            .ok_or_else(|| FrameStoreError::FrameNotFound(frame.to_string()))?;

        let mut matched: Vec<Row> = rows
            .iter()
            .filter(|r| options.condition.matches(r))
            .cloned()
            .collect();

        if !options.order_by.is_empty() {
            matched.sort_by(|a, b| {
                for (field, dir) in &options.order_by {
                    let av = a.get(field).cloned().unwrap_or(flow_core::Value::Null);
                    let bv = b.get(field).cloned().unwrap_or(flow_core::Value::Null);
                    let ord = av.partial_cmp_value(&bv).unwrap_or(Ordering::Equal);
                    let ord = if *dir == SortDirection::Desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let matched: Vec<Row> = matched.into_iter().skip(options.offset).collect();
        Ok(match options.limit {
            Some(n) => matched.into_iter().take(n).collect(),
            None => matched,
        })
    }

    fn update(&self, frame: &str, condition: &Condition, updates: &Row) -> Result<usize> {
        let mut frames = self.frames.write();
        let rows = frames
            .get_mut(frame)
            .ok_or_else(|| FrameStoreError::FrameNotFound(frame.to_string()))?;
        let mut count = 0;
        for row in rows.iter_mut() {
            if condition.matches(row) {
                for (k, v) in updates {
                    row.insert(k.clone(), v.clone());
                }
                count += 1;
            }
        }
        Ok(count)
    }

    fn delete(&self, frame: &str, condition: &Condition) -> Result<usize> {
        let mut frames = self.frames.write();
        let rows = frames
            .get_mut(frame)
            .ok_or_else(|| FrameStoreError::FrameNotFound(frame.to_string()))?;
        let before = rows.len();
        rows.retain(|row| !condition.matches(row));
        Ok(before - rows.len())
    }

    fn all(&self, frame: &str) -> Result<Vec<Row>> {
        let frames = self.frames.read();
        Ok(frames.get(frame).cloned().unwrap_or_default())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            frames: self.frames.read().clone(),
        }
    }

    fn restore(&self, snapshot: Snapshot) {
        *self.frames.write() = snapshot.frames;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::Value;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn insert_and_query_round_trip() {
        let store = InMemoryFrameStore::new();
        store.ensure_frame("users");
        store.insert("users", row(&[("id", Value::Int(1)), ("email", Value::Str("a@b.com".into()))])).unwrap();
        let found = store.query("users", &QueryOptions::default()).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn snapshot_restore_undoes_writes() {
        let store = InMemoryFrameStore::new();
        store.ensure_frame("users");
        store.insert("users", row(&[("id", Value::Int(1))])).unwrap();
        let snap = store.snapshot();
        store.insert("users", row(&[("id", Value::Int(2))])).unwrap();
        assert_eq!(store.all("users").unwrap().len(), 2);
        store.restore(snap);
        assert_eq!(store.all("users").unwrap().len(), 1);
    }

    #[test]
    fn delete_removes_matching_rows_only() {
        let store = InMemoryFrameStore::new();
        store.ensure_frame("users");
        store.insert("users", row(&[("id", Value::Int(1))])).unwrap();
        store.insert("users", row(&[("id", Value::Int(2))])).unwrap();
        let cond = Condition::Leaf { field: "id".into(), op: crate::traits::CompareOp::Eq, value: Value::Int(1) };
        let removed = store.delete("users", &cond).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.all("users").unwrap().len(), 1);
    }
}
