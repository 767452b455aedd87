//! `FrameStore` (C3, §4.7): "insert(name, row), query(name, filters | expr),
//! update(name, filters, updates)->count, delete(name, filters)->count,
//! snapshot(), restore(snapshot)". Ownership: "the store exclusively owns
//! rows; callers receive shallow copies."

use crate::error::Result;
use flow_core::value::Value;
use indexmap::IndexMap;

pub type Row = IndexMap<String, Value>;

/// The normalized boolean tree a `find` condition compiles to (§4.7):
/// "translate `where` conditions into a normalized boolean tree
/// `{type: leaf|and|or|all|any}`".
#[derive(Debug, Clone)]
pub enum Condition {
    Leaf {
        field: String,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    All,
    Any(Vec<Condition>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
}

impl Condition {
    /// §4.17: "when a `find`'s where-tree reduces to a single `pk = literal`
    /// leaf, the frame store is queried by primary key directly".
    pub fn as_primary_key_eq(&self, pk_field: &str) -> Option<&Value> {
        match self {
            Condition::Leaf { field, op, value } if field == pk_field && *op == CompareOp::Eq => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Condition::Leaf { field, op, value } => {
                let actual = row.get(field).cloned().unwrap_or(Value::Null);
                compare(&actual, *op, value)
            }
            Condition::And(parts) => parts.iter().all(|c| c.matches(row)),
            Condition::Or(parts) => parts.iter().any(|c| c.matches(row)),
            Condition::All => true,
            Condition::Any(parts) => parts.iter().any(|c| c.matches(row)),
        }
    }
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => actual.values_equal(expected),
        CompareOp::Neq => !actual.values_equal(expected),
        CompareOp::Lt => actual.partial_cmp_value(expected).is_some_and(|o| o.is_lt()),
        CompareOp::Lte => actual.partial_cmp_value(expected).is_some_and(|o| o.is_le()),
        CompareOp::Gt => actual.partial_cmp_value(expected).is_some_and(|o| o.is_gt()),
        CompareOp::Gte => actual.partial_cmp_value(expected).is_some_and(|o| o.is_ge()),
        CompareOp::Contains => match (actual, expected) {
            (Value::Str(a), Value::Str(b)) => a.contains(b.as_str()),
            (Value::List(items), _) => items.iter().any(|v| v.values_equal(expected)),
            _ => false,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub condition: Condition,
    pub order_by: Vec<(String, SortDirection)>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            condition: Condition::All,
            order_by: Vec::new(),
            offset: 0,
            limit: None,
        }
    }
}

/// A deep copy of every frame's rows at a point in time, used by the
/// Transaction Manager (C13) to restore wholesale on rollback (§5: "snapshot
/// the full frame store (deep-copy of all tables) and restore wholesale on
/// failure").
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub frames: IndexMap<String, Vec<Row>>,
}

/// The Frame Store contract (§4.7). Implementors own rows exclusively;
/// every returned row is a shallow copy the caller may freely mutate.
pub trait FrameStore: Send + Sync {
    fn ensure_frame(&self, name: &str);

    fn insert(&self, frame: &str, row: Row) -> Result<Row>;

    fn get_by_primary_key(&self, frame: &str, pk_field: &str, pk: &Value) -> Result<Option<Row>>;

    fn query(&self, frame: &str, options: &QueryOptions) -> Result<Vec<Row>>;

    fn update(&self, frame: &str, condition: &Condition, updates: &Row) -> Result<usize>;

    fn delete(&self, frame: &str, condition: &Condition) -> Result<usize>;

    fn all(&self, frame: &str) -> Result<Vec<Row>>;

    fn snapshot(&self) -> Snapshot;

    fn restore(&self, snapshot: Snapshot);
}
