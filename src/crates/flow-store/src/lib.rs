//! # flow-store — Frame Store for the Flow Execution Engine
//!
//! The Frame Store (C3, §4.7) is the tabular substrate the Record Layer
//! (`flow-records`) and the Transaction Manager (`flow-engine`) build on: a
//! named collection of dict-of-lists "frames", each holding rows of
//! [`flow_core::Value`]s, with query translation, a deep-copy [`Snapshot`]
//! for transaction rollback, and an optional lazy CSV-backed implementation
//! for file-backed frames.
//!
//! ## Core Concepts
//!
//! - [`FrameStore`] — the trait every backend implements:
//!   `ensure_frame`/`insert`/`get_by_primary_key`/`query`/`update`/`delete`/
//!   `all`/`snapshot`/`restore`. Implementors own rows exclusively; every
//!   returned row is a shallow copy the caller may freely mutate.
//! - [`Condition`] — the normalized boolean tree a `where`-expression
//!   compiles to (`Leaf`/`And`/`Or`/`All`/`Any`), with
//!   [`Condition::as_primary_key_eq`] recognizing the single-leaf
//!   primary-key fast path.
//! - [`InMemoryFrameStore`] — the reference backend, a
//!   `parking_lot::RwLock<IndexMap<String, Vec<Row>>>`.
//! - [`FileFrameStore`] — lazily loads CSV-backed frames into an internal
//!   `InMemoryFrameStore` cache on first access.

pub mod csv_store;
pub mod error;
pub mod memory;
pub mod traits;

pub use csv_store::{CsvSource, FileFrameStore, HeaderMode};
pub use error::{FrameStoreError, Result};
pub use memory::InMemoryFrameStore;
pub use traits::{CompareOp, Condition, FrameStore, QueryOptions, Row, Snapshot, SortDirection};
