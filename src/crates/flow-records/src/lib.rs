//! # flow-records
//!
//! The Record Layer (C4): schema enforcement, default resolution, unique
//! constraints (with scoping and intra-batch tracking), foreign-key
//! integrity, and `find` translation/joins over a [`flow_store::FrameStore`].
//!
//! `flow-engine` dispatches `db_*`/`find` nodes into [`ops`] using the
//! [`RecordDef`]s parsed from the `IrProgram`'s `records` collection.

pub mod coerce;
pub mod error;
pub mod ops;
pub mod query;
pub mod schema;
pub mod validate;

pub use error::{RecordError, Result};
pub use ops::{bulk_create, bulk_delete, bulk_update, create, delete, update, RecordRegistry};
pub use query::{find, FindRequest, JoinSpec};
pub use schema::{DefaultValue, FieldDef, FieldType, RecordDef};
