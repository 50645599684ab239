//! Embedded document store.
//!  - [kv] provides nested, ordered buckets on top of SQLite.
//!  - [entity] describes the stored kinds: where they live and how their fields are coerced.
//!  - [document_store::Store] implements generic CRUD and filtered scans on top of both.
//!
//! Layout: `appInfo` holds the version marker, `record` holds records keyed by id together with
//! one nested `time<id>` bucket of intervals per record.

pub mod compare;
pub mod document_store;
pub mod entity;
pub mod error;
pub mod kv;

pub use compare::{Operator, Predicate};
pub use document_store::Store;
pub use entity::{fields, Entity, EntityKind, Fields, Record, RecordType, Time};
pub use error::{StoreError, StoreResult};
