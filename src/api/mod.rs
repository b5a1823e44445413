//! Purpose: Define the stable public Rust API boundary for pgcouch.
//! Exports: Table types, identifiers, errors, queries, stores, and configuration.
//! Role: Public, additive-only surface; callers should not need `core` or `store` paths.
//! Invariants: Everything a caller needs for init/put/get/delete/query is re-exported here.

pub use crate::config::StoreConfig;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::check::Check;
pub use crate::core::document::{DocumentId, DocumentKey, ID_FIELD, REV_FIELD, Revision, TableName};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::history::HistoryTable;
pub use crate::core::query::Query;
pub use crate::core::revision::revision_of;
pub use crate::core::stream::DocumentStream;
pub use crate::core::table::Table;
pub use crate::store::{Connection, MemoryStore, PgStore, RelationSchema, RowStream, Store};
