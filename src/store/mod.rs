//! Purpose: Backend seam between document tables and the relational engine.
//! Exports: `Store`, `Connection`, `RelationSchema`, `RowStream`, `PgStore`, `MemoryStore`.
//! Role: Tables speak in relations, JSON rows, and affected-row counts; stores speak SQL (or not).
//! Invariants: One `Connection` per operation; dropping it returns it to its store.
//! Invariants: `select` consumes the connection so the row stream owns it until dropped.
//! Invariants: Duplicate schema objects surface as `ErrorKind::AlreadyExists`.
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio_stream::Stream;

use crate::core::document::{ID_FIELD, REV_FIELD};
use crate::core::error::Error;
use crate::core::query::Query;

pub mod memory;
pub(crate) mod path_expr;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Rows of the `data` column, pulled lazily.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<Value, Error>> + Send>>;

/// One JSONB relation with a uniqueness constraint over top-level fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationSchema {
    pub name: String,
    pub unique_fields: Vec<&'static str>,
}

impl RelationSchema {
    /// At most one row per `_id`.
    pub fn current(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique_fields: vec![ID_FIELD],
        }
    }

    /// One row per (`_id`, `_rev`).
    pub fn history(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique_fields: vec![ID_FIELD, REV_FIELD],
        }
    }
}

pub trait Store: Clone + Send + Sync + 'static {
    type Conn: Connection;

    /// Waits for a free connection; exhaustion past the store's timeout is `Connection`.
    fn acquire(&self) -> impl Future<Output = Result<Self::Conn, Error>> + Send;
}

pub trait Connection: Send + 'static {
    /// Creates the relation and its indexes atomically.
    fn create_relation(
        &mut self,
        schema: &RelationSchema,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Inserts unless a unique constraint already holds the key; returns rows inserted.
    fn insert(
        &mut self,
        relation: &str,
        data: &Value,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Replaces every row containing `key` with `data`; returns rows updated.
    fn update(
        &mut self,
        relation: &str,
        key: &Value,
        data: &Value,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Removes every row containing `key`; returns rows deleted.
    fn delete(
        &mut self,
        relation: &str,
        key: &Value,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Set union of the matching rows of each relation.
    fn select(
        self,
        relations: &[String],
        query: &Query,
    ) -> impl Future<Output = Result<RowStream, Error>> + Send;
}
