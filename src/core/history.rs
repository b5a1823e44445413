//! Purpose: Table decorator that keeps every written revision in an append-only relation.
//! Exports: `HistoryTable`.
//! Role: Wraps a base `Table`; `get`/`query` search the current and history relations together.
//! Invariants: History rows are unique per (`_id`, `_rev`) and never updated or deleted here.
//! Invariants: Every revision `put` writes is archived right after the base write succeeds.
//! Notes: The archive insert is a separate statement; a failure there surfaces as an error
//! after the current row has already changed.
use serde::Serialize;
use tracing::{debug, info};

use crate::core::check::Check;
use crate::core::document::{DocumentId, DocumentKey, Revision};
use crate::core::error::{Error, ErrorKind};
use crate::core::query::Query;
use crate::core::stream::DocumentStream;
use crate::core::table::Table;
use crate::store::{Connection, RelationSchema, Store};

pub struct HistoryTable<T, S> {
    base: Table<T, S>,
    history: String,
}

impl<T, S> HistoryTable<T, S>
where
    T: Serialize,
    S: Store,
{
    pub fn new(store: S, name: impl Into<String>, check: Check<T>) -> Result<Self, Error> {
        Ok(Self::wrap(Table::new(store, name, check)?))
    }

    pub fn wrap(base: Table<T, S>) -> Self {
        let history = base.name().history();
        Self { base, history }
    }

    pub fn base(&self) -> &Table<T, S> {
        &self.base
    }

    pub fn history_name(&self) -> &str {
        &self.history
    }

    /// Initializes both relations; the flag reports whether the base table existed.
    pub async fn init(&self) -> Result<bool, Error> {
        let existed = self.base.init().await?;
        let schema = RelationSchema::history(self.history.as_str());
        let mut conn = self.base.store().acquire().await?;
        match conn.create_relation(&schema).await {
            Ok(()) => info!(table = %self.history, "created history table"),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!(table = %self.history, "history table already exists");
            }
            Err(err) => return Err(err),
        }
        Ok(existed)
    }

    /// Base `put`, then the new revision is appended to history.
    pub async fn put(&self, document: &T) -> Result<T, Error> {
        let (written, row) = self.base.put_row(document).await?;
        let mut conn = self.base.store().acquire().await?;
        if conn.insert(&self.history, &row).await? == 0 {
            let key = DocumentKey::from_document(&row)?;
            debug!(table = %self.history, id = %key.id, "revision already archived");
        }
        Ok(written)
    }

    /// Base `delete`; archived revisions stay.
    pub async fn delete<D: Serialize + ?Sized>(&self, document: &D) -> Result<(), Error> {
        self.base.delete(document).await
    }

    /// Current document, or a specific revision from either relation.
    pub async fn get(&self, id: &str, revision: Option<&Revision>) -> Result<Option<T>, Error> {
        let Some(revision) = revision else {
            return self.base.get(id).await;
        };
        let key = DocumentKey::new(DocumentId::new(id)?, Some(revision.clone()));
        self.query(Query::by_key(&key)).await?.first().await
    }

    /// `SELECT ... UNION SELECT ...` over the current and history relations.
    pub async fn query(&self, query: impl Into<Query>) -> Result<DocumentStream<T>, Error> {
        let relations = [self.base.name().as_str().to_string(), self.history.clone()];
        self.base.query_relations(&relations, &query.into()).await
    }

    /// Every stored revision of `id`, in no particular order.
    pub async fn revisions(&self, id: &str) -> Result<Vec<T>, Error> {
        let id = DocumentId::new(id)?;
        self.query(Query::by_id(id.as_str()))
            .await?
            .collect_documents()
            .await
    }
}

impl<T, S: Clone> Clone for HistoryTable<T, S> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            history: self.history.clone(),
        }
    }
}
