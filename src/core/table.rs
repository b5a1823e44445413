//! Purpose: Revisioned document table over one JSONB relation.
//! Exports: `Table`.
//! Role: Optimistic-concurrency `put`/`delete`, `get`, and streaming `query` on top of a `Store`.
//! Invariants: Documents are validated and revisioned before any connection is acquired.
//! Invariants: Each operation holds exactly one connection and releases it on every exit path.
//! Invariants: A mutation succeeds only when exactly one row is affected.
//! Invariants: Lost races surface as typed errors; nothing is retried here.
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::core::check::Check;
use crate::core::document::{DocumentId, DocumentKey, REV_FIELD, TableName};
use crate::core::error::{Error, ErrorKind};
use crate::core::query::Query;
use crate::core::revision::revision_of;
use crate::core::stream::DocumentStream;
use crate::store::{Connection, RelationSchema, Store};

pub struct Table<T, S> {
    store: S,
    name: TableName,
    check: Check<T>,
}

impl<T, S: Clone> Clone for Table<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name.clone(),
            check: self.check.clone(),
        }
    }
}

impl<T, S> Table<T, S>
where
    T: Serialize,
    S: Store,
{
    pub fn new(store: S, name: impl Into<String>, check: Check<T>) -> Result<Self, Error> {
        Ok(Self {
            store,
            name: TableName::new(name)?,
            check,
        })
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn check(&self) -> &Check<T> {
        &self.check
    }

    /// Creates the relation and its indexes; returns `true` if it already existed.
    pub async fn init(&self) -> Result<bool, Error> {
        let schema = RelationSchema::current(self.name.as_str());
        let mut conn = self.store.acquire().await?;
        match conn.create_relation(&schema).await {
            Ok(()) => {
                info!(table = %self.name, "created table");
                Ok(false)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!(table = %self.name, "table already exists");
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    /// Inserts (no `_rev`) or updates (matching `_id` and `_rev`) a document.
    pub async fn put(&self, document: &T) -> Result<T, Error> {
        Ok(self.put_row(document).await?.0)
    }

    /// `put`, also returning the exact row written.
    pub(crate) async fn put_row(&self, document: &T) -> Result<(T, Value), Error> {
        let value = to_document(document)?;
        let key = DocumentKey::from_document(&value)?;
        self.check
            .check(value.clone())
            .map_err(|err| err.with_key(key.clone()))?;

        let revision = revision_of(&value)?;
        let mut stored = value.clone();
        if let Value::Object(object) = &mut stored {
            object.insert(
                REV_FIELD.to_string(),
                Value::String(revision.as_str().to_string()),
            );
        }
        let checked = self
            .check
            .check(stored.clone())
            .map_err(|err| err.with_key(key.clone()))?;

        let inserting = key.revision.is_none();
        let mut conn = self.store.acquire().await?;
        let count = if inserting {
            conn.insert(self.name.as_str(), &stored).await?
        } else {
            let pattern = Value::Object(key.to_pattern());
            conn.update(self.name.as_str(), &pattern, &stored).await?
        };
        match (count, inserting) {
            (1, _) => {}
            (0, true) => {
                return Err(Error::new(ErrorKind::Conflict)
                    .with_message("document already exists")
                    .with_key(key)
                    .with_document(value));
            }
            (0, false) => {
                return Err(Error::new(ErrorKind::MissingOnUpdate)
                    .with_message("no row matches id and revision")
                    .with_key(key));
            }
            (n, true) => return Err(self.unexpected_count("insert", n, key)),
            (n, false) => return Err(self.unexpected_count("update", n, key)),
        }
        debug!(table = %self.name, id = %key.id, rev = %revision, "put");
        Ok((checked, stored))
    }

    /// Current document for `id`, if any.
    pub async fn get(&self, id: &str) -> Result<Option<T>, Error> {
        let id = DocumentId::new(id)?;
        self.query(Query::by_id(id.as_str())).await?.first().await
    }

    /// Removes the row matching `_id` and `_rev`; `_rev` is mandatory.
    pub async fn delete<D: Serialize + ?Sized>(&self, document: &D) -> Result<(), Error> {
        let key = DocumentKey::from_document(&to_document(document)?)?;
        if key.revision.is_none() {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("delete requires a revision")
                .with_key(key));
        }

        let pattern = Value::Object(key.to_pattern());
        let mut conn = self.store.acquire().await?;
        match conn.delete(self.name.as_str(), &pattern).await? {
            1 => {
                debug!(table = %self.name, id = %key.id, "delete");
                Ok(())
            }
            0 => Err(Error::new(ErrorKind::MissingOnDelete)
                .with_message("no row matches id and revision")
                .with_key(key)),
            n => Err(self.unexpected_count("delete", n, key)),
        }
    }

    /// Containment (`Query::Contains`) or path (`Query::Path`) query over current rows.
    pub async fn query(&self, query: impl Into<Query>) -> Result<DocumentStream<T>, Error> {
        self.query_relations(&[self.name.as_str().to_string()], &query.into())
            .await
    }

    pub(crate) async fn query_relations(
        &self,
        relations: &[String],
        query: &Query,
    ) -> Result<DocumentStream<T>, Error> {
        let conn = self.store.acquire().await?;
        let rows = conn.select(relations, query).await?;
        Ok(DocumentStream::new(rows, self.check.clone()))
    }

    fn unexpected_count(&self, op: &str, count: u64, key: DocumentKey) -> Error {
        error!(table = %self.name, id = %key.id, op, count, "mutation affected more than one row");
        Error::new(ErrorKind::Internal)
            .with_message(format!("{op} affected {count} rows, expected 1"))
            .with_key(key)
    }
}

fn to_document<D: Serialize + ?Sized>(document: &D) -> Result<Value, Error> {
    let value = serde_json::to_value(document).map_err(|err| {
        Error::new(ErrorKind::Validation)
            .with_message("document is not serializable as JSON")
            .with_source(err)
    })?;
    if !value.is_object() {
        return Err(
            Error::new(ErrorKind::Validation).with_message("document must be a JSON object")
        );
    }
    Ok(value)
}
