//! Purpose: In-process store with the same contract as the PostgreSQL backend.
//! Exports: `MemoryStore`, `MemoryConnection`.
//! Role: Backs the test suite and embedded uses; mirrors JSONB containment and unique indexes.
//! Invariants: Every statement is atomic under one lock; no lock is held across an await.
//! Invariants: Connections are bounded by a semaphore exactly like the pooled backend.
//! Invariants: Engine failures carry the SQLSTATE PostgreSQL would report.
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_stream::Stream;

use crate::config::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS};
use crate::core::error::{Error, ErrorKind};
use crate::core::query::Query;
use crate::store::path_expr::{self, PathPredicate};
use crate::store::{Connection, RelationSchema, RowStream, Store};

#[derive(Clone)]
pub struct MemoryStore {
    relations: Arc<Mutex<HashMap<String, Relation>>>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

#[derive(Debug, Default)]
struct Relation {
    unique_fields: Vec<&'static str>,
    rows: Vec<Value>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CONNECTIONS)
    }

    pub fn with_capacity(max_connections: usize) -> Self {
        Self {
            relations: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_connections)),
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Connections not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Row count of a relation, `None` if it was never created.
    pub fn row_count(&self, relation: &str) -> Option<usize> {
        self.lock().get(relation).map(|relation| relation.rows.len())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Relation>> {
        self.relations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    type Conn = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection, Error> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            Error::new(ErrorKind::Connection).with_message(format!(
                "connection pool exhausted after {:?}",
                self.acquire_timeout
            ))
        })?
        .map_err(|err| {
            Error::new(ErrorKind::Connection)
                .with_message("connection pool closed")
                .with_source(err)
        })?;
        Ok(MemoryConnection {
            store: self.clone(),
            permit,
        })
    }
}

pub struct MemoryConnection {
    store: MemoryStore,
    permit: OwnedSemaphorePermit,
}

impl Connection for MemoryConnection {
    async fn create_relation(&mut self, schema: &RelationSchema) -> Result<(), Error> {
        let mut relations = self.store.lock();
        if relations.contains_key(&schema.name) {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message(format!("relation \"{}\" already exists", schema.name))
                .with_sqlstate("42P07"));
        }
        relations.insert(
            schema.name.clone(),
            Relation {
                unique_fields: schema.unique_fields.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn insert(&mut self, relation: &str, data: &Value) -> Result<u64, Error> {
        let mut relations = self.store.lock();
        let relation = existing(&mut relations, relation)?;
        if relation.rows.iter().any(|row| relation.collides(row, data)) {
            return Ok(0);
        }
        relation.rows.push(data.clone());
        Ok(1)
    }

    async fn update(&mut self, relation: &str, key: &Value, data: &Value) -> Result<u64, Error> {
        let mut relations = self.store.lock();
        let relation = existing(&mut relations, relation)?;
        let matched: Vec<usize> = (0..relation.rows.len())
            .filter(|&idx| contains(&relation.rows[idx], key))
            .collect();
        let collision = relation
            .rows
            .iter()
            .enumerate()
            .any(|(idx, row)| !matched.contains(&idx) && relation.collides(row, data));
        if collision || (matched.len() > 1 && !relation.unique_fields.is_empty()) {
            return Err(Error::new(ErrorKind::Database)
                .with_message("duplicate key value violates unique constraint")
                .with_sqlstate("23505"));
        }
        for &idx in &matched {
            relation.rows[idx] = data.clone();
        }
        Ok(matched.len() as u64)
    }

    async fn delete(&mut self, relation: &str, key: &Value) -> Result<u64, Error> {
        let mut relations = self.store.lock();
        let relation = existing(&mut relations, relation)?;
        let before = relation.rows.len();
        relation.rows.retain(|row| !contains(row, key));
        Ok((before - relation.rows.len()) as u64)
    }

    async fn select(self, relations: &[String], query: &Query) -> Result<RowStream, Error> {
        let rows = self.matching_rows(relations, query)?;
        Ok(Box::pin(MemoryRows {
            rows: rows.into_iter(),
            _permit: self.permit,
        }))
    }
}

impl MemoryConnection {
    fn matching_rows(&self, relations: &[String], query: &Query) -> Result<Vec<Value>, Error> {
        let predicate = match query {
            Query::Path(expr) => Some(path_expr::compile(expr)?),
            Query::Contains(_) => None,
        };
        let pattern = match query {
            Query::Contains(pattern) => Value::Object(pattern.clone()),
            Query::Path(_) => Value::Null,
        };
        let matches = |row: &Value, predicate: &Option<PathPredicate>| match predicate {
            Some(predicate) => predicate.matches(row),
            None => contains(row, &pattern),
        };

        let state = self.store.lock();
        let mut out: Vec<Value> = Vec::new();
        for name in relations {
            let Some(relation) = state.get(name) else {
                return Err(undefined_table(name));
            };
            for row in &relation.rows {
                // UNION semantics: identical rows are returned once.
                if matches(row, &predicate) && !out.contains(row) {
                    out.push(row.clone());
                }
            }
        }
        Ok(out)
    }
}

impl Relation {
    // NULL (missing) key fields never collide, as in a PostgreSQL unique index.
    fn collides(&self, row: &Value, data: &Value) -> bool {
        if self.unique_fields.is_empty() {
            return false;
        }
        self.unique_fields.iter().all(|field| {
            match (row.get(field), data.get(field)) {
                (Some(a), Some(b)) if !a.is_null() && !b.is_null() => a == b,
                _ => false,
            }
        })
    }
}

fn existing<'a>(
    relations: &'a mut HashMap<String, Relation>,
    name: &str,
) -> Result<&'a mut Relation, Error> {
    relations.get_mut(name).ok_or_else(|| undefined_table(name))
}

fn undefined_table(name: &str) -> Error {
    Error::new(ErrorKind::Database)
        .with_message(format!("relation \"{name}\" does not exist"))
        .with_sqlstate("42P01")
}

/// JSONB containment (`a @> b`).
pub(crate) fn contains(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => b
            .iter()
            .all(|(key, bv)| a.get(key).is_some_and(|av| contains_nested(av, bv))),
        (Value::Array(a), Value::Array(b)) => b
            .iter()
            .all(|bv| a.iter().any(|av| contains_nested(av, bv))),
        // A top-level array contains a bare scalar element.
        (Value::Array(a), b) if !b.is_object() => a.iter().any(|av| scalar_eq(av, b)),
        (a, b) => scalar_eq(a, b),
    }
}

fn contains_nested(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_)) => contains(a, b),
        (a, b) => scalar_eq(a, b),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Object(_), _) | (Value::Array(_), _) => false,
        (a, b) => a == b,
    }
}

struct MemoryRows {
    rows: std::vec::IntoIter<Value>,
    _permit: OwnedSemaphorePermit,
}

impl Stream for MemoryRows {
    type Item = Result<Value, Error>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.rows.next().map(Ok))
    }
}
