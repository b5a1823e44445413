//! Purpose: PostgreSQL implementation of the store seam over `tokio-postgres`.
//! Exports: `PgStore`, `PgConnection`, `PgPool`.
//! Role: Renders statements via `sql`, maps driver errors onto `ErrorKind`.
//! Invariants: Schema creation runs in one transaction; dropping it mid-way rolls back.
//! Invariants: Row streams hold their pooled client until dropped.
//! Notes: Rows are pulled from the driver's response channel one at a time.
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio_postgres::error::SqlState;
use tokio_stream::Stream;
use tracing::debug;

use crate::config::StoreConfig;
use crate::core::error::{Error, ErrorKind};
use crate::core::query::Query;
use crate::store::{Connection, RelationSchema, RowStream, Store};

mod pool;
pub(crate) mod sql;

pub use pool::{PgPool, PooledClient};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Builds the pool; no connection is opened until the first operation.
    pub fn new(config: &StoreConfig) -> Result<Self, Error> {
        Ok(Self {
            pool: PgPool::new(config)?,
        })
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::new(&StoreConfig::from_env()?)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for PgStore {
    type Conn = PgConnection;

    async fn acquire(&self) -> Result<PgConnection, Error> {
        Ok(PgConnection {
            client: self.pool.get().await?,
        })
    }
}

pub struct PgConnection {
    client: PooledClient,
}

impl Connection for PgConnection {
    async fn create_relation(&mut self, schema: &RelationSchema) -> Result<(), Error> {
        let statements = sql::create_relation(schema);
        let tx = self.client.transaction().await.map_err(map_pg_error)?;
        for statement in &statements {
            debug!(relation = %schema.name, statement = %statement, "ddl");
            tx.batch_execute(statement).await.map_err(map_ddl_error)?;
        }
        tx.commit().await.map_err(map_ddl_error)
    }

    async fn insert(&mut self, relation: &str, data: &Value) -> Result<u64, Error> {
        self.client
            .execute(&sql::insert(relation), &[data])
            .await
            .map_err(map_pg_error)
    }

    async fn update(&mut self, relation: &str, key: &Value, data: &Value) -> Result<u64, Error> {
        self.client
            .execute(&sql::update(relation), &[data, key])
            .await
            .map_err(map_pg_error)
    }

    async fn delete(&mut self, relation: &str, key: &Value) -> Result<u64, Error> {
        self.client
            .execute(&sql::delete(relation), &[key])
            .await
            .map_err(map_pg_error)
    }

    async fn select(self, relations: &[String], query: &Query) -> Result<RowStream, Error> {
        let statement = sql::select(relations, query);
        debug!(statement = %statement, "select");
        let rows = match query {
            Query::Contains(pattern) => {
                let pattern = Value::Object(pattern.clone());
                self.client.query_raw(statement.as_str(), [&pattern]).await
            }
            Query::Path(expr) => self.client.query_raw(statement.as_str(), [expr]).await,
        }
        .map_err(map_pg_error)?;
        Ok(Box::pin(PgRows {
            rows: Box::pin(rows),
            _client: self.client,
        }))
    }
}

struct PgRows {
    rows: Pin<Box<tokio_postgres::RowStream>>,
    _client: PooledClient,
}

impl Stream for PgRows {
    type Item = Result<Value, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rows.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(
                row.try_get::<_, Value>(0).map_err(|err| {
                    Error::new(ErrorKind::Database)
                        .with_message("failed to decode data column")
                        .with_source(err)
                }),
            )),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(map_pg_error(err)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn map_pg_error(err: tokio_postgres::Error) -> Error {
    map_error(err, false)
}

fn map_ddl_error(err: tokio_postgres::Error) -> Error {
    map_error(err, true)
}

fn map_error(err: tokio_postgres::Error, ddl: bool) -> Error {
    let Some(code) = err.code().cloned() else {
        let kind = if err.is_closed() {
            ErrorKind::Connection
        } else {
            ErrorKind::Database
        };
        return Error::new(kind).with_source(err);
    };
    // Concurrent creators collide on the catalog's own unique index (23505).
    let kind = if ddl && (code == SqlState::DUPLICATE_TABLE || code == SqlState::UNIQUE_VIOLATION)
    {
        ErrorKind::AlreadyExists
    } else if code == SqlState::SYNTAX_ERROR {
        ErrorKind::Usage
    } else {
        ErrorKind::Database
    };
    let message = err
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| err.to_string());
    Error::new(kind)
        .with_message(message)
        .with_sqlstate(code.code())
        .with_source(err)
}
