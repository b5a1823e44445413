//! Purpose: Execute one validated `pgcouch` operation against PostgreSQL.
//! Exports: `Operation`, `dispatch`.
//! Role: Keep `main.rs` focused on parse/validate/bootstrap and delegate table I/O here.
//! Invariants: Only validated operations reach this module; it is the first to open a connection.
//! Invariants: Query results stream to stdout one compact JSON document per line.

use serde_json::{Value, json};
use tokio_stream::StreamExt;

use pgcouch::api::{
    Check, DocumentId, DocumentKey, Error, ErrorKind, HistoryTable, PgStore, Query, Revision,
    StoreConfig, Table, TableName,
};

use super::emit_json;

#[derive(Debug)]
pub(super) enum Operation {
    Init {
        table: TableName,
        history: bool,
    },
    Put {
        table: TableName,
        document: Value,
        history: bool,
    },
    Get {
        table: TableName,
        id: DocumentId,
        revision: Option<Revision>,
        history: bool,
    },
    Delete {
        table: TableName,
        key: DocumentKey,
    },
    Query {
        table: TableName,
        query: Query,
        history: bool,
        limit: Option<usize>,
    },
}

pub(super) async fn dispatch(operation: Operation, config: &StoreConfig) -> Result<(), Error> {
    let store = PgStore::new(config)?;
    match operation {
        Operation::Init { table, history } => {
            let existed = if history {
                history_table(store, &table)?.init().await?
            } else {
                value_table(store, &table)?.init().await?
            };
            emit_json(&json!({ "table": table.as_str(), "existed": existed }));
        }
        Operation::Put {
            table,
            document,
            history,
        } => {
            let written = if history {
                history_table(store, &table)?.put(&document).await?
            } else {
                value_table(store, &table)?.put(&document).await?
            };
            emit_json(&written);
        }
        Operation::Get {
            table,
            id,
            revision,
            history,
        } => {
            let found = if history {
                history_table(store, &table)?
                    .get(id.as_str(), revision.as_ref())
                    .await?
            } else {
                value_table(store, &table)?.get(id.as_str()).await?
            };
            emit_json(&found.unwrap_or(Value::Null));
        }
        Operation::Delete { table, key } => {
            value_table(store, &table)?.delete(&key).await?;
            emit_json(&json!({ "deleted": key }));
        }
        Operation::Query {
            table,
            query,
            history,
            limit,
        } => {
            let mut stream = if history {
                history_table(store, &table)?.query(query).await?
            } else {
                value_table(store, &table)?.query(query).await?
            };
            let limit = limit.unwrap_or(usize::MAX);
            let mut emitted = 0usize;
            while emitted < limit {
                let Some(document) = stream.next().await.transpose()? else {
                    break;
                };
                emit_line(&document)?;
                emitted += 1;
            }
            stream.close();
        }
    }
    Ok(())
}

fn value_table(store: PgStore, name: &TableName) -> Result<Table<Value, PgStore>, Error> {
    Table::new(store, name.as_str(), Check::serde())
}

fn history_table(store: PgStore, name: &TableName) -> Result<HistoryTable<Value, PgStore>, Error> {
    HistoryTable::new(store, name.as_str(), Check::serde())
}

fn emit_line(document: &Value) -> Result<(), Error> {
    let line = serde_json::to_string(document).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode document")
            .with_source(err)
    })?;
    println!("{line}");
    Ok(())
}
