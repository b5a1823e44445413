//! Purpose: `pgcouch` CLI entry point.
//! Role: Binary crate root; parses args, validates input, runs one table operation.
//! Invariants: Results are JSON on stdout (queries emit one document per line).
//! Invariants: Errors are emitted as JSON on stderr; logs also go to stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Input is validated before any connection is opened.
use std::io::{self, IsTerminal, Read};
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use pgcouch::api::{
    DocumentId, DocumentKey, Error, ErrorKind, Query, Revision, StoreConfig, TableName,
    to_exit_code,
};

mod command_dispatch;

use command_dispatch::{Operation, dispatch};

#[derive(Parser, Debug)]
#[command(
    name = "pgcouch",
    version,
    about = "Revisioned JSON document tables on PostgreSQL",
    propagate_version = true
)]
struct Cli {
    /// Connection URL; defaults to PGCOUCH_DATABASE_URL, DATABASE_URL, then PG* variables.
    #[arg(long, global = true, value_name = "URL")]
    database_url: Option<String>,
    /// Upper bound on pooled connections.
    #[arg(long, global = true, value_name = "N")]
    max_connections: Option<usize>,
    /// How long to wait for a free connection.
    #[arg(long, global = true, value_name = "MS")]
    acquire_timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the table and its indexes (idempotent).
    Init {
        table: String,
        /// Also create the append-only history relation.
        #[arg(long)]
        history: bool,
    },
    /// Insert a document (no `_rev`) or update it (with the current `_rev`).
    Put {
        table: String,
        /// JSON object, or `-` to read it from stdin.
        data: String,
        /// Archive the written revision in the history relation.
        #[arg(long)]
        history: bool,
    },
    /// Fetch the current document, or a specific revision with --rev --history.
    Get {
        table: String,
        id: String,
        #[arg(long)]
        rev: Option<String>,
        #[arg(long)]
        history: bool,
    },
    /// Delete the document matching id and revision.
    Delete { table: String, id: String, rev: String },
    /// Stream matching documents: `{...}` is a containment pattern, anything else a path predicate.
    Query {
        table: String,
        pattern: String,
        /// Include archived revisions.
        #[arg(long)]
        history: bool,
        /// Stop after this many documents.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Generate shell completions.
    Completion { shell: Shell },
}

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(());
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage).with_message(clap_error_summary(&err)));
            }
        },
    };

    let Cli {
        database_url,
        max_connections,
        acquire_timeout_ms,
        command,
    } = cli;

    if let Command::Completion { shell } = command {
        let mut cmd = Cli::command();
        clap_complete::aot::generate(shell, &mut cmd, "pgcouch", &mut io::stdout());
        return Ok(());
    }

    let operation = prepare(command)?;

    let mut config = StoreConfig::from_env()?;
    if let Some(url) = database_url {
        config = config.with_url(url);
    }
    if let Some(max) = max_connections {
        config = config.with_max_connections(max)?;
    }
    if let Some(ms) = acquire_timeout_ms {
        config = config.with_acquire_timeout(Duration::from_millis(ms));
    }

    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })?;
    runtime.block_on(dispatch(operation, &config))
}

/// Validates arguments into an `Operation` without touching the database.
fn prepare(command: Command) -> Result<Operation, Error> {
    match command {
        Command::Init { table, history } => Ok(Operation::Init {
            table: TableName::new(table)?,
            history,
        }),
        Command::Put {
            table,
            data,
            history,
        } => {
            let text = if data == "-" {
                let mut buf = String::new();
                io::stdin().read_to_string(&mut buf).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to read stdin")
                        .with_source(err)
                })?;
                buf
            } else {
                data
            };
            let document: Value = serde_json::from_str(&text).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("document is not valid JSON")
                    .with_source(err)
            })?;
            DocumentKey::from_document(&document)?;
            Ok(Operation::Put {
                table: TableName::new(table)?,
                document,
                history,
            })
        }
        Command::Get {
            table,
            id,
            rev,
            history,
        } => {
            if rev.is_some() && !history {
                return Err(Error::new(ErrorKind::Usage).with_message(
                    "--rev requires --history; the current table keeps one revision",
                ));
            }
            Ok(Operation::Get {
                table: TableName::new(table)?,
                id: DocumentId::new(id)?,
                revision: rev.map(Revision::new).transpose()?,
                history,
            })
        }
        Command::Delete { table, id, rev } => Ok(Operation::Delete {
            table: TableName::new(table)?,
            key: DocumentKey::new(DocumentId::new(id)?, Some(Revision::new(rev)?)),
        }),
        Command::Query {
            table,
            pattern,
            history,
            limit,
        } => Ok(Operation::Query {
            table: TableName::new(table)?,
            query: parse_query(&pattern)?,
            history,
            limit,
        }),
        Command::Completion { .. } => {
            Err(Error::new(ErrorKind::Internal).with_message("completion has no table operation"))
        }
    }
}

fn parse_query(pattern: &str) -> Result<Query, Error> {
    if pattern.trim_start().starts_with('{') {
        let value: Value = serde_json::from_str(pattern).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("containment pattern is not valid JSON")
                .with_source(err)
        })?;
        Query::contains(value)
    } else {
        Query::path(pattern)
    }
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim_start_matches("error: ").to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

pub(crate) fn emit_json(value: &Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {err}");
        return;
    }
    let json = serde_json::to_string(&err.to_json()).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

#[cfg(test)]
mod tests {
    use super::{Cli, parse_query};
    use clap::CommandFactory;
    use pgcouch::api::Query;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn query_argument_dispatch() {
        assert!(matches!(
            parse_query(r#"{"year": 1990}"#).unwrap(),
            Query::Contains(_)
        ));
        assert_eq!(
            parse_query("$.year > 1989").unwrap(),
            Query::Path("$.year > 1989".to_string())
        );
        assert!(parse_query("{not json").is_err());
    }
}
