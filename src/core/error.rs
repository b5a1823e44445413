//! Purpose: Closed error taxonomy shared by tables, stores, and the CLI.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Every fallible operation in the crate returns `Result<_, Error>`.
//! Invariants: Failures tied to a document carry its key (`_id`, `_rev`) for diagnosis.
//! Invariants: Nothing is retried; the kind tells the caller what to do next.
use std::error::Error as StdError;
use std::fmt;

use serde_json::{Map, Value, json};

use crate::core::document::DocumentKey;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Broken invariant inside the crate or the backing schema.
    Internal,
    /// Malformed request: bad query expression, bad table name, bad CLI input.
    Usage,
    /// A document or identifier was rejected before any I/O.
    Validation,
    /// `put` without a revision hit an identifier that already has a row.
    Conflict,
    /// `put` with a revision matched no row (stale revision or deleted document).
    MissingOnUpdate,
    /// `delete` matched no row.
    MissingOnDelete,
    /// Schema object already present; `init` turns this into `Ok(true)`.
    AlreadyExists,
    /// Pool exhaustion or transport failure.
    Connection,
    /// The engine rejected a statement.
    Database,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    key: Option<DocumentKey>,
    document: Option<Value>,
    sqlstate: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            key: None,
            document: None,
            sqlstate: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn key(&self) -> Option<&DocumentKey> {
        self.key.as_ref()
    }

    /// The offending document, set on insert conflicts.
    pub fn document(&self) -> Option<&Value> {
        self.document.as_ref()
    }

    pub fn sqlstate(&self) -> Option<&str> {
        self.sqlstate.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_key(mut self, key: DocumentKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_document(mut self, document: Value) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// JSON envelope used by the CLI on stderr.
    pub fn to_json(&self) -> Value {
        let mut inner = Map::new();
        inner.insert("kind".to_string(), json!(format!("{:?}", self.kind)));
        if let Some(message) = &self.message {
            inner.insert("message".to_string(), json!(message));
        }
        if let Some(key) = &self.key {
            inner.insert("id".to_string(), json!(key.id.as_str()));
            if let Some(rev) = &key.revision {
                inner.insert("rev".to_string(), json!(rev.as_str()));
            }
        }
        if let Some(sqlstate) = &self.sqlstate {
            inner.insert("sqlstate".to_string(), json!(sqlstate));
        }
        if let Some(source) = &self.source {
            inner.insert("cause".to_string(), json!(source.to_string()));
        }
        json!({ "error": Value::Object(inner) })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(key) = &self.key {
            write!(f, " (id: {})", key.id)?;
            if let Some(rev) = &key.revision {
                write!(f, " (rev: {rev})")?;
            }
        }
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, " (sqlstate: {sqlstate})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Validation => 3,
        ErrorKind::Conflict => 4,
        ErrorKind::MissingOnUpdate => 5,
        ErrorKind::MissingOnDelete => 6,
        ErrorKind::AlreadyExists => 7,
        ErrorKind::Connection => 8,
        ErrorKind::Database => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};
    use crate::core::document::{DocumentId, DocumentKey, Revision};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::Validation, 3),
            (ErrorKind::Conflict, 4),
            (ErrorKind::MissingOnUpdate, 5),
            (ErrorKind::MissingOnDelete, 6),
            (ErrorKind::AlreadyExists, 7),
            (ErrorKind::Connection, 8),
            (ErrorKind::Database, 9),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_and_json_carry_the_key() {
        let key = DocumentKey::new(
            DocumentId::new("human:bob").unwrap(),
            Some(Revision::new("abc").unwrap()),
        );
        let err = Error::new(ErrorKind::MissingOnDelete)
            .with_message("no row matched")
            .with_key(key);

        assert_eq!(
            err.to_string(),
            "MissingOnDelete: no row matched (id: human:bob) (rev: abc)"
        );
        let value = err.to_json();
        assert_eq!(value["error"]["kind"], "MissingOnDelete");
        assert_eq!(value["error"]["id"], "human:bob");
        assert_eq!(value["error"]["rev"], "abc");
        assert!(value["error"].get("sqlstate").is_none());
    }
}
