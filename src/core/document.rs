//! Purpose: Identifier types and document-shape helpers shared by tables and stores.
//! Exports: `DocumentId`, `Revision`, `TableName`, `DocumentKey`, `ID_FIELD`, `REV_FIELD`.
//! Role: Type-level boundary between plain strings and validated identifiers.
//! Invariants: `DocumentId` and `Revision` are never empty; they are distinct types.
//! Invariants: Table names are validated before they reach any SQL text.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};

pub const ID_FIELD: &str = "_id";
pub const REV_FIELD: &str = "_rev";

// Leaves room for " history btree" under the 63-byte identifier limit.
const TABLE_NAME_MAX_BYTES: usize = 47;
const RESERVED_SUFFIXES: [&str; 5] = [" history", " _id", " _id_rev", " gin", " btree"];

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("document id must not be the empty string"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocumentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(value: DocumentId) -> Self {
        value.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content-derived concurrency token.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision(String);

impl Revision {
    pub fn new(rev: impl Into<String>) -> Result<Self, Error> {
        let rev = rev.into();
        if rev.is_empty() {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("revision must not be the empty string"));
        }
        Ok(Self(rev))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Revision {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Revision> for String {
    fn from(value: Revision) -> Self {
        value.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("table name must not be empty"));
        }
        if name.contains('\0') {
            return Err(
                Error::new(ErrorKind::Usage).with_message("table name must not contain NUL")
            );
        }
        if name.len() > TABLE_NAME_MAX_BYTES {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "table name must be at most {TABLE_NAME_MAX_BYTES} bytes"
            )));
        }
        // History relations and index names are derived by suffixing the table name.
        if let Some(suffix) = RESERVED_SUFFIXES.iter().find(|s| name.ends_with(*s)) {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "table name must not end in `{suffix}`; that suffix names a derived relation"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the append-only relation used by `HistoryTable`.
    pub fn history(&self) -> String {
        format!("{} history", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{_id, _rev?}`: the row match key and the diagnostic payload of errors.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DocumentKey {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
}

impl DocumentKey {
    pub fn new(id: DocumentId, revision: Option<Revision>) -> Self {
        Self { id, revision }
    }

    /// Reads `_id` and `_rev` out of a serialized document.
    pub fn from_document(document: &Value) -> Result<Self, Error> {
        let Some(object) = document.as_object() else {
            return Err(
                Error::new(ErrorKind::Validation).with_message("document must be a JSON object")
            );
        };
        let id = match object.get(ID_FIELD) {
            Some(Value::String(id)) => DocumentId::new(id.clone())?,
            Some(_) => {
                return Err(Error::new(ErrorKind::Validation)
                    .with_message("document `_id` must be a string"));
            }
            None => {
                return Err(
                    Error::new(ErrorKind::Validation).with_message("document `_id` is required")
                );
            }
        };
        let revision = match object.get(REV_FIELD) {
            None | Some(Value::Null) => None,
            Some(Value::String(rev)) => Some(Revision::new(rev.clone()).map_err(|err| {
                err.with_key(Self::new(id.clone(), None))
            })?),
            Some(_) => {
                return Err(Error::new(ErrorKind::Validation)
                    .with_message("document `_rev` must be a string")
                    .with_key(Self::new(id, None)));
            }
        };
        Ok(Self { id, revision })
    }

    /// Containment pattern matching exactly this key.
    pub fn to_pattern(&self) -> Map<String, Value> {
        let mut pattern = Map::new();
        pattern.insert(ID_FIELD.to_string(), Value::String(self.id.as_str().to_string()));
        if let Some(rev) = &self.revision {
            pattern.insert(REV_FIELD.to_string(), Value::String(rev.as_str().to_string()));
        }
        pattern
    }
}
