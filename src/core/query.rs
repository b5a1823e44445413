// Query dialects: containment (`data @> pattern`) and path predicates (`data @@ jsonpath`).
use serde_json::{Map, Value};

use crate::core::document::{DocumentKey, ID_FIELD};
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// Candidate rows must be a superset of this partial document.
    Contains(Map<String, Value>),
    /// Declarative predicate over the document, e.g. `$.year > 1989`.
    Path(String),
}

impl Query {
    pub fn contains(pattern: Value) -> Result<Self, Error> {
        match pattern {
            Value::Object(pattern) => Ok(Self::Contains(pattern)),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("containment pattern must be an object, got {other}"))),
        }
    }

    pub fn path(expr: impl Into<String>) -> Result<Self, Error> {
        let expr = expr.into();
        if expr.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("path query must not be empty"));
        }
        Ok(Self::Path(expr))
    }

    /// Dispatches on JSON shape: object → containment, string → path.
    pub fn from_json(query: Value) -> Result<Self, Error> {
        match query {
            Value::String(expr) => Self::path(expr),
            Value::Object(pattern) => Ok(Self::Contains(pattern)),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("query must be an object or a string, got {other}"))),
        }
    }

    pub fn by_key(key: &DocumentKey) -> Self {
        Self::Contains(key.to_pattern())
    }

    pub(crate) fn by_id(id: &str) -> Self {
        let mut pattern = Map::new();
        pattern.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        Self::Contains(pattern)
    }
}

impl From<Map<String, Value>> for Query {
    fn from(pattern: Map<String, Value>) -> Self {
        Self::Contains(pattern)
    }
}

impl From<&str> for Query {
    fn from(expr: &str) -> Self {
        Self::Path(expr.to_string())
    }
}

impl From<String> for Query {
    fn from(expr: String) -> Self {
        Self::Path(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::Query;
    use crate::core::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn dispatch_follows_json_shape() {
        assert!(matches!(
            Query::from_json(json!({"year": 1990})).unwrap(),
            Query::Contains(_)
        ));
        assert_eq!(
            Query::from_json(json!("$.year > 1989")).unwrap(),
            Query::Path("$.year > 1989".to_string())
        );
        for bad in [json!(1), json!([{"a": 1}]), json!(null), json!("  ")] {
            assert_eq!(Query::from_json(bad).unwrap_err().kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn by_id_is_a_containment_on_id() {
        assert_eq!(
            Query::by_id("human:bob"),
            Query::contains(json!({"_id": "human:bob"})).unwrap()
        );
    }
}
