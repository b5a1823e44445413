//! Purpose: Injected validation capability for table documents.
//! Exports: `Check`.
//! Role: Narrows untyped JSON into the caller's document type, or rejects it.
//! Invariants: Runs before any write is issued and on every row a query yields.
//! Invariants: Rejections surface as `ErrorKind::Validation`.
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

type CheckFn<T> = dyn Fn(Value) -> Result<T, Error> + Send + Sync;

pub struct Check<T> {
    f: Arc<CheckFn<T>>,
}

impl<T> Check<T> {
    pub fn new(f: impl Fn(Value) -> Result<T, Error> + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }

    pub fn check(&self, value: Value) -> Result<T, Error> {
        (self.f)(value)
    }
}

impl<T: DeserializeOwned> Check<T> {
    /// Validation by deserialization into `T`.
    pub fn serde() -> Self {
        Self::new(|value| {
            serde_json::from_value(value).map_err(|err| {
                Error::new(ErrorKind::Validation)
                    .with_message(format!("document failed validation: {err}"))
                    .with_source(err)
            })
        })
    }
}

impl<T> Clone for Check<T> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<T> fmt::Debug for Check<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::Check;
    use crate::core::error::{Error, ErrorKind};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Human {
        #[serde(rename = "_id")]
        id: String,
        name: String,
    }

    #[test]
    fn serde_check_narrows_and_rejects() {
        let check = Check::<Human>::serde();
        let bob = check.check(json!({"_id": "human:bob", "name": "Bob"})).unwrap();
        assert_eq!(bob.id, "human:bob");
        assert_eq!(bob.name, "Bob");

        let err = check.check(json!({"_id": "human:bob"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn custom_check_is_shared_across_clones() {
        let check = Check::new(|value: serde_json::Value| {
            if value.get("name").and_then(|v| v.as_str()).is_some() {
                Ok(value)
            } else {
                Err(Error::new(ErrorKind::Validation).with_message("name required"))
            }
        });
        let cloned = check.clone();
        assert!(cloned.check(json!({"name": "x"})).is_ok());
        assert!(check.check(json!({})).is_err());
    }
}
