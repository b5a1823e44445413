// Content-derived revisions: SHA-256 over the canonical JSON of a document minus `_rev`.
use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::document::{REV_FIELD, Revision};
use crate::core::error::{Error, ErrorKind};

pub fn revision_of(document: &Value) -> Result<Revision, Error> {
    let Some(object) = document.as_object() else {
        return Err(
            Error::new(ErrorKind::Validation).with_message("document must be a JSON object")
        );
    };

    let mut bytes = Vec::new();
    bytes.push(b'{');
    let mut keys: Vec<&String> = object.keys().filter(|key| *key != REV_FIELD).collect();
    keys.sort();
    for (idx, key) in keys.into_iter().enumerate() {
        if idx > 0 {
            bytes.push(b',');
        }
        write_canonical(&Value::String(key.clone()), &mut bytes)?;
        bytes.push(b':');
        write_canonical(&object[key], &mut bytes)?;
    }
    bytes.push(b'}');

    let digest = Sha256::digest(&bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    Revision::new(hex)
}

// Object keys sorted at every depth, so field order never changes the hash.
fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), Error> {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(&String, &Value)> = object.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (idx, (key, value)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_canonical(&Value::String(key.clone()), out)?;
                out.push(b':');
                write_canonical(value, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to serialize document for revision")
                .with_source(err)
        })?,
    }
    Ok(())
}
