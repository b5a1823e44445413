// Core modules implementing document identity, revisions, errors, and the table protocol.
pub mod check;
pub mod document;
pub mod error;
pub mod history;
pub mod query;
pub mod revision;
pub mod stream;
pub mod table;
