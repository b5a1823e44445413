//! Purpose: Revisioned JSON document tables with CouchDB-like semantics over PostgreSQL JSONB.
//! Exports: `api` (stable surface), `core` (table protocol), `store` (backends), `config`.
//! Role: Library backing the `pgcouch` CLI and embedding applications.
//! Invariants: Storage, indexing, and transactions are delegated to the relational engine.
//! Invariants: No process-wide pool or logger; callers pass a `Store` to each table.
pub mod api;
pub mod config;
pub mod core;
pub mod store;
