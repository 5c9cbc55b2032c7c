//! Persistence layer.
//!
//! [`traits::Database`] is the single async interface; [`LibSqlBackend`] is
//! the production implementation (local file or in-memory). Uniqueness
//! guarantees live in the schema (`migrations`), never in application-level
//! check-then-insert.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
