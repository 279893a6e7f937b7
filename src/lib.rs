//! # Litestore - a small SQLite object store
//!
//! Plain records are mapped to rows of SQLite tables.
//!
//! Litestore provides:
//! - Declarative entity types with automatic, additive schema reconciliation
//! - An identity cache: one live instance per persisted row and store
//! - A composable column-expression builder compiled to parameterized SQL
//! - Save / load / get / query / delete lifecycle on top of the above
//!
//! ```no_run
//! use litestore::{EntityType, FieldType, Store};
//!
//! # fn main() -> litestore::Result<()> {
//! let person = EntityType::from_fields(
//!     "Person",
//!     &[("name", FieldType::Text), ("email", FieldType::Text), ("age", FieldType::Integer)],
//! )?;
//!
//! let store = Store::open_in_memory()?;
//! person.register(&store)?;
//!
//! let alice = person.record_with(&[("name", "Alice".into()), ("age", 31.into())])?.save(&store)?;
//! let same = person.get(&store, &[("id", alice.id()?.into())])?;
//! assert_eq!(same, Some(alice));
//!
//! let adults = person.load(&store, Some(person.c("age").ge(18)))?.fetch_all()?;
//! assert_eq!(adults.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod value;
pub mod entity;
pub mod query;
pub mod storage;
pub mod lifecycle;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use value::{FieldType, Value};
pub use entity::{EntityType, Field, Record};
pub use query::{compile, CompiledQuery, Expr, Projection, QuerySpec, Row, Selection, Term};
pub use storage::{Cursor, Handle, SchemaChange, Store};
pub use lifecycle::{Entity, Loader};
pub use config::StoreConfig;

/// Result type alias for Litestore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Litestore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema conflict on {table}.{column}: {detail}")]
    SchemaConflict {
        table: String,
        column: String,
        detail: String,
    },

    #[error("Entity type {0} is not registered with this store")]
    UnregisteredType(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Query compile error: {0}")]
    QueryCompile(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("{operation} failed: {source} (sql: {sql})")]
    Statement {
        operation: &'static str,
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
