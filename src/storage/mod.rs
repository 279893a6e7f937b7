//! Storage layer - SQLite connection, schema reconciliation, identity cache
//!
//! - `store`: the [`Store`] (connection, transactions, debug output)
//! - `schema`: `PRAGMA table_info` introspection and additive DDL
//! - `cache`: one live instance per (table, id)
//! - `cursor`: lazy iteration over result rows

pub mod cache;
pub mod cursor;
pub mod schema;
pub mod store;

pub use cache::{Handle, IdentityCache};
pub use cursor::{Cursor, RowIter};
pub use schema::{ColumnInfo, SchemaChange};
pub use store::{StatementHook, Store, MEMORY_PATH};
