//! SQLite-backed store
//!
//! A [`Store`] owns one connection, the set of entity types registered with
//! it and its identity cache. It is single-threaded: all state sits behind
//! `Cell`/`RefCell`, so every operation takes `&self` and the type is not
//! `Sync`.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::{params_from_iter, Connection};
use tracing::{debug, trace, warn};

use super::cache::IdentityCache;
use super::cursor::Cursor;
use super::schema::{self, ColumnInfo, SchemaChange};
use crate::config::StoreConfig;
use crate::entity::{is_identifier, EntityType};
use crate::query::CompiledQuery;
use crate::value::Value;
use crate::{Error, Result};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Receives every statement while debug mode is on
pub type StatementHook = Box<dyn FnMut(&str, &[Value])>;

/// Path that selects an in-memory database in configuration files
pub const MEMORY_PATH: &str = ":memory:";

pub struct Store {
    conn: Connection,
    id: u64,
    path: Option<PathBuf>,
    debug: Cell<bool>,
    auto_register: Cell<bool>,
    vacuum_on_close: Cell<bool>,
    closed: Cell<bool>,
    registered: RefCell<HashMap<String, EntityType>>,
    cache: RefCell<IdentityCache>,
    hook: RefCell<Option<StatementHook>>,
}

impl Store {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Ok(Self::with_connection(conn, Some(path.to_path_buf()), None))
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::with_connection(conn, None, None))
    }

    /// Open the database a configuration names (in memory when it names none)
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let store = match config.database.as_deref() {
            None | Some(MEMORY_PATH) => {
                Self::with_connection(Connection::open_in_memory()?, None, config.cache_capacity)
            }
            Some(path) => {
                let path = PathBuf::from(path);
                Self::with_connection(Connection::open(&path)?, Some(path), config.cache_capacity)
            }
        };
        store.set_debug(config.debug);
        store.set_auto_register(config.auto_register);
        store.set_vacuum_on_close(config.vacuum_on_close);
        Ok(store)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>, capacity: Option<usize>) -> Self {
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            conn,
            id,
            path,
            debug: Cell::new(false),
            auto_register: Cell::new(false),
            vacuum_on_close: Cell::new(false),
            closed: Cell::new(false),
            registered: RefCell::new(HashMap::new()),
            cache: RefCell::new(IdentityCache::new(id, capacity)),
            hook: RefCell::new(None),
        }
    }

    /// Bound the identity cache; drops whatever is cached
    pub fn with_cache_capacity(self, capacity: Option<usize>) -> Self {
        *self.cache.borrow_mut() = IdentityCache::new(self.id, capacity);
        self
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    // ========== Settings ==========

    /// Emit every statement and its parameters before it runs
    pub fn set_debug(&self, on: bool) {
        self.debug.set(on);
    }

    pub fn debug(&self) -> bool {
        self.debug.get()
    }

    /// Route debug output to `hook` instead of stderr
    pub fn on_statement(&self, hook: impl FnMut(&str, &[Value]) + 'static) {
        *self.hook.borrow_mut() = Some(Box::new(hook));
    }

    pub fn clear_statement_hook(&self) {
        *self.hook.borrow_mut() = None;
    }

    /// Register entity types on first use instead of failing
    pub fn set_auto_register(&self, on: bool) {
        self.auto_register.set(on);
    }

    /// Run `VACUUM` when the store is closed
    pub fn set_vacuum_on_close(&self, on: bool) {
        self.vacuum_on_close.set(on);
    }

    // ========== Statements ==========

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.get() {
            return Err(Error::Usage("store is closed".to_string()));
        }
        Ok(())
    }

    fn emit(&self, sql: &str, params: &[Value]) {
        trace!(sql, params = %crate::value::format_params(params), "statement");
        if !self.debug.get() {
            return;
        }
        match self.hook.try_borrow_mut() {
            Ok(mut hook) => match hook.as_mut() {
                Some(hook) => hook(sql, params),
                None => crate::ui::output::statement(sql, params),
            },
            // re-entered from inside the hook
            Err(_) => crate::ui::output::statement(sql, params),
        }
    }

    fn batch(&self, operation: &'static str, sql: &str) -> Result<()> {
        self.emit(sql, &[]);
        self.conn
            .execute_batch(sql)
            .map_err(|source| statement_error(operation, sql, source))
    }

    /// Open a transaction unless one is already running
    fn begin(&self) -> Result<()> {
        if self.conn.is_autocommit() {
            self.batch("begin", "BEGIN")?;
        }
        Ok(())
    }

    /// Run a statement, returning the number of rows changed
    pub fn execute(&self, query: &CompiledQuery) -> Result<usize> {
        self.run("execute", &query.sql, &query.params)
    }

    pub(crate) fn run(&self, operation: &'static str, sql: &str, params: &[Value]) -> Result<usize> {
        self.ensure_open()?;
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|source| statement_error(operation, sql, source))?;
        if !stmt.readonly() {
            self.begin()?;
        }
        self.emit(sql, params);
        stmt.execute(params_from_iter(params.iter()))
            .map_err(|source| statement_error(operation, sql, source))
    }

    /// Run an INSERT and return the new row's identifier
    pub(crate) fn insert_row(&self, query: &CompiledQuery) -> Result<i64> {
        self.run("insert", &query.sql, &query.params)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Prepare a statement for lazy iteration
    pub fn cursor(&self, query: CompiledQuery) -> Result<Cursor<'_>> {
        self.ensure_open()?;
        let stmt = self
            .conn
            .prepare(&query.sql)
            .map_err(|source| statement_error("prepare", &query.sql, source))?;
        if !stmt.readonly() {
            self.begin()?;
        }
        Ok(Cursor::new(self, stmt, query))
    }

    pub(crate) fn emit_query(&self, query: &CompiledQuery) {
        self.emit(&query.sql, &query.params);
    }

    // ========== Transactions ==========

    /// Commit pending writes
    pub fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        self.commit_pending()
    }

    fn commit_pending(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.batch("commit", "COMMIT")?;
        }
        Ok(())
    }

    /// Discard pending writes.
    ///
    /// Cached instances may no longer match the database afterwards, so the
    /// identity cache is cleared and outstanding handles go stale. Types
    /// whose table DDL was undone are no longer registered.
    pub fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.conn.is_autocommit() {
            self.batch("rollback", "ROLLBACK")?;
            self.cache.borrow_mut().clear();
            self.revalidate_registered()?;
        }
        Ok(())
    }

    /// Forget registrations the current tables no longer satisfy
    fn revalidate_registered(&self) -> Result<()> {
        let entities: Vec<EntityType> = self.registered.borrow().values().cloned().collect();
        for entity in entities {
            let existing = self.table_columns(entity.name())?;
            let intact = matches!(
                schema::plan(&entity, &existing),
                Ok(plan) if plan.change == SchemaChange::Unchanged
            );
            if !intact {
                debug!(table = entity.name(), "registration undone by rollback");
                self.registered.borrow_mut().remove(entity.name());
            }
        }
        Ok(())
    }

    /// Commit, optionally vacuum, and refuse any further operation
    pub fn close(&self) -> Result<()> {
        self.ensure_open()?;
        self.commit_pending()?;
        if self.vacuum_on_close.get() {
            self.batch("vacuum", "VACUUM")?;
        }
        self.closed.set(true);
        self.cache.borrow_mut().clear();
        debug!(store = self.id, "store closed");
        Ok(())
    }

    // ========== Schema ==========

    /// Create or extend the table for `entity`; see [`schema::plan`]
    pub fn register(&self, entity: &EntityType) -> Result<SchemaChange> {
        self.ensure_open()?;
        if self.registered.borrow().get(entity.name()) == Some(entity) {
            return Ok(SchemaChange::Unchanged);
        }

        let existing = self.table_columns(entity.name())?;
        let plan = schema::plan(entity, &existing)?;
        for statement in &plan.statements {
            self.run("register", statement, &[])?;
        }

        match &plan.change {
            SchemaChange::Created => debug!(table = entity.name(), "created table"),
            SchemaChange::Extended(columns) => {
                debug!(table = entity.name(), columns = ?columns, "extended table")
            }
            SchemaChange::Unchanged => trace!(table = entity.name(), "table already matches"),
        }

        self.registered
            .borrow_mut()
            .insert(entity.name().to_string(), entity.clone());
        Ok(plan.change)
    }

    /// Whether exactly this definition is registered
    pub fn is_registered(&self, entity: &EntityType) -> bool {
        self.registered.borrow().get(entity.name()) == Some(entity)
    }

    /// Fail unless `entity` is registered (registering it first in
    /// auto-register mode)
    pub(crate) fn ensure_registered(&self, entity: &EntityType) -> Result<()> {
        self.ensure_open()?;
        if self.is_registered(entity) {
            return Ok(());
        }
        if self.auto_register.get() {
            self.register(entity)?;
            return Ok(());
        }
        Err(Error::UnregisteredType(entity.name().to_string()))
    }

    /// Accept a definition derived from the table itself without running DDL
    pub(crate) fn adopt(&self, entity: &EntityType) {
        self.registered
            .borrow_mut()
            .insert(entity.name().to_string(), entity.clone());
    }

    /// Columns of `table` as reported by `PRAGMA table_info`; empty when the
    /// table does not exist
    pub fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.ensure_open()?;
        if !is_identifier(table) {
            return Err(Error::InvalidSchema(format!("invalid table name: {:?}", table)));
        }
        let sql = schema::table_info_sql(table);
        self.emit(&sql, &[]);
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|source| statement_error("introspect", &sql, source))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    declared_type: row.get(2)?,
                    not_null: row.get::<_, i64>(3)? != 0,
                    primary_key: row.get::<_, i64>(5)? != 0,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|source| statement_error("introspect", &sql, source))?;
        Ok(columns)
    }

    /// User tables, sorted by name
    pub fn tables(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let sql = "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";
        self.emit(sql, &[]);
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|source| statement_error("tables", sql, source))?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
            .map_err(|source| statement_error("tables", sql, source))?;
        Ok(names)
    }

    // ========== Identity cache ==========

    pub(crate) fn cache(&self) -> Ref<'_, IdentityCache> {
        self.cache.borrow()
    }

    pub(crate) fn cache_mut(&self) -> RefMut<'_, IdentityCache> {
        self.cache.borrow_mut()
    }

    /// Number of live cached instances
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("debug", &self.debug.get())
            .field("closed", &self.closed.get())
            .field("registered", &self.registered.borrow().keys().collect::<Vec<_>>())
            .field("cached", &self.cache.borrow().len())
            .finish()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.closed.get() || std::thread::panicking() {
            return;
        }
        if let Err(e) = self.commit_pending() {
            warn!(store = self.id, error = %e, "commit on drop failed");
        }
    }
}

pub(crate) fn statement_error(operation: &'static str, sql: &str, source: rusqlite::Error) -> Error {
    Error::Statement {
        operation,
        sql: sql.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{format_statement, FieldType};
    use std::rc::Rc;

    fn person() -> EntityType {
        EntityType::from_fields(
            "Person",
            &[("name", FieldType::Text), ("email", FieldType::Text), ("age", FieldType::Integer)],
        )
        .unwrap()
    }

    fn capture(store: &Store) -> Rc<RefCell<Vec<String>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.on_statement(move |sql, params| sink.borrow_mut().push(format_statement(sql, params)));
        seen
    }

    #[test]
    fn test_register_creates_then_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.register(&person()).unwrap(), SchemaChange::Created);
        assert_eq!(store.register(&person()).unwrap(), SchemaChange::Unchanged);
        assert_eq!(store.tables().unwrap(), vec!["Person".to_string()]);

        let columns: Vec<_> = store
            .table_columns("Person")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(columns, vec!["id", "name", "email", "age"]);
    }

    #[test]
    fn test_reregistering_issues_no_ddl() {
        let store = Store::open_in_memory().unwrap();
        store.register(&person()).unwrap();

        let seen = capture(&store);
        store.set_debug(true);
        store.register(&person()).unwrap();
        assert!(seen.borrow().iter().all(|s| !s.starts_with("CREATE") && !s.starts_with("ALTER")));
    }

    #[test]
    fn test_register_extends_table() {
        let store = Store::open_in_memory().unwrap();
        let short = EntityType::from_fields("Person", &[("name", FieldType::Text)]).unwrap();
        store.register(&short).unwrap();

        let change = store.register(&person()).unwrap();
        assert_eq!(
            change,
            SchemaChange::Extended(vec!["email".to_string(), "age".to_string()])
        );
        assert!(store.is_registered(&person()));
        assert!(!store.is_registered(&short));
    }

    #[test]
    fn test_register_conflict() {
        let store = Store::open_in_memory().unwrap();
        store.register(&person()).unwrap();
        let clash = EntityType::from_fields("Person", &[("name", FieldType::Integer)]).unwrap();
        assert!(matches!(
            store.register(&clash),
            Err(Error::SchemaConflict { .. })
        ));
    }

    #[test]
    fn test_debug_emits_statement_and_params() {
        let store = Store::open_in_memory().unwrap();
        store.register(&person()).unwrap();
        let seen = capture(&store);

        let query = CompiledQuery::raw(
            "SELECT id FROM Person WHERE ( age >= ? ) AND ( age <= ? )",
            vec![Value::Integer(16), Value::Integer(50)],
        );
        store.cursor(query.clone()).unwrap().fetch_all().unwrap();
        assert!(seen.borrow().is_empty());

        store.set_debug(true);
        store.cursor(query).unwrap().fetch_all().unwrap();
        assert_eq!(
            seen.borrow().last().map(String::as_str),
            Some("SELECT id FROM Person WHERE ( age >= ? ) AND ( age <= ? ) [16, 50]")
        );
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store = Store::open_in_memory().unwrap();
        store.register(&person()).unwrap();
        store.close().unwrap();

        assert!(store.is_closed());
        assert!(matches!(store.register(&person()), Err(Error::Usage(_))));
        assert!(matches!(store.tables(), Err(Error::Usage(_))));
        assert!(matches!(store.commit(), Err(Error::Usage(_))));
        assert!(matches!(store.close(), Err(Error::Usage(_))));
    }

    #[test]
    fn test_writes_open_a_transaction() {
        let store = Store::open_in_memory().unwrap();
        store.register(&person()).unwrap();
        store.commit().unwrap();

        let insert = CompiledQuery::raw(
            "INSERT INTO Person (name, email, age) VALUES (?, ?, ?)",
            vec!["a".into(), Value::Null, 3.into()],
        );
        store.execute(&insert).unwrap();
        store.rollback().unwrap();

        let count = CompiledQuery::raw("SELECT count(id) FROM Person", vec![]);
        let rows = store.cursor(count).unwrap().fetch_all().unwrap();
        assert_eq!(rows[0][0], Value::Integer(0));

        store.execute(&insert).unwrap();
        store.commit().unwrap();
        let count = CompiledQuery::raw("SELECT count(id) FROM Person", vec![]);
        let rows = store.cursor(count).unwrap().fetch_all().unwrap();
        assert_eq!(rows[0][0], Value::Integer(1));
    }

    #[test]
    fn test_rollback_undoes_registration() {
        let store = Store::open_in_memory().unwrap();
        let kept = EntityType::from_fields("Kept", &[("n", FieldType::Integer)]).unwrap();
        store.register(&kept).unwrap();
        store.commit().unwrap();

        assert_eq!(store.register(&person()).unwrap(), SchemaChange::Created);
        store.rollback().unwrap();

        assert_eq!(store.tables().unwrap(), vec!["Kept".to_string()]);
        assert!(!store.is_registered(&person()));
        assert!(store.is_registered(&kept));
        assert_eq!(store.register(&person()).unwrap(), SchemaChange::Created);
        assert_eq!(store.tables().unwrap(), vec!["Kept".to_string(), "Person".to_string()]);
    }

    #[test]
    fn test_rollback_undoes_extension() {
        let store = Store::open_in_memory().unwrap();
        let short = EntityType::from_fields("Person", &[("name", FieldType::Text)]).unwrap();
        store.register(&short).unwrap();
        store.commit().unwrap();

        store.register(&person()).unwrap();
        store.rollback().unwrap();
        assert!(!store.is_registered(&person()));
        assert_eq!(
            store.register(&person()).unwrap(),
            SchemaChange::Extended(vec!["email".to_string(), "age".to_string()])
        );
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.db");

        {
            let store = Store::open(&path).unwrap();
            store.set_vacuum_on_close(true);
            store.register(&person()).unwrap();
            store
                .execute(&CompiledQuery::raw(
                    "INSERT INTO Person (name, email, age) VALUES (?, ?, ?)",
                    vec!["Ann".into(), Value::Null, 40.into()],
                ))
                .unwrap();
            store.close().unwrap();
        }

        // dropped without close: commits
        {
            let store = Store::open(&path).unwrap();
            assert_eq!(store.register(&person()).unwrap(), SchemaChange::Unchanged);
            store
                .execute(&CompiledQuery::raw(
                    "INSERT INTO Person (name, email, age) VALUES (?, ?, ?)",
                    vec!["Bob".into(), Value::Null, 41.into()],
                ))
                .unwrap();
        }

        let store = Store::open(&path).unwrap();
        let count = CompiledQuery::raw("SELECT count(id) FROM Person", vec![]);
        let rows = store.cursor(count).unwrap().fetch_all().unwrap();
        assert_eq!(rows[0][0], Value::Integer(2));
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn test_from_config() {
        let config = StoreConfig {
            debug: true,
            auto_register: true,
            ..StoreConfig::default()
        };
        let store = Store::from_config(&config).unwrap();
        assert!(store.debug());
        assert!(store.path().is_none());
        store.ensure_registered(&person()).unwrap();
        assert!(store.is_registered(&person()));
    }

    #[test]
    fn test_unregistered_type_without_auto_register() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.ensure_registered(&person()),
            Err(Error::UnregisteredType(name)) if name == "Person"
        ));
    }

    #[test]
    fn test_invalid_table_name_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.table_columns("Person; DROP TABLE x"),
            Err(Error::InvalidSchema(_))
        ));
    }
}
