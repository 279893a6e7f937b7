//! Entity lifecycle - save, load, get, query and delete
//!
//! ```text
//! Record (transient) --save(&store)--> Entity (persisted, cached)
//! Entity --save()--> Entity            (UPDATE all fields)
//! Entity --delete()--> Record          (row removed, slot evicted)
//! ```
//!
//! Full-entity results always pass through the store's identity cache, so a
//! row loaded twice yields the same [`Entity`]. Projection queries produce
//! plain [`Row`](crate::Row)s and never touch the cache.

use std::fmt;

use crate::entity::{coerce_field, EntityType, Record, ID_FIELD};
use crate::query::compiler::{compile_delete, compile_delete_where, compile_insert, compile_update};
use crate::query::{and_all, compile, Expr, Projection, QuerySpec, Row};
use crate::storage::{schema, Cursor, Handle, RowIter, SchemaChange, Store};
use crate::value::Value;
use crate::{Error, Result};

// ========== Records ==========

impl Record {
    /// Insert this record and register it in the store's identity cache
    pub fn save(self, store: &Store) -> Result<Entity<'_>> {
        let handle = store.insert(self)?;
        Ok(Entity { store, handle })
    }
}

// ========== Store-level lifecycle ==========

impl Store {
    /// Persist a transient record, returning the handle of its cache slot
    pub fn insert(&self, record: Record) -> Result<Handle> {
        let (entity, values) = record.into_parts();
        self.ensure_registered(&entity)?;
        let id = self.insert_row(&compile_insert(&entity, &values))?;
        Ok(self.cache_mut().insert(&entity, id, values))
    }

    /// Persist several transient records in order
    pub fn save_all(&self, records: impl IntoIterator<Item = Record>) -> Result<Vec<Entity<'_>>> {
        records.into_iter().map(|record| record.save(self)).collect()
    }

    /// Write every field of a cached instance back to its row
    pub fn save(&self, handle: Handle) -> Result<()> {
        self.ensure_open()?;
        let (entity, id, values) = {
            let cache = self.cache();
            let slot = cache.slot(handle)?;
            (slot.entity.clone(), slot.id, slot.values.clone())
        };
        self.ensure_registered(&entity)?;
        if let Some(update) = compile_update(&entity, id, &values) {
            self.run("update", &update.sql, &update.params)?;
        }
        Ok(())
    }

    /// Delete the row behind `handle` and evict it; the values come back as
    /// a transient record
    pub fn delete(&self, handle: Handle) -> Result<Record> {
        self.ensure_open()?;
        let (entity, id) = {
            let cache = self.cache();
            let slot = cache.slot(handle)?;
            (slot.entity.clone(), slot.id)
        };
        self.ensure_registered(&entity)?;
        let delete = compile_delete(&entity, id);
        self.run("delete", &delete.sql, &delete.params)?;
        let slot = self.cache_mut().release(handle)?;
        Ok(Record::from_parts(slot.entity, slot.values))
    }

    /// Bind a handle back to this store
    pub fn entity(&self, handle: Handle) -> Result<Entity<'_>> {
        self.ensure_open()?;
        self.cache().resolve(handle)?;
        Ok(Entity {
            store: self,
            handle,
        })
    }

    /// Drop a cached instance without touching its row. A later load
    /// creates a fresh instance with a new handle.
    pub fn release(&self, handle: Handle) -> Result<()> {
        self.ensure_open()?;
        self.cache_mut().release(handle)?;
        Ok(())
    }
}

// ========== Entity types ==========

impl EntityType {
    /// Create or extend this type's table in `store`
    pub fn register(&self, store: &Store) -> Result<SchemaChange> {
        store.register(self)
    }

    /// Entity type matching an existing table; registered with `store`
    pub fn reflect(store: &Store, table: &str) -> Result<EntityType> {
        let columns = store.table_columns(table)?;
        let entity = schema::reflect(table, &columns)?;
        store.adopt(&entity);
        Ok(entity)
    }

    /// Projection query over this type
    pub fn select(&self, projection: impl Into<Projection>) -> QuerySpec {
        QuerySpec::new(self).select(projection)
    }

    /// All instances matching `filter` (every instance when `None`)
    pub fn load<'s>(&self, store: &'s Store, filter: Option<Expr>) -> Result<Loader<'s>> {
        self.load_with(store, QuerySpec::new(self).filter_opt(filter))
    }

    /// Instances whose fields equal the given values
    pub fn load_by<'s>(&self, store: &'s Store, criteria: &[(&str, Value)]) -> Result<Loader<'s>> {
        self.load(store, self.criteria(criteria))
    }

    /// Full-entity load with ordering and limit taken from `spec`
    pub fn load_with<'s>(&self, store: &'s Store, spec: QuerySpec) -> Result<Loader<'s>> {
        self.check_spec(&spec)?;
        if !spec.is_full_entity() {
            return Err(Error::Usage(
                "entity loads select every field; use query() for projections".to_string(),
            ));
        }
        store.ensure_registered(self)?;
        let cursor = store.cursor(compile(&spec)?)?;
        Ok(Loader {
            entity: self.clone(),
            cursor,
        })
    }

    /// First instance whose fields equal the given values.
    ///
    /// `id` may be used as a criterion. When several rows match, the first
    /// one in query order is returned.
    pub fn get<'s>(&self, store: &'s Store, criteria: &[(&str, Value)]) -> Result<Option<Entity<'s>>> {
        self.load_by(store, criteria)?.first()
    }

    /// First instance matching `filter`
    pub fn get_where<'s>(&self, store: &'s Store, filter: Expr) -> Result<Option<Entity<'s>>> {
        self.load(store, Some(filter))?.first()
    }

    /// Projection / aggregate query producing generic rows
    pub fn query<'s>(&self, store: &'s Store, spec: QuerySpec) -> Result<Cursor<'s>> {
        self.check_spec(&spec)?;
        store.ensure_registered(self)?;
        store.cursor(compile(&spec)?)
    }

    /// Delete every row matching `filter`, evicting cached instances.
    /// Returns the number of rows deleted.
    pub fn delete_where(&self, store: &Store, filter: Expr) -> Result<usize> {
        store.ensure_registered(self)?;
        let rows = store.cursor(compile_delete_where(self, &filter)?)?.fetch_all()?;

        let mut cache = store.cache_mut();
        for id in rows.iter().filter_map(|row| row.get(0).and_then(Value::as_i64)) {
            cache.evict(self.name(), id);
        }
        Ok(rows.len())
    }

    /// Delete every row whose fields equal the given values
    pub fn delete_by(&self, store: &Store, criteria: &[(&str, Value)]) -> Result<usize> {
        match self.criteria(criteria) {
            Some(filter) => self.delete_where(store, filter),
            None => Err(Error::Usage(format!(
                "refusing to delete from {} without criteria",
                self
            ))),
        }
    }

    fn criteria(&self, criteria: &[(&str, Value)]) -> Option<Expr> {
        and_all(
            criteria
                .iter()
                .map(|(field, value)| self.c(field).equals(value.clone())),
        )
    }

    fn check_spec(&self, spec: &QuerySpec) -> Result<()> {
        if spec.entity_type() != self {
            return Err(Error::Usage(format!(
                "query over {} used with entity type {}",
                spec.entity_type(),
                self
            )));
        }
        Ok(())
    }
}

// ========== Persisted instances ==========

/// A persisted instance bound to the store that caches it.
///
/// Copies refer to the same instance: a field set through one copy is
/// visible through every other. Two entities are equal when they are the
/// same instance.
#[derive(Clone, Copy)]
pub struct Entity<'s> {
    store: &'s Store,
    handle: Handle,
}

impl<'s> Entity<'s> {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn store(&self) -> &'s Store {
        self.store
    }

    pub fn id(&self) -> Result<i64> {
        self.store.ensure_open()?;
        Ok(self.store.cache().slot(self.handle)?.id)
    }

    pub fn entity_type(&self) -> Result<EntityType> {
        self.store.ensure_open()?;
        Ok(self.store.cache().slot(self.handle)?.entity.clone())
    }

    /// Current value of a field (`id` included)
    pub fn get(&self, field: &str) -> Result<Value> {
        self.store.ensure_open()?;
        let cache = self.store.cache();
        let slot = cache.slot(self.handle)?;
        if field == ID_FIELD {
            return Ok(Value::Integer(slot.id));
        }
        let index = slot
            .entity
            .field_index(field)
            .ok_or_else(|| Error::Usage(format!("{} has no field {:?}", slot.entity, field)))?;
        Ok(slot.values[index].clone())
    }

    /// Change a field in memory; persisted by the next [`Entity::save`]
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        self.store.ensure_open()?;
        if field == ID_FIELD {
            return Err(Error::Usage("the identifier is assigned by the store".to_string()));
        }
        let mut cache = self.store.cache_mut();
        let slot = cache.slot_mut(self.handle)?;
        let index = slot
            .entity
            .field_index(field)
            .ok_or_else(|| Error::Usage(format!("{} has no field {:?}", slot.entity, field)))?;
        slot.values[index] = coerce_field(&slot.entity, index, value.into())?;
        Ok(())
    }

    /// Set several fields and save
    pub fn update(&self, values: &[(&str, Value)]) -> Result<()> {
        for (field, value) in values {
            self.set(field, value.clone())?;
        }
        self.save()
    }

    /// Snapshot of the current values as a transient record
    pub fn record(&self) -> Result<Record> {
        self.store.ensure_open()?;
        let cache = self.store.cache();
        let slot = cache.slot(self.handle)?;
        Ok(Record::from_parts(slot.entity.clone(), slot.values.clone()))
    }

    /// Field name to value, the identifier first
    pub fn to_map(&self) -> Result<Vec<(String, Value)>> {
        self.store.ensure_open()?;
        let cache = self.store.cache();
        let slot = cache.slot(self.handle)?;
        let mut pairs = vec![(ID_FIELD.to_string(), Value::Integer(slot.id))];
        pairs.extend(
            slot.entity
                .fields()
                .iter()
                .map(|f| f.name.clone())
                .zip(slot.values.iter().cloned()),
        );
        Ok(pairs)
    }

    /// Write every field back to the row
    pub fn save(&self) -> Result<()> {
        self.store.save(self.handle)
    }

    /// Delete the row; the values come back as a transient record
    pub fn delete(self) -> Result<Record> {
        self.store.delete(self.handle)
    }

    /// Drop this instance from the identity cache; the row is kept
    pub fn release(self) -> Result<()> {
        self.store.release(self.handle)
    }
}

impl PartialEq for Entity<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Entity<'_> {}

impl fmt::Debug for Entity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.store.cache();
        match cache.slot(self.handle) {
            Ok(slot) => {
                let mut s = f.debug_struct(slot.entity.name());
                s.field(ID_FIELD, &slot.id);
                for (field, value) in slot.entity.fields().iter().zip(&slot.values) {
                    s.field(&field.name, value);
                }
                s.finish()
            }
            Err(_) => write!(f, "Entity({}, stale)", self.handle),
        }
    }
}

// ========== Loading ==========

/// A pending full-entity load
pub struct Loader<'s> {
    entity: EntityType,
    cursor: Cursor<'s>,
}

impl<'s> Loader<'s> {
    pub fn entity_type(&self) -> &EntityType {
        &self.entity
    }

    /// Execute and iterate lazily; each row is resolved through the cache
    pub fn iter(&mut self) -> Result<Entities<'_, 's>> {
        let store = self.cursor.store();
        let rows = self.cursor.rows()?;
        Ok(Entities {
            store,
            entity: &self.entity,
            rows,
        })
    }

    pub fn fetch_all(mut self) -> Result<Vec<Entity<'s>>> {
        let entities = self.iter()?.collect::<Result<Vec<_>>>();
        entities
    }

    pub fn first(mut self) -> Result<Option<Entity<'s>>> {
        let first = self.iter()?.next().transpose();
        first
    }
}

/// Iterator over loaded entities
pub struct Entities<'c, 's> {
    store: &'s Store,
    entity: &'c EntityType,
    rows: RowIter<'c>,
}

impl<'s> Iterator for Entities<'_, 's> {
    type Item = Result<Entity<'s>>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.rows.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        Some(resolve(self.store, self.entity, row))
    }
}

/// Merge a full-entity row (`id` first) into the identity cache
fn resolve<'s>(store: &'s Store, entity: &EntityType, row: Row) -> Result<Entity<'s>> {
    let mut values = row.into_values();
    if values.len() != entity.fields().len() + 1 {
        return Err(Error::Usage(format!(
            "{} row has {} columns, expected {}",
            entity,
            values.len(),
            entity.fields().len() + 1
        )));
    }
    let id = values
        .remove(0)
        .as_i64()
        .ok_or_else(|| Error::Usage(format!("{} row without an integer id", entity)))?;
    let handle = store.cache_mut().insert(entity, id, values);
    Ok(Entity { store, handle })
}
