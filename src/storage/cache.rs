//! Identity cache - one live slot per persisted row and store
//!
//! Slots live in an arena and are named by [`Handle`]s: store id, slot index
//! and the slot's generation at the time the handle was issued. Releasing a
//! slot bumps its generation, so handles issued before the release no
//! longer resolve. A second index maps (table name, id) to the live slot.

use crate::entity::EntityType;
use crate::value::Value;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Opaque reference to one cached instance of one store.
///
/// Two handles are equal exactly when they name the same live instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    store: u64,
    index: u32,
    generation: u32,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}@{}", self.store, self.index, self.generation)
    }
}

/// A cached instance
#[derive(Debug)]
pub struct Slot {
    pub entity: EntityType,
    pub id: i64,
    pub values: Vec<Value>,
    last_used: u64,
}

#[derive(Debug)]
enum Entry {
    Occupied { generation: u32, slot: Slot },
    Vacant { generation: u32 },
}

impl Entry {
    fn generation(&self) -> u32 {
        match self {
            Entry::Occupied { generation, .. } | Entry::Vacant { generation } => *generation,
        }
    }
}

#[derive(Debug)]
pub struct IdentityCache {
    store: u64,
    capacity: Option<usize>,
    entries: Vec<Entry>,
    free: Vec<u32>,
    index: HashMap<(String, i64), u32>,
    tick: u64,
}

impl IdentityCache {
    /// Empty cache for the store `store`; `capacity` bounds the number of
    /// live slots (least recently used is evicted first)
    pub fn new(store: u64, capacity: Option<usize>) -> Self {
        Self {
            store,
            capacity: capacity.filter(|c| *c > 0),
            entries: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            tick: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Live handle for (table, id), if cached
    pub fn lookup(&self, table: &str, id: i64) -> Option<Handle> {
        let index = *self.index.get(&(table.to_string(), id))?;
        Some(self.handle(index))
    }

    /// Register a freshly persisted or loaded instance.
    ///
    /// When (table, id) is already cached, its values are overwritten in
    /// place and the existing handle is returned.
    pub fn insert(&mut self, entity: &EntityType, id: i64, values: Vec<Value>) -> Handle {
        if let Some(handle) = self.lookup(entity.name(), id) {
            self.tick += 1;
            let tick = self.tick;
            if let Entry::Occupied { slot, .. } = &mut self.entries[handle.index as usize] {
                slot.values = values;
                slot.entity = entity.clone();
                slot.last_used = tick;
            }
            return handle;
        }

        if let Some(capacity) = self.capacity {
            while self.index.len() >= capacity {
                if !self.evict_least_recent() {
                    break;
                }
            }
        }

        self.tick += 1;
        let slot = Slot {
            entity: entity.clone(),
            id,
            values,
            last_used: self.tick,
        };

        let index = match self.free.pop() {
            Some(index) => {
                let generation = self.entries[index as usize].generation();
                self.entries[index as usize] = Entry::Occupied { generation, slot };
                index
            }
            None => {
                self.entries.push(Entry::Occupied { generation: 0, slot });
                (self.entries.len() - 1) as u32
            }
        };
        self.index.insert((entity.name().to_string(), id), index);
        self.handle(index)
    }

    /// Check that `handle` names a live slot of this cache
    pub fn resolve(&self, handle: Handle) -> Result<()> {
        self.slot(handle).map(|_| ())
    }

    pub fn slot(&self, handle: Handle) -> Result<&Slot> {
        let index = self.check(handle)?;
        match &self.entries[index] {
            Entry::Occupied { slot, .. } => Ok(slot),
            Entry::Vacant { .. } => Err(stale(handle)),
        }
    }

    /// Mutable access; counts as a use for LRU purposes
    pub fn slot_mut(&mut self, handle: Handle) -> Result<&mut Slot> {
        let index = self.check(handle)?;
        self.tick += 1;
        let tick = self.tick;
        match &mut self.entries[index] {
            Entry::Occupied { slot, .. } => {
                slot.last_used = tick;
                Ok(slot)
            }
            Entry::Vacant { .. } => Err(stale(handle)),
        }
    }

    /// Drop the slot behind `handle`, returning its contents
    pub fn release(&mut self, handle: Handle) -> Result<Slot> {
        let index = self.check(handle)?;
        self.vacate(index).ok_or_else(|| stale(handle))
    }

    /// Evict (table, id) if cached
    pub fn evict(&mut self, table: &str, id: i64) -> Option<Slot> {
        let index = *self.index.get(&(table.to_string(), id))?;
        self.vacate(index as usize)
    }

    /// Drop every slot; all outstanding handles become stale
    pub fn clear(&mut self) {
        for index in 0..self.entries.len() {
            self.vacate(index);
        }
    }

    fn handle(&self, index: u32) -> Handle {
        Handle {
            store: self.store,
            index,
            generation: self.entries[index as usize].generation(),
        }
    }

    fn check(&self, handle: Handle) -> Result<usize> {
        if handle.store != self.store {
            return Err(Error::Usage(format!(
                "handle {} belongs to a different store",
                handle
            )));
        }
        let index = handle.index as usize;
        match self.entries.get(index) {
            Some(entry) if entry.generation() == handle.generation => Ok(index),
            _ => Err(stale(handle)),
        }
    }

    fn vacate(&mut self, index: usize) -> Option<Slot> {
        let generation = self.entries[index].generation();
        let entry = std::mem::replace(
            &mut self.entries[index],
            Entry::Vacant {
                generation: generation.wrapping_add(1),
            },
        );
        match entry {
            Entry::Occupied { slot, .. } => {
                self.index.remove(&(slot.entity.name().to_string(), slot.id));
                self.free.push(index as u32);
                Some(slot)
            }
            vacant @ Entry::Vacant { .. } => {
                self.entries[index] = vacant;
                None
            }
        }
    }

    fn evict_least_recent(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| match entry {
                Entry::Occupied { slot, .. } => Some((i, slot.last_used)),
                Entry::Vacant { .. } => None,
            })
            .min_by_key(|(_, used)| *used)
            .map(|(i, _)| i);

        match victim {
            Some(index) => {
                if let Some(slot) = self.vacate(index) {
                    tracing::trace!(table = slot.entity.name(), id = slot.id, "evicted from identity cache");
                }
                true
            }
            None => false,
        }
    }
}

fn stale(handle: Handle) -> Error {
    Error::Usage(format!(
        "handle {} is stale (released, evicted or deleted)",
        handle
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldType;

    fn person() -> EntityType {
        EntityType::from_fields("Person", &[("age", FieldType::Integer)]).unwrap()
    }

    #[test]
    fn test_insert_same_id_returns_same_handle() {
        let mut cache = IdentityCache::new(1, None);
        let p = person();
        let a = cache.insert(&p, 1, vec![Value::Integer(10)]);
        let b = cache.insert(&p, 1, vec![Value::Integer(11)]);
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.slot(a).unwrap().values, vec![Value::Integer(11)]);
        assert_eq!(cache.lookup("Person", 1), Some(a));
    }

    #[test]
    fn test_release_makes_handle_stale() {
        let mut cache = IdentityCache::new(1, None);
        let p = person();
        let a = cache.insert(&p, 1, vec![Value::Integer(10)]);
        let released = cache.release(a).unwrap();
        assert_eq!(released.id, 1);

        assert!(matches!(cache.slot(a), Err(Error::Usage(_))));
        assert!(matches!(cache.release(a), Err(Error::Usage(_))));
        assert!(cache.lookup("Person", 1).is_none());

        // the slot is reused under a new generation
        let b = cache.insert(&p, 1, vec![Value::Integer(10)]);
        assert_ne!(a, b);
        assert!(cache.resolve(b).is_ok());
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let mut first = IdentityCache::new(1, None);
        let second = IdentityCache::new(2, None);
        let handle = first.insert(&person(), 1, vec![Value::Null]);
        assert!(matches!(second.resolve(handle), Err(Error::Usage(_))));
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let mut cache = IdentityCache::new(1, Some(2));
        let p = person();
        let a = cache.insert(&p, 1, vec![Value::Null]);
        let b = cache.insert(&p, 2, vec![Value::Null]);
        cache.slot_mut(a).unwrap();
        let c = cache.insert(&p, 3, vec![Value::Null]);

        assert_eq!(cache.len(), 2);
        assert!(cache.resolve(a).is_ok());
        assert!(cache.resolve(b).is_err());
        assert!(cache.resolve(c).is_ok());
    }

    #[test]
    fn test_clear_and_evict() {
        let mut cache = IdentityCache::new(1, None);
        let p = person();
        let a = cache.insert(&p, 1, vec![Value::Null]);
        let b = cache.insert(&p, 2, vec![Value::Null]);

        assert!(cache.evict("Person", 2).is_some());
        assert!(cache.evict("Person", 2).is_none());
        assert!(cache.resolve(b).is_err());

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.resolve(a).is_err());
    }
}
