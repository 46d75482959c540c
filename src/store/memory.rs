//! In-process table backed by a `BTreeMap`.
//!
//! Used for tests and for running the control plane without kernel maps.
//! Entries iterate in key order, which keeps diagnostic dumps stable.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Mutex;

use super::{KeyValueStore, StoreError, Visit, WriteMode};

/// `EBADF`, reported by every operation on an invalid handle.
const BAD_FD: i32 = 9;

/// Bounded in-memory table.
#[derive(Debug)]
pub struct InMemoryMap<K, V> {
    name: String,
    capacity: usize,
    /// `None` models a closed or never-opened handle.
    entries: Option<Mutex<BTreeMap<K, V>>>,
}

impl<K: Ord + Clone, V: Clone> InMemoryMap<K, V> {
    /// Create an empty table holding at most `capacity` entries.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            entries: Some(Mutex::new(BTreeMap::new())),
        }
    }

    /// Create a handle whose every operation fails with `EBADF`.
    pub fn invalid(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: 0,
            entries: None,
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries.
    ///
    /// # Errors
    ///
    /// Fails on an invalid handle.
    pub fn len(&self) -> Result<usize, StoreError> {
        self.with_entries("Get length of", |map| Ok(map.len()))
    }

    fn with_entries<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut BTreeMap<K, V>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let Some(entries) = &self.entries else {
            return Err(self.io_error(op, std::io::Error::from_raw_os_error(BAD_FD)));
        };
        let mut map = entries.lock().map_err(|e| {
            self.io_error(op, std::io::Error::other(format!("lock poisoned: {e}")))
        })?;
        f(&mut map)
    }

    fn io_error(&self, op: &'static str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            op,
            map: self.name.clone(),
            source,
        }
    }
}

impl<K, V> KeyValueStore<K, V> for InMemoryMap<K, V>
where
    K: Ord + Clone + Send,
    V: Clone + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, key: &K) -> Result<V, StoreError> {
        self.with_entries("Read value of", |map| {
            map.get(key).cloned().ok_or(StoreError::NotFound)
        })
    }

    fn write(&self, key: &K, value: &V, mode: WriteMode) -> Result<(), StoreError> {
        let capacity = self.capacity;
        let name = &self.name;
        self.with_entries("Write value of", |map| {
            let exists = map.contains_key(key);
            match mode {
                WriteMode::InsertOnly if exists => return Err(StoreError::AlreadyExists),
                WriteMode::UpdateOnly if !exists => return Err(StoreError::NotFound),
                _ => {}
            }
            if !exists && map.len() >= capacity {
                return Err(StoreError::Full {
                    map: name.clone(),
                    capacity,
                });
            }
            map.insert(key.clone(), value.clone());
            Ok(())
        })
    }

    fn delete(&self, key: &K) -> Result<(), StoreError> {
        self.with_entries("Delete value of", |map| {
            map.remove(key).map(|_| ()).ok_or(StoreError::NotFound)
        })
    }

    fn iterate(&self, visitor: &mut dyn FnMut(&K, &V) -> Visit) -> Result<(), StoreError> {
        // Snapshot first so the visitor runs without the table lock held.
        let snapshot: Vec<(K, V)> = self.with_entries("Get firstKey", |map| {
            Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        })?;
        for (k, v) in &snapshot {
            if let ControlFlow::Break(()) = visitor(k, v) {
                break;
            }
        }
        Ok(())
    }

    fn first_key(&self) -> Result<Option<K>, StoreError> {
        self.with_entries("Get firstKey", |map| Ok(map.keys().next().cloned()))
    }
}
