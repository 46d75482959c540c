//! Key/value table contract shared with the in-kernel packet filter.
//!
//! Every policy component is written against [`KeyValueStore`] only. The
//! production transport (pinned kernel maps) and the in-process
//! [`memory::InMemoryMap`] both implement it, so tests inject a fake table
//! through the same constructor the daemon uses.

pub mod memory;

use std::ops::ControlFlow;
use std::sync::Arc;

use thiserror::Error;

pub use memory::InMemoryMap;

/// How [`KeyValueStore::write`] treats an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with [`StoreError::AlreadyExists`] if the key is present.
    InsertOnly,
    /// Fail with [`StoreError::NotFound`] if the key is absent.
    UpdateOnly,
    /// Create or overwrite.
    Upsert,
}

/// Failure reported by a table operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has no entry.
    #[error("key not found")]
    NotFound,

    /// An insert-only write hit an existing key.
    #[error("key already exists")]
    AlreadyExists,

    /// The table has no room for another entry.
    #[error("map {map} is full ({capacity} entries)")]
    Full {
        /// Table name.
        map: String,
        /// Maximum number of entries.
        capacity: usize,
    },

    /// The underlying handle is unusable.
    #[error("{op} map {map} failed: {source}")]
    Io {
        /// Operation that failed.
        op: &'static str,
        /// Table name.
        map: String,
        /// OS-level cause.
        #[source]
        source: std::io::Error,
    },
}

/// Outcome requested by an iteration visitor.
pub type Visit = ControlFlow<()>;

/// Fixed-record associative table.
///
/// Each call is atomic per key. Callers needing read-modify-write atomicity
/// across calls must serialize externally.
pub trait KeyValueStore<K, V>: Send + Sync {
    /// Table name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Read the value stored for `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when absent, [`StoreError::Io`] when the handle is broken.
    fn read(&self, key: &K) -> Result<V, StoreError>;

    /// Write `value` for `key` according to `mode`.
    ///
    /// # Errors
    ///
    /// Mode violations, a full table, or an I/O failure.
    fn write(&self, key: &K, value: &V, mode: WriteMode) -> Result<(), StoreError>;

    /// Delete the entry for `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when absent, [`StoreError::Io`] when the handle is broken.
    fn delete(&self, key: &K) -> Result<(), StoreError>;

    /// Visit every entry until the visitor breaks.
    ///
    /// The visitor must not call back into the same table.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when the handle is broken.
    fn iterate(&self, visitor: &mut dyn FnMut(&K, &V) -> Visit) -> Result<(), StoreError>;

    /// Return the first key, or `None` if the table is empty.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when the handle is broken.
    fn first_key(&self) -> Result<Option<K>, StoreError>;

    /// Read `key`, mapping absence to `None`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when the handle is broken.
    fn lookup(&self, key: &K) -> Result<Option<V>, StoreError> {
        match self.read(key) {
            Ok(v) => Ok(Some(v)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether the table holds no entries.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when the handle is broken.
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.first_key()?.is_none())
    }
}

/// Shared handle to a table.
pub type SharedMap<K, V> = Arc<dyn KeyValueStore<K, V>>;
