//! An in-memory token storage backend

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tally_clock::{Clock, System};

use super::{Expiry, StorageError, StorageKey, TokenStorage};

#[derive(Debug)]
struct Entry {
    value: String,
    expiry: Expiry,
}

/// Token storage that lives only as long as the process
#[derive(Debug, Default)]
pub struct InMemoryStorage<C = System> {
    entries: Mutex<HashMap<StorageKey, Entry>>,
    clock: C,
}

impl InMemoryStorage {
    /// Constructs a new, empty in-memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C> InMemoryStorage<C> {
    /// Sets a custom clock to be used for evaluating expiry
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> InMemoryStorage<D> {
        InMemoryStorage {
            entries: self.entries,
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<StorageKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The number of entries held, including any past their expiry
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no entries are held
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// The expiry recorded for `key`, if present
    pub fn expiry_of(&self, key: StorageKey) -> Option<Expiry> {
        self.entries().get(&key).map(|e| e.expiry)
    }
}

#[async_trait]
impl<C: Clock + std::fmt::Debug + Send + Sync> TokenStorage for InMemoryStorage<C> {
    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let now = self.clock.now();
        let mut entries = self.entries();
        match entries.get(&key) {
            Some(entry) if entry.expiry.is_live_at(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                tracing::trace!(%key, "stored value has expired");
                entries.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: StorageKey, value: &str, expiry: Expiry) -> Result<(), StorageError> {
        self.entries().insert(
            key,
            Entry {
                value: value.to_owned(),
                expiry,
            },
        );
        Ok(())
    }

    async fn remove(&self, keys: &[StorageKey]) -> Result<(), StorageError> {
        let mut entries = self.entries();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}
