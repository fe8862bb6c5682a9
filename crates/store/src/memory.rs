//! In-process backend.

use crate::backend::{apply_increment, apply_remove, new_item};
use crate::{
    AttributeValue, Backend, CollectionInfo, Error, FieldPath, Item, ItemCheck, KEY_ATTRIBUTE,
    PutOutcome, Result, VersionedItem,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

const DEFAULT_NAME: &str = "freq_cap";

type Items = HashMap<String, VersionedItem>;

/// A backend keeping every item in a process-local map.
///
/// Each operation runs inside a single critical section, so operations on
/// one key are linearizable.
pub struct MemoryBackend {
    name: String,
    items: Mutex<Option<Items>>,
    atomic_increment: bool,
}

impl MemoryBackend {
    /// Create a backend whose collection already exists.
    pub fn new() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            items: Mutex::new(Some(HashMap::new())),
            atomic_increment: true,
        }
    }

    /// Create a backend that reports no native atomic increment, forcing
    /// callers onto conditional writes.
    pub fn without_atomic_increment() -> Self {
        Self {
            atomic_increment: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Items>>> {
        self.items
            .lock()
            .map_err(|_| Error::Unavailable("memory backend lock poisoned".into()))
    }

    fn with_items<T>(&self, f: impl FnOnce(&mut Items) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let items = guard
            .as_mut()
            .ok_or_else(|| Error::CollectionMissing(self.name.clone()))?;
        f(items)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<VersionedItem>> {
        self.with_items(|items| Ok(items.get(key).cloned()))
    }

    async fn increment_field_checked(
        &self,
        key: &str,
        path: &FieldPath,
        delta: i64,
        check: ItemCheck,
    ) -> Result<i64> {
        self.with_items(|items| {
            let mut stored = items.get(key).cloned().unwrap_or_else(|| VersionedItem {
                item: new_item(key),
                version: 0,
            });
            check(&stored.item)?;
            let value = apply_increment(&mut stored.item, path, delta)?;
            stored.version += 1;
            items.insert(key.to_string(), stored);
            Ok(value)
        })
    }

    async fn conditional_put(
        &self,
        key: &str,
        mut item: Item,
        expected: Option<u64>,
    ) -> Result<PutOutcome> {
        self.with_items(|items| {
            let current = items.get(key).map(|stored| stored.version);
            if current != expected {
                return Ok(PutOutcome::VersionConflict);
            }
            let version = current.unwrap_or(0) + 1;
            item.insert(KEY_ATTRIBUTE.to_string(), AttributeValue::string(key));
            items.insert(key.to_string(), VersionedItem { item, version });
            Ok(PutOutcome::Written(version))
        })
    }

    async fn remove_field(&self, key: &str, path: &FieldPath) -> Result<()> {
        self.with_items(|items| {
            if let Some(stored) = items.get_mut(key) {
                if apply_remove(&mut stored.item, path) {
                    stored.version += 1;
                }
            }
            Ok(())
        })
    }

    async fn ensure_collection(&self) -> Result<()> {
        let mut guard = self.lock()?;
        guard.get_or_insert_with(HashMap::new);
        Ok(())
    }

    async fn drop_collection(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }

    async fn describe_collection(&self) -> Result<CollectionInfo> {
        self.with_items(|items| {
            Ok(CollectionInfo {
                name: self.name.clone(),
                key_attribute: KEY_ATTRIBUTE,
                item_count: items.len() as u64,
            })
        })
    }

    fn supports_atomic_increment(&self) -> bool {
        self.atomic_increment
    }
}
