//! The backend contract consumed by the counter engine.
//!
//! A backend stores [`Item`]s keyed by a string id. Every operation on a
//! single key is linearizable; operations on different keys are unordered.

use crate::{AttributeValue, Error, FieldPath, Item, KEY_ATTRIBUTE, Result};
use std::future::Future;

/// An item together with its write version.
///
/// Versions start at 1 when an item is created and grow by one on every
/// successful write, whichever operation made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedItem {
    pub item: Item,
    pub version: u64,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The write was applied; carries the new version.
    Written(u64),
    /// The stored version did not match the expected one.
    VersionConflict,
}

/// Description of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub key_attribute: &'static str,
    pub item_count: u64,
}

/// Inspects the stored item before an increment is applied. An error
/// aborts the increment and nothing is written.
pub type ItemCheck = fn(&Item) -> Result<()>;

/// Trait for key-value backends holding structured items.
pub trait Backend: Send + Sync {
    /// Read an item.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<VersionedItem>>> + Send;

    /// Atomically add `delta` to the numeric field at `path`, creating the
    /// item, intermediate maps and the field (starting from 0) if absent.
    /// Returns the new value.
    fn increment_field(
        &self,
        key: &str,
        path: &FieldPath,
        delta: i64,
    ) -> impl Future<Output = Result<i64>> + Send {
        self.increment_field_checked(key, path, delta, |_| Ok(()))
    }

    /// Like [`Backend::increment_field`], but `check` sees the item as
    /// stored (or freshly created) in the same atomic step as the write.
    fn increment_field_checked(
        &self,
        key: &str,
        path: &FieldPath,
        delta: i64,
        check: ItemCheck,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Replace the whole item if its version still equals `expected`.
    /// `None` means the item must not exist yet.
    fn conditional_put(
        &self,
        key: &str,
        item: Item,
        expected: Option<u64>,
    ) -> impl Future<Output = Result<PutOutcome>> + Send;

    /// Delete the field at `path`. Absent items and fields are a no-op and
    /// no item is ever created.
    fn remove_field(&self, key: &str, path: &FieldPath) -> impl Future<Output = Result<()>> + Send;

    /// Create the collection if it does not exist.
    fn ensure_collection(&self) -> impl Future<Output = Result<()>> + Send;

    /// Drop the collection and every item in it. Idempotent.
    fn drop_collection(&self) -> impl Future<Output = Result<()>> + Send;

    fn describe_collection(&self) -> impl Future<Output = Result<CollectionInfo>> + Send;

    /// Whether [`Backend::increment_field`] is natively atomic.
    fn supports_atomic_increment(&self) -> bool {
        true
    }
}

/// Fresh item holding only its key.
pub(crate) fn new_item(key: &str) -> Item {
    let mut item = Item::new();
    item.insert(KEY_ATTRIBUTE.to_string(), AttributeValue::string(key));
    item
}

/// Add `delta` to the field at `path` inside `item`.
pub(crate) fn apply_increment(item: &mut Item, path: &FieldPath, delta: i64) -> Result<i64> {
    let (parents, last) = path.split_last();
    let mut map = item;
    for segment in parents {
        let entry = map
            .entry(segment.clone())
            .or_insert_with(AttributeValue::map);
        map = match entry {
            AttributeValue::M(inner) => inner,
            other => {
                return Err(Error::TypeMismatch {
                    path: path.to_string(),
                    found: other.type_name(),
                });
            }
        };
    }

    let current = match map.get(last) {
        None => 0,
        Some(value) => value.as_i64().ok_or_else(|| Error::TypeMismatch {
            path: path.to_string(),
            found: value.type_name(),
        })?,
    };
    let next = current.checked_add(delta).ok_or_else(|| Error::Overflow {
        path: path.to_string(),
    })?;
    map.insert(last.to_string(), AttributeValue::number(next));
    Ok(next)
}

/// Remove the field at `path` inside `item`. Returns whether anything was
/// removed.
pub(crate) fn apply_remove(item: &mut Item, path: &FieldPath) -> bool {
    let (parents, last) = path.split_last();
    let mut map = item;
    for segment in parents {
        match map.get_mut(segment) {
            Some(AttributeValue::M(inner)) => map = inner,
            _ => return false,
        }
    }
    map.remove(last).is_some()
}
