use super::{PersistedEntry, PersistedStore};
use crate::error::PersistError;
use crate::key::KeyComparison;

use std::sync::Arc;

use ahash::HashMap;
use parking_lot::Mutex;

/// A `PersistedStore` held in process memory.
///
/// Clones share the same records, so one handle can outlive a cache and be
/// handed to its replacement.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  instances: Arc<Mutex<HashMap<String, Vec<PersistedEntry>>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// The number of records held for `name`.
  pub fn len(&self, name: &str) -> usize {
    self.instances.lock().get(name).map_or(0, Vec::len)
  }

  pub fn is_empty(&self, name: &str) -> bool {
    self.len(name) == 0
  }
}

impl PersistedStore for MemoryStore {
  fn get_all(&self, name: &str) -> Result<Vec<PersistedEntry>, PersistError> {
    Ok(self.instances.lock().get(name).cloned().unwrap_or_default())
  }

  fn insert_or_replace(
    &self,
    name: &str,
    key: &str,
    comparison: KeyComparison,
    entry: PersistedEntry,
  ) -> Result<(), PersistError> {
    let mut instances = self.instances.lock();
    let records = instances.entry(name.to_string()).or_default();
    records.retain(|existing| !comparison.matches(&existing.key, key));
    records.push(entry);
    Ok(())
  }

  fn delete(
    &self,
    name: &str,
    comparison: KeyComparison,
    keys: &[String],
  ) -> Result<(), PersistError> {
    if let Some(records) = self.instances.lock().get_mut(name) {
      records.retain(|existing| !keys.iter().any(|key| comparison.matches(&existing.key, key)));
    }
    Ok(())
  }

  fn clear(&self, name: &str) -> Result<(), PersistError> {
    self.instances.lock().remove(name);
    Ok(())
  }
}
