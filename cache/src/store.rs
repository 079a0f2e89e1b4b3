use crate::entry::CacheEntry;
use crate::key::KeyComparison;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

type Shard = RwLock<HashMap<String, Arc<CacheEntry>, ahash::RandomState>>;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<K: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// The entry map, partitioned into independently locked shards.
///
/// Map keys are the normalized form of the caller's key (see
/// [`KeyComparison`]), while each entry keeps the key exactly as it was given.
pub(crate) struct EntryStore {
  shards: Box<[CachePadded<Shard>]>,
  hasher: ahash::RandomState,
  comparison: KeyComparison,
}

impl fmt::Debug for EntryStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EntryStore")
      .field("num_shards", &self.shards.len())
      .field("comparison", &self.comparison)
      .finish()
  }
}

impl EntryStore {
  /// Creates a store with `num_shards` shards (at least one).
  pub(crate) fn new(num_shards: usize, comparison: KeyComparison) -> Self {
    let hasher = ahash::RandomState::new();
    let shards = (0..num_shards.max(1))
      .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(hasher.clone()))))
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Self {
      shards,
      hasher,
      comparison,
    }
  }

  #[inline]
  pub(crate) fn comparison(&self) -> KeyComparison {
    self.comparison
  }

  #[inline]
  fn shard_for(&self, normalized: &str) -> &Shard {
    let hash = hash_key(&self.hasher, normalized);
    &self.shards[hash as usize % self.shards.len()]
  }

  pub(crate) fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
    let normalized = self.comparison.normalize(key);
    self.shard_for(&normalized).read().get(normalized.as_ref()).cloned()
  }

  /// Installs `entry`, returning whatever it replaced.
  pub(crate) fn insert(&self, entry: Arc<CacheEntry>) -> Option<Arc<CacheEntry>> {
    let normalized = self.comparison.normalize(entry.key()).into_owned();
    self.shard_for(&normalized).write().insert(normalized, entry)
  }

  pub(crate) fn remove(&self, key: &str) -> Option<Arc<CacheEntry>> {
    let normalized = self.comparison.normalize(key);
    self
      .shard_for(&normalized)
      .write()
      .remove(normalized.as_ref())
  }

  /// Removes `entry` only if it is still the one installed under its key.
  ///
  /// Lets a reader evict an expired entry without clobbering a fresh write
  /// that landed after the read.
  pub(crate) fn remove_if_same(&self, entry: &Arc<CacheEntry>) -> bool {
    let normalized = self.comparison.normalize(entry.key());
    let mut guard = self.shard_for(&normalized).write();
    match guard.get(normalized.as_ref()) {
      Some(current) if Arc::ptr_eq(current, entry) => {
        guard.remove(normalized.as_ref());
        true
      }
      _ => false,
    }
  }

  /// Removes every entry matching `predicate`, one shard at a time.
  pub(crate) fn remove_where<F>(&self, mut predicate: F) -> Vec<Arc<CacheEntry>>
  where
    F: FnMut(&CacheEntry) -> bool,
  {
    let mut removed = Vec::new();
    for shard in self.shards.iter() {
      let mut guard = shard.write();
      guard.retain(|_, entry| {
        if predicate(entry) {
          removed.push(entry.clone());
          false
        } else {
          true
        }
      });
    }
    removed
  }

  /// A point-in-time copy of every installed entry.
  pub(crate) fn entries(&self) -> Vec<Arc<CacheEntry>> {
    let mut all = Vec::with_capacity(self.len());
    for shard in self.shards.iter() {
      all.extend(shard.read().values().cloned());
    }
    all
  }

  /// The number of installed entries, expired or not.
  pub(crate) fn len(&self) -> usize {
    self.shards.iter().map(|shard| shard.read().len()).sum()
  }

  pub(crate) fn clear(&self) {
    for shard in self.shards.iter() {
      shard.write().clear();
    }
  }
}
