use crate::entry::{EntryOptions, Expiration};
use crate::error::CacheError;
use crate::shared::CacheShared;
use crate::value::{CachedValue, Persistable};
use crate::{AsyncCache, CacheBuilder, MetricsSnapshot};

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// A thread-safe, synchronous cache.
///
/// Values of any type can be stored side by side; reads name the type they
/// expect and fail with [`CacheError::TypeMismatch`] if it is wrong.
#[derive(Debug, Clone)]
pub struct Cache {
  pub(crate) shared: Arc<CacheShared>,
}

impl Cache {
  /// Returns a builder for a new cache.
  pub fn builder() -> CacheBuilder {
    CacheBuilder::new()
  }

  /// Converts this synchronous `Cache` into an asynchronous `AsyncCache`.
  /// This is a zero-cost conversion.
  pub fn to_async(&self) -> AsyncCache {
    AsyncCache {
      shared: self.shared.clone(),
    }
  }

  /// The instance name, which also names its durable file.
  pub fn name(&self) -> &str {
    &self.shared.name
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  // --- Writes ---

  /// Adds `value` under `key` for `ttl`, replacing any existing entry.
  pub fn add<V: Persistable>(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError> {
    self.add_with(key, value, Expiration::Absolute(ttl), EntryOptions::default())
  }

  /// Adds `value` under `key`, kept alive for `sliding` after each read.
  pub fn add_sliding<V: Persistable>(
    &self,
    key: &str,
    value: V,
    sliding: Duration,
  ) -> Result<(), CacheError> {
    self.add_with(key, value, Expiration::sliding(sliding), EntryOptions::default())
  }

  /// Adds `value` with full control over expiration, tags, and persistence.
  pub fn add_with<V: Persistable>(
    &self,
    key: &str,
    value: V,
    expiration: Expiration,
    options: EntryOptions,
  ) -> Result<(), CacheError> {
    self.add_value(key, CachedValue::new(value), expiration, options)
  }

  /// Adds an already erased value. Opaque values are never persisted.
  pub fn add_value(
    &self,
    key: &str,
    value: CachedValue,
    expiration: Expiration,
    options: EntryOptions,
  ) -> Result<(), CacheError> {
    self
      .shared
      .insert(key, value, expiration, &options.tags, options.persist)
  }

  // --- Reads ---

  /// Returns the erased value under `key`, if live.
  pub fn try_get(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
    self.shared.lookup(key)
  }

  /// Returns the value under `key` as a `V`, if live.
  pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<V>>, CacheError> {
    match self.shared.lookup(key)? {
      Some(value) => CacheShared::typed::<V>(key, &value).map(Some),
      None => Ok(None),
    }
  }

  /// Returns `true` if a live entry exists. Counts as a read, so it extends
  /// sliding entries.
  pub fn exists(&self, key: &str) -> Result<bool, CacheError> {
    Ok(self.shared.lookup(key)?.is_some())
  }

  pub fn exists_tag(&self, tag: &str) -> bool {
    self.shared.exists_tag(tag)
  }

  /// The keys of every live entry, as they were written.
  pub fn keys(&self) -> Vec<String> {
    self.shared.keys()
  }

  /// Every distinct tag on a live entry.
  pub fn tags(&self) -> Vec<String> {
    self.shared.tags()
  }

  /// The number of stored entries, including expired ones not yet evicted.
  pub fn count(&self) -> usize {
    self.shared.store.len()
  }

  // --- Removal ---

  /// Removes `key`. Returns `true` if an entry was removed.
  pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
    self.shared.remove(key)
  }

  /// Removes every entry tagged `tag`. Returns how many were removed.
  pub fn remove_tag(&self, tag: &str) -> usize {
    self.shared.remove_tag(tag)
  }

  /// Removes every entry, and every durable twin of this instance.
  pub fn clear(&self) {
    self.shared.clear()
  }

  /// Evicts expired entries now. Returns how many were evicted.
  pub fn sweep_expired(&self) -> usize {
    self.shared.sweep_expired()
  }

  // --- Get-or-add ---

  /// Returns the cached `V` under `key`, or computes, caches, and returns it.
  ///
  /// Concurrent callers for the same key run `factory` at most once while
  /// no value is cached. A factory returning `None` caches nothing.
  pub fn get_or_add<V, F>(&self, key: &str, ttl: Duration, factory: F) -> Result<Option<Arc<V>>, CacheError>
  where
    V: Persistable,
    F: FnOnce() -> Option<V>,
  {
    self.try_get_or_add(key, ttl, || Ok(factory()))
  }

  /// Like [`get_or_add`](Self::get_or_add) with a sliding expiration.
  pub fn get_or_add_sliding<V, F>(
    &self,
    key: &str,
    sliding: Duration,
    factory: F,
  ) -> Result<Option<Arc<V>>, CacheError>
  where
    V: Persistable,
    F: FnOnce() -> Option<V>,
  {
    self.try_get_or_add_sliding(key, sliding, || Ok(factory()))
  }

  /// Like [`get_or_add`](Self::get_or_add) with a fallible factory.
  ///
  /// A factory error is returned to this caller only and caches nothing.
  pub fn try_get_or_add<V, E, F>(&self, key: &str, ttl: Duration, factory: F) -> Result<Option<Arc<V>>, E>
  where
    V: Persistable,
    E: From<CacheError>,
    F: FnOnce() -> Result<Option<V>, E>,
  {
    self.try_get_or_add_with(key, Expiration::Absolute(ttl), EntryOptions::default(), factory)
  }

  /// Like [`try_get_or_add`](Self::try_get_or_add) with a sliding expiration.
  pub fn try_get_or_add_sliding<V, E, F>(
    &self,
    key: &str,
    sliding: Duration,
    factory: F,
  ) -> Result<Option<Arc<V>>, E>
  where
    V: Persistable,
    E: From<CacheError>,
    F: FnOnce() -> Result<Option<V>, E>,
  {
    self.try_get_or_add_with(key, Expiration::sliding(sliding), EntryOptions::default(), factory)
  }

  /// The general get-or-add.
  ///
  /// `options.force_set` recomputes even when a value is cached.
  /// `options.wait_timeout` bounds the wait behind another caller holding
  /// the key and yields [`CacheError::LockTimeout`] without running
  /// `factory`.
  pub fn try_get_or_add_with<V, E, F>(
    &self,
    key: &str,
    expiration: Expiration,
    options: EntryOptions,
    factory: F,
  ) -> Result<Option<Arc<V>>, E>
  where
    V: Persistable,
    E: From<CacheError>,
    F: FnOnce() -> Result<Option<V>, E>,
  {
    self
      .shared
      .get_or_insert_with(key, factory, expiration, &options)
  }
}
