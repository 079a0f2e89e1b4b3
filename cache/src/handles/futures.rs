use crate::entry::{EntryOptions, Expiration};
use crate::error::CacheError;
use crate::shared::CacheShared;
use crate::value::{CachedValue, Persistable};
use crate::{Cache, MetricsSnapshot};

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A thread-safe, asynchronous cache.
///
/// Plain reads and writes never wait on other callers, so they are exposed
/// as ordinary methods. The get-or-add family is `async`: a caller that finds
/// another task computing the same key awaits that computation instead of
/// blocking its thread.
#[derive(Debug, Clone)]
pub struct AsyncCache {
  pub(crate) shared: Arc<CacheShared>,
}

impl AsyncCache {
  /// Converts this asynchronous `AsyncCache` into a synchronous `Cache`.
  /// This is a zero-cost conversion.
  pub fn to_sync(&self) -> Cache {
    Cache {
      shared: self.shared.clone(),
    }
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  pub fn add<V: Persistable>(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError> {
    self.add_with(key, value, Expiration::Absolute(ttl), EntryOptions::default())
  }

  pub fn add_sliding<V: Persistable>(
    &self,
    key: &str,
    value: V,
    sliding: Duration,
  ) -> Result<(), CacheError> {
    self.add_with(key, value, Expiration::sliding(sliding), EntryOptions::default())
  }

  pub fn add_with<V: Persistable>(
    &self,
    key: &str,
    value: V,
    expiration: Expiration,
    options: EntryOptions,
  ) -> Result<(), CacheError> {
    self.add_value(key, CachedValue::new(value), expiration, options)
  }

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

  pub fn try_get(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
    self.shared.lookup(key)
  }

  pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<V>>, CacheError> {
    match self.shared.lookup(key)? {
      Some(value) => CacheShared::typed::<V>(key, &value).map(Some),
      None => Ok(None),
    }
  }

  pub fn exists(&self, key: &str) -> Result<bool, CacheError> {
    Ok(self.shared.lookup(key)?.is_some())
  }

  pub fn exists_tag(&self, tag: &str) -> bool {
    self.shared.exists_tag(tag)
  }

  pub fn keys(&self) -> Vec<String> {
    self.shared.keys()
  }

  pub fn tags(&self) -> Vec<String> {
    self.shared.tags()
  }

  pub fn count(&self) -> usize {
    self.shared.store.len()
  }

  pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
    self.shared.remove(key)
  }

  pub fn remove_tag(&self, tag: &str) -> usize {
    self.shared.remove_tag(tag)
  }

  pub fn clear(&self) {
    self.shared.clear()
  }

  pub fn sweep_expired(&self) -> usize {
    self.shared.sweep_expired()
  }

  // --- Get-or-add ---

  /// Returns the cached `V` under `key`, or computes, caches, and returns it.
  ///
  /// Every caller that arrives while the computation is in flight awaits the
  /// same result, so `factory` runs once for all of them.
  pub async fn get_or_add<V, F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    factory: F,
  ) -> Result<Option<Arc<V>>, CacheError>
  where
    V: Persistable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Option<V>>,
  {
    self
      .try_get_or_add(key, ttl, || async move { Ok(factory().await) })
      .await
  }

  pub async fn get_or_add_sliding<V, F, Fut>(
    &self,
    key: &str,
    sliding: Duration,
    factory: F,
  ) -> Result<Option<Arc<V>>, CacheError>
  where
    V: Persistable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Option<V>>,
  {
    self
      .try_get_or_add_sliding(key, sliding, || async move { Ok(factory().await) })
      .await
  }

  /// Like [`get_or_add`](Self::get_or_add) with a fallible factory.
  ///
  /// A factory error is returned to the caller that ran it. Callers that
  /// were waiting on that attempt start over, and one of them runs its own
  /// factory.
  pub async fn try_get_or_add<V, E, F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    factory: F,
  ) -> Result<Option<Arc<V>>, E>
  where
    V: Persistable,
    E: From<CacheError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<V>, E>>,
  {
    self
      .try_get_or_add_with(key, Expiration::Absolute(ttl), EntryOptions::default(), factory)
      .await
  }

  pub async fn try_get_or_add_sliding<V, E, F, Fut>(
    &self,
    key: &str,
    sliding: Duration,
    factory: F,
  ) -> Result<Option<Arc<V>>, E>
  where
    V: Persistable,
    E: From<CacheError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<V>, E>>,
  {
    self
      .try_get_or_add_with(key, Expiration::sliding(sliding), EntryOptions::default(), factory)
      .await
  }

  /// The general async get-or-add.
  ///
  /// Besides `force_set` and `wait_timeout`, honours `options.cancel_on`:
  /// once the token fires the call returns [`CacheError::Cancelled`]. A
  /// cancelled caller never leaves the key locked, and if it was running the
  /// factory, waiting callers take over.
  pub async fn try_get_or_add_with<V, E, F, Fut>(
    &self,
    key: &str,
    expiration: Expiration,
    options: EntryOptions,
    factory: F,
  ) -> Result<Option<Arc<V>>, E>
  where
    V: Persistable,
    E: From<CacheError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<V>, E>>,
  {
    self
      .shared
      .get_or_insert_with_async(key, factory, expiration, &options)
      .await
  }
}
