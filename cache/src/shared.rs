use crate::clock::Clock;
use crate::entry::{clean_tags, CacheEntry, EntryOptions, Expiration};
use crate::error::CacheError;
use crate::keyed_lock::{KeyGuard, KeyedLock};
use crate::loader::{LoadFuture, LoadOutcome};
use crate::metrics::Metrics;
use crate::persist::Durable;
use crate::store::EntryStore;
use crate::task::janitor::{Janitor, Sweeper};
use crate::value::{CachedValue, Persistable, TypeRegistry};

use std::any::{type_name, Any};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ahash::HashMap;
use futures_util::future::{select, Either};
use parking_lot::Mutex;

/// The internal, thread-safe core of the cache.
pub(crate) struct CacheShared {
  pub(crate) name: Arc<str>,
  pub(crate) store: Arc<EntryStore>,
  pub(crate) durable: Arc<Durable>,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) registry: TypeRegistry,
  pub(crate) keyed_lock: KeyedLock<String>,
  pub(crate) pending_loads: Mutex<HashMap<String, Arc<LoadFuture>>>,
  pub(crate) sweeper: Sweeper,
  pub(crate) janitor: Option<Janitor>,
}

impl fmt::Debug for CacheShared {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("name", &self.name)
      .field("store", &self.store)
      .field("sweeper", &self.janitor.is_some())
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl Drop for CacheShared {
  fn drop(&mut self) {
    if let Some(janitor) = self.janitor.take() {
      janitor.stop();
    }
  }
}

/// Completes an in-flight marker when the leading caller finishes or goes
/// away, and takes the marker out of the pending table first so that
/// retrying waiters start a fresh load.
struct InflightGuard<'a> {
  shared: &'a CacheShared,
  key: &'a str,
  load: Arc<LoadFuture>,
  done: bool,
}

impl InflightGuard<'_> {
  fn finish(mut self, outcome: LoadOutcome) {
    self.done = true;
    self.settle(outcome);
  }

  fn settle(&self, outcome: LoadOutcome) {
    {
      let mut pending = self.shared.pending_loads.lock();
      if pending
        .get(self.key)
        .is_some_and(|current| Arc::ptr_eq(current, &self.load))
      {
        pending.remove(self.key);
      }
    }
    self.load.complete(outcome);
  }
}

impl Drop for InflightGuard<'_> {
  fn drop(&mut self) {
    if !self.done {
      self.settle(LoadOutcome::Retry);
    }
  }
}

impl CacheShared {
  #[inline]
  pub(crate) fn check_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
      Err(CacheError::EmptyKey)
    } else {
      Ok(())
    }
  }

  /// Views an erased value as a `V`.
  pub(crate) fn typed<V: Any + Send + Sync>(
    key: &str,
    value: &CachedValue,
  ) -> Result<Arc<V>, CacheError> {
    value
      .downcast::<V>()
      .ok_or_else(|| CacheError::TypeMismatch {
        key: key.to_string(),
        expected: type_name::<V>(),
        actual: value.type_name(),
      })
  }

  // --- Core entry operations ---

  /// Installs a new entry, replacing any previous one for the same key.
  pub(crate) fn insert(
    &self,
    key: &str,
    value: CachedValue,
    expiration: Expiration,
    tags: &[String],
    persist: bool,
  ) -> Result<(), CacheError> {
    Self::check_key(key)?;
    let value = if persist {
      self.registry.register_value(value)
    } else {
      value
    };

    let entry = Arc::new(CacheEntry::new(
      key.to_string(),
      value,
      expiration,
      clean_tags(tags.iter().cloned()),
      persist,
      self.clock.now(),
    ));
    let replaced = self.store.insert(entry.clone());
    self.metrics.inserts.fetch_add(1, Ordering::Relaxed);

    if persist {
      self.durable.write(&entry);
    } else if let Some(previous) = replaced.filter(|previous| previous.persist()) {
      // The new value lives in memory only, so the old twin must not revive.
      self.durable.delete(vec![previous.key().to_string()]);
    }
    Ok(())
  }

  /// Looks up a live entry, evicting it if it has expired and extending its
  /// deadline if it slides.
  pub(crate) fn lookup(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
    Self::check_key(key)?;
    let Some(entry) = self.store.get(key) else {
      self.metrics.misses.fetch_add(1, Ordering::Relaxed);
      return Ok(None);
    };

    let now = self.clock.now();
    if entry.is_expired(now) {
      self.metrics.misses.fetch_add(1, Ordering::Relaxed);
      if self.store.remove_if_same(&entry) {
        self.metrics.expirations.fetch_add(1, Ordering::Relaxed);
        if entry.persist() {
          self.durable.delete(vec![entry.key().to_string()]);
        }
      }
      return Ok(None);
    }

    self.metrics.hits.fetch_add(1, Ordering::Relaxed);
    if entry.touch(now) && entry.persist() {
      self.durable.write(&entry);
    }
    Ok(Some(entry.value().clone()))
  }

  pub(crate) fn exists_tag(&self, tag: &str) -> bool {
    let now = self.clock.now();
    let comparison = self.store.comparison();
    self
      .store
      .entries()
      .iter()
      .any(|entry| !entry.is_expired(now) && entry.has_tag(tag, comparison))
  }

  /// The original keys of every live entry.
  pub(crate) fn keys(&self) -> Vec<String> {
    let now = self.clock.now();
    self
      .store
      .entries()
      .into_iter()
      .filter(|entry| !entry.is_expired(now))
      .map(|entry| entry.key().to_string())
      .collect()
  }

  /// Every distinct tag carried by a live entry.
  pub(crate) fn tags(&self) -> Vec<String> {
    let now = self.clock.now();
    let comparison = self.store.comparison();
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for entry in self.store.entries() {
      if entry.is_expired(now) {
        continue;
      }
      for tag in entry.tags() {
        if seen.insert(comparison.normalize(tag).into_owned()) {
          tags.push(tag.clone());
        }
      }
    }
    tags
  }

  pub(crate) fn remove(&self, key: &str) -> Result<bool, CacheError> {
    Self::check_key(key)?;
    let Some(entry) = self.store.remove(key) else {
      return Ok(false);
    };
    self.metrics.removals.fetch_add(1, Ordering::Relaxed);
    if entry.persist() {
      self.durable.delete(vec![entry.key().to_string()]);
    }
    Ok(true)
  }

  /// Removes every entry tagged `tag`, with one durable delete for all of
  /// them. Returns how many entries were removed.
  pub(crate) fn remove_tag(&self, tag: &str) -> usize {
    let comparison = self.store.comparison();
    let removed = self.store.remove_where(|entry| entry.has_tag(tag, comparison));
    if removed.is_empty() {
      return 0;
    }
    self
      .metrics
      .removals
      .fetch_add(removed.len() as u64, Ordering::Relaxed);
    let durable_keys = removed
      .iter()
      .filter(|entry| entry.persist())
      .map(|entry| entry.key().to_string())
      .collect();
    self.durable.delete(durable_keys);
    removed.len()
  }

  pub(crate) fn clear(&self) {
    let count = self.store.len();
    self.store.clear();
    self
      .metrics
      .removals
      .fetch_add(count as u64, Ordering::Relaxed);
    self.durable.clear();
  }

  // --- Get-or-add ---

  fn lookup_typed<V: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<V>>, CacheError> {
    match self.lookup(key)? {
      Some(value) => Self::typed::<V>(key, &value).map(Some),
      None => Ok(None),
    }
  }

  /// Caches what a factory returned. The caller must hold the key's lock.
  fn store_loaded<V: Persistable, E>(
    &self,
    key: &str,
    loaded: Result<Option<V>, E>,
    expiration: Expiration,
    options: &EntryOptions,
  ) -> Result<Option<(Arc<V>, CachedValue)>, E>
  where
    E: From<CacheError>,
  {
    match loaded {
      Ok(Some(value)) => {
        let value = Arc::new(value);
        let erased = CachedValue::from_arc(value.clone());
        self.insert(key, erased.clone(), expiration, &options.tags, options.persist)?;
        Ok(Some((value, erased)))
      }
      Ok(None) => Ok(None),
      Err(e) => {
        self.metrics.load_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(cache = %self.name, key = %key, "get-or-add factory failed");
        Err(e)
      }
    }
  }

  fn acquire_blocking(
    &self,
    key: &str,
    lock_key: &String,
    options: &EntryOptions,
  ) -> Result<KeyGuard<'_, String>, CacheError> {
    match options.wait_timeout {
      Some(timeout) => self
        .keyed_lock
        .acquire_timeout(lock_key, timeout)
        .map_err(|_| CacheError::LockTimeout {
          key: key.to_string(),
        }),
      None => Ok(self.keyed_lock.acquire(lock_key)),
    }
  }

  /// The blocking get-or-add: check, lock, re-check, compute.
  pub(crate) fn get_or_insert_with<V, E, F>(
    &self,
    key: &str,
    factory: F,
    expiration: Expiration,
    options: &EntryOptions,
  ) -> Result<Option<Arc<V>>, E>
  where
    V: Persistable,
    E: From<CacheError>,
    F: FnOnce() -> Result<Option<V>, E>,
  {
    Self::check_key(key)?;
    if !options.force_set {
      if let Some(value) = self.lookup_typed::<V>(key)? {
        return Ok(Some(value));
      }
    }

    let lock_key = self.store.comparison().normalize(key).into_owned();
    let _guard = self.acquire_blocking(key, &lock_key, options)?;
    if !options.force_set {
      if let Some(value) = self.lookup_typed::<V>(key)? {
        return Ok(Some(value));
      }
    }

    self.metrics.loads.fetch_add(1, Ordering::Relaxed);
    let loaded = self.store_loaded(key, factory(), expiration, options)?;
    Ok(loaded.map(|(value, _)| value))
  }

  /// Awaits `fut`, giving up on the caller's cancellation token.
  async fn cancellable<T>(
    &self,
    key: &str,
    fut: impl Future<Output = T>,
    options: &EntryOptions,
  ) -> Result<T, CacheError> {
    let Some(token) = options.cancellation.as_ref() else {
      return Ok(fut.await);
    };
    let cancelled = pin!(token.cancelled());
    let fut = pin!(fut);
    match select(cancelled, fut).await {
      Either::Left(_) => Err(CacheError::Cancelled {
        key: key.to_string(),
      }),
      Either::Right((output, _)) => Ok(output),
    }
  }

  /// Awaits a wait step, bounded by the caller's timeout and cancellation.
  async fn bounded_wait<T>(
    &self,
    key: &str,
    fut: impl Future<Output = T>,
    options: &EntryOptions,
  ) -> Result<T, CacheError> {
    match options.wait_timeout {
      Some(timeout) => self
        .cancellable(key, tokio::time::timeout(timeout, fut), options)
        .await?
        .map_err(|_| CacheError::LockTimeout {
          key: key.to_string(),
        }),
      None => self.cancellable(key, fut, options).await,
    }
  }

  /// The async get-or-add.
  ///
  /// Concurrent callers for the same missing key share one in-flight
  /// computation. The leader holds the key's lock while computing, so it
  /// also excludes blocking callers. When the leader fails or is dropped,
  /// waiters go round again and one of them leads the next attempt.
  pub(crate) async fn get_or_insert_with_async<V, E, F, Fut>(
    &self,
    key: &str,
    factory: F,
    expiration: Expiration,
    options: &EntryOptions,
  ) -> Result<Option<Arc<V>>, E>
  where
    V: Persistable,
    E: From<CacheError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<V>, E>>,
  {
    Self::check_key(key)?;
    let lock_key = self.store.comparison().normalize(key).into_owned();

    if options.force_set {
      let _guard = self
        .bounded_wait(key, self.keyed_lock.acquire_async(&lock_key), options)
        .await?;
      self.metrics.loads.fetch_add(1, Ordering::Relaxed);
      let loaded = self.cancellable(key, factory(), options).await?;
      let loaded = self.store_loaded(key, loaded, expiration, options)?;
      return Ok(loaded.map(|(value, _)| value));
    }

    let load = loop {
      if let Some(value) = self.lookup_typed::<V>(key)? {
        return Ok(Some(value));
      }

      let (load, leader) = {
        let mut pending = self.pending_loads.lock();
        match pending.get(&lock_key) {
          Some(existing) => (existing.clone(), false),
          None => {
            let load = Arc::new(LoadFuture::new());
            pending.insert(lock_key.clone(), load.clone());
            (load, true)
          }
        }
      };
      if leader {
        break load;
      }

      match self.bounded_wait(key, load.wait(), options).await? {
        LoadOutcome::Loaded(value) => return Ok(Some(Self::typed::<V>(key, &value)?)),
        LoadOutcome::Empty => return Ok(None),
        LoadOutcome::Retry => continue,
      }
    };

    let inflight = InflightGuard {
      shared: self,
      key: &lock_key,
      load,
      done: false,
    };
    let _guard = self
      .bounded_wait(key, self.keyed_lock.acquire_async(&lock_key), options)
      .await?;

    if let Some(value) = self.lookup(key)? {
      let typed = Self::typed::<V>(key, &value);
      inflight.finish(LoadOutcome::Loaded(value));
      return Ok(Some(typed?));
    }

    self.metrics.loads.fetch_add(1, Ordering::Relaxed);
    let loaded = self.cancellable(key, factory(), options).await?;
    match self.store_loaded(key, loaded, expiration, options)? {
      Some((value, erased)) => {
        inflight.finish(LoadOutcome::Loaded(erased));
        Ok(Some(value))
      }
      None => {
        inflight.finish(LoadOutcome::Empty);
        Ok(None)
      }
    }
  }

  pub(crate) fn sweep_expired(&self) -> usize {
    self.sweeper.run()
  }
}
