use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::BuildError;
use crate::handles::{AsyncCache, Cache};
use crate::key::KeyComparison;
use crate::keyed_lock::KeyedLock;
use crate::metrics::Metrics;
use crate::persist::{Durable, JsonFileStore, PersistedStore};
use crate::shared::CacheShared;
use crate::store::EntryStore;
use crate::task::janitor::{Janitor, Sweeper, DEFAULT_SWEEP_INTERVAL};
use crate::value::{Persistable, TypeRegistry};

use core::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// The instance name used when none is given.
pub const DEFAULT_NAME: &str = "memcore";

/// A builder for creating `Cache` and `AsyncCache` instances.
///
/// Building performs the durable load: every live twin stored under the
/// instance name is revived before the handle is returned.
pub struct CacheBuilder {
  name: String,
  comparison: KeyComparison,
  shards: usize,
  clock: Arc<dyn Clock>,
  persisted_store: Option<Arc<dyn PersistedStore>>,
  persistence_dir: Option<PathBuf>,
  sweep_interval: Duration,
  sweeper: bool,
  registry: TypeRegistry,
}

// Manual Debug implementation for CacheBuilder.
impl fmt::Debug for CacheBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("name", &self.name)
      .field("comparison", &self.comparison)
      .field("shards", &self.shards)
      .field("has_persisted_store", &self.persisted_store.is_some())
      .field("persistence_dir", &self.persistence_dir)
      .field("sweep_interval", &self.sweep_interval)
      .field("sweeper", &self.sweeper)
      .finish_non_exhaustive()
  }
}

impl Default for CacheBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheBuilder {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      name: DEFAULT_NAME.to_string(),
      comparison: KeyComparison::Ordinal,
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      clock: Arc::new(SystemClock),
      persisted_store: None,
      persistence_dir: None,
      sweep_interval: DEFAULT_SWEEP_INTERVAL,
      sweeper: true,
      registry: TypeRegistry::with_defaults(),
    }
  }

  /// Creates a builder from a deserialized configuration.
  pub fn from_config(config: &CacheConfig) -> Result<Self, BuildError> {
    let mut builder = Self::new();
    if let Some(name) = &config.name {
      builder = builder.name(name.clone());
    }
    if config.ignore_case {
      builder = builder.key_comparison(KeyComparison::OrdinalIgnoreCase);
    }
    if let Some(shards) = config.shards {
      builder = builder.shards(shards);
    }
    if let Some(interval) = config.sweep_interval()? {
      builder = builder.sweep_interval(interval);
    }
    if !config.sweeper {
      builder = builder.disable_sweeper();
    }
    if let Some(dir) = &config.persistence_dir {
      builder = builder.persistence_dir(dir.clone());
    }
    Ok(builder)
  }

  /// Sets the instance name. Instances sharing a durable store are kept
  /// apart by name.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Sets how keys and tags are compared.
  pub fn key_comparison(mut self, comparison: KeyComparison) -> Self {
    self.comparison = comparison;
    self
  }

  /// Sets the number of concurrent shards to use.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = shards.max(1).next_power_of_two();
    self
  }

  /// Replaces the time source.
  pub fn clock(mut self, clock: impl Clock) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  /// Mirrors persistent entries to `store` instead of the default JSON file.
  pub fn persisted_store(mut self, store: impl PersistedStore) -> Self {
    self.persisted_store = Some(Arc::new(store));
    self
  }

  /// Sets the directory of the default JSON file store.
  pub fn persistence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.persistence_dir = Some(dir.into());
    self
  }

  /// Sets the time between two background sweeps.
  pub fn sweep_interval(mut self, interval: Duration) -> Self {
    self.sweep_interval = interval;
    self
  }

  /// Runs no background sweeper. Expired entries are then only evicted when
  /// read, or by calling `sweep_expired`.
  pub fn disable_sweeper(mut self) -> Self {
    self.sweeper = false;
    self
  }

  /// Makes durable records of type `T` revivable on load.
  ///
  /// Types are registered automatically when a value is persisted, but a
  /// fresh process must register them here to read what an earlier one
  /// wrote.
  ///
  /// Records are keyed by `std::any::type_name`, which is not guaranteed to
  /// stay the same across compiler versions. Use [`register_type_as`] when
  /// durable files must outlive a toolchain upgrade.
  ///
  /// [`register_type_as`]: CacheBuilder::register_type_as
  pub fn register_type<T: Persistable>(self) -> Self {
    self.registry.register::<T>();
    self
  }

  /// Like [`register_type`](CacheBuilder::register_type), but values of type
  /// `T` are persisted under `name` instead of the Rust type name.
  ///
  /// Records written earlier under the Rust type name still load.
  pub fn register_type_as<T: Persistable>(self, name: &str) -> Self {
    self.registry.register_as::<T>(name);
    self
  }

  /// Builds a synchronous `Cache`.
  pub fn build(self) -> Result<Cache, BuildError> {
    self.validate()?;
    Ok(Cache {
      shared: self.build_shared_core(),
    })
  }

  /// Builds an asynchronous `AsyncCache`.
  pub fn build_async(self) -> Result<AsyncCache, BuildError> {
    self.validate()?;
    Ok(AsyncCache {
      shared: self.build_shared_core(),
    })
  }

  /// Central logic to construct the shared core of the cache.
  fn build_shared_core(self) -> Arc<CacheShared> {
    let name: Arc<str> = Arc::from(self.name.trim());
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(EntryStore::new(self.shards, self.comparison));
    let persisted_store = self.persisted_store.unwrap_or_else(|| {
      let files = match self.persistence_dir {
        Some(dir) => JsonFileStore::new(dir),
        None => JsonFileStore::beside_executable(),
      };
      let files: Arc<dyn PersistedStore> = Arc::new(files);
      files
    });
    let durable = Arc::new(Durable::new(
      name.to_string(),
      persisted_store,
      self.comparison,
      self.clock.clone(),
      metrics.clone(),
    ));

    for entry in durable.load(&self.registry) {
      store.insert(Arc::new(entry));
    }

    let sweeper = Sweeper {
      name: name.clone(),
      store: store.clone(),
      durable: durable.clone(),
      clock: self.clock.clone(),
      metrics: metrics.clone(),
    };
    let janitor = self
      .sweeper
      .then(|| Janitor::spawn(sweeper.clone(), self.sweep_interval));

    Arc::new(CacheShared {
      name,
      store,
      durable,
      clock: self.clock,
      metrics,
      registry: self.registry,
      keyed_lock: KeyedLock::new(),
      pending_loads: Mutex::new(Default::default()),
      sweeper,
      janitor,
    })
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.name.trim().is_empty() {
      return Err(BuildError::EmptyName);
    }
    if self.sweeper && self.sweep_interval.is_zero() {
      return Err(BuildError::ZeroSweepInterval);
    }
    Ok(())
  }
}
