use super::{PersistedEntry, PersistedStore};
use crate::clock::{as_nanos, Clock};
use crate::entry::{clean_tags, CacheEntry};
use crate::error::PersistError;
use crate::key::KeyComparison;
use crate::metrics::Metrics;
use crate::value::TypeRegistry;

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Writes entries through to a `PersistedStore` on behalf of one cache
/// instance, translating between monotonic deadlines and wall-clock
/// timestamps. Store failures are logged and counted, never returned.
pub(crate) struct Durable {
  name: String,
  store: Arc<dyn PersistedStore>,
  comparison: KeyComparison,
  clock: Arc<dyn Clock>,
  metrics: Arc<Metrics>,
}

impl fmt::Debug for Durable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Durable")
      .field("name", &self.name)
      .field("comparison", &self.comparison)
      .finish_non_exhaustive()
  }
}

/// Converts a deadline on the monotonic clock into a wall-clock timestamp.
fn to_wall(deadline: u64, now: u64, wall_now: DateTime<Utc>) -> DateTime<Utc> {
  let remaining = deadline.saturating_sub(now);
  wall_now + chrono::Duration::nanoseconds(i64::try_from(remaining).unwrap_or(i64::MAX))
}

/// Converts a wall-clock timestamp into a deadline on the monotonic clock.
/// Returns `None` if the timestamp is not in the future.
fn to_deadline(at: DateTime<Utc>, now: Duration, wall_now: DateTime<Utc>) -> u64 {
  let remaining = (at - wall_now).to_std().unwrap_or_default();
  as_nanos(now.saturating_add(remaining))
}

impl Durable {
  pub(crate) fn new(
    name: String,
    store: Arc<dyn PersistedStore>,
    comparison: KeyComparison,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
  ) -> Self {
    Self {
      name,
      store,
      comparison,
      clock,
      metrics,
    }
  }

  fn record(&self, op: &'static str, result: Result<(), PersistError>) {
    match result {
      Ok(()) => {
        self.metrics.durable_writes.fetch_add(1, Ordering::Relaxed);
      }
      Err(e) => {
        self.metrics.durable_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(cache = %self.name, op, error = %e, "durable store operation failed");
      }
    }
  }

  fn to_persisted(&self, entry: &CacheEntry) -> Option<PersistedEntry> {
    let value = match entry.value().encode()? {
      Ok(value) => value,
      Err(e) => {
        tracing::warn!(cache = %self.name, key = %entry.key(), error = %e, "failed to encode value, not persisting");
        return None;
      }
    };

    let now = as_nanos(self.clock.now());
    let wall_now = self.clock.wall_now();
    Some(PersistedEntry {
      key: entry.key().to_string(),
      value,
      value_type: entry.value().descriptor().to_string(),
      tags: (!entry.tags().is_empty()).then(|| entry.tags().to_vec()),
      expires_at: to_wall(entry.deadline(), now, wall_now),
      absolute_expiration: entry.ceiling().map(|c| to_wall(c, now, wall_now)),
      sliding_expiration: entry
        .sliding()
        .map(|s| u64::try_from(s.as_millis()).unwrap_or(u64::MAX)),
    })
  }

  /// Writes the durable twin of `entry`, if it is persistent and still live.
  pub(crate) fn write(&self, entry: &CacheEntry) {
    if !entry.persist() || entry.is_expired(self.clock.now()) {
      return;
    }
    if !entry.value().is_persistable() {
      tracing::warn!(cache = %self.name, key = %entry.key(), type_name = entry.value().type_name(), "value has no serialized form, not persisting");
      return;
    }
    let Some(record) = self.to_persisted(entry) else {
      return;
    };
    let result = self
      .store
      .insert_or_replace(&self.name, entry.key(), self.comparison, record);
    self.record("insert_or_replace", result);
  }

  /// Deletes the twins of `keys` in one store call.
  pub(crate) fn delete(&self, keys: Vec<String>) {
    if keys.is_empty() {
      return;
    }
    let result = self.store.delete(&self.name, self.comparison, &keys);
    self.record("delete", result);
  }

  pub(crate) fn clear(&self) {
    let result = self.store.clear(&self.name);
    self.record("clear", result);
  }

  /// Reads every twin back and rebuilds the live ones.
  ///
  /// Records that are already expired are deleted from the store in a single
  /// batch. Records whose type cannot be decoded are skipped and left alone.
  pub(crate) fn load(&self, registry: &TypeRegistry) -> Vec<CacheEntry> {
    let records = match self.store.get_all(&self.name) {
      Ok(records) => records,
      Err(e) => {
        self.metrics.durable_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(cache = %self.name, error = %e, "failed to read durable store, starting empty");
        return Vec::new();
      }
    };

    let now = self.clock.now();
    let wall_now = self.clock.wall_now();
    let total = records.len();
    let mut expired = Vec::new();
    let mut skipped = 0usize;
    let mut revived = Vec::with_capacity(total);

    for record in records {
      if record.key.is_empty() {
        skipped += 1;
        continue;
      }
      if record.is_expired_at(wall_now) {
        expired.push(record.key);
        continue;
      }
      let deadline = to_deadline(record.expires_at, now, wall_now);
      let ceiling = record
        .absolute_expiration
        .map(|at| to_deadline(at, now, wall_now));

      let value = match registry.decode(&record.value_type, record.value) {
        Ok(value) => value,
        Err(e) => {
          skipped += 1;
          tracing::warn!(cache = %self.name, key = %record.key, error = %e, "skipping durable entry that cannot be decoded");
          continue;
        }
      };

      revived.push(CacheEntry::restored(
        record.key,
        value,
        record.tags.and_then(clean_tags),
        deadline,
        ceiling,
        record.sliding_expiration.map(Duration::from_millis),
      ));
    }

    tracing::debug!(
      cache = %self.name,
      total,
      revived = revived.len(),
      expired = expired.len(),
      skipped,
      "loaded durable entries"
    );
    self.delete(expired);
    revived
  }
}
