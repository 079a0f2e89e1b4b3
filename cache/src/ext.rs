//! Convenience operations layered on the core cache API.
//!
//! Everything here is expressed through a handful of primitive operations,
//! so [`CacheExt`] works the same on [`Cache`] and [`AsyncCache`].

use crate::entry::{EntryOptions, Expiration};
use crate::error::CacheError;
use crate::handles::{AsyncCache, Cache};
use crate::value::Persistable;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use uuid::Uuid;

/// Prefix reserved for the keys of keyless entries.
pub const KEYLESS_PREFIX: &str = "__memcore_";

fn minutes(minutes: u64) -> Duration {
  Duration::from_secs(minutes.saturating_mul(60))
}

fn keyless_key(id: Uuid) -> String {
  format!("{KEYLESS_PREFIX}{id}")
}

/// Extension methods available on every cache handle.
///
/// Bulk removals look at a snapshot of the live keys (or tags) and remove
/// them one by one. Entries added while a bulk removal runs may survive it.
pub trait CacheExt {
  // --- Primitives ---

  fn add_with<V: Persistable>(
    &self,
    key: &str,
    value: V,
    expiration: Expiration,
    options: EntryOptions,
  ) -> Result<(), CacheError>;

  fn get<V: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<V>>, CacheError>;

  fn exists(&self, key: &str) -> Result<bool, CacheError>;

  fn remove(&self, key: &str) -> Result<bool, CacheError>;

  fn keys(&self) -> Vec<String>;

  fn remove_tag(&self, tag: &str) -> usize;

  fn tags(&self) -> Vec<String>;

  // --- Minute-based writes ---

  /// Adds `value` for a whole number of minutes.
  fn add_minutes<V: Persistable>(
    &self,
    key: &str,
    value: V,
    ttl_minutes: u64,
    options: EntryOptions,
  ) -> Result<(), CacheError> {
    self.add_with(key, value, Expiration::Absolute(minutes(ttl_minutes)), options)
  }

  /// Adds `value` with a sliding window of whole minutes, optionally capped
  /// by an absolute lifetime.
  fn add_sliding_minutes<V: Persistable>(
    &self,
    key: &str,
    value: V,
    sliding_minutes: u64,
    ceiling: Option<Duration>,
    options: EntryOptions,
  ) -> Result<(), CacheError> {
    let sliding = minutes(sliding_minutes);
    let expiration = match ceiling {
      Some(ceiling) => Expiration::sliding_capped(sliding, ceiling),
      None => Expiration::sliding(sliding),
    };
    self.add_with(key, value, expiration, options)
  }

  // --- Bulk key removal ---

  /// Removes each of `keys`. Returns how many entries were removed.
  fn remove_keys<I, S>(&self, keys: I) -> Result<usize, CacheError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut removed = 0;
    for key in keys {
      if self.remove(key.as_ref())? {
        removed += 1;
      }
    }
    Ok(removed)
  }

  /// Removes every entry whose key starts with `prefix`, compared ordinally.
  fn remove_by_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
    let matching: Vec<String> = self
      .keys()
      .into_iter()
      .filter(|key| key.starts_with(prefix))
      .collect();
    self.remove_keys(matching)
  }

  /// Removes every entry whose key matches `pattern`.
  fn remove_matching(&self, pattern: &Regex) -> Result<usize, CacheError> {
    let matching: Vec<String> = self
      .keys()
      .into_iter()
      .filter(|key| pattern.is_match(key))
      .collect();
    self.remove_keys(matching)
  }

  // --- Bulk tag removal ---

  /// Removes every entry carrying any of `tags`.
  fn remove_tags<I, S>(&self, tags: I) -> usize
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    tags
      .into_iter()
      .map(|tag| self.remove_tag(tag.as_ref()))
      .sum()
  }

  /// Removes every entry carrying a tag that starts with `prefix`.
  fn remove_tags_by_prefix(&self, prefix: &str) -> usize {
    let matching: Vec<String> = self
      .tags()
      .into_iter()
      .filter(|tag| tag.starts_with(prefix))
      .collect();
    self.remove_tags(matching)
  }

  /// Removes every entry carrying a tag that matches `pattern`.
  fn remove_tags_matching(&self, pattern: &Regex) -> usize {
    let matching: Vec<String> = self
      .tags()
      .into_iter()
      .filter(|tag| pattern.is_match(tag))
      .collect();
    self.remove_tags(matching)
  }

  // --- Keyless entries ---

  /// Stores `value` under a freshly generated id and returns the id.
  fn add_keyless<V: Persistable>(
    &self,
    value: V,
    ttl: Duration,
    options: EntryOptions,
  ) -> Result<Uuid, CacheError> {
    let id = Uuid::new_v4();
    self.add_with(&keyless_key(id), value, Expiration::Absolute(ttl), options)?;
    Ok(id)
  }

  fn add_sliding_keyless<V: Persistable>(
    &self,
    value: V,
    expiration: Expiration,
    options: EntryOptions,
  ) -> Result<Uuid, CacheError> {
    let id = Uuid::new_v4();
    self.add_with(&keyless_key(id), value, expiration, options)?;
    Ok(id)
  }

  fn get_keyless<V: Any + Send + Sync>(&self, id: Uuid) -> Result<Option<Arc<V>>, CacheError> {
    self.get(&keyless_key(id))
  }

  fn exists_keyless(&self, id: Uuid) -> Result<bool, CacheError> {
    self.exists(&keyless_key(id))
  }

  fn remove_keyless(&self, id: Uuid) -> Result<bool, CacheError> {
    self.remove(&keyless_key(id))
  }

  /// Removes every keyless entry, leaving keyed entries alone.
  fn clear_keyless(&self) -> Result<usize, CacheError> {
    self.remove_by_prefix(KEYLESS_PREFIX)
  }
}

macro_rules! impl_cache_ext {
  ($handle:ty) => {
    impl CacheExt for $handle {
      fn add_with<V: Persistable>(
        &self,
        key: &str,
        value: V,
        expiration: Expiration,
        options: EntryOptions,
      ) -> Result<(), CacheError> {
        <$handle>::add_with(self, key, value, expiration, options)
      }

      fn get<V: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<V>>, CacheError> {
        <$handle>::get(self, key)
      }

      fn exists(&self, key: &str) -> Result<bool, CacheError> {
        <$handle>::exists(self, key)
      }

      fn remove(&self, key: &str) -> Result<bool, CacheError> {
        <$handle>::remove(self, key)
      }

      fn keys(&self) -> Vec<String> {
        <$handle>::keys(self)
      }

      fn remove_tag(&self, tag: &str) -> usize {
        <$handle>::remove_tag(self, tag)
      }

      fn tags(&self) -> Vec<String> {
        <$handle>::tags(self)
      }
    }
  };
}

impl_cache_ext!(Cache);
impl_cache_ext!(AsyncCache);
