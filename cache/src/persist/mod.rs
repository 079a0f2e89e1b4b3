//! Durable mirroring of cache entries.
//!
//! A [`PersistedStore`] keeps the durable twins of every entry added with
//! `persist` set, grouped by cache instance name. The cache writes through it
//! synchronously and reloads from it on construction.

mod durable;
mod entry;
mod json;
mod memory;

pub(crate) use durable::Durable;
pub use entry::PersistedEntry;
pub use json::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::PersistError;
use crate::key::KeyComparison;

/// A durable key/value mirror, partitioned by cache instance name.
///
/// Implementations must be safe to call from many threads at once. Errors are
/// reported, never panicked on; the cache logs and otherwise ignores them.
pub trait PersistedStore: Send + Sync + 'static {
  /// Returns every record stored for `name`.
  ///
  /// Unreadable storage should be reported as empty rather than as an error.
  fn get_all(&self, name: &str) -> Result<Vec<PersistedEntry>, PersistError>;

  /// Stores `entry`, replacing any record whose key matches `key` under
  /// `comparison`.
  fn insert_or_replace(
    &self,
    name: &str,
    key: &str,
    comparison: KeyComparison,
    entry: PersistedEntry,
  ) -> Result<(), PersistError>;

  /// Deletes the records matching any of `keys` under `comparison`.
  fn delete(&self, name: &str, comparison: KeyComparison, keys: &[String])
    -> Result<(), PersistError>;

  /// Deletes every record stored for `name`.
  fn clear(&self, name: &str) -> Result<(), PersistError>;
}
