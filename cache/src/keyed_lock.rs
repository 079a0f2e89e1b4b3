use crate::error::LockError;
use crate::sync::KeySignal;

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::HashMap;
use parking_lot::Mutex;

/// The per-key state: how many callers hold or wait for the key, and the
/// signal they queue on.
struct LockItem {
  // Only mutated while the table lock is held.
  refs: AtomicUsize,
  signal: KeySignal,
}

/// A table of per-key mutual exclusion locks.
///
/// Callers for different keys never wait on each other. The table itself is
/// locked only to create, count, and destroy items; the wait for a contended
/// key happens on that key's own signal. An item is removed as soon as its
/// last holder or waiter is gone, so the table never grows beyond the number
/// of keys currently in use.
pub struct KeyedLock<K> {
  table: Mutex<HashMap<K, Arc<LockItem>>>,
}

impl<K> Default for KeyedLock<K> {
  fn default() -> Self {
    Self {
      table: Mutex::new(HashMap::default()),
    }
  }
}

impl<K> fmt::Debug for KeyedLock<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyedLock")
      .field("keys", &self.table.lock().len())
      .finish()
  }
}

impl<K> KeyedLock<K>
where
  K: Eq + Hash + Clone,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers interest in `key`, creating its item if needed.
  fn enter(&self, key: &K) -> Pending<'_, K> {
    let mut table = self.table.lock();
    let item = table
      .entry(key.clone())
      .or_insert_with(|| {
        Arc::new(LockItem {
          refs: AtomicUsize::new(0),
          signal: KeySignal::new(),
        })
      })
      .clone();
    item.refs.fetch_add(1, Ordering::Relaxed);
    Pending {
      lock: self,
      key: Some(key.clone()),
      item,
    }
  }

  /// Drops one reference to `key`, removing its item at zero.
  fn leave(&self, key: &K, item: &Arc<LockItem>) {
    let mut table = self.table.lock();
    if item.refs.fetch_sub(1, Ordering::Relaxed) == 1 {
      if let Some(current) = table.get(key) {
        if Arc::ptr_eq(current, item) {
          table.remove(key);
        }
      }
    }
  }

  /// Blocks the current thread until `key` is held.
  pub fn acquire(&self, key: &K) -> KeyGuard<'_, K> {
    let pending = self.enter(key);
    pending.item.signal.acquire(None);
    pending.into_guard()
  }

  /// Blocks for at most `timeout` waiting for `key`.
  pub fn acquire_timeout(&self, key: &K, timeout: Duration) -> Result<KeyGuard<'_, K>, LockError> {
    let pending = self.enter(key);
    if pending.item.signal.acquire(Some(Instant::now() + timeout)) {
      Ok(pending.into_guard())
    } else {
      Err(LockError::NotAcquired)
    }
  }

  /// Takes `key` only if nobody else holds it.
  pub fn try_acquire(&self, key: &K) -> Result<KeyGuard<'_, K>, LockError> {
    let pending = self.enter(key);
    if pending.item.signal.try_acquire() {
      Ok(pending.into_guard())
    } else {
      Err(LockError::NotAcquired)
    }
  }

  /// Waits for `key` without blocking the thread.
  ///
  /// Dropping the returned future before it completes gives up the wait and
  /// leaves the key's reference count as it was.
  pub async fn acquire_async(&self, key: &K) -> KeyGuard<'_, K> {
    let pending = self.enter(key);
    pending.item.signal.acquire_async().await;
    pending.into_guard()
  }

  /// Waits at most `timeout` for `key` without blocking the thread.
  pub async fn acquire_async_timeout(
    &self,
    key: &K,
    timeout: Duration,
  ) -> Result<KeyGuard<'_, K>, LockError> {
    tokio::time::timeout(timeout, self.acquire_async(key))
      .await
      .map_err(|_| LockError::NotAcquired)
  }

  /// Returns `true` if any caller holds or waits for `key`.
  pub fn is_locked(&self, key: &K) -> bool {
    self.table.lock().contains_key(key)
  }

  /// The number of keys currently held or waited on.
  pub fn len(&self) -> usize {
    self.table.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// A registered but not yet granted acquisition. Dropping it undoes the
/// registration.
struct Pending<'a, K: Eq + Hash + Clone> {
  lock: &'a KeyedLock<K>,
  key: Option<K>,
  item: Arc<LockItem>,
}

impl<'a, K: Eq + Hash + Clone> Pending<'a, K> {
  fn into_guard(mut self) -> KeyGuard<'a, K> {
    KeyGuard {
      lock: self.lock,
      key: self.key.take(),
      item: self.item.clone(),
    }
  }
}

impl<K: Eq + Hash + Clone> Drop for Pending<'_, K> {
  fn drop(&mut self) {
    if let Some(key) = self.key.take() {
      self.lock.leave(&key, &self.item);
    }
  }
}

/// Proof of exclusive access to one key. The key is released on drop.
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard<'a, K: Eq + Hash + Clone> {
  lock: &'a KeyedLock<K>,
  key: Option<K>,
  item: Arc<LockItem>,
}

impl<K: Eq + Hash + Clone> KeyGuard<'_, K> {
  pub fn key(&self) -> Option<&K> {
    self.key.as_ref()
  }

  /// Releases the key now. Equivalent to dropping the guard.
  pub fn release(self) {}
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<'_, K> {
  fn drop(&mut self) {
    if let Some(key) = self.key.take() {
      self.lock.leave(&key, &self.item);
      self.item.signal.release();
    }
  }
}

impl<K: Eq + Hash + Clone + fmt::Debug> fmt::Debug for KeyGuard<'_, K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyGuard").field("key", &self.key).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Barrier;
  use std::thread;

  #[test]
  fn table_is_emptied_after_release() {
    let lock = KeyedLock::new();
    let guard = lock.acquire(&"a");
    assert!(lock.is_locked(&"a"));
    assert_eq!(lock.len(), 1);
    drop(guard);
    assert!(!lock.is_locked(&"a"));
    assert!(lock.is_empty());
  }

  #[test]
  fn try_acquire_fails_while_held_without_leaking() {
    let lock = KeyedLock::new();
    let guard = lock.acquire(&1);
    assert_eq!(lock.try_acquire(&1).unwrap_err(), LockError::NotAcquired);
    assert!(lock.try_acquire(&2).is_ok());
    guard.release();
    assert!(lock.is_empty());
  }

  #[test]
  fn timeout_does_not_leak_reference() {
    let lock = KeyedLock::new();
    let guard = lock.acquire(&"k");
    assert!(lock.acquire_timeout(&"k", Duration::from_millis(10)).is_err());
    drop(guard);
    assert!(lock.is_empty());
    assert!(lock.try_acquire(&"k").is_ok());
  }

  #[test]
  fn different_keys_do_not_block() {
    let lock = KeyedLock::new();
    let _a = lock.acquire(&"a");
    let b = lock.acquire_timeout(&"b", Duration::from_millis(10));
    assert!(b.is_ok());
  }

  #[test]
  fn contended_key_serializes_holders() {
    const THREADS: usize = 8;
    let lock = Arc::new(KeyedLock::new());
    let active = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
      .map(|_| {
        let lock = lock.clone();
        let active = active.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
          barrier.wait();
          for _ in 0..20 {
            let _guard = lock.acquire(&"shared");
            assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
            thread::yield_now();
            active.fetch_sub(1, Ordering::SeqCst);
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().unwrap();
    }
    assert!(lock.is_empty());
  }

  #[tokio::test]
  async fn cancelled_async_wait_restores_count() {
    let lock = KeyedLock::new();
    let guard = lock.acquire_async(&"k").await;
    let res = lock
      .acquire_async_timeout(&"k", Duration::from_millis(10))
      .await;
    assert_eq!(res.unwrap_err(), LockError::NotAcquired);
    drop(guard);
    assert!(lock.is_empty());
  }
}
