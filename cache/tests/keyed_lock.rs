use fibre_memcore::{KeyedLock, LockError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_holders_of_one_key_never_overlap() {
  let lock = Arc::new(KeyedLock::<String>::new());
  let inside = Arc::new(AtomicUsize::new(0));
  let max_inside = Arc::new(AtomicUsize::new(0));

  let handles: Vec<_> = (0..8)
    .map(|_| {
      let lock = lock.clone();
      let inside = inside.clone();
      let max_inside = max_inside.clone();
      thread::spawn(move || {
        for _ in 0..20 {
          let _guard = lock.acquire(&"shared".to_string());
          let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
          max_inside.fetch_max(now, Ordering::SeqCst);
          thread::yield_now();
          inside.fetch_sub(1, Ordering::SeqCst);
        }
      })
    })
    .collect();
  for handle in handles {
    handle.join().unwrap();
  }

  assert_eq!(max_inside.load(Ordering::SeqCst), 1);
  assert!(lock.is_empty(), "no item outlives its last holder");
}

#[test]
fn test_try_and_timed_acquire() {
  let lock = KeyedLock::new();
  let guard = lock.try_acquire(&1u32).unwrap();
  assert_eq!(guard.key(), Some(&1));
  assert!(lock.is_locked(&1));

  assert_eq!(lock.try_acquire(&1).unwrap_err(), LockError::NotAcquired);
  assert_eq!(
    lock
      .acquire_timeout(&1, Duration::from_millis(10))
      .unwrap_err(),
    LockError::NotAcquired
  );
  assert_eq!(lock.len(), 1, "failed attempts leave no trace");

  // A different key is independent.
  let other = lock.try_acquire(&2).unwrap();
  assert_eq!(lock.len(), 2);

  guard.release();
  drop(other);
  assert!(lock.is_empty());
}

#[test]
fn test_waiter_is_woken_on_release() {
  let lock = Arc::new(KeyedLock::new());
  let guard = lock.acquire(&"k");

  let waiter = {
    let lock = lock.clone();
    thread::spawn(move || {
      let guard = lock
        .acquire_timeout(&"k", Duration::from_secs(5))
        .expect("woken before the timeout");
      guard.release();
    })
  };

  thread::sleep(Duration::from_millis(20));
  drop(guard);
  waiter.join().unwrap();
  assert!(lock.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_acquire_and_timeout() {
  let lock = Arc::new(KeyedLock::new());
  let guard = lock.acquire_async(&"k").await;

  let timed_out = lock
    .acquire_async_timeout(&"k", Duration::from_millis(10))
    .await;
  assert!(matches!(timed_out, Err(LockError::NotAcquired)));

  let waiter = {
    let lock = lock.clone();
    tokio::spawn(async move {
      let guard = lock.acquire_async(&"k").await;
      guard.release();
    })
  };

  tokio::time::sleep(Duration::from_millis(20)).await;
  drop(guard);
  waiter.await.unwrap();
  assert!(lock.is_empty());
}
