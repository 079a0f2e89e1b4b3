mod common;

use common::{init_tracing, test_builder};
use fibre_memcore::{CacheBuilder, EntryOptions, Expiration, ManualClock, MemoryStore};
use std::thread;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_millis(20);
const SLEEP_MARGIN: Duration = Duration::from_millis(200);

#[test]
fn test_sweeper_evicts_expired_entries_in_background() {
  init_tracing();
  let store = MemoryStore::new();
  let cache = CacheBuilder::new()
    .persisted_store(store.clone())
    .sweep_interval(SWEEP_INTERVAL)
    .build()
    .unwrap();

  cache
    .add_with(
      "short",
      1i64,
      Expiration::Absolute(Duration::from_millis(30)),
      EntryOptions::new().persist(true),
    )
    .unwrap();
  cache.add("long", 2i64, Duration::from_secs(60)).unwrap();
  assert_eq!(store.len(cache.name()), 1);

  thread::sleep(Duration::from_millis(30) + SLEEP_MARGIN);

  // Nothing read the entry, so only the sweeper can have removed it.
  assert_eq!(cache.count(), 1);
  assert!(store.is_empty(cache.name()));
  assert_eq!(cache.metrics().expirations, 1);
}

#[test]
fn test_sweep_never_extends_sliding_entries() {
  let clock = ManualClock::new();
  let cache = test_builder(&clock, &MemoryStore::new()).build().unwrap();
  cache.add_sliding("s", 1i64, Duration::from_secs(10)).unwrap();

  clock.advance(Duration::from_secs(4));
  assert_eq!(cache.sweep_expired(), 0);
  clock.advance(Duration::from_secs(4));
  assert_eq!(cache.sweep_expired(), 0);

  // Only reads slide the window, so the entry dies 10s after the write.
  clock.advance(Duration::from_secs(2));
  assert_eq!(cache.sweep_expired(), 1);
  assert_eq!(cache.count(), 0);
}

#[test]
fn test_dropping_the_last_handle_stops_the_sweeper() {
  let cache = CacheBuilder::new()
    .persisted_store(MemoryStore::new())
    .sweep_interval(Duration::from_secs(3600))
    .build_async()
    .unwrap();
  let sync = cache.to_sync();
  drop(cache);
  sync.add("k", 1i64, Duration::from_secs(1)).unwrap();

  // Must return promptly even though the interval is an hour.
  drop(sync);
}
