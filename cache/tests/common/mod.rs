#![allow(dead_code)]

use std::sync::Once;

use fibre_memcore::{AsyncCache, Cache, CacheBuilder, ManualClock, MemoryStore};

static TRACING: Once = Once::new();

/// Routes cache logs to the test output. Set `RUST_LOG=fibre_memcore=trace`
/// to see them.
pub fn init_tracing() {
  TRACING.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  });
}

/// A builder with a manual clock, an in-memory durable store, and no
/// background sweeper, so tests control every eviction.
pub fn test_builder(clock: &ManualClock, store: &MemoryStore) -> CacheBuilder {
  init_tracing();
  CacheBuilder::new()
    .clock(clock.clone())
    .persisted_store(store.clone())
    .disable_sweeper()
}

pub fn build_test_cache(clock: &ManualClock) -> Cache {
  test_builder(clock, &MemoryStore::new()).build().unwrap()
}

pub fn build_async_test_cache(clock: &ManualClock) -> AsyncCache {
  test_builder(clock, &MemoryStore::new()).build_async().unwrap()
}
