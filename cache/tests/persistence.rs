mod common;

use common::{init_tracing, test_builder};
use fibre_memcore::{
  CacheBuilder, EntryOptions, Expiration, JsonFileStore, ManualClock, MemoryStore, PersistedStore,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

fn secs(n: u64) -> Duration {
  Duration::from_secs(n)
}

fn persisted() -> EntryOptions {
  EntryOptions::new().persist(true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
  name: String,
  visits: u32,
}

#[test]
fn test_json_file_round_trip_across_instances() {
  init_tracing();
  let dir = tempfile::tempdir().unwrap();
  let clock = ManualClock::new();
  let profile = Profile {
    name: "alice".to_string(),
    visits: 3,
  };

  {
    let cache = CacheBuilder::new()
      .name("profiles")
      .clock(clock.clone())
      .persistence_dir(dir.path())
      .disable_sweeper()
      .build()
      .unwrap();
    cache
      .add_with(
        "user:1",
        profile.clone(),
        Expiration::Absolute(secs(600)),
        persisted().tag("users"),
      )
      .unwrap();
    cache.add("memory-only", 1i64, secs(600)).unwrap();
  }
  assert!(dir.path().join("profiles.json").exists());

  clock.advance_wall(secs(60));
  let cache = CacheBuilder::new()
    .name("profiles")
    .clock(clock.clone())
    .persistence_dir(dir.path())
    .disable_sweeper()
    .register_type::<Profile>()
    .build()
    .unwrap();

  assert_eq!(*cache.get::<Profile>("user:1").unwrap().unwrap(), profile);
  assert!(cache.exists_tag("users"));
  assert!(!cache.exists("memory-only").unwrap());

  // 600s were written, 60s passed while no instance was running.
  clock.advance(secs(539));
  assert!(cache.exists("user:1").unwrap());
  clock.advance(secs(1));
  assert!(!cache.exists("user:1").unwrap());
}

#[test]
fn test_expired_records_are_dropped_on_reload() {
  let store = MemoryStore::new();
  let clock = ManualClock::new();

  {
    let cache = test_builder(&clock, &store).build().unwrap();
    cache
      .add_with("short", 1i64, Expiration::Absolute(secs(10)), persisted())
      .unwrap();
    cache
      .add_with("long", 2i64, Expiration::Absolute(secs(100)), persisted())
      .unwrap();
  }
  assert_eq!(store.len(fibre_memcore::DEFAULT_NAME), 2);

  clock.advance_wall(secs(30));
  let cache = test_builder(&clock, &store).build().unwrap();

  assert!(!cache.exists("short").unwrap());
  assert_eq!(*cache.get::<i64>("long").unwrap().unwrap(), 2);
  assert_eq!(store.len(fibre_memcore::DEFAULT_NAME), 1, "the stale record was deleted");
}

#[test]
fn test_sliding_entries_revive_with_their_window() {
  let store = MemoryStore::new();
  let clock = ManualClock::new();

  {
    let cache = test_builder(&clock, &store).build().unwrap();
    cache
      .add_with(
        "session",
        "token".to_string(),
        Expiration::sliding_capped(secs(10), secs(100)),
        persisted(),
      )
      .unwrap();
    clock.advance(secs(5));
    // The read moves the deadline, and the twin follows it.
    assert!(cache.exists("session").unwrap());
  }

  // Past the original deadline, but not the touched one.
  clock.advance_wall(secs(8));
  let cache = test_builder(&clock, &store).build().unwrap();
  assert!(cache.exists("session").unwrap(), "the touched deadline was persisted");

  // Still sliding after the restart.
  clock.advance(secs(9));
  assert!(cache.exists("session").unwrap());
  clock.advance(secs(10));
  assert!(!cache.exists("session").unwrap());
}

#[test]
fn test_removals_reach_the_durable_store() {
  let store = MemoryStore::new();
  let clock = ManualClock::new();
  let cache = test_builder(&clock, &store).build().unwrap();
  let name = cache.name().to_string();
  let ttl = Expiration::Absolute(secs(60));

  cache.add_with("a", 1i64, ttl, persisted()).unwrap();
  cache.add_with("b", 2i64, ttl, persisted().tag("t")).unwrap();
  cache.add_with("c", 3i64, ttl, persisted().tag("t")).unwrap();
  cache.add_with("d", 4i64, ttl, persisted()).unwrap();
  assert_eq!(store.len(&name), 4);

  cache.remove("a").unwrap();
  assert_eq!(store.len(&name), 3);

  cache.remove_tag("t");
  assert_eq!(store.len(&name), 1);

  // Replacing with a memory-only value drops the twin.
  cache.add("d", 5i64, secs(60)).unwrap();
  assert!(store.is_empty(&name));

  cache.add_with("e", 6i64, ttl, persisted()).unwrap();
  cache.clear();
  assert!(store.is_empty(&name));
}

#[test]
fn test_read_evicting_expired_entry_deletes_its_twin() {
  let store = MemoryStore::new();
  let clock = ManualClock::new();
  let cache = test_builder(&clock, &store).build().unwrap();

  cache
    .add_with("k", 1i64, Expiration::Absolute(secs(5)), persisted())
    .unwrap();
  clock.advance(secs(5));

  assert!(!cache.exists("k").unwrap());
  assert!(store.is_empty(cache.name()));
}

#[test]
fn test_instances_with_different_names_are_isolated() {
  let store = MemoryStore::new();
  let clock = ManualClock::new();

  let first = test_builder(&clock, &store).name("first").build().unwrap();
  first
    .add_with("k", 1i64, Expiration::Absolute(secs(60)), persisted())
    .unwrap();

  let second = test_builder(&clock, &store).name("second").build().unwrap();
  assert!(!second.exists("k").unwrap());

  second.clear();
  assert_eq!(store.len("first"), 1);
}

#[test]
fn test_corrupt_file_is_discarded() {
  init_tracing();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("broken.json");
  fs::write(&path, "{ this is not json").unwrap();

  let cache = CacheBuilder::new()
    .name("broken")
    .persistence_dir(dir.path())
    .disable_sweeper()
    .build()
    .unwrap();

  assert_eq!(cache.count(), 0);
  assert!(!path.exists(), "the corrupt file was removed");

  cache
    .add_with("k", 1i64, Expiration::Absolute(secs(60)), persisted())
    .unwrap();
  assert!(path.exists());
}

#[test]
fn test_binary_garbage_file_is_discarded() {
  init_tracing();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("bin.json");
  fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();
  let clock = ManualClock::new();

  {
    let cache = CacheBuilder::new()
      .name("bin")
      .clock(clock.clone())
      .persistence_dir(dir.path())
      .disable_sweeper()
      .build()
      .unwrap();
    assert!(!path.exists(), "the unreadable file was removed");

    cache
      .add_with("k", 1i64, Expiration::Absolute(secs(60)), persisted())
      .unwrap();
    let metrics = cache.metrics();
    assert_eq!(metrics.durable_writes, 1);
    assert_eq!(metrics.durable_failures, 0);
  }

  let cache = CacheBuilder::new()
    .name("bin")
    .clock(clock)
    .persistence_dir(dir.path())
    .disable_sweeper()
    .build()
    .unwrap();
  assert_eq!(*cache.get::<i64>("k").unwrap().unwrap(), 1);
}

#[test]
fn test_named_types_persist_under_their_stable_name() {
  let store = MemoryStore::new();
  let clock = ManualClock::new();
  let profile = Profile {
    name: "bob".to_string(),
    visits: 7,
  };

  {
    let cache = test_builder(&clock, &store)
      .register_type_as::<Profile>("profile.v1")
      .build()
      .unwrap();
    cache
      .add_with("p", profile.clone(), Expiration::Absolute(secs(60)), persisted())
      .unwrap();
  }
  let records = store.get_all(fibre_memcore::DEFAULT_NAME).unwrap();
  assert_eq!(records[0].value_type, "profile.v1");

  let cache = test_builder(&clock, &store)
    .register_type_as::<Profile>("profile.v1")
    .build()
    .unwrap();
  assert_eq!(*cache.get::<Profile>("p").unwrap().unwrap(), profile);
}

#[test]
fn test_unregistered_type_is_skipped_on_load() {
  #[derive(Serialize, Deserialize)]
  struct Unregistered(u8);

  let store = MemoryStore::new();
  let clock = ManualClock::new();
  {
    let cache = test_builder(&clock, &store).build().unwrap();
    cache
      .add_with("odd", Unregistered(1), Expiration::Absolute(secs(60)), persisted())
      .unwrap();
    cache
      .add_with("plain", 2i64, Expiration::Absolute(secs(60)), persisted())
      .unwrap();
  }

  let cache = test_builder(&clock, &store).build().unwrap();
  assert!(!cache.exists("odd").unwrap());
  assert!(cache.exists("plain").unwrap());
}

#[test]
fn test_custom_store_is_used_through_the_trait() {
  let store = MemoryStore::new();
  let clock = ManualClock::new();
  let cache = test_builder(&clock, &store).name("custom").build().unwrap();

  cache
    .add_with("k", vec!["a".to_string()], Expiration::Absolute(secs(60)), persisted())
    .unwrap();

  let records = store.get_all("custom").unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].key, "k");
  assert_eq!(records[0].value, serde_json::json!(["a"]));
  assert!(records[0].sliding_expiration.is_none());
}

#[test]
fn test_json_store_writes_camel_case_records() {
  let dir = tempfile::tempdir().unwrap();
  let path = JsonFileStore::new(dir.path()).path_for("layout");
  let clock = ManualClock::new();
  let cache = test_builder(&clock, &MemoryStore::new())
    .persisted_store(JsonFileStore::new(dir.path()))
    .name("layout")
    .build()
    .unwrap();

  cache
    .add_with(
      "k",
      1i64,
      Expiration::sliding(secs(30)),
      persisted().tag("t"),
    )
    .unwrap();

  let raw = fs::read_to_string(path).unwrap();
  let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
  let record = &json[0];
  assert_eq!(record["key"], "k");
  assert_eq!(record["value"], 1);
  assert_eq!(record["slidingExpiration"], 30_000);
  assert_eq!(record["tags"], serde_json::json!(["t"]));
  assert!(record["expiresAt"].is_string());
}
