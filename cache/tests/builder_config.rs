mod common;

use common::init_tracing;
use fibre_memcore::{BuildError, CacheBuilder, CacheConfig, MemoryStore, DEFAULT_NAME};

#[test]
fn test_builder_defaults() {
  let cache = CacheBuilder::default()
    .persisted_store(MemoryStore::new())
    .build()
    .unwrap();
  assert_eq!(cache.name(), DEFAULT_NAME);
  assert_eq!(cache.count(), 0);
}

#[test]
fn test_builder_from_json_config() {
  init_tracing();
  let dir = tempfile::tempdir().unwrap();
  let json = format!(
    r#"{{ "name": "orders", "ignore_case": true, "sweep_interval": "50ms", "persistence_dir": {:?} }}"#,
    dir.path().to_str().unwrap()
  );
  let config = CacheConfig::from_json(&json).unwrap();
  let cache = CacheBuilder::from_config(&config).unwrap().build().unwrap();

  assert_eq!(cache.name(), "orders");
  cache.add("Order:1", 1i64, std::time::Duration::from_secs(60)).unwrap();
  assert!(cache.exists("order:1").unwrap(), "ignore_case was applied");
}

#[test]
fn test_invalid_config_is_rejected() {
  let config = CacheConfig {
    sweep_interval: Some("soon".to_string()),
    ..CacheConfig::default()
  };
  assert!(matches!(
    CacheBuilder::from_config(&config),
    Err(BuildError::InvalidConfig(_))
  ));

  let config = CacheConfig {
    name: Some("".to_string()),
    sweeper: false,
    ..CacheConfig::default()
  };
  let err = CacheBuilder::from_config(&config)
    .unwrap()
    .persisted_store(MemoryStore::new())
    .build()
    .unwrap_err();
  assert_eq!(err, BuildError::EmptyName);
}
