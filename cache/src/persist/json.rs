use super::{PersistedEntry, PersistedStore};
use crate::error::PersistError;
use crate::key::KeyComparison;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::HashMap;
use parking_lot::Mutex;

/// Stores each cache instance as a JSON array in `{dir}/{name}.json`.
///
/// Every mutation reads the whole file, changes it, and writes it back via a
/// temporary file and a rename, all under one lock per instance name. A file
/// that cannot be parsed is deleted and treated as empty.
#[derive(Debug)]
pub struct JsonFileStore {
  dir: PathBuf,
  locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonFileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      locks: Mutex::new(HashMap::default()),
    }
  }

  /// A store rooted next to the running executable, or in the current
  /// directory if that cannot be determined.
  pub fn beside_executable() -> Self {
    Self::new(default_dir())
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// The file backing instance `name`.
  pub fn path_for(&self, name: &str) -> PathBuf {
    self.dir.join(format!("{name}.json"))
  }

  fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
    self
      .locks
      .lock()
      .entry(name.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }

  fn read(&self, path: &Path) -> Result<Vec<PersistedEntry>, PersistError> {
    let content = match fs::read(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let records: Vec<serde_json::Value> = match serde_json::from_slice(&content) {
      Ok(records) => records,
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "durable file is corrupt, discarding it");
        remove_if_exists(path)?;
        return Ok(Vec::new());
      }
    };

    let total = records.len();
    let entries: Vec<PersistedEntry> = records
      .into_iter()
      .filter_map(|record| match serde_json::from_value(record) {
        Ok(entry) => Some(entry),
        Err(e) => {
          tracing::warn!(path = %path.display(), error = %e, "skipping malformed durable record");
          None
        }
      })
      .collect();
    if entries.len() != total {
      tracing::debug!(path = %path.display(), skipped = total - entries.len(), "durable file had malformed records");
    }
    Ok(entries)
  }

  fn write(&self, path: &Path, entries: &[PersistedEntry]) -> Result<(), PersistError> {
    if entries.is_empty() {
      return remove_if_exists(path);
    }
    fs::create_dir_all(&self.dir)?;

    let json = serde_json::to_vec(entries)?;
    let tmp = path.with_extension("json.tmp");
    {
      let mut file = fs::File::create(&tmp)?;
      file.write_all(&json)?;
      file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
  }
}

impl Default for JsonFileStore {
  fn default() -> Self {
    Self::beside_executable()
  }
}

impl PersistedStore for JsonFileStore {
  fn get_all(&self, name: &str) -> Result<Vec<PersistedEntry>, PersistError> {
    let lock = self.lock_for(name);
    let _guard = lock.lock();
    self.read(&self.path_for(name))
  }

  fn insert_or_replace(
    &self,
    name: &str,
    key: &str,
    comparison: KeyComparison,
    entry: PersistedEntry,
  ) -> Result<(), PersistError> {
    let lock = self.lock_for(name);
    let _guard = lock.lock();
    let path = self.path_for(name);

    let mut entries = self.read(&path)?;
    entries.retain(|existing| !comparison.matches(&existing.key, key));
    entries.push(entry);
    self.write(&path, &entries)
  }

  fn delete(
    &self,
    name: &str,
    comparison: KeyComparison,
    keys: &[String],
  ) -> Result<(), PersistError> {
    if keys.is_empty() {
      return Ok(());
    }
    let lock = self.lock_for(name);
    let _guard = lock.lock();
    let path = self.path_for(name);

    let mut entries = self.read(&path)?;
    let before = entries.len();
    entries.retain(|existing| !keys.iter().any(|key| comparison.matches(&existing.key, key)));
    if entries.len() == before {
      return Ok(());
    }
    self.write(&path, &entries)
  }

  fn clear(&self, name: &str) -> Result<(), PersistError> {
    let lock = self.lock_for(name);
    let _guard = lock.lock();
    remove_if_exists(&self.path_for(name))
  }
}

fn remove_if_exists(path: &Path) -> Result<(), PersistError> {
  match fs::remove_file(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e.into()),
  }
}

fn default_dir() -> PathBuf {
  std::env::current_exe()
    .ok()
    .and_then(|exe| exe.parent().map(Path::to_path_buf))
    .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, Utc};

  fn record(key: &str, value: i64) -> PersistedEntry {
    PersistedEntry {
      key: key.into(),
      value: serde_json::json!(value),
      value_type: "i64".into(),
      tags: None,
      expires_at: Utc::now() + Duration::minutes(5),
      absolute_expiration: None,
      sliding_expiration: None,
    }
  }

  #[test]
  fn missing_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path());
    assert!(store.get_all("nothing").unwrap().is_empty());
  }

  #[test]
  fn insert_replaces_matching_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path());
    let cmp = KeyComparison::OrdinalIgnoreCase;

    store.insert_or_replace("c", "a", cmp, record("a", 1)).unwrap();
    store.insert_or_replace("c", "b", cmp, record("b", 2)).unwrap();
    store.insert_or_replace("c", "A", cmp, record("A", 3)).unwrap();

    let all = store.get_all("c").unwrap();
    assert_eq!(all.len(), 2);
    let a = all.iter().find(|e| e.key == "A").unwrap();
    assert_eq!(a.value, serde_json::json!(3));
  }

  #[test]
  fn delete_and_clear_remove_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path());
    let cmp = KeyComparison::Ordinal;
    for key in ["a", "b", "c"] {
      store.insert_or_replace("c", key, cmp, record(key, 0)).unwrap();
    }

    store.delete("c", cmp, &["a".into(), "c".into()]).unwrap();
    let keys: Vec<_> = store.get_all("c").unwrap().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, ["b"]);

    store.clear("c").unwrap();
    assert!(!store.path_for("c").exists());
    assert!(store.get_all("c").unwrap().is_empty());
  }

  #[test]
  fn instances_use_separate_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path());
    let cmp = KeyComparison::Ordinal;
    store.insert_or_replace("one", "k", cmp, record("k", 1)).unwrap();
    store.insert_or_replace("two", "k", cmp, record("k", 2)).unwrap();
    store.clear("one").unwrap();
    assert_eq!(store.get_all("two").unwrap().len(), 1);
  }

  #[test]
  fn corrupt_file_is_wiped() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path());
    fs::write(store.path_for("c"), "{not json").unwrap();

    assert!(store.get_all("c").unwrap().is_empty());
    assert!(!store.path_for("c").exists());

    fs::write(store.path_for("c"), "").unwrap();
    assert!(store.get_all("c").unwrap().is_empty());
  }

  #[test]
  fn non_utf8_file_is_wiped() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path());
    fs::write(store.path_for("c"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

    assert!(store.get_all("c").unwrap().is_empty());
    assert!(!store.path_for("c").exists());

    fs::write(store.path_for("c"), [0xff, 0xfe]).unwrap();
    store
      .insert_or_replace("c", "k", KeyComparison::Ordinal, record("k", 1))
      .unwrap();
    assert_eq!(store.get_all("c").unwrap().len(), 1);
  }

  #[test]
  fn malformed_records_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path());
    let good = serde_json::to_value(record("good", 1)).unwrap();
    let content = serde_json::json!([good, {"key": "bad"}]);
    fs::write(store.path_for("c"), content.to_string()).unwrap();

    let all = store.get_all("c").unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].key, "good");
  }
}
