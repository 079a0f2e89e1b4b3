use std::fmt;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
  /// The sweeper was enabled with an interval of zero.
  #[error("sweep interval cannot be zero")]
  ZeroSweepInterval,
  /// The instance name was empty or whitespace only.
  #[error("cache instance name cannot be empty")]
  EmptyName,
  /// A `CacheConfig` value could not be interpreted.
  #[error("invalid cache configuration: {0}")]
  InvalidConfig(String),
}

/// Errors surfaced by the public cache operations.
///
/// Only argument validation and type mismatches are ever returned by the
/// cache itself. Failures of the durable store are logged and swallowed.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// The key was empty.
  #[error("cache key cannot be empty")]
  EmptyKey,

  /// The cached value is not of the requested type.
  #[error("value for key '{key}' is a `{actual}`, not a `{expected}`")]
  TypeMismatch {
    key: String,
    expected: &'static str,
    actual: &'static str,
  },

  /// Waiting for the per-key lock (or an in-flight load) exceeded the
  /// configured wait timeout.
  #[error("timed out waiting for the lock on key '{key}'")]
  LockTimeout { key: String },

  /// The wait for a per-key lock was cancelled by the caller.
  #[error("wait for key '{key}' was cancelled")]
  Cancelled { key: String },

  /// A durable store operation failed.
  #[error(transparent)]
  Persistence(#[from] PersistError),
}

/// Errors produced by a `PersistedStore` implementation.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
  #[error("durable store I/O failed: {0}")]
  Io(#[from] std::io::Error),

  #[error("durable store content is malformed: {0}")]
  Json(#[from] serde_json::Error),

  /// A persisted value names a type that was never registered.
  #[error("no decoder registered for value type `{type_name}`")]
  UnknownType { type_name: String },
}

/// The outcome of a try or bounded acquisition of a keyed lock that did not
/// obtain the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
  NotAcquired,
}

impl fmt::Display for LockError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LockError::NotAcquired => write!(f, "keyed lock was not acquired"),
    }
  }
}

impl std::error::Error for LockError {}
