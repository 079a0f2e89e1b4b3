//! An in-process object cache for values of any type.
//!
//! # Features
//! - **Type-Erased Values**: Entries of different types live side by side; reads
//!   name the type they expect and get an `Arc<V>` back.
//! - **Expiration**: Absolute time-to-live, or sliding expiration that every read
//!   extends, optionally capped by an absolute lifetime.
//! - **Tags**: Entries carry tags, and a whole tag can be invalidated at once.
//! - **Singleflight**: `get_or_add` runs the factory once per key no matter how
//!   many callers race for it, with both blocking and `async` variants.
//! - **Durable Entries**: Entries marked `persist` are mirrored to a JSON file
//!   (or any `PersistedStore`) and revived, with their remaining lifetime, by
//!   the next instance of the same name.
//! - **Sweeper**: A background thread evicts expired entries periodically.
//!
//! ```no_run
//! use fibre_memcore::{Cache, EntryOptions, Expiration};
//! use std::time::Duration;
//!
//! let cache = Cache::builder().name("sessions").build()?;
//! cache.add_with(
//!   "user:1",
//!   "alice".to_string(),
//!   Expiration::sliding(Duration::from_secs(300)),
//!   EntryOptions::new().tag("users").persist(true),
//! )?;
//! let name = cache.get::<String>("user:1")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Public modules that form the API
pub mod builder;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod ext;
pub mod handles;
pub mod key;
pub mod keyed_lock;
pub mod metrics;
pub mod persist;
pub mod value;

// Internal, crate-only modules
mod loader;
mod shared;
mod store;
mod sync;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::{CacheBuilder, DEFAULT_NAME};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use entry::{EntryOptions, Expiration};
pub use error::{BuildError, CacheError, LockError, PersistError};
pub use ext::CacheExt;
pub use handles::{AsyncCache, Cache};
pub use key::KeyComparison;
pub use keyed_lock::{KeyGuard, KeyedLock};
pub use metrics::MetricsSnapshot;
pub use persist::{JsonFileStore, MemoryStore, PersistedEntry, PersistedStore};
pub use value::{CachedValue, Persistable};

pub use tokio_util::sync::CancellationToken;
