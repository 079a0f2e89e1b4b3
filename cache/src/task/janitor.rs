use crate::clock::Clock;
use crate::metrics::Metrics;
use crate::persist::Durable;
use crate::store::EntryStore;

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The default time between two sweeps.
pub(crate) const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(20);

/// The parts of the cache a sweep needs. Cheap to clone.
#[derive(Clone)]
pub(crate) struct Sweeper {
  pub(crate) name: Arc<str>,
  pub(crate) store: Arc<EntryStore>,
  pub(crate) durable: Arc<Durable>,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) metrics: Arc<Metrics>,
}

impl Sweeper {
  /// Evicts every expired entry and deletes the durable twins of the
  /// persistent ones in a single store call. Never extends a lifetime.
  ///
  /// Returns the number of entries evicted.
  pub(crate) fn run(&self) -> usize {
    let now = self.clock.now();
    let removed = self.store.remove_where(|entry| entry.is_expired(now));
    if removed.is_empty() {
      tracing::trace!(cache = %self.name, "sweep found nothing to evict");
      return 0;
    }

    self
      .metrics
      .expirations
      .fetch_add(removed.len() as u64, Ordering::Relaxed);
    let durable_keys: Vec<String> = removed
      .iter()
      .filter(|entry| entry.persist())
      .map(|entry| entry.key().to_string())
      .collect();
    tracing::trace!(
      cache = %self.name,
      evicted = removed.len(),
      persistent = durable_keys.len(),
      "sweep evicted expired entries"
    );
    self.durable.delete(durable_keys);
    removed.len()
  }
}

/// The background thread that runs a [`Sweeper`] on a fixed interval.
pub(crate) struct Janitor {
  handle: JoinHandle<()>,
  stop: Arc<(Mutex<bool>, Condvar)>,
}

impl Janitor {
  /// Spawns a new janitor thread.
  pub(crate) fn spawn(sweeper: Sweeper, tick_interval: Duration) -> Self {
    let stop = Arc::new((Mutex::new(false), Condvar::new()));
    let stop_clone = stop.clone();

    let handle = thread::spawn(move || {
      let (flag, signal) = &*stop_clone;
      let mut stopped = flag.lock();
      while !*stopped {
        signal.wait_for(&mut stopped, tick_interval);
        if *stopped {
          break;
        }
        // The stop flag stays observable while sweeping, and `stop` waits
        // for the pass to finish through `join`.
        MutexGuard::unlocked(&mut stopped, || {
          sweeper.run();
        });
      }
    });

    Self { handle, stop }
  }

  /// Signals the janitor thread to stop and waits for it to exit.
  pub(crate) fn stop(self) {
    let (flag, signal) = &*self.stop;
    *flag.lock() = true;
    signal.notify_all();
    if self.handle.join().is_err() {
      tracing::warn!("janitor thread panicked");
    }
  }
}
