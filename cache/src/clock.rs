use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

// The single, static reference point for all monotonic time calculations in
// the cache. It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// A helper to get the current monotonic time as a `Duration` since the epoch.
#[inline]
pub(crate) fn now_duration() -> Duration {
  Instant::now().saturating_duration_since(*CACHE_EPOCH)
}

/// Converts a `Duration` into the nanosecond representation stored in entries.
#[inline]
pub(crate) fn as_nanos(duration: Duration) -> u64 {
  u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// A replaceable time source.
///
/// `now` is a monotonic reading used for every in-memory deadline. `wall_now`
/// is only consulted by the persistence layer, which has to express deadlines
/// in a form that survives a process restart.
pub trait Clock: Send + Sync + 'static {
  /// Monotonic time elapsed since an arbitrary, fixed origin.
  fn now(&self) -> Duration;

  /// The current wall-clock time.
  fn wall_now(&self) -> DateTime<Utc>;
}

/// The default clock, backed by `Instant` and `Utc::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  #[inline]
  fn now(&self) -> Duration {
    now_duration()
  }

  #[inline]
  fn wall_now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
///
/// Clones share the same reading, so a test can hand one clone to a cache and
/// keep another to advance time.
#[derive(Clone)]
pub struct ManualClock {
  inner: Arc<Mutex<ManualReading>>,
}

struct ManualReading {
  monotonic: Duration,
  wall: DateTime<Utc>,
}

impl ManualClock {
  /// Creates a clock frozen at the current system time.
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(ManualReading {
        monotonic: now_duration(),
        wall: Utc::now(),
      })),
    }
  }

  /// Moves both the monotonic and the wall-clock reading forward.
  pub fn advance(&self, by: Duration) {
    let mut reading = self.inner.lock();
    reading.monotonic += by;
    reading.wall = shift(reading.wall, by);
  }

  /// Moves only the wall-clock reading forward, as happens across a process
  /// restart where the monotonic origin is lost.
  pub fn advance_wall(&self, by: Duration) {
    let mut reading = self.inner.lock();
    reading.wall = shift(reading.wall, by);
  }
}

fn shift(wall: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(by)
    .ok()
    .and_then(|by| wall.checked_add_signed(by))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for ManualClock {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let reading = self.inner.lock();
    f.debug_struct("ManualClock")
      .field("monotonic", &reading.monotonic)
      .field("wall", &reading.wall)
      .finish()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Duration {
    self.inner.lock().monotonic
  }

  fn wall_now(&self) -> DateTime<Utc> {
    self.inner.lock().wall
  }
}
