use crate::clock::as_nanos;
use crate::key::KeyComparison;
use crate::value::CachedValue;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How an entry expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
  /// The entry dies a fixed duration after it was written.
  Absolute(Duration),
  /// Each read pushes the deadline out to `now + sliding`, never past
  /// `ceiling` (measured from the write) when one is given.
  Sliding {
    sliding: Duration,
    ceiling: Option<Duration>,
  },
}

impl Expiration {
  pub fn absolute(ttl: Duration) -> Self {
    Expiration::Absolute(ttl)
  }

  pub fn sliding(sliding: Duration) -> Self {
    Expiration::Sliding {
      sliding,
      ceiling: None,
    }
  }

  pub fn sliding_capped(sliding: Duration, ceiling: Duration) -> Self {
    Expiration::Sliding {
      sliding,
      ceiling: Some(ceiling),
    }
  }
}

/// Per-write options shared by every add and get-or-add call.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
  pub(crate) tags: Vec<String>,
  pub(crate) persist: bool,
  pub(crate) force_set: bool,
  pub(crate) wait_timeout: Option<Duration>,
  pub(crate) cancellation: Option<CancellationToken>,
}

impl EntryOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a single tag. Blank tags are discarded when the entry is built.
  pub fn tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.push(tag.into());
    self
  }

  /// Adds several tags.
  pub fn tags<I, S>(mut self, tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.tags.extend(tags.into_iter().map(Into::into));
    self
  }

  /// Mirrors the entry to the durable store.
  pub fn persist(mut self, persist: bool) -> Self {
    self.persist = persist;
    self
  }

  /// In get-or-add calls, recompute and overwrite even if a value is cached.
  pub fn force_set(mut self, force_set: bool) -> Self {
    self.force_set = force_set;
    self
  }

  /// In get-or-add calls, bounds the time spent waiting behind another
  /// caller populating the same key.
  pub fn wait_timeout(mut self, timeout: Duration) -> Self {
    self.wait_timeout = Some(timeout);
    self
  }

  /// In async get-or-add calls, abandons the wait (and the factory, if this
  /// caller is running it) once `token` is cancelled.
  pub fn cancel_on(mut self, token: CancellationToken) -> Self {
    self.cancellation = Some(token);
    self
  }
}

/// Drops blank tags. An input with no usable tag yields `None`.
pub(crate) fn clean_tags<I, S>(tags: I) -> Option<Box<[String]>>
where
  I: IntoIterator<Item = S>,
  S: Into<String>,
{
  let cleaned: Vec<String> = tags
    .into_iter()
    .map(Into::into)
    .filter(|tag| !tag.trim().is_empty())
    .collect();
  if cleaned.is_empty() {
    None
  } else {
    Some(cleaned.into_boxed_slice())
  }
}

/// A live cache entry. All times are nanoseconds on the owning cache's clock.
#[derive(Debug)]
pub(crate) struct CacheEntry {
  key: String,
  value: CachedValue,
  tags: Option<Box<[String]>>,
  /// The point at or after which the entry is expired.
  deadline: AtomicU64,
  /// Hard limit a sliding deadline can never pass.
  ceiling: Option<u64>,
  sliding: Option<Duration>,
  persist: bool,
}

impl CacheEntry {
  /// Builds an entry whose deadline is computed from `now`.
  pub(crate) fn new(
    key: String,
    value: CachedValue,
    expiration: Expiration,
    tags: Option<Box<[String]>>,
    persist: bool,
    now: Duration,
  ) -> Self {
    match expiration {
      Expiration::Absolute(ttl) => {
        let deadline = as_nanos(now.saturating_add(ttl));
        Self {
          key,
          value,
          tags,
          deadline: AtomicU64::new(deadline),
          ceiling: Some(deadline),
          sliding: None,
          persist,
        }
      }
      Expiration::Sliding { sliding, ceiling } => {
        let entry = Self {
          key,
          value,
          tags,
          deadline: AtomicU64::new(0),
          ceiling: ceiling.map(|c| as_nanos(now.saturating_add(c))),
          sliding: Some(sliding),
          persist,
        };
        entry.touch(now);
        entry
      }
    }
  }

  /// Rebuilds an entry revived from a durable store with pre-computed times.
  pub(crate) fn restored(
    key: String,
    value: CachedValue,
    tags: Option<Box<[String]>>,
    deadline: u64,
    ceiling: Option<u64>,
    sliding: Option<Duration>,
  ) -> Self {
    Self {
      key,
      value,
      tags,
      deadline: AtomicU64::new(deadline),
      ceiling,
      sliding,
      persist: true,
    }
  }

  #[inline]
  pub(crate) fn key(&self) -> &str {
    &self.key
  }

  #[inline]
  pub(crate) fn value(&self) -> &CachedValue {
    &self.value
  }

  #[inline]
  pub(crate) fn tags(&self) -> &[String] {
    self.tags.as_deref().unwrap_or(&[])
  }

  #[inline]
  pub(crate) fn persist(&self) -> bool {
    self.persist
  }

  #[inline]
  pub(crate) fn sliding(&self) -> Option<Duration> {
    self.sliding
  }

  #[inline]
  pub(crate) fn ceiling(&self) -> Option<u64> {
    self.ceiling
  }

  #[inline]
  pub(crate) fn deadline(&self) -> u64 {
    self.deadline.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn is_expired(&self, now: Duration) -> bool {
    as_nanos(now) >= self.deadline()
  }

  pub(crate) fn has_tag(&self, tag: &str, comparison: KeyComparison) -> bool {
    self.tags().iter().any(|t| comparison.matches(t, tag))
  }

  /// Extends a sliding deadline to `now + sliding`, capped at the ceiling.
  ///
  /// The deadline only ever moves forward. Returns `true` if it moved.
  pub(crate) fn touch(&self, now: Duration) -> bool {
    let Some(sliding) = self.sliding else {
      return false;
    };
    let mut target = as_nanos(now.saturating_add(sliding));
    if let Some(ceiling) = self.ceiling {
      target = target.min(ceiling);
    }
    let previous = self.deadline.fetch_max(target, Ordering::AcqRel);
    target > previous
  }
}
