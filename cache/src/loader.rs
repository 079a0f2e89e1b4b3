use crate::value::CachedValue;

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// How an in-flight load ended.
#[derive(Debug, Clone)]
pub(crate) enum LoadOutcome {
  /// The factory produced a value and it was cached.
  Loaded(CachedValue),
  /// The factory ran but produced nothing to cache.
  Empty,
  /// The factory failed, or the leading caller went away before finishing.
  /// Waiters must try again themselves.
  Retry,
}

/// The internal state of a value being loaded.
enum State {
  Computing,
  Complete(LoadOutcome),
}

struct Inner {
  state: State,
  waiters: Vec<Waker>,
}

/// The shared marker for one in-flight async computation.
///
/// The leading caller completes it exactly once; any number of tasks can
/// await it concurrently.
pub(crate) struct LoadFuture {
  inner: Mutex<Inner>,
}

impl LoadFuture {
  /// Creates a new `LoadFuture` in the "Computing" state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Computing,
        waiters: Vec::new(),
      }),
    }
  }

  /// Completes the future, waking all waiters. Later calls are ignored.
  pub(crate) fn complete(&self, outcome: LoadOutcome) {
    let waiters = {
      let mut inner = self.inner.lock();
      if matches!(inner.state, State::Complete(_)) {
        return;
      }
      inner.state = State::Complete(outcome);
      std::mem::take(&mut inner.waiters)
    };
    for waker in waiters {
      waker.wake();
    }
  }

  #[cfg(test)]
  pub(crate) fn is_complete(&self) -> bool {
    matches!(self.inner.lock().state, State::Complete(_))
  }

  /// Waits for the outcome.
  pub(crate) fn wait(&self) -> Wait<'_> {
    Wait { load: self }
  }
}

/// The `Future` returned by `LoadFuture::wait()`.
#[must_use = "futures do nothing unless you .await or poll them"]
pub(crate) struct Wait<'a> {
  load: &'a LoadFuture,
}

impl Future for Wait<'_> {
  type Output = LoadOutcome;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.load.inner.lock();
    match &inner.state {
      State::Complete(outcome) => Poll::Ready(outcome.clone()),
      State::Computing => {
        if !inner.waiters.iter().any(|w| w.will_wake(cx.waker())) {
          inner.waiters.push(cx.waker().clone());
        }
        Poll::Pending
      }
    }
  }
}
