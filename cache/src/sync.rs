use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};
use std::time::Instant;

/// Represents a parked caller, either a blocked thread or a pending task.
pub(crate) enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  pub(crate) fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

struct SignalState {
  held: bool,
  waiters: VecDeque<(u64, Waiter)>,
  next_id: u64,
}

impl SignalState {
  fn enqueue(&mut self, waiter: Waiter) -> u64 {
    let id = self.next_id;
    self.next_id = self.next_id.wrapping_add(1);
    self.waiters.push_back((id, waiter));
    id
  }

  /// Removes a waiter by id, returning `true` if it was still queued.
  fn dequeue(&mut self, id: u64) -> bool {
    match self.waiters.iter().position(|(queued, _)| *queued == id) {
      Some(index) => {
        self.waiters.remove(index);
        true
      }
      None => false,
    }
  }
}

/// A binary signal that can be waited on by threads and tasks alike.
///
/// At most one holder at a time. Releasing wakes the longest-waiting caller,
/// which then competes for the signal again; a woken caller that gives up
/// passes the wakeup on so it is never lost.
pub(crate) struct KeySignal {
  state: Mutex<SignalState>,
}

impl KeySignal {
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(SignalState {
        held: false,
        waiters: VecDeque::new(),
        next_id: 0,
      }),
    }
  }

  pub(crate) fn try_acquire(&self) -> bool {
    let mut state = self.state.lock();
    if state.held {
      false
    } else {
      state.held = true;
      true
    }
  }

  /// Blocks the current thread until the signal is taken or `deadline`
  /// passes. Returns `false` on timeout.
  pub(crate) fn acquire(&self, deadline: Option<Instant>) -> bool {
    let mut state = self.state.lock();
    if !state.held {
      state.held = true;
      return true;
    }
    let mut id = state.enqueue(Waiter::Sync(thread::current()));

    loop {
      drop(state);
      match deadline {
        Some(deadline) => {
          let now = Instant::now();
          if now < deadline {
            thread::park_timeout(deadline - now);
          }
        }
        None => thread::park(),
      }
      state = self.state.lock();

      // A free signal is taken even past the deadline, so a wakeup that
      // raced with the timeout is consumed rather than dropped.
      if !state.held {
        state.held = true;
        state.dequeue(id);
        return true;
      }
      if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        state.dequeue(id);
        return false;
      }
      // Woken, but another caller got there first. Queue up again.
      if !state.waiters.iter().any(|(queued, _)| *queued == id) {
        id = state.enqueue(Waiter::Sync(thread::current()));
      }
    }
  }

  /// Returns a future that resolves once the signal is held.
  pub(crate) fn acquire_async(&self) -> Acquire<'_> {
    Acquire {
      signal: self,
      id: None,
      done: false,
    }
  }

  pub(crate) fn release(&self) {
    let next = {
      let mut state = self.state.lock();
      state.held = false;
      state.waiters.pop_front()
    };
    if let Some((_, waiter)) = next {
      waiter.wake();
    }
  }

  /// Wakes the next waiter if the signal is free. Used by a woken caller
  /// that is abandoning its wait.
  fn pass_on(&self) {
    let next = {
      let mut state = self.state.lock();
      if state.held {
        None
      } else {
        state.waiters.pop_front()
      }
    };
    if let Some((_, waiter)) = next {
      waiter.wake();
    }
  }
}

/// The `Future` returned by `KeySignal::acquire_async()`.
#[must_use = "futures do nothing unless you .await or poll them"]
pub(crate) struct Acquire<'a> {
  signal: &'a KeySignal,
  id: Option<u64>,
  done: bool,
}

impl Future for Acquire<'_> {
  type Output = ();

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = &mut *self;
    let mut state = this.signal.state.lock();

    if !state.held {
      state.held = true;
      if let Some(id) = this.id.take() {
        state.dequeue(id);
      }
      this.done = true;
      return Poll::Ready(());
    }

    let queued = this
      .id
      .and_then(|id| state.waiters.iter_mut().find(|(queued, _)| *queued == id));
    match queued {
      Some((_, Waiter::Async(waker))) => {
        if !waker.will_wake(cx.waker()) {
          *waker = cx.waker().clone();
        }
      }
      _ => {
        this.id = Some(state.enqueue(Waiter::Async(cx.waker().clone())));
      }
    }
    Poll::Pending
  }
}

impl Drop for Acquire<'_> {
  fn drop(&mut self) {
    if self.done {
      return;
    }
    if let Some(id) = self.id {
      let still_queued = self.signal.state.lock().dequeue(id);
      if !still_queued {
        // We were popped by a release but never took the signal.
        self.signal.pass_on();
      }
    }
  }
}
