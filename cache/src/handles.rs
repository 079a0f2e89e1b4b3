//! The user-facing cache handles.
//!
//! `Cache` and `AsyncCache` are two views of the same shared core and can be
//! converted into each other for free. Both are cheap to clone; the core and
//! its background sweeper live until the last handle is dropped.

mod futures;
mod sync;

pub use futures::AsyncCache;
pub use sync::Cache;
