//! Background work owned by the cache: the janitor thread that sweeps
//! expired entries.

pub(crate) mod janitor;
