//! Fetch-vs-reuse decisions for upstream quote data.
//!
//! The coordinator owns the in-memory price/chain cache and its on-disk copy.
//! It never talks to the network; callers ask [`CacheCoordinator::is_fresh`]
//! and either serve from the cache or fetch and record through it.

pub mod coordinator;
pub mod errors;
pub mod persisted;

pub use coordinator::{CacheCoordinator, is_valid};
pub use errors::CacheError;
pub use persisted::PersistedCache;
