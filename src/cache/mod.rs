//! Response caching: the namespace store and the strategies built on it.
//!
//! This module provides the cache half of the engine:
//! - Named, versioned response namespaces over SQLite
//! - The three request-handling strategies and their fallback chains
//! - Offline behavior (serve a cached copy when the network is unreachable)

mod store;
mod strategy;

pub use store::CacheStore;
pub use strategy::{Served, ServedSource, Strategies};
