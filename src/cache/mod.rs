//! Versioned response caches for offline support.
//!
//! This module keeps two named buckets per deploy version:
//! - a static bucket pre-populated from the asset manifest at install time
//! - a data bucket filled lazily with successful API GET responses
//!
//! Static requests are answered cache-first, API requests network-first, and
//! activation purges every bucket that belongs to another version.

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, InstallReport};
pub use storage::{CachedResponse, NoopStorage, ResponseStorage, SqliteResponseStorage};
pub use traits::{CacheResult, CacheSource};
