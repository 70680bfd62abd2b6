//! Durable store of mutating requests waiting for a successful replay.
//!
//! Two backends share one contract: the SQLite table is the primary store and
//! the flat key-value file is the degraded one. Which is primary is decided
//! once at startup by [`select_backend`]; after that, a failed write to the
//! primary lands in the fallback instead of being lost.

mod action;
mod manager;
mod store;

pub use action::{NewAction, PendingAction};
pub use manager::{select_backend, ActionQueue, BackendChoice, BackendSelection};
pub use store::{ActionStore, KvActionStore, SqliteActionStore};

#[cfg(test)]
pub(crate) mod tests_support;
