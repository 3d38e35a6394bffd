//! Account storage.
//!
//! Handlers depend on the [`UserStore`] trait only. The in-memory store keeps
//! accounts for the lifetime of the process.

mod user;

pub use user::{MemoryUserStore, StoreError, User, UserStore};
