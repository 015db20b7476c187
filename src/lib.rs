//! Mini Cache - Pluggable key-value caching with TTL expiration
//!
//! File-backed stores (JSON envelope and raw) with atomic writes, plus an
//! adapter over remote key-value clients, all behind one [`Cache`] contract.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{Cache, Connected, DynCache, JsonCache, ProcessMode, RawCache, RemoteCache};
pub use config::Config;
pub use error::{CacheError, ErrorLog, Result};
