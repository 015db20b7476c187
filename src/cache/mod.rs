//! Cache Module
//!
//! Key-value stores sharing one contract: get, set, delete, clear, with
//! per-entry TTL and failures captured instead of returned.
//!
//! # Backends
//! - [`JsonCache`]: one JSON envelope file per key, expiry stored inside
//! - [`RawCache`]: one raw file per key, age taken from the file mtime
//! - [`RemoteCache`]: adapter over a remote key-value client

mod clock;
mod codec;
mod entry;
mod file_store;
mod json;
pub mod key;
mod raw;
pub mod remote;
mod stats;


use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{CacheError, ErrorLog};

// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, JsonCodec, NativeCodec, PassthroughCodec, ProcessMode};
pub use entry::{compute_expiry, effective_ttl, CacheEntry};
pub use file_store::{FileStore, StoredFile, TEMP_MARKER};
pub use json::JsonCache;
pub use key::{clean, escape_reserved, SafeKey};
pub use raw::RawCache;
pub use remote::{KvClient, KvConnector, KvItem, MemoryConnector, MemoryKv, RemoteCache};
pub use stats::CacheStats;

// == Public Constants ==
/// Default TTL of the file stores: seven days
pub const DEFAULT_FILE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Default TTL of the remote store: fifteen minutes
pub const DEFAULT_REMOTE_TTL: Duration = Duration::from_secs(15 * 60);

/// File extension of the JSON store
pub const JSON_EXTENSION: &str = ".json";

// == Cache Trait ==
/// The contract every backend implements.
///
/// None of the operations fail from the caller's point of view: a failure is
/// recorded in the store's [`ErrorLog`] and the operation returns its safe
/// default (`None` for reads, the unchanged store otherwise). While a store is
/// disabled every operation is a no-op.
pub trait Cache {
    /// Value for `key`, or `None` if absent, expired, unreadable or disabled.
    fn get(&mut self, key: &str) -> Option<Value>;

    /// Stores `value` under `key`. A `None` or zero `ttl` uses the store default.
    fn set(&mut self, key: &str, value: Value, ttl: Option<Duration>) -> &mut Self;

    /// Removes `key`. Absent keys are fine.
    fn delete(&mut self, key: &str) -> &mut Self;

    /// Removes every entry of the store.
    fn clear(&mut self) -> &mut Self;

    fn is_enabled(&self) -> bool;

    /// Enables or disables the store. Enabling may fail, in which case the
    /// error is recorded and the store stays disabled.
    fn set_state(&mut self, enabled: bool) -> &mut Self;

    fn error_log(&self) -> &ErrorLog;

    fn error_log_mut(&mut self) -> &mut ErrorLog;

    fn enable(&mut self) -> &mut Self {
        self.set_state(true)
    }

    fn disable(&mut self) -> &mut Self {
        self.set_state(false)
    }

    /// Whether any failure was recorded since creation or the last reset.
    fn is_error(&self) -> bool {
        !self.error_log().is_empty()
    }

    fn errors(&self) -> &[CacheError] {
        self.error_log().as_slice()
    }

    fn reset_errors(&mut self) -> &mut Self {
        self.error_log_mut().clear();
        self
    }

    /// Installs a callback invoked with every captured error.
    fn on_error<F>(&mut self, observer: F) -> &mut Self
    where
        F: Fn(&CacheError) + Send + Sync + 'static,
        Self: Sized,
    {
        self.error_log_mut().set_observer(Some(Box::new(observer)));
        self
    }

    // == Typed Helpers ==
    /// Like [`Cache::get`], converting the value into `T`.
    fn get_as<T: DeserializeOwned>(&mut self, key: &str) -> Option<T>
    where
        Self: Sized,
    {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                self.error_log_mut().record(CacheError::Decode(e.to_string()));
                None
            }
        }
    }

    /// Like [`Cache::set`], converting `value` from `T`.
    fn set_from<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> &mut Self
    where
        Self: Sized,
    {
        if !self.is_enabled() {
            return self;
        }
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value, ttl),
            Err(e) => {
                self.error_log_mut().record(CacheError::Encode(e.to_string()));
                self
            }
        }
    }
}

/// Backends that talk to a remote service.
pub trait Connected: Cache {
    fn is_connected(&self) -> bool;
}

// == Dynamic Dispatch ==
/// Object-safe view of [`Cache`], for picking a backend at runtime.
///
/// Implemented for every [`Cache`]; the methods return nothing instead of the
/// store so they can be called through `Box<dyn DynCache>`.
pub trait DynCache {
    fn get(&mut self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value, ttl: Option<Duration>);
    fn delete(&mut self, key: &str);
    fn clear(&mut self);
    fn is_enabled(&self) -> bool;
    fn set_state(&mut self, enabled: bool);
    fn errors(&self) -> &[CacheError];
    fn reset_errors(&mut self);
}

impl<T: Cache> DynCache for T {
    fn get(&mut self, key: &str) -> Option<Value> {
        Cache::get(self, key)
    }

    fn set(&mut self, key: &str, value: Value, ttl: Option<Duration>) {
        Cache::set(self, key, value, ttl);
    }

    fn delete(&mut self, key: &str) {
        Cache::delete(self, key);
    }

    fn clear(&mut self) {
        Cache::clear(self);
    }

    fn is_enabled(&self) -> bool {
        Cache::is_enabled(self)
    }

    fn set_state(&mut self, enabled: bool) {
        Cache::set_state(self, enabled);
    }

    fn errors(&self) -> &[CacheError] {
        Cache::errors(self)
    }

    fn reset_errors(&mut self) {
        Cache::reset_errors(self);
    }
}
