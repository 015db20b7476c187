//! JSON Cache Module
//!
//! File store keeping one `{"expire", "value"}` envelope per key, with lazy
//! eviction of expired entries on read.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::entry::{effective_ttl, CacheEntry};
use crate::cache::key::{clean, SafeKey};
use crate::cache::{
    Cache, CacheStats, Clock, FileStore, SystemClock, DEFAULT_FILE_TTL, JSON_EXTENSION,
};
use crate::config::Config;
use crate::error::{CacheError, ErrorLog, Result};

// == JSON Cache ==
pub struct JsonCache {
    /// Directory as configured; resolved on enable
    source: PathBuf,
    /// Open store, present only while enabled
    store: Option<FileStore>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
    errors: ErrorLog,
}

impl JsonCache {
    // == Constructor ==
    /// Creates a disabled store rooted at `dir`. Nothing touches the
    /// filesystem until [`Cache::enable`].
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            source: dir.into(),
            store: None,
            default_ttl: DEFAULT_FILE_TTL,
            clock: Arc::new(SystemClock),
            stats: CacheStats::new(),
            errors: ErrorLog::new(),
        }
    }

    /// Builds a store from configuration, enabling it if configured so.
    pub fn from_config(config: &Config) -> Self {
        let mut cache = Self::new(&config.cache_dir).with_default_ttl(config.default_ttl());
        cache.set_state(config.enabled);
        cache
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn set_default_ttl(&mut self, ttl: Duration) -> &mut Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Resolved root while enabled.
    pub fn root(&self) -> Option<&Path> {
        self.store.as_ref().map(FileStore::root)
    }

    /// Path backing `key`, while enabled.
    pub fn path_for(&self, key: &str) -> Option<PathBuf> {
        self.store.as_ref().map(|store| store.path_for(&clean(key)))
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    // == Internal Operations ==
    fn try_get(&mut self, key: &SafeKey) -> Result<Option<Value>> {
        let Some(store) = self.store.as_ref() else {
            return Ok(None);
        };

        let Some(bytes) = store.read(key)? else {
            return Ok(None);
        };

        let path = store.path_for(key);
        if bytes.is_empty() {
            return Err(CacheError::read(&path, "empty file"));
        }

        let Some(entry) = CacheEntry::from_bytes(&bytes) else {
            // Unusable envelope: drop the file so the next set starts clean
            let _ = store.remove(key);
            return Err(CacheError::read(&path, "corrupt cache envelope"));
        };

        if entry.is_expired(self.clock.now()) {
            store.remove(key)?;
            self.stats.record_expiration();
            debug!(key = %key, expire = entry.expire, "evicted expired entry");
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    fn try_set(&mut self, key: &SafeKey, value: Value, ttl: Option<Duration>) -> Result<()> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };

        let ttl = effective_ttl(ttl, self.default_ttl);
        let entry = CacheEntry::new(value, self.clock.now(), ttl);
        let payload = entry.to_bytes()?;

        store.write(key, &payload)?;
        self.stats.record_write();
        Ok(())
    }
}

impl Cache for JsonCache {
    fn get(&mut self, key: &str) -> Option<Value> {
        if !self.is_enabled() {
            return None;
        }

        let key = clean(key);
        match self.try_get(&key) {
            Ok(Some(value)) => {
                self.stats.record_hit();
                Some(value)
            }
            Ok(None) => {
                self.stats.record_miss();
                None
            }
            Err(e) => {
                self.stats.record_miss();
                self.errors.record(e);
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: Value, ttl: Option<Duration>) -> &mut Self {
        if !self.is_enabled() {
            return self;
        }

        let key = clean(key);
        if let Err(e) = self.try_set(&key, value, ttl) {
            self.errors.record(e);
        }
        self
    }

    fn delete(&mut self, key: &str) -> &mut Self {
        let Some(store) = self.store.as_ref() else {
            return self;
        };

        if let Err(e) = store.remove(&clean(key)) {
            self.errors.record(e);
        }
        self
    }

    fn clear(&mut self) -> &mut Self {
        let Some(store) = self.store.as_ref() else {
            return self;
        };

        if let Err(e) = store.clear() {
            self.errors.record(e);
        }
        self
    }

    fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    fn set_state(&mut self, enabled: bool) -> &mut Self {
        if !enabled {
            self.store = None;
            return self;
        }

        match FileStore::open(&self.source, JSON_EXTENSION) {
            Ok(store) => {
                debug!(root = %store.root().display(), "json cache enabled");
                self.store = Some(store);
            }
            Err(e) => {
                warn!(path = %self.source.display(), "json cache stays disabled");
                self.store = None;
                self.errors.record(e);
            }
        }
        self
    }

    fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    fn error_log_mut(&mut self) -> &mut ErrorLog {
        &mut self.errors
    }
}
