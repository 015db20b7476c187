//! Raw Cache Module
//!
//! File store writing each value verbatim (after the configured processing)
//! to a file named after the key. There is no stored expiry: an entry's age
//! is its file modification time, checked against `max_life_time` on read
//! and by the caller-triggered [`RawCache::expire`] sweep.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::entry::is_past_max_life;
use crate::cache::key::{clean, SafeKey};
use crate::cache::{
    Cache, CacheStats, Clock, Codec, FileStore, ProcessMode, StoredFile, SystemClock,
};
use crate::config::Config;
use crate::error::{ErrorLog, Result};

// == Raw Record ==
/// Last known state of one entry, as seen by this store instance.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawRecord {
    /// File modification time, UNIX seconds
    modified: i64,
    data: Vec<u8>,
}

// == Raw Cache ==
pub struct RawCache {
    source: PathBuf,
    store: Option<FileStore>,
    process: ProcessMode,
    /// Maximum entry age; zero disables age checks
    max_life_time: Duration,
    /// Entries already read or written through this instance
    records: HashMap<SafeKey, RawRecord>,
    /// Mtime of the entry last touched by get/set
    last_modified: Option<i64>,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
    errors: ErrorLog,
}

impl RawCache {
    // == Constructor ==
    /// Creates a disabled store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            source: dir.into(),
            store: None,
            process: ProcessMode::None,
            max_life_time: Duration::ZERO,
            records: HashMap::new(),
            last_modified: None,
            clock: Arc::new(SystemClock),
            stats: CacheStats::new(),
            errors: ErrorLog::new(),
        }
    }

    /// Builds a store from configuration, enabling it if configured so.
    pub fn from_config(config: &Config) -> Self {
        let mut cache = Self::new(&config.cache_dir)
            .with_process(config.process)
            .with_max_life_time(config.max_life_time());
        cache.set_state(config.enabled);
        cache
    }

    pub fn with_process(mut self, process: ProcessMode) -> Self {
        self.process = process;
        self
    }

    pub fn with_max_life_time(mut self, max_life_time: Duration) -> Self {
        self.max_life_time = max_life_time;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn set_process(&mut self, process: ProcessMode) -> &mut Self {
        self.process = process;
        self
    }

    pub fn process(&self) -> ProcessMode {
        self.process
    }

    pub fn set_max_life_time(&mut self, max_life_time: Duration) -> &mut Self {
        self.max_life_time = max_life_time;
        self
    }

    pub fn max_life_time(&self) -> Duration {
        self.max_life_time
    }

    pub fn root(&self) -> Option<&Path> {
        self.store.as_ref().map(FileStore::root)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Mtime (UNIX seconds) of the entry last read or written.
    ///
    /// `None` after a miss, an error, a delete, or while disabled.
    pub fn filemtime(&self) -> Option<i64> {
        self.last_modified
    }

    // == Get Within ==
    /// Reads `key`, evicting it if older than `max_life`.
    ///
    /// `None` falls back to the store's `max_life_time`; `Some(ZERO)` skips
    /// the age check for this call.
    pub fn get_within(&mut self, key: &str, max_life: Option<Duration>) -> Option<Value> {
        let bytes = self.get_bytes_within(key, max_life)?;
        match self.process.decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.last_modified = None;
                self.errors.record(e);
                None
            }
        }
    }

    // == Bytes ==
    /// Stored bytes of `key`, bypassing value processing.
    pub fn get_bytes(&mut self, key: &str) -> Option<Vec<u8>> {
        self.get_bytes_within(key, None)
    }

    /// Stores `bytes` verbatim under `key`, bypassing value processing.
    pub fn set_bytes(&mut self, key: &str, bytes: &[u8]) -> &mut Self {
        self.last_modified = None;
        if !self.is_enabled() {
            return self;
        }

        let key = clean(key);
        if let Err(e) = self.try_set_bytes(key, bytes.to_vec()) {
            self.errors.record(e);
        }
        self
    }

    fn get_bytes_within(&mut self, key: &str, max_life: Option<Duration>) -> Option<Vec<u8>> {
        self.last_modified = None;
        if !self.is_enabled() {
            return None;
        }

        let key = clean(key);
        match self.try_get_bytes(&key, max_life) {
            Ok(Some(record)) => {
                self.stats.record_hit();
                self.last_modified = Some(record.modified);
                Some(record.data)
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

    // == Forget ==
    /// Drops the in-memory record of `key`; the file stays.
    pub fn forget(&mut self, key: &str) -> &mut Self {
        self.last_modified = None;
        if self.is_enabled() {
            self.records.remove(&clean(key));
        }
        self
    }

    // == Pattern Clear ==
    /// Deletes every file whose name (extension stripped) matches `pattern`.
    pub fn clear_matching(&mut self, pattern: &Regex) -> &mut Self {
        self.last_modified = None;
        if let Err(e) = self.try_sweep(|_| true, Some(pattern)) {
            self.errors.record(e);
        }
        self
    }

    // == Expire ==
    /// Deletes every stored file older than `max_life_time`.
    ///
    /// Age comes from the file mtime only; a no-op when `max_life_time` is 0.
    pub fn expire(&mut self) -> &mut Self {
        self.expire_where(None)
    }

    /// Like [`RawCache::expire`], limited to names matching `pattern`.
    pub fn expire_matching(&mut self, pattern: &Regex) -> &mut Self {
        self.expire_where(Some(pattern))
    }

    fn expire_where(&mut self, pattern: Option<&Regex>) -> &mut Self {
        self.last_modified = None;
        if self.max_life_time.is_zero() {
            return self;
        }

        let now = self.clock.now();
        let max_life = self.max_life_time;
        match self.try_sweep(|file| is_past_max_life(file.modified, max_life, now), pattern) {
            Ok(removed) => {
                self.stats.record_expirations(removed);
                debug!(removed, "expired raw cache files");
            }
            Err(e) => self.errors.record(e),
        }
        self
    }

    // == Internal Operations ==
    fn try_get_bytes(
        &mut self,
        key: &SafeKey,
        max_life: Option<Duration>,
    ) -> Result<Option<RawRecord>> {
        let Some(store) = self.store.as_ref() else {
            return Ok(None);
        };

        let record = match self.records.get(key) {
            Some(record) => record.clone(),
            None => {
                let Some(modified) = store.modified(key)? else {
                    return Ok(None);
                };
                let Some(data) = store.read(key)? else {
                    return Ok(None);
                };
                let record = RawRecord { modified, data };
                self.records.insert(key.clone(), record.clone());
                record
            }
        };

        let max_life = max_life.unwrap_or(self.max_life_time);
        if !max_life.is_zero() && is_past_max_life(record.modified, max_life, self.clock.now()) {
            self.records.remove(key);
            store.remove(key)?;
            self.stats.record_expiration();
            debug!(key = %key, modified = record.modified, "evicted aged raw entry");
            return Ok(None);
        }

        Ok(Some(record))
    }

    fn try_set_bytes(&mut self, key: SafeKey, data: Vec<u8>) -> Result<()> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };

        self.records.remove(&key);
        store.write(&key, &data)?;
        self.stats.record_write();

        let modified = match store.modified(&key) {
            Ok(Some(modified)) => modified,
            _ => self.clock.now(),
        };
        self.last_modified = Some(modified);
        self.records.insert(key, RawRecord { modified, data });
        Ok(())
    }

    /// Removes files accepted by `filter` and `pattern`. Returns how many.
    fn try_sweep<F>(&mut self, filter: F, pattern: Option<&Regex>) -> Result<usize>
    where
        F: Fn(&StoredFile) -> bool,
    {
        let Some(store) = self.store.as_ref() else {
            return Ok(0);
        };

        let mut removed = 0;
        for file in store.files()? {
            let name = strip_extension(&file.name);
            if !pattern.map_or(true, |p| p.is_match(name)) || !filter(&file) {
                continue;
            }
            self.records.retain(|key, _| key.as_str() != name);
            if store.remove_file(&file)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// File name without its last extension, matching how entries are named.
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

impl Cache for RawCache {
    fn get(&mut self, key: &str) -> Option<Value> {
        self.get_within(key, None)
    }

    /// The raw store keeps no per-entry expiry, so `ttl` is ignored; age is
    /// governed by `max_life_time`.
    fn set(&mut self, key: &str, value: Value, _ttl: Option<Duration>) -> &mut Self {
        self.last_modified = None;
        if !self.is_enabled() {
            return self;
        }

        match self.process.encode(&value) {
            Ok(bytes) => {
                let key = clean(key);
                if let Err(e) = self.try_set_bytes(key, bytes) {
                    self.errors.record(e);
                }
            }
            Err(e) => self.errors.record(e),
        }
        self
    }

    fn delete(&mut self, key: &str) -> &mut Self {
        self.last_modified = None;
        let Some(store) = self.store.as_ref() else {
            return self;
        };

        let key = clean(key);
        self.records.remove(&key);
        if let Err(e) = store.remove(&key) {
            self.errors.record(e);
        }
        self
    }

    fn clear(&mut self) -> &mut Self {
        self.last_modified = None;
        let Some(store) = self.store.as_ref() else {
            return self;
        };

        self.records.clear();
        if let Err(e) = store.clear() {
            self.errors.record(e);
        }
        self
    }

    fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    fn set_state(&mut self, enabled: bool) -> &mut Self {
        self.last_modified = None;
        if !enabled {
            self.store = None;
            return self;
        }

        match FileStore::open(&self.source, "") {
            Ok(store) => {
                debug!(root = %store.root().display(), "raw cache enabled");
                self.store = Some(store);
            }
            Err(e) => {
                warn!(path = %self.source.display(), "raw cache stays disabled");
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

impl std::fmt::Debug for RawCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCache")
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("process", &self.process)
            .field("max_life_time", &self.max_life_time)
            .field("records", &self.records.len())
            .finish()
    }
}
