//! Remote Cache Module
//!
//! Adapter giving a remote key-value client the [`Cache`] contract. The
//! client itself (connection handling, remote expiry, marshaling) sits behind
//! the [`KvConnector`] and [`KvClient`] traits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::entry::{compute_expiry, effective_ttl};
use crate::cache::key::escape_reserved;
use crate::cache::{Cache, CacheStats, Clock, Connected, SystemClock, DEFAULT_REMOTE_TTL};
use crate::config::Config;
use crate::error::{CacheError, ErrorLog, Result};

/// Free-form connection options, interpreted by the connector.
pub type ConnectOptions = HashMap<String, String>;

// == Capability Traits ==
/// Result of a remote lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct KvItem {
    pub is_hit: bool,
    pub value: Value,
}

impl KvItem {
    pub fn hit(value: Value) -> Self {
        Self {
            is_hit: true,
            value,
        }
    }

    pub fn miss() -> Self {
        Self {
            is_hit: false,
            value: Value::Null,
        }
    }
}

/// An open connection to a remote key-value store.
pub trait KvClient {
    fn get_item(&self, namespace: &str, key: &str) -> Result<KvItem>;

    /// Stores `value` for `ttl`. A zero `ttl` expires the item immediately.
    fn save(&mut self, namespace: &str, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Removes every item of `namespace`.
    fn clear(&mut self, namespace: &str) -> Result<()>;
}

/// Opens [`KvClient`] connections.
pub trait KvConnector {
    type Client: KvClient;

    fn connect(&self, endpoint: &str, options: &ConnectOptions) -> Result<Self::Client>;
}

// == Remote Cache ==
pub struct RemoteCache<C: KvClient> {
    client: Option<C>,
    namespace: String,
    default_ttl: Duration,
    enabled: bool,
    stats: CacheStats,
    errors: ErrorLog,
}

impl<C: KvClient> RemoteCache<C> {
    // == Constructors ==
    /// Connects through `connector`. A failed connection is recorded and
    /// leaves the store unconnected rather than failing.
    pub fn connect<K>(connector: &K, namespace: &str, endpoint: &str, options: &ConnectOptions) -> Self
    where
        K: KvConnector<Client = C>,
    {
        let mut cache = Self::unconnected(namespace);
        match connector.connect(endpoint, options) {
            Ok(client) => {
                debug!(endpoint, namespace = %cache.namespace, "remote cache connected");
                cache.client = Some(client);
            }
            Err(e) => {
                warn!(endpoint, "remote cache connection failed");
                cache.errors.record(e);
            }
        }
        cache
    }

    /// Wraps an already open client.
    pub fn with_client(client: C, namespace: &str) -> Self {
        let mut cache = Self::unconnected(namespace);
        cache.client = Some(client);
        cache
    }

    /// Connects with the configured endpoint and namespace, enabling the
    /// store if configured so.
    pub fn from_config<K>(config: &Config, connector: &K) -> Self
    where
        K: KvConnector<Client = C>,
    {
        let mut cache = Self::connect(
            connector,
            &config.namespace,
            &config.endpoint,
            &ConnectOptions::new(),
        )
        .with_default_ttl(config.default_ttl());
        cache.set_state(config.enabled);
        cache
    }

    fn unconnected(namespace: &str) -> Self {
        Self {
            client: None,
            namespace: namespace.to_lowercase(),
            default_ttl: DEFAULT_REMOTE_TTL,
            enabled: false,
            stats: CacheStats::new(),
            errors: ErrorLog::new(),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn set_default_ttl(&mut self, ttl: Duration) -> &mut Self {
        self.default_ttl = ttl;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn not_connected() -> CacheError {
        CacheError::Connection("remote cache is not connected".to_string())
    }
}

impl<C: KvClient> Cache for RemoteCache<C> {
    fn get(&mut self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let Some(client) = self.client.as_ref() else {
            self.errors.record(Self::not_connected());
            return None;
        };

        match client.get_item(&self.namespace, &escape_reserved(key)) {
            Ok(item) if item.is_hit => {
                self.stats.record_hit();
                Some(item.value)
            }
            Ok(_) => {
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
        if !self.enabled {
            return self;
        }
        let Some(client) = self.client.as_mut() else {
            self.errors.record(Self::not_connected());
            return self;
        };

        let ttl = effective_ttl(ttl, self.default_ttl);
        match client.save(&self.namespace, &escape_reserved(key), value, ttl) {
            Ok(()) => self.stats.record_write(),
            Err(e) => self.errors.record(e),
        }
        self
    }

    fn delete(&mut self, key: &str) -> &mut Self {
        if !self.enabled {
            return self;
        }
        let Some(client) = self.client.as_mut() else {
            self.errors.record(Self::not_connected());
            return self;
        };

        if let Err(e) = client.save(&self.namespace, &escape_reserved(key), Value::Null, Duration::ZERO) {
            self.errors.record(e);
        }
        self
    }

    fn clear(&mut self) -> &mut Self {
        if !self.enabled {
            return self;
        }
        let Some(client) = self.client.as_mut() else {
            self.errors.record(Self::not_connected());
            return self;
        };

        if let Err(e) = client.clear(&self.namespace) {
            self.errors.record(e);
        }
        self
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_state(&mut self, enabled: bool) -> &mut Self {
        self.enabled = enabled;
        self
    }

    fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    fn error_log_mut(&mut self) -> &mut ErrorLog {
        &mut self.errors
    }
}

impl<C: KvClient> Connected for RemoteCache<C> {
    fn is_connected(&self) -> bool {
        self.client.is_some()
    }
}

// == In-Memory Client ==
/// Endpoint scheme accepted by [`MemoryConnector`].
pub const MEMORY_SCHEME: &str = "memory://";

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: i64,
}

type Slots = HashMap<(String, String), Slot>;

/// In-process stand-in for a remote store. Every client it opens shares the
/// same data, so several handles behave like several connections.
#[derive(Clone)]
pub struct MemoryConnector {
    slots: Arc<Mutex<Slots>>,
    clock: Arc<dyn Clock>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(clock),
        }
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl KvConnector for MemoryConnector {
    type Client = MemoryKv;

    /// Accepts `memory://<name>` endpoints. The `read_only` option set to
    /// `true` makes every save fail.
    fn connect(&self, endpoint: &str, options: &ConnectOptions) -> Result<MemoryKv> {
        if !endpoint.starts_with(MEMORY_SCHEME) {
            return Err(CacheError::Connection(format!(
                "unsupported endpoint: {}",
                endpoint
            )));
        }

        let read_only = options
            .get("read_only")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(MemoryKv {
            slots: self.slots.clone(),
            clock: self.clock.clone(),
            read_only,
        })
    }
}

/// Connection opened by [`MemoryConnector`].
pub struct MemoryKv {
    slots: Arc<Mutex<Slots>>,
    clock: Arc<dyn Clock>,
    read_only: bool,
}

impl MemoryKv {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Slots>> {
        self.slots
            .lock()
            .map_err(|_| CacheError::Connection("memory store lock poisoned".to_string()))
    }
}

impl KvClient for MemoryKv {
    fn get_item(&self, namespace: &str, key: &str) -> Result<KvItem> {
        let now = self.clock.now();
        let mut slots = self.lock()?;
        let id = (namespace.to_string(), key.to_string());

        match slots.get(&id) {
            Some(slot) if now <= slot.expires_at => Ok(KvItem::hit(slot.value.clone())),
            Some(_) => {
                slots.remove(&id);
                Ok(KvItem::miss())
            }
            None => Ok(KvItem::miss()),
        }
    }

    fn save(&mut self, namespace: &str, key: &str, value: Value, ttl: Duration) -> Result<()> {
        if self.read_only {
            return Err(CacheError::Set(format!("read-only connection, key {}", key)));
        }

        let now = self.clock.now();
        let mut slots = self.lock()?;
        let id = (namespace.to_string(), key.to_string());

        if ttl.is_zero() {
            slots.remove(&id);
        } else {
            slots.insert(
                id,
                Slot {
                    value,
                    expires_at: compute_expiry(now, ttl),
                },
            );
        }
        Ok(())
    }

    fn clear(&mut self, namespace: &str) -> Result<()> {
        let mut slots = self.lock()?;
        slots.retain(|(ns, _), _| ns != namespace);
        Ok(())
    }
}
