//! Cache Entry Module
//!
//! Defines the on-disk envelope of the JSON store and the expiry arithmetic
//! shared by the stores.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, Result};

// == Cache Entry ==
/// Stored unit of the JSON store: `{"expire": <unix seconds>, "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Absolute expiry, UNIX seconds. Valid while `now <= expire`.
    pub expire: i64,
    /// The stored value
    #[serde(default)]
    pub value: Value,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry expiring `ttl` after `now`.
    pub fn new(value: Value, now: i64, ttl: Duration) -> Self {
        Self {
            expire: compute_expiry(now, ttl),
            value,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// The expiry second itself is still valid; the entry is expired only
    /// once `now` is strictly past it.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expire
    }

    // == Time To Live ==
    /// Remaining lifetime in seconds, 0 once expired.
    pub fn ttl_remaining(&self, now: i64) -> u64 {
        u64::try_from(self.expire - now).unwrap_or(0)
    }

    // == Envelope Codec ==
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CacheError::Encode(e.to_string()))
    }

    /// Parses an envelope. `None` means the bytes are not a valid envelope.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

// == Expiry Arithmetic ==
/// `now + ttl`, saturating.
pub fn compute_expiry(now: i64, ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    now.saturating_add(ttl)
}

/// Picks the call-site TTL unless it is absent or zero. Fractions of a
/// second round up, since expiry is kept in whole seconds.
pub fn effective_ttl(override_ttl: Option<Duration>, default_ttl: Duration) -> Duration {
    match override_ttl {
        Some(ttl) if !ttl.is_zero() => {
            let extra = u64::from(ttl.subsec_nanos() > 0);
            Duration::from_secs(ttl.as_secs().saturating_add(extra))
        }
        _ => default_ttl,
    }
}

/// Age check used by the raw store: `now > modified + max_life`.
pub fn is_past_max_life(modified: i64, max_life: Duration, now: i64) -> bool {
    now > compute_expiry(modified, max_life)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new(json!("v"), 1_000, Duration::from_secs(60));

        assert_eq!(entry.expire, 1_060);
        assert_eq!(entry.value, json!("v"));
        assert!(!entry.is_expired(1_000));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = CacheEntry::new(json!(1), 1_000, Duration::from_secs(5));

        assert!(!entry.is_expired(1_004));
        assert!(!entry.is_expired(1_005), "Expiry second is still valid");
        assert!(entry.is_expired(1_006));
    }

    #[test]
    fn test_ttl_remaining() {
        let entry = CacheEntry::new(json!(1), 1_000, Duration::from_secs(10));

        assert_eq!(entry.ttl_remaining(1_000), 10);
        assert_eq!(entry.ttl_remaining(1_009), 1);
        assert_eq!(entry.ttl_remaining(2_000), 0);
    }

    #[test]
    fn test_envelope_format() {
        let entry = CacheEntry {
            expire: 1_700_000_000,
            value: json!({"name": "Ana"}),
        };

        let text = String::from_utf8(entry.to_bytes().unwrap()).unwrap();
        assert_eq!(text, r#"{"expire":1700000000,"value":{"name":"Ana"}}"#);
        assert_eq!(CacheEntry::from_bytes(text.as_bytes()), Some(entry));
    }

    #[test]
    fn test_envelope_rejects_invalid_shapes() {
        assert!(CacheEntry::from_bytes(b"not json").is_none());
        assert!(CacheEntry::from_bytes(br#"{"value": 1}"#).is_none());
        assert!(CacheEntry::from_bytes(br#"{"expire": "soon", "value": 1}"#).is_none());
        assert!(CacheEntry::from_bytes(b"42").is_none());
        assert!(CacheEntry::from_bytes(b"").is_none());
    }

    #[test]
    fn test_envelope_missing_value_is_null() {
        let entry = CacheEntry::from_bytes(br#"{"expire": 5}"#).unwrap();
        assert_eq!(entry.value, Value::Null);
    }

    #[test]
    fn test_effective_ttl() {
        let default = Duration::from_secs(300);

        assert_eq!(effective_ttl(None, default), default);
        assert_eq!(effective_ttl(Some(Duration::ZERO), default), default);
        assert_eq!(
            effective_ttl(Some(Duration::from_secs(5)), default),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_effective_ttl_rounds_fractions_up() {
        let default = Duration::from_secs(300);

        assert_eq!(
            effective_ttl(Some(Duration::from_millis(500)), default),
            Duration::from_secs(1)
        );
        assert_eq!(
            effective_ttl(Some(Duration::from_millis(2_001)), default),
            Duration::from_secs(3)
        );
        let tiny = effective_ttl(Some(Duration::from_nanos(1)), default);
        assert_eq!(compute_expiry(100, tiny), 101);
    }

    #[test]
    fn test_compute_expiry_saturates() {
        assert_eq!(compute_expiry(i64::MAX - 1, Duration::from_secs(10)), i64::MAX);
        assert_eq!(compute_expiry(0, Duration::MAX), i64::MAX);
    }

    #[test]
    fn test_is_past_max_life() {
        let max = Duration::from_secs(60);
        assert!(!is_past_max_life(1_000, max, 1_060));
        assert!(is_past_max_life(1_000, max, 1_061));
    }
}
