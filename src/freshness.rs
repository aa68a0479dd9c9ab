//! Per-entity-kind "have we seen this recently" gate.
//!
//! Mirrors `EventHandler.is_fresh` / the four `*_cache` dicts in the
//! original's `event.py`: each entity kind keeps a map from key to the
//! timestamp it was last admitted, gated by its own update interval from
//! config, with a periodic sweep evicting stale entries.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::StoreConfig;
use crate::event::Origin;

/// Cache key for SSID events: known-source SSIDs are keyed by the reporting
/// MAC plus origin (multiple frame classes can independently report the same
/// MAC's SSID); anonymous (probe request) SSIDs have no MAC, so they are
/// keyed by the SSID text plus origin instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SsidKey {
    ByMac(u64, OriginKey),
    BySsid(Vec<u8>, OriginKey),
}

/// `Origin` isn't `Hash`/`Eq` (it doesn't need to be, elsewhere); this gives
/// cache keys a hashable stand-in without adding those derives to the public
/// event type for a single internal use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OriginKey(u8);

impl From<Origin> for OriginKey {
    fn from(o: Origin) -> Self {
        OriginKey(match o {
            Origin::Beacon => 0,
            Origin::Mgmt => 1,
            Origin::Ctrl => 2,
            Origin::Data => 3,
            Origin::ProbeReq => 4,
            Origin::ProbeResp => 5,
        })
    }
}

struct Cache<K> {
    entries: Mutex<HashMap<K, DateTime<Utc>>>,
    threshold: Duration,
}

impl<K: std::hash::Hash + Eq + Clone> Cache<K> {
    fn new(threshold: Duration) -> Self {
        Cache {
            entries: Mutex::new(HashMap::new()),
            threshold,
        }
    }

    /// Admits `key` at `now` iff it is absent, or was last admitted more than
    /// `threshold` ago. Admission atomically updates the stored timestamp so
    /// concurrent callers racing on the same key only ever see one admit.
    fn admit(&self, key: K, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock().expect("freshness cache poisoned");
        match entries.get(&key) {
            Some(last) if now.signed_duration_since(*last).to_std().unwrap_or(Duration::ZERO) <= self.threshold => {
                false
            }
            _ => {
                entries.insert(key, now);
                true
            }
        }
    }

    fn evict_older_than(&self, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().expect("freshness cache poisoned");
        entries.retain(|_, last| {
            now.signed_duration_since(*last).to_std().unwrap_or(Duration::ZERO) <= self.threshold
        });
    }
}

/// Shared, thread-safe freshness gate for all four entity kinds. One
/// instance is shared across all `EventWorker`s so "have we seen this mac
/// recently" is a single fleet-wide answer, not per-worker.
pub struct FreshnessCache {
    mac: Cache<u64>,
    ssid: Cache<SsidKey>,
    geo: Cache<u64>,
    association: Cache<(i64, i64)>,
}

/// Interval between sweeps, matching the original's `clear_cache_timer`.
pub const EVICTION_INTERVAL: Duration = Duration::from_secs(120);

impl FreshnessCache {
    pub fn new(cfg: &StoreConfig) -> Self {
        FreshnessCache {
            mac: Cache::new(secs(cfg.mac_update_interval)),
            ssid: Cache::new(secs(cfg.ap_update_interval)),
            geo: Cache::new(secs(cfg.geo_update_interval)),
            association: Cache::new(secs(cfg.association_update_interval)),
        }
    }

    pub fn admit_mac(&self, mac: u64, now: DateTime<Utc>) -> bool {
        self.mac.admit(mac, now)
    }

    pub fn admit_ssid(&self, key: SsidKey, now: DateTime<Utc>) -> bool {
        self.ssid.admit(key, now)
    }

    pub fn admit_geo(&self, mac: u64, now: DateTime<Utc>) -> bool {
        self.geo.admit(mac, now)
    }

    /// Only callable once both sta/ap ids have resolved to `Some` — an
    /// all-`None` key must never occupy a cache slot. The original admitted
    /// `(sta_id, ap_id)` into the freshness cache before checking either was
    /// non-`None`, so a run of unresolved associations could starve out a
    /// later, resolvable one sharing the same `(None, None)` key. Resolve
    /// first, gate second.
    pub fn admit_association(&self, sta_id: i64, ap_id: i64, now: DateTime<Utc>) -> bool {
        self.association.admit((sta_id, ap_id), now)
    }

    pub fn evict_stale(&self, now: DateTime<Utc>) {
        self.mac.evict_older_than(now);
        self.ssid.evict_older_than(now);
        self.geo.evict_older_than(now);
        self.association.evict_older_than(now);
    }
}

fn secs(v: f64) -> Duration {
    Duration::from_secs_f64(v.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn mac_admits_once_then_suppresses_within_window() {
        let cache = FreshnessCache::new(&Config::default_config().store);
        let now = Utc::now();
        assert!(cache.admit_mac(1, now));
        assert!(!cache.admit_mac(1, now));
    }

    #[test]
    fn mac_admits_again_after_interval_elapses() {
        let cache = FreshnessCache::new(&Config::default_config().store);
        let t0 = Utc::now();
        assert!(cache.admit_mac(1, t0));
        let t1 = t0 + chrono::Duration::seconds(61);
        assert!(cache.admit_mac(1, t1));
    }

    #[test]
    fn ssid_keys_distinguish_known_and_anonymous_source() {
        let cache = FreshnessCache::new(&Config::default_config().store);
        let now = Utc::now();
        let by_mac = SsidKey::ByMac(1, Origin::Beacon.into());
        let by_ssid = SsidKey::BySsid(b"home".to_vec(), Origin::ProbeReq.into());
        assert!(cache.admit_ssid(by_mac, now));
        assert!(cache.admit_ssid(by_ssid, now));
    }

    #[test]
    fn association_keys_require_both_ids_resolved() {
        let cache = FreshnessCache::new(&Config::default_config().store);
        let now = Utc::now();
        assert!(cache.admit_association(10, 20, now));
        assert!(!cache.admit_association(10, 20, now));
    }
}
