//! TTL-scoped response cache. Entries are complete response values keyed by
//! request identity and replaced wholesale; expiry is checked lazily on read.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Station detail responses go stale fast; list responses can linger.
pub const STATION_DETAIL_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

pub struct TtlCache<T: Clone> {
    entries: DashMap<String, (Instant, T)>,
    default_ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(default_ttl: Duration) -> TtlCache<T> {
        TtlCache {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        match self.entries.get(key) {
            None => return None,
            Some(entry) => {
                let (deadline, value) = entry.value();
                if *deadline > Instant::now() {
                    return Some(value.clone());
                }
            }
        }
        // guard dropped above, safe to take the write path
        self.entries.remove(key);
        None
    }

    pub fn set(&self, key: &str, value: T, ttl: Option<Duration>) {
        let deadline = Instant::now() + ttl.unwrap_or(self.default_ttl);
        self.entries.insert(key.to_string(), (deadline, value));
    }
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> TtlCache<T> {
        TtlCache::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("bus/stations/123/api", 7_u32, None);
        assert_eq!(cache.get("bus/stations/123/api"), Some(7));
    }

    #[test]
    fn expired_entries_are_evicted() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("bus/stations/123/api", 7_u32, Some(Duration::ZERO));
        assert_eq!(cache.get("bus/stations/123/api"), None);
    }

    #[test]
    fn per_entry_ttl_overrides_the_default() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.set("bus/lines", 1_u32, Some(Duration::from_secs(60)));
        assert_eq!(cache.get("bus/lines"), Some(1));
    }

    #[test]
    fn missing_key_is_none() {
        let cache: TtlCache<u32> = TtlCache::default();
        assert_eq!(cache.get("tram/stations"), None);
    }
}
