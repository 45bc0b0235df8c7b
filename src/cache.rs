//! Process-wide cache of parsed declaration blocks.
//!
//! Email templates repeat the same rule bodies across thousands of sends; keying the parsed
//! declarations by the raw block text lets repeated transforms skip the parser. The cache never
//! influences output, only how often the parser runs.

use crate::declaration::{Declaration, parse_declarations};
use crate::error::InlinerError;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_ENTRIES: usize = 128;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

pub const CACHE_ENV: &str = "CSS_INLINER_CACHE";
pub const CACHE_MAXSIZE_ENV: &str = "CSS_INLINER_CACHE_MAXSIZE";
pub const CACHE_TTL_ENV: &str = "CSS_INLINER_CACHE_TTL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Least recently used entry goes first.
    Lru,
    /// LRU order, and entries older than the TTL count as misses.
    Ttl(Duration),
    /// An arbitrary entry goes when full.
    Random,
    /// Nothing is stored.
    Disabled,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Ttl(_) => "ttl",
            EvictionPolicy::Random => "random",
            EvictionPolicy::Disabled => "none",
        }
    }
}

type Parsed = Arc<Vec<Declaration>>;

struct Entry {
    declarations: Parsed,
    inserted: Instant,
}

enum Store {
    Ordered(LruCache<String, Entry>),
    Unordered(HashMap<String, Entry>),
    Off,
}

struct CacheState {
    store: Store,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct StylesheetCache {
    policy: EvictionPolicy,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl StylesheetCache {
    pub fn new(policy: EvictionPolicy, max_entries: usize) -> Self {
        let store = match (policy, NonZeroUsize::new(max_entries)) {
            (EvictionPolicy::Disabled, _) | (_, None) => Store::Off,
            (EvictionPolicy::Lru | EvictionPolicy::Ttl(_), Some(cap)) => {
                Store::Ordered(LruCache::new(cap))
            }
            (EvictionPolicy::Random, Some(_)) => Store::Unordered(HashMap::new()),
        };
        Self {
            policy,
            max_entries,
            state: Mutex::new(CacheState {
                store,
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn lru(max_entries: usize) -> Self {
        Self::new(EvictionPolicy::Lru, max_entries)
    }

    pub fn disabled() -> Self {
        Self::new(EvictionPolicy::Disabled, 0)
    }

    /// Builds a cache from `CSS_INLINER_CACHE` (`LRU`, `TTL`, `RANDOM`, `NONE`),
    /// `CSS_INLINER_CACHE_MAXSIZE` and `CSS_INLINER_CACHE_TTL` (seconds).
    pub fn from_env() -> Result<Self, InlinerError> {
        let kind = std::env::var(CACHE_ENV).ok();
        let max = std::env::var(CACHE_MAXSIZE_ENV).ok();
        let ttl = std::env::var(CACHE_TTL_ENV).ok();
        Self::from_settings(kind.as_deref(), max.as_deref(), ttl.as_deref())
    }

    pub(crate) fn from_settings(
        kind: Option<&str>,
        max_entries: Option<&str>,
        ttl_secs: Option<&str>,
    ) -> Result<Self, InlinerError> {
        let max_entries = match max_entries {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                InlinerError::InvalidConfiguration(format!(
                    "{CACHE_MAXSIZE_ENV} must be a non-negative integer, got {raw:?}"
                ))
            })?,
            None => DEFAULT_CACHE_ENTRIES,
        };
        let ttl = match ttl_secs {
            Some(raw) => Duration::from_secs(raw.trim().parse::<u64>().map_err(|_| {
                InlinerError::InvalidConfiguration(format!(
                    "{CACHE_TTL_ENV} must be a number of seconds, got {raw:?}"
                ))
            })?),
            None => DEFAULT_CACHE_TTL,
        };
        let policy = match kind.map(|k| k.trim().to_ascii_uppercase()).as_deref() {
            None | Some("") | Some("LRU") => EvictionPolicy::Lru,
            Some("TTL") => EvictionPolicy::Ttl(ttl),
            Some("RANDOM") | Some("RR") => EvictionPolicy::Random,
            Some("NONE") | Some("OFF") => EvictionPolicy::Disabled,
            Some(other) => {
                return Err(InlinerError::InvalidConfiguration(format!(
                    "unsupported cache implementation {other:?}"
                )));
            }
        };
        Ok(Self::new(policy, max_entries))
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parsed declarations for `block`, parsing on a miss.
    pub fn declarations(&self, block: &str) -> Parsed {
        if let Some(hit) = self.lookup(block) {
            return hit;
        }
        // Parse outside the cache lock; a racing thread may insert the same key first.
        let parsed: Parsed = Arc::new(parse_declarations(block));
        self.insert(block, Arc::clone(&parsed));
        parsed
    }

    fn lookup(&self, block: &str) -> Option<Parsed> {
        let mut state = self.lock();
        let ttl = match self.policy {
            EvictionPolicy::Ttl(ttl) => Some(ttl),
            _ => None,
        };
        let found = match &mut state.store {
            Store::Ordered(lru) => {
                let expired = match (lru.get(block), ttl) {
                    (Some(entry), Some(ttl)) => entry.inserted.elapsed() > ttl,
                    _ => false,
                };
                if expired {
                    // Another thread may already have dropped it; `pop` tolerates that.
                    lru.pop(block);
                    None
                } else {
                    lru.get(block).map(|entry| Arc::clone(&entry.declarations))
                }
            }
            Store::Unordered(map) => map.get(block).map(|entry| Arc::clone(&entry.declarations)),
            Store::Off => None,
        };
        if found.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        found
    }

    fn insert(&self, block: &str, declarations: Parsed) {
        let max_entries = self.max_entries;
        let mut state = self.lock();
        let entry = Entry {
            declarations,
            inserted: Instant::now(),
        };
        match &mut state.store {
            Store::Ordered(lru) => {
                lru.put(block.to_string(), entry);
            }
            Store::Unordered(map) => {
                if !map.contains_key(block) && map.len() >= max_entries {
                    // Hash order stands in for a random pick.
                    let victim = map.keys().next().cloned();
                    if let Some(victim) = victim {
                        map.remove(&victim);
                    }
                }
                map.insert(block.to_string(), entry);
            }
            Store::Off => {}
        }
    }

    pub fn len(&self) -> usize {
        match &self.lock().store {
            Store::Ordered(lru) => lru.len(),
            Store::Unordered(map) => map.len(),
            Store::Off => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let entries = match &state.store {
            Store::Ordered(lru) => lru.len(),
            Store::Unordered(map) => map.len(),
            Store::Off => 0,
        };
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries,
        }
    }
}

impl Default for StylesheetCache {
    fn default() -> Self {
        Self::lru(DEFAULT_CACHE_ENTRIES)
    }
}

impl std::fmt::Debug for StylesheetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StylesheetCache")
            .field("policy", &self.policy)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_after_first_parse() {
        let cache = StylesheetCache::lru(4);
        let first = cache.declarations("color:red");
        let second = cache.declarations("color:red");
        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn lru_evicts_least_recent() {
        let cache = StylesheetCache::lru(2);
        cache.declarations("a:1");
        cache.declarations("b:2");
        cache.declarations("a:1");
        cache.declarations("c:3");
        assert_eq!(cache.len(), 2);
        cache.declarations("a:1");
        assert_eq!(cache.stats().hits, 2, "a:1 must have survived the eviction of b:2");
    }

    #[test]
    fn random_policy_stays_bounded() {
        let cache = StylesheetCache::new(EvictionPolicy::Random, 3);
        for idx in 0..10 {
            cache.declarations(&format!("width:{idx}px"));
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = StylesheetCache::new(EvictionPolicy::Ttl(Duration::ZERO), 8);
        cache.declarations("color:red");
        std::thread::sleep(Duration::from_millis(2));
        cache.declarations("color:red");
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn disabled_never_stores() {
        let cache = StylesheetCache::disabled();
        let parsed = cache.declarations("color:red");
        assert_eq!(parsed.len(), 1);
        assert!(cache.is_empty());
        let zero = StylesheetCache::lru(0);
        zero.declarations("color:red");
        assert!(zero.is_empty());
    }

    #[test]
    fn settings_select_policy() {
        let cache = StylesheetCache::from_settings(Some("ttl"), Some("50"), Some("10"))
            .expect("ttl settings");
        assert_eq!(cache.policy(), EvictionPolicy::Ttl(Duration::from_secs(10)));
        assert_eq!(cache.max_entries(), 50);

        let default = StylesheetCache::from_settings(None, None, None).expect("defaults");
        assert_eq!(default.policy(), EvictionPolicy::Lru);
        assert_eq!(default.max_entries(), DEFAULT_CACHE_ENTRIES);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = StylesheetCache::from_settings(Some("UNKNOWN"), None, None)
            .expect_err("unknown policy");
        assert!(
            err.to_string().contains("unsupported cache implementation"),
            "{err}"
        );
    }

    #[test]
    fn concurrent_lookups_and_evictions() {
        let cache = Arc::new(StylesheetCache::new(EvictionPolicy::Ttl(Duration::ZERO), 2));
        let handles: Vec<_> = (0..8)
            .map(|thread| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for idx in 0..100 {
                        let block = format!("margin:{}px", (thread + idx) % 3);
                        assert_eq!(cache.declarations(&block).len(), 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("cache thread panicked");
        }
        assert!(cache.len() <= 2);
    }
}
