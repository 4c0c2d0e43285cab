//! TTL+LRU permission decision cache (C2).
//!
//! Grounded on the same `DashMap`-backed design used elsewhere in this
//! workspace for short-lived decision memoization: entries expire by TTL,
//! are evicted by least-recent-access once capacity is exceeded, and a
//! background sweeper removes expired entries on a fixed cadence. Unlike a
//! plain TTL cache, invalidation here must be fast by *username* or by
//! *resource*, not just by key — so two secondary indexes are maintained
//! alongside the primary map.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::model::{Decision, PermissionSet};

/// Stable hash over `(username, resource_type, resource_id, action, context-hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(
        username: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        action: &str,
        context: &HashMap<String, String>,
    ) -> Self {
        let mut ctx_entries: Vec<_> = context.iter().collect();
        ctx_entries.sort();
        let mut hasher = Sha256::new();
        hasher.update(username.as_bytes());
        hasher.update(b"\0");
        hasher.update(resource_type.as_bytes());
        hasher.update(b"\0");
        hasher.update(resource_id.unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(action.as_bytes());
        for (k, v) in ctx_entries {
            hasher.update(b"\0");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        CacheKey(format!("{:x}", hasher.finalize()))
    }
}

#[derive(Debug, Clone)]
pub struct CachedDecision {
    pub allowed: bool,
    pub reason: String,
    pub permission_set: Option<PermissionSet>,
    expires_at: Instant,
    last_access: Instant,
}

impl CachedDecision {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let evictions = self.evictions.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsSnapshot {
            hits,
            misses,
            evictions,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// Thread-safe decision cache. Readers never block each other — `DashMap`
/// shards its internal locking, so concurrent `get`s on different shards
/// proceed in parallel.
pub struct DecisionCache {
    entries: DashMap<CacheKey, CachedDecision>,
    by_user: DashMap<String, std::collections::HashSet<CacheKey>>,
    by_resource: DashMap<(String, String), std::collections::HashSet<CacheKey>>,
    ttl: Duration,
    capacity: usize,
    stats: CacheStats,
}

impl DecisionCache {
    pub fn new(ttl: Duration, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            by_user: DashMap::new(),
            by_resource: DashMap::new(),
            ttl,
            capacity,
            stats: CacheStats::default(),
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<Decision> {
        let now = Instant::now();
        let mut hit = None;
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.last_access = now;
                hit = Some(Decision {
                    allowed: entry.allowed,
                    reason: entry.reason.clone(),
                    cache_hit: true,
                    permission_set: entry.permission_set,
                });
            }
        }
        if hit.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Insert a decision, indexed by `username` and (when present)
    /// `(resource_type, resource_id)` so it can be invalidated directly.
    pub fn insert(
        &self,
        key: CacheKey,
        username: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        allowed: bool,
        reason: String,
        permission_set: Option<PermissionSet>,
    ) {
        let now = Instant::now();
        if self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.entries.insert(
            key.clone(),
            CachedDecision {
                allowed,
                reason,
                permission_set,
                expires_at: now + self.ttl,
                last_access: now,
            },
        );
        self.by_user.entry(username.to_string()).or_default().insert(key.clone());
        if let Some(rid) = resource_id {
            self.by_resource
                .entry((resource_type.to_string(), rid.to_string()))
                .or_default()
                .insert(key);
        }
    }

    fn evict_lru(&self) {
        let mut oldest: Option<(CacheKey, Instant)> = None;
        for entry in self.entries.iter() {
            let candidate = (entry.key().clone(), entry.value().last_access);
            if oldest.as_ref().map(|(_, t)| candidate.1 < *t).unwrap_or(true) {
                oldest = Some(candidate);
            }
        }
        if let Some((key, _)) = oldest {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove every cached decision indexed under `username`, before returning.
    pub fn invalidate_user(&self, username: &str) {
        if let Some((_, keys)) = self.by_user.remove(username) {
            for key in keys {
                self.entries.remove(&key);
            }
        }
    }

    /// Remove every cached decision indexed under `(resource_type, resource_id)`.
    pub fn invalidate_resource(&self, resource_type: &str, resource_id: &str) {
        let rkey = (resource_type.to_string(), resource_id.to_string());
        if let Some((_, keys)) = self.by_resource.remove(&rkey) {
            for key in keys {
                self.entries.remove(&key);
            }
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
        self.by_user.clear();
        self.by_resource.clear();
    }

    /// Sweep expired entries. Run on a fixed cadence by a background task.
    pub fn evict_expired(&self) -> u64 {
        let now = Instant::now();
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len() as u64;
        for key in expired {
            self.entries.remove(&key);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the background cleaner task described in §4.2 (default 1 min cadence).
    pub fn spawn_cleaner(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = cache.evict_expired();
                if removed > 0 {
                    tracing::debug!(removed, "permission cache swept expired entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user: &str) -> CacheKey {
        CacheKey::new(user, "ticket", Some("T-1"), "READ", &HashMap::new())
    }

    #[test]
    fn insert_then_get_hits() {
        let cache = DecisionCache::new(Duration::from_secs(60), 10);
        cache.insert(key("alice"), "alice", "ticket", Some("T-1"), true, "direct_user".into(), None);
        let decision = cache.get(&key("alice")).unwrap();
        assert!(decision.allowed);
        assert!(decision.cache_hit);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn invalidate_user_removes_all_their_entries() {
        let cache = DecisionCache::new(Duration::from_secs(60), 10);
        cache.insert(key("alice"), "alice", "ticket", Some("T-1"), true, "r".into(), None);
        cache.invalidate_user("alice");
        assert!(cache.get(&key("alice")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_resource_removes_matching_entries() {
        let cache = DecisionCache::new(Duration::from_secs(60), 10);
        cache.insert(key("alice"), "alice", "ticket", Some("T-1"), true, "r".into(), None);
        cache.invalidate_resource("ticket", "T-1");
        assert!(cache.get(&key("alice")).is_none());
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = DecisionCache::new(Duration::from_millis(1), 10);
        cache.insert(key("alice"), "alice", "ticket", Some("T-1"), true, "r".into(), None);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key("alice")).is_none());
    }

    #[test]
    fn capacity_triggers_lru_eviction() {
        let cache = DecisionCache::new(Duration::from_secs(60), 1);
        cache.insert(key("alice"), "alice", "ticket", Some("T-1"), true, "r".into(), None);
        cache.insert(key("bob"), "bob", "ticket", Some("T-1"), true, "r".into(), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 1);
    }
}
