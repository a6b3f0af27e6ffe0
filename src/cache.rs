//! 有界 + 限时缓存：基于 `lru::LruCache`，查询用 `peek` 不刷新位置，
//! 因此容量满时淘汰的是最早写入的条目；过期检查在查询时顺带完成（无后台清扫）
//!
//! 房间匹配缓存与路径缓存共用此结构；键为结构化类型（派生 Hash/Eq），不拼接字符串。

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct TtlCache<K: Hash + Eq, V> {
    /// 值带写入时刻
    entries: LruCache<K, (Instant, V)>,
    ttl: Duration,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
            stats: CacheStats::default(),
        }
    }

    /// 查询；已过期的条目在此处删除并计为 miss
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = match self.entries.peek(key) {
            Some((inserted_at, _)) => now.saturating_duration_since(*inserted_at) > self.ttl,
            None => {
                self.stats.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.pop(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            return None;
        }
        self.stats.hits += 1;
        self.entries.peek(key).map(|(_, v)| v.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    fn insert_at(&mut self, key: K, value: V, now: Instant) {
        // push 覆盖同键时返回旧值，容量满时返回被淘汰的最旧条目
        if let Some((old_key, _)) = self.entries.push(key.clone(), (now, value)) {
            if old_key != key {
                self.stats.evictions += 1;
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key).map(|(_, v)| v)
    }

    /// 按条件删除（例如地图重载后失效的路径）
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        let dropped: Vec<K> = self
            .entries
            .iter()
            .filter(|(k, (_, v))| !keep(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in dropped {
            self.entries.pop(&key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        // 查询不刷新位置，"a" 仍是最旧的
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&"a"), Some(10));
        // "a" 重新写入后，最早的是 "b"
        cache.insert("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(10));
    }

    #[test]
    fn test_expired_entry_is_dropped_on_lookup() {
        let mut cache = TtlCache::new(4, Duration::from_millis(100));
        let start = Instant::now();
        cache.insert_at("a", 1, start);

        assert_eq!(cache.get_at(&"a", start + Duration::from_millis(50)), Some(1));
        assert_eq!(cache.get_at(&"a", start + Duration::from_millis(150)), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_retain_and_hit_rate() {
        let mut cache = TtlCache::new(8, Duration::from_secs(60));
        for i in 0..4 {
            cache.insert(i, i * 10);
        }
        cache.retain(|k, _| k % 2 == 0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(cache.get(&1), None);
        assert!((cache.stats().hit_rate() - 0.5).abs() < 1e-9);
    }
}
