//! 寻路服务：带 TTL 的有界缓存 + 三种便捷模式 + 过期检查

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::cache::{CacheStats, TtlCache};
use crate::core::PathFailure;
use crate::map::{MapGraph, MapStore, NodeId};
use crate::planner::constraints::PathConstraints;
use crate::planner::search::{find_path, Path, StepTiming};

/// 缓存键：起点、终点与整组约束
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathKey {
    pub from: NodeId,
    pub to: NodeId,
    pub constraints: PathConstraints,
}

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub timing: StepTiming,
    pub max_path_length: usize,
    pub danger_penalty: u32,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            cache_ttl: Duration::from_secs(30 * 60),
            timing: StepTiming::default(),
            max_path_length: crate::planner::constraints::DEFAULT_MAX_PATH_LENGTH,
            danger_penalty: 25,
        }
    }
}

struct PathCache {
    generation: u64,
    entries: TtlCache<PathKey, Arc<Path>>,
}

pub struct PathService {
    map: Arc<MapStore>,
    settings: PlannerSettings,
    cache: Mutex<PathCache>,
}

/// 路径上每个节点与每条边在当前地图中是否仍然存在
pub fn path_is_current(graph: &MapGraph, path: &Path) -> bool {
    graph.contains(path.from)
        && path
            .steps
            .iter()
            .all(|s| graph.contains(s.to) && graph.has_edge(s.from, s.to, s.direction))
}

impl PathService {
    pub fn new(map: Arc<MapStore>, settings: PlannerSettings) -> Self {
        let entries = TtlCache::new(settings.cache_capacity, settings.cache_ttl);
        Self {
            cache: Mutex::new(PathCache {
                generation: map.load_generation(),
                entries,
            }),
            map,
            settings,
        }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    fn lock_cache(&self) -> MutexGuard<'_, PathCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 按给定约束寻路；先查缓存，缓存的路径若已不在当前地图上则丢弃重算
    pub fn find(&self, from: NodeId, to: NodeId, constraints: &PathConstraints) -> Result<Arc<Path>, PathFailure> {
        let graph = self.map.graph().ok_or(PathFailure::MapNotLoaded)?;
        let key = PathKey {
            from,
            to,
            constraints: *constraints,
        };

        {
            let mut cache = self.lock_cache();
            let generation = self.map.load_generation();
            if cache.generation != generation {
                // 地图替换后只保留仍然有效的路径
                cache.entries.retain(|_, p| path_is_current(&graph, p));
                cache.generation = generation;
            }
            if let Some(hit) = cache.entries.get(&key) {
                if path_is_current(&graph, &hit) {
                    return Ok(hit);
                }
                tracing::debug!(from = %from, to = %to, "cached path is stale");
                cache.entries.remove(&key);
            }
        }

        let path = Arc::new(find_path(&graph, from, to, constraints, &self.settings.timing)?);
        tracing::debug!(from = %from, to = %to, steps = path.len(), cost = path.total_cost, "path computed");
        self.lock_cache().entries.insert(key, Arc::clone(&path));
        Ok(path)
    }

    /// 纯距离步数：忽略一切危险约束，只用于展示，不得用于移动
    pub fn true_distance(&self, from: NodeId, to: NodeId) -> Option<usize> {
        let c = PathConstraints::unconstrained().with_max_path_length(self.settings.max_path_length);
        self.find(from, to, &c).ok().map(|p| p.len())
    }

    /// 按等级放宽危险容忍度
    pub fn safe_path(&self, from: NodeId, to: NodeId, level: u32) -> Result<Arc<Path>, PathFailure> {
        let c = PathConstraints::safe_for_level(level)
            .with_max_path_length(self.settings.max_path_length)
            .with_danger_penalty(self.settings.danger_penalty);
        self.find(from, to, &c)
    }

    pub fn constrained_path(
        &self,
        from: NodeId,
        to: NodeId,
        constraints: &PathConstraints,
    ) -> Result<Arc<Path>, PathFailure> {
        self.find(from, to, constraints)
    }

    pub fn is_path_current(&self, path: &Path) -> bool {
        self.map
            .graph()
            .map(|g| path_is_current(&g, path))
            .unwrap_or(false)
    }

    pub fn clear_cache(&self) {
        self.lock_cache().entries.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.lock_cache().entries.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().entries.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = r#"{
        "nodes": [
            {"id": 1, "label": "Square"},
            {"id": 2, "label": "Alley"},
            {"id": 3, "label": "Lair", "spawn_total": 8}
        ],
        "edges": [
            {"source": 1, "target": 2, "direction": "south"},
            {"source": 2, "target": 3, "direction": "south"}
        ]
    }"#;

    fn service() -> (Arc<MapStore>, PathService) {
        let store = Arc::new(MapStore::unloaded());
        store.load_from_str(LINE).unwrap();
        let svc = PathService::new(Arc::clone(&store), PlannerSettings::default());
        (store, svc)
    }

    #[test]
    fn test_cache_hit_returns_same_path() {
        let (_, svc) = service();
        let c = PathConstraints::unconstrained();
        let a = svc.find(NodeId(1), NodeId(2), &c).unwrap();
        let b = svc.find(NodeId(1), NodeId(2), &c).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(svc.cache_len(), 1);
        assert_eq!(svc.cache_stats().hits, 1);

        // 不同约束是不同的键
        svc.find(NodeId(1), NodeId(2), &PathConstraints::strict()).unwrap();
        assert_eq!(svc.cache_len(), 2);
    }

    #[test]
    fn test_true_distance_ignores_danger() {
        let (_, svc) = service();
        assert_eq!(svc.true_distance(NodeId(1), NodeId(3)), Some(2));
        assert!(matches!(
            svc.safe_path(NodeId(1), NodeId(3), 1),
            Err(PathFailure::TargetForbidden { .. })
        ));
        assert!(svc.safe_path(NodeId(1), NodeId(3), 10).is_ok());
    }

    #[test]
    fn test_staleness_after_map_reload() {
        let (store, svc) = service();
        let path = svc.find(NodeId(1), NodeId(3), &PathConstraints::unconstrained()).unwrap();
        assert!(svc.is_path_current(&path));

        store
            .load_from_str(
                r#"{"nodes": [{"id": 1, "label": "Square"}, {"id": 2, "label": "Alley"}, {"id": 3, "label": "Lair"}],
                    "edges": [{"source": 1, "target": 2, "direction": "south"},
                              {"source": 2, "target": 3, "direction": "east"}]}"#,
            )
            .unwrap();
        assert!(!svc.is_path_current(&path));
        let fresh = svc.find(NodeId(1), NodeId(3), &PathConstraints::unconstrained()).unwrap();
        assert_eq!(fresh.steps[1].direction, crate::parser::Direction::East);
    }

    #[test]
    fn test_unloaded_map_fails_fast() {
        let svc = PathService::new(Arc::new(MapStore::unloaded()), PlannerSettings::default());
        assert_eq!(
            svc.find(NodeId(1), NodeId(2), &PathConstraints::unconstrained()).unwrap_err(),
            PathFailure::MapNotLoaded
        );
    }
}
