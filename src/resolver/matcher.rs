//! 房间解析：把追踪到的快照对应到静态地图节点并给出置信度
//!
//! 流程：
//! 1. 名字相等的节点为候选；没有相等时退到包含；
//! 2. 无候选 → None；
//! 3. 已知上一个房间与移动方向且该方向的边落在候选上 → 直接命中（0.95）；
//! 4. 否则逐个打分，唯一候选直接接受，多个候选取最高分且低于阈值拒绝。
//!
//! 缓存只保存「快照的名字与出口签名在地图上唯一」的匹配；走廊房间既不查缓存也不写缓存。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::cache::{CacheStats, TtlCache};
use crate::map::{MapGraph, MapNode, MapStore, NodeId};
use crate::parser::{exit_signature, Direction};
use crate::resolver::scoring::{
    exit_score, movement_score, name_score, path_score, Signals, Weights,
};
use crate::tracker::RoomSnapshot;

/// 到达边直接命中的置信度
const ARRIVAL_CONFIDENCE: f64 = 0.95;

/// 解析时可用的上下文
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchContext {
    pub previous_room: Option<NodeId>,
    pub last_direction: Option<Direction>,
    /// 进行中导航计划的预期房间
    pub expected_room: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    UniqueName,
    ArrivalEdge,
    Scored,
    Cached,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub node: Arc<MapNode>,
    pub confidence: f64,
    pub method: MatchMethod,
    pub resolved_at: i64,
}

impl MatchResult {
    fn new(node: Arc<MapNode>, confidence: f64, method: MatchMethod) -> Self {
        Self {
            node,
            confidence,
            method,
            resolved_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node.id
    }
}

/// 缓存键：(名字, 出口签名, 上一个房间, 最近方向, 预期房间)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchKey {
    pub name: String,
    pub exit_signature: Vec<Direction>,
    pub previous_room: Option<NodeId>,
    pub last_direction: Option<Direction>,
    pub expected_room: Option<NodeId>,
}

impl MatchKey {
    pub fn new(snapshot: &RoomSnapshot, ctx: &MatchContext) -> Self {
        Self {
            name: snapshot.name.trim().to_lowercase(),
            exit_signature: exit_signature(&snapshot.exits),
            previous_room: ctx.previous_room,
            last_direction: ctx.last_direction,
            expected_room: ctx.expected_room,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedMatch {
    node: NodeId,
    confidence: f64,
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub min_confidence: f64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            cache_capacity: 512,
            cache_ttl: Duration::from_secs(300),
            min_confidence: 0.5,
        }
    }
}

struct ResolverCache {
    /// 缓存对应的地图加载代数；地图替换后整体作废
    generation: u64,
    entries: TtlCache<MatchKey, CachedMatch>,
}

pub struct RoomResolver {
    map: Arc<MapStore>,
    settings: ResolverSettings,
    cache: Mutex<ResolverCache>,
}

/// 名字相等优先，没有相等才退到包含
pub fn candidates(graph: &MapGraph, name: &str) -> Vec<Arc<MapNode>> {
    let name = name.trim();
    if name.is_empty() {
        return Vec::new();
    }
    let exact = graph.find_rooms(|n| n.name_equals(name));
    if !exact.is_empty() {
        return exact;
    }
    graph.find_rooms(|n| n.name_contains(name))
}

fn node_signature(graph: &MapGraph, id: NodeId) -> Vec<Direction> {
    exit_signature(&graph.exit_directions(id))
}

/// 候选中出口签名与快照一致的节点
fn signature_matches<'a>(
    graph: &MapGraph,
    candidates: &'a [Arc<MapNode>],
    snapshot: &RoomSnapshot,
) -> Vec<&'a Arc<MapNode>> {
    let signature = exit_signature(&snapshot.exits);
    candidates
        .iter()
        .filter(|n| node_signature(graph, n.id) == signature)
        .collect()
}

impl RoomResolver {
    pub fn new(map: Arc<MapStore>, settings: ResolverSettings) -> Self {
        let entries = TtlCache::new(settings.cache_capacity, settings.cache_ttl);
        Self {
            cache: Mutex::new(ResolverCache {
                generation: map.load_generation(),
                entries,
            }),
            map,
            settings,
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, ResolverCache> {
        let mut guard = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let generation = self.map.load_generation();
        if guard.generation != generation {
            guard.entries.clear();
            guard.generation = generation;
        }
        guard
    }

    pub fn resolve(&self, snapshot: &RoomSnapshot, ctx: &MatchContext) -> Option<MatchResult> {
        let Some(graph) = self.map.graph() else {
            tracing::debug!("resolve skipped: map not loaded");
            return None;
        };
        let candidates = candidates(&graph, &snapshot.name);
        if candidates.is_empty() {
            tracing::debug!(room = %snapshot.name, "no map candidates");
            return None;
        }

        let same_signature = signature_matches(&graph, &candidates, snapshot);
        let key = MatchKey::new(snapshot, ctx);
        if same_signature.len() <= 1 {
            let cached = self.lock_cache().entries.get(&key);
            if let Some(hit) = cached {
                if let Some(node) = graph.node(hit.node) {
                    return Some(MatchResult::new(Arc::clone(node), hit.confidence, MatchMethod::Cached));
                }
            }
        }

        let result = self.compute(&graph, snapshot, ctx, &candidates)?;

        // 只有快照签名唯一对应到选中的节点时才缓存
        let cacheable = matches!(same_signature.as_slice(), [only] if only.id == result.node.id);
        if cacheable {
            self.lock_cache().entries.insert(
                key,
                CachedMatch {
                    node: result.node.id,
                    confidence: result.confidence,
                },
            );
        }
        tracing::debug!(
            room = %snapshot.name,
            node = %result.node.id,
            confidence = result.confidence,
            method = ?result.method,
            "room resolved"
        );
        Some(result)
    }

    fn compute(
        &self,
        graph: &MapGraph,
        snapshot: &RoomSnapshot,
        ctx: &MatchContext,
        candidates: &[Arc<MapNode>],
    ) -> Option<MatchResult> {
        if let (Some(prev), Some(dir)) = (ctx.previous_room, ctx.last_direction) {
            if let Some(edge) = graph.edge_in_direction(prev, dir) {
                if let Some(node) = candidates.iter().find(|n| n.id == edge.target) {
                    return Some(MatchResult::new(
                        Arc::clone(node),
                        ARRIVAL_CONFIDENCE,
                        MatchMethod::ArrivalEdge,
                    ));
                }
            }
        }

        let mut best: Option<(f64, &Arc<MapNode>)> = None;
        for node in candidates {
            let confidence = self.score(graph, snapshot, ctx, node);
            // 同分时保留先出现的（ID 较小）
            if best.map(|(b, _)| confidence > b).unwrap_or(true) {
                best = Some((confidence, node));
            }
        }
        let (confidence, node) = best?;

        if candidates.len() == 1 {
            return Some(MatchResult::new(Arc::clone(node), confidence, MatchMethod::UniqueName));
        }
        if confidence < self.settings.min_confidence {
            tracing::debug!(
                room = %snapshot.name,
                candidates = candidates.len(),
                best = confidence,
                "best candidate below threshold"
            );
            return None;
        }
        Some(MatchResult::new(Arc::clone(node), confidence, MatchMethod::Scored))
    }

    /// 单个候选的综合得分
    pub fn score(
        &self,
        graph: &MapGraph,
        snapshot: &RoomSnapshot,
        ctx: &MatchContext,
        node: &MapNode,
    ) -> f64 {
        let signals = Signals {
            name: name_score(&snapshot.name, node),
            exits: exit_score(&snapshot.exits, &graph.exit_directions(node.id)),
            path: path_score(graph, node.id, ctx.expected_room),
            movement: movement_score(graph, node.id, ctx.previous_room, ctx.last_direction),
        };
        let weights = Weights::for_path_score(ctx.expected_room.is_some(), signals.path);
        signals.combine(weights)
    }

    /// 解析并返回打上节点 ID 的新快照
    pub fn resolve_and_stamp(
        &self,
        snapshot: &RoomSnapshot,
        ctx: &MatchContext,
    ) -> Option<(MatchResult, RoomSnapshot)> {
        let result = self.resolve(snapshot, ctx)?;
        let stamped = snapshot.with_resolved(result.node.id);
        Some((result, stamped))
    }

    /// 快照是否对应一个走廊房间（地图上有多个同名同出口签名的节点）
    pub fn is_hallway(&self, snapshot: &RoomSnapshot) -> bool {
        let Some(graph) = self.map.graph() else {
            return false;
        };
        let candidates = candidates(&graph, &snapshot.name);
        signature_matches(&graph, &candidates, snapshot).len() > 1
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

    const CORRIDORS: &str = r#"{
        "nodes": [
            {"id": 1, "label": "Square", "x": 0, "y": 0},
            {"id": 2, "label": "Alley", "x": 0, "y": 1},
            {"id": 10, "label": "Corridor", "x": 1, "y": 0},
            {"id": 11, "label": "Corridor", "x": 2, "y": 0},
            {"id": 20, "label": "Guard Room", "x": 5, "y": 5},
            {"id": 21, "label": "Guard Room", "x": 6, "y": 5}
        ],
        "edges": [
            {"source": 1, "target": 2, "direction": "south"},
            {"source": 2, "target": 1, "direction": "north"},
            {"source": 1, "target": 10, "direction": "east"},
            {"source": 10, "target": 1, "direction": "west"},
            {"source": 10, "target": 11, "direction": "east"},
            {"source": 11, "target": 10, "direction": "west"},
            {"source": 11, "target": 1, "direction": "east"},
            {"source": 20, "target": 21, "direction": "east"},
            {"source": 21, "target": 20, "direction": "north"}
        ]
    }"#;

    fn resolver() -> RoomResolver {
        let store = Arc::new(MapStore::unloaded());
        store.load_from_str(CORRIDORS).unwrap();
        RoomResolver::new(store, ResolverSettings::default())
    }

    fn snap(name: &str, exits: &[Direction]) -> RoomSnapshot {
        RoomSnapshot::new(name, exits.to_vec())
    }

    #[test]
    fn test_unique_name_scored() {
        let r = resolver();
        let m = r
            .resolve(&snap("Square", &[Direction::South, Direction::East]), &MatchContext::default())
            .unwrap();
        assert_eq!(m.node.id, NodeId(1));
        assert_eq!(m.method, MatchMethod::UniqueName);
        assert!((m.confidence - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_name_is_none() {
        let r = resolver();
        assert!(r.resolve(&snap("Throne Room", &[]), &MatchContext::default()).is_none());
        assert!(r.resolve(&snap("", &[Direction::North]), &MatchContext::default()).is_none());
    }

    #[test]
    fn test_substring_fallback() {
        let r = resolver();
        let m = r.resolve(&snap("Guard", &[Direction::East]), &MatchContext::default()).unwrap();
        assert_eq!(m.node.id, NodeId(20));
        assert_eq!(m.method, MatchMethod::Scored);
    }

    #[test]
    fn test_arrival_edge_short_circuit() {
        let r = resolver();
        let ctx = MatchContext {
            previous_room: Some(NodeId(10)),
            last_direction: Some(Direction::East),
            expected_room: None,
        };
        let m = r.resolve(&snap("Corridor", &[Direction::East, Direction::West]), &ctx).unwrap();
        assert_eq!(m.node.id, NodeId(11));
        assert_eq!(m.method, MatchMethod::ArrivalEdge);
        assert!((m.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_hallway_never_cached() {
        let r = resolver();
        let corridor = snap("Corridor", &[Direction::East, Direction::West]);
        assert!(r.is_hallway(&corridor));

        let first = r.resolve(&corridor, &MatchContext::default()).unwrap();
        let second = r.resolve(&corridor, &MatchContext::default()).unwrap();
        assert_eq!(first.method, MatchMethod::Scored);
        assert_eq!(second.method, MatchMethod::Scored);
        assert_eq!(r.cache_len(), 0);
    }

    #[test]
    fn test_unique_signature_is_cached() {
        let r = resolver();
        let guard = snap("Guard Room", &[Direction::East]);
        assert!(!r.is_hallway(&guard));

        let first = r.resolve(&guard, &MatchContext::default()).unwrap();
        assert_eq!(first.node.id, NodeId(20));
        let second = r.resolve(&guard, &MatchContext::default()).unwrap();
        assert_eq!(second.method, MatchMethod::Cached);
        assert_eq!(second.node.id, NodeId(20));
        assert_eq!(r.cache_len(), 1);

        r.clear_cache();
        assert_eq!(r.cache_len(), 0);
    }

    #[test]
    fn test_below_threshold_rejected() {
        let r = resolver();
        // 方向与地图矛盾、出口完全不符
        let ctx = MatchContext {
            previous_room: Some(NodeId(2)),
            last_direction: Some(Direction::Up),
            expected_room: None,
        };
        assert!(r.resolve(&snap("Corridor", &[Direction::Up]), &ctx).is_none());
    }

    #[test]
    fn test_expected_room_dominates() {
        let r = resolver();
        let ctx = MatchContext {
            previous_room: None,
            last_direction: None,
            expected_room: Some(NodeId(11)),
        };
        let m = r.resolve(&snap("Corridor", &[Direction::East, Direction::West]), &ctx).unwrap();
        assert_eq!(m.node.id, NodeId(11));
    }

    #[test]
    fn test_resolve_and_stamp() {
        let r = resolver();
        let original = snap("Alley", &[Direction::North]);
        let (m, stamped) = r.resolve_and_stamp(&original, &MatchContext::default()).unwrap();
        assert_eq!(stamped.resolved_node, Some(m.node.id));
        assert_eq!(original.resolved_node, None);
    }

    const HALLS: &str = r#"{
        "nodes": [
            {"id": 1, "label": "Hall", "x": 0, "y": 0},
            {"id": 2, "label": "Hall", "x": 1, "y": 0},
            {"id": 3, "label": "Hall", "x": 0, "y": 2},
            {"id": 9, "label": "Lobby", "x": 0, "y": 3}
        ],
        "edges": [
            {"source": 1, "target": 2, "direction": "east"},
            {"source": 2, "target": 1, "direction": "west"},
            {"source": 1, "target": 9, "direction": "west"},
            {"source": 2, "target": 9, "direction": "east"},
            {"source": 3, "target": 9, "direction": "east"},
            {"source": 3, "target": 9, "direction": "south"},
            {"source": 9, "target": 3, "direction": "north"}
        ]
    }"#;

    #[test]
    fn test_hallway_snapshot_bypasses_cache_across_contexts() {
        let store = Arc::new(MapStore::unloaded());
        store.load_from_str(HALLS).unwrap();
        let r = RoomResolver::new(store, ResolverSettings::default());

        // 选中的 #3 签名唯一，但快照 [east, west] 对应 #1/#2 两个走廊
        let hall = snap("Hall", &[Direction::East, Direction::West]);
        assert!(r.is_hallway(&hall));

        let guided = MatchContext {
            previous_room: Some(NodeId(9)),
            last_direction: Some(Direction::North),
            expected_room: Some(NodeId(3)),
        };
        let first = r.resolve(&hall, &guided).unwrap();
        assert_eq!(first.node.id, NodeId(3));
        assert_ne!(first.method, MatchMethod::Cached);

        let unguided = MatchContext {
            expected_room: None,
            ..guided
        };
        let second = r.resolve(&hall, &unguided).unwrap();
        assert_ne!(second.method, MatchMethod::Cached);
        let third = r.resolve(&hall, &MatchContext::default()).unwrap();
        assert_ne!(third.method, MatchMethod::Cached);
        assert_eq!(r.cache_len(), 0);
    }

    #[test]
    fn test_expected_room_is_part_of_cache_key() {
        let r = resolver();
        let guard = snap("Guard Room", &[Direction::East]);
        let guided = MatchContext {
            expected_room: Some(NodeId(20)),
            ..MatchContext::default()
        };
        r.resolve(&guard, &guided).unwrap();
        let other = r.resolve(&guard, &MatchContext::default()).unwrap();
        assert_ne!(other.method, MatchMethod::Cached);
        assert_eq!(r.cache_len(), 2);
    }
}
