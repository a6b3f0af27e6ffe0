//! 静态地图存储：一次性加载，整体成功或整体失败
//!
//! 加载失败时 is_loaded() 为 false，不保留任何部分数据；依赖方据此快速失败。

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::core::MapLoadError;
use crate::map::{MapEdge, MapGraph, MapNode, NodeId};
use crate::parser::Direction;

/// 地图文件中的出口（方向为原始字符串，加载时校验）
#[derive(Debug, Deserialize)]
struct RawEdge {
    source: NodeId,
    target: NodeId,
    direction: String,
    #[serde(default)]
    door: bool,
    #[serde(default)]
    hidden: bool,
}

#[derive(Debug, Deserialize)]
struct RawMap {
    nodes: Vec<MapNode>,
    #[serde(default)]
    edges: Vec<RawEdge>,
    /// 区域 ID（JSON 对象键为字符串）-> 区域名
    #[serde(default)]
    regions: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct StoreInner {
    graph: Option<Arc<MapGraph>>,
    generation: u64,
}

/// 地图存储；读多写少，查询拿到 Arc<MapGraph> 后不再持锁
#[derive(Debug, Default)]
pub struct MapStore {
    inner: RwLock<StoreInner>,
}

impl MapStore {
    /// 尚未加载的空存储
    pub fn unloaded() -> Self {
        Self::default()
    }

    pub fn load_from_path(&self, path: impl AsRef<Path>) -> Result<(), MapLoadError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                self.mark_unloaded();
                return Err(MapLoadError::Io(format!("{}: {}", path.display(), e)));
            }
        };
        self.load_from_str(&text)
    }

    /// 解析并校验；任何一处错误都让存储处于未加载状态
    pub fn load_from_str(&self, text: &str) -> Result<(), MapLoadError> {
        match parse_graph(text) {
            Ok(graph) => {
                tracing::info!(
                    nodes = graph.node_count(),
                    edges = graph.edge_count(),
                    "map loaded"
                );
                let mut inner = self.write_inner();
                inner.graph = Some(Arc::new(graph));
                inner.generation += 1;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Map load failed: {}", e);
                self.mark_unloaded();
                Err(e)
            }
        }
    }

    fn mark_unloaded(&self) {
        self.write_inner().graph = None;
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_loaded(&self) -> bool {
        self.read_inner().graph.is_some()
    }

    /// 每次成功加载递增（用于识别地图是否被替换）
    pub fn load_generation(&self) -> u64 {
        self.read_inner().generation
    }

    pub fn graph(&self) -> Option<Arc<MapGraph>> {
        self.read_inner().graph.clone()
    }

    pub fn get_node(&self, id: NodeId) -> Option<Arc<MapNode>> {
        self.graph().and_then(|g| g.node(id).cloned())
    }

    pub fn get_outgoing_edges(&self, id: NodeId) -> Vec<MapEdge> {
        self.graph()
            .map(|g| g.outgoing(id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn edge_in_direction(&self, from: NodeId, direction: Direction) -> Option<MapEdge> {
        self.graph()
            .and_then(|g| g.edge_in_direction(from, direction).cloned())
    }

    pub fn find_rooms(&self, predicate: impl Fn(&MapNode) -> bool) -> Vec<Arc<MapNode>> {
        self.graph()
            .map(|g| g.find_rooms(predicate))
            .unwrap_or_default()
    }

    pub fn region_name(&self, region: u32) -> Option<String> {
        self.graph()
            .and_then(|g| g.region_name(region).map(str::to_string))
    }

    /// 房间名子串搜索（大小写不敏感）
    pub fn search_by_name(&self, needle: &str) -> Vec<Arc<MapNode>> {
        let needle = needle.trim();
        if needle.is_empty() {
            return Vec::new();
        }
        self.find_rooms(|n| n.name_contains(needle))
    }

    /// 从 from 出发按跳数 BFS，返回 max_steps 内的商店（附带跳数），近的在前
    pub fn nearby_stores(&self, from: NodeId, max_steps: usize) -> Vec<(Arc<MapNode>, usize)> {
        let Some(graph) = self.graph() else {
            return Vec::new();
        };
        if !graph.contains(from) {
            return Vec::new();
        }

        let mut seen: HashSet<NodeId> = HashSet::from([from]);
        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::from([(from, 0)]);
        let mut stores = Vec::new();

        while let Some((id, depth)) = queue.pop_front() {
            if let Some(node) = graph.node(id) {
                if node.store {
                    stores.push((Arc::clone(node), depth));
                }
            }
            if depth >= max_steps {
                continue;
            }
            for edge in graph.outgoing(id) {
                if seen.insert(edge.target) {
                    queue.push_back((edge.target, depth + 1));
                }
            }
        }
        stores
    }
}

fn parse_graph(text: &str) -> Result<MapGraph, MapLoadError> {
    let raw: RawMap =
        serde_json::from_str(text).map_err(|e| MapLoadError::Parse(e.to_string()))?;

    if raw.nodes.is_empty() {
        return Err(MapLoadError::Invalid("map has no nodes".to_string()));
    }

    let mut ids = HashSet::new();
    for node in &raw.nodes {
        if !ids.insert(node.id) {
            return Err(MapLoadError::Invalid(format!("duplicate node id {}", node.id)));
        }
    }

    let mut edges = Vec::with_capacity(raw.edges.len());
    for edge in raw.edges {
        if !ids.contains(&edge.source) || !ids.contains(&edge.target) {
            return Err(MapLoadError::Invalid(format!(
                "edge {} -> {} references an unknown node",
                edge.source, edge.target
            )));
        }
        let direction = Direction::parse(&edge.direction).ok_or_else(|| {
            MapLoadError::Invalid(format!(
                "edge {} -> {} has unknown direction '{}'",
                edge.source, edge.target, edge.direction
            ))
        })?;
        edges.push(MapEdge {
            source: edge.source,
            target: edge.target,
            direction,
            door: edge.door,
            hidden: edge.hidden,
        });
    }

    let mut regions = HashMap::new();
    for (key, name) in raw.regions {
        let id: u32 = key
            .trim()
            .parse()
            .map_err(|_| MapLoadError::Invalid(format!("region key '{}' is not a number", key)))?;
        regions.insert(id, name);
    }

    Ok(MapGraph::build(raw.nodes, edges, regions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TOWN: &str = r#"{
        "nodes": [
            {"id": 1, "label": "Town Square", "x": 0, "y": 0, "peaceful": true},
            {"id": 2, "label": "Market Street", "x": 0, "y": 1},
            {"id": 3, "label": "General Store", "x": 1, "y": 1, "store": true, "region": 7},
            {"id": 4, "label": "Dark Alley", "x": 0, "y": 2, "spawn_total": 6}
        ],
        "edges": [
            {"source": 1, "target": 2, "direction": "south"},
            {"source": 2, "target": 1, "direction": "n"},
            {"source": 2, "target": 3, "direction": "east", "door": true},
            {"source": 3, "target": 2, "direction": "west"},
            {"source": 2, "target": 4, "direction": "s"}
        ],
        "regions": {"7": "Merchant Quarter"}
    }"#;

    #[test]
    fn test_load_builds_adjacency() {
        let store = MapStore::unloaded();
        assert!(!store.is_loaded());
        store.load_from_str(TOWN).unwrap();

        assert!(store.is_loaded());
        assert_eq!(store.load_generation(), 1);
        assert_eq!(store.get_node(NodeId(3)).unwrap().label, "General Store");
        let out = store.get_outgoing_edges(NodeId(2));
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].direction, Direction::North);
        assert_eq!(
            store.edge_in_direction(NodeId(2), Direction::East).map(|e| e.target),
            Some(NodeId(3))
        );
        assert_eq!(store.region_name(7).as_deref(), Some("Merchant Quarter"));
    }

    #[test]
    fn test_malformed_input_leaves_store_unloaded() {
        let store = MapStore::unloaded();
        store.load_from_str(TOWN).unwrap();

        let dangling = r#"{"nodes": [{"id": 1, "label": "A"}],
            "edges": [{"source": 1, "target": 9, "direction": "north"}]}"#;
        assert!(matches!(store.load_from_str(dangling), Err(MapLoadError::Invalid(_))));
        assert!(!store.is_loaded());
        assert!(store.get_node(NodeId(1)).is_none());

        let bad_dir = r#"{"nodes": [{"id": 1, "label": "A"}, {"id": 2, "label": "B"}],
            "edges": [{"source": 1, "target": 2, "direction": "sideways"}]}"#;
        assert!(store.load_from_str(bad_dir).is_err());
        assert!(store.load_from_str("{not json").is_err());
        assert!(!store.is_loaded());
    }

    #[test]
    fn test_missing_file_is_structural_fault() {
        let store = MapStore::unloaded();
        let err = store.load_from_path("/definitely/not/here/map.json").unwrap_err();
        assert!(matches!(err, MapLoadError::Io(_)));
        assert!(!store.is_loaded());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TOWN.as_bytes()).unwrap();
        let store = MapStore::unloaded();
        store.load_from_path(file.path()).unwrap();
        assert_eq!(store.graph().unwrap().node_count(), 4);
    }

    #[test]
    fn test_search_and_nearby_stores() {
        let store = MapStore::unloaded();
        store.load_from_str(TOWN).unwrap();

        let hits = store.search_by_name("street");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, NodeId(2));

        let near = store.nearby_stores(NodeId(1), 3);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].0.id, NodeId(3));
        assert_eq!(near[0].1, 2);
        assert!(store.nearby_stores(NodeId(1), 1).is_empty());
    }
}
