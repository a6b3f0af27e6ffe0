//! 静态地图数据类型：房间节点、有向出口、加载后构建的只读图

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::parser::Direction;

/// 地图节点 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 房间节点（加载后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapNode {
    pub id: NodeId,
    pub label: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub peaceful: bool,
    #[serde(default)]
    pub spawn_total: u32,
    #[serde(default)]
    pub trap: bool,
    #[serde(default)]
    pub store: bool,
    #[serde(default)]
    pub region: Option<u32>,
}

impl MapNode {
    /// 平面直线距离（寻路启发式）
    pub fn distance_to(&self, other: &MapNode) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// 房间名或区域描述等于给定名字（大小写不敏感）
    pub fn name_equals(&self, name: &str) -> bool {
        self.label.eq_ignore_ascii_case(name) || (!self.sector.is_empty() && self.sector.eq_ignore_ascii_case(name))
    }

    pub fn name_contains(&self, name: &str) -> bool {
        let needle = name.to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.label.to_lowercase().contains(&needle) || self.sector.to_lowercase().contains(&needle)
    }
}

/// 有向出口
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub direction: Direction,
    /// 需要开门
    #[serde(default)]
    pub door: bool,
    /// 隐藏出口，需要搜索
    #[serde(default)]
    pub hidden: bool,
}

impl MapEdge {
    pub fn cost(&self) -> f64 {
        let mut cost = 1.0;
        if self.door {
            cost += 0.5;
        }
        if self.hidden {
            cost += 1.0;
        }
        cost
    }
}

/// 加载完成的只读图；邻接索引只在构建时生成
#[derive(Debug, Default)]
pub struct MapGraph {
    nodes: HashMap<NodeId, Arc<MapNode>>,
    edges: Vec<MapEdge>,
    /// 节点 -> 出边在 edges 中的下标（保持文件中的顺序）
    outgoing: HashMap<NodeId, Vec<usize>>,
    regions: HashMap<u32, String>,
}

impl MapGraph {
    pub(crate) fn build(
        nodes: Vec<MapNode>,
        edges: Vec<MapEdge>,
        regions: HashMap<u32, String>,
    ) -> Self {
        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.source).or_default().push(idx);
        }
        Self {
            nodes: nodes.into_iter().map(|n| (n.id, Arc::new(n))).collect(),
            edges,
            outgoing,
            regions,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Arc<MapNode>> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<MapNode>> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &MapEdge> {
        self.outgoing
            .get(&id)
            .into_iter()
            .flat_map(move |idxs| idxs.iter().map(move |i| &self.edges[*i]))
    }

    pub fn edge_in_direction(&self, from: NodeId, direction: Direction) -> Option<&MapEdge> {
        self.outgoing(from).find(|e| e.direction == direction)
    }

    /// 指定起止与方向的边是否存在（路径过期检查）
    pub fn has_edge(&self, from: NodeId, to: NodeId, direction: Direction) -> bool {
        self.outgoing(from)
            .any(|e| e.target == to && e.direction == direction)
    }

    /// 节点的出口方向（按文件顺序）
    pub fn exit_directions(&self, id: NodeId) -> Vec<Direction> {
        let dirs: Vec<Direction> = self.outgoing(id).map(|e| e.direction).collect();
        crate::parser::normalize_exits(&dirs)
    }

    pub fn region_name(&self, region: u32) -> Option<&str> {
        self.regions.get(&region).map(String::as_str)
    }

    /// 按谓词查找房间，结果按 ID 排序以保证稳定
    pub fn find_rooms(&self, predicate: impl Fn(&MapNode) -> bool) -> Vec<Arc<MapNode>> {
        let mut found: Vec<Arc<MapNode>> = self
            .nodes
            .values()
            .filter(|n| predicate(n))
            .cloned()
            .collect();
        found.sort_by_key(|n| n.id);
        found
    }
}
