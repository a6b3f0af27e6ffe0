//! 候选房间打分：名字、出口、路径上下文、移动方向四个信号的加权和

use std::collections::HashSet;

use crate::map::{MapGraph, MapNode, NodeId};
use crate::parser::Direction;

/// 缺失出口（地图上有、描述里没看到）的惩罚权重
const MISSING_EXIT_PENALTY: f64 = 1.5;
/// 多出出口（描述里有、地图上没有）的惩罚权重
const EXTRA_EXIT_PENALTY: f64 = 1.0;

/// 路径上下文达到此值视为「强」，改用路径主导的权重
pub const STRONG_PATH_SCORE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub name: f64,
    pub exits: f64,
    pub path: f64,
    pub movement: f64,
}

impl Weights {
    /// 名字与出口主导
    pub const DEFAULT: Weights = Weights {
        name: 0.40,
        exits: 0.35,
        path: 0.10,
        movement: 0.15,
    };

    /// 有预期房间且路径上下文强时，路径主导
    pub const PATH_DOMINANT: Weights = Weights {
        name: 0.25,
        exits: 0.15,
        path: 0.45,
        movement: 0.15,
    };

    pub fn for_path_score(expected_present: bool, path_score: f64) -> Weights {
        if expected_present && path_score >= STRONG_PATH_SCORE {
            Weights::PATH_DOMINANT
        } else {
            Weights::DEFAULT
        }
    }
}

/// 各信号得分，便于日志与测试
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signals {
    pub name: f64,
    pub exits: f64,
    pub path: f64,
    pub movement: f64,
}

impl Signals {
    pub fn combine(&self, weights: Weights) -> f64 {
        let total = self.name * weights.name
            + self.exits * weights.exits
            + self.path * weights.path
            + self.movement * weights.movement;
        total.clamp(0.0, 1.0)
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

/// 完全相等 1.0 > 子串 0.8 > 词重叠（Jaccard × 0.6）
pub fn name_score(observed: &str, node: &MapNode) -> f64 {
    let observed = observed.trim();
    if observed.is_empty() {
        return 0.0;
    }
    if node.name_equals(observed) {
        return 1.0;
    }
    let lower = observed.to_lowercase();
    let label = node.label.to_lowercase();
    let sector = node.sector.to_lowercase();
    let contains = |field: &str| !field.is_empty() && (field.contains(&lower) || lower.contains(field));
    if contains(&label) || contains(&sector) {
        return 0.8;
    }
    token_jaccard(observed, &node.label).max(token_jaccard(observed, &node.sector)) * 0.6
}

/// 出口集合相似度：交集 / (交集 + 1.5 × 缺失 + 1.0 × 多出)
pub fn exit_score(observed: &[Direction], mapped: &[Direction]) -> f64 {
    if observed.is_empty() && mapped.is_empty() {
        return 1.0;
    }
    let obs: HashSet<Direction> = observed.iter().copied().collect();
    let map: HashSet<Direction> = mapped.iter().copied().collect();
    let inter = obs.intersection(&map).count() as f64;
    let missing = map.difference(&obs).count() as f64;
    let extra = obs.difference(&map).count() as f64;
    let denom = inter + MISSING_EXIT_PENALTY * missing + EXTRA_EXIT_PENALTY * extra;
    if denom == 0.0 {
        0.0
    } else {
        inter / denom
    }
}

fn adjacent(graph: &MapGraph, a: NodeId, b: NodeId) -> bool {
    graph.outgoing(a).any(|e| e.target == b) || graph.outgoing(b).any(|e| e.target == a)
}

/// 与进行中计划的预期房间的吻合度；没有计划时为中性 0.5
pub fn path_score(graph: &MapGraph, candidate: NodeId, expected: Option<NodeId>) -> f64 {
    match expected {
        None => 0.5,
        Some(e) if e == candidate => 0.95,
        Some(e) if adjacent(graph, e, candidate) => 0.4,
        Some(_) => 0.1,
    }
}

/// 从上一个房间沿最近方向是否能到这里；反向边次之；未知时为中性 0.5
pub fn movement_score(
    graph: &MapGraph,
    candidate: NodeId,
    previous: Option<NodeId>,
    direction: Option<Direction>,
) -> f64 {
    let (Some(prev), Some(dir)) = (previous, direction) else {
        return 0.5;
    };
    if graph.has_edge(prev, candidate, dir) {
        1.0
    } else if graph.has_edge(candidate, prev, dir.opposite()) {
        0.7
    } else {
        0.0
    }
}
