//! A* 寻路：边代价 + 约束惩罚，直线距离启发式，同分按入队顺序
//!
//! 启发式只是坐标上的近似；坐标若只是排版用的，结果可能不是最优，但搜索总会终止
//! （探索数超过最大路径长度两倍即放弃）。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;

use crate::core::PathFailure;
use crate::map::{MapEdge, MapGraph, NodeId};
use crate::parser::Direction;
use crate::planner::constraints::PathConstraints;

/// 每步的预计耗时
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTiming {
    pub base: Duration,
    pub door: Duration,
    pub hidden: Duration,
}

impl Default for StepTiming {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1200),
            door: Duration::from_millis(800),
            hidden: Duration::from_millis(1500),
        }
    }
}

impl StepTiming {
    pub fn delay_for(&self, edge: &MapEdge) -> Duration {
        let mut delay = self.base;
        if edge.door {
            delay += self.door;
        }
        if edge.hidden {
            delay += self.hidden;
        }
        delay
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStep {
    pub from: NodeId,
    pub to: NodeId,
    pub direction: Direction,
    pub cost: f64,
    pub estimated_delay: Duration,
    pub door: bool,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Path {
    pub from: NodeId,
    pub to: NodeId,
    pub steps: Vec<PathStep>,
    pub total_cost: f64,
    pub computed_at: i64,
}

impl Path {
    fn empty(at: NodeId) -> Self {
        Self {
            from: at,
            to: at,
            steps: Vec::new(),
            total_cost: 0.0,
            computed_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn estimated_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.estimated_delay).sum()
    }

    /// 路径经过的所有节点（含起点）
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = vec![self.from];
        ids.extend(self.steps.iter().map(|s| s.to));
        ids
    }

    pub fn directions(&self) -> Vec<Direction> {
        self.steps.iter().map(|s| s.direction).collect()
    }

    /// 从第 index 步起剩余的预计耗时
    pub fn remaining_duration(&self, index: usize) -> Duration {
        self.steps.iter().skip(index).map(|s| s.estimated_delay).sum()
    }
}

/// 开放列表条目：f 值小者优先，同 f 值先入队者优先
#[derive(Debug, Clone, Copy)]
struct Frontier {
    f: f64,
    seq: u64,
    node: NodeId,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap 是大顶堆，反过来比较
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub fn find_path(
    graph: &MapGraph,
    from: NodeId,
    to: NodeId,
    constraints: &PathConstraints,
    timing: &StepTiming,
) -> Result<Path, PathFailure> {
    let start = graph.node(from).ok_or(PathFailure::UnknownRoom(from))?;
    let target = graph.node(to).ok_or(PathFailure::UnknownRoom(to))?;

    if from == to {
        return Ok(Path::empty(from));
    }
    if let Some(hazard) = constraints.excludes(target) {
        return Err(PathFailure::TargetForbidden {
            room: to,
            reason: hazard.to_string(),
        });
    }

    let heuristic = |id: NodeId| {
        graph
            .node(id)
            .map(|n| n.distance_to(target))
            .unwrap_or(0.0)
    };

    let explore_limit = constraints.max_path_length.saturating_mul(2);
    let mut open = BinaryHeap::new();
    let mut g_score: HashMap<NodeId, f64> = HashMap::from([(from, 0.0)]);
    let mut came_from: HashMap<NodeId, (NodeId, &MapEdge, f64)> = HashMap::new();
    let mut closed: HashSet<NodeId> = HashSet::new();
    let mut seq = 0u64;

    open.push(Frontier {
        f: start.distance_to(target),
        seq,
        node: from,
    });

    while let Some(Frontier { node: current, .. }) = open.pop() {
        if !closed.insert(current) {
            continue;
        }
        if current == to {
            return build_path(from, to, &came_from, constraints, timing);
        }
        if closed.len() > explore_limit {
            tracing::debug!(from = %from, to = %to, explored = closed.len(), "path search aborted");
            return Err(PathFailure::SearchLimit {
                explored: closed.len(),
            });
        }

        let g = g_score.get(&current).copied().unwrap_or(f64::INFINITY);
        for edge in graph.outgoing(current) {
            if closed.contains(&edge.target) || !constraints.edge_allowed(edge) {
                continue;
            }
            let Some(next) = graph.node(edge.target) else {
                continue;
            };
            if edge.target != to && constraints.excludes(next).is_some() {
                continue;
            }
            let step_cost = edge.cost() + constraints.penalty(next);
            let tentative = g + step_cost;
            if tentative < g_score.get(&edge.target).copied().unwrap_or(f64::INFINITY) {
                g_score.insert(edge.target, tentative);
                came_from.insert(edge.target, (current, edge, step_cost));
                seq += 1;
                open.push(Frontier {
                    f: tentative + heuristic(edge.target),
                    seq,
                    node: edge.target,
                });
            }
        }
    }

    Err(PathFailure::NoPath { from, to })
}

fn build_path(
    from: NodeId,
    to: NodeId,
    came_from: &HashMap<NodeId, (NodeId, &MapEdge, f64)>,
    constraints: &PathConstraints,
    timing: &StepTiming,
) -> Result<Path, PathFailure> {
    let mut steps = Vec::new();
    let mut cursor = to;
    while cursor != from {
        let Some((prev, edge, cost)) = came_from.get(&cursor) else {
            return Err(PathFailure::NoPath { from, to });
        };
        steps.push(PathStep {
            from: *prev,
            to: cursor,
            direction: edge.direction,
            cost: *cost,
            estimated_delay: timing.delay_for(edge),
            door: edge.door,
            hidden: edge.hidden,
        });
        cursor = *prev;
    }
    steps.reverse();

    if steps.len() > constraints.max_path_length {
        return Err(PathFailure::TooLong {
            length: steps.len(),
            max: constraints.max_path_length,
        });
    }

    let total_cost = steps.iter().map(|s| s.cost).sum();
    Ok(Path {
        from,
        to,
        steps,
        total_cost,
        computed_at: chrono::Utc::now().timestamp_millis(),
    })
}
