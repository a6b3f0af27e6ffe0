//! 寻路约束：整组参与缓存键，所以只用整数与布尔字段

use serde::{Deserialize, Serialize};

use crate::map::{MapEdge, MapNode};

pub const DEFAULT_MAX_PATH_LENGTH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathConstraints {
    /// 排除危险房间（否则只加代价）
    pub avoid_dangerous: bool,
    /// 排除陷阱房间（否则只加代价）
    pub avoid_traps: bool,
    /// 非和平房间刷怪数超过此值视为危险
    pub max_room_spawns: u32,
    pub allow_doors: bool,
    pub allow_hidden: bool,
    /// 危险/陷阱房间的附加代价，单位为十分之一步
    pub danger_penalty: u32,
    pub max_path_length: usize,
}

/// 房间违反约束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomHazard {
    Dangerous { spawns: u32 },
    Trap,
}

impl std::fmt::Display for RoomHazard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomHazard::Dangerous { spawns } => write!(f, "{} monster spawns", spawns),
            RoomHazard::Trap => write!(f, "trapped"),
        }
    }
}

/// 房间本身的危险（与约束无关，供编排层的逐房间检查复用）
pub fn room_hazard(node: &MapNode, max_room_spawns: u32) -> Option<RoomHazard> {
    if node.trap {
        return Some(RoomHazard::Trap);
    }
    if !node.peaceful && node.spawn_total > max_room_spawns {
        return Some(RoomHazard::Dangerous {
            spawns: node.spawn_total,
        });
    }
    None
}

impl Default for PathConstraints {
    fn default() -> Self {
        Self::unconstrained()
    }
}

impl PathConstraints {
    /// 纯距离：不排除、不惩罚任何房间
    pub fn unconstrained() -> Self {
        Self {
            avoid_dangerous: false,
            avoid_traps: false,
            max_room_spawns: u32::MAX,
            allow_doors: true,
            allow_hidden: true,
            danger_penalty: 0,
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
        }
    }

    /// 危险容忍度随等级增长
    pub fn safe_for_level(level: u32) -> Self {
        Self {
            avoid_dangerous: true,
            avoid_traps: true,
            max_room_spawns: level.saturating_add(1),
            allow_doors: true,
            allow_hidden: false,
            danger_penalty: 25,
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
        }
    }

    /// 只走无刷怪或和平的房间，不走隐藏出口
    pub fn strict() -> Self {
        Self {
            avoid_dangerous: true,
            avoid_traps: true,
            max_room_spawns: 0,
            allow_doors: true,
            allow_hidden: false,
            danger_penalty: 50,
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
        }
    }

    pub fn with_max_room_spawns(mut self, spawns: u32) -> Self {
        self.max_room_spawns = spawns;
        self
    }

    pub fn with_max_path_length(mut self, length: usize) -> Self {
        self.max_path_length = length;
        self
    }

    pub fn with_danger_penalty(mut self, penalty: u32) -> Self {
        self.danger_penalty = penalty;
        self
    }

    pub fn hazard(&self, node: &MapNode) -> Option<RoomHazard> {
        room_hazard(node, self.max_room_spawns)
    }

    /// 硬约束：该房间是否被排除
    pub fn excludes(&self, node: &MapNode) -> Option<RoomHazard> {
        match self.hazard(node)? {
            RoomHazard::Trap if self.avoid_traps => Some(RoomHazard::Trap),
            h @ RoomHazard::Dangerous { .. } if self.avoid_dangerous => Some(h),
            _ => None,
        }
    }

    pub fn edge_allowed(&self, edge: &MapEdge) -> bool {
        (self.allow_doors || !edge.door) && (self.allow_hidden || !edge.hidden)
    }

    /// 进入该房间的附加代价（未被排除的危险房间）
    pub fn penalty(&self, node: &MapNode) -> f64 {
        match self.hazard(node) {
            Some(_) => self.danger_penalty as f64 / 10.0,
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::NodeId;

    fn room(spawns: u32, peaceful: bool, trap: bool) -> MapNode {
        MapNode {
            id: NodeId(1),
            label: "Room".to_string(),
            sector: String::new(),
            x: 0.0,
            y: 0.0,
            peaceful,
            spawn_total: spawns,
            trap,
            store: false,
            region: None,
        }
    }

    #[test]
    fn test_hazards() {
        assert_eq!(room_hazard(&room(5, false, false), 3), Some(RoomHazard::Dangerous { spawns: 5 }));
        assert_eq!(room_hazard(&room(5, true, false), 3), None);
        assert_eq!(room_hazard(&room(0, true, true), 3), Some(RoomHazard::Trap));
    }

    #[test]
    fn test_modes() {
        let dangerous = room(4, false, false);
        assert!(PathConstraints::unconstrained().excludes(&dangerous).is_none());
        assert_eq!(PathConstraints::unconstrained().penalty(&dangerous), 0.0);
        // 等级 5 可以容忍 6 个刷怪
        assert!(PathConstraints::safe_for_level(5).excludes(&dangerous).is_none());
        assert!(PathConstraints::safe_for_level(1).excludes(&dangerous).is_some());
        assert!(PathConstraints::strict().excludes(&room(1, false, false)).is_some());

        let soft = PathConstraints {
            avoid_dangerous: false,
            ..PathConstraints::strict()
        };
        assert!(soft.excludes(&dangerous).is_none());
        assert!((soft.penalty(&dangerous) - 5.0).abs() < 1e-9);
    }
}
