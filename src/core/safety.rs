//! 安全检查：玩家状态（血量、战斗）与路线上的逐房间危险检查

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::core::error::NavError;
use crate::map::{MapGraph, MapNode};
use crate::planner::{room_hazard, Path};

/// 导航相关的功能开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub pause_in_combat: bool,
    pub avoid_dangerous_rooms: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            pause_in_combat: true,
            avoid_dangerous_rooms: true,
        }
    }
}

/// 玩家状态来源，由编排器同步轮询
pub trait PlayerSignals: Send + Sync {
    /// (当前血量, 最大血量)
    fn health(&self) -> (u32, u32);
    fn active_combat_count(&self) -> usize;
    fn combat_targets(&self) -> Vec<String>;
    fn flags(&self) -> FeatureFlags;

    fn health_percent(&self) -> f64 {
        let (current, max) = self.health();
        if max == 0 {
            // 还没收到状态行，按满血处理
            return 100.0;
        }
        current as f64 * 100.0 / max as f64
    }
}

#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    pub min_health_percent: f64,
    pub max_room_spawns: u32,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            min_health_percent: 25.0,
            max_room_spawns: 3,
        }
    }
}

impl SafetyPolicy {
    pub fn new(min_health_percent: f64, max_room_spawns: u32) -> Self {
        Self {
            min_health_percent,
            max_room_spawns,
        }
    }

    /// 血量与战斗检查
    pub fn check_player(&self, signals: &dyn PlayerSignals) -> Result<(), NavError> {
        let percent = signals.health_percent();
        if percent < self.min_health_percent {
            return Err(NavError::HealthTooLow {
                percent,
                minimum: self.min_health_percent,
            });
        }
        let combat = signals.active_combat_count();
        if combat > 0 && signals.flags().pause_in_combat {
            return Err(NavError::InCombat { count: combat });
        }
        Ok(())
    }

    pub fn room_danger(&self, node: &MapNode) -> Option<String> {
        room_hazard(node, self.max_room_spawns).map(|h| h.to_string())
    }

    /// 路线上要进入的每个房间（不含起点）都必须通过危险检查
    pub fn check_route(&self, graph: &MapGraph, path: &Path) -> Result<(), NavError> {
        for step in &path.steps {
            let Some(node) = graph.node(step.to) else {
                continue;
            };
            if let Some(reason) = self.room_danger(node) {
                return Err(NavError::DangerousRoom {
                    room: node.label.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SignalState {
    health: (u32, u32),
    targets: Vec<String>,
    flags: FeatureFlags,
}

/// 可写的玩家状态（状态行解析或测试里更新）
#[derive(Debug, Default)]
pub struct SharedPlayerSignals {
    state: Mutex<SignalState>,
}

impl SharedPlayerSignals {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_flags(self, flags: FeatureFlags) -> Self {
        self.lock().flags = flags;
        self
    }

    pub fn set_health(&self, current: u32, max: u32) {
        self.lock().health = (current, max);
    }

    pub fn set_combat_targets(&self, targets: Vec<String>) {
        self.lock().targets = targets;
    }

    pub fn set_flags(&self, flags: FeatureFlags) {
        self.lock().flags = flags;
    }
}

impl PlayerSignals for SharedPlayerSignals {
    fn health(&self) -> (u32, u32) {
        self.lock().health
    }

    fn active_combat_count(&self) -> usize {
        self.lock().targets.len()
    }

    fn combat_targets(&self) -> Vec<String> {
        self.lock().targets.clone()
    }

    fn flags(&self) -> FeatureFlags {
        self.lock().flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_gate() {
        let policy = SafetyPolicy::default();
        let signals = SharedPlayerSignals::new();
        assert!(policy.check_player(&signals).is_ok());

        signals.set_health(12, 100);
        let err = policy.check_player(&signals).unwrap_err();
        assert_eq!(err.to_string(), "Health too low: 12.0% (minimum: 25%)");

        signals.set_health(80, 100);
        assert!(policy.check_player(&signals).is_ok());
    }

    #[test]
    fn test_combat_gate_respects_flag() {
        let policy = SafetyPolicy::default();
        let signals = SharedPlayerSignals::new();
        signals.set_health(100, 100);
        signals.set_combat_targets(vec!["rat".to_string()]);
        assert_eq!(
            policy.check_player(&signals),
            Err(NavError::InCombat { count: 1 })
        );

        signals.set_flags(FeatureFlags {
            pause_in_combat: false,
            avoid_dangerous_rooms: true,
        });
        assert!(policy.check_player(&signals).is_ok());
    }

    #[test]
    fn test_room_danger() {
        let policy = SafetyPolicy::new(25.0, 3);
        let mut node = MapNode {
            id: crate::map::NodeId(7),
            label: "Den".to_string(),
            sector: String::new(),
            x: 0.0,
            y: 0.0,
            peaceful: false,
            spawn_total: 5,
            trap: false,
            store: false,
            region: None,
        };
        assert_eq!(policy.room_danger(&node).as_deref(), Some("5 monster spawns"));
        node.peaceful = true;
        assert!(policy.room_danger(&node).is_none());
        node.trap = true;
        assert_eq!(policy.room_danger(&node).as_deref(), Some("trapped"));
    }
}
