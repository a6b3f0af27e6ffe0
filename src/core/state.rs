//! 导航状态定义：阶段、暂停原因与对外的状态投影
//!
//! 编排器内部持有完整状态；消费者只拿到 `NavStatus` 这个轻量投影。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::map::NodeId;
use crate::planner::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavPhase {
    Idle,
    Navigating,
    Paused,
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// 用户手动暂停
    User,
    /// 战斗开始
    Combat,
    /// 周期安全检查失败（血量等）
    Safety,
    /// 执行器被外部打断
    Interrupted,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseReason::User => "user",
            PauseReason::Combat => "combat",
            PauseReason::Safety => "safety",
            PauseReason::Interrupted => "interrupted",
        }
    }

    /// 条件恢复后可以自动继续的原因
    pub fn auto_resumable(&self) -> bool {
        matches!(self, PauseReason::Combat | PauseReason::Safety)
    }
}

/// 导航目标
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavTarget {
    Id(NodeId),
    Name(String),
}

impl From<NodeId> for NavTarget {
    fn from(id: NodeId) -> Self {
        NavTarget::Id(id)
    }
}

impl From<&str> for NavTarget {
    fn from(name: &str) -> Self {
        NavTarget::Name(name.to_string())
    }
}

/// 对外状态投影
#[derive(Clone, Debug, Serialize)]
pub struct NavStatus {
    pub phase: NavPhase,
    /// 当前位置的匹配置信度
    pub confidence: f64,
    pub current_room: Option<NodeId>,
    pub current_room_name: Option<String>,
    pub target: Option<NodeId>,
    #[serde(skip)]
    pub path: Option<Arc<Path>>,
    pub step_index: usize,
    pub total_steps: usize,
    /// 剩余步骤的预计耗时
    pub eta: Option<Duration>,
    pub queue_depth: usize,
    pub pause_reason: Option<PauseReason>,
    /// 最近一次偏航等告警
    pub last_alert: Option<String>,
}

impl NavStatus {
    pub fn idle() -> Self {
        Self {
            phase: NavPhase::Idle,
            confidence: 0.0,
            current_room: None,
            current_room_name: None,
            target: None,
            path: None,
            step_index: 0,
            total_steps: 0,
            eta: None,
            queue_depth: 0,
            pause_reason: None,
            last_alert: None,
        }
    }

    pub fn directions(&self) -> Vec<&'static str> {
        self.path
            .as_ref()
            .map(|p| p.steps.iter().map(|s| s.direction.as_str()).collect())
            .unwrap_or_default()
    }
}

impl Default for NavStatus {
    fn default() -> Self {
        Self::idle()
    }
}
