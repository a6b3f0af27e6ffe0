//! 错误类型
//!
//! 三层处理：
//! - 预期内的缺失（无匹配、无路径）：Option / `PathFailure`，不中断追踪与编排；
//! - 可恢复的运行时故障（发送失败）：`TransportError`，记日志后跳过该步；
//! - 结构性故障（地图缺失或损坏）：`MapLoadError`，之后所有依赖操作返回 `NavError::MapNotLoaded`。
//!
//! 面向用户的失败都是简短可读的原因串（Display）。

use thiserror::Error;

use crate::map::NodeId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapLoadError {
    #[error("Map file unreadable: {0}")]
    Io(String),

    #[error("Map parse error: {0}")]
    Parse(String),

    #[error("Invalid map data: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// 寻路失败（预期内的缺失，不是异常）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathFailure {
    #[error("Map not loaded")]
    MapNotLoaded,

    #[error("Unknown room: {0}")]
    UnknownRoom(NodeId),

    #[error("Target room {room} violates constraints: {reason}")]
    TargetForbidden { room: NodeId, reason: String },

    #[error("No path found between rooms")]
    NoPath { from: NodeId, to: NodeId },

    /// 探索节点数超过最大路径长度的两倍
    #[error("Search aborted after exploring {explored} rooms")]
    SearchLimit { explored: usize },

    #[error("Path too long: {length} steps (maximum: {max})")]
    TooLong { length: usize, max: usize },
}

/// 导航编排层对用户返回的失败原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    #[error("Map not loaded")]
    MapNotLoaded,

    #[error("Current position unknown")]
    PositionUnknown,

    #[error("Position uncertain: confidence {confidence:.2} (minimum: {minimum})")]
    LowConfidence { confidence: f64, minimum: f64 },

    #[error("Health too low: {percent:.1}% (minimum: {minimum}%)")]
    HealthTooLow { percent: f64, minimum: f64 },

    #[error("In combat with {count} enemies")]
    InCombat { count: usize },

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Target is ambiguous: {0} rooms match")]
    AmbiguousTarget(usize),

    #[error(transparent)]
    NoPath(#[from] PathFailure),

    #[error("Dangerous room on route: {room} ({reason})")]
    DangerousRoom { room: String, reason: String },

    #[error("Navigation already in progress")]
    AlreadyNavigating,

    #[error("Not navigating")]
    NotNavigating,

    #[error("Navigation is not paused")]
    NotPaused,

    #[error("Executor unavailable: {0}")]
    ExecutorBusy(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings() {
        let e = NavError::HealthTooLow {
            percent: 12.34,
            minimum: 25.0,
        };
        assert_eq!(e.to_string(), "Health too low: 12.3% (minimum: 25%)");

        let e: NavError = PathFailure::NoPath {
            from: NodeId(1),
            to: NodeId(2),
        }
        .into();
        assert_eq!(e.to_string(), "No path found between rooms");
    }
}
