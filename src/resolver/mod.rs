//! 房间解析：快照 → 地图节点 + 置信度

pub mod matcher;
pub mod scoring;

pub use matcher::{
    candidates, MatchContext, MatchKey, MatchMethod, MatchResult, ResolverSettings, RoomResolver,
};
pub use scoring::{exit_score, movement_score, name_score, path_score, Signals, Weights};
