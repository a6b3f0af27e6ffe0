//! 路径规划：约束 A* 与带缓存的寻路服务

pub mod constraints;
pub mod search;
pub mod service;

pub use constraints::{room_hazard, PathConstraints, RoomHazard};
pub use search::{find_path, Path, PathStep, StepTiming};
pub use service::{path_is_current, PathKey, PathService, PlannerSettings};
