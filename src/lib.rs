//! mudpilot - MUD 客户端自动化核心
//!
//! 从终端文本重建房间级世界模型，对照静态地图定位，规划并安全执行移动。
//!
//! 模块划分：
//! - **cache**: 带容量与 TTL 的缓存（解析器与寻路共用）
//! - **config**: 配置加载（TOML + 环境变量）
//! - **core**: 错误类型、导航状态机、安全检查、优雅关闭
//! - **executor**: 移动命令队列与节奏化执行器
//! - **map**: 静态地图数据与只读存储
//! - **observability**: tracing 日志初始化
//! - **parser**: 行清洗、颜色快照、房间提取
//! - **planner**: 约束 A* 与寻路缓存
//! - **resolver**: 快照到地图节点的匹配
//! - **tracker**: 世界模型追踪（当前房间、远端房间、邻接发现）

pub mod cache;
pub mod config;
pub mod core;
pub mod executor;
pub mod map;
pub mod observability;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod tracker;

pub use crate::core::{NavError, NavigationOrchestrator, NavPhase, NavStatus, NavTarget};
pub use crate::map::{MapStore, NodeId};
pub use crate::tracker::{RoomSnapshot, WorldTracker};
