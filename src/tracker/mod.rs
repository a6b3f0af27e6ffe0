//! 世界模型追踪：房间快照、动态事件、邻接发现与追踪器任务

pub mod adjacency;
pub mod events;
pub mod service;
pub mod snapshot;
pub mod world;

pub use adjacency::{AdjacencyBook, AdjacencyKey, SessionId};
pub use events::{apply_event, scan_line, DynamicEvent, MonsterLifecycleSink, NoopSink};
pub use service::{FeedItem, TrackerHandle, TrackerService};
pub use snapshot::{base_name, Disposition, MonsterEntry, RoomSnapshot};
pub use world::{TrackerSettings, TrackerUpdate, UpdateKind, WorldTracker};
