//! 静态地图：节点/出口数据类型与只读存储

pub mod store;
pub mod types;

pub use store::MapStore;
pub use types::{MapEdge, MapGraph, MapNode, NodeId};
