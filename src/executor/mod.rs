//! 移动执行：命令队列、房间变化信号与节奏化执行器

pub mod command;
pub mod runner;
pub mod signal;

pub use command::{CommandQueue, MovementCommand, QueueLease};
pub use runner::{
    CommandTransport, ExecutorEvent, ExecutorState, MovementExecutor, PacingSettings, PacingStrategy, StopOrigin,
};
pub use signal::RoomChangeSignal;
