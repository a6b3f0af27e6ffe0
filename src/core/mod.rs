//! 核心编排层：错误类型、导航状态、安全检查、导航编排与优雅关闭

pub mod error;
pub mod orchestrator;
pub mod safety;
pub mod shutdown;
pub mod state;

pub use error::{MapLoadError, NavError, PathFailure, TransportError};
pub use orchestrator::{NavigationOrchestrator, NavigationSettings};
pub use safety::{FeatureFlags, PlayerSignals, SafetyPolicy, SharedPlayerSignals};
pub use shutdown::{
    run_with_graceful_shutdown, ExecutorCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason, TaskCleanup,
};
pub use state::{NavPhase, NavStatus, NavTarget, PauseReason};
