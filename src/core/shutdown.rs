//! 优雅关闭
//!
//! 收到 Ctrl+C / SIGTERM 后取消所有后台任务（追踪器、执行器、安全轮询），
//! 停下移动队列，再等待任务在超时内退出。

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::executor::MovementExecutor;

#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C 或 /quit
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 上游输入结束
    InputClosed,
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 子任务用的取消 token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装 Ctrl+C / SIGTERM 处理
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, shutting down");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, shutting down");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时执行的清理
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 用于日志
    fn name(&self) -> &'static str;
}

pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 依次执行清理，每项都有超时
    pub async fn run_cleanup(&self) {
        tracing::info!(tasks = self.cleanup_tasks.len(), "running cleanup");
        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!("Cleanup '{}' completed", name),
                Ok(Err(e)) => tracing::warn!("Cleanup '{}' failed: {}", name, e),
                Err(_) => tracing::warn!("Cleanup '{}' timed out after {:?}", name, self.timeout),
            }
        }
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 停下执行器并清空移动队列，避免退出后还有命令发出
pub struct ExecutorCleanup {
    executor: MovementExecutor,
}

impl ExecutorCleanup {
    pub fn new(executor: MovementExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for ExecutorCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.executor.stop();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "MovementExecutor"
    }
}

/// 等待后台任务退出（它们监听同一个取消 token）
pub struct TaskCleanup {
    label: &'static str,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskCleanup {
    pub fn new(label: &'static str, handles: Vec<JoinHandle<()>>) -> Self {
        Self {
            label,
            handles: Mutex::new(handles),
        }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for TaskCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.label
    }
}

/// 运行 app 直到它结束或收到关闭信号，然后执行清理
pub async fn run_with_graceful_shutdown<F, Fut>(
    shutdown_manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    shutdown_manager.install_signal_handlers();

    tokio::select! {
        _ = app => tracing::info!("Application finished normally"),
        _ = shutdown_manager.wait_for_shutdown() => tracing::info!("Shutdown signal received"),
    }

    // app 自然结束时也要通知后台任务
    shutdown_manager.token().cancel();
    cleanup().await;
}
