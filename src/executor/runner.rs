//! 移动执行器：按节奏策略把命令队列发给传输层
//!
//! 状态：Idle → Executing → {Idle（队列耗尽）, Paused, Idle（停止）}。
//! 每次等待都有上限且可取消；取消只打断等待，不回滚已生效的状态。

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::TransportError;
use crate::executor::command::{CommandQueue, MovementCommand, QueueLease};
use crate::executor::signal::RoomChangeSignal;

/// 传输层：每个移动步骤调用一次
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send_command(&self, command: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PacingStrategy {
    /// 等房间变化信号，超时后照常继续
    #[default]
    Triggered,
    /// 最近刚有房间变化就立即继续，否则等短延迟或信号
    FastWithFallback,
    /// 固定最小延迟，开门/隐藏出口加长
    UltraFast,
    /// 按命令预计耗时等待
    TimedOnly,
}

impl FromStr for PacingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "triggered" => Ok(PacingStrategy::Triggered),
            "fast" | "fast_with_fallback" => Ok(PacingStrategy::FastWithFallback),
            "ultra" | "ultra_fast" => Ok(PacingStrategy::UltraFast),
            "timed" | "timed_only" => Ok(PacingStrategy::TimedOnly),
            other => Err(format!("unknown pacing strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PacingSettings {
    pub trigger_timeout: Duration,
    pub fast_recent_window: Duration,
    pub fast_delay: Duration,
    pub ultra_delay: Duration,
    pub ultra_door_extra: Duration,
    /// 单次发送的上限
    pub send_timeout: Duration,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            trigger_timeout: Duration::from_millis(5000),
            fast_recent_window: Duration::from_millis(750),
            fast_delay: Duration::from_millis(400),
            ultra_delay: Duration::from_millis(150),
            ultra_door_extra: Duration::from_millis(650),
            send_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    Executing,
    Paused,
}

/// 暂停/停止由谁发起；导航器据此区分自己的操作与外部打断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOrigin {
    Navigator,
    External,
}

#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    StepSent {
        command: MovementCommand,
        remaining: usize,
    },
    StepFailed {
        command: MovementCommand,
        error: String,
    },
    /// 队列耗尽
    Drained,
    Paused {
        reason: String,
        origin: StopOrigin,
    },
    Stopped {
        origin: StopOrigin,
    },
}

#[derive(Default)]
struct RunSlot {
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
    lease: Option<QueueLease>,
}

struct Inner {
    transport: Arc<dyn CommandTransport>,
    queue: CommandQueue,
    signal: RoomChangeSignal,
    settings: PacingSettings,
    strategy: Mutex<PacingStrategy>,
    state: Mutex<ExecutorState>,
    slot: Mutex<RunSlot>,
    events: broadcast::Sender<ExecutorEvent>,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 执行器句柄（可克隆）
#[derive(Clone)]
pub struct MovementExecutor {
    inner: Arc<Inner>,
}

impl MovementExecutor {
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        queue: CommandQueue,
        signal: RoomChangeSignal,
        settings: PacingSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                transport,
                queue,
                signal,
                settings,
                strategy: Mutex::new(PacingStrategy::default()),
                state: Mutex::new(ExecutorState::Idle),
                slot: Mutex::new(RunSlot::default()),
                events,
            }),
        }
    }

    pub fn with_strategy(self, strategy: PacingStrategy) -> Self {
        self.set_strategy(strategy);
        self
    }

    pub fn set_strategy(&self, strategy: PacingStrategy) {
        *relock(&self.inner.strategy) = strategy;
        tracing::info!(strategy = ?strategy, "pacing strategy set");
    }

    pub fn strategy(&self) -> PacingStrategy {
        *relock(&self.inner.strategy)
    }

    pub fn state(&self) -> ExecutorState {
        *relock(&self.inner.state)
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.inner.queue
    }

    pub fn signal(&self) -> &RoomChangeSignal {
        &self.inner.signal
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.inner.events.subscribe()
    }

    /// 启动执行；已有执行在跑或队列被其他执行器占用时返回 false
    pub fn start(&self) -> bool {
        let mut slot = relock(&self.inner.slot);
        if let Some(token) = &slot.token {
            if !token.is_cancelled() {
                return false;
            }
        }
        if slot.lease.is_none() {
            match self.inner.queue.try_lease() {
                Some(lease) => slot.lease = Some(lease),
                None => {
                    tracing::warn!("command queue is owned by another executor");
                    return false;
                }
            }
        }

        let token = CancellationToken::new();
        let previous = slot.handle.take();
        *relock(&self.inner.state) = ExecutorState::Executing;

        let inner = Arc::clone(&self.inner);
        let run_token = token.clone();
        slot.handle = Some(tokio::spawn(async move {
            // 上一轮（已取消）退出后再开始，保证同一时刻只有一个循环
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            inner.run(run_token).await;
        }));
        slot.token = Some(token);
        true
    }

    /// 暂停：打断当前等待，保留队列
    pub fn pause(&self, reason: &str) -> bool {
        self.pause_from(reason, StopOrigin::External)
    }

    pub fn pause_from(&self, reason: &str, origin: StopOrigin) -> bool {
        let slot = relock(&self.inner.slot);
        match &slot.token {
            Some(token) if !token.is_cancelled() => {
                *relock(&self.inner.state) = ExecutorState::Paused;
                token.cancel();
                tracing::info!(reason = %reason, origin = ?origin, queued = self.inner.queue.len(), "executor paused");
                let _ = self.inner.events.send(ExecutorEvent::Paused {
                    reason: reason.to_string(),
                    origin,
                });
                true
            }
            _ => false,
        }
    }

    /// 从剩余队列继续
    pub fn resume(&self) -> bool {
        let state = self.state();
        let resumable = state == ExecutorState::Paused
            || (state == ExecutorState::Idle && !self.inner.queue.is_empty());
        resumable && self.start()
    }

    /// 停止：打断等待，清空队列与挂起信号，归还队列执行权
    pub fn stop(&self) {
        self.stop_from(StopOrigin::External);
    }

    pub fn stop_from(&self, origin: StopOrigin) {
        let mut slot = relock(&self.inner.slot);
        // 先置 Idle 再取消，被打断的发送就不会把命令放回已清空的队列
        *relock(&self.inner.state) = ExecutorState::Idle;
        if let Some(token) = &slot.token {
            token.cancel();
        }
        slot.lease = None;
        let dropped = self.inner.queue.clear();
        self.inner.signal.clear();
        tracing::info!(dropped, origin = ?origin, "executor stopped");
        let _ = self.inner.events.send(ExecutorEvent::Stopped { origin });
    }
}

impl Inner {
    fn emit(&self, event: ExecutorEvent) {
        // 没有订阅者时丢弃
        let _ = self.events.send(event);
    }

    async fn run(&self, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                return;
            }
            let Some(command) = self.queue.pop_front() else {
                self.finish_drained(&token);
                return;
            };

            let mut changes = self.signal.subscribe();
            let _ = changes.borrow_and_update();

            let text = command.command.clone();
            let sent = tokio::select! {
                _ = token.cancelled() => {
                    // 暂停时还没发出去的命令放回队首；停止则丢弃
                    if *relock(&self.state) == ExecutorState::Paused {
                        self.queue.push_front(command);
                    }
                    return;
                }
                res = tokio::time::timeout(self.settings.send_timeout, self.transport.send_command(&text)) => {
                    res.unwrap_or_else(|_| Err(TransportError::SendFailed("send timed out".to_string())))
                }
            };

            match sent {
                Ok(()) => {
                    tracing::debug!(command = %command.command, "movement command sent");
                    let remaining = self.queue.len();
                    self.emit(ExecutorEvent::StepSent {
                        command: command.clone(),
                        remaining,
                    });
                }
                Err(e) => {
                    tracing::warn!(command = %command.command, error = %e, "movement command failed, skipping");
                    self.emit(ExecutorEvent::StepFailed {
                        command,
                        error: e.to_string(),
                    });
                    continue;
                }
            }

            if !self.pace(&command, &mut changes, &token).await {
                return;
            }
        }
    }

    /// 队列耗尽：回到 Idle 并归还队列执行权
    fn finish_drained(&self, token: &CancellationToken) {
        let mut slot = relock(&self.slot);
        // 已被暂停/停止接管时不动状态
        if token.is_cancelled() {
            return;
        }
        *relock(&self.state) = ExecutorState::Idle;
        token.cancel();
        slot.lease = None;
        drop(slot);
        tracing::debug!("command queue drained");
        self.emit(ExecutorEvent::Drained);
    }

    /// 按策略等待；被取消时返回 false
    async fn pace(
        &self,
        command: &MovementCommand,
        changes: &mut watch::Receiver<u64>,
        token: &CancellationToken,
    ) -> bool {
        let strategy = *relock(&self.strategy);
        let s = &self.settings;
        match strategy {
            PacingStrategy::Triggered => wait_change_or(changes, s.trigger_timeout, token).await,
            PacingStrategy::FastWithFallback => {
                if self.signal.changed_within(s.fast_recent_window) {
                    return !token.is_cancelled();
                }
                wait_change_or(changes, s.fast_delay, token).await
            }
            PacingStrategy::UltraFast => {
                let mut delay = s.ultra_delay;
                if command.door || command.hidden {
                    delay += s.ultra_door_extra;
                }
                sleep_or_cancel(delay, token).await
            }
            PacingStrategy::TimedOnly => sleep_or_cancel(command.estimated_delay, token).await,
        }
    }
}

async fn wait_change_or(
    changes: &mut watch::Receiver<u64>,
    timeout: Duration,
    token: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = changes.changed() => true,
        _ = tokio::time::sleep(timeout) => true,
    }
}

async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
        fail_on: Option<String>,
        signal: Option<RoomChangeSignal>,
    }

    #[async_trait]
    impl CommandTransport for Recorder {
        async fn send_command(&self, command: &str) -> Result<(), TransportError> {
            if self.fail_on.as_deref() == Some(command) {
                return Err(TransportError::SendFailed("link down".to_string()));
            }
            self.sent.lock().unwrap().push(command.to_string());
            if let Some(signal) = &self.signal {
                signal.notify();
            }
            Ok(())
        }
    }

    fn cmd(c: &str, delay_ms: u64) -> MovementCommand {
        MovementCommand::raw(c, Duration::from_millis(delay_ms))
    }

    fn fast_settings() -> PacingSettings {
        PacingSettings {
            trigger_timeout: Duration::from_millis(20),
            fast_recent_window: Duration::from_millis(10),
            fast_delay: Duration::from_millis(10),
            ultra_delay: Duration::from_millis(5),
            ultra_door_extra: Duration::from_millis(5),
            send_timeout: Duration::from_millis(500),
        }
    }

    async fn wait_for(rx: &mut broadcast::Receiver<ExecutorEvent>, pred: impl Fn(&ExecutorEvent) -> bool) {
        timeout(Duration::from_secs(3), async {
            loop {
                if let Ok(event) = rx.recv().await {
                    if pred(&event) {
                        return;
                    }
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_triggered_falls_back_on_timeout() {
        let transport = Arc::new(Recorder::default());
        let queue = CommandQueue::new();
        queue.extend([cmd("n", 0), cmd("e", 0), cmd("s", 0)]);
        let exec = MovementExecutor::new(transport.clone(), queue, RoomChangeSignal::new(), fast_settings());
        let mut rx = exec.subscribe();

        assert!(exec.start());
        assert!(!exec.start());
        wait_for(&mut rx, |e| matches!(e, ExecutorEvent::Drained)).await;

        assert_eq!(*transport.sent.lock().unwrap(), vec!["n", "e", "s"]);
        assert_eq!(exec.state(), ExecutorState::Idle);
    }

    #[tokio::test]
    async fn test_triggered_proceeds_on_signal() {
        let signal = RoomChangeSignal::new();
        let transport = Arc::new(Recorder {
            signal: Some(signal.clone()),
            ..Recorder::default()
        });
        let queue = CommandQueue::new();
        queue.extend([cmd("n", 0), cmd("n", 0), cmd("n", 0)]);
        let settings = PacingSettings {
            trigger_timeout: Duration::from_secs(30),
            ..fast_settings()
        };
        let exec = MovementExecutor::new(transport.clone(), queue, signal, settings);
        let mut rx = exec.subscribe();
        exec.start();
        // 超时 30 秒，只有信号能让它在 3 秒内完成
        wait_for(&mut rx, |e| matches!(e, ExecutorEvent::Drained)).await;
        assert_eq!(transport.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_send_failure_is_skipped() {
        let transport = Arc::new(Recorder {
            fail_on: Some("e".to_string()),
            ..Recorder::default()
        });
        let queue = CommandQueue::new();
        queue.extend([cmd("n", 0), cmd("e", 0), cmd("s", 0)]);
        let exec = MovementExecutor::new(transport.clone(), queue, RoomChangeSignal::new(), fast_settings())
            .with_strategy(PacingStrategy::UltraFast);
        let mut rx = exec.subscribe();
        exec.start();
        wait_for(&mut rx, |e| matches!(e, ExecutorEvent::Drained)).await;
        assert_eq!(*transport.sent.lock().unwrap(), vec!["n", "s"]);
    }

    #[tokio::test]
    async fn test_pause_preserves_queue_and_resume_continues() {
        let transport = Arc::new(Recorder::default());
        let queue = CommandQueue::new();
        queue.extend([cmd("n", 300), cmd("e", 10), cmd("s", 10)]);
        let exec = MovementExecutor::new(transport.clone(), queue, RoomChangeSignal::new(), fast_settings())
            .with_strategy(PacingStrategy::TimedOnly);
        let mut rx = exec.subscribe();
        exec.start();
        wait_for(&mut rx, |e| matches!(e, ExecutorEvent::StepSent { .. })).await;

        assert!(exec.pause("combat"));
        assert_eq!(exec.state(), ExecutorState::Paused);
        assert_eq!(exec.queue().len(), 2);
        assert!(!exec.pause("again"));

        assert!(exec.resume());
        wait_for(&mut rx, |e| matches!(e, ExecutorEvent::Drained)).await;
        assert_eq!(*transport.sent.lock().unwrap(), vec!["n", "e", "s"]);
    }

    #[tokio::test]
    async fn test_stop_clears_queue() {
        let transport = Arc::new(Recorder::default());
        let queue = CommandQueue::new();
        queue.extend([cmd("n", 300), cmd("e", 300)]);
        let exec = MovementExecutor::new(transport.clone(), queue.clone(), RoomChangeSignal::new(), fast_settings())
            .with_strategy(PacingStrategy::TimedOnly);
        let mut rx = exec.subscribe();
        exec.start();
        wait_for(&mut rx, |e| matches!(e, ExecutorEvent::StepSent { .. })).await;

        exec.stop();
        assert!(queue.is_empty());
        assert_eq!(exec.state(), ExecutorState::Idle);
        assert!(!exec.resume());

        // 停止后归还执行权，其他执行器可以接手
        let other = MovementExecutor::new(transport, queue.clone(), RoomChangeSignal::new(), fast_settings());
        queue.push(cmd("w", 0));
        assert!(other.start());
    }

    #[tokio::test]
    async fn test_drain_releases_queue() {
        let transport = Arc::new(Recorder::default());
        let queue = CommandQueue::new();
        queue.push(cmd("n", 0));
        let a = MovementExecutor::new(transport.clone(), queue.clone(), RoomChangeSignal::new(), fast_settings())
            .with_strategy(PacingStrategy::UltraFast);
        let mut rx = a.subscribe();
        assert!(a.start());
        wait_for(&mut rx, |e| matches!(e, ExecutorEvent::Drained)).await;

        let b = MovementExecutor::new(transport.clone(), queue.clone(), RoomChangeSignal::new(), fast_settings())
            .with_strategy(PacingStrategy::UltraFast);
        let mut b_rx = b.subscribe();
        queue.push(cmd("s", 0));
        assert!(b.start());
        wait_for(&mut b_rx, |e| matches!(e, ExecutorEvent::Drained)).await;
        assert_eq!(*transport.sent.lock().unwrap(), vec!["n", "s"]);
    }

    #[tokio::test]
    async fn test_events_carry_origin() {
        let queue = CommandQueue::new();
        queue.extend([cmd("n", 300), cmd("e", 300)]);
        let exec = MovementExecutor::new(Arc::new(Recorder::default()), queue, RoomChangeSignal::new(), fast_settings())
            .with_strategy(PacingStrategy::TimedOnly);
        let mut rx = exec.subscribe();
        exec.start();
        wait_for(&mut rx, |e| matches!(e, ExecutorEvent::StepSent { .. })).await;

        assert!(exec.pause_from("combat", StopOrigin::Navigator));
        wait_for(&mut rx, |e| {
            matches!(e, ExecutorEvent::Paused { origin: StopOrigin::Navigator, .. })
        })
        .await;
        exec.stop();
        wait_for(&mut rx, |e| matches!(e, ExecutorEvent::Stopped { origin: StopOrigin::External })).await;
    }

    #[tokio::test]
    async fn test_single_executor_per_queue() {
        let queue = CommandQueue::new();
        queue.push(cmd("n", 200));
        let a = MovementExecutor::new(Arc::new(Recorder::default()), queue.clone(), RoomChangeSignal::new(), fast_settings())
            .with_strategy(PacingStrategy::TimedOnly);
        let b = MovementExecutor::new(Arc::new(Recorder::default()), queue.clone(), RoomChangeSignal::new(), fast_settings());
        assert!(a.start());
        assert!(!b.start());
        a.stop();
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("fast".parse::<PacingStrategy>(), Ok(PacingStrategy::FastWithFallback));
        assert_eq!("ultra-fast".parse::<PacingStrategy>(), Ok(PacingStrategy::UltraFast));
        assert_eq!("Timed".parse::<PacingStrategy>(), Ok(PacingStrategy::TimedOnly));
        assert!("warp".parse::<PacingStrategy>().is_err());
    }
}
