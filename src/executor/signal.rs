//! 「房间已变化」信号：watch 计数器 + 最近一次变化的时刻

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct RoomChangeSignal {
    tx: Arc<watch::Sender<u64>>,
    last_change: Arc<Mutex<Option<Instant>>>,
}

impl Default for RoomChangeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomChangeSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0u64);
        Self {
            tx: Arc::new(tx),
            last_change: Arc::new(Mutex::new(None)),
        }
    }

    pub fn notify(&self) {
        *self.last_change.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());
        self.tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// 新订阅者只会看到订阅之后的变化
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    pub fn changed_within(&self, window: Duration) -> bool {
        let last = *self.last_change.lock().unwrap_or_else(|p| p.into_inner());
        last.map(|t| t.elapsed() <= window).unwrap_or(false)
    }

    /// 清掉「最近变化」的记录（停止执行时）
    pub fn clear(&self) {
        *self.last_change.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    pub fn change_count(&self) -> u64 {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_wakes_subscriber() {
        let signal = RoomChangeSignal::new();
        let mut rx = signal.subscribe();
        assert!(!signal.changed_within(Duration::from_secs(1)));

        let s = signal.clone();
        tokio::spawn(async move { s.notify() });
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal.change_count(), 1);
        assert!(signal.changed_within(Duration::from_secs(1)));

        signal.clear();
        assert!(!signal.changed_within(Duration::from_secs(1)));
    }
}
