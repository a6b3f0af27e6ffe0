//! 移动命令与共享命令队列

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::map::NodeId;
use crate::parser::Direction;
use crate::planner::PathStep;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovementCommand {
    /// 发给传输层的原始文本
    pub command: String,
    pub direction: Option<Direction>,
    pub door: bool,
    pub hidden: bool,
    pub estimated_delay: Duration,
    /// 执行后预期到达的房间
    pub expected_room: Option<NodeId>,
}

impl MovementCommand {
    pub fn from_step(step: &PathStep) -> Self {
        Self {
            command: step.direction.as_str().to_string(),
            direction: Some(step.direction),
            door: step.door,
            hidden: step.hidden,
            estimated_delay: step.estimated_delay,
            expected_room: Some(step.to),
        }
    }

    /// 任意文本命令（不参与导航步进）
    pub fn raw(command: impl Into<String>, estimated_delay: Duration) -> Self {
        Self {
            command: command.into(),
            direction: None,
            door: false,
            hidden: false,
            estimated_delay,
            expected_room: None,
        }
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    commands: Mutex<VecDeque<MovementCommand>>,
    leased: AtomicBool,
}

/// 共享命令队列；临界区只包住 VecDeque 操作
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

/// 队列执行权；同一时刻只有一个执行器持有，Drop 时归还
#[derive(Debug)]
pub struct QueueLease {
    inner: Arc<QueueInner>,
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        self.inner.leased.store(false, Ordering::Release);
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MovementCommand>> {
        self.inner
            .commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_lease(&self) -> Option<QueueLease> {
        self.inner
            .leased
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| QueueLease {
                inner: Arc::clone(&self.inner),
            })
    }

    pub fn push(&self, command: MovementCommand) {
        self.lock().push_back(command);
    }

    pub fn extend(&self, commands: impl IntoIterator<Item = MovementCommand>) {
        self.lock().extend(commands);
    }

    pub fn pop_front(&self) -> Option<MovementCommand> {
        self.lock().pop_front()
    }

    /// 被打断的命令放回队首
    pub fn push_front(&self, command: MovementCommand) {
        self.lock().push_front(command);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn snapshot(&self) -> Vec<MovementCommand> {
        self.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_order_and_lease() {
        let queue = CommandQueue::new();
        queue.push(MovementCommand::raw("n", Duration::ZERO));
        queue.push(MovementCommand::raw("e", Duration::ZERO));
        let first = queue.pop_front().unwrap();
        queue.push_front(first);
        assert_eq!(queue.snapshot()[0].command, "n");
        assert_eq!(queue.clear(), 2);

        let lease = queue.try_lease().unwrap();
        assert!(queue.clone().try_lease().is_none());
        drop(lease);
        assert!(queue.try_lease().is_some());
    }

    #[test]
    fn test_from_step() {
        let step = PathStep {
            from: NodeId(1),
            to: NodeId(2),
            direction: Direction::Southwest,
            cost: 1.5,
            estimated_delay: Duration::from_millis(2000),
            door: true,
            hidden: false,
        };
        let cmd = MovementCommand::from_step(&step);
        assert_eq!(cmd.command, "southwest");
        assert_eq!(cmd.expected_room, Some(NodeId(2)));
        assert!(cmd.door);
    }
}
