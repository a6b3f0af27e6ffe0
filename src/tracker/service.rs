//! 追踪器任务：独占 WorldTracker，按到达顺序处理输入，把更新广播给下游
//!
//! 输入走无界 mpsc（上游没有背压约定），输出是 `broadcast`，最新快照另存一份 `watch`。

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::parser::ColoredLine;
use crate::tracker::snapshot::{Disposition, RoomSnapshot};
use crate::tracker::world::{TrackerUpdate, WorldTracker};

/// 上游输入
#[derive(Debug, Clone)]
pub enum FeedItem {
    Line(String),
    Colored(ColoredLine),
    /// 本地发出的命令
    Command(String),
    SetDisposition {
        name: String,
        disposition: Disposition,
    },
    Reset,
}

/// 追踪器任务句柄（可克隆，供各方投递与订阅）
#[derive(Clone)]
pub struct TrackerHandle {
    feed_tx: mpsc::UnboundedSender<FeedItem>,
    updates_tx: broadcast::Sender<TrackerUpdate>,
    current_rx: watch::Receiver<Option<Arc<RoomSnapshot>>>,
}

impl TrackerHandle {
    pub fn send(&self, item: FeedItem) -> bool {
        self.feed_tx.send(item).is_ok()
    }

    pub fn push_line(&self, line: impl Into<String>) -> bool {
        self.send(FeedItem::Line(line.into()))
    }

    pub fn push_colored(&self, line: ColoredLine) -> bool {
        self.send(FeedItem::Colored(line))
    }

    pub fn note_command(&self, command: impl Into<String>) -> bool {
        self.send(FeedItem::Command(command.into()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerUpdate> {
        self.updates_tx.subscribe()
    }

    /// 最近一次发布的当前房间快照
    pub fn current(&self) -> Option<Arc<RoomSnapshot>> {
        self.current_rx.borrow().clone()
    }
}

pub struct TrackerService;

impl TrackerService {
    /// 启动追踪器任务；token 取消或所有发送端关闭时退出
    pub fn spawn(
        mut tracker: WorldTracker,
        token: CancellationToken,
    ) -> (TrackerHandle, JoinHandle<()>) {
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel::<FeedItem>();
        let (updates_tx, _) = broadcast::channel(256);
        let (current_tx, current_rx) = watch::channel(tracker.current());

        let handle = TrackerHandle {
            feed_tx,
            updates_tx: updates_tx.clone(),
            current_rx,
        };

        let task = tokio::spawn(async move {
            tracing::info!(session = %tracker.session(), "tracker started");
            loop {
                let item = tokio::select! {
                    _ = token.cancelled() => break,
                    item = feed_rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };

                let mut updates = apply_item(&mut tracker, item);
                // 已到达的输入一起处理，减少无谓的提取
                while let Ok(next) = feed_rx.try_recv() {
                    updates.extend(apply_item(&mut tracker, next));
                }
                updates.extend(tracker.process());

                if !updates.is_empty() {
                    current_tx.send_replace(tracker.current());
                }
                for update in updates {
                    // 没有订阅者时丢弃
                    let _ = updates_tx.send(update);
                }
            }
            tracing::info!("tracker stopped");
        });

        (handle, task)
    }
}

fn apply_item(tracker: &mut WorldTracker, item: FeedItem) -> Vec<TrackerUpdate> {
    match item {
        FeedItem::Line(line) => tracker.push_line(&line),
        FeedItem::Colored(line) => tracker.push_colored(line),
        FeedItem::Command(command) => tracker.note_command(&command),
        FeedItem::SetDisposition { name, disposition } => {
            // 先处理已缓冲的行，保证顺序
            let mut updates = tracker.process();
            updates.extend(tracker.set_disposition(&name, disposition));
            return updates;
        }
        FeedItem::Reset => tracker.reset(),
    }
    Vec::new()
}
