//! 世界模型追踪器：缓冲输入行，增量提取房间，扫描动态事件，合并同房间刷新
//!
//! 每个处理周期：
//! 1. 找到第一条未消费的行；若是移动/探查回显则更新方向状态；
//! 2. 以下一条回显为界切出一段，先逐行扫描动态事件（每行只扫一次）；
//! 3. 段内出现出口行才做完整提取，否则保持未消费等待后续行；
//!    纯噪声段、以及被回显截断的不完整段直接标记为已消费。
//!
//! 发布出去的快照都是 `Arc<RoomSnapshot>` 不可变值，更新即产生新值。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use crate::map::MapStore;
use crate::parser::{
    classify, clean_line, extract, is_entity_line, is_exits_line, is_item_line, ColoredLine,
    Direction, LineKind, Palette,
};
use crate::tracker::adjacency::{AdjacencyBook, SessionId};
use crate::tracker::events::{apply_event, scan_line, DynamicEvent, MonsterLifecycleSink, NoopSink};
use crate::tracker::snapshot::{base_name, Disposition, RoomSnapshot};

/// 回显（服务器回显或本地记录的命令）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Echo {
    Move(Direction),
    Look(Direction),
    /// 不带方向的 look：结束探查
    LookHere,
}

fn echo_of(text: &str) -> Option<Echo> {
    match classify(text) {
        LineKind::MoveEcho(d) => Some(Echo::Move(d)),
        LineKind::LookEcho(d) => Some(Echo::Look(d)),
        _ => {
            let bare = text.trim().trim_start_matches('>').trim().to_ascii_lowercase();
            (bare == "l" || bare == "look").then_some(Echo::LookHere)
        }
    }
}

#[derive(Debug, Clone)]
struct BufferedLine {
    seq: u64,
    text: String,
    color: Option<ColoredLine>,
    echo: Option<Echo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockTarget {
    Current,
    Remote(Direction),
}

/// 最近一次完整提取的行范围 [start, end)
#[derive(Debug, Clone, Copy)]
struct ExtractedBlock {
    start: u64,
    end: u64,
    target: BlockTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// 进入（或首次看到）一个房间，快照整体替换
    Entered,
    /// 同房间刷新合并
    Refreshed,
    DynamicEvent,
    /// 方向探查看到的远端房间
    Probed { direction: Direction },
}

#[derive(Debug, Clone)]
pub struct TrackerUpdate {
    pub kind: UpdateKind,
    pub snapshot: Arc<RoomSnapshot>,
    /// 经确认的移动方向（Entered）或探查方向（Probed）
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub buffer_size: usize,
    pub palette: Palette,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            palette: Palette::default(),
        }
    }
}

fn is_content(text: &str) -> bool {
    is_entity_line(text) || is_item_line(text)
}

fn is_discardable(text: &str) -> bool {
    matches!(classify(text), LineKind::Noise | LineKind::Error)
}

pub struct WorldTracker {
    settings: TrackerSettings,
    session: SessionId,
    buffer: VecDeque<BufferedLine>,
    next_seq: u64,
    /// 第一条未消费行的序号
    consumed_through: u64,
    /// 第一条未做事件扫描的行的序号
    scanned_through: u64,
    last_block: Option<ExtractedBlock>,
    current: Option<Arc<RoomSnapshot>>,
    last_direction: Option<Direction>,
    moved_since: bool,
    probe: Option<Direction>,
    remote_rooms: HashMap<String, Arc<RoomSnapshot>>,
    adjacency: AdjacencyBook,
    map: Option<Arc<MapStore>>,
    sink: Arc<dyn MonsterLifecycleSink>,
}

impl WorldTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            session: SessionId::new(),
            buffer: VecDeque::new(),
            next_seq: 0,
            consumed_through: 0,
            scanned_through: 0,
            last_block: None,
            current: None,
            last_direction: None,
            moved_since: false,
            probe: None,
            remote_rooms: HashMap::new(),
            adjacency: AdjacencyBook::new(),
            map: None,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MonsterLifecycleSink>) -> Self {
        self.sink = sink;
        self
    }

    /// 静态地图用于判断发现的邻接是否只是重复已知信息
    pub fn with_map(mut self, map: Arc<MapStore>) -> Self {
        self.map = Some(map);
        self
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = session;
        self
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn current(&self) -> Option<Arc<RoomSnapshot>> {
        self.current.clone()
    }

    pub fn last_direction(&self) -> Option<Direction> {
        self.last_direction
    }

    pub fn remote_room(&self, name: &str) -> Option<Arc<RoomSnapshot>> {
        self.remote_rooms.get(&name.trim().to_lowercase()).cloned()
    }

    pub fn remote_rooms(&self) -> Vec<Arc<RoomSnapshot>> {
        let mut rooms: Vec<Arc<RoomSnapshot>> = self.remote_rooms.values().cloned().collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    pub fn discovered_exits(&self, room: &str) -> Vec<(Direction, String)> {
        self.adjacency.exits_of(self.session, room)
    }

    /// 只为静态地图没有的房间作答
    pub fn lookup_discovered(&self, room: &str, direction: Direction) -> Option<String> {
        let graph = self.map.as_ref().and_then(|m| m.graph());
        self.adjacency
            .lookup(self.session, room, direction, graph.as_deref())
            .map(str::to_string)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_lines(&self) -> usize {
        self.buffer
            .iter()
            .filter(|l| l.seq >= self.consumed_through)
            .count()
    }

    pub fn push_line(&mut self, raw: &str) {
        match clean_line(raw) {
            Some(text) => {
                let echo = echo_of(&text);
                self.push_entry(text, None, echo);
            }
            // 单字母回显（"n"）会被清洗丢弃，单独保留
            None => {
                let bare = raw.trim();
                if let Some(echo) = echo_of(bare) {
                    self.push_entry(bare.to_string(), None, Some(echo));
                }
            }
        }
    }

    pub fn push_colored(&mut self, line: ColoredLine) {
        if let Some(text) = clean_line(&line.plain_text()) {
            let echo = echo_of(&text);
            self.push_entry(text, Some(line), echo);
        }
    }

    /// 记录本地发出的命令（服务器不回显时保证移动/探查顺序）
    pub fn note_command(&mut self, command: &str) {
        let command = command.trim();
        if let Some(echo) = echo_of(command) {
            self.push_entry(command.to_string(), None, Some(echo));
        }
    }

    fn push_entry(&mut self, text: String, color: Option<ColoredLine>, echo: Option<Echo>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.buffer.push_back(BufferedLine {
            seq,
            text,
            color,
            echo,
        });

        while self.buffer.len() > self.settings.buffer_size.max(1) {
            let Some(dropped) = self.buffer.pop_front() else {
                break;
            };
            if dropped.seq >= self.consumed_through {
                tracing::warn!(seq = dropped.seq, "tracker buffer full, dropping unprocessed line");
                self.consumed_through = dropped.seq + 1;
            }
            self.scanned_through = self.scanned_through.max(dropped.seq + 1);
            if self.last_block.map(|b| b.start <= dropped.seq).unwrap_or(false) {
                self.last_block = None;
            }
        }
    }

    fn index_of(&self, seq: u64) -> Option<usize> {
        let front = self.buffer.front()?.seq;
        let idx = seq.checked_sub(front)? as usize;
        (idx < self.buffer.len()).then_some(idx)
    }

    /// 处理所有可处理的缓冲行，按行到达顺序返回产生的更新
    pub fn process(&mut self) -> Vec<TrackerUpdate> {
        let mut updates = Vec::new();
        while self.step(&mut updates) {}
        updates
    }

    fn step(&mut self, updates: &mut Vec<TrackerUpdate>) -> bool {
        let Some(start) = self.index_of(self.consumed_through) else {
            return false;
        };

        if let Some(echo) = self.buffer[start].echo {
            let seq = self.buffer[start].seq;
            self.apply_echo(echo);
            self.consumed_through = seq + 1;
            self.scanned_through = self.scanned_through.max(seq + 1);
            return true;
        }

        let seg_end = (start..self.buffer.len())
            .find(|&i| self.buffer[i].echo.is_some())
            .unwrap_or(self.buffer.len());
        let closed = seg_end < self.buffer.len();

        self.scan_events(start, seg_end, updates);

        // 紧跟在上一次提取块之后的怪物/物品行：连同原块重新提取
        if let Some(block) = self.last_block {
            if block.end == self.consumed_through {
                let mut end = start;
                while end < seg_end && is_content(&self.buffer[end].text) {
                    end += 1;
                }
                if end > start {
                    if let Some(block_start) = self.index_of(block.start) {
                        let end_seq = self.buffer[end - 1].seq + 1;
                        if let Some(fresh) = self.extract_range(block_start, end) {
                            self.apply_snapshot(fresh, block.target, true, updates);
                        }
                        self.consumed_through = end_seq;
                        self.last_block = Some(ExtractedBlock {
                            end: end_seq,
                            ..block
                        });
                        return true;
                    }
                }
            }
        }

        if let Some(exits) = (start..seg_end).rev().find(|&i| is_exits_line(&self.buffer[i].text)) {
            let mut end = exits + 1;
            while end < seg_end && is_content(&self.buffer[end].text) {
                end += 1;
            }
            let start_seq = self.buffer[start].seq;
            let end_seq = self.buffer[end - 1].seq + 1;
            self.consumed_through = end_seq;
            match self.extract_range(start, end) {
                Some(fresh) => {
                    let target = self.target();
                    self.apply_snapshot(fresh, target, false, updates);
                    self.last_block = Some(ExtractedBlock {
                        start: start_seq,
                        end: end_seq,
                        target,
                    });
                }
                None => {
                    tracing::debug!(lines = end - start, "segment yielded no room");
                    self.last_block = None;
                }
            }
            return true;
        }

        let all_noise = (start..seg_end).all(|i| is_discardable(&self.buffer[i].text));
        if all_noise || closed {
            if !all_noise {
                tracing::debug!(lines = seg_end - start, "dropping segment without exits");
            }
            self.consumed_through = self.buffer[seg_end - 1].seq + 1;
            return true;
        }

        // 开头的噪声行不阻塞后续检测
        let mut first_real = start;
        while first_real < seg_end && is_discardable(&self.buffer[first_real].text) {
            first_real += 1;
        }
        if first_real > start {
            self.consumed_through = self.buffer[first_real].seq;
            return true;
        }
        false
    }

    fn target(&self) -> BlockTarget {
        match self.probe {
            Some(d) => BlockTarget::Remote(d),
            None => BlockTarget::Current,
        }
    }

    fn apply_echo(&mut self, echo: Echo) {
        self.last_block = None;
        match echo {
            Echo::Move(d) => {
                self.last_direction = Some(d);
                self.moved_since = true;
                self.probe = None;
            }
            Echo::Look(d) => {
                tracing::debug!(direction = %d, "directional probe opened");
                self.probe = Some(d);
            }
            Echo::LookHere => self.probe = None,
        }
    }

    fn scan_events(&mut self, start: usize, end: usize, updates: &mut Vec<TrackerUpdate>) {
        for i in start..end {
            let seq = self.buffer[i].seq;
            if seq < self.scanned_through {
                continue;
            }
            self.scanned_through = seq + 1;
            let text = self.buffer[i].text.clone();

            let kind = classify(&text);
            if kind == LineKind::Error && self.moved_since {
                // 移动失败，仍在原房间
                self.moved_since = false;
                self.last_direction = None;
                continue;
            }
            if self.moved_since {
                continue;
            }
            if !matches!(kind, LineKind::Text) {
                continue;
            }
            let Some(current) = self.current.clone() else {
                continue;
            };
            let Some(event) = scan_line(&text, &current.monsters) else {
                continue;
            };
            match &event {
                DynamicEvent::Summoned(name) => self.sink.ensure_tracked(name),
                DynamicEvent::Died(names) => self.sink.notify_death(names, &text),
                _ => {}
            }
            if let Some(next) = apply_event(&current, &event) {
                tracing::debug!(event = ?event, room = %next.name, "dynamic event");
                let snapshot = Arc::new(next);
                self.current = Some(Arc::clone(&snapshot));
                updates.push(TrackerUpdate {
                    kind: UpdateKind::DynamicEvent,
                    snapshot,
                    direction: None,
                });
            }
        }
    }

    fn extract_range(&self, start: usize, end: usize) -> Option<RoomSnapshot> {
        let lines: Vec<String> = (start..end).map(|i| self.buffer[i].text.clone()).collect();
        let colors: Option<Vec<ColoredLine>> = (start..end)
            .map(|i| self.buffer[i].color.clone())
            .collect();
        extract(&lines, colors.as_deref(), &self.settings.palette)
    }

    fn apply_snapshot(
        &mut self,
        fresh: RoomSnapshot,
        target: BlockTarget,
        continuation: bool,
        updates: &mut Vec<TrackerUpdate>,
    ) {
        match target {
            BlockTarget::Current => {
                // 未移动时，无名字的重新提取（描述行 + 出口）仍是当前房间
                let same_room = match &self.current {
                    Some(cur) => {
                        !self.moved_since && (continuation || !fresh.has_name() || cur.same_name(&fresh))
                    }
                    None => false,
                };
                let (next, kind, direction) = match (&self.current, same_room) {
                    (Some(cur), true) => (cur.merged_refresh(fresh), UpdateKind::Refreshed, None),
                    _ => {
                        let direction = if self.moved_since { self.last_direction } else { None };
                        if let (Some(prev), Some(dir)) = (&self.current, direction) {
                            let graph = self.map.as_ref().and_then(|m| m.graph());
                            self.adjacency
                                .record(self.session, &prev.name, dir, &fresh.name, graph.as_deref());
                        }
                        (fresh, UpdateKind::Entered, direction)
                    }
                };
                if kind == UpdateKind::Entered {
                    tracing::info!(room = %next.name, exits = next.exits.len(), "entered room");
                }
                self.moved_since = false;
                let snapshot = Arc::new(next);
                self.current = Some(Arc::clone(&snapshot));
                updates.push(TrackerUpdate {
                    kind,
                    snapshot,
                    direction,
                });
            }
            BlockTarget::Remote(direction) => {
                if !fresh.has_name() {
                    tracing::debug!(direction = %direction, "probe saw an unnamed room");
                    return;
                }
                let key = fresh.name.trim().to_lowercase();
                let next = match self.remote_rooms.get(&key) {
                    Some(prev) => prev.merged_refresh(fresh),
                    None => fresh,
                };
                if let Some(cur) = &self.current {
                    let graph = self.map.as_ref().and_then(|m| m.graph());
                    self.adjacency
                        .record(self.session, &cur.name, direction, &next.name, graph.as_deref());
                }
                let snapshot = Arc::new(next);
                self.remote_rooms.insert(key, Arc::clone(&snapshot));
                // 远处房间已提取，之后的输出回到当前房间
                self.probe = None;
                updates.push(TrackerUpdate {
                    kind: UpdateKind::Probed { direction },
                    snapshot,
                    direction: Some(direction),
                });
            }
        }
    }

    /// 显式设置当前房间某怪物的敌意状态
    pub fn set_disposition(&mut self, name: &str, disposition: Disposition) -> Option<TrackerUpdate> {
        let current = self.current.clone()?;
        let base = base_name(name);
        let mut next = (*current).clone();
        let monster = next.monsters.iter_mut().find(|m| m.base_name() == base)?;
        monster.disposition = disposition;
        if disposition != Disposition::Aggressive {
            monster.targeting_player = false;
        }
        let snapshot = Arc::new(next);
        self.current = Some(Arc::clone(&snapshot));
        Some(TrackerUpdate {
            kind: UpdateKind::DynamicEvent,
            snapshot,
            direction: None,
        })
    }

    /// 清空缓冲与房间状态（断线重连等）；已发现的邻接保留
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.consumed_through = self.next_seq;
        self.scanned_through = self.next_seq;
        self.last_block = None;
        self.current = None;
        self.last_direction = None;
        self.moved_since = false;
        self.probe = None;
        self.remote_rooms.clear();
    }
}
