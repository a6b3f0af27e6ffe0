//! 发现的邻接关系：只来自确认的移动或方向探查，只补充静态地图缺失的房间

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::map::MapGraph;
use crate::parser::Direction;

/// 一次客户端会话
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// (会话, 房间名) 键；房间名统一小写
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdjacencyKey {
    pub session: SessionId,
    pub room: String,
}

impl AdjacencyKey {
    pub fn new(session: SessionId, room: &str) -> Self {
        Self {
            session,
            room: room.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Default)]
pub struct AdjacencyBook {
    links: HashMap<AdjacencyKey, HashMap<Direction, String>>,
}

/// 静态地图中是否已有同名房间在该方向有出口
fn map_knows(map: &MapGraph, room: &str, direction: Direction) -> bool {
    map.find_rooms(|n| n.name_equals(room))
        .iter()
        .any(|n| map.edge_in_direction(n.id, direction).is_some())
}

impl AdjacencyBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录 from --direction--> to；静态地图已知的链接不记录。返回是否写入
    pub fn record(
        &mut self,
        session: SessionId,
        from: &str,
        direction: Direction,
        to: &str,
        map: Option<&MapGraph>,
    ) -> bool {
        if from.trim().is_empty() || to.trim().is_empty() {
            return false;
        }
        if map.map(|m| map_knows(m, from, direction)).unwrap_or(false) {
            return false;
        }
        tracing::debug!(from = %from, direction = %direction, to = %to, "adjacency discovered");
        self.links
            .entry(AdjacencyKey::new(session, from))
            .or_default()
            .insert(direction, to.trim().to_string());
        true
    }

    /// 只为静态地图中不存在的房间作答
    pub fn lookup(
        &self,
        session: SessionId,
        room: &str,
        direction: Direction,
        map: Option<&MapGraph>,
    ) -> Option<&str> {
        if let Some(m) = map {
            if !m.find_rooms(|n| n.name_equals(room)).is_empty() {
                return None;
            }
        }
        self.links
            .get(&AdjacencyKey::new(session, room))
            .and_then(|dirs| dirs.get(&direction))
            .map(String::as_str)
    }

    /// 某房间所有已发现的出口，按方向排序
    pub fn exits_of(&self, session: SessionId, room: &str) -> Vec<(Direction, String)> {
        let mut exits: Vec<(Direction, String)> = self
            .links
            .get(&AdjacencyKey::new(session, room))
            .map(|dirs| dirs.iter().map(|(d, r)| (*d, r.clone())).collect())
            .unwrap_or_default();
        exits.sort_by_key(|(d, _)| *d);
        exits
    }

    pub fn len(&self) -> usize {
        self.links.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear_session(&mut self, session: SessionId) {
        self.links.retain(|k, _| k.session != session);
    }
}
