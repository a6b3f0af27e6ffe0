//! 房间快照与怪物条目
//!
//! 快照一经发布即为不可变值；任何更新都产生新值（with_resolved / merged_refresh）。

use serde::{Deserialize, Serialize};

use crate::map::NodeId;
use crate::parser::Direction;

/// 怪物敌意状态：同一房间内一旦得知，不会被刷新静默重置为 Neutral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    #[default]
    Neutral,
    Aggressive,
    Fleeing,
}

const ARTICLES: [&str; 4] = ["a", "an", "the", "some"];

const NUMBER_WORDS: [(&str, u32); 12] = [
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterEntry {
    pub name: String,
    pub disposition: Disposition,
    pub targeting_player: bool,
    pub count: Option<u32>,
}

impl MonsterEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disposition: Disposition::Neutral,
            targeting_player: false,
            count: None,
        }
    }

    pub fn aggressive(name: impl Into<String>) -> Self {
        Self {
            disposition: Disposition::Aggressive,
            ..Self::new(name)
        }
    }

    /// 从列表片段解析："two giant rats" / "3 orcs" / "a goblin (x2)"
    pub fn parse(raw: &str) -> Option<Self> {
        let mut text = raw.trim().trim_end_matches(&['.', '!', ','][..]).trim().to_string();
        let mut count = None;

        if let Some((head, rest)) = text.split_once(' ') {
            let lower = head.to_ascii_lowercase();
            if let Ok(n) = lower.parse::<u32>() {
                count = Some(n);
                text = rest.trim().to_string();
            } else if let Some((_, n)) = NUMBER_WORDS.iter().find(|(w, _)| *w == lower) {
                count = Some(*n);
                text = rest.trim().to_string();
            } else if ARTICLES.contains(&lower.as_str()) {
                text = rest.trim().to_string();
            }
        }

        // 尾部 "(x3)" / "[3]" 计数
        if let Some(open) = text.rfind(&['(', '['][..]) {
            let inner = text[open + 1..].trim_end_matches(&[')', ']'][..]).trim();
            let digits = inner.trim_start_matches(&['x', 'X'][..]);
            if let Ok(n) = digits.parse::<u32>() {
                count = Some(n);
                text = text[..open].trim().to_string();
            }
        }

        if text.chars().filter(|c| c.is_alphabetic()).count() < 2 {
            return None;
        }
        Some(Self {
            count,
            ..Self::new(text)
        })
    }

    /// 用于跨刷新比对的基础名
    pub fn base_name(&self) -> String {
        base_name(&self.name)
    }

    pub fn is_aggressive(&self) -> bool {
        self.disposition == Disposition::Aggressive
    }
}

/// 小写、去冠词/计数、去装饰后缀（"(x2)"、"[fleeing]"、"*"）、简单单数化
pub fn base_name(name: &str) -> String {
    let mut text = name.trim().to_lowercase();

    loop {
        let trimmed = text.trim_end();
        let stripped = if trimmed.ends_with(')') {
            trimmed.rfind('(').map(|i| &trimmed[..i])
        } else if trimmed.ends_with(']') {
            trimmed.rfind('[').map(|i| &trimmed[..i])
        } else if trimmed.ends_with('>') {
            trimmed.rfind('<').map(|i| &trimmed[..i])
        } else if trimmed.ends_with(&['*', '.', '!', ','][..]) {
            Some(&trimmed[..trimmed.len() - 1])
        } else {
            None
        };
        match stripped {
            Some(s) if s.len() < text.len() => text = s.trim_end().to_string(),
            _ => break,
        }
    }

    let mut words: Vec<&str> = text.split_whitespace().collect();
    while let Some(first) = words.first() {
        let is_count = first.parse::<u32>().is_ok() || NUMBER_WORDS.iter().any(|(w, _)| w == first);
        if (ARTICLES.contains(first) || is_count) && words.len() > 1 {
            words.remove(0);
        } else {
            break;
        }
    }

    let joined = words.join(" ");
    singular(&joined)
}

fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    if word.ends_with("ss") || word.len() <= 3 {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(stem) => stem.to_string(),
        None => word.to_string(),
    }
}

/// 某一时刻对当前所在房间的最佳认识
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// 房间名；只识别到出口时为空
    pub name: String,
    pub exits: Vec<Direction>,
    pub monsters: Vec<MonsterEntry>,
    pub items: Vec<String>,
    /// 解析到的地图节点（反向引用，不拥有节点）
    pub resolved_node: Option<NodeId>,
    /// 毫秒时间戳
    pub observed_at: i64,
}

impl RoomSnapshot {
    pub fn new(name: impl Into<String>, exits: Vec<Direction>) -> Self {
        Self {
            name: name.into(),
            exits,
            monsters: Vec::new(),
            items: Vec::new(),
            resolved_node: None,
            observed_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_monsters(mut self, monsters: Vec<MonsterEntry>) -> Self {
        self.monsters = monsters;
        self
    }

    pub fn with_items(mut self, items: Vec<String>) -> Self {
        self.items = items;
        self
    }

    /// 解析成功后打上节点 ID，产生新值
    pub fn with_resolved(&self, node: NodeId) -> Self {
        Self {
            resolved_node: Some(node),
            ..self.clone()
        }
    }

    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }

    pub fn same_name(&self, other: &RoomSnapshot) -> bool {
        self.has_name() && self.name.eq_ignore_ascii_case(&other.name)
    }

    pub fn find_monster(&self, base: &str) -> Option<&MonsterEntry> {
        self.monsters.iter().find(|m| m.base_name() == base)
    }

    pub fn aggressive_count(&self) -> usize {
        self.monsters.iter().filter(|m| m.is_aggressive()).count()
    }

    /// 同一房间的刷新合并：
    /// - 新列表中与旧条目同基础名的怪物沿用旧的敌意与锁定状态，只取新的数量；
    /// - 旧列表中不在新列表里的 Aggressive 怪物保留（可能只是不在本次扫描的片段里）。
    pub fn merged_refresh(&self, fresh: RoomSnapshot) -> RoomSnapshot {
        let fresh_has_name = fresh.has_name();
        let mut monsters: Vec<MonsterEntry> = fresh
            .monsters
            .into_iter()
            .map(|mut m| {
                if let Some(prev) = self.find_monster(&m.base_name()) {
                    m.disposition = prev.disposition;
                    m.targeting_player = prev.targeting_player;
                }
                m
            })
            .collect();

        for prev in self.monsters.iter().filter(|m| m.is_aggressive()) {
            let base = prev.base_name();
            if !monsters.iter().any(|m| m.base_name() == base) {
                monsters.push(prev.clone());
            }
        }

        RoomSnapshot {
            name: if fresh_has_name { fresh.name } else { self.name.clone() },
            exits: if fresh.exits.is_empty() {
                self.exits.clone()
            } else {
                fresh.exits
            },
            monsters,
            items: fresh.items,
            resolved_node: self.resolved_node,
            observed_at: fresh.observed_at,
        }
    }
}
