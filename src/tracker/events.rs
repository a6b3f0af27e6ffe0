//! 房间内动态事件：两次完整提取之间逐行扫描
//!
//! 召唤 → 新增敌对怪物；进入/跟随 → 新增中立怪物；死亡词 + 已追踪基础名 → 移除。
//! 另外识别「攻击你」与「逃跑」两类敌意变化。

use std::sync::OnceLock;

use regex::Regex;

use crate::tracker::snapshot::{Disposition, MonsterEntry, RoomSnapshot};

/// 怪物生命周期通知（由战斗追踪方实现并注入追踪器）
pub trait MonsterLifecycleSink: Send + Sync {
    /// 召唤出的怪物需要被战斗追踪方登记
    fn ensure_tracked(&self, name: &str);

    /// 房间内怪物死亡
    fn notify_death(&self, names: &[String], source_line: &str);
}

/// 不关心生命周期时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MonsterLifecycleSink for NoopSink {
    fn ensure_tracked(&self, _name: &str) {}
    fn notify_death(&self, _names: &[String], _source_line: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicEvent {
    Summoned(String),
    Arrived(String),
    /// 死亡的怪物（已追踪的基础名）
    Died(Vec<String>),
    Attacking(String),
    Fled(String),
}

/// 封闭的死亡词表：行尾单词命中才算
const DEATH_WORDS: [&str; 11] = [
    "dies",
    "died",
    "killed",
    "slain",
    "destroyed",
    "dead",
    "perishes",
    "collapses",
    "vanquished",
    "defeated",
    "disintegrates",
];

static SUMMON_RE: OnceLock<Regex> = OnceLock::new();
static ARRIVAL_RE: OnceLock<Regex> = OnceLock::new();
static ATTACK_RE: OnceLock<Regex> = OnceLock::new();
static FLEE_RE: OnceLock<Regex> = OnceLock::new();

fn summon_re() -> &'static Regex {
    SUMMON_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(.+?)\s+(?:is summoned|has been summoned|appears in a (?:puff|cloud|flash) of (?:smoke|light)|materializes|emerges from the shadows|rises from the ground)\b",
        )
        .unwrap()
    })
}

fn arrival_re() -> &'static Regex {
    ARRIVAL_RE.get_or_init(|| {
        Regex::new(r"(?i)^(.+?)\s+(?:enters|arrives|has arrived|walks in|wanders in|follows you)\b").unwrap()
    })
}

fn attack_re() -> &'static Regex {
    ATTACK_RE.get_or_init(|| {
        Regex::new(r"(?i)^(.+?)\s+(?:attacks|hits|bites|claws|swings at|lunges at|charges at)\s+you\b").unwrap()
    })
}

fn flee_re() -> &'static Regex {
    FLEE_RE.get_or_init(|| Regex::new(r"(?i)^(.+?)\s+(?:flees|runs away|turns to flee)\b").unwrap())
}

/// 主语若是玩家自己则不是怪物事件
fn monster_subject(subject: &str) -> Option<MonsterEntry> {
    let first = subject.split_whitespace().next()?.to_ascii_lowercase();
    if first == "you" || first == "your" {
        return None;
    }
    MonsterEntry::parse(subject)
}

fn trailing_word(line: &str) -> Option<String> {
    line.split_whitespace()
        .last()
        .map(|w| w.trim_matches(|c: char| !c.is_alphabetic()).to_ascii_lowercase())
}

/// 扫描一行；`tracked` 为当前房间已知的怪物
pub fn scan_line(line: &str, tracked: &[MonsterEntry]) -> Option<DynamicEvent> {
    let text = line.trim();

    if let Some(word) = trailing_word(text) {
        if DEATH_WORDS.contains(&word.as_str()) {
            let lower = text.to_lowercase();
            let mut names: Vec<String> = Vec::new();
            for m in tracked {
                let base = m.base_name();
                if !base.is_empty() && lower.contains(&base) && !names.contains(&base) {
                    names.push(base);
                }
            }
            if !names.is_empty() {
                return Some(DynamicEvent::Died(names));
            }
            return None;
        }
    }

    let subject = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| monster_subject(m.as_str()))
    };

    if let Some(m) = subject(summon_re()) {
        return Some(DynamicEvent::Summoned(m.name));
    }
    if let Some(m) = subject(attack_re()) {
        return Some(DynamicEvent::Attacking(m.name));
    }
    if let Some(m) = subject(flee_re()) {
        return Some(DynamicEvent::Fled(m.name));
    }
    if let Some(m) = subject(arrival_re()) {
        return Some(DynamicEvent::Arrived(m.name));
    }
    None
}

/// 把事件应用到快照上，产生新值；无变化时返回 None
pub fn apply_event(snapshot: &RoomSnapshot, event: &DynamicEvent) -> Option<RoomSnapshot> {
    let mut next = snapshot.clone();
    next.observed_at = chrono::Utc::now().timestamp_millis();

    match event {
        DynamicEvent::Summoned(name) => {
            let base = crate::tracker::snapshot::base_name(name);
            match next.monsters.iter_mut().find(|m| m.base_name() == base) {
                Some(existing) => existing.disposition = Disposition::Aggressive,
                None => next.monsters.push(MonsterEntry::aggressive(name.clone())),
            }
        }
        DynamicEvent::Arrived(name) => {
            let base = crate::tracker::snapshot::base_name(name);
            if next.find_monster(&base).is_some() {
                return None;
            }
            next.monsters.push(MonsterEntry::new(name.clone()));
        }
        DynamicEvent::Died(bases) => {
            let before = next.monsters.len();
            next.monsters.retain(|m| !bases.contains(&m.base_name()));
            if next.monsters.len() == before {
                return None;
            }
        }
        DynamicEvent::Attacking(name) => {
            let base = crate::tracker::snapshot::base_name(name);
            match next.monsters.iter_mut().find(|m| m.base_name() == base) {
                Some(existing) => {
                    existing.disposition = Disposition::Aggressive;
                    existing.targeting_player = true;
                }
                None => {
                    let mut m = MonsterEntry::aggressive(name.clone());
                    m.targeting_player = true;
                    next.monsters.push(m);
                }
            }
        }
        DynamicEvent::Fled(name) => {
            let base = crate::tracker::snapshot::base_name(name);
            let existing = next.monsters.iter_mut().find(|m| m.base_name() == base)?;
            existing.disposition = Disposition::Fleeing;
            existing.targeting_player = false;
        }
    }
    Some(next)
}
