//! 房间提取：把一段已清洗的行（可附带颜色）变成候选房间快照
//!
//! 两种策略：
//! - **颜色优先**：房间名必须整行为 info 色且至少一段加粗，有颜色时不回退到文本判定；
//! - **纯文本**：房间名取 "Exits:" 之前（或第一条怪物/物品行之前）最近的标题样式行。
//!
//! 名字与出口都找不到时返回 None（没有证据，而不是错误）。

use std::sync::OnceLock;

use regex::Regex;

use crate::parser::color::{ColorRun, ColoredLine, Palette, TermColor};
use crate::parser::direction::{parse_exits, Direction};
use crate::tracker::{MonsterEntry, RoomSnapshot};

/// 单行分类（追踪器用来判断边界、回显与噪声）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Exits,
    Entity,
    Item,
    MoveEcho(Direction),
    LookEcho(Direction),
    /// 移动失败等错误提示
    Error,
    /// 提示符、横幅等与房间无关的行
    Noise,
    Text,
}

const DIRECTION_ALT: &str =
    "northeast|northwest|southeast|southwest|north|south|east|west|up|down|ne|nw|se|sw|n|s|e|w|u|d";

const ERROR_PREFIXES: [&str; 10] = [
    "you can't go that way",
    "you cannot go that way",
    "alas, you cannot go that way",
    "there is no exit in that direction",
    "you can't go there",
    "the door is closed",
    "you are too exhausted",
    "you are engaged in combat",
    "huh?",
    "what?",
];

static EXITS_RE: OnceLock<Regex> = OnceLock::new();
static NO_EXITS_RE: OnceLock<Regex> = OnceLock::new();
static ENTITY_RE: OnceLock<Regex> = OnceLock::new();
static ALSO_HERE_RE: OnceLock<Regex> = OnceLock::new();
static ITEM_RE: OnceLock<Regex> = OnceLock::new();
static NOTICE_RE: OnceLock<Regex> = OnceLock::new();
static MOVE_ECHO_RE: OnceLock<Regex> = OnceLock::new();
static LOOK_ECHO_RE: OnceLock<Regex> = OnceLock::new();
static PROMPT_RE: OnceLock<Regex> = OnceLock::new();
static BANNER_RE: OnceLock<Regex> = OnceLock::new();

fn exits_re() -> &'static Regex {
    EXITS_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*[\[(]?\s*(?:obvious\s+)?(?:exits?|paths?)\s*:\s*(.*?)\s*$").unwrap()
    })
}

fn no_exits_re() -> &'static Regex {
    NO_EXITS_RE.get_or_init(|| Regex::new(r"(?i)^there are no obvious (?:exits|paths)\b").unwrap())
}

fn entity_re() -> &'static Regex {
    ENTITY_RE.get_or_init(|| {
        Regex::new(r"(?i)^(.+?)\s+(?:is|are)\s+(?:standing\s+|lying\s+|sitting\s+|resting\s+)?here\s*[.!]?$")
            .unwrap()
    })
}

fn also_here_re() -> &'static Regex {
    ALSO_HERE_RE.get_or_init(|| Regex::new(r"(?i)^also here\s*:\s*(.+?)\s*[.!]?$").unwrap())
}

fn item_re() -> &'static Regex {
    ITEM_RE.get_or_init(|| Regex::new(r"(?i)^(.+?)\s+lays?\s+here\s*[.!]?$").unwrap())
}

fn notice_re() -> &'static Regex {
    NOTICE_RE.get_or_init(|| Regex::new(r"(?i)^you notice\s+(.+?)\s+here\s*[.!]?$").unwrap())
}

fn move_echo_re() -> &'static Regex {
    MOVE_ECHO_RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)^(?:>\s*)?(?:go\s+|walk\s+)?({DIRECTION_ALT})$")).unwrap()
    })
}

fn look_echo_re() -> &'static Regex {
    LOOK_ECHO_RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)^(?:>\s*)?(?:l|look)\s+({DIRECTION_ALT})$")).unwrap()
    })
}

fn prompt_re() -> &'static Regex {
    PROMPT_RE.get_or_init(|| Regex::new(r"^(?:\[[^\]]*\]\s*:?|>+)\s*$").unwrap())
}

fn banner_re() -> &'static Regex {
    BANNER_RE.get_or_init(|| Regex::new(r"^[=\-*~#_+.]{3,}$|(?i)^welcome to\b|(?i)^press \[?(?:enter|return)\]?").unwrap())
}

/// 出口行的方向文本部分；"There are no obvious exits." 返回空串
pub fn exits_body(line: &str) -> Option<&str> {
    if no_exits_re().is_match(line) {
        return Some("");
    }
    exits_re()
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(&[']', ')'][..]))
}

pub fn is_exits_line(line: &str) -> bool {
    exits_body(line).is_some()
}

/// 实体列表部分（"X, Y and Z are here" / "Also here: X, Y"）
fn entity_body(line: &str) -> Option<&str> {
    if let Some(c) = also_here_re().captures(line) {
        return c.get(1).map(|m| m.as_str());
    }
    entity_re().captures(line).and_then(|c| c.get(1)).map(|m| m.as_str())
}

pub fn is_entity_line(line: &str) -> bool {
    entity_body(line).is_some() && !is_item_line(line)
}

fn item_body(line: &str) -> Option<&str> {
    if let Some(c) = item_re().captures(line) {
        return c.get(1).map(|m| m.as_str());
    }
    notice_re().captures(line).and_then(|c| c.get(1)).map(|m| m.as_str())
}

pub fn is_item_line(line: &str) -> bool {
    item_body(line).is_some()
}

pub fn movement_echo(line: &str) -> Option<Direction> {
    move_echo_re()
        .captures(line.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| Direction::parse(m.as_str()))
}

pub fn look_echo(line: &str) -> Option<Direction> {
    look_echo_re()
        .captures(line.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| Direction::parse(m.as_str()))
}

pub fn is_error_line(line: &str) -> bool {
    let lower = line.trim().to_ascii_lowercase();
    ERROR_PREFIXES.iter().any(|p| lower.starts_with(p))
}

pub fn is_noise_line(line: &str) -> bool {
    let trimmed = line.trim();
    prompt_re().is_match(trimmed) || banner_re().is_match(trimmed)
}

pub fn classify(line: &str) -> LineKind {
    if let Some(dir) = look_echo(line) {
        return LineKind::LookEcho(dir);
    }
    if let Some(dir) = movement_echo(line) {
        return LineKind::MoveEcho(dir);
    }
    if is_exits_line(line) {
        return LineKind::Exits;
    }
    if is_item_line(line) {
        return LineKind::Item;
    }
    if is_entity_line(line) {
        return LineKind::Entity;
    }
    if is_error_line(line) {
        return LineKind::Error;
    }
    if is_noise_line(line) {
        return LineKind::Noise;
    }
    LineKind::Text
}

/// 纯文本模式的「标题样式」判定
fn is_title_like(line: &str) -> bool {
    let text = line.trim();
    let len = text.chars().count();
    if !(3..=60).contains(&len) {
        return false;
    }
    if !text.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
        return false;
    }
    if text.ends_with(&['.', '!', '?', ':', ';', ',', '"', '\''][..]) {
        return false;
    }
    if text.contains(&['"', ':', '=', '[', ']'][..]) {
        return false;
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > 8 || words[0].eq_ignore_ascii_case("you") {
        return false;
    }
    if text.chars().filter(|c| c.is_ascii_digit()).count() * 3 > len {
        return false;
    }
    matches!(classify(text), LineKind::Text)
}

/// 把 "A, B, and C" 切成三个名字：先按逗号，再把最后一段按 "and" 切
fn split_list(body: &str) -> Vec<String> {
    let mut pieces: Vec<String> = body.split(',').map(|p| p.trim().to_string()).collect();
    if let Some(last) = pieces.pop() {
        for part in last.split(" and ") {
            pieces.push(part.trim().to_string());
        }
    }
    pieces
        .into_iter()
        .map(|p| {
            p.strip_prefix("and ")
                .map(str::to_string)
                .unwrap_or(p)
                .trim()
                .to_string()
        })
        .filter(|p| !p.is_empty())
        .collect()
}

/// 合并软换行后的逻辑行
#[derive(Debug, Clone)]
struct Logical {
    text: String,
    color: Option<ColoredLine>,
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end().ends_with(&['.', '!', '?', ':', '"'][..])
}

fn starts_lowercase(text: &str) -> bool {
    text.trim_start()
        .chars()
        .next()
        .map(|c| c.is_lowercase())
        .unwrap_or(false)
}

fn is_color_name(color: &ColoredLine, palette: &Palette) -> bool {
    color.is_uniform(palette.info) && color.has_bold()
}

/// 软换行合并：未以句末标点结束的行与下一行拼接
/// - 有颜色时要求两行主色相同且都不是房间名行；
/// - 纯文本时要求下一行以小写开头（避免把标题吞进物品行）。
fn join_wrapped(lines: &[String], colors: Option<&[ColoredLine]>, palette: &Palette) -> Vec<Logical> {
    let mut out: Vec<Logical> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        let color = colors.map(|c| c[i].clone());
        if let Some(prev) = out.last_mut() {
            let structural = !matches!(classify(&prev.text), LineKind::Text | LineKind::Entity | LineKind::Item)
                || is_exits_line(line)
                || movement_echo(line).is_some()
                || look_echo(line).is_some();
            let joinable = !structural
                && !ends_sentence(&prev.text)
                && match (&prev.color, &color) {
                    (Some(pc), Some(c)) => {
                        !is_color_name(pc, palette)
                            && !is_color_name(c, palette)
                            && pc.dominant_color().is_some()
                            && pc.dominant_color() == c.dominant_color()
                    }
                    _ => starts_lowercase(line),
                };
            if joinable {
                prev.text.push(' ');
                prev.text.push_str(line.trim());
                if let (Some(pc), Some(c)) = (prev.color.as_mut(), color) {
                    pc.runs.push(ColorRun::new(" ", c.dominant_color().unwrap_or(TermColor::Default), false));
                    pc.runs.extend(c.runs);
                }
                continue;
            }
        }
        out.push(Logical {
            text: line.trim().to_string(),
            color,
        });
    }
    out
}

/// 实体行是否被颜色策略接受：主色为怪物色，其次为玩家色，最后是无颜色的文本回退
fn accept_entity_color(color: &ColoredLine, palette: &Palette) -> bool {
    match color.dominant_color() {
        Some(c) if c == palette.hostile || c == palette.player => true,
        _ => color.is_colorless(),
    }
}

fn accept_item_color(color: &ColoredLine, palette: &Palette) -> bool {
    color.dominant_color() == Some(palette.info) || color.is_colorless()
}

/// 从一段行中提取房间快照
///
/// `colors` 若给出必须与 `lines` 一一对应，长度不一致时按纯文本处理。
pub fn extract(lines: &[String], colors: Option<&[ColoredLine]>, palette: &Palette) -> Option<RoomSnapshot> {
    let colors = match colors {
        Some(c) if c.len() == lines.len() => Some(c),
        Some(c) => {
            tracing::debug!(lines = lines.len(), colors = c.len(), "color info length mismatch, using text mode");
            None
        }
        None => None,
    };
    let logical = join_wrapped(lines, colors, palette);
    if logical.is_empty() {
        return None;
    }

    let exits_idx = logical.iter().rposition(|l| is_exits_line(&l.text));
    let first_content_idx = logical
        .iter()
        .position(|l| is_entity_line(&l.text) || is_item_line(&l.text));
    let name_limit = exits_idx.or(first_content_idx).unwrap_or(logical.len());

    let name_idx = (0..name_limit).rev().find(|&i| {
        let line = &logical[i];
        match (&line.color, colors.is_some()) {
            (Some(color), true) => {
                is_color_name(color, palette)
                    && matches!(classify(&line.text), LineKind::Text)
            }
            _ => is_title_like(&line.text),
        }
    });

    let exits = exits_idx
        .and_then(|i| exits_body(&logical[i].text).map(parse_exits))
        .unwrap_or_default();

    if name_idx.is_none() && exits_idx.is_none() {
        return None;
    }

    // 怪物与物品：从房间名之后开始；出口行之后只取紧随其后的实体/物品行
    let start = name_idx.map(|i| i + 1).unwrap_or(0);
    let mut monsters: Vec<MonsterEntry> = Vec::new();
    let mut items: Vec<String> = Vec::new();
    for (i, line) in logical.iter().enumerate().skip(start) {
        let after_exits = exits_idx.map(|e| i > e).unwrap_or(false);
        if let Some(body) = item_body(&line.text) {
            if line.color.as_ref().map(|c| accept_item_color(c, palette)).unwrap_or(true) {
                items.extend(split_list(body));
            }
            continue;
        }
        if let Some(body) = entity_body(&line.text) {
            if line.color.as_ref().map(|c| accept_entity_color(c, palette)).unwrap_or(true) {
                monsters.extend(split_list(body).iter().filter_map(|n| MonsterEntry::parse(n)));
            }
            continue;
        }
        if after_exits && !is_exits_line(&line.text) {
            break;
        }
    }

    let name = name_idx
        .map(|i| logical[i].text.trim().to_string())
        .unwrap_or_default();
    Some(
        RoomSnapshot::new(name, exits)
            .with_monsters(monsters)
            .with_items(items),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_text_mode_basic_room() {
        let input = lines(&[
            "Town Square",
            "You are standing in the bustling town square.",
            "Exits: north, south and east.",
            "A goblin, an orc, and two rats are here.",
            "A rusty sword lays here.",
        ]);
        let snap = extract(&input, None, &Palette::default()).unwrap();
        assert_eq!(snap.name, "Town Square");
        assert_eq!(
            snap.exits,
            vec![Direction::North, Direction::South, Direction::East]
        );
        let names: Vec<&str> = snap.monsters.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["goblin", "orc", "rats"]);
        assert_eq!(snap.monsters[2].count, Some(2));
        assert_eq!(snap.items, vec!["A rusty sword".to_string()]);
    }

    #[test]
    fn test_text_mode_skips_non_title_lines() {
        let input = lines(&[
            "Dark Alley",
            "You can't go that way!",
            "north",
            "Exits: north.",
        ]);
        let snap = extract(&input, None, &Palette::default()).unwrap();
        assert_eq!(snap.name, "Dark Alley");
    }

    #[test]
    fn test_name_before_first_monster_without_exits() {
        let input = lines(&["Old Well", "A giant rat is here."]);
        let snap = extract(&input, None, &Palette::default()).unwrap();
        assert_eq!(snap.name, "Old Well");
        assert!(snap.exits.is_empty());
        assert_eq!(snap.monsters.len(), 1);
    }

    #[test]
    fn test_returns_none_without_evidence() {
        let input = lines(&["You feel refreshed.", "Bob says, \"hello there\""]);
        assert!(extract(&input, None, &Palette::default()).is_none());
        assert!(extract(&[], None, &Palette::default()).is_none());
    }

    #[test]
    fn test_exits_only_snapshot_has_empty_name() {
        let input = lines(&["It is too dark to see.", "Exits: up."]);
        let snap = extract(&input, None, &Palette::default()).unwrap();
        assert!(!snap.has_name());
        assert_eq!(snap.exits, vec![Direction::Up]);
    }

    #[test]
    fn test_color_mode_requires_bold_info_name() {
        let palette = Palette::default();
        let input = lines(&["Silent Chapel", "Quiet Prose Line", "Exits: west."]);
        let colors = vec![
            ColoredLine::single("Silent Chapel", TermColor::Cyan, true),
            // 叙述文字即使是标题样式也不能当作房间名
            ColoredLine::single("Quiet Prose Line", TermColor::Green, false),
            ColoredLine::single("Exits: west.", TermColor::Green, false),
        ];
        let snap = extract(&input, Some(&colors), &palette).unwrap();
        assert_eq!(snap.name, "Silent Chapel");

        let colors_no_bold = vec![
            ColoredLine::single("Silent Chapel", TermColor::Cyan, false),
            ColoredLine::single("Quiet Prose Line", TermColor::Green, false),
            ColoredLine::single("Exits: west.", TermColor::Green, false),
        ];
        let snap = extract(&input, Some(&colors_no_bold), &palette).unwrap();
        assert!(!snap.has_name());
        assert_eq!(snap.exits, vec![Direction::West]);
    }

    #[test]
    fn test_color_mode_monster_colors() {
        let palette = Palette::default();
        let input = lines(&[
            "Barracks",
            "Exits: south.",
            "A kobold is here.",
            "Alice is here.",
            "A statue is here.",
        ]);
        let colors = vec![
            ColoredLine::single("Barracks", TermColor::Cyan, true),
            ColoredLine::single("Exits: south.", TermColor::Green, false),
            ColoredLine::single("A kobold is here.", TermColor::Red, false),
            ColoredLine::single("Alice is here.", TermColor::Magenta, false),
            ColoredLine::single("A statue is here.", TermColor::Cyan, false),
        ];
        let snap = extract(&input, Some(&colors), &palette).unwrap();
        let names: Vec<&str> = snap.monsters.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["kobold", "Alice"]);
    }

    #[test]
    fn test_item_soft_wrap_in_info_color() {
        let palette = Palette::default();
        let input = lines(&[
            "Storeroom",
            "Exits: east.",
            "A lantern, a coil of rope, and some",
            "silver coins lay here.",
        ]);
        let colors = vec![
            ColoredLine::single("Storeroom", TermColor::Cyan, true),
            ColoredLine::single("Exits: east.", TermColor::Green, false),
            ColoredLine::single("A lantern, a coil of rope, and some", TermColor::Cyan, false),
            ColoredLine::single("silver coins lay here.", TermColor::Cyan, false),
        ];
        let snap = extract(&input, Some(&colors), &palette).unwrap();
        assert_eq!(
            snap.items,
            vec![
                "A lantern".to_string(),
                "a coil of rope".to_string(),
                "some silver coins".to_string()
            ]
        );
    }

    #[test]
    fn test_text_mode_soft_wrap_needs_lowercase_continuation() {
        let input = lines(&["Armory", "Exits: north.", "A shield and a", "broken spear lay here."]);
        let snap = extract(&input, None, &Palette::default()).unwrap();
        assert_eq!(snap.name, "Armory");
        assert_eq!(
            snap.items,
            vec!["A shield".to_string(), "a broken spear".to_string()]
        );
    }

    #[test]
    fn test_content_after_exits_block_is_ignored() {
        let input = lines(&[
            "Gatehouse",
            "Exits: north.",
            "A guard is here.",
            "You hear distant thunder.",
            "A beggar is here.",
        ]);
        let snap = extract(&input, None, &Palette::default()).unwrap();
        assert_eq!(snap.monsters.len(), 1);
        assert_eq!(snap.monsters[0].name, "guard");
    }

    #[test]
    fn test_classify_echoes_and_noise() {
        assert_eq!(classify("> n"), LineKind::MoveEcho(Direction::North));
        assert_eq!(classify("look east"), LineKind::LookEcho(Direction::East));
        assert_eq!(classify("l sw"), LineKind::LookEcho(Direction::Southwest));
        assert_eq!(classify("[HP=10]:"), LineKind::Noise);
        assert_eq!(classify("=========="), LineKind::Noise);
        assert_eq!(classify("Alas, you cannot go that way."), LineKind::Error);
        assert_eq!(classify("Obvious exits: n, s"), LineKind::Exits);
        assert_eq!(classify("There are no obvious exits."), LineKind::Exits);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("A, B, and C"), vec!["A", "B", "C"]);
        assert_eq!(split_list("A and B"), vec!["A", "B"]);
        assert_eq!(split_list("Lone Wolf"), vec!["Lone Wolf"]);
    }
}
