//! 方向与出口解析
//!
//! 出口行按逗号与 "and" 切分，别名归一（n → north），去重且保持原顺序。

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Northeast,
    Northwest,
    Southeast,
    Southwest,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 10] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::Northeast,
        Direction::Northwest,
        Direction::Southeast,
        Direction::Southwest,
        Direction::Up,
        Direction::Down,
    ];

    /// 解析方向别名（大小写不敏感，允许 "north-east" 形式；含空白的词组不接受）
    pub fn parse(raw: &str) -> Option<Direction> {
        let trimmed = raw.trim().trim_matches(|c: char| !c.is_ascii_alphabetic());
        if trimmed.contains(char::is_whitespace) {
            return None;
        }
        let token: String = trimmed
            .to_ascii_lowercase()
            .chars()
            .filter(|c| *c != '-')
            .collect();
        let dir = match token.as_str() {
            "n" | "north" => Direction::North,
            "s" | "south" => Direction::South,
            "e" | "east" => Direction::East,
            "w" | "west" => Direction::West,
            "ne" | "northeast" => Direction::Northeast,
            "nw" | "northwest" => Direction::Northwest,
            "se" | "southeast" => Direction::Southeast,
            "sw" | "southwest" => Direction::Southwest,
            "u" | "up" => Direction::Up,
            "d" | "down" => Direction::Down,
            _ => return None,
        };
        Some(dir)
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Northeast => Direction::Southwest,
            Direction::Southwest => Direction::Northeast,
            Direction::Northwest => Direction::Southeast,
            Direction::Southeast => Direction::Northwest,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
            Direction::Northeast => "northeast",
            Direction::Northwest => "northwest",
            Direction::Southeast => "southeast",
            Direction::Southwest => "southwest",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    /// 发送给服务器的短命令
    pub fn short(self) -> &'static str {
        match self {
            Direction::North => "n",
            Direction::South => "s",
            Direction::East => "e",
            Direction::West => "w",
            Direction::Northeast => "ne",
            Direction::Northwest => "nw",
            Direction::Southeast => "se",
            Direction::Southwest => "sw",
            Direction::Up => "u",
            Direction::Down => "d",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 去重并保持首次出现顺序；对已归一的列表是恒等操作
pub fn normalize_exits(exits: &[Direction]) -> Vec<Direction> {
    let mut out: Vec<Direction> = Vec::with_capacity(exits.len());
    for dir in exits {
        if !out.contains(dir) {
            out.push(*dir);
        }
    }
    out
}

/// 解析出口列表文本（已去掉 "Exits:" 前缀），如 "north, south and up."
pub fn parse_exits(text: &str) -> Vec<Direction> {
    let body = text.trim().trim_end_matches(&['.', ']', ')', '!'][..]);
    let lowered = body.to_ascii_lowercase();
    if lowered.is_empty() || lowered == "none" || lowered.starts_with("none ") {
        return Vec::new();
    }

    let mut found = Vec::new();
    for piece in lowered.split(',') {
        for part in piece.split(" and ") {
            let part = part.trim().trim_start_matches("and ").trim();
            if part.is_empty() {
                continue;
            }
            if let Some(dir) = Direction::parse(part) {
                found.push(dir);
                continue;
            }
            // "[Exits: n s e]" 这类空格分隔：只有全部词都是方向才接受
            let words: Vec<Option<Direction>> =
                part.split_whitespace().map(Direction::parse).collect();
            if !words.is_empty() && words.iter().all(Option::is_some) {
                found.extend(words.into_iter().flatten());
            } else {
                tracing::debug!(token = %part, "ignoring unrecognised exit token");
            }
        }
    }
    normalize_exits(&found)
}

/// 出口签名：排序后的方向列表，用于识别「同名同出口」的走廊房间
pub fn exit_signature(exits: &[Direction]) -> Vec<Direction> {
    let mut sig = normalize_exits(exits);
    sig.sort();
    sig
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Direction::parse("N"), Some(Direction::North));
        assert_eq!(Direction::parse("north-east"), Some(Direction::Northeast));
        assert_eq!(Direction::parse("south west"), None);
        assert_eq!(Direction::parse("up."), Some(Direction::Up));
        assert_eq!(Direction::parse("portal"), None);
    }

    #[test]
    fn test_parse_exits_commas_and_and() {
        let exits = parse_exits("north, south, east and up.");
        assert_eq!(
            exits,
            vec![Direction::North, Direction::South, Direction::East, Direction::Up]
        );
    }

    #[test]
    fn test_alias_duplicates_collapse() {
        assert_eq!(parse_exits("n, north"), vec![Direction::North]);
        assert_eq!(parse_exits("s and south and s"), vec![Direction::South]);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = parse_exits("w, e, w and nw");
        assert_eq!(once, vec![Direction::West, Direction::East, Direction::Northwest]);
        assert_eq!(normalize_exits(&once), once);
        assert_eq!(normalize_exits(&normalize_exits(&once)), once);
    }

    #[test]
    fn test_space_separated_and_none() {
        assert_eq!(
            parse_exits("n s e"),
            vec![Direction::North, Direction::South, Direction::East]
        );
        assert_eq!(parse_exits("s e"), vec![Direction::South, Direction::East]);
        assert!(parse_exits("none.").is_empty());
        assert!(parse_exits("").is_empty());
    }

    #[test]
    fn test_exit_signature_sorted() {
        let a = exit_signature(&[Direction::South, Direction::North]);
        let b = exit_signature(&[Direction::North, Direction::South, Direction::North]);
        assert_eq!(a, b);
    }
}
