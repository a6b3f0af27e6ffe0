//! 行清洗：去掉终端控制序列残留与状态栏碎片
//!
//! clean_line 是幂等的：对输出再清洗一次结果不变。

use std::sync::OnceLock;

use regex::Regex;

static ESCAPE_RE: OnceLock<Regex> = OnceLock::new();
static ORPHAN_SGR_RE: OnceLock<Regex> = OnceLock::new();
static STATS_RE: OnceLock<Regex> = OnceLock::new();
static PARTIAL_STATS_RE: OnceLock<Regex> = OnceLock::new();
static SPACES_RE: OnceLock<Regex> = OnceLock::new();

fn escape_re() -> &'static Regex {
    ESCAPE_RE.get_or_init(|| {
        Regex::new(r"\x1b(?:\[[0-9;?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)?|[@-Z\\-_])").unwrap()
    })
}

fn orphan_sgr_re() -> &'static Regex {
    // ESC 丢失后残留的 "[0;37m" / "[1m" / "[K" / "[2J"
    ORPHAN_SGR_RE.get_or_init(|| {
        Regex::new(r"\[\d{1,3}(?:;\d{1,3})*[mKJH]|\[[mKJ]\b").unwrap()
    })
}

fn stats_re() -> &'static Regex {
    STATS_RE.get_or_init(|| {
        Regex::new(r"(?i)\[?\s*(?:hp|ma|sp|mp|kai)\s*=\s*\d+(?:\s*/\s*\d+)?(?:\s*/?\s*(?:hp|ma|sp|mp|kai)\s*=\s*\d+(?:\s*/\s*\d+)?)*\s*(?:\([^)]*\))?\s*\]?\s*:?")
            .unwrap()
    })
}

fn partial_stats_re() -> &'static Regex {
    // 状态栏被截断后行首残留的 "=45]:" / "12/MA=3]:"
    PARTIAL_STATS_RE.get_or_init(|| Regex::new(r"^[\d\s/=A-Za-z]{0,12}=\s*\d+\s*\]\s*:?").unwrap())
}

fn spaces_re() -> &'static Regex {
    SPACES_RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn strip_once(line: &str) -> String {
    let no_escape = escape_re().replace_all(line, "");
    let no_sgr = orphan_sgr_re().replace_all(&no_escape, "");
    let no_stats = stats_re().replace_all(&no_sgr, " ");
    let no_partial = partial_stats_re().replace(&no_stats, "");

    let printable: String = no_partial
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect();
    spaces_re().replace_all(printable.trim(), " ").to_string()
}

/// 清洗一行；少于两个可见字符时返回 None
pub fn clean_line(line: &str) -> Option<String> {
    // 去掉一层后可能拼出新的残留（"[[0m0m"），迭代到不动点
    let mut collapsed = strip_once(line);
    for _ in 0..4 {
        let next = strip_once(&collapsed);
        if next == collapsed {
            break;
        }
        collapsed = next;
    }

    let visible = collapsed.chars().filter(|c| !c.is_whitespace()).count();
    if visible < 2 {
        return None;
    }
    Some(collapsed)
}

/// 批量清洗，丢弃空行
pub fn clean_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    lines.into_iter().filter_map(clean_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_escape_sequences() {
        assert_eq!(
            clean_line("\x1b[1;36mTown Square\x1b[0m").as_deref(),
            Some("Town Square")
        );
        assert_eq!(clean_line("[0;37mDark Alley[0m").as_deref(), Some("Dark Alley"));
    }

    #[test]
    fn test_strips_stats_prompt() {
        assert_eq!(
            clean_line("[HP=120/MA=30]: Exits: north, south.").as_deref(),
            Some("Exits: north, south.")
        );
        assert_eq!(clean_line("[HP=45/MA=12]:"), None);
        assert_eq!(clean_line("=12]: A goblin is here.").as_deref(), Some("A goblin is here."));
    }

    #[test]
    fn test_drops_short_results() {
        assert_eq!(clean_line(""), None);
        assert_eq!(clean_line("  x  "), None);
        assert_eq!(clean_line("\x1b[2J>"), None);
        assert_eq!(clean_line("ok").as_deref(), Some("ok"));
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "\x1b[33mA rusty sword lays here.\x1b[0m",
            "[HP=1/MA=2]:   The   Rose   Inn  ",
            "Exits: n, s and e.",
            "You hear a scream\x07 in the distance.",
        ];
        for input in inputs {
            let once = clean_line(input).unwrap();
            assert_eq!(clean_line(&once).as_deref(), Some(once.as_str()), "input: {input:?}");
        }
    }

    #[test]
    fn test_clean_lines_drops_empty() {
        let out = clean_lines(["", "Town Square", "\x1b[0m", "Exits: north."]);
        assert_eq!(out, vec!["Town Square".to_string(), "Exits: north.".to_string()]);
    }
}
