//! 彩色行快照：终端层把每行拆成若干同色片段交给提取器
//!
//! 房间名的判定只看颜色（指定的 info 色 + 至少一段加粗），避免叙述文字被误认为房间名。

use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermColor {
    Default,
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl TermColor {
    /// ANSI SGR 前景色码（30-37，39 为默认）
    pub fn from_sgr(code: u8) -> TermColor {
        match code {
            30 => TermColor::Black,
            31 => TermColor::Red,
            32 => TermColor::Green,
            33 => TermColor::Yellow,
            34 => TermColor::Blue,
            35 => TermColor::Magenta,
            36 => TermColor::Cyan,
            37 => TermColor::White,
            _ => TermColor::Default,
        }
    }
}

impl FromStr for TermColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(TermColor::Default),
            "black" => Ok(TermColor::Black),
            "red" => Ok(TermColor::Red),
            "green" => Ok(TermColor::Green),
            "yellow" => Ok(TermColor::Yellow),
            "blue" => Ok(TermColor::Blue),
            "magenta" => Ok(TermColor::Magenta),
            "cyan" => Ok(TermColor::Cyan),
            "white" => Ok(TermColor::White),
            other => Err(format!("unknown terminal color: {other}")),
        }
    }
}

/// 同色同属性的一段文字
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRun {
    pub text: String,
    pub color: TermColor,
    pub bold: bool,
}

impl ColorRun {
    pub fn new(text: impl Into<String>, color: TermColor, bold: bool) -> Self {
        Self {
            text: text.into(),
            color,
            bold,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoredLine {
    pub runs: Vec<ColorRun>,
}

impl ColoredLine {
    pub fn new(runs: Vec<ColorRun>) -> Self {
        Self { runs }
    }

    /// 单色便捷构造（测试与简单终端层使用）
    pub fn single(text: impl Into<String>, color: TermColor, bold: bool) -> Self {
        Self {
            runs: vec![ColorRun::new(text, color, bold)],
        }
    }

    pub fn plain_text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    /// 只统计含可见字符的片段
    fn visible_runs(&self) -> impl Iterator<Item = &ColorRun> {
        self.runs.iter().filter(|r| r.text.chars().any(|c| !c.is_whitespace()))
    }

    /// 按可见字符数加权的主色
    pub fn dominant_color(&self) -> Option<TermColor> {
        let mut tally: Vec<(TermColor, usize)> = Vec::new();
        for run in self.visible_runs() {
            let weight = run.text.chars().filter(|c| !c.is_whitespace()).count();
            match tally.iter_mut().find(|(c, _)| *c == run.color) {
                Some((_, w)) => *w += weight,
                None => tally.push((run.color, weight)),
            }
        }
        // 并列时取先出现的颜色
        let mut best: Option<(TermColor, usize)> = None;
        for (color, weight) in tally {
            if best.map(|(_, w)| weight > w).unwrap_or(true) {
                best = Some((color, weight));
            }
        }
        best.map(|(c, _)| c)
    }

    /// 每个可见片段都是指定颜色
    pub fn is_uniform(&self, color: TermColor) -> bool {
        let mut any = false;
        for run in self.visible_runs() {
            if run.color != color {
                return false;
            }
            any = true;
        }
        any
    }

    pub fn has_bold(&self) -> bool {
        self.visible_runs().any(|r| r.bold)
    }

    /// 终端层没有给出任何颜色信息（全部为默认色）
    pub fn is_colorless(&self) -> bool {
        self.visible_runs().all(|r| r.color == TermColor::Default && !r.bold)
    }
}

/// 提取器使用的指定颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    /// 房间名 / 地面物品
    pub info: TermColor,
    /// 怪物
    pub hostile: TermColor,
    /// 其他玩家
    pub player: TermColor,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            info: TermColor::Cyan,
            hostile: TermColor::Red,
            player: TermColor::Magenta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dominant_color_by_weight() {
        let line = ColoredLine::new(vec![
            ColorRun::new("A ", TermColor::Default, false),
            ColorRun::new("giant sewer rat", TermColor::Red, false),
            ColorRun::new(" is here.", TermColor::Default, false),
        ]);
        assert_eq!(line.dominant_color(), Some(TermColor::Red));
        assert_eq!(line.plain_text(), "A giant sewer rat is here.");
    }

    #[test]
    fn test_uniform_ignores_whitespace_runs() {
        let line = ColoredLine::new(vec![
            ColorRun::new("Town ", TermColor::Cyan, true),
            ColorRun::new("   ", TermColor::Default, false),
            ColorRun::new("Square", TermColor::Cyan, false),
        ]);
        assert!(line.is_uniform(TermColor::Cyan));
        assert!(line.has_bold());
        assert!(!line.is_colorless());
    }

    #[test]
    fn test_color_from_str() {
        assert_eq!("Cyan".parse::<TermColor>(), Ok(TermColor::Cyan));
        assert!("mauve".parse::<TermColor>().is_err());
        assert_eq!(TermColor::from_sgr(31), TermColor::Red);
    }
}
