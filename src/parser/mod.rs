//! 行清洗与房间提取
//!
//! 纯函数层：输入是终端层交出的已解码文本行（可附带颜色片段），输出是候选房间快照。

pub mod clean;
pub mod color;
pub mod direction;
pub mod extract;

pub use clean::{clean_line, clean_lines};
pub use color::{ColorRun, ColoredLine, Palette, TermColor};
pub use direction::{exit_signature, normalize_exits, parse_exits, Direction};
pub use extract::{
    classify, exits_body, extract, is_entity_line, is_error_line, is_exits_line, is_item_line,
    is_noise_line, look_echo, movement_echo, LineKind,
};
