//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MUDPILOT__*` 覆盖
//! （双下划线表示嵌套，如 `MUDPILOT__EXECUTOR__STRATEGY=fast`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::NavigationSettings;
use crate::executor::{PacingSettings, PacingStrategy};
use crate::parser::{Palette, TermColor};
use crate::planner::{PlannerSettings, StepTiming};
use crate::resolver::ResolverSettings;
use crate::tracker::TrackerSettings;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub map: MapSection,
    pub tracker: TrackerSection,
    pub resolver: ResolverSection,
    pub planner: PlannerSection,
    pub executor: ExecutorSection,
    pub navigation: NavigationSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 会话标签，只用于日志
    pub session_label: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            session_label: None,
        }
    }
}

fn default_app_name() -> String {
    "mudpilot".to_string()
}

/// [map] 段：地图数据文件
#[derive(Debug, Clone, Deserialize)]
pub struct MapSection {
    #[serde(default = "default_map_path")]
    pub path: PathBuf,
}

impl Default for MapSection {
    fn default() -> Self {
        Self {
            path: default_map_path(),
        }
    }
}

fn default_map_path() -> PathBuf {
    PathBuf::from("data/map.json")
}

/// [tracker] 段
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSection {
    /// 行缓冲上限，超出后丢弃最旧的行
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub palette: PaletteSection,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            palette: PaletteSection::default(),
        }
    }
}

fn default_buffer_size() -> usize {
    256
}

/// [tracker.palette] 段：房间名、怪物、玩家的显示颜色
#[derive(Debug, Clone, Deserialize)]
pub struct PaletteSection {
    #[serde(default = "default_info_color")]
    pub info: TermColor,
    #[serde(default = "default_hostile_color")]
    pub hostile: TermColor,
    #[serde(default = "default_player_color")]
    pub player: TermColor,
}

impl Default for PaletteSection {
    fn default() -> Self {
        Self {
            info: default_info_color(),
            hostile: default_hostile_color(),
            player: default_player_color(),
        }
    }
}

fn default_info_color() -> TermColor {
    TermColor::Cyan
}

fn default_hostile_color() -> TermColor {
    TermColor::Red
}

fn default_player_color() -> TermColor {
    TermColor::Magenta
}

/// [resolver] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverSection {
    #[serde(default = "default_resolver_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_resolver_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            cache_capacity: default_resolver_capacity(),
            cache_ttl_secs: default_resolver_ttl(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_resolver_capacity() -> usize {
    512
}

fn default_resolver_ttl() -> u64 {
    300
}

fn default_min_confidence() -> f64 {
    0.5
}

/// [planner] 段：缓存、路径长度上限、每步耗时估计
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSection {
    #[serde(default = "default_planner_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_planner_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,
    #[serde(default = "default_base_step_delay")]
    pub base_step_delay_ms: u64,
    #[serde(default = "default_door_delay")]
    pub door_delay_ms: u64,
    #[serde(default = "default_hidden_delay")]
    pub hidden_delay_ms: u64,
    /// 危险房间的附加代价，单位为 0.1 步
    #[serde(default = "default_danger_penalty")]
    pub danger_penalty: u32,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            cache_capacity: default_planner_capacity(),
            cache_ttl_secs: default_planner_ttl(),
            max_path_length: default_max_path_length(),
            base_step_delay_ms: default_base_step_delay(),
            door_delay_ms: default_door_delay(),
            hidden_delay_ms: default_hidden_delay(),
            danger_penalty: default_danger_penalty(),
        }
    }
}

fn default_planner_capacity() -> usize {
    256
}

fn default_planner_ttl() -> u64 {
    30 * 60
}

fn default_max_path_length() -> usize {
    500
}

fn default_base_step_delay() -> u64 {
    1200
}

fn default_door_delay() -> u64 {
    800
}

fn default_hidden_delay() -> u64 {
    1500
}

fn default_danger_penalty() -> u32 {
    25
}

/// [executor] 段：节奏策略与各项等待时长
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    /// triggered / fast / ultra_fast / timed
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_trigger_timeout")]
    pub trigger_timeout_ms: u64,
    #[serde(default = "default_fast_window")]
    pub fast_recent_window_ms: u64,
    #[serde(default = "default_fast_delay")]
    pub fast_delay_ms: u64,
    #[serde(default = "default_ultra_delay")]
    pub ultra_delay_ms: u64,
    #[serde(default = "default_ultra_door_extra")]
    pub ultra_door_extra_ms: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            trigger_timeout_ms: default_trigger_timeout(),
            fast_recent_window_ms: default_fast_window(),
            fast_delay_ms: default_fast_delay(),
            ultra_delay_ms: default_ultra_delay(),
            ultra_door_extra_ms: default_ultra_door_extra(),
        }
    }
}

fn default_strategy() -> String {
    "triggered".to_string()
}

fn default_trigger_timeout() -> u64 {
    5000
}

fn default_fast_window() -> u64 {
    750
}

fn default_fast_delay() -> u64 {
    400
}

fn default_ultra_delay() -> u64 {
    150
}

fn default_ultra_door_extra() -> u64 {
    650
}

/// [navigation] 段：安全门槛与自动恢复
#[derive(Debug, Clone, Deserialize)]
pub struct NavigationSection {
    #[serde(default = "default_min_health")]
    pub min_health_percent: f64,
    #[serde(default = "default_min_start_confidence")]
    pub min_start_confidence: f64,
    /// 逐房间检查允许的刷怪数上限（和平房间不限）
    #[serde(default = "default_max_room_spawns")]
    pub max_room_spawns: u32,
    #[serde(default = "default_safety_poll")]
    pub safety_poll_secs: u64,
    #[serde(default = "default_combat_resume_delay")]
    pub combat_resume_delay_ms: u64,
    #[serde(default = "default_true")]
    pub auto_resume_after_combat: bool,
    #[serde(default = "default_player_level")]
    pub player_level: u32,
}

impl Default for NavigationSection {
    fn default() -> Self {
        Self {
            min_health_percent: default_min_health(),
            min_start_confidence: default_min_start_confidence(),
            max_room_spawns: default_max_room_spawns(),
            safety_poll_secs: default_safety_poll(),
            combat_resume_delay_ms: default_combat_resume_delay(),
            auto_resume_after_combat: true,
            player_level: default_player_level(),
        }
    }
}

fn default_min_health() -> f64 {
    25.0
}

fn default_min_start_confidence() -> f64 {
    0.7
}

fn default_max_room_spawns() -> u32 {
    3
}

fn default_safety_poll() -> u64 {
    2
}

fn default_combat_resume_delay() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_player_level() -> u32 {
    1
}

impl AppConfig {
    pub fn tracker_settings(&self) -> TrackerSettings {
        let p = &self.tracker.palette;
        TrackerSettings {
            buffer_size: self.tracker.buffer_size.max(1),
            palette: Palette {
                info: p.info,
                hostile: p.hostile,
                player: p.player,
            },
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            cache_capacity: self.resolver.cache_capacity,
            cache_ttl: Duration::from_secs(self.resolver.cache_ttl_secs),
            min_confidence: self.resolver.min_confidence,
        }
    }

    pub fn planner_settings(&self) -> PlannerSettings {
        let p = &self.planner;
        PlannerSettings {
            cache_capacity: p.cache_capacity,
            cache_ttl: Duration::from_secs(p.cache_ttl_secs),
            timing: StepTiming {
                base: Duration::from_millis(p.base_step_delay_ms),
                door: Duration::from_millis(p.door_delay_ms),
                hidden: Duration::from_millis(p.hidden_delay_ms),
            },
            max_path_length: p.max_path_length,
            danger_penalty: p.danger_penalty,
        }
    }

    /// 未知策略名回落到 triggered
    pub fn pacing_strategy(&self) -> PacingStrategy {
        self.executor.strategy.parse().unwrap_or_else(|e| {
            tracing::warn!("{}, falling back to triggered", e);
            PacingStrategy::Triggered
        })
    }

    pub fn pacing_settings(&self) -> PacingSettings {
        let e = &self.executor;
        PacingSettings {
            trigger_timeout: Duration::from_millis(e.trigger_timeout_ms),
            fast_recent_window: Duration::from_millis(e.fast_recent_window_ms),
            fast_delay: Duration::from_millis(e.fast_delay_ms),
            ultra_delay: Duration::from_millis(e.ultra_delay_ms),
            ultra_door_extra: Duration::from_millis(e.ultra_door_extra_ms),
            ..PacingSettings::default()
        }
    }

    pub fn navigation_settings(&self) -> NavigationSettings {
        let n = &self.navigation;
        NavigationSettings {
            min_health_percent: n.min_health_percent,
            min_start_confidence: n.min_start_confidence,
            max_room_spawns: n.max_room_spawns,
            safety_poll: Duration::from_secs(n.safety_poll_secs.max(1)),
            combat_resume_delay: Duration::from_millis(n.combat_resume_delay_ms),
            auto_resume_after_combat: n.auto_resume_after_combat,
            player_level: n.player_level,
        }
    }
}

/// 加载配置
///
/// 1. 依次查找 config/default.toml、../config/default.toml、default.toml，找到的第一个作为基础
/// 2. 传入的 config_path 存在时叠加（覆盖前面的键）
/// 3. 最后叠加环境变量 MUDPILOT__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MUDPILOT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 重新读取磁盘与环境变量（调用方决定是否用新配置重建组件）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.tracker.buffer_size, 256);
        assert_eq!(cfg.navigation.min_start_confidence, 0.7);
        assert_eq!(cfg.pacing_strategy(), PacingStrategy::Triggered);
        assert_eq!(cfg.planner_settings().cache_ttl, Duration::from_secs(1800));
        assert_eq!(cfg.navigation_settings().safety_poll, Duration::from_secs(2));
    }

    #[test]
    fn test_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[executor]
strategy = "ultra_fast"

[navigation]
min_health_percent = 40.0

[tracker.palette]
info = "yellow"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.pacing_strategy(), PacingStrategy::UltraFast);
        assert_eq!(cfg.navigation.min_health_percent, 40.0);
        assert_eq!(cfg.tracker_settings().palette.info, TermColor::Yellow);
        // 未写的键保持默认
        assert_eq!(cfg.tracker.palette.hostile, TermColor::Red);
        assert_eq!(cfg.resolver.cache_capacity, 512);
    }
}
