//! mudpilot 无头入口
//!
//! stdin 每行是服务器输出（交给追踪器），以 `/` 开头的行是控制命令；
//! 移动命令写到 stdout，日志写到 stderr。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use mudpilot::config::{load_config, AppConfig};
use mudpilot::core::{
    run_with_graceful_shutdown, ExecutorCleanup, NavTarget, NavigationOrchestrator, PauseReason,
    PlayerSignals, SharedPlayerSignals, ShutdownCoordinator, ShutdownManager, ShutdownReason, TaskCleanup,
    TransportError,
};
use mudpilot::executor::{CommandQueue, CommandTransport, MovementExecutor, PacingStrategy, RoomChangeSignal};
use mudpilot::map::{MapStore, NodeId};
use mudpilot::observability;
use mudpilot::planner::PathService;
use mudpilot::resolver::RoomResolver;
use mudpilot::tracker::{SessionId, TrackerHandle, TrackerService, WorldTracker};

/// 把命令写到 stdout，并告诉追踪器本地发出了什么
struct StdoutTransport {
    out: Mutex<tokio::io::Stdout>,
    tracker: TrackerHandle,
}

#[async_trait]
impl CommandTransport for StdoutTransport {
    async fn send_command(&self, command: &str) -> Result<(), TransportError> {
        let mut out = self.out.lock().await;
        out.write_all(format!("{}\n", command).as_bytes())
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if !self.tracker.note_command(command) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

struct Console {
    orchestrator: Arc<NavigationOrchestrator>,
    tracker: TrackerHandle,
    signals: Arc<SharedPlayerSignals>,
    executor: MovementExecutor,
    shutdown: Arc<ShutdownManager>,
}

impl Console {
    fn handle(&self, line: &str) -> Option<String> {
        let mut parts = line.trim_start_matches('/').splitn(2, ' ');
        let cmd = parts.next().unwrap_or("").to_ascii_lowercase();
        let arg = parts.next().unwrap_or("").trim();

        let reply = match cmd.as_str() {
            "go" => {
                let target = match arg.parse::<u32>() {
                    Ok(id) => NavTarget::Id(NodeId(id)),
                    Err(_) => NavTarget::Name(arg.to_string()),
                };
                match self.orchestrator.start(target, None) {
                    Ok(status) => format!(
                        "navigating to {} in {} steps: {}",
                        status.target.map(|t| t.to_string()).unwrap_or_default(),
                        status.total_steps,
                        status.directions().join(" ")
                    ),
                    Err(e) => e.to_string(),
                }
            }
            "stop" => result_text(self.orchestrator.stop(), "stopped"),
            "pause" => result_text(self.orchestrator.pause(PauseReason::User), "paused"),
            "resume" => result_text(self.orchestrator.resume(), "resumed"),
            "status" => serde_json::to_string(&self.orchestrator.status())
                .unwrap_or_else(|e| format!("status unavailable: {}", e)),
            "where" => match self.tracker.current() {
                Some(room) => format!("{} [{}]", room.name, room.exits.iter().map(|d| d.short()).collect::<Vec<_>>().join(",")),
                None => "no room observed yet".to_string(),
            },
            "find" => {
                let rooms = self.orchestrator.find_by_name(arg);
                if rooms.is_empty() {
                    format!("no rooms match '{}'", arg)
                } else {
                    rooms
                        .iter()
                        .take(20)
                        .map(|n| {
                            let distance = self
                                .orchestrator
                                .distance_to(n.id)
                                .map(|d| format!(" ({} steps)", d))
                                .unwrap_or_default();
                            format!("{} {}{}", n.id, n.label, distance)
                        })
                        .collect::<Vec<_>>()
                        .join("; ")
                }
            }
            "stores" => {
                let radius = arg.parse().unwrap_or(10);
                let stores = self.orchestrator.nearby_stores(radius);
                if stores.is_empty() {
                    "no stores nearby".to_string()
                } else {
                    stores
                        .iter()
                        .map(|(n, d)| format!("{} {} ({} steps)", n.id, n.label, d))
                        .collect::<Vec<_>>()
                        .join("; ")
                }
            }
            "hp" => {
                let nums: Vec<u32> = arg.split_whitespace().filter_map(|s| s.parse().ok()).collect();
                match nums[..] {
                    [current, max] => {
                        self.signals.set_health(current, max);
                        format!("health {:.1}%", self.signals.health_percent())
                    }
                    _ => "usage: /hp <current> <max>".to_string(),
                }
            }
            "combat" => {
                let targets: Vec<String> = arg
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                let fighting = !targets.is_empty();
                self.signals.set_combat_targets(targets);
                if fighting {
                    self.orchestrator.on_combat_started();
                    "combat started".to_string()
                } else {
                    self.orchestrator.on_combat_ended();
                    "combat ended".to_string()
                }
            }
            "strategy" => match arg.parse::<PacingStrategy>() {
                Ok(strategy) => {
                    self.executor.set_strategy(strategy);
                    format!("pacing: {:?}", strategy)
                }
                Err(e) => e,
            },
            "quit" => {
                self.shutdown.shutdown(ShutdownReason::UserInitiated);
                return None;
            }
            _ => "commands: /go /stop /pause /resume /status /where /find /stores /hp /combat /strategy /quit"
                .to_string(),
        };
        Some(reply)
    }

    async fn run(self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.starts_with('/') => {
                    if let Some(reply) = self.handle(&line) {
                        eprintln!("# {}", reply);
                    }
                }
                Ok(Some(line)) => {
                    if !self.tracker.push_line(line) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("stdin read failed: {}", e);
                    break;
                }
            }
        }
        self.shutdown.shutdown(ShutdownReason::InputClosed);
    }
}

fn result_text<E: std::fmt::Display>(result: Result<(), E>, ok: &str) -> String {
    match result {
        Ok(()) => ok.to_string(),
        Err(e) => e.to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let shutdown = Arc::new(ShutdownManager::new());
    let token = shutdown.token();

    let map = Arc::new(MapStore::unloaded());
    if let Err(e) = map
        .load_from_path(&cfg.map.path)
        .with_context(|| format!("loading map {}", cfg.map.path.display()))
    {
        // 地图不可用时继续运行：追踪照常，导航相关操作返回 Map not loaded
        tracing::error!("{:#}", e);
    }

    let session = SessionId::new();
    tracing::info!(
        app = %cfg.app.name,
        session = %session,
        label = cfg.app.session_label.as_deref().unwrap_or("-"),
        "starting"
    );

    let tracker = WorldTracker::new(cfg.tracker_settings())
        .with_map(Arc::clone(&map))
        .with_session(session);
    let (tracker_handle, tracker_task) = TrackerService::spawn(tracker, token.clone());

    let transport = Arc::new(StdoutTransport {
        out: Mutex::new(tokio::io::stdout()),
        tracker: tracker_handle.clone(),
    });
    let executor = MovementExecutor::new(
        transport,
        CommandQueue::new(),
        RoomChangeSignal::new(),
        cfg.pacing_settings(),
    )
    .with_strategy(cfg.pacing_strategy());

    let resolver = Arc::new(RoomResolver::new(Arc::clone(&map), cfg.resolver_settings()));
    let planner = Arc::new(PathService::new(Arc::clone(&map), cfg.planner_settings()));
    let signals = Arc::new(SharedPlayerSignals::new());

    let orchestrator = Arc::new(
        NavigationOrchestrator::new(
            map,
            resolver,
            planner,
            executor.clone(),
            signals.clone(),
            cfg.navigation_settings(),
        )
        .with_token(token.clone()),
    );
    let mut tasks = orchestrator.spawn_listeners(&tracker_handle);
    tasks.push(tracker_task);

    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown));
    coordinator.register(ExecutorCleanup::new(executor.clone()));
    coordinator.register(TaskCleanup::new("background tasks", tasks));

    let console = Console {
        orchestrator,
        tracker: tracker_handle,
        signals,
        executor,
        shutdown: Arc::clone(&shutdown),
    };

    run_with_graceful_shutdown(shutdown, console.run(), || async move {
        coordinator.run_cleanup().await;
    })
    .await;

    Ok(())
}
