//! 导航编排器：用户可见的状态机
//!
//! Idle → Navigating → {Paused, Completed, Idle}。驱动来源：
//! - 显式调用（start / stop / pause / resume）；
//! - 追踪器的房间更新（推进步骤、到达终点、偏航告警，从不自动重新规划）；
//! - 执行器事件（外部打断时降级为 Paused）；
//! - 战斗开始/结束，以及独立的周期安全轮询。
//!
//! 状态锁只包住字段读写，从不跨 await 持有。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::error::NavError;
use crate::core::safety::{PlayerSignals, SafetyPolicy};
use crate::core::state::{NavPhase, NavStatus, NavTarget, PauseReason};
use crate::executor::{ExecutorEvent, ExecutorState, MovementCommand, MovementExecutor, StopOrigin};
use crate::map::{MapNode, MapStore, NodeId};
use crate::planner::{Path, PathConstraints, PathService};
use crate::resolver::{MatchContext, MatchResult, RoomResolver};
use crate::tracker::{RoomSnapshot, TrackerHandle, TrackerUpdate, UpdateKind};

#[derive(Debug, Clone)]
pub struct NavigationSettings {
    pub min_health_percent: f64,
    /// 开始导航所需的最低位置置信度
    pub min_start_confidence: f64,
    pub max_room_spawns: u32,
    pub safety_poll: Duration,
    pub combat_resume_delay: Duration,
    pub auto_resume_after_combat: bool,
    pub player_level: u32,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            min_health_percent: 25.0,
            min_start_confidence: 0.7,
            max_room_spawns: 3,
            safety_poll: Duration::from_secs(2),
            combat_resume_delay: Duration::from_millis(2000),
            auto_resume_after_combat: true,
            player_level: 1,
        }
    }
}

#[derive(Debug)]
struct NavState {
    phase: NavPhase,
    pause_reason: Option<PauseReason>,
    target: Option<NodeId>,
    path: Option<Arc<Path>>,
    step_index: usize,
    /// 已发出命令的步数（可能领先于 step_index）
    sent_through: usize,
    position: Option<MatchResult>,
    room: Option<Arc<RoomSnapshot>>,
    last_alert: Option<String>,
}

impl NavState {
    fn new() -> Self {
        Self {
            phase: NavPhase::Idle,
            pause_reason: None,
            target: None,
            path: None,
            step_index: 0,
            sent_through: 0,
            position: None,
            room: None,
            last_alert: None,
        }
    }

    fn active(&self) -> bool {
        matches!(self.phase, NavPhase::Navigating | NavPhase::Paused)
    }

    fn current_step(&self) -> Option<&crate::planner::PathStep> {
        if !self.active() {
            return None;
        }
        self.path.as_ref()?.steps.get(self.step_index)
    }

    fn clear_route(&mut self) {
        self.pause_reason = None;
        self.target = None;
        self.path = None;
        self.step_index = 0;
        self.sent_through = 0;
    }

    /// 记录执行器已发出的步骤命令
    fn note_sent(&mut self, command: &MovementCommand) {
        if !self.active() {
            return;
        }
        let (Some(path), Some(expected)) = (&self.path, command.expected_room) else {
            return;
        };
        let from = self.sent_through.max(self.step_index);
        let sent = path
            .steps
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, step)| step.to == expected && Some(step.direction) == command.direction);
        if let Some((i, _)) = sent {
            self.sent_through = i + 1;
        }
    }

    /// 尚未发出的第一步
    fn unsent_from(&self) -> usize {
        self.sent_through.max(self.step_index)
    }
}

pub struct NavigationOrchestrator {
    map: Arc<MapStore>,
    resolver: Arc<RoomResolver>,
    planner: Arc<PathService>,
    executor: MovementExecutor,
    signals: Arc<dyn PlayerSignals>,
    policy: SafetyPolicy,
    settings: NavigationSettings,
    state: Mutex<NavState>,
    status_tx: watch::Sender<NavStatus>,
    token: CancellationToken,
}

impl NavigationOrchestrator {
    pub fn new(
        map: Arc<MapStore>,
        resolver: Arc<RoomResolver>,
        planner: Arc<PathService>,
        executor: MovementExecutor,
        signals: Arc<dyn PlayerSignals>,
        settings: NavigationSettings,
    ) -> Self {
        let (status_tx, _) = watch::channel(NavStatus::idle());
        Self {
            policy: SafetyPolicy::new(settings.min_health_percent, settings.max_room_spawns),
            map,
            resolver,
            planner,
            executor,
            signals,
            settings,
            state: Mutex::new(NavState::new()),
            status_tx,
            token: CancellationToken::new(),
        }
    }

    /// 关闭时取消后台任务（监听、轮询、战斗后自动恢复）
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    fn lock(&self) -> MutexGuard<'_, NavState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn settings(&self) -> &NavigationSettings {
        &self.settings
    }

    pub fn executor(&self) -> &MovementExecutor {
        &self.executor
    }

    pub fn position(&self) -> Option<MatchResult> {
        self.lock().position.clone()
    }

    pub fn status(&self) -> NavStatus {
        self.project(&self.lock())
    }

    /// 订阅状态投影（每次状态变化后更新）
    pub fn watch_status(&self) -> watch::Receiver<NavStatus> {
        self.status_tx.subscribe()
    }

    fn project(&self, state: &NavState) -> NavStatus {
        let eta = match (&state.path, state.active()) {
            (Some(path), true) => Some(path.remaining_duration(state.step_index)),
            _ => None,
        };
        NavStatus {
            phase: state.phase,
            confidence: state.position.as_ref().map(|p| p.confidence).unwrap_or(0.0),
            current_room: state.position.as_ref().map(|p| p.node_id()),
            current_room_name: state
                .position
                .as_ref()
                .map(|p| p.node.label.clone())
                .or_else(|| state.room.as_ref().map(|r| r.name.clone())),
            target: state.target,
            path: state.path.clone(),
            step_index: state.step_index,
            total_steps: state.path.as_ref().map(|p| p.len()).unwrap_or(0),
            eta,
            queue_depth: self.executor.queue().len(),
            pause_reason: state.pause_reason,
            last_alert: state.last_alert.clone(),
        }
    }

    fn publish(&self, state: &NavState) {
        self.status_tx.send_replace(self.project(state));
    }

    fn halt_executor(&self) {
        self.executor.stop_from(StopOrigin::Navigator);
    }

    fn pause_executor(&self, reason: PauseReason) {
        self.executor.pause_from(reason.as_str(), StopOrigin::Navigator);
    }

    /// 解析导航目标：精确名字唯一优先，其次子串唯一
    fn resolve_target(&self, target: &NavTarget) -> Result<Arc<MapNode>, NavError> {
        match target {
            NavTarget::Id(id) => self
                .map
                .get_node(*id)
                .ok_or_else(|| NavError::TargetNotFound(id.to_string())),
            NavTarget::Name(name) => {
                let exact = self.map.find_rooms(|n| n.name_equals(name));
                let matches = if exact.is_empty() {
                    self.map.search_by_name(name)
                } else {
                    exact
                };
                match matches.len() {
                    0 => Err(NavError::TargetNotFound(name.clone())),
                    1 => Ok(Arc::clone(&matches[0])),
                    n => Err(NavError::AmbiguousTarget(n)),
                }
            }
        }
    }

    fn default_constraints(&self) -> PathConstraints {
        let planner = self.planner.settings();
        PathConstraints::safe_for_level(self.settings.player_level)
            .with_max_path_length(planner.max_path_length)
            .with_danger_penalty(planner.danger_penalty)
    }

    /// 开始导航
    ///
    /// 预检依次为：地图已加载、没有进行中的导航、当前位置已解析且置信度达标、
    /// 血量与战斗检查、目标存在、路径存在、路线上每个房间通过危险检查。
    /// 任一失败都直接返回原因，不改动任何状态。
    pub fn start(
        &self,
        target: NavTarget,
        constraints: Option<PathConstraints>,
    ) -> Result<NavStatus, NavError> {
        if !self.map.is_loaded() {
            return Err(NavError::MapNotLoaded);
        }
        let graph = self.map.graph().ok_or(NavError::MapNotLoaded)?;

        let position = {
            let state = self.lock();
            if state.active() {
                return Err(NavError::AlreadyNavigating);
            }
            state.position.clone().ok_or(NavError::PositionUnknown)?
        };
        if position.confidence < self.settings.min_start_confidence {
            return Err(NavError::LowConfidence {
                confidence: position.confidence,
                minimum: self.settings.min_start_confidence,
            });
        }

        self.policy.check_player(self.signals.as_ref())?;

        let target = self.resolve_target(&target)?;
        let constraints = constraints.unwrap_or_else(|| self.default_constraints());
        let path = self
            .planner
            .constrained_path(position.node_id(), target.id, &constraints)?;

        if self.signals.flags().avoid_dangerous_rooms {
            self.policy.check_route(&graph, &path)?;
        }

        // 预检通过，开始改状态
        if self.executor.state() != ExecutorState::Idle || !self.executor.queue().is_empty() {
            self.halt_executor();
        }

        if !path.is_empty() {
            self.executor
                .queue()
                .extend(path.steps.iter().map(MovementCommand::from_step));
            if !self.executor.start() {
                self.executor.queue().clear();
                return Err(NavError::ExecutorBusy(
                    "command queue is owned by another executor".to_string(),
                ));
            }
        }

        let mut state = self.lock();
        state.target = Some(target.id);
        state.path = Some(Arc::clone(&path));
        state.step_index = 0;
        state.sent_through = 0;
        state.pause_reason = None;
        state.last_alert = None;
        state.phase = if path.is_empty() {
            NavPhase::Completed
        } else {
            NavPhase::Navigating
        };
        tracing::info!(
            from = %position.node_id(),
            to = %target.id,
            steps = path.len(),
            cost = path.total_cost,
            "navigation started"
        );
        self.publish(&state);
        Ok(self.project(&state))
    }

    pub fn stop(&self) -> Result<(), NavError> {
        let mut state = self.lock();
        if !state.active() {
            return Err(NavError::NotNavigating);
        }
        state.phase = NavPhase::Idle;
        state.clear_route();
        self.halt_executor();
        tracing::info!("navigation stopped");
        self.publish(&state);
        Ok(())
    }

    pub fn pause(&self, reason: PauseReason) -> Result<(), NavError> {
        let mut state = self.lock();
        if state.phase != NavPhase::Navigating {
            return Err(NavError::NotNavigating);
        }
        state.phase = NavPhase::Paused;
        state.pause_reason = Some(reason);
        self.pause_executor(reason);
        tracing::info!(reason = reason.as_str(), step = state.step_index, "navigation paused");
        self.publish(&state);
        Ok(())
    }

    /// 恢复前重新做玩家安全检查；队列已空时把还没发出的步骤重新入队
    pub fn resume(&self) -> Result<(), NavError> {
        {
            let state = self.lock();
            if state.phase != NavPhase::Paused {
                return Err(NavError::NotPaused);
            }
        }
        self.policy.check_player(self.signals.as_ref())?;

        let mut state = self.lock();
        if state.phase != NavPhase::Paused {
            return Err(NavError::NotPaused);
        }
        if self.executor.queue().is_empty() {
            if let Some(path) = &state.path {
                self.executor.queue().extend(
                    path.steps
                        .iter()
                        .skip(state.unsent_from())
                        .map(MovementCommand::from_step),
                );
            }
        }
        if !self.executor.resume() && self.executor.state() != ExecutorState::Executing {
            tracing::debug!("executor had nothing to resume");
        }
        state.phase = NavPhase::Navigating;
        state.pause_reason = None;
        tracing::info!(step = state.step_index, "navigation resumed");
        self.publish(&state);
        Ok(())
    }

    /// 处理追踪器的房间更新：解析位置并推进导航步骤
    pub fn on_room_update(&self, update: &TrackerUpdate) -> Option<MatchResult> {
        match update.kind {
            UpdateKind::Probed { .. } | UpdateKind::DynamicEvent => return None,
            UpdateKind::Refreshed => {
                // 同房间刷新：位置不变，只更新快照
                let mut state = self.lock();
                if state.position.is_some() {
                    state.room = Some(Arc::clone(&update.snapshot));
                    return None;
                }
            }
            UpdateKind::Entered => {}
        }

        let ctx = {
            let state = self.lock();
            let step = state.current_step();
            MatchContext {
                previous_room: state.position.as_ref().map(|p| p.node_id()),
                last_direction: update.direction.or_else(|| step.map(|s| s.direction)),
                expected_room: step.map(|s| s.to),
            }
        };

        let resolved = self.resolver.resolve_and_stamp(&update.snapshot, &ctx);

        let mut state = self.lock();
        let result = match resolved {
            Some((result, stamped)) => {
                state.room = Some(Arc::new(stamped));
                state.position = Some(result.clone());
                self.advance(&mut state, &result);
                Some(result)
            }
            None => {
                state.room = Some(Arc::clone(&update.snapshot));
                state.position = None;
                if state.active() {
                    let alert = format!("Position lost in unmapped room '{}'", update.snapshot.name);
                    tracing::warn!(room = %update.snapshot.name, "position lost during navigation");
                    state.last_alert = Some(alert);
                }
                None
            }
        };
        self.publish(&state);
        drop(state);

        // 执行器的「房间已变化」信号
        self.executor.signal().notify();
        result
    }

    fn advance(&self, state: &mut NavState, result: &MatchResult) {
        let Some(step) = state.current_step().cloned() else {
            return;
        };
        let at = result.node_id();
        if at == step.to {
            state.step_index += 1;
            let total = state.path.as_ref().map(|p| p.len()).unwrap_or(0);
            tracing::debug!(step = state.step_index, total, room = %at, "navigation step confirmed");
            if state.step_index >= total {
                state.phase = NavPhase::Completed;
                state.pause_reason = None;
                tracing::info!(room = %at, "navigation completed");
            }
        } else if at != step.from {
            let alert = format!(
                "Off course: expected {} but arrived at {} ({})",
                step.to, at, result.node.label
            );
            tracing::warn!(expected = %step.to, actual = %at, "navigation off course");
            state.last_alert = Some(alert);
        }
    }

    pub fn on_combat_started(&self) {
        if !self.signals.flags().pause_in_combat {
            return;
        }
        if self.pause(PauseReason::Combat).is_ok() {
            let targets = self.signals.combat_targets();
            tracing::info!(targets = ?targets, "paused for combat");
        }
    }

    /// 战斗结束：延迟后若仍安全则自动恢复
    pub fn on_combat_ended(self: &Arc<Self>) {
        if !self.settings.auto_resume_after_combat {
            return;
        }
        let this = Arc::clone(self);
        let token = self.token.clone();
        let delay = self.settings.combat_resume_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            this.try_auto_resume(&[PauseReason::Combat]);
        });
    }

    fn try_auto_resume(&self, reasons: &[PauseReason]) -> bool {
        let paused_for = {
            let state = self.lock();
            match (state.phase, state.pause_reason) {
                (NavPhase::Paused, Some(reason)) if reasons.contains(&reason) => reason,
                _ => return false,
            }
        };
        match self.resume() {
            Ok(()) => {
                tracing::info!(reason = paused_for.as_str(), "navigation auto-resumed");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "auto-resume declined");
                false
            }
        }
    }

    /// 执行器事件：外部打断降级为 Paused，自己发起的暂停/停止忽略
    pub fn on_executor_event(&self, event: &ExecutorEvent) {
        match event {
            ExecutorEvent::Paused {
                origin: StopOrigin::Navigator,
                ..
            }
            | ExecutorEvent::Stopped {
                origin: StopOrigin::Navigator,
            } => {}
            ExecutorEvent::Paused { .. } | ExecutorEvent::Stopped { .. } => {
                let mut state = self.lock();
                if state.phase == NavPhase::Navigating {
                    state.phase = NavPhase::Paused;
                    state.pause_reason = Some(PauseReason::Interrupted);
                    tracing::warn!("movement interrupted, navigation paused");
                    self.publish(&state);
                }
            }
            ExecutorEvent::StepFailed { command, error } => {
                let mut state = self.lock();
                state.last_alert = Some(format!("Command '{}' failed: {}", command.command, error));
                self.publish(&state);
            }
            ExecutorEvent::StepSent { command, .. } => {
                let mut state = self.lock();
                state.note_sent(command);
                self.publish(&state);
            }
            ExecutorEvent::Drained => {
                let state = self.lock();
                self.publish(&state);
            }
        }
    }

    /// 周期安全检查：导航中不安全则暂停，因安全/战斗暂停且已恢复安全则继续
    pub fn poll_safety(&self) {
        let phase = self.lock().phase;
        match phase {
            NavPhase::Navigating => {
                if let Err(e) = self.policy.check_player(self.signals.as_ref()) {
                    let reason = match e {
                        NavError::InCombat { .. } => PauseReason::Combat,
                        _ => PauseReason::Safety,
                    };
                    if self.pause(reason).is_ok() {
                        tracing::warn!(reason = %e, "safety poll paused navigation");
                        let mut state = self.lock();
                        state.last_alert = Some(e.to_string());
                        self.publish(&state);
                    }
                }
            }
            NavPhase::Paused if self.settings.auto_resume_after_combat => {
                self.try_auto_resume(&[PauseReason::Safety, PauseReason::Combat]);
            }
            _ => {}
        }
    }

    /// 启动后台任务：追踪器更新、执行器事件、周期安全轮询
    pub fn spawn_listeners(self: &Arc<Self>, tracker: &TrackerHandle) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(3);

        let this = Arc::clone(self);
        let token = self.token.clone();
        let mut updates = tracker.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    _ = token.cancelled() => break,
                    update = updates.recv() => update,
                };
                match update {
                    Ok(update) => {
                        this.on_room_update(&update);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "room updates lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let this = Arc::clone(self);
        let token = self.token.clone();
        let mut events = self.executor.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => this.on_executor_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "executor events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let this = Arc::clone(self);
        let token = self.token.clone();
        let period = self.settings.safety_poll;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => this.poll_safety(),
                }
            }
        }));

        handles
    }

    pub fn find_by_id(&self, id: NodeId) -> Option<Arc<MapNode>> {
        self.map.get_node(id)
    }

    pub fn find_by_name(&self, needle: &str) -> Vec<Arc<MapNode>> {
        self.map.search_by_name(needle)
    }

    /// 当前位置附近的商店；位置未知时为空
    pub fn nearby_stores(&self, max_steps: usize) -> Vec<(Arc<MapNode>, usize)> {
        match self.position() {
            Some(p) => self.map.nearby_stores(p.node_id(), max_steps),
            None => Vec::new(),
        }
    }

    /// 纯距离步数（只用于展示）
    pub fn distance_to(&self, target: NodeId) -> Option<usize> {
        let from = self.position()?.node_id();
        self.planner.true_distance(from, target)
    }
}
