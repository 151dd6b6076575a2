// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Orchestrator: owns the pipeline, the fetch cycle and the managers.
//!
//! Everything mutable lives inside one task. That task multiplexes four
//! inputs: commands from an [`EngineHandle`], pipeline exchanges, a
//! one-second scheduler tick and the auto-refresh deadline. Managers and
//! actions never call each other; they return operations and events, and
//! the loop routes them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::actions::{self, ActionContext, Operation, OperationState, RetryContexts, Transition};
use crate::config::{EngineConfig, RefreshMode};
use crate::error::{FailureKind, StoreError};
use crate::events::{EngineEvent, EventBus, ManagerKind};
use crate::extraction::PatternTable;
use crate::fetch::{indicates_auth_loss, FetchCycle, FetchPage};
use crate::model::{SlotId, Snapshot, VillageId};
use crate::notify::{self, Notifier};
use crate::pipeline::{Completion, Exchange, PendingRequest, RequestPipeline, RequestTag};
use crate::scheduler::troops::TroopKey;
use crate::scheduler::{
    BuildTask, ConstructionManager, FarmRule, FarmScheduler, SchedulerTick, TroopRule, TroopScheduler,
};
use crate::session::{classify_health, CookieJar, SessionHealth, SessionStore};
use crate::transport::{absolute_url, Transport};

/// Delay before the refresh that follows a started upgrade.
const UPGRADE_REFRESH_SECS: u64 = 10;

/// Commands accepted by the engine task.
#[derive(Debug)]
pub enum Command {
    Login,
    Fetch,
    Upgrade { village_id: VillageId, slot_id: SlotId },
    AddBuildTask(BuildTask),
    RemoveBuildTask { village_id: VillageId, slot_id: SlotId },
    SetTroopRule(TroopRule),
    RemoveTroopRule(TroopKey),
    SetTroopEnabled { key: TroopKey, enabled: bool },
    SetFarmRule(FarmRule),
    RemoveFarmRule { list_id: u64 },
    SetFarmEnabled { list_id: u64, enabled: bool },
    SendFarm { village_id: VillageId, list_id: u64 },
    FetchFarmLists { village_id: VillageId },
    IncomingAttacks { village_id: VillageId },
    CheckSession,
    Snapshot(oneshot::Sender<Arc<Snapshot>>),
    Shutdown,
}

pub struct Engine {
    config: EngineConfig,
    patterns: Arc<PatternTable>,
    pipeline: RequestPipeline,
    exchanges: mpsc::UnboundedReceiver<Exchange>,
    notifier: Arc<dyn Notifier>,
    bus: EventBus,
    construction: ConstructionManager,
    troops: TroopScheduler,
    farms: FarmScheduler,
    farm_retries: RetryContexts,
    snapshot: Arc<Snapshot>,
    cycle: Option<FetchCycle>,
    cycles_started: u64,
    logging_in: bool,
    /// Operations aborted by session loss, replayed after the next login.
    parked: Vec<Operation>,
    /// Operations already replayed once since the last login.
    replayed: Vec<Operation>,
    refresh_at: Option<Instant>,
    autostart: bool,
    rng: StdRng,
}

impl Engine {
    /// Build an engine around `transport`, whose cookies live in `jar`.
    ///
    /// Rule files are loaded here; a malformed file is an error.
    pub fn new(
        config: EngineConfig,
        patterns: Arc<PatternTable>,
        jar: Arc<CookieJar>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        bus: EventBus,
    ) -> Result<Self> {
        let mut rng = StdRng::from_entropy();
        let session = SessionStore::new(
            jar,
            config.cookies_path(),
            &config.auth_cookie,
            config.host(),
            config.session.cookie_lifetime_hours,
            Duration::from_secs(config.session.persist_interval_secs),
        );
        let (pipeline, exchanges) = RequestPipeline::new(transport, session, config.pacing, config.retry);
        let construction = ConstructionManager::load(&config.build_queue_path())
            .context("loading construction queue")?;
        let troops = TroopScheduler::load(ManagerKind::Troops, &config.troop_rules_path(), &mut rng)
            .context("loading troop rules")?;
        let farms = FarmScheduler::load(ManagerKind::Farms, &config.farm_rules_path(), &mut rng)
            .context("loading farm rules")?;

        Ok(Self {
            config,
            patterns,
            pipeline,
            exchanges,
            notifier,
            bus,
            construction,
            troops,
            farms,
            farm_retries: RetryContexts::default(),
            snapshot: Arc::new(Snapshot::default()),
            cycle: None,
            cycles_started: 0,
            logging_in: false,
            parked: Vec::new(),
            replayed: Vec::new(),
            refresh_at: None,
            autostart: true,
            rng,
        })
    }

    /// Skip the saved-session/login/fetch startup sequence.
    pub fn without_startup(mut self) -> Self {
        self.autostart = false;
        self
    }

    /// Move the engine onto its own task.
    pub fn spawn(self) -> EngineHandle {
        let (tx, rx) = mpsc::channel(64);
        let bus = self.bus.clone();
        let task = tokio::spawn(self.run(rx));
        EngineHandle { tx, bus, task }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        if self.autostart {
            self.startup();
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            self.pipeline.pump();
            let deadline = self.refresh_at;
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd),
                },
                Some(exchange) = self.exchanges.recv() => self.on_exchange(exchange),
                _ = ticker.tick() => self.on_tick(),
                _ = until(deadline) => {
                    self.refresh_at = None;
                    tracing::debug!("auto-refresh due");
                    self.start_cycle();
                }
            }
        }

        if self.pipeline.session().has_auth_cookie() {
            if let Err(e) = self.pipeline.session_mut().persist(Utc::now()) {
                tracing::warn!(error = %e, "could not persist session on shutdown");
            }
        }
        tracing::info!("engine stopped");
        self.emit(EngineEvent::EngineStopped);
    }

    // ── Startup and session ────────────────────────────────────────────────

    /// Reuse a saved session when it loads, otherwise log in.
    fn startup(&mut self) {
        match self.pipeline.session_mut().load(Utc::now()) {
            Ok(_) => self.start_cycle(),
            Err(e) => {
                tracing::info!(reason = %e, code = e.code(), "no usable saved session");
                if self.config.credentials.is_some() {
                    self.begin_login();
                } else {
                    tracing::warn!("no credentials configured; fetching with an empty session");
                    self.start_cycle();
                }
            }
        }
    }

    fn begin_login(&mut self) {
        if self.logging_in {
            return;
        }
        let Some(creds) = self.config.credentials.clone() else {
            self.emit(EngineEvent::LoginFailed {
                kind: FailureKind::Authentication,
                message: "no credentials configured".to_string(),
            });
            return;
        };
        self.logging_in = true;
        self.emit(EngineEvent::LoginStarted);
        let ctx = action_ctx(&self.config, &self.patterns, &mut self.farm_retries, false);
        let started = Operation::Login(creds).start(&ctx, &self.snapshot);
        if let Some(request) = started.request {
            self.pipeline.enqueue_front(request);
        }
    }

    fn on_login_finished(&mut self, events: &[EngineEvent]) {
        self.logging_in = false;
        if !events.iter().any(|e| matches!(e, EngineEvent::LoginSucceeded)) {
            self.parked.clear();
            return;
        }
        if let Err(e) = self.pipeline.session_mut().persist(Utc::now()) {
            tracing::warn!(error = %e, "could not persist session after login");
        }
        self.replayed = std::mem::take(&mut self.parked);
        for op in self.replayed.clone() {
            tracing::info!(operation = op.name(), "replaying operation after re-login");
            self.start_operation(op);
        }
        self.start_cycle();
    }

    /// The server dropped the session while `context` was running.
    fn on_session_lost(&mut self, context: &str) {
        tracing::warn!(context, "session lost");
        if self.config.credentials.is_some() {
            self.begin_login();
        }
    }

    fn check_session(&mut self) {
        let url = absolute_url(&self.config.base_url, "/dorf1.php");
        self.pipeline
            .enqueue(PendingRequest::get("healthProbe", url, RequestTag::HealthProbe));
    }

    fn on_probe(&mut self, completion: Completion) {
        let health = match &completion.result {
            Ok(response) if matches!(response.status, 302 | 401 | 403) => SessionHealth::Expired,
            Ok(response) => classify_health(&response.body, &self.patterns),
            Err(_) => SessionHealth::Unknown,
        };
        tracing::info!(?health, "session probed");
        self.emit(EngineEvent::SessionHealth { health });
        if health == SessionHealth::Expired {
            self.emit(EngineEvent::SessionExpired {
                context: "health probe".to_string(),
            });
            self.on_session_lost("health probe");
        }
    }

    // ── Fetch cycle ───────────────────────────────────────────────────────

    fn start_cycle(&mut self) {
        if self.cycle.is_some() && self.pipeline.fetch_pending() {
            tracing::debug!("fetch cycle already running");
            return;
        }
        if self.logging_in {
            tracing::debug!("login in progress; the cycle follows it");
            return;
        }
        self.cycles_started += 1;
        let (cycle, first) = FetchCycle::start(self.cycles_started, &self.config.base_url, &self.patterns);
        tracing::info!(cycle = self.cycles_started, "fetch cycle started");
        self.cycle = Some(cycle);
        self.refresh_at = None;
        self.pipeline.reset_progress();
        self.pipeline.enqueue(first);
        self.emit(EngineEvent::CycleStarted {
            cycle: self.cycles_started,
        });
    }

    fn on_fetch(&mut self, page: FetchPage, completion: Completion) {
        let Some(cycle) = self.cycle.as_mut() else {
            tracing::debug!(page = %page.page, "fetch completion without a cycle");
            return;
        };
        let step = cycle.handle(&self.patterns, &page, completion);
        for request in step.requests {
            self.pipeline.enqueue(request);
        }
        let auth_lost = step.session_expired
            || step.events.iter().any(|e| {
                matches!(e, EngineEvent::FetchFailed { kind, .. } if indicates_auth_loss(*kind))
            });
        self.emit_all(step.events);

        let progress = self.pipeline.progress();
        self.emit(EngineEvent::FetchProgress {
            completed: progress.completed,
            total: progress.total,
            page: page.page.clone(),
        });

        if auth_lost {
            let dropped = self.pipeline.discard(|r| r.tag.is_fetch());
            tracing::warn!(dropped, "fetch cycle aborted: session lost");
            self.cycle = None;
            self.pipeline.reset_progress();
            self.emit(EngineEvent::SessionExpired {
                context: "fetch".to_string(),
            });
            self.on_session_lost("fetch");
            if !self.logging_in {
                self.schedule_refresh();
            }
            return;
        }
        if !self.pipeline.fetch_pending() {
            self.finish_cycle();
        }
    }

    fn finish_cycle(&mut self) {
        let Some(cycle) = self.cycle.take() else {
            return;
        };
        let id = cycle.id();
        self.pipeline.reset_progress();
        match cycle.finish() {
            Some(snapshot) => {
                let snapshot = Arc::new(snapshot);
                tracing::info!(cycle = id, villages = snapshot.villages.len(), "fetch cycle completed");
                self.snapshot = Arc::clone(&snapshot);
                self.emit(EngineEvent::CycleCompleted { cycle: id, snapshot });
                self.evaluate_construction();
            }
            None => tracing::warn!(cycle = id, "fetch cycle ended without a village list"),
        }
        self.schedule_refresh();
    }

    fn schedule_refresh(&mut self) {
        let Some(secs) = refresh_delay(self.config.refresh, &self.snapshot, &mut self.rng) else {
            return;
        };
        self.refresh_in(secs);
    }

    /// Bring the refresh deadline forward to `secs` from now.
    fn refresh_in(&mut self, secs: u64) {
        let at = Instant::now() + Duration::from_secs(secs);
        if self.refresh_at.is_some_and(|current| current <= at) {
            return;
        }
        self.refresh_at = Some(at);
        tracing::debug!(secs, "refresh scheduled");
        self.emit(EngineEvent::RefreshScheduled { in_secs: secs });
    }

    // ── Actions ───────────────────────────────────────────────────────────

    fn start_operation(&mut self, op: Operation) {
        if let Operation::Login(_) = op {
            self.begin_login();
            return;
        }
        tracing::info!(operation = op.name(), "starting operation");
        let authenticated = self.pipeline.session().has_auth_cookie();
        let ctx = action_ctx(&self.config, &self.patterns, &mut self.farm_retries, authenticated);
        let started = op.start(&ctx, &self.snapshot);
        self.emit_all(started.events);
        if let Some(request) = started.request {
            self.pipeline.enqueue(request);
        }
    }

    fn on_action(&mut self, state: OperationState, completion: Completion) {
        let is_login = matches!(state, OperationState::Login(_));
        let authenticated = self.pipeline.session().has_auth_cookie();
        let transition = {
            let mut ctx = action_ctx(&self.config, &self.patterns, &mut self.farm_retries, authenticated);
            actions::resume(state, &mut ctx, completion)
        };
        match transition {
            Transition::Next { request, events } => {
                self.emit_all(events);
                self.pipeline.enqueue_front(request);
            }
            Transition::Done(events) => {
                let upgraded = events
                    .iter()
                    .any(|e| matches!(e, EngineEvent::UpgradeStarted { .. }));
                if is_login {
                    self.emit_all(events.clone());
                    self.on_login_finished(&events);
                    return;
                }
                self.emit_all(events);
                if upgraded && self.config.refresh != RefreshMode::Off {
                    self.refresh_in(UPGRADE_REFRESH_SECS);
                }
            }
            Transition::SessionLost {
                context,
                events,
                replay,
            } => {
                self.emit_all(events);
                if let Some(op) = replay {
                    if let Some(pos) = self.replayed.iter().position(|r| r == &op) {
                        self.replayed.remove(pos);
                        tracing::warn!(operation = op.name(), "session lost again after replay; dropping");
                    } else {
                        tracing::info!(operation = op.name(), "parking operation until re-login");
                        self.parked.push(op);
                    }
                }
                if is_login {
                    self.logging_in = false;
                    return;
                }
                self.on_session_lost(&context);
            }
        }
    }

    // ── Managers ──────────────────────────────────────────────────────────

    fn evaluate_construction(&mut self) {
        let snapshot = Arc::clone(&self.snapshot);
        match self.construction.evaluate(&snapshot, &mut self.rng) {
            Ok(pass) => {
                self.emit_all(pass.events);
                for op in pass.operations {
                    self.start_operation(op);
                }
            }
            Err(e) => tracing::warn!(error = %e, code = e.code(), "construction queue not saved"),
        }
    }

    fn on_tick(&mut self) {
        let construction = self.construction.tick();
        self.emit_all(construction.events);
        if construction.refresh_requested {
            self.start_cycle();
        }
        let troops = self.troops.tick(&mut self.rng);
        self.run_fired(troops);
        let farms = self.farms.tick(&mut self.rng);
        self.run_fired(farms);
    }

    fn run_fired(&mut self, tick: SchedulerTick) {
        self.emit_all(tick.events);
        for op in tick.fired {
            self.start_operation(op);
        }
    }

    fn on_command(&mut self, command: Command) {
        tracing::debug!(?command, "command");
        match command {
            Command::Login => self.begin_login(),
            Command::Fetch => self.start_cycle(),
            Command::CheckSession => self.check_session(),
            Command::Upgrade { village_id, slot_id } => {
                self.start_operation(Operation::Upgrade { village_id, slot_id })
            }
            Command::SendFarm { village_id, list_id } => {
                self.start_operation(Operation::DispatchFarm { village_id, list_id })
            }
            Command::FetchFarmLists { village_id } => {
                self.start_operation(Operation::FetchFarmLists { village_id })
            }
            Command::IncomingAttacks { village_id } => {
                self.start_operation(Operation::IncomingAttacks { village_id })
            }
            Command::AddBuildTask(task) => {
                let result = self.construction.add(task);
                self.apply_store("add build task", result.map(Some));
            }
            Command::RemoveBuildTask { village_id, slot_id } => {
                let result = self
                    .construction
                    .remove(village_id, slot_id)
                    .map(|removed| removed.then(|| vec![changed(ManagerKind::Construction)]));
                self.apply_store("remove build task", result);
            }
            Command::SetTroopRule(rule) => {
                let result = self.troops.upsert(rule, &mut self.rng);
                self.apply_store("save troop rule", result.map(Some));
            }
            Command::RemoveTroopRule(key) => {
                let result = self.troops.remove(&key);
                self.apply_store("remove troop rule", result);
            }
            Command::SetTroopEnabled { key, enabled } => {
                let result = self.troops.set_enabled(&key, enabled, &mut self.rng);
                self.apply_store("toggle troop rule", result);
            }
            Command::SetFarmRule(rule) => {
                let result = self.farms.upsert(rule, &mut self.rng);
                self.apply_store("save farm rule", result.map(Some));
            }
            Command::RemoveFarmRule { list_id } => {
                let result = self.farms.remove(&list_id);
                self.apply_store("remove farm rule", result);
            }
            Command::SetFarmEnabled { list_id, enabled } => {
                let result = self.farms.set_enabled(&list_id, enabled, &mut self.rng);
                self.apply_store("toggle farm rule", result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(Arc::clone(&self.snapshot));
            }
            Command::Shutdown => {}
        }
    }

    fn apply_store(&mut self, what: &str, result: Result<Option<Vec<EngineEvent>>, StoreError>) {
        match result {
            Ok(Some(events)) => self.emit_all(events),
            Ok(None) => tracing::info!(what, "no matching rule"),
            Err(e) => tracing::warn!(what, error = %e, code = e.code(), "rule change not saved"),
        }
    }

    // ── Routing ───────────────────────────────────────────────────────────

    fn on_exchange(&mut self, exchange: Exchange) {
        let Some(completion) = self.pipeline.on_exchange(exchange) else {
            return;
        };
        match completion.request.tag.clone() {
            RequestTag::Fetch(page) => self.on_fetch(page, completion),
            RequestTag::Action(state) => self.on_action(state, completion),
            RequestTag::HealthProbe => self.on_probe(completion),
        }
    }

    fn emit_all(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(text) = notify::alert_text(&event) {
            notify::dispatch(&self.notifier, text);
        }
        self.bus.emit(event);
    }
}

fn action_ctx<'a>(
    config: &'a EngineConfig,
    patterns: &'a PatternTable,
    farm_retries: &'a mut RetryContexts,
    authenticated: bool,
) -> ActionContext<'a> {
    ActionContext {
        base_url: &config.base_url,
        patterns,
        retry: &config.retry,
        authenticated,
        farm_retries,
    }
}

fn changed(manager: ManagerKind) -> EngineEvent {
    EngineEvent::RulesChanged { manager }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Seconds until the next automatic cycle, `None` when refresh is off.
pub fn refresh_delay<G: Rng>(mode: RefreshMode, snapshot: &Snapshot, rng: &mut G) -> Option<u64> {
    match mode {
        RefreshMode::Off => None,
        RefreshMode::Short => Some(rng.gen_range(30..=60)),
        RefreshMode::Long => Some(rng.gen_range(300..=600)),
        RefreshMode::Smart => Some(match snapshot.shortest_construction() {
            Some(remaining) => remaining + rng.gen_range(10..=30),
            None => rng.gen_range(120..=300),
        }),
    }
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Client side of a running engine.
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    bus: EventBus,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("engine has stopped"))
    }

    pub async fn login(&self) -> Result<()> {
        self.send(Command::Login).await
    }

    pub async fn fetch(&self) -> Result<()> {
        self.send(Command::Fetch).await
    }

    pub async fn upgrade(&self, village_id: VillageId, slot_id: SlotId) -> Result<()> {
        self.send(Command::Upgrade { village_id, slot_id }).await
    }

    pub async fn add_build_task(&self, task: BuildTask) -> Result<()> {
        self.send(Command::AddBuildTask(task)).await
    }

    pub async fn remove_build_task(&self, village_id: VillageId, slot_id: SlotId) -> Result<()> {
        self.send(Command::RemoveBuildTask { village_id, slot_id }).await
    }

    pub async fn set_troop_rule(&self, rule: TroopRule) -> Result<()> {
        self.send(Command::SetTroopRule(rule)).await
    }

    pub async fn remove_troop_rule(&self, key: TroopKey) -> Result<()> {
        self.send(Command::RemoveTroopRule(key)).await
    }

    pub async fn set_troop_enabled(&self, key: TroopKey, enabled: bool) -> Result<()> {
        self.send(Command::SetTroopEnabled { key, enabled }).await
    }

    pub async fn set_farm_rule(&self, rule: FarmRule) -> Result<()> {
        self.send(Command::SetFarmRule(rule)).await
    }

    pub async fn remove_farm_rule(&self, list_id: u64) -> Result<()> {
        self.send(Command::RemoveFarmRule { list_id }).await
    }

    pub async fn set_farm_enabled(&self, list_id: u64, enabled: bool) -> Result<()> {
        self.send(Command::SetFarmEnabled { list_id, enabled }).await
    }

    pub async fn send_farm(&self, village_id: VillageId, list_id: u64) -> Result<()> {
        self.send(Command::SendFarm { village_id, list_id }).await
    }

    pub async fn fetch_farm_lists(&self, village_id: VillageId) -> Result<()> {
        self.send(Command::FetchFarmLists { village_id }).await
    }

    pub async fn incoming_attacks(&self, village_id: VillageId) -> Result<()> {
        self.send(Command::IncomingAttacks { village_id }).await
    }

    pub async fn check_session(&self) -> Result<()> {
        self.send(Command::CheckSession).await
    }

    /// The latest completed snapshot.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await.context("engine dropped the snapshot request")
    }

    /// Stop the engine and wait for its task to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.tx.send(Command::Shutdown).await;
        self.task.await.context("engine task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstructionItem, VillageSnapshot};

    #[test]
    fn test_refresh_delay_ranges() {
        let mut rng = StdRng::seed_from_u64(11);
        let empty = Snapshot::default();
        for _ in 0..100 {
            let short = refresh_delay(RefreshMode::Short, &empty, &mut rng).unwrap();
            assert!((30..=60).contains(&short));
            let long = refresh_delay(RefreshMode::Long, &empty, &mut rng).unwrap();
            assert!((300..=600).contains(&long));
            let idle = refresh_delay(RefreshMode::Smart, &empty, &mut rng).unwrap();
            assert!((120..=300).contains(&idle));
        }
        assert!(refresh_delay(RefreshMode::Off, &empty, &mut rng).is_none());
    }

    #[test]
    fn test_smart_refresh_follows_shortest_builder() {
        let mut rng = StdRng::seed_from_u64(5);
        let village = |id, secs| VillageSnapshot {
            id,
            construction: vec![ConstructionItem {
                building_name: "Cranny".into(),
                level: 2,
                remaining_secs: secs,
            }],
            ..Default::default()
        };
        let snapshot = Snapshot {
            villages: [(1, village(1, 400)), (2, village(2, 90))].into_iter().collect(),
            ..Default::default()
        };
        for _ in 0..50 {
            let secs = refresh_delay(RefreshMode::Smart, &snapshot, &mut rng).unwrap();
            assert!((100..=120).contains(&secs), "{secs}");
        }
    }
}
