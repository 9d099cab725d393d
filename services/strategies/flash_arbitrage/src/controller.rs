//! # Execution State Controller - Single-Flight Trigger Loop
//!
//! ## Purpose
//!
//! Owns the process-wide [`ExecutionState`], the rolling [`AttemptBudget`] and the
//! operating mode. Triggers arrive on one mpsc channel and are handled by a single
//! `tokio::select!` loop, so at most one evaluation or submission is ever in flight.
//!
//! ## State Machine
//!
//! ```text
//!              trigger (debounced)           bundle handed over
//!   IDLE ───────────────────────→ SIMULATING ─────────────────→ EXECUTING
//!    ↑                                 │ no opportunity               │
//!    └─────────────────────────────────┴──────────────────────────────┘
//!
//!   trigger while SIMULATING → kept as the single queued trigger (latest wins)
//!   trigger while EXECUTING  → dropped and logged
//! ```
//!
//! The queued trigger starts as soon as the in-flight attempt completes and is not
//! debounced. Fresh triggers are debounced by block count and wall-clock interval;
//! the idle-timeout trigger skips the block check.
//!
//! ## Budget And Mode
//!
//! Only attempts that broadcast something are charged to the budget or recorded
//! against EXTREME mode. Evaluation runs only while the budget has capacity and,
//! in EXTREME, once enough blocks have passed since the previous attempt.

use crate::events::{Trigger, TriggerSource};
use crate::health::HealthProbe;
use crate::journal::{PipelineJournal, PipelineRecord};
use crate::logging::LogEmoji;
use crate::metrics::{MetricsSnapshot, StrategyMetrics};
use crate::mode::{ExtremeModeConfig, ModeController, ModeSet, SwitchReason};
use crate::{log_error, log_execution, log_success};
use async_trait::async_trait;
use mev::{SubmitFailure, SubmitOutcome};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use types::{AttemptBudget, Bundle, ExecutionState, ModeParams, OperatingMode, SizedOpportunity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub min_blocks_between_triggers: u64,
    pub min_trigger_interval_ms: u64,
    /// Scan anyway after this long without a processed trigger
    pub idle_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub health_check_timeout_secs: u64,
    /// Broadcast attempts per rolling 24h
    pub attempts_per_day: u32,
    pub evaluation_timeout_secs: u64,
    /// Covers signing, submission and confirmation
    pub execution_timeout_secs: u64,
    pub metrics_interval_secs: u64,
    /// Head may run this many blocks past the last block trigger before the feed
    /// counts as stalled; 0 disables the check
    pub max_trigger_lag_blocks: u64,
    pub extreme: ExtremeModeConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_blocks_between_triggers: 1,
            min_trigger_interval_ms: 1_000,
            idle_timeout_secs: 30,
            health_check_interval_secs: 60,
            health_check_timeout_secs: 10,
            attempts_per_day: 50,
            evaluation_timeout_secs: 10,
            execution_timeout_secs: 120,
            metrics_interval_secs: 60,
            max_trigger_lag_blocks: 20,
            extreme: ExtremeModeConfig::default(),
        }
    }
}

impl ControllerConfig {
    fn secs(value: u64) -> Duration {
        Duration::from_secs(value.max(1))
    }

    pub fn min_trigger_interval(&self) -> Duration {
        Duration::from_millis(self.min_trigger_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Self::secs(self.idle_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Self::secs(self.health_check_timeout_secs)
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Self::secs(self.evaluation_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Self::secs(self.execution_timeout_secs)
    }
}

/// An opportunity together with the bundle that realises it
#[derive(Debug, Clone)]
pub struct PlannedAttempt {
    pub opportunity: SizedOpportunity,
    pub bundle: Bundle,
}

/// Sizing and submission as seen by the controller
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    /// Best attempt under `params`, if any
    async fn evaluate(&self, params: &ModeParams) -> Option<PlannedAttempt>;

    /// Submit the bundle; `broadcast` flips once anything left the process
    async fn submit(&self, attempt: &PlannedAttempt, broadcast: &AtomicBool) -> SubmitOutcome;
}

#[derive(Debug)]
pub enum AttemptOutcome {
    NoOpportunity,
    Submitted {
        attempt: Box<PlannedAttempt>,
        outcome: SubmitOutcome,
    },
    TimedOut {
        stage: &'static str,
        path: Option<String>,
        broadcast: bool,
    },
}

impl AttemptOutcome {
    pub fn broadcast(&self) -> bool {
        match self {
            AttemptOutcome::NoOpportunity => false,
            AttemptOutcome::Submitted { outcome, .. } => outcome.broadcast(),
            AttemptOutcome::TimedOut { broadcast, .. } => *broadcast,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, AttemptOutcome::Submitted { outcome, .. } if outcome.success())
    }
}

/// Final state returned by [`Controller::run`]
#[derive(Debug, Clone)]
pub struct ControllerReport {
    pub mode: OperatingMode,
    pub attempts_used: u32,
    pub metrics: MetricsSnapshot,
}

struct InFlight {
    id: u64,
    handle: JoinHandle<AttemptOutcome>,
    broadcast: Arc<AtomicBool>,
}

/// Await the in-flight attempt, or never when idle
async fn join_in_flight(in_flight: &mut Option<InFlight>) -> (u64, Result<AttemptOutcome, JoinError>) {
    match in_flight {
        Some(flight) => {
            let result = (&mut flight.handle).await;
            (flight.id, result)
        }
        None => std::future::pending().await,
    }
}

fn std_now() -> std::time::Instant {
    Instant::now().into_std()
}

pub struct Controller<P: Pipeline> {
    pipeline: Arc<P>,
    config: ControllerConfig,
    triggers: mpsc::Receiver<Trigger>,
    source: Option<(Arc<dyn TriggerSource>, mpsc::Sender<Trigger>)>,
    source_handles: Vec<JoinHandle<()>>,
    health: Option<Arc<dyn HealthProbe>>,
    journal: Arc<PipelineJournal>,
    metrics: Arc<StrategyMetrics>,

    state: ExecutionState,
    budget: AttemptBudget,
    mode: ModeController,
    head: u64,
    last_fed_block: Option<u64>,
    last_processed: Option<(u64, Instant)>,
    queued: Option<Trigger>,
    in_flight: Option<InFlight>,
    next_id: u64,
    idle_deadline: Instant,
    phase_tx: mpsc::UnboundedSender<u64>,
    phase_rx: mpsc::UnboundedReceiver<u64>,
}

impl<P: Pipeline> Controller<P> {
    pub fn new(
        pipeline: Arc<P>,
        config: ControllerConfig,
        modes: ModeSet,
        triggers: mpsc::Receiver<Trigger>,
        journal: Arc<PipelineJournal>,
        metrics: Arc<StrategyMetrics>,
    ) -> anyhow::Result<Self> {
        let now = std_now();
        let budget = AttemptBudget::new(config.attempts_per_day, AttemptBudget::DAY, now)?;
        let mode = ModeController::new(config.extreme.clone(), modes, now);
        let (phase_tx, phase_rx) = mpsc::unbounded_channel();
        let idle_deadline = Instant::now() + config.idle_timeout();

        Ok(Self {
            pipeline,
            config,
            triggers,
            source: None,
            source_handles: Vec::new(),
            health: None,
            journal,
            metrics,
            state: ExecutionState::Idle,
            budget,
            mode,
            head: 0,
            last_fed_block: None,
            last_processed: None,
            queued: None,
            in_flight: None,
            next_id: 0,
            idle_deadline,
            phase_tx,
            phase_rx,
        })
    }

    /// Feed the channel from `source`; `sink` must be the sender of `triggers`
    pub fn with_source(mut self, source: Arc<dyn TriggerSource>, sink: mpsc::Sender<Trigger>) -> Self {
        self.source = Some((source, sink));
        self
    }

    pub fn with_health(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health = Some(probe);
        self
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Run until `shutdown` resolves, or until the trigger channel closes with
    /// nothing in flight
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> ControllerReport {
        info!(
            "{} Controller starting in {} mode, budget {} attempts/24h",
            LogEmoji::LOCK,
            self.mode.current(),
            self.budget.attempts_max()
        );
        self.subscribe().await;

        let health_period = ControllerConfig::secs(self.config.health_check_interval_secs);
        let metrics_period = ControllerConfig::secs(self.config.metrics_interval_secs);
        let mut health = interval_at(Instant::now() + health_period, health_period);
        let mut metrics = interval_at(Instant::now() + metrics_period, metrics_period);
        let mut triggers_open = true;
        tokio::pin!(shutdown);

        loop {
            if !triggers_open && self.in_flight.is_none() && self.queued.is_none() {
                info!("Trigger channel closed, controller stopping");
                break;
            }
            let idle_at = self.idle_deadline;
            let has_health = self.health.is_some();

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                Some(id) = self.phase_rx.recv() => self.on_phase(id),
                (id, result) = join_in_flight(&mut self.in_flight) => self.on_complete(id, result),
                maybe = self.triggers.recv(), if triggers_open => match maybe {
                    Some(trigger) => self.on_trigger(trigger),
                    None => triggers_open = false,
                },
                _ = sleep_until(idle_at) => {
                    self.idle_deadline = Instant::now() + self.config.idle_timeout();
                    self.on_trigger(Trigger::IdleTimeout);
                }
                _ = health.tick(), if has_health => self.health_check().await,
                _ = metrics.tick() => self.metrics.log_summary(),
            }
        }

        // A broadcast cannot be recalled; wait for the attempt to settle
        self.queued = None;
        if let Some(flight) = self.in_flight.as_mut() {
            let id = flight.id;
            let result = (&mut flight.handle).await;
            self.on_complete(id, result);
        }
        for handle in self.source_handles.drain(..) {
            handle.abort();
        }

        self.metrics.log_summary();
        ControllerReport {
            mode: self.mode.current(),
            attempts_used: self.budget.attempts_used(),
            metrics: self.metrics.snapshot(),
        }
    }

    fn on_trigger(&mut self, trigger: Trigger) {
        StrategyMetrics::incr(&self.metrics.triggers_received);
        if let Some(block) = trigger.block() {
            self.head = self.head.max(block);
            self.last_fed_block = Some(self.last_fed_block.map_or(block, |last| last.max(block)));
        }
        self.route(trigger, false);
    }

    fn route(&mut self, trigger: Trigger, dequeued: bool) {
        match self.state {
            ExecutionState::Executing => {
                StrategyMetrics::incr(&self.metrics.triggers_dropped);
                info!("{} Trigger {} dropped: {}", LogEmoji::LOCK, trigger, self.state);
                self.journal.record(PipelineRecord::TriggerDropped {
                    trigger: trigger.to_string(),
                    state: self.state.to_string(),
                });
            }
            ExecutionState::Simulating => {
                let replaced = self.queued.replace(trigger.clone());
                if replaced.is_some() {
                    StrategyMetrics::incr(&self.metrics.triggers_coalesced);
                }
                debug!("{} Trigger {} queued behind running evaluation", LogEmoji::TRIGGER, trigger);
                self.journal.record(PipelineRecord::TriggerCoalesced {
                    trigger: trigger.to_string(),
                    replaced: replaced.map(|t| t.to_string()),
                });
            }
            ExecutionState::Idle => {
                if !dequeued && self.debounced(&trigger) {
                    StrategyMetrics::incr(&self.metrics.triggers_debounced);
                    debug!("{} Trigger {} debounced", LogEmoji::CLOCK, trigger);
                    return;
                }
                self.start_attempt(trigger);
            }
        }
    }

    fn debounced(&self, trigger: &Trigger) -> bool {
        let Some((last_block, last_at)) = self.last_processed else {
            return false;
        };
        let too_soon = last_at.elapsed() < self.config.min_trigger_interval();
        if matches!(trigger, Trigger::IdleTimeout) {
            return too_soon;
        }
        let block = trigger.block().unwrap_or(self.head);
        too_soon || block.saturating_sub(last_block) < self.config.min_blocks_between_triggers
    }

    fn start_attempt(&mut self, trigger: Trigger) {
        let now = std_now();
        if let Some(reason) = self.mode.check_timeout(now) {
            self.on_mode_switch(reason);
        }
        if !self.budget.has_capacity(now) {
            debug!(
                "{} Budget exhausted ({}/{}), ignoring {}",
                LogEmoji::BUDGET,
                self.budget.attempts_used(),
                self.budget.attempts_max(),
                trigger
            );
            return;
        }
        if !self.mode.may_attempt(self.head) {
            debug!("{} EXTREME block gap not reached at {}, ignoring {}", LogEmoji::MODE, self.head, trigger);
            return;
        }

        self.last_processed = Some((trigger.block().unwrap_or(self.head), Instant::now()));
        self.idle_deadline = Instant::now() + self.config.idle_timeout();
        self.state = ExecutionState::Simulating;
        self.next_id += 1;
        StrategyMetrics::incr(&self.metrics.evaluations);

        let id = self.next_id;
        let params = self.mode.params().clone();
        let pipeline = self.pipeline.clone();
        let phase_tx = self.phase_tx.clone();
        let broadcast = Arc::new(AtomicBool::new(false));
        let broadcast_flag = broadcast.clone();
        let evaluation_timeout = self.config.evaluation_timeout();
        let execution_timeout = self.config.execution_timeout();

        debug!("{} Attempt #{} on {} ({} mode)", LogEmoji::TRIGGER, id, trigger, params.mode);
        let handle = tokio::spawn(async move {
            let planned = match timeout(evaluation_timeout, pipeline.evaluate(&params)).await {
                Ok(Some(planned)) => planned,
                Ok(None) => return AttemptOutcome::NoOpportunity,
                Err(_) => {
                    return AttemptOutcome::TimedOut {
                        stage: "evaluation",
                        path: None,
                        broadcast: false,
                    }
                }
            };

            let _ = phase_tx.send(id);
            match timeout(execution_timeout, pipeline.submit(&planned, &broadcast_flag)).await {
                Ok(outcome) => AttemptOutcome::Submitted {
                    attempt: Box::new(planned),
                    outcome,
                },
                Err(_) => AttemptOutcome::TimedOut {
                    stage: "execution",
                    path: Some(planned.opportunity.path.to_string()),
                    broadcast: broadcast_flag.load(Ordering::SeqCst),
                },
            }
        });

        self.in_flight = Some(InFlight { id, handle, broadcast });
    }

    fn on_phase(&mut self, id: u64) {
        if self.in_flight.as_ref().is_some_and(|f| f.id == id) {
            self.state = ExecutionState::Executing;
            log_execution!("Attempt #{} {}", id, self.state);
        }
    }

    fn on_complete(&mut self, id: u64, result: Result<AttemptOutcome, JoinError>) {
        let flight = self.in_flight.take();
        self.state = ExecutionState::Idle;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Attempt #{} task failed: {}", id, e);
                AttemptOutcome::TimedOut {
                    stage: "task",
                    path: None,
                    broadcast: flight.map_or(false, |f| f.broadcast.load(Ordering::SeqCst)),
                }
            }
        };
        self.record_outcome(id, &outcome);

        if outcome.broadcast() {
            let now = std_now();
            self.budget.record_broadcast(now);
            info!(
                "{} Budget {}/{} used",
                LogEmoji::BUDGET,
                self.budget.attempts_used(),
                self.budget.attempts_max()
            );
            if let Some(reason) = self.mode.record_attempt(self.head, outcome.success(), now) {
                self.on_mode_switch(reason);
            }
        }

        if let Some(next) = self.queued.take() {
            debug!("{} Dequeued {}", LogEmoji::TRIGGER, next);
            self.route(next, true);
        }
    }

    fn record_outcome(&self, id: u64, outcome: &AttemptOutcome) {
        match outcome {
            AttemptOutcome::NoOpportunity => debug!("Attempt #{}: no opportunity", id),
            AttemptOutcome::Submitted { attempt, outcome } => {
                StrategyMetrics::incr(&self.metrics.opportunities);
                let path = attempt.opportunity.path.to_string();
                match outcome {
                    SubmitOutcome::Included {
                        identifier,
                        channel,
                        atomic,
                        gas_used,
                        block,
                    } => {
                        StrategyMetrics::incr(&self.metrics.broadcasts);
                        StrategyMetrics::incr(&self.metrics.confirmations);
                        log_success!(
                            "{} confirmed in block {} via {} (net ${:.2})",
                            path,
                            block,
                            channel,
                            attempt.opportunity.net_profit_usd
                        );
                        self.journal.record(PipelineRecord::BundleSubmitted {
                            path: path.clone(),
                            identifier: Some(format!("{identifier:?}")),
                            channel: channel.to_string(),
                        });
                        self.journal.record(PipelineRecord::BundleConfirmed {
                            path,
                            identifier: format!("{identifier:?}"),
                            block: *block,
                            gas_used: gas_used.to_string(),
                            atomic: *atomic,
                        });
                    }
                    SubmitOutcome::Rejected(reason) => {
                        let simulation = matches!(
                            reason,
                            SubmitFailure::SimulationReverted { .. }
                                | SubmitFailure::SimulationError { .. }
                                | SubmitFailure::SimulationTimeout(_)
                        );
                        if simulation {
                            StrategyMetrics::incr(&self.metrics.simulations_failed);
                        } else {
                            StrategyMetrics::incr(&self.metrics.failures);
                        }
                        warn!("{} {} not submitted: {}", LogEmoji::WARNING, path, reason);
                        self.journal.record(PipelineRecord::BundleFailed {
                            path,
                            reason: reason.to_string(),
                            broadcast: false,
                            call_index: reason.call_index(),
                        });
                    }
                    SubmitOutcome::Failed {
                        reason,
                        identifier,
                        channel,
                        ..
                    } => {
                        StrategyMetrics::incr(&self.metrics.broadcasts);
                        StrategyMetrics::incr(&self.metrics.failures);
                        log_error!("{} failed after broadcast via {}: {}", path, channel, reason);
                        self.journal.record(PipelineRecord::BundleSubmitted {
                            path: path.clone(),
                            identifier: identifier.map(|h| format!("{h:?}")),
                            channel: channel.to_string(),
                        });
                        self.journal.record(PipelineRecord::BundleFailed {
                            path,
                            reason: reason.to_string(),
                            broadcast: true,
                            call_index: reason.call_index(),
                        });
                    }
                }
            }
            AttemptOutcome::TimedOut { stage, path, broadcast } => {
                StrategyMetrics::incr(&self.metrics.failures);
                if *broadcast {
                    StrategyMetrics::incr(&self.metrics.broadcasts);
                }
                warn!(
                    "{} Attempt #{} timed out during {} (broadcast: {})",
                    LogEmoji::CLOCK,
                    id,
                    stage,
                    broadcast
                );
                self.journal.record(PipelineRecord::BundleFailed {
                    path: path.clone().unwrap_or_default(),
                    reason: format!("{stage} timed out"),
                    broadcast: *broadcast,
                    call_index: None,
                });
            }
        }
    }

    fn on_mode_switch(&self, reason: SwitchReason) {
        info!(
            "{} Switching {} → {}: {}",
            LogEmoji::MODE,
            OperatingMode::Extreme,
            OperatingMode::Normal,
            reason
        );
        self.journal.record(PipelineRecord::ModeSwitched {
            from: OperatingMode::Extreme.to_string(),
            to: OperatingMode::Normal.to_string(),
            reason: reason.to_string(),
        });
    }

    async fn subscribe(&mut self) -> bool {
        let Some((source, sink)) = self.source.clone() else {
            return true;
        };
        for handle in self.source_handles.drain(..) {
            handle.abort();
        }
        self.last_fed_block = None;
        let limit = self.config.health_check_timeout();
        match timeout(limit, source.start(sink)).await {
            Ok(Ok(handles)) => {
                self.source_handles = handles;
                true
            }
            Ok(Err(e)) => {
                warn!("{} Event subscription failed: {}", LogEmoji::HEALTH, e);
                false
            }
            Err(_) => {
                warn!("{} Event subscription gave no answer within {:?}", LogEmoji::HEALTH, limit);
                false
            }
        }
    }

    /// Reason the block feed counts as stalled at `head`, if it does. The first
    /// check after a subscription only records a baseline.
    fn stalled_feed(&mut self, head: u64) -> Option<String> {
        let lag = self.config.max_trigger_lag_blocks;
        let feeds_blocks = self.source.as_ref().is_some_and(|(source, _)| source.emits_blocks());
        if lag == 0 || !feeds_blocks {
            return None;
        }
        match self.last_fed_block {
            None => {
                self.last_fed_block = Some(head);
                None
            }
            Some(last) if head > last.saturating_add(lag) => {
                Some(format!("block feed silent since {last}, head at {head}"))
            }
            Some(_) => None,
        }
    }

    async fn health_check(&mut self) {
        let Some(probe) = self.health.clone() else {
            return;
        };
        let limit = self.config.health_check_timeout();
        let failure = match timeout(limit, probe.check()).await {
            Ok(Ok(report)) => {
                debug!("{} head {} balance {} wei", LogEmoji::HEALTH, report.head, report.balance_wei);
                self.head = self.head.max(report.head);
                match self.stalled_feed(report.head) {
                    Some(stall) => stall,
                    None => return,
                }
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no response within {limit:?}"),
        };

        StrategyMetrics::incr(&self.metrics.health_failures);
        warn!("{} Health check failed: {}; resubscribing", LogEmoji::HEALTH, failure);
        self.journal.record(PipelineRecord::HealthCheckFailed { reason: failure });

        // Listeners may have missed blocks; let the next trigger through
        self.last_processed = None;
        if self.source.is_some() {
            let ok = self.subscribe().await;
            self.journal.record(PipelineRecord::Resubscribed { ok });
        }
    }
}
