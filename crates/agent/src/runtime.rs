use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use tollgate_core::budget::spent_percent;
use tollgate_core::shutdown::sleep_unless_shutdown;
use tollgate_core::{
    Action, AuditSink, Clock, DecisionPipeline, ErrorRecord, PipelineError, Policy,
    ShutdownSignal, Sleeper, State, StoreError, SystemClock, TokioSleeper,
};

use crate::source::{EventSource, SourceError};

const BUDGET_WARNING_THRESHOLDS: [u32; 4] = [80, 90, 95, 100];

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub batch_limit: usize,
    pub poll_interval: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self { batch_limit: 20, poll_interval: Duration::from_secs(60) }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub fetched: usize,
    pub replied: usize,
    pub skipped: usize,
    pub errors: usize,
    pub interrupted: bool,
}

/// Remembers which budget thresholds were already announced today.
#[derive(Debug, Default)]
struct BudgetWatch {
    day_key: String,
    announced: u32,
}

impl BudgetWatch {
    fn crossed(&mut self, state: &State, policy: &Policy) -> Option<u32> {
        if self.day_key != state.day_key {
            self.day_key = state.day_key.clone();
            self.announced = 0;
        }

        let percent = spent_percent(state, policy);
        let highest = BUDGET_WARNING_THRESHOLDS
            .iter()
            .copied()
            .filter(|threshold| percent >= *threshold)
            .max()?;
        if highest <= self.announced {
            return None;
        }
        self.announced = highest;
        Some(highest)
    }
}

pub struct AgentRuntime {
    pipeline: DecisionPipeline,
    source: Arc<dyn EventSource>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    shutdown: ShutdownSignal,
    settings: RuntimeSettings,
    budget_watch: Mutex<BudgetWatch>,
    /// State with sent replies that could not be saved yet. Takes precedence
    /// over the file on disk.
    unsaved: Mutex<Option<State>>,
}

impl AgentRuntime {
    pub fn new(
        pipeline: DecisionPipeline,
        source: Arc<dyn EventSource>,
        audit: Arc<dyn AuditSink>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            pipeline,
            source,
            audit,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            shutdown: ShutdownSignal::never(),
            settings,
            budget_watch: Mutex::new(BudgetWatch::default()),
            unsaved: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Processes one batch from the source in order, then persists the run
    /// marker. Stops early, between events, when shutdown is requested.
    ///
    /// When a sent reply could not be saved, the cycle fails and keeps that
    /// state in memory. Later cycles retry the save before fetching anything
    /// and send nothing until it succeeds.
    pub async fn run_once(&self) -> Result<CycleStats, RuntimeError> {
        let store = self.pipeline.store();
        let mut state = match self.take_unsaved() {
            Some(pending) => {
                if let Err(store_error) = store.save(&pending) {
                    warn!(
                        event_name = "runtime.commit_pending",
                        error = %store_error,
                        replied_events = pending.replied_event_ids.len(),
                        "state still unsaved; not fetching new events"
                    );
                    self.hold_unsaved(pending);
                    return Err(store_error.into());
                }
                info!(event_name = "runtime.commit_recovered", "unsaved state written");
                pending
            }
            None => store.load(self.clock.now())?,
        };
        let events = self.source.fetch(self.settings.batch_limit).await?;
        let mut stats = CycleStats { fetched: events.len(), ..CycleStats::default() };

        for event in &events {
            if self.shutdown.is_requested() {
                info!(event_name = "runtime.shutdown", "stopping between events");
                stats.interrupted = true;
                break;
            }

            let now = self.clock.now();
            let decision = match self.pipeline.process(event, &mut state, now).await {
                Ok(decision) => decision,
                Err(pipeline_error) => {
                    error!(
                        event_name = "runtime.commit_failed",
                        event_id = %event.id,
                        error = %pipeline_error,
                        "reply sent but state not saved; abandoning the batch"
                    );
                    self.hold_unsaved(state);
                    self.source.acknowledge(event).await?;
                    return Err(pipeline_error.into());
                }
            };

            match decision.action {
                Action::Reply => stats.replied += 1,
                Action::Skip => stats.skipped += 1,
            }
            self.source.acknowledge(event).await?;
        }

        state.last_run_timestamp = Some(self.clock.now());
        store.save(&state)?;
        self.warn_on_budget(&state);

        info!(
            event_name = "runtime.cycle_complete",
            fetched = stats.fetched,
            replied = stats.replied,
            skipped = stats.skipped,
            errors = stats.errors,
            calls_today = state.calls_today,
            spent_usd = %state.spent_usd,
            "cycle finished"
        );
        Ok(stats)
    }

    /// Polls until shutdown. A failed cycle is logged and retried on the next
    /// poll.
    pub async fn run_daemon(&self) -> Result<CycleStats, RuntimeError> {
        let mut totals = CycleStats::default();
        info!(
            event_name = "runtime.daemon_started",
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            batch_limit = self.settings.batch_limit,
            "daemon started"
        );

        while !self.shutdown.is_requested() {
            match self.run_once().await {
                Ok(stats) => {
                    totals.fetched += stats.fetched;
                    totals.replied += stats.replied;
                    totals.skipped += stats.skipped;
                }
                Err(cycle_error) => {
                    totals.errors += 1;
                    warn!(
                        event_name = "runtime.cycle_failed",
                        error = %cycle_error,
                        "cycle failed; retrying after the poll interval"
                    );
                    self.audit.record_error(ErrorRecord::new(
                        None,
                        "cycle_failed",
                        cycle_error.to_string(),
                        self.clock.now(),
                    ));
                }
            }

            let slept = sleep_unless_shutdown(
                self.sleeper.as_ref(),
                self.settings.poll_interval,
                &self.shutdown,
            )
            .await;
            if !slept {
                break;
            }
        }

        totals.interrupted = true;
        info!(
            event_name = "runtime.daemon_stopped",
            replied = totals.replied,
            skipped = totals.skipped,
            errors = totals.errors,
            "daemon stopped"
        );
        Ok(totals)
    }

    fn take_unsaved(&self) -> Option<State> {
        match self.unsaved.lock() {
            Ok(mut unsaved) => unsaved.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn hold_unsaved(&self, state: State) {
        match self.unsaved.lock() {
            Ok(mut unsaved) => *unsaved = Some(state),
            Err(poisoned) => *poisoned.into_inner() = Some(state),
        }
    }

    fn warn_on_budget(&self, state: &State) {
        let policy = self.pipeline.policy();
        let crossed = match self.budget_watch.lock() {
            Ok(mut watch) => watch.crossed(state, policy),
            Err(poisoned) => poisoned.into_inner().crossed(state, policy),
        };
        if let Some(threshold) = crossed {
            warn!(
                event_name = "budget.threshold_crossed",
                threshold_percent = threshold,
                spent_usd = %state.spent_usd,
                daily_budget_usd = %policy.daily_budget_usd(),
                "daily budget threshold crossed"
            );
        }
    }
}
