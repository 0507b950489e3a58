//! Ordered decision pipeline. One event in, one [`Decision`] out.
//!
//! Stages, first failing stage wins:
//! 1. validity and deduplication
//! 2. classification
//! 3. budget caps
//! 4. daily pacing
//! 5. hourly cap for normal-mode P2
//! 6. relevance
//! 7. compose and send, each under the retry executor
//!
//! State changes only after a confirmed send. A sent reply stays in the
//! in-memory state even when persisting it fails, so later events still see
//! it for deduplication and caps.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::audit::{AuditSink, DecisionRecord, ErrorRecord};
use crate::budget::check_budget;
use crate::classify::{check_relevance, classify, ReplyMode};
use crate::domain::decision::{BudgetSnapshot, Decision, Priority, ReasonCode, StageSkip};
use crate::domain::event::{Event, EventId};
use crate::domain::state::{ReplyCommit, State};
use crate::errors::{CallError, PipelineError, StoreError};
use crate::policy::Policy;
use crate::pricing::{CostModel, TokenUsage};
use crate::retry::{CallContext, RetryExecutor};
use crate::scheduler::{check_hourly_cap, counts_toward_hourly_cap, evaluate_pace, BurstClass};
use crate::store::StateStore;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyDraft {
    pub text: String,
    /// Usage reported by the composer, if it knows it.
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait ReplyComposer: Send + Sync {
    async fn compose(
        &self,
        event: &Event,
        mode: ReplyMode,
        policy: &Policy,
    ) -> Result<ReplyDraft, CallError>;
}

#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(&self, event: &Event, draft: &ReplyDraft) -> Result<(), CallError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Approval {
    pub priority: Priority,
    pub mode: ReplyMode,
    pub burst: Option<BurstClass>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Evaluation {
    Skip(Decision),
    Proceed(Approval),
}

/// Runs the pure stages against `state`, which must already be windowed to
/// `now`.
pub fn evaluate(event: &Event, policy: &Policy, state: &State, now: DateTime<Utc>) -> Evaluation {
    if event.id.is_blank() {
        return Evaluation::Skip(Decision::skip(
            event.id.clone(),
            Priority::P2,
            ReasonCode::InvalidEvent,
        ));
    }
    if state.has_replied(&event.id) {
        return Evaluation::Skip(Decision::skip(
            event.id.clone(),
            Priority::P2,
            ReasonCode::DuplicateEvent,
        ));
    }

    let classification = classify(event, policy);
    let priority = classification.priority;
    let skip = |stage: StageSkip| Evaluation::Skip(Decision::from_stage(event.id.clone(), priority, stage));

    if let Some(stage) = check_budget(state, policy, priority) {
        return skip(stage);
    }

    let pace = evaluate_pace(state, policy, priority, now);
    let burst = pace.burst();
    if let Some(stage) = pace.into_skip() {
        return skip(stage);
    }

    if let Some(stage) = check_hourly_cap(state, policy, priority, classification.mode, now) {
        return skip(stage);
    }

    if let Some(stage) = check_relevance(&classification) {
        return skip(stage);
    }

    Evaluation::Proceed(Approval { priority, mode: classification.mode, burst })
}

pub struct DecisionPipeline {
    policy: Policy,
    store: StateStore,
    executor: RetryExecutor,
    composer: Arc<dyn ReplyComposer>,
    sender: Arc<dyn ReplySender>,
    audit: Arc<dyn AuditSink>,
    cost_model: CostModel,
}

impl DecisionPipeline {
    pub fn new(
        policy: Policy,
        store: StateStore,
        executor: RetryExecutor,
        composer: Arc<dyn ReplyComposer>,
        sender: Arc<dyn ReplySender>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            policy,
            store,
            executor,
            composer,
            sender,
            audit,
            cost_model: CostModel::default(),
        }
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Processes one event and audits its decision. A reply that was sent
    /// but could not be saved is still applied to `state` and audited; the
    /// save failure is returned as [`PipelineError::Commit`].
    pub async fn process(
        &self,
        event: &Event,
        state: &mut State,
        now: DateTime<Utc>,
    ) -> Result<Decision, PipelineError> {
        let rollover = state.advance_windows(now);
        if rollover.day {
            info!(event_name = "state.day_rollover", day_key = %state.day_key, "new UTC day");
        }

        let (decision, commit) = match evaluate(event, &self.policy, state, now) {
            Evaluation::Skip(decision) => (decision, Ok(())),
            Evaluation::Proceed(approval) => self.respond(event, approval, state, now).await,
        };

        info!(
            event_name = "pipeline.decision",
            event_id = %decision.event_id,
            action = decision.action.as_str(),
            reason = decision.reason.map(|reason| reason.as_str()),
            priority = decision.priority.as_str(),
            "event decided"
        );
        self.audit.record_decision(DecisionRecord::new(decision.clone(), state, now));

        commit.map_err(|source| PipelineError::Commit { event_id: event.id.clone(), source })?;
        Ok(decision)
    }

    async fn respond(
        &self,
        event: &Event,
        approval: Approval,
        state: &mut State,
        now: DateTime<Utc>,
    ) -> (Decision, Result<(), StoreError>) {
        let failed =
            || (Decision::skip(event.id.clone(), approval.priority, ReasonCode::ReplyFailed), Ok(()));

        if !self.space_out_call(state, now).await {
            warn!(event_name = "pipeline.cancelled", event_id = %event.id, "shutdown before call");
            return failed();
        }

        let draft = match self
            .executor
            .execute(CallContext::new("compose_reply", Some(&event.id)), || {
                self.composer.compose(event, approval.mode, &self.policy)
            })
            .await
        {
            Ok(draft) => draft,
            Err(failure) => {
                warn!(
                    event_name = "pipeline.compose_failed",
                    event_id = %event.id,
                    error = %failure,
                    "reply not composed"
                );
                return failed();
            }
        };

        if let Err(failure) = self
            .executor
            .execute(CallContext::new("send_reply", Some(&event.id)), || {
                self.sender.send(event, &draft)
            })
            .await
        {
            warn!(
                event_name = "pipeline.send_failed",
                event_id = %event.id,
                error = %failure,
                "reply not sent"
            );
            return failed();
        }

        let cost_usd = self.cost_of(event, &draft);
        state.apply_reply(ReplyCommit {
            event_id: event.id.clone(),
            priority: approval.priority,
            burst: approval.burst,
            hourly_capped: counts_toward_hourly_cap(approval.priority, approval.mode),
            cost_usd,
            at: now,
        });
        let commit = self.commit(state, &event.id, now).await;

        info!(
            event_name = "pipeline.reply_committed",
            event_id = %event.id,
            cost_usd = %cost_usd,
            spent_usd = %state.spent_usd,
            calls_today = state.calls_today,
            burst = ?approval.burst,
            persisted = commit.is_ok(),
            "reply sent and recorded"
        );

        let decision = Decision::reply(event.id.clone(), approval.priority)
            .with_budget(BudgetSnapshot::capture(state, &self.policy));
        (decision, commit)
    }

    /// Saves `state`, retrying with the executor's backoff. Gives up after
    /// `max_retries` retries or when shutdown interrupts a wait.
    async fn commit(
        &self,
        state: &State,
        event_id: &EventId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let policy = self.executor.policy();
        let mut attempt = 0;
        loop {
            let store_error = match self.store.save(state) {
                Ok(()) => {
                    if attempt > 0 {
                        info!(
                            event_name = "pipeline.commit_recovered",
                            event_id = %event_id,
                            retry_count = attempt,
                            "state saved after retry"
                        );
                    }
                    return Ok(());
                }
                Err(store_error) => store_error,
            };

            warn!(
                event_name = "pipeline.commit_failed",
                event_id = %event_id,
                retry_count = attempt,
                error = %store_error,
                "state save failed"
            );
            self.audit.record_error(
                ErrorRecord::new(
                    Some(event_id.clone()),
                    "state_commit_failed",
                    store_error.to_string(),
                    now,
                )
                .with_retry_count(attempt),
            );

            if attempt >= policy.max_retries || !self.executor.pause(policy.backoff(attempt)).await
            {
                return Err(store_error);
            }
            attempt += 1;
        }
    }

    /// Holds the call until `min_seconds_between_calls` has passed since the
    /// previous one. Returns `false` if shutdown interrupted the wait.
    async fn space_out_call(&self, state: &State, now: DateTime<Utc>) -> bool {
        let Some(last_call) = state.last_call_timestamp else {
            return true;
        };
        let since_last = (now - last_call).to_std().unwrap_or_default();
        let remaining = self.policy.min_seconds_between_calls().saturating_sub(since_last);
        self.executor.pause(remaining).await
    }

    fn cost_of(&self, event: &Event, draft: &ReplyDraft) -> Decimal {
        let usage = match draft.usage {
            Some(usage) if !usage.is_empty() => usage,
            _ => self.cost_model.estimate_usage(&event.text, &draft.text),
        };
        self.cost_model.cost_usd(usage)
    }
}
