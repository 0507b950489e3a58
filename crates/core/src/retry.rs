//! Bounded retry with exponential backoff for calls to external collaborators.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditSink, ErrorRecord};
use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::domain::event::EventId;
use crate::errors::{CallError, CallErrorKind};
use crate::shutdown::{sleep_unless_shutdown, ShutdownSignal};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Relative spread applied to each backoff delay, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 1_000, max_delay_ms: 30_000, jitter: 0.10 }
    }
}

impl RetryPolicy {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// `base * 2^attempt`, capped at `max_delay_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = self.jitter.min(0.99);
        let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
        delay.mul_f64(factor).min(self.max_delay())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    /// Retry after the collaborator-provided delay, or the normal backoff when
    /// none was given.
    RetryAfter(Option<Duration>),
    Terminal,
}

pub trait FailureClassifier: Send + Sync {
    fn classify(&self, error: &CallError) -> FailureClass;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StandardClassifier;

impl FailureClassifier for StandardClassifier {
    fn classify(&self, error: &CallError) -> FailureClass {
        match &error.kind {
            CallErrorKind::Connectivity | CallErrorKind::Timeout => FailureClass::Retryable,
            CallErrorKind::RateLimited { retry_after } => FailureClass::RetryAfter(*retry_after),
            CallErrorKind::Client
            | CallErrorKind::Guardrail
            | CallErrorKind::Cancelled
            | CallErrorKind::Other => FailureClass::Terminal,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CallContext<'a> {
    pub operation: &'static str,
    pub event_id: Option<&'a EventId>,
}

impl<'a> CallContext<'a> {
    pub fn new(operation: &'static str, event_id: Option<&'a EventId>) -> Self {
        Self { operation, event_id }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{operation} gave up after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub operation: &'static str,
    pub attempts: u32,
    pub terminal: bool,
    pub last_error: CallError,
}

pub struct RetryExecutor {
    policy: RetryPolicy,
    classifier: Arc<dyn FailureClassifier>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    shutdown: ShutdownSignal,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            policy,
            classifier: Arc::new(StandardClassifier),
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            audit,
            shutdown: ShutdownSignal::never(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Timestamps audit records.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Waits for `duration` on the executor's sleeper. Returns `false` if
    /// shutdown cut the wait short.
    pub async fn pause(&self, duration: Duration) -> bool {
        sleep_unless_shutdown(self.sleeper.as_ref(), duration, &self.shutdown).await
    }

    /// Runs `call` until it succeeds, fails terminally, or has been attempted
    /// `max_retries + 1` times. Delays between attempts never decrease and
    /// never exceed `max_delay_ms`.
    pub async fn execute<T, F, Fut>(
        &self,
        context: CallContext<'_>,
        mut call: F,
    ) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut previous_delay = Duration::ZERO;
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_requested() {
                let error = CallError::cancelled("shutdown requested before the attempt");
                self.record_failure(&context, &error, attempt);
                return Err(self.give_up(&context, attempt, true, error));
            }

            let error = match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.record_recovery(&context, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };
            self.record_failure(&context, &error, attempt);

            let delay = match self.classifier.classify(&error) {
                FailureClass::Terminal => {
                    return Err(self.give_up(&context, attempt + 1, true, error));
                }
                _ if attempt >= self.policy.max_retries => {
                    return Err(self.give_up(&context, attempt + 1, false, error));
                }
                FailureClass::RetryAfter(Some(requested)) => requested,
                FailureClass::Retryable | FailureClass::RetryAfter(None) => {
                    self.policy.jittered(self.policy.backoff(attempt))
                }
            };
            let delay = delay.max(previous_delay).min(self.policy.max_delay());
            previous_delay = delay;

            warn!(
                event_name = "retry.scheduled",
                operation = context.operation,
                event_id = context.event_id.map(EventId::as_str),
                attempt = attempt + 1,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "external call failed; retrying"
            );

            if !self.pause(delay).await {
                let cancelled = CallError::cancelled(format!("shutdown during backoff after: {error}"));
                self.record_failure(&context, &cancelled, attempt + 1);
                return Err(self.give_up(&context, attempt + 1, true, cancelled));
            }
            attempt += 1;
        }
    }

    fn record_failure(&self, context: &CallContext<'_>, error: &CallError, attempt: u32) {
        self.audit.record_error(
            ErrorRecord::new(
                context.event_id.cloned(),
                error.kind.as_str(),
                format!("{}: {}", context.operation, error.message),
                self.clock.now(),
            )
            .with_retry_count(attempt),
        );
    }

    fn record_recovery(&self, context: &CallContext<'_>, attempt: u32) {
        info!(
            event_name = "retry.recovered",
            operation = context.operation,
            event_id = context.event_id.map(EventId::as_str),
            retries = attempt,
            "external call succeeded after retrying"
        );
        self.audit.record_error(
            ErrorRecord::new(
                context.event_id.cloned(),
                "recovered",
                format!("{} succeeded after {attempt} retries", context.operation),
                self.clock.now(),
            )
            .with_retry_count(attempt)
            .resolved(),
        );
    }

    fn give_up(
        &self,
        context: &CallContext<'_>,
        attempts: u32,
        terminal: bool,
        last_error: CallError,
    ) -> RetryExhausted {
        warn!(
            event_name = "retry.exhausted",
            operation = context.operation,
            event_id = context.event_id.map(EventId::as_str),
            attempts,
            terminal,
            error = %last_error,
            "external call abandoned"
        );
        RetryExhausted { operation: context.operation, attempts, terminal, last_error }
    }
}
