pub mod audit;
pub mod budget;
pub mod classify;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod pipeline;
pub mod policy;
pub mod pricing;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod store;

pub use audit::{AuditSink, DecisionRecord, ErrorRecord, InMemoryAuditSink, JsonlAuditSink};
pub use classify::{Classification, ReplyMode};
pub use clock::{Clock, FixedClock, RecordingSleeper, Sleeper, SystemClock, TokioSleeper};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::decision::{Action, BudgetSnapshot, Decision, Priority, ReasonCode};
pub use domain::event::{Event, EventId, EventKind};
pub use domain::state::State;
pub use errors::{CallError, CallErrorKind, PipelineError, StoreError};
pub use pipeline::{DecisionPipeline, ReplyComposer, ReplyDraft, ReplySender};
pub use policy::{Policy, PolicySettings};
pub use pricing::{CostModel, TokenUsage};
pub use retry::{RetryExecutor, RetryPolicy};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use store::StateStore;
