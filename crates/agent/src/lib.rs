//! Agent runtime: the collaborators around the decision engine.
//!
//! - `source` reads inbound events (JSONL file feed)
//! - `composer` drafts replies in the mode the classifier chose
//! - `guardrails` screens drafts before they leave the process
//! - `sender` delivers replies (dry-run JSONL outbox)
//! - `runtime` drives one-shot batches and the polling daemon
//!
//! Every verdict comes from `tollgate_core`; nothing here decides whether an
//! event deserves a reply.

pub mod composer;
pub mod guardrails;
pub mod runtime;
pub mod sender;
pub mod source;

pub use composer::TemplateComposer;
pub use guardrails::{GuardedComposer, OutboundGuardrails};
pub use runtime::{AgentRuntime, CycleStats, RuntimeError, RuntimeSettings};
pub use sender::DryRunSender;
pub use source::{EventSource, JsonlEventSource, SourceError};
