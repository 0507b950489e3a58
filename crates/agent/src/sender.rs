use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use tollgate_core::audit::append_json_line;
use tollgate_core::{CallError, CallErrorKind, Event, EventId, ReplyDraft, ReplySender};

pub const OUTBOX_FILE: &str = "replies_outbound.jsonl";

#[derive(Debug, Serialize)]
struct OutboundReply<'a> {
    event_id: &'a EventId,
    author: &'a str,
    text: &'a str,
    dry_run: bool,
    recorded_at: DateTime<Utc>,
}

/// Records replies to a local outbox instead of posting them.
#[derive(Clone, Debug)]
pub struct DryRunSender {
    outbox: PathBuf,
}

impl DryRunSender {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self { outbox: outbox.into() }
    }

    pub fn in_dir(log_dir: impl AsRef<Path>) -> Self {
        Self::new(log_dir.as_ref().join(OUTBOX_FILE))
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }
}

#[async_trait]
impl ReplySender for DryRunSender {
    async fn send(&self, event: &Event, draft: &ReplyDraft) -> Result<(), CallError> {
        let record = OutboundReply {
            event_id: &event.id,
            author: &event.author,
            text: &draft.text,
            dry_run: true,
            recorded_at: Utc::now(),
        };
        append_json_line(&self.outbox, &record).map_err(|error| {
            CallError::new(
                CallErrorKind::Other,
                format!("could not write outbox `{}`: {error}", self.outbox.display()),
            )
        })?;

        info!(
            event_name = "sender.dry_run",
            event_id = %event.id,
            outbox = %self.outbox.display(),
            "reply recorded to outbox"
        );
        Ok(())
    }
}
