use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::decision::Decision;
use crate::domain::event::EventId;
use crate::domain::state::State;

pub const DECISIONS_FILE: &str = "decisions.jsonl";
pub const ERRORS_FILE: &str = "errors.jsonl";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub record_id: String,
    #[serde(flatten)]
    pub decision: Decision,
    pub day_key: String,
    pub hour_key: String,
    pub recorded_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(decision: Decision, state: &State, recorded_at: DateTime<Utc>) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            decision,
            day_key: state.day_key.clone(),
            hour_key: state.hour_key.clone(),
            recorded_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub event_id: Option<EventId>,
    pub error_kind: String,
    pub message: String,
    pub retry_count: u32,
    pub resolved: bool,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        event_id: Option<EventId>,
        error_kind: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            error_kind: error_kind.into(),
            message: message.into(),
            retry_count: 0,
            resolved: false,
            timestamp,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn resolved(mut self) -> Self {
        self.resolved = true;
        self
    }
}

/// Append-only audit trail. Implementations must not fail the caller; write
/// problems are reported through tracing.
pub trait AuditSink: Send + Sync {
    fn record_decision(&self, record: DecisionRecord);
    fn record_error(&self, record: ErrorRecord);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    decisions: Arc<Mutex<Vec<DecisionRecord>>>,
    errors: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl InMemoryAuditSink {
    pub fn decisions(&self) -> Vec<DecisionRecord> {
        match self.decisions.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        match self.errors.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record_decision(&self, record: DecisionRecord) {
        match self.decisions.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }

    fn record_error(&self, record: ErrorRecord) {
        match self.errors.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Writes `decisions.jsonl` and `errors.jsonl` under a log directory.
#[derive(Clone, Debug)]
pub struct JsonlAuditSink {
    decisions_path: PathBuf,
    errors_path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        let log_dir = log_dir.as_ref();
        Self {
            decisions_path: log_dir.join(DECISIONS_FILE),
            errors_path: log_dir.join(ERRORS_FILE),
        }
    }

    pub fn decisions_path(&self) -> &Path {
        &self.decisions_path
    }

    pub fn errors_path(&self) -> &Path {
        &self.errors_path
    }

    /// Latest logged decision for `event_id`. Unreadable lines are skipped.
    pub fn latest_decision(&self, event_id: &EventId) -> io::Result<Option<DecisionRecord>> {
        let file = match fs::File::open(&self.decisions_path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };

        let mut latest = None;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<DecisionRecord>(&line) {
                if &record.decision.event_id == event_id {
                    latest = Some(record);
                }
            }
        }
        Ok(latest)
    }

    fn append<T: Serialize>(&self, path: &Path, record: &T) {
        if let Err(error) = append_json_line(path, record) {
            warn!(
                event_name = "audit.write_failed",
                path = %path.display(),
                error = %error,
                "could not append audit record"
            );
        }
    }
}

impl AuditSink for JsonlAuditSink {
    fn record_decision(&self, record: DecisionRecord) {
        self.append(&self.decisions_path, &record);
    }

    fn record_error(&self, record: ErrorRecord) {
        self.append(&self.errors_path, &record);
    }
}

pub fn append_json_line<T: Serialize>(path: &Path, record: &T) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(record).map_err(io::Error::other)?;
    line.push('\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}
