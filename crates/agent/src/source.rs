use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use tollgate_core::{Event, EventId, EventKind};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not read event feed `{path}`: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("acknowledged event `{0}` was never fetched")]
    UnknownAck(EventId),
}

/// Inbound event feed. Fetched events stay pending until acknowledged, in
/// fetch order.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch(&self, limit: usize) -> Result<Vec<Event>, SourceError>;
    async fn acknowledge(&self, event: &Event) -> Result<(), SourceError>;
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    id: String,
    #[serde(alias = "type")]
    kind: EventKind,
    #[serde(default)]
    author: String,
    #[serde(default)]
    text: String,
    #[serde(alias = "ts")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Cursor {
    next_line: usize,
    pending: VecDeque<(EventId, usize)>,
}

/// Reads one JSON event per line. Malformed lines are logged and skipped.
#[derive(Debug)]
pub struct JsonlEventSource {
    path: PathBuf,
    cursor: Mutex<Cursor>,
}

impl JsonlEventSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cursor: Mutex::new(Cursor::default()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSource for JsonlEventSource {
    async fn fetch(&self, limit: usize) -> Result<Vec<Event>, SourceError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(SourceError::Read { path: self.path.clone(), source }),
        };

        let mut cursor = self.cursor.lock().await;
        cursor.pending.clear();

        let mut events = Vec::new();
        for (index, line) in raw.lines().enumerate().skip(cursor.next_line) {
            if events.len() >= limit {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawEvent>(line) {
                Ok(raw_event) => {
                    let event = Event::new(
                        raw_event.id,
                        raw_event.kind,
                        raw_event.author,
                        raw_event.text,
                        raw_event.timestamp.unwrap_or_else(Utc::now),
                    );
                    cursor.pending.push_back((event.id.clone(), index + 1));
                    events.push(event);
                }
                Err(error) => warn!(
                    event_name = "source.malformed_line",
                    path = %self.path.display(),
                    line = index + 1,
                    error = %error,
                    "skipping unreadable event line"
                ),
            }
        }

        Ok(events)
    }

    async fn acknowledge(&self, event: &Event) -> Result<(), SourceError> {
        let mut cursor = self.cursor.lock().await;
        match cursor.pending.pop_front() {
            Some((id, next_line)) if id == event.id => {
                cursor.next_line = next_line;
                Ok(())
            }
            _ => Err(SourceError::UnknownAck(event.id.clone())),
        }
    }
}
