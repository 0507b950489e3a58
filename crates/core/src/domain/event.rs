use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Post,
    Comment,
    Mention,
    #[serde(alias = "dm", alias = "direct-message")]
    DirectMessage,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Mention => "mention",
            Self::DirectMessage => "direct_message",
        }
    }

    /// Mentions and direct messages address the agent personally.
    pub fn is_direct(self) -> bool {
        matches!(self, Self::Mention | Self::DirectMessage)
    }
}

/// An inbound item from the platform. Its `id` is the deduplication key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub kind: EventKind,
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        kind: EventKind,
        author: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self { id: EventId(id.into()), kind, author: author.into(), text: text.into(), timestamp }
    }

    pub fn is_question(&self) -> bool {
        self.text.trim_end().ends_with('?')
    }
}
