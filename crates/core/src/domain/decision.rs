use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::event::EventId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Reply,
    Skip,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reply => "REPLY",
            Self::Skip => "SKIP",
        }
    }
}

/// Stable, machine-readable skip reasons. The serialized names are part of the
/// decision log format and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    InvalidEvent,
    DuplicateEvent,
    BudgetExhausted,
    DailyCallsCap,
    SoftCapP2Blocked,
    SchedulerPacedWait,
    SchedulerDailyCallsCap,
    RelevanceFiltered,
    ReplyFailed,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidEvent => "invalid_event",
            Self::DuplicateEvent => "duplicate_event",
            Self::BudgetExhausted => "budget_exhausted",
            Self::DailyCallsCap => "daily_calls_cap",
            Self::SoftCapP2Blocked => "soft_cap_p2_blocked",
            Self::SchedulerPacedWait => "scheduler_paced_wait",
            Self::SchedulerDailyCallsCap => "scheduler_daily_calls_cap",
            Self::RelevanceFiltered => "relevance_filtered",
            Self::ReplyFailed => "reply_failed",
        }
    }

    pub fn explanation(self) -> &'static str {
        match self {
            Self::InvalidEvent => "the event carried no usable id",
            Self::DuplicateEvent => "a reply to this event was already sent",
            Self::BudgetExhausted => "today's spend reached the daily budget",
            Self::DailyCallsCap => "today's call count reached the daily maximum",
            Self::SoftCapP2Blocked => "spend passed the soft cap, low-priority replies are paused",
            Self::SchedulerPacedWait => "the pacing schedule has not earned another call yet",
            Self::SchedulerDailyCallsCap => "the scheduler has no calls left for today",
            Self::RelevanceFiltered => "the event is off-topic for the configured keywords",
            Self::ReplyFailed => "composing or sending the reply failed",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    #[serde(with = "rust_decimal::serde::float")]
    pub spent_usd: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub daily_budget_usd: Decimal,
    pub calls_today: u32,
    pub max_calls_per_day: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub soft_cap_threshold: Option<Decimal>,
    /// Serialized as `soft_cap_percentage`, the name decision logs carry.
    #[serde(
        rename = "soft_cap_percentage",
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub soft_cap_fraction: Option<Decimal>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub wait_seconds: u64,
}

/// The skip verdict of a single pipeline stage, before it is bound to an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageSkip {
    pub reason: ReasonCode,
    pub budget: Option<BudgetSnapshot>,
    pub scheduler: Option<SchedulerSnapshot>,
}

impl StageSkip {
    pub fn new(reason: ReasonCode) -> Self {
        Self { reason, budget: None, scheduler: None }
    }

    pub fn with_budget(mut self, budget: BudgetSnapshot) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerSnapshot) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

/// Outcome of running one event through the pipeline. Built once, then only
/// logged and returned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub event_id: EventId,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerSnapshot>,
}

impl Decision {
    pub fn reply(event_id: EventId, priority: Priority) -> Self {
        Self { event_id, action: Action::Reply, reason: None, priority, budget: None, scheduler: None }
    }

    pub fn skip(event_id: EventId, priority: Priority, reason: ReasonCode) -> Self {
        Self {
            event_id,
            action: Action::Skip,
            reason: Some(reason),
            priority,
            budget: None,
            scheduler: None,
        }
    }

    pub fn from_stage(event_id: EventId, priority: Priority, skip: StageSkip) -> Self {
        Self {
            event_id,
            action: Action::Skip,
            reason: Some(skip.reason),
            priority,
            budget: skip.budget,
            scheduler: skip.scheduler,
        }
    }

    pub fn with_budget(mut self, budget: BudgetSnapshot) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn is_reply(&self) -> bool {
        self.action == Action::Reply
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{BudgetSnapshot, Decision, EventId, Priority, ReasonCode, StageSkip};

    #[test]
    fn skip_decision_serializes_stable_reason_names() {
        let decision = Decision::from_stage(
            EventId::new("evt-9"),
            Priority::P2,
            StageSkip::new(ReasonCode::SoftCapP2Blocked).with_budget(BudgetSnapshot {
                spent_usd: Decimal::new(85, 2),
                daily_budget_usd: Decimal::ONE,
                calls_today: 12,
                max_calls_per_day: 200,
                soft_cap_threshold: Some(Decimal::new(80, 2)),
                soft_cap_fraction: Some(Decimal::new(80, 2)),
            }),
        );

        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "SKIP");
        assert_eq!(json["reason"], "soft_cap_p2_blocked");
        assert_eq!(json["priority"], "P2");
        assert_eq!(json["budget"]["spent_usd"], 0.85);
        assert_eq!(json["budget"]["soft_cap_threshold"], 0.8);
        assert_eq!(json["budget"]["soft_cap_percentage"], 0.8);
        assert!(json["budget"].get("soft_cap_fraction").is_none());
        assert!(json.get("scheduler").is_none());
    }

    #[test]
    fn reply_decision_omits_reason() {
        let decision = Decision::reply(EventId::new("evt-1"), Priority::P0);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "REPLY");
        assert!(json.get("reason").is_none());
        assert!(decision.is_reply());
    }
}
