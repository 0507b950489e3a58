use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::decision::Priority;
use crate::domain::event::EventId;
use crate::scheduler::BurstClass;

pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

pub fn hour_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d-%H").to_string()
}

/// Durable agent state. Counters are scoped to the UTC day in `day_key`, except
/// `p2_replies_this_hour` which is scoped to `hour_key`. The dedup ledger
/// survives every window rollover.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    pub day_key: String,
    pub hour_key: String,
    pub calls_today: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub spent_usd: Decimal,
    pub burst_used_p0: u32,
    pub burst_used_p1: u32,
    pub p2_replies_this_hour: u32,
    pub last_call_timestamp: Option<DateTime<Utc>>,
    pub last_run_timestamp: Option<DateTime<Utc>>,
    pub replied_event_ids: BTreeSet<EventId>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowRollover {
    pub day: bool,
    pub hour: bool,
}

/// Bookkeeping for one confirmed reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyCommit {
    pub event_id: EventId,
    pub priority: Priority,
    pub burst: Option<BurstClass>,
    /// Counts against `max_replies_per_hour_p2`.
    pub hourly_capped: bool,
    pub cost_usd: Decimal,
    pub at: DateTime<Utc>,
}

impl State {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self { day_key: day_key(now), hour_key: hour_key(now), ..Self::default() }
    }

    /// Zeroes the day counters when `now` falls in a different UTC day and the
    /// hourly counter when it falls in a different UTC hour.
    pub fn advance_windows(&mut self, now: DateTime<Utc>) -> WindowRollover {
        let mut rollover = WindowRollover::default();

        let today = day_key(now);
        if self.day_key != today {
            self.day_key = today;
            self.calls_today = 0;
            self.spent_usd = Decimal::ZERO;
            self.burst_used_p0 = 0;
            self.burst_used_p1 = 0;
            rollover.day = true;
        }

        let this_hour = hour_key(now);
        if self.hour_key != this_hour {
            self.hour_key = this_hour;
            self.p2_replies_this_hour = 0;
            rollover.hour = true;
        }

        rollover
    }

    pub fn has_replied(&self, event_id: &EventId) -> bool {
        self.replied_event_ids.contains(event_id)
    }

    pub fn mark_replied(&mut self, event_id: EventId) {
        self.replied_event_ids.insert(event_id);
    }

    pub fn apply_reply(&mut self, commit: ReplyCommit) {
        self.calls_today = self.calls_today.saturating_add(1);
        self.spent_usd += commit.cost_usd.max(Decimal::ZERO);
        match commit.burst {
            Some(BurstClass::P0) => self.burst_used_p0 = self.burst_used_p0.saturating_add(1),
            Some(BurstClass::P1) => self.burst_used_p1 = self.burst_used_p1.saturating_add(1),
            None => {}
        }
        if commit.hourly_capped {
            self.p2_replies_this_hour = self.p2_replies_this_hour.saturating_add(1);
        }
        self.last_call_timestamp = Some(commit.at);
        self.mark_replied(commit.event_id);
    }

    /// Resets spend, call and burst counters. The dedup ledger is kept.
    pub fn clear_counters(&mut self, now: DateTime<Utc>) {
        let replied = std::mem::take(&mut self.replied_event_ids);
        let last_run = self.last_run_timestamp;
        *self = Self::fresh(now);
        self.replied_event_ids = replied;
        self.last_run_timestamp = last_run;
    }

    pub fn clear_dedup(&mut self) {
        self.replied_event_ids.clear();
    }

    pub fn clear_all(&mut self, now: DateTime<Utc>) {
        *self = Self::fresh(now);
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        if self.spent_usd < Decimal::ZERO {
            return Err(format!("spent_usd is negative ({})", self.spent_usd));
        }
        Ok(())
    }
}

/// Pure form of [`State::advance_windows`].
pub fn ensure_current_windows(mut state: State, now: DateTime<Utc>) -> State {
    state.advance_windows(now);
    state
}
