//! Daily pacer. Allowed calls follow a straight line from midnight to midnight
//! UTC; P0 and P1 may run ahead of the line on a small burst allowance.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ReplyMode;
use crate::domain::decision::{Priority, ReasonCode, SchedulerSnapshot, StageSkip};
use crate::domain::state::State;
use crate::policy::Policy;

pub const DAY_SECONDS: u64 = 86_400;
const HOUR_SECONDS: u64 = 3_600;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BurstClass {
    P0,
    P1,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaceVerdict {
    /// Pacing is switched off.
    Disabled,
    WithinPace,
    Burst(BurstClass),
    Denied(StageSkip),
}

impl PaceVerdict {
    pub fn burst(&self) -> Option<BurstClass> {
        match self {
            Self::Burst(class) => Some(*class),
            _ => None,
        }
    }

    pub fn into_skip(self) -> Option<StageSkip> {
        match self {
            Self::Denied(skip) => Some(skip),
            _ => None,
        }
    }
}

pub fn elapsed_seconds_today(now: DateTime<Utc>) -> u64 {
    u64::from(now.num_seconds_from_midnight())
}

/// `floor(elapsed / 86400 * max_calls)`, computed in integers.
pub fn earned_calls(elapsed_seconds: u64, max_calls_per_day: u32) -> u64 {
    elapsed_seconds.min(DAY_SECONDS) * u64::from(max_calls_per_day) / DAY_SECONDS
}

/// Seconds until the pace line earns call number `calls_today + 1`.
pub fn paced_wait_seconds(calls_today: u32, max_calls_per_day: u32, elapsed_seconds: u64) -> u64 {
    if max_calls_per_day == 0 {
        return DAY_SECONDS.saturating_sub(elapsed_seconds);
    }
    let max = u64::from(max_calls_per_day);
    let next_call_at = (u64::from(calls_today) + 1) * DAY_SECONDS;
    let due = next_call_at.div_ceil(max);
    due.saturating_sub(elapsed_seconds)
}

pub fn seconds_until_next_hour(now: DateTime<Utc>) -> u64 {
    let into_hour = u64::from(now.minute()) * 60 + u64::from(now.second());
    HOUR_SECONDS - into_hour
}

fn paced(wait_seconds: u64) -> PaceVerdict {
    PaceVerdict::Denied(
        StageSkip::new(ReasonCode::SchedulerPacedWait)
            .with_scheduler(SchedulerSnapshot { wait_seconds }),
    )
}

pub fn evaluate_pace(
    state: &State,
    policy: &Policy,
    priority: Priority,
    now: DateTime<Utc>,
) -> PaceVerdict {
    let scheduler = policy.scheduler();
    if !scheduler.enabled {
        return PaceVerdict::Disabled;
    }

    let max_calls = policy.max_calls_per_day();
    if state.calls_today >= max_calls {
        return PaceVerdict::Denied(StageSkip::new(ReasonCode::SchedulerDailyCallsCap));
    }

    let elapsed = elapsed_seconds_today(now);
    if u64::from(state.calls_today) < earned_calls(elapsed, max_calls) {
        return PaceVerdict::WithinPace;
    }

    match priority {
        Priority::P0 if state.burst_used_p0 < scheduler.burst_p0 => {
            PaceVerdict::Burst(BurstClass::P0)
        }
        Priority::P1 if state.burst_used_p1 < scheduler.burst_p1 => {
            PaceVerdict::Burst(BurstClass::P1)
        }
        _ => paced(paced_wait_seconds(state.calls_today, max_calls, elapsed)),
    }
}

/// Only normal-mode P2 replies are capped per hour; redirects are not.
pub fn counts_toward_hourly_cap(priority: Priority, mode: ReplyMode) -> bool {
    priority == Priority::P2 && mode == ReplyMode::Normal
}

/// Paces a capped P2 reply until the next UTC hour once the hourly allowance
/// is used. Applies whether or not the daily pacer is enabled.
pub fn check_hourly_cap(
    state: &State,
    policy: &Policy,
    priority: Priority,
    mode: ReplyMode,
    now: DateTime<Utc>,
) -> Option<StageSkip> {
    if !counts_toward_hourly_cap(priority, mode) {
        return None;
    }
    if state.p2_replies_this_hour < policy.max_replies_per_hour_p2() {
        return None;
    }
    paced(seconds_until_next_hour(now)).into_skip()
}
