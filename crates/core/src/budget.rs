use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::domain::decision::{BudgetSnapshot, Priority, ReasonCode, StageSkip};
use crate::domain::state::State;
use crate::policy::{soft_cap_fraction, Policy};

impl BudgetSnapshot {
    pub fn capture(state: &State, policy: &Policy) -> Self {
        Self {
            spent_usd: state.spent_usd,
            daily_budget_usd: policy.daily_budget_usd(),
            calls_today: state.calls_today,
            max_calls_per_day: policy.max_calls_per_day(),
            soft_cap_threshold: None,
            soft_cap_fraction: None,
        }
    }
}

/// Absolute ceilings. Applies to every priority.
pub fn check_hard_cap(state: &State, policy: &Policy) -> Option<StageSkip> {
    let snapshot = || BudgetSnapshot::capture(state, policy);

    if state.spent_usd >= policy.daily_budget_usd() {
        return Some(StageSkip::new(ReasonCode::BudgetExhausted).with_budget(snapshot()));
    }
    if state.calls_today >= policy.max_calls_per_day() {
        return Some(StageSkip::new(ReasonCode::DailyCallsCap).with_budget(snapshot()));
    }
    None
}

/// Pauses P2 once spend reaches the soft-cap fraction of the budget.
pub fn check_soft_cap(state: &State, policy: &Policy, priority: Priority) -> Option<StageSkip> {
    if priority != Priority::P2 {
        return None;
    }

    let threshold = policy.soft_cap_threshold_usd();
    if state.spent_usd < threshold {
        return None;
    }

    let snapshot = BudgetSnapshot {
        soft_cap_threshold: Some(threshold),
        soft_cap_fraction: Some(soft_cap_fraction()),
        ..BudgetSnapshot::capture(state, policy)
    };
    Some(StageSkip::new(ReasonCode::SoftCapP2Blocked).with_budget(snapshot))
}

pub fn check_budget(state: &State, policy: &Policy, priority: Priority) -> Option<StageSkip> {
    check_hard_cap(state, policy).or_else(|| check_soft_cap(state, policy, priority))
}

/// Percentage of the daily budget already spent, rounded down.
pub fn spent_percent(state: &State, policy: &Policy) -> u32 {
    let budget = policy.daily_budget_usd();
    if budget.is_zero() {
        return 0;
    }
    (state.spent_usd * Decimal::ONE_HUNDRED / budget).floor().to_u32().unwrap_or(u32::MAX)
}
