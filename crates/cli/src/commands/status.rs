use chrono::{DateTime, Utc};
use serde::Serialize;
use tollgate_core::budget::spent_percent;
use tollgate_core::config::LoadOptions;
use tollgate_core::domain::state::ensure_current_windows;
use tollgate_core::store::StateHealth;
use tollgate_core::{Policy, State, StateStore};

use crate::commands::{load_config, CommandResult, EXIT_CONFIG, EXIT_STATE};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub state_file: &'static str,
    pub day_key: String,
    pub hour_key: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub spent_usd: rust_decimal::Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub daily_budget_usd: rust_decimal::Decimal,
    pub spent_percent: u32,
    pub calls_today: u32,
    pub max_calls_per_day: u32,
    pub burst_used_p0: u32,
    pub burst_used_p1: u32,
    pub p2_replies_this_hour: u32,
    pub max_replies_per_hour_p2: u32,
    pub replied_events: usize,
    pub last_call_timestamp: Option<DateTime<Utc>>,
    pub last_run_timestamp: Option<DateTime<Utc>>,
}

impl StatusReport {
    fn new(state: &State, policy: &Policy, state_file: &'static str) -> Self {
        Self {
            state_file,
            day_key: state.day_key.clone(),
            hour_key: state.hour_key.clone(),
            spent_usd: state.spent_usd,
            daily_budget_usd: policy.daily_budget_usd(),
            spent_percent: spent_percent(state, policy),
            calls_today: state.calls_today,
            max_calls_per_day: policy.max_calls_per_day(),
            burst_used_p0: state.burst_used_p0,
            burst_used_p1: state.burst_used_p1,
            p2_replies_this_hour: state.p2_replies_this_hour,
            max_replies_per_hour_p2: policy.max_replies_per_hour_p2(),
            replied_events: state.replied_event_ids.len(),
            last_call_timestamp: state.last_call_timestamp,
            last_run_timestamp: state.last_run_timestamp,
        }
    }
}

/// Read-only: windows are advanced in memory for display, never saved.
pub fn run(options: &LoadOptions, json_output: bool) -> CommandResult {
    let config = match load_config("status", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let policy = match config.policy() {
        Ok(policy) => policy,
        Err(error) => {
            return CommandResult::failure(
                "status",
                "config_validation",
                error.to_string(),
                EXIT_CONFIG,
            );
        }
    };

    let now = Utc::now();
    let store = StateStore::new(&config.storage.state_path);
    let report = match store.inspect() {
        Ok(StateHealth::Missing) => StatusReport::new(&State::fresh(now), &policy, "missing"),
        Ok(StateHealth::Valid(state)) => {
            StatusReport::new(&ensure_current_windows(*state, now), &policy, "present")
        }
        Ok(StateHealth::Corrupt(reason)) => {
            return CommandResult::failure(
                "status",
                "state_corrupt",
                format!(
                    "state file `{}` is unreadable ({reason}); the next run quarantines it",
                    store.path().display()
                ),
                EXIT_STATE,
            );
        }
        Err(error) => {
            return CommandResult::failure("status", "state_store", error.to_string(), EXIT_STATE);
        }
    };

    if json_output {
        let message = format!(
            "spent {}% of the daily budget over {} calls",
            report.spent_percent, report.calls_today
        );
        return CommandResult::success_with_data("status", message, &report);
    }

    CommandResult::plain(render_human(&report))
}

fn render_human(report: &StatusReport) -> String {
    let timestamp = |value: Option<DateTime<Utc>>| {
        value.map(|value| value.to_rfc3339()).unwrap_or_else(|| "never".to_string())
    };

    [
        format!("status for {} (hour {})", report.day_key, report.hour_key),
        format!(
            "- budget: ${} of ${} ({}%)",
            report.spent_usd, report.daily_budget_usd, report.spent_percent
        ),
        format!("- calls: {} of {}", report.calls_today, report.max_calls_per_day),
        format!("- burst used: p0 {}, p1 {}", report.burst_used_p0, report.burst_used_p1),
        format!(
            "- p2 replies this hour: {} of {}",
            report.p2_replies_this_hour, report.max_replies_per_hour_p2
        ),
        format!("- replied events: {}", report.replied_events),
        format!("- last call: {}", timestamp(report.last_call_timestamp)),
        format!("- last run: {}", timestamp(report.last_run_timestamp)),
        format!("- state file: {}", report.state_file),
    ]
    .join("\n")
}
