use std::sync::Arc;

use chrono::Utc;
use clap::ValueEnum;
use serde::Serialize;
use tollgate_core::config::LoadOptions;
use tollgate_core::{JsonlAuditSink, StateStore};

use crate::commands::{load_config, CommandResult, EXIT_STATE};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ClearScope {
    /// Day and hour counters; the replied-event ledger is kept.
    Counters,
    /// The replied-event ledger only.
    Dedup,
    All,
}

impl ClearScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counters => "counters",
            Self::Dedup => "dedup",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Serialize)]
struct ClearSummary {
    scope: &'static str,
    day_key: String,
    hour_key: String,
    calls_today: u32,
    replied_events: usize,
}

pub fn run(options: &LoadOptions, scope: ClearScope) -> CommandResult {
    let config = match load_config("clear", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let store = StateStore::new(&config.storage.state_path)
        .with_audit(Arc::new(JsonlAuditSink::new(&config.storage.log_dir)));
    let now = Utc::now();
    let cleared = match scope {
        ClearScope::Counters => store.clear_counters(now),
        ClearScope::Dedup => store.clear_dedup(now),
        ClearScope::All => store.clear_all(now),
    };

    match cleared {
        Ok(state) => {
            tracing::info!(
                event_name = "cli.clear.applied",
                scope = scope.as_str(),
                state_path = %store.path().display(),
                "operator cleared state"
            );
            let summary = ClearSummary {
                scope: scope.as_str(),
                day_key: state.day_key.clone(),
                hour_key: state.hour_key.clone(),
                calls_today: state.calls_today,
                replied_events: state.replied_event_ids.len(),
            };
            CommandResult::success_with_data(
                "clear",
                format!("cleared {} in `{}`", scope.as_str(), store.path().display()),
                summary,
            )
        }
        Err(error) => CommandResult::failure("clear", "state_store", error.to_string(), EXIT_STATE),
    }
}
