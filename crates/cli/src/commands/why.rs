use tollgate_core::config::LoadOptions;
use tollgate_core::{Action, DecisionRecord, EventId, JsonlAuditSink};

use crate::commands::{load_config, CommandResult, EXIT_AUDIT_LOG, EXIT_FAILURE};

pub fn run(options: &LoadOptions, event_id: &str) -> CommandResult {
    let event_id = EventId::new(event_id.trim());
    if event_id.is_blank() {
        return CommandResult::failure("why", "invalid_argument", "event id is empty", EXIT_FAILURE);
    }

    let config = match load_config("why", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let sink = JsonlAuditSink::new(&config.storage.log_dir);
    match sink.latest_decision(&event_id) {
        Ok(Some(record)) => CommandResult::success_with_data("why", explain(&record), &record),
        Ok(None) => CommandResult::failure(
            "why",
            "not_found",
            format!(
                "no decision recorded for `{event_id}` in `{}`",
                sink.decisions_path().display()
            ),
            EXIT_FAILURE,
        ),
        Err(error) => CommandResult::failure(
            "why",
            "audit_log",
            format!("could not read `{}`: {error}", sink.decisions_path().display()),
            EXIT_AUDIT_LOG,
        ),
    }
}

fn explain(record: &DecisionRecord) -> String {
    let decision = &record.decision;
    let priority = decision.priority.as_str();
    let at = record.recorded_at.to_rfc3339();

    match (decision.action, decision.reason) {
        (Action::Reply, _) => {
            format!("replied to `{}` at priority {priority} ({at})", decision.event_id)
        }
        (Action::Skip, Some(reason)) => format!(
            "skipped `{}` at priority {priority} ({at}): {reason}, {}",
            decision.event_id,
            reason.explanation()
        ),
        (Action::Skip, None) => {
            format!("skipped `{}` at priority {priority} ({at})", decision.event_id)
        }
    }
}
