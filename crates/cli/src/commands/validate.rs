use std::fs;
use std::path::Path;

use serde::Serialize;
use tollgate_core::config::{AppConfig, LoadOptions};
use tollgate_core::store::StateHealth;
use tollgate_core::StateStore;

use crate::commands::{escape_json, CommandResult, EXIT_CONFIG};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct ValidationCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl ValidationCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ValidationReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<ValidationCheck>,
}

/// Exits non-zero when any check fails.
pub fn run(options: &LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_CONFIG };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"validate serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: &LoadOptions) -> ValidationReport {
    let mut checks = Vec::new();

    match AppConfig::load(options.clone()) {
        Ok(config) => {
            checks.push(ValidationCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_fixed_rules(&config));
            checks.push(check_state_file(&config));
            checks.push(check_log_dir(&config.storage.log_dir));
        }
        Err(error) => {
            checks.push(ValidationCheck::fail("config_validation", error.to_string()));
            checks.push(ValidationCheck::skipped("policy_fixed_rules"));
            checks.push(ValidationCheck::skipped("state_file"));
            checks.push(ValidationCheck::skipped("log_dir_writable"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "validate: all checks passed".to_string()
    } else {
        "validate: one or more checks failed".to_string()
    };

    ValidationReport { overall_status, summary, checks }
}

fn check_fixed_rules(config: &AppConfig) -> ValidationCheck {
    match config.policy() {
        Ok(policy) => {
            let rules = policy.fixed_rules();
            ValidationCheck::pass(
                "policy_fixed_rules",
                format!(
                    "outbound language `{}`, operator language `{}`, credential disclosure blocked",
                    rules.outbound_language, rules.operator_language
                ),
            )
        }
        Err(error) => ValidationCheck::fail("policy_fixed_rules", error.to_string()),
    }
}

fn check_state_file(config: &AppConfig) -> ValidationCheck {
    let store = StateStore::new(&config.storage.state_path);
    let path = store.path().display().to_string();

    match store.inspect() {
        Ok(StateHealth::Missing) => {
            ValidationCheck::pass("state_file", format!("`{path}` not created yet"))
        }
        Ok(StateHealth::Valid(state)) => ValidationCheck::pass(
            "state_file",
            format!(
                "`{path}` is valid (day {}, {} replied events)",
                state.day_key,
                state.replied_event_ids.len()
            ),
        ),
        Ok(StateHealth::Corrupt(reason)) => ValidationCheck::fail(
            "state_file",
            format!("`{path}` is corrupt and will be quarantined on the next run: {reason}"),
        ),
        Err(error) => ValidationCheck::fail("state_file", error.to_string()),
    }
}

fn check_log_dir(log_dir: &Path) -> ValidationCheck {
    let scratch = fs::create_dir_all(log_dir).and_then(|()| tempfile::tempfile_in(log_dir));
    match scratch {
        Ok(_) => ValidationCheck::pass(
            "log_dir_writable",
            format!("`{}` accepts new files", log_dir.display()),
        ),
        Err(error) => ValidationCheck::fail(
            "log_dir_writable",
            format!("`{}` is not writable: {error}", log_dir.display()),
        ),
    }
}

fn render_human(report: &ValidationReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
