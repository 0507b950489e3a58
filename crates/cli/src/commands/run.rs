use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tollgate_agent::{
    AgentRuntime, CycleStats, DryRunSender, GuardedComposer, JsonlEventSource, OutboundGuardrails,
    RuntimeSettings, TemplateComposer,
};
use tollgate_core::config::{AppConfig, LoadOptions};
use tollgate_core::{
    shutdown_channel, AuditSink, CostModel, DecisionPipeline, JsonlAuditSink, Policy,
    RetryExecutor, StateStore,
};
use tracing::{info, warn};

use crate::commands::{load_config, CommandResult, EXIT_CONFIG, EXIT_RUNTIME, EXIT_RUNTIME_INIT};

#[derive(Clone, Copy, Debug, Default)]
pub struct RunArgs {
    pub once: bool,
    pub live: bool,
    pub interval_secs: Option<u64>,
}

pub fn run(options: &LoadOptions, args: RunArgs) -> CommandResult {
    let mut options = options.clone();
    if let Some(interval_secs) = args.interval_secs {
        options.overrides.poll_interval_secs = Some(interval_secs);
    }
    if args.live {
        options.overrides.dry_run = Some(false);
    }

    let config = match load_config("run", &options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let policy = match config.policy() {
        Ok(policy) => policy,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "config_validation",
                format!("policy rejected: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME_INIT,
            );
        }
    };

    match runtime.block_on(execute(config, policy, args.once)) {
        Ok(stats) => CommandResult::success_with_data(
            "run",
            format!(
                "fetched {} events: {} replied, {} skipped, {} errors",
                stats.fetched, stats.replied, stats.skipped, stats.errors
            ),
            stats,
        ),
        Err(error) => CommandResult::failure("run", "runtime", format!("{error:#}"), EXIT_RUNTIME),
    }
}

async fn execute(config: AppConfig, policy: Policy, once: bool) -> anyhow::Result<CycleStats> {
    if !config.runner.dry_run {
        warn!(
            event_name = "cli.run.live_unavailable",
            "no live sender is configured; replies are recorded to the dry-run outbox"
        );
    }

    let audit: Arc<dyn AuditSink> = Arc::new(JsonlAuditSink::new(&config.storage.log_dir));
    let (trigger, shutdown) = shutdown_channel();

    let store = StateStore::new(&config.storage.state_path).with_audit(audit.clone());
    let executor =
        RetryExecutor::new(config.retry.clone(), audit.clone()).with_shutdown(shutdown.clone());
    let composer = Arc::new(GuardedComposer::new(TemplateComposer, OutboundGuardrails::default()));
    let sender = Arc::new(DryRunSender::in_dir(&config.storage.log_dir));
    let pipeline = DecisionPipeline::new(policy, store, executor, composer, sender, audit.clone())
        .with_cost_model(CostModel::from_settings(&config.pricing));

    let source = Arc::new(JsonlEventSource::new(&config.runner.events_path));
    let settings = RuntimeSettings {
        batch_limit: config.runner.batch_limit,
        poll_interval: Duration::from_secs(config.runner.poll_interval_secs),
    };
    let agent = AgentRuntime::new(pipeline, source, audit, settings).with_shutdown(shutdown);

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(event_name = "cli.run.interrupt", "shutdown requested");
            trigger.trigger();
        }
    });

    let mode = if once { "once" } else { "daemon" };
    info!(
        event_name = "cli.run.start",
        mode,
        events_path = %config.runner.events_path.display(),
        state_path = %config.storage.state_path.display(),
        "agent starting"
    );

    let outcome = if once { agent.run_once().await } else { agent.run_daemon().await };
    ctrl_c.abort();

    outcome.context("agent run failed")
}
