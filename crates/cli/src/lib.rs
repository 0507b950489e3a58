pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tollgate_core::config::{AppConfig, LoadOptions, LoggingConfig};

use crate::commands::clear::ClearScope;
use crate::commands::run::RunArgs;

#[derive(Debug, Parser)]
#[command(
    name = "tollgate",
    about = "Tollgate operator CLI",
    long_about = "Run the cost-bounded reply agent and inspect its budget, pacing state, and decision log.",
    after_help = "Examples:\n  tollgate run --once\n  tollgate status --json\n  tollgate why evt-42\n  tollgate clear counters"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Read configuration from this TOML file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Process pending events, once or as a polling daemon")]
    Run {
        #[arg(long, help = "Process a single batch and exit")]
        once: bool,
        #[arg(long, help = "Request live sending instead of the dry-run outbox")]
        live: bool,
        #[arg(long, value_name = "SECONDS", help = "Polling interval for daemon mode")]
        interval: Option<u64>,
    },
    #[command(about = "Show today's spend, call counters, and pacing windows")]
    Status {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Explain the latest decision recorded for an event")]
    Why {
        #[arg(value_name = "EVENT_ID")]
        event_id: String,
    },
    #[command(about = "Reset persisted counters, the replied-event ledger, or both")]
    Clear {
        #[arg(value_enum)]
        scope: ClearScope,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate configuration, fixed rules, state file, and log directory")]
    Validate {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Run { once, live, interval } => {
            commands::run::run(&options, RunArgs { once, live, interval_secs: interval })
        }
        Command::Status { json } => commands::status::run(&options, json),
        Command::Why { event_id } => commands::why::run(&options, &event_id),
        Command::Clear { scope } => commands::clear::run(&options, scope),
        Command::Config => commands::config::run(&options),
        Command::Validate { json } => commands::validate::run(&options, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a clean command payload.
fn init_logging(config: &LoggingConfig) {
    use tollgate_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}
