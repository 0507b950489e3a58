use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::{Policy, PolicySettings};
use crate::pricing::PricingSettings;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["tollgate.toml", "config/tollgate.toml"];

/// Config key paths paired with the environment variable that overrides them.
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("policy.daily_budget_usd", "TOLLGATE_DAILY_BUDGET_USD"),
    ("policy.max_calls_per_day", "TOLLGATE_MAX_CALLS_PER_DAY"),
    ("policy.min_seconds_between_calls", "TOLLGATE_MIN_SECONDS_BETWEEN_CALLS"),
    ("policy.scheduler.enabled", "TOLLGATE_SCHEDULER_ENABLED"),
    ("policy.scheduler.burst_p0", "TOLLGATE_BURST_P0"),
    ("policy.scheduler.burst_p1", "TOLLGATE_BURST_P1"),
    ("policy.reply.max_replies_per_hour_p2", "TOLLGATE_MAX_REPLIES_PER_HOUR_P2"),
    ("policy.reply.offtopic_question_mode", "TOLLGATE_OFFTOPIC_QUESTION_MODE"),
    ("storage.state_path", "TOLLGATE_STATE_PATH"),
    ("storage.log_dir", "TOLLGATE_LOG_DIR"),
    ("retry.max_retries", "TOLLGATE_RETRY_MAX_RETRIES"),
    ("retry.base_delay_ms", "TOLLGATE_RETRY_BASE_DELAY_MS"),
    ("retry.max_delay_ms", "TOLLGATE_RETRY_MAX_DELAY_MS"),
    ("runner.events_path", "TOLLGATE_EVENTS_PATH"),
    ("runner.poll_interval_secs", "TOLLGATE_POLL_INTERVAL_SECS"),
    ("runner.batch_limit", "TOLLGATE_BATCH_LIMIT"),
    ("runner.dry_run", "TOLLGATE_DRY_RUN"),
    ("logging.level", "TOLLGATE_LOGGING_LEVEL"),
    ("logging.format", "TOLLGATE_LOGGING_FORMAT"),
];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppConfig {
    pub policy: PolicySettings,
    pub storage: StorageConfig,
    pub retry: RetryPolicy,
    pub runner: RunnerConfig,
    pub pricing: PricingSettings,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageConfig {
    pub state_path: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunnerConfig {
    pub events_path: PathBuf,
    pub poll_interval_secs: u64,
    pub batch_limit: usize,
    pub dry_run: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub state_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub events_path: Option<PathBuf>,
    pub poll_interval_secs: Option<u64>,
    pub dry_run: Option<bool>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            policy: PolicySettings::default(),
            storage: StorageConfig {
                state_path: PathBuf::from("agent_state.json"),
                log_dir: PathBuf::from("logs"),
            },
            retry: RetryPolicy::default(),
            runner: RunnerConfig {
                events_path: PathBuf::from("events.jsonl"),
                poll_interval_secs: 60,
                batch_limit: 20,
                dry_run: true,
            },
            pricing: PricingSettings::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = resolve_config_path(options.config_path.as_deref()) {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options
                .config_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// The validated policy the decision engine runs against.
    pub fn policy(&self) -> Result<Policy, ConfigError> {
        Policy::from_settings(&self.policy)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(policy) = patch.policy {
            self.policy = policy;
        }

        if let Some(storage) = patch.storage {
            if let Some(state_path) = storage.state_path {
                self.storage.state_path = state_path;
            }
            if let Some(log_dir) = storage.log_dir {
                self.storage.log_dir = log_dir;
            }
        }

        if let Some(retry) = patch.retry {
            self.retry = retry;
        }

        if let Some(runner) = patch.runner {
            if let Some(events_path) = runner.events_path {
                self.runner.events_path = events_path;
            }
            if let Some(poll_interval_secs) = runner.poll_interval_secs {
                self.runner.poll_interval_secs = poll_interval_secs;
            }
            if let Some(batch_limit) = runner.batch_limit {
                self.runner.batch_limit = batch_limit;
            }
            if let Some(dry_run) = runner.dry_run {
                self.runner.dry_run = dry_run;
            }
        }

        if let Some(pricing) = patch.pricing {
            self.pricing = pricing;
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TOLLGATE_DAILY_BUDGET_USD") {
            self.policy.daily_budget_usd = parse_env("TOLLGATE_DAILY_BUDGET_USD", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_MAX_CALLS_PER_DAY") {
            self.policy.max_calls_per_day = parse_env("TOLLGATE_MAX_CALLS_PER_DAY", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_MIN_SECONDS_BETWEEN_CALLS") {
            self.policy.min_seconds_between_calls =
                parse_env("TOLLGATE_MIN_SECONDS_BETWEEN_CALLS", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_SCHEDULER_ENABLED") {
            self.policy.scheduler.enabled = parse_env("TOLLGATE_SCHEDULER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_BURST_P0") {
            self.policy.scheduler.burst_p0 = parse_env("TOLLGATE_BURST_P0", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_BURST_P1") {
            self.policy.scheduler.burst_p1 = parse_env("TOLLGATE_BURST_P1", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_MAX_REPLIES_PER_HOUR_P2") {
            self.policy.reply.max_replies_per_hour_p2 =
                parse_env("TOLLGATE_MAX_REPLIES_PER_HOUR_P2", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_OFFTOPIC_QUESTION_MODE") {
            self.policy.reply.offtopic_question_mode = value.parse()?;
        }

        if let Some(value) = read_env("TOLLGATE_STATE_PATH") {
            self.storage.state_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("TOLLGATE_LOG_DIR") {
            self.storage.log_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("TOLLGATE_RETRY_MAX_RETRIES") {
            self.retry.max_retries = parse_env("TOLLGATE_RETRY_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env("TOLLGATE_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = parse_env("TOLLGATE_RETRY_MAX_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("TOLLGATE_EVENTS_PATH") {
            self.runner.events_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("TOLLGATE_POLL_INTERVAL_SECS") {
            self.runner.poll_interval_secs = parse_env("TOLLGATE_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_BATCH_LIMIT") {
            self.runner.batch_limit = parse_env("TOLLGATE_BATCH_LIMIT", &value)?;
        }
        if let Some(value) = read_env("TOLLGATE_DRY_RUN") {
            self.runner.dry_run = parse_env("TOLLGATE_DRY_RUN", &value)?;
        }

        let log_level =
            read_env("TOLLGATE_LOGGING_LEVEL").or_else(|| read_env("TOLLGATE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TOLLGATE_LOGGING_FORMAT").or_else(|| read_env("TOLLGATE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(state_path) = overrides.state_path {
            self.storage.state_path = state_path;
        }
        if let Some(log_dir) = overrides.log_dir {
            self.storage.log_dir = log_dir;
        }
        if let Some(events_path) = overrides.events_path {
            self.runner.events_path = events_path;
        }
        if let Some(poll_interval_secs) = overrides.poll_interval_secs {
            self.runner.poll_interval_secs = poll_interval_secs;
        }
        if let Some(dry_run) = overrides.dry_run {
            self.runner.dry_run = dry_run;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy()?;
        validate_storage(&self.storage)?;
        validate_retry(&self.retry)?;
        validate_runner(&self.runner)?;
        validate_pricing(&self.pricing)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// The config file `load` would read, if any.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.state_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("storage.state_path must not be empty".to_string()));
    }
    if storage.log_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("storage.log_dir must not be empty".to_string()));
    }
    Ok(())
}

fn validate_retry(retry: &RetryPolicy) -> Result<(), ConfigError> {
    if retry.max_retries > 10 {
        return Err(ConfigError::Validation(
            "retry.max_retries must be in range 0..=10".to_string(),
        ));
    }
    if retry.base_delay_ms == 0 || retry.base_delay_ms > retry.max_delay_ms {
        return Err(ConfigError::Validation(
            "retry.base_delay_ms must be greater than zero and at most retry.max_delay_ms"
                .to_string(),
        ));
    }
    if retry.max_delay_ms > 300_000 {
        return Err(ConfigError::Validation(
            "retry.max_delay_ms must be at most 300000".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&retry.jitter) {
        return Err(ConfigError::Validation("retry.jitter must be in range [0, 1)".to_string()));
    }
    Ok(())
}

fn validate_runner(runner: &RunnerConfig) -> Result<(), ConfigError> {
    if runner.poll_interval_secs == 0 || runner.poll_interval_secs > 86_400 {
        return Err(ConfigError::Validation(
            "runner.poll_interval_secs must be in range 1..=86400".to_string(),
        ));
    }
    if runner.batch_limit == 0 || runner.batch_limit > 1_000 {
        return Err(ConfigError::Validation(
            "runner.batch_limit must be in range 1..=1000".to_string(),
        ));
    }
    Ok(())
}

fn validate_pricing(pricing: &PricingSettings) -> Result<(), ConfigError> {
    let prices = [pricing.usd_per_1m_input_tokens, pricing.usd_per_1m_output_tokens];
    if prices.iter().any(|price| !price.is_finite() || *price < 0.0) {
        return Err(ConfigError::Validation(
            "pricing.usd_per_1m_* values must be non-negative numbers".to_string(),
        ));
    }
    if !pricing.chars_per_token.is_finite() || pricing.chars_per_token <= 0.0 {
        return Err(ConfigError::Validation(
            "pricing.chars_per_token must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    policy: Option<PolicySettings>,
    storage: Option<StoragePatch>,
    retry: Option<RetryPolicy>,
    runner: Option<RunnerPatch>,
    pricing: Option<PricingSettings>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    state_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RunnerPatch {
    events_path: Option<PathBuf>,
    poll_interval_secs: Option<u64>,
    batch_limit: Option<usize>,
    dry_run: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::policy::OfftopicQuestionMode;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn write_config(dir: &TempDir, body: &str) -> Result<PathBuf, String> {
        let path = dir.path().join("tollgate.toml");
        fs::write(&path, body).map_err(|err| err.to_string())?;
        Ok(path)
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;
        ensure(config.runner.dry_run, "dry run should be the default")?;
        ensure(config.retry.max_retries == 3, "three retries by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TOLLGATE_STATE_DIR", "/var/lib/tollgate");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[storage]
state_path = "${TEST_TOLLGATE_STATE_DIR}/agent_state.json"
"#,
            )?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.storage.state_path == PathBuf::from("/var/lib/tollgate/agent_state.json"),
                "state path should be interpolated from the environment",
            )
        })();

        clear_vars(&["TEST_TOLLGATE_STATE_DIR"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_TOLLGATE_UNSET"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(&dir, "[storage]\nlog_dir = \"${TEST_TOLLGATE_UNSET}\"\n")?;

        match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() }) {
            Err(ConfigError::MissingEnvInterpolation { var }) => {
                ensure(var == "TEST_TOLLGATE_UNSET", "error should name the variable")
            }
            other => Err(format!("expected interpolation failure, got {other:?}")),
        }
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TOLLGATE_LOG_LEVEL", "warn");
        env::set_var("TOLLGATE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["TOLLGATE_LOG_LEVEL", "TOLLGATE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TOLLGATE_MAX_CALLS_PER_DAY", "120");
        env::set_var("TOLLGATE_STATE_PATH", "from-env.json");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[policy]
daily_budget_usd = 2.5
max_calls_per_day = 90

[policy.reply]
offtopic_question_mode = "skip"

[storage]
state_path = "from-file.json"
log_dir = "file-logs"

[logging]
level = "warn"
"#,
            )?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    state_path: Some(PathBuf::from("from-override.json")),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.storage.state_path == PathBuf::from("from-override.json"),
                "override state path should win",
            )?;
            ensure(config.storage.log_dir == PathBuf::from("file-logs"), "file log dir kept")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.policy.max_calls_per_day == 120, "env call cap should beat the file")?;
            ensure(config.policy.daily_budget_usd == 2.5, "file budget should beat the default")?;
            ensure(
                config.policy.reply.offtopic_question_mode == OfftopicQuestionMode::Skip,
                "nested policy tables should load",
            )?;
            ensure(config.policy.scheduler.burst_p0 == 8, "untouched policy keys keep defaults")
        })();

        clear_vars(&["TOLLGATE_MAX_CALLS_PER_DAY", "TOLLGATE_STATE_PATH"]);
        result
    }

    #[test]
    fn invalid_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TOLLGATE_BURST_P0", "lots");
        let outcome = AppConfig::load(LoadOptions::default());
        clear_vars(&["TOLLGATE_BURST_P0"]);

        match outcome {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "TOLLGATE_BURST_P0", "error should name the env key")
            }
            other => Err(format!("expected invalid env override, got {other:?}")),
        }
    }

    #[test]
    fn fixed_rule_override_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(&dir, "[policy.style]\nlanguage = \"fr\"\n")?;

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path),
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".into()),
            Err(error) => error,
        };
        ensure(matches!(error, ConfigError::Validation(_)), "fixed rules are validation errors")?;
        ensure(error.to_string().contains("policy.style.language"), "error names the field")
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let missing = dir.path().join("absent.toml");
        let outcome = AppConfig::load(LoadOptions {
            config_path: Some(missing.clone()),
            require_file: true,
            ..LoadOptions::default()
        });
        ensure(
            matches!(outcome, Err(ConfigError::MissingConfigFile(path)) if path == missing),
            "missing required file should be reported with its path",
        )
    }
}
