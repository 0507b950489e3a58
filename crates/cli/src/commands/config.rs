use std::env;
use std::fs;
use std::path::Path;

use serde_json::Value as JsonValue;
use tollgate_core::config::{resolve_config_path, LoadOptions, ENV_OVERRIDES};
use toml::Value;

use crate::commands::{load_config, CommandResult, EXIT_FAILURE};

/// Keys only settable from the config file.
const FILE_ONLY_KEYS: &[&str] = &[
    "policy.reply.reply_to_mentions_always",
    "policy.reply.reply_to_questions_always",
    "policy.topics.allow_keywords",
    "policy.topics.block_keywords",
    "policy.style.language",
    "policy.style.max_sentences",
    "policy.operator.language",
    "retry.jitter",
    "pricing.usd_per_1m_input_tokens",
    "pricing.usd_per_1m_output_tokens",
    "pricing.chars_per_token",
];

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config("config", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let effective = match serde_json::to_value(&config) {
        Ok(value) => value,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "serialization",
                format!("could not render effective config: {error}"),
                EXIT_FAILURE,
            );
        }
    };

    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut keys: Vec<(&str, Option<&str>)> =
        ENV_OVERRIDES.iter().map(|(key, env_key)| (*key, Some(*env_key))).collect();
    keys.extend(FILE_ONLY_KEYS.iter().map(|key| (*key, None)));
    keys.sort_by_key(|(key, _)| *key);

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_key) in keys {
        let value = lookup(&effective, key_path)
            .map(render_value)
            .unwrap_or_else(|| "<unset>".to_string());
        lines.push(render_line(
            key_path,
            &value,
            field_source(
                key_path,
                env_key,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        ));
    }

    CommandResult::plain(lines.join("\n"))
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn lookup<'a>(root: &'a JsonValue, key_path: &str) -> Option<&'a JsonValue> {
    key_path.split('.').try_fold(root, |current, key| current.get(key))
}

fn render_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
