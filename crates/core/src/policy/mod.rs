//! Reply policy: the raw, serde-facing [`PolicySettings`] and the validated
//! [`Policy`] that the decision engine accepts.

use std::fmt;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Rules that no configuration may override.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedRules {
    pub outbound_language: &'static str,
    pub operator_language: &'static str,
    pub credential_disclosure_allowed: bool,
    pub duplicate_replies_allowed: bool,
}

pub const FIXED_RULES: FixedRules = FixedRules {
    outbound_language: "en",
    operator_language: "hu",
    credential_disclosure_allowed: false,
    duplicate_replies_allowed: false,
};

/// Fraction of the daily budget past which P2 replies are paused.
pub fn soft_cap_fraction() -> Decimal {
    Decimal::new(80, 2)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfftopicQuestionMode {
    #[default]
    Redirect,
    Skip,
}

impl fmt::Display for OfftopicQuestionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Redirect => "redirect",
            Self::Skip => "skip",
        })
    }
}

impl std::str::FromStr for OfftopicQuestionMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redirect" => Ok(Self::Redirect),
            "skip" => Ok(Self::Skip),
            other => Err(ConfigError::Validation(format!(
                "unsupported offtopic_question_mode `{other}` (expected redirect|skip)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub daily_budget_usd: f64,
    pub max_calls_per_day: u32,
    pub min_seconds_between_calls: f64,
    pub scheduler: SchedulerSettings,
    pub reply: ReplySettings,
    pub topics: TopicSettings,
    pub style: StyleSettings,
    pub operator: OperatorSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub burst_p0: u32,
    pub burst_p1: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplySettings {
    pub max_replies_per_hour_p2: u32,
    pub reply_to_mentions_always: bool,
    pub reply_to_questions_always: bool,
    pub offtopic_question_mode: OfftopicQuestionMode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    pub allow_keywords: Vec<String>,
    pub block_keywords: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleSettings {
    pub language: String,
    pub max_sentences: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorSettings {
    pub language: String,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            daily_budget_usd: 1.0,
            max_calls_per_day: 200,
            min_seconds_between_calls: 2.0,
            scheduler: SchedulerSettings::default(),
            reply: ReplySettings::default(),
            topics: TopicSettings::default(),
            style: StyleSettings::default(),
            operator: OperatorSettings::default(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { enabled: true, burst_p0: 8, burst_p1: 4 }
    }
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            max_replies_per_hour_p2: 2,
            reply_to_mentions_always: true,
            reply_to_questions_always: true,
            offtopic_question_mode: OfftopicQuestionMode::Redirect,
        }
    }
}

impl Default for TopicSettings {
    fn default() -> Self {
        let words = |items: &[&str]| items.iter().map(|item| (*item).to_string()).collect();
        Self {
            allow_keywords: words(&["agent", "budget", "limit", "config", "policy", "schedule"]),
            block_keywords: words(&[
                "api key",
                "password",
                "private key",
                "seed phrase",
                "credentials",
            ]),
        }
    }
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self { language: FIXED_RULES.outbound_language.to_string(), max_sentences: 6 }
    }
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self { language: FIXED_RULES.operator_language.to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerPolicy {
    pub enabled: bool,
    pub burst_p0: u32,
    pub burst_p1: u32,
}

/// Validated policy snapshot. Only obtainable through [`Policy::from_settings`],
/// so every instance satisfies the ranges and the fixed rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    daily_budget_usd: Decimal,
    max_calls_per_day: u32,
    min_seconds_between_calls: Duration,
    scheduler: SchedulerPolicy,
    max_replies_per_hour_p2: u32,
    reply_to_mentions_always: bool,
    reply_to_questions_always: bool,
    offtopic_question_mode: OfftopicQuestionMode,
    allow_keywords: Vec<String>,
    block_keywords: Vec<String>,
    max_sentences: u32,
}

impl Policy {
    pub fn from_settings(settings: &PolicySettings) -> Result<Self, ConfigError> {
        enforce_fixed_rules(settings)?;

        let budget = settings.daily_budget_usd;
        if !budget.is_finite() || !(0.01..=100.0).contains(&budget) {
            return Err(ConfigError::Validation(format!(
                "policy.daily_budget_usd must be in range 0.01..=100.0 (got {budget})"
            )));
        }
        let daily_budget_usd = Decimal::from_f64_retain(budget)
            .map(|value| value.round_dp(4))
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "policy.daily_budget_usd `{budget}` is not representable"
                ))
            })?;

        check_range("policy.max_calls_per_day", settings.max_calls_per_day, 1, 1000)?;

        let spacing = settings.min_seconds_between_calls;
        if !spacing.is_finite() || !(0.0..=60.0).contains(&spacing) {
            return Err(ConfigError::Validation(format!(
                "policy.min_seconds_between_calls must be in range 0..=60 (got {spacing})"
            )));
        }

        check_range("policy.scheduler.burst_p0", settings.scheduler.burst_p0, 0, 50)?;
        check_range("policy.scheduler.burst_p1", settings.scheduler.burst_p1, 0, 50)?;
        check_range(
            "policy.reply.max_replies_per_hour_p2",
            settings.reply.max_replies_per_hour_p2,
            0,
            20,
        )?;
        check_range("policy.style.max_sentences", settings.style.max_sentences, 1, 20)?;

        Ok(Self {
            daily_budget_usd,
            max_calls_per_day: settings.max_calls_per_day,
            min_seconds_between_calls: Duration::from_secs_f64(spacing),
            scheduler: SchedulerPolicy {
                enabled: settings.scheduler.enabled,
                burst_p0: settings.scheduler.burst_p0,
                burst_p1: settings.scheduler.burst_p1,
            },
            max_replies_per_hour_p2: settings.reply.max_replies_per_hour_p2,
            reply_to_mentions_always: settings.reply.reply_to_mentions_always,
            reply_to_questions_always: settings.reply.reply_to_questions_always,
            offtopic_question_mode: settings.reply.offtopic_question_mode,
            allow_keywords: normalize_keywords(&settings.topics.allow_keywords),
            block_keywords: normalize_keywords(&settings.topics.block_keywords),
            max_sentences: settings.style.max_sentences,
        })
    }

    pub fn daily_budget_usd(&self) -> Decimal {
        self.daily_budget_usd
    }

    pub fn soft_cap_threshold_usd(&self) -> Decimal {
        self.daily_budget_usd * soft_cap_fraction()
    }

    pub fn max_calls_per_day(&self) -> u32 {
        self.max_calls_per_day
    }

    pub fn min_seconds_between_calls(&self) -> Duration {
        self.min_seconds_between_calls
    }

    pub fn scheduler(&self) -> &SchedulerPolicy {
        &self.scheduler
    }

    pub fn max_replies_per_hour_p2(&self) -> u32 {
        self.max_replies_per_hour_p2
    }

    pub fn reply_to_mentions_always(&self) -> bool {
        self.reply_to_mentions_always
    }

    pub fn reply_to_questions_always(&self) -> bool {
        self.reply_to_questions_always
    }

    pub fn offtopic_question_mode(&self) -> OfftopicQuestionMode {
        self.offtopic_question_mode
    }

    /// Lowercased allow keywords.
    pub fn allow_keywords(&self) -> &[String] {
        &self.allow_keywords
    }

    /// Lowercased block keywords.
    pub fn block_keywords(&self) -> &[String] {
        &self.block_keywords
    }

    pub fn max_sentences(&self) -> u32 {
        self.max_sentences
    }

    pub fn fixed_rules(&self) -> &'static FixedRules {
        &FIXED_RULES
    }
}

impl TryFrom<&PolicySettings> for Policy {
    type Error = ConfigError;

    fn try_from(settings: &PolicySettings) -> Result<Self, Self::Error> {
        Self::from_settings(settings)
    }
}

fn enforce_fixed_rules(settings: &PolicySettings) -> Result<(), ConfigError> {
    let style = settings.style.language.trim().to_ascii_lowercase();
    if style != FIXED_RULES.outbound_language {
        return Err(ConfigError::Validation(format!(
            "policy.style.language is fixed to `{}` and cannot be set to `{}`",
            FIXED_RULES.outbound_language, settings.style.language
        )));
    }

    let operator = settings.operator.language.trim().to_ascii_lowercase();
    if operator != FIXED_RULES.operator_language {
        return Err(ConfigError::Validation(format!(
            "policy.operator.language is fixed to `{}` and cannot be set to `{}`",
            FIXED_RULES.operator_language, settings.operator.language
        )));
    }

    Ok(())
}

fn check_range(field: &str, value: u32, min: u32, max: u32) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{field} must be in range {min}..={max} (got {value})"
        )))
    }
}

fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|keyword| keyword.trim().to_lowercase())
        .filter(|keyword| !keyword.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Policy, PolicySettings};
    use crate::config::ConfigError;

    #[test]
    fn defaults_validate() {
        let policy = Policy::from_settings(&PolicySettings::default()).expect("defaults are valid");
        assert_eq!(policy.daily_budget_usd(), Decimal::ONE);
        assert_eq!(policy.max_calls_per_day(), 200);
        assert_eq!(policy.soft_cap_threshold_usd(), Decimal::new(80, 2));
        assert!(policy.block_keywords().iter().any(|word| word == "password"));
    }

    #[test]
    fn budget_is_rounded_to_four_decimals() {
        let settings = PolicySettings { daily_budget_usd: 0.123456, ..PolicySettings::default() };
        let policy = Policy::from_settings(&settings).expect("budget in range");
        assert_eq!(policy.daily_budget_usd(), Decimal::new(1235, 4));
    }

    #[test]
    fn out_of_range_budget_is_rejected() {
        let settings = PolicySettings { daily_budget_usd: 250.0, ..PolicySettings::default() };
        let error = Policy::from_settings(&settings).expect_err("budget above the ceiling");
        assert!(error.to_string().contains("policy.daily_budget_usd"));
    }

    #[test]
    fn fixed_language_rules_cannot_be_overridden() {
        let mut settings = PolicySettings::default();
        settings.style.language = "de".to_string();
        assert!(matches!(Policy::from_settings(&settings), Err(ConfigError::Validation(_))));

        let mut settings = PolicySettings::default();
        settings.operator.language = "en".to_string();
        assert!(matches!(Policy::from_settings(&settings), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn keywords_are_lowercased_and_blank_entries_dropped() {
        let mut settings = PolicySettings::default();
        settings.topics.allow_keywords = vec![" Budget ".to_string(), "  ".to_string()];
        let policy = Policy::from_settings(&settings).expect("valid settings");
        assert_eq!(policy.allow_keywords(), ["budget".to_string()]);
    }
}
