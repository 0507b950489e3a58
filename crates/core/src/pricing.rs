use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Token counts reported by (or estimated for) one compose call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingSettings {
    pub usd_per_1m_input_tokens: f64,
    pub usd_per_1m_output_tokens: f64,
    pub chars_per_token: f64,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self { usd_per_1m_input_tokens: 1.50, usd_per_1m_output_tokens: 6.00, chars_per_token: 4.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CostModel {
    input_per_million: Decimal,
    output_per_million: Decimal,
    chars_per_token: Decimal,
}

impl CostModel {
    pub fn from_settings(settings: &PricingSettings) -> Self {
        let price = |value: f64| {
            Decimal::from_f64_retain(value).map(|value| value.round_dp(6)).unwrap_or_default()
        };
        let chars_per_token = price(settings.chars_per_token);
        Self {
            input_per_million: price(settings.usd_per_1m_input_tokens),
            output_per_million: price(settings.usd_per_1m_output_tokens),
            chars_per_token: if chars_per_token > Decimal::ZERO {
                chars_per_token
            } else {
                Decimal::new(4, 0)
            },
        }
    }

    /// `max(1, chars / chars_per_token)`.
    pub fn estimate_tokens(&self, text: &str) -> u64 {
        let chars = Decimal::from(text.chars().count());
        (chars / self.chars_per_token).floor().to_u64().unwrap_or(u64::MAX).max(1)
    }

    pub fn estimate_usage(&self, prompt: &str, reply: &str) -> TokenUsage {
        TokenUsage {
            input_tokens: self.estimate_tokens(prompt),
            output_tokens: self.estimate_tokens(reply),
        }
    }

    pub fn cost_usd(&self, usage: TokenUsage) -> Decimal {
        let million = Decimal::from(1_000_000u32);
        Decimal::from(usage.input_tokens) * self.input_per_million / million
            + Decimal::from(usage.output_tokens) * self.output_per_million / million
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::from_settings(&PricingSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{CostModel, PricingSettings, TokenUsage};

    #[test]
    fn cost_is_priced_per_million_tokens() {
        let model = CostModel::default();
        let cost = model.cost_usd(TokenUsage { input_tokens: 1_000, output_tokens: 500 });
        assert_eq!(cost, Decimal::new(45, 4));
    }

    #[test]
    fn token_estimate_never_drops_below_one() {
        let model = CostModel::default();
        assert_eq!(model.estimate_tokens(""), 1);
        assert_eq!(model.estimate_tokens("abc"), 1);
        assert_eq!(model.estimate_tokens(&"x".repeat(41)), 10);
    }

    #[test]
    fn non_positive_chars_per_token_falls_back() {
        let model = CostModel::from_settings(&PricingSettings {
            chars_per_token: 0.0,
            ..PricingSettings::default()
        });
        assert_eq!(model.estimate_tokens(&"x".repeat(8)), 2);
    }
}
