//! Token and cost estimation.

use super::catalog::PricingInfo;

/// Character-based token estimate (no tokenizer dependency).
#[derive(Debug, Clone, Copy)]
pub struct CharacterEstimator {
    chars_per_token: f64,
}

impl CharacterEstimator {
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            4.0
        };
        Self { chars_per_token }
    }

    pub fn count(&self, text: &str) -> u32 {
        let chars = text.chars().count() as f64;
        (chars / self.chars_per_token).ceil() as u32
    }

    /// Cost units for sending `prompt` and receiving up to `max_output_tokens`.
    pub fn estimate_cost(&self, prompt: &str, max_output_tokens: u32, pricing: &PricingInfo) -> f64 {
        pricing.calculate_cost(self.count(prompt), max_output_tokens)
    }
}

impl Default for CharacterEstimator {
    fn default() -> Self {
        Self::new(4.0)
    }
}
