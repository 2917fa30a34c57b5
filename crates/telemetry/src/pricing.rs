//! Built-in prompt pricing for common LLM models.
//!
//! Prices are in USD per 1 million tokens. An assembled context is billed
//! as prompt input, so [`PricingTable::context_cost`] only uses the input
//! price; the output price is kept for callers that estimate full calls.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Cost of sending `tokens` as prompt input.
    pub fn input_cost(&self, tokens: usize) -> f64 {
        tokens as f64 * self.input_per_m / 1_000_000.0
    }

    /// Cost of a full call.
    pub fn cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

const PROVIDERS: &[&str] = &["openai", "anthropic", "google", "mistral", "deepseek", "meta-llama"];

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let defaults = [
            // OpenAI
            ("openai/gpt-4o", 2.5, 10.0),
            ("openai/gpt-4o-mini", 0.15, 0.6),
            ("openai/gpt-4-turbo", 10.0, 30.0),
            ("openai/gpt-3.5-turbo", 0.5, 1.5),
            ("openai/o1", 15.0, 60.0),
            ("openai/o3-mini", 1.1, 4.4),
            // Anthropic
            ("anthropic/claude-3-5-sonnet", 3.0, 15.0),
            ("anthropic/claude-3-5-haiku", 0.8, 4.0),
            ("anthropic/claude-3-opus", 15.0, 75.0),
            ("anthropic/claude-3-haiku", 0.25, 1.25),
            // Google
            ("google/gemini-1.5-pro", 1.25, 5.0),
            ("google/gemini-1.5-flash", 0.075, 0.3),
            ("google/gemini-2.0-flash", 0.1, 0.4),
            // Mistral / DeepSeek / Meta
            ("mistral/mistral-large", 2.0, 6.0),
            ("mistral/mistral-small", 0.2, 0.6),
            ("deepseek/deepseek-v3", 0.27, 1.1),
            ("meta-llama/llama-3.1-70b", 0.52, 0.75),
        ];

        let prices = defaults
            .into_iter()
            .map(|(name, input, output)| (name.to_string(), ModelPricing::new(input, output)))
            .collect();

        Self {
            prices: RwLock::new(prices),
        }
    }

    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices.write().insert(model.into(), pricing);
    }

    /// Resolve pricing for a model name.
    ///
    /// Tries an exact match, then the bare name under each known provider
    /// (`gpt-4o` → `openai/gpt-4o`), then the longest known bare name that
    /// prefixes the model (`gpt-4o-mini-2024-07-18` → `gpt-4o-mini`).
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read();

        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        for provider in PROVIDERS {
            if let Some(p) = prices.get(&format!("{provider}/{model}")) {
                return Some(*p);
            }
        }

        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        prices
            .iter()
            .filter_map(|(key, pricing)| {
                let bare_key = key.rsplit('/').next().unwrap_or(key).to_lowercase();
                bare_model
                    .starts_with(&bare_key)
                    .then_some((bare_key.len(), *pricing))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, pricing)| pricing)
    }

    /// Estimated prompt cost of a context of `tokens` tokens. Unknown models cost 0.
    pub fn context_cost(&self, model: &str, tokens: usize) -> f64 {
        self.lookup(model).map(|p| p.input_cost(tokens)).unwrap_or(0.0)
    }

    /// Sorted list of known model names.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prices.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
