//! Model pricing and per-exchange cost calculation.
//!
//! A built-in pricing table (USD per million tokens) with user overrides
//! from `config.toml`. Costs are charged in whole cents:
//! `round((input_tokens * input_price + output_tokens * output_price) / 10_000)`,
//! with halves rounded away from zero.

use parley_types::config::ModelPricing;

/// Internal pricing entry for the built-in table.
struct PricingEntry {
    provider: &'static str,
    model_pattern: &'static str,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
}

/// Conservative fallback pricing when no model match is found.
const FALLBACK_INPUT_COST: f64 = 5.0;
const FALLBACK_OUTPUT_COST: f64 = 15.0;

/// More specific patterns come first: prefixes match in table order.
const DEFAULT_PRICING: &[PricingEntry] = &[
    PricingEntry {
        provider: "openai",
        model_pattern: "gpt-4o-mini",
        input_cost_per_million: 0.15,
        output_cost_per_million: 0.60,
    },
    PricingEntry {
        provider: "openai",
        model_pattern: "gpt-4o",
        input_cost_per_million: 2.50,
        output_cost_per_million: 10.0,
    },
    PricingEntry {
        provider: "openai",
        model_pattern: "gpt-4.1-mini",
        input_cost_per_million: 0.40,
        output_cost_per_million: 1.60,
    },
    PricingEntry {
        provider: "openai",
        model_pattern: "o3-mini",
        input_cost_per_million: 1.10,
        output_cost_per_million: 4.40,
    },
    PricingEntry {
        provider: "groq",
        model_pattern: "llama-3.1-8b",
        input_cost_per_million: 0.0,
        output_cost_per_million: 0.0,
    },
    PricingEntry {
        provider: "groq",
        model_pattern: "llama-3.3-70b",
        input_cost_per_million: 0.59,
        output_cost_per_million: 0.79,
    },
    PricingEntry {
        provider: "mistral",
        model_pattern: "mistral-large",
        input_cost_per_million: 2.0,
        output_cost_per_million: 6.0,
    },
];

/// Per-million-token prices resolved for one provider/model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const FALLBACK: ModelPrice = ModelPrice {
        input_per_million: FALLBACK_INPUT_COST,
        output_per_million: FALLBACK_OUTPUT_COST,
    };

    /// Cost of the given token counts in whole cents.
    pub fn cost_cents(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        compute_cost_cents(
            input_tokens,
            output_tokens,
            self.input_per_million,
            self.output_per_million,
        )
    }
}

/// Simple prefix matching: `"gpt-4o"` matches `"gpt-4o-2024-08-06"`.
fn matches_pattern(model: &str, pattern: &str) -> bool {
    model.starts_with(pattern)
}

/// Resolve prices for a provider/model.
///
/// Lookup order:
/// 1. User-defined pricing overrides from `config.toml`
/// 2. Built-in pricing table
/// 3. Conservative fallback ($5.00 / $15.00 per million tokens)
pub fn price_for(provider: &str, model: &str, user_pricing: &[ModelPricing]) -> ModelPrice {
    if let Some(p) = user_pricing
        .iter()
        .find(|p| p.provider_name == provider && matches_pattern(model, &p.model_pattern))
    {
        return ModelPrice {
            input_per_million: p.input_cost_per_million,
            output_per_million: p.output_cost_per_million,
        };
    }

    DEFAULT_PRICING
        .iter()
        .find(|e| e.provider == provider && matches_pattern(model, e.model_pattern))
        .map(|e| ModelPrice {
            input_per_million: e.input_cost_per_million,
            output_per_million: e.output_cost_per_million,
        })
        .unwrap_or(ModelPrice::FALLBACK)
}

/// Micro-dollars per dollar. Prices are scaled to this integer unit once.
const PRICE_SCALE: f64 = 1_000_000.0;

/// `tokens * micro-dollars-per-million` units in one cent.
const UNITS_PER_CENT: i128 = 10_000_000_000;

/// `round((input * price_in + output * price_out) / 10_000)` in cents.
///
/// Prices are USD per million tokens. The sum is taken in integer
/// micro-dollar units so exact half cents round away from zero.
pub fn compute_cost_cents(
    input_tokens: u32,
    output_tokens: u32,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
) -> i64 {
    let raw = i128::from(input_tokens) * price_units(input_cost_per_million)
        + i128::from(output_tokens) * price_units(output_cost_per_million);
    let half = UNITS_PER_CENT / 2;
    let cents = if raw < 0 {
        -((-raw + half) / UNITS_PER_CENT)
    } else {
        (raw + half) / UNITS_PER_CENT
    };
    i64::try_from(cents).unwrap_or(i64::MAX)
}

/// USD per million tokens as integer micro-dollars per million tokens.
fn price_units(cost_per_million: f64) -> i128 {
    (cost_per_million * PRICE_SCALE).round() as i128
}

/// Format cents as dollars, e.g. `$0.87`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}
