//! Cost reconciliation from token usage recorded in results.
//!
//! Each answered question inside a [`TaskResult`] is announced by a
//! `<question>_cost` field in `raw_model_response`. Alongside it the inference
//! layer records:
//!
//! - `<question>_input_tokens` / `<question>_output_tokens`
//! - `<question>_input_price_per_million_tokens` /
//!   `<question>_output_price_per_million_tokens`
//!
//! Prices are read from the response itself so historical jobs keep the cost
//! they were billed at, even after the pricing table moves on. An injected
//! [`PriceTable`] is only consulted when a response carries no prices.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ModelKey, ResultSet, TaskResult};

/// Suffix marking a per-question cost field.
pub const COST_SUFFIX: &str = "_cost";
const INPUT_TOKENS_SUFFIX: &str = "_input_tokens";
const OUTPUT_TOKENS_SUFFIX: &str = "_output_tokens";
const INPUT_PRICE_SUFFIX: &str = "_input_price_per_million_tokens";
const OUTPUT_PRICE_SUFFIX: &str = "_output_price_per_million_tokens";

/// Credits per USD. One credit is one cent.
pub const CREDITS_PER_USD: f64 = 100.0;

const TOKENS_PER_PRICE_UNIT: f64 = 1_000_000.0;

/// Converts USD to credits, rounding up to a whole credit.
///
/// The product is snapped to six decimals first so values such as `0.07`
/// (which is `7.000000000000001` after multiplication) do not round up a
/// whole extra credit.
pub fn usd_to_credits(usd: f64) -> u64 {
    if !usd.is_finite() || usd <= 0.0 {
        return 0;
    }
    let scaled = (usd * CREDITS_PER_USD * 1e6).round() / 1e6;
    scaled.ceil() as u64
}

/// Converts whole credits back to USD.
pub fn credits_to_usd(credits: u64) -> f64 {
    credits as f64 / CREDITS_PER_USD
}

/// Why a single question was left out of the totals.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PriceError {
    /// Neither the response nor the table has a price.
    #[error("no {side} price for {key} (question {question})")]
    MissingPrice {
        /// Model the question ran on.
        key: ModelKey,
        /// Question name.
        question: String,
        /// `input` or `output`.
        side: &'static str,
    },
    /// A token count or price is present but unreadable.
    #[error("malformed {field} for question {question}")]
    Malformed {
        /// Question name.
        question: String,
        /// Offending `raw_model_response` field.
        field: String,
    },
}

/// Per-million-token prices for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModelPrice {
    /// USD per million input tokens.
    pub input_per_million: f64,
    /// USD per million output tokens.
    pub output_per_million: f64,
}

/// Fallback prices, keyed by (service, model).
///
/// Serialized as `{"<service>": {"<model>": {"input_per_million": .., ..}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PriceTable {
    entries: BTreeMap<String, BTreeMap<String, ModelPrice>>,
}

impl PriceTable {
    /// Empty table; only embedded prices will be used.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the price for a model.
    pub fn insert(&mut self, key: &ModelKey, price: ModelPrice) {
        self.entries
            .entry(key.service.clone())
            .or_default()
            .insert(key.model.clone(), price);
    }

    /// Builder-style [`PriceTable::insert`].
    pub fn with_price(mut self, key: &ModelKey, price: ModelPrice) -> Self {
        self.insert(key, price);
        self
    }

    /// Price for a model, if known.
    pub fn get(&self, key: &ModelKey) -> Option<ModelPrice> {
        self.entries
            .get(&key.service)
            .and_then(|models| models.get(&key.model))
            .copied()
    }
}

/// Token usage and cost for one (service, model), rounded to whole credits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCostBreakdown {
    /// Inference service.
    pub service: String,
    /// Model name.
    pub model: String,
    /// Input tokens counted.
    pub input_tokens: u64,
    /// USD, rounded up to a whole credit.
    pub input_cost: f64,
    /// Output tokens counted.
    pub output_tokens: u64,
    /// USD, rounded up to a whole credit.
    pub output_cost: f64,
}

impl ModelCostBreakdown {
    /// Input plus output cost in USD.
    pub fn total_cost(&self) -> f64 {
        self.input_cost + self.output_cost
    }

    /// Input plus output cost in credits.
    pub fn total_credits(&self) -> u64 {
        usd_to_credits(self.input_cost) + usd_to_credits(self.output_cost)
    }
}

/// Breakdown plus the totals it adds up to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CostSummary {
    /// Per-model rows, ordered by (service, model).
    pub breakdown: Vec<ModelCostBreakdown>,
    /// Sum of the rows in credits.
    pub total_credits: u64,
    /// `total_credits` in USD.
    pub total_usd: f64,
}

#[derive(Debug, Default)]
struct Accumulator {
    input_tokens: u64,
    input_usd: f64,
    output_tokens: u64,
    output_usd: f64,
}

struct QuestionUsage {
    input_tokens: u64,
    output_tokens: u64,
    price: ModelPrice,
}

fn per_million(tokens: u64, price: f64) -> f64 {
    tokens as f64 * price / TOKENS_PER_PRICE_UNIT
}

/// Derives per-model costs from completed results.
#[derive(Debug, Clone, Default)]
pub struct CostReconciler {
    prices: PriceTable,
}

impl CostReconciler {
    /// Reconciler falling back to `prices` when a response has none embedded.
    pub fn new(prices: PriceTable) -> Self {
        Self { prices }
    }

    /// Per-(service, model) breakdown, ordered by key.
    ///
    /// Questions answered from cache are left out unless `include_cached`.
    /// A question whose tokens or prices cannot be read is skipped.
    pub fn compute(&self, results: &ResultSet, include_cached: bool) -> Vec<ModelCostBreakdown> {
        let mut totals: BTreeMap<ModelKey, Accumulator> = BTreeMap::new();

        for result in results.iter() {
            let key = result.model_key();
            for question in cost_questions(result) {
                if !include_cached && result.was_cached(question) {
                    continue;
                }
                let usage = match self.question_usage(result, &key, question) {
                    Ok(u) => u,
                    Err(e) => {
                        tracing::debug!(
                            interview = %result.interview,
                            error = %e,
                            "skipping question in cost totals"
                        );
                        continue;
                    }
                };
                let acc = totals.entry(key.clone()).or_default();
                acc.input_tokens += usage.input_tokens;
                acc.output_tokens += usage.output_tokens;
                acc.input_usd += per_million(usage.input_tokens, usage.price.input_per_million);
                acc.output_usd += per_million(usage.output_tokens, usage.price.output_per_million);
            }
        }

        totals
            .into_iter()
            .map(|(key, acc)| ModelCostBreakdown {
                service: key.service,
                model: key.model,
                input_tokens: acc.input_tokens,
                input_cost: credits_to_usd(usd_to_credits(acc.input_usd)),
                output_tokens: acc.output_tokens,
                output_cost: credits_to_usd(usd_to_credits(acc.output_usd)),
            })
            .collect()
    }

    /// [`CostReconciler::compute`] plus totals.
    pub fn summarize(&self, results: &ResultSet, include_cached: bool) -> CostSummary {
        let breakdown = self.compute(results, include_cached);
        let total_credits = breakdown.iter().map(ModelCostBreakdown::total_credits).sum();
        CostSummary {
            breakdown,
            total_credits,
            total_usd: credits_to_usd(total_credits),
        }
    }

    fn question_usage(
        &self,
        result: &TaskResult,
        key: &ModelKey,
        question: &str,
    ) -> Result<QuestionUsage, PriceError> {
        let raw = &result.raw_model_response;
        let input_tokens = read_tokens(raw, question, INPUT_TOKENS_SUFFIX)?;
        let output_tokens = read_tokens(raw, question, OUTPUT_TOKENS_SUFFIX)?;

        let fallback = self.prices.get(key);
        let input_price = match read_price(raw, question, INPUT_PRICE_SUFFIX)? {
            Some(p) => p,
            None => fallback
                .map(|p| p.input_per_million)
                .ok_or_else(|| missing(key, question, "input"))?,
        };
        let output_price = match read_price(raw, question, OUTPUT_PRICE_SUFFIX)? {
            Some(p) => p,
            None => fallback
                .map(|p| p.output_per_million)
                .ok_or_else(|| missing(key, question, "output"))?,
        };

        Ok(QuestionUsage {
            input_tokens,
            output_tokens,
            price: ModelPrice {
                input_per_million: input_price,
                output_per_million: output_price,
            },
        })
    }
}

/// Question names announced by `<question>_cost` fields.
fn cost_questions(result: &TaskResult) -> impl Iterator<Item = &str> {
    result
        .raw_model_response
        .keys()
        .filter_map(|k| k.strip_suffix(COST_SUFFIX))
        .filter(|q| !q.is_empty())
}

fn missing(key: &ModelKey, question: &str, side: &'static str) -> PriceError {
    PriceError::MissingPrice {
        key: key.clone(),
        question: question.to_string(),
        side,
    }
}

fn read_tokens(
    raw: &serde_json::Map<String, serde_json::Value>,
    question: &str,
    suffix: &str,
) -> Result<u64, PriceError> {
    let field = format!("{question}{suffix}");
    match raw.get(&field) {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or(PriceError::Malformed {
                question: question.to_string(),
                field,
            }),
    }
}

/// Prices may arrive as numbers or numeric strings.
fn read_price(
    raw: &serde_json::Map<String, serde_json::Value>,
    question: &str,
    suffix: &str,
) -> Result<Option<f64>, PriceError> {
    let field = format!("{question}{suffix}");
    let value = match raw.get(&field) {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(v) => v,
    };
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(p) if p.is_finite() && p >= 0.0 => Ok(Some(p)),
        _ => Err(PriceError::Malformed {
            question: question.to_string(),
            field,
        }),
    }
}
