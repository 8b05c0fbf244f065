//! Cost reconciliation over hand-built result sets.

use std::collections::BTreeMap;

use jobrun_core::cost::{
    credits_to_usd, usd_to_credits, CostReconciler, ModelPrice, PriceTable,
};
use jobrun_core::model::{ModelKey, ResultSet, TaskResult};

fn result(
    service: &str,
    model: &str,
    questions: &[(&str, u64, u64, Option<(f64, f64)>, bool)],
) -> TaskResult {
    let mut raw = serde_json::Map::new();
    let mut cache_used = BTreeMap::new();
    for (q, input, output, prices, cached) in questions {
        raw.insert(format!("{q}_cost"), serde_json::json!(0.0));
        raw.insert(format!("{q}_input_tokens"), serde_json::json!(input));
        raw.insert(format!("{q}_output_tokens"), serde_json::json!(output));
        if let Some((ip, op)) = prices {
            raw.insert(
                format!("{q}_input_price_per_million_tokens"),
                serde_json::json!(ip),
            );
            raw.insert(
                format!("{q}_output_price_per_million_tokens"),
                serde_json::json!(op),
            );
        }
        cache_used.insert(q.to_string(), *cached);
    }
    TaskResult {
        interview: format!("{service}-{model}"),
        service: service.into(),
        model: model.into(),
        answers: Default::default(),
        raw_model_response: raw,
        cache_used,
    }
}

#[test]
fn totals_match_manual_computation() {
    // gpt-4o: 2 questions, 1000 in / 500 out each at 2.5 / 10 per million.
    // claude: 1 question, 200_000 in / 10_000 out at 3 / 15 per million.
    let results = ResultSet::new(vec![
        result(
            "openai",
            "gpt-4o",
            &[
                ("q1", 1000, 500, Some((2.5, 10.0)), false),
                ("q2", 1000, 500, Some((2.5, 10.0)), false),
            ],
        ),
        result(
            "anthropic",
            "claude",
            &[("q1", 200_000, 10_000, Some((3.0, 15.0)), false)],
        ),
    ]);

    let summary = CostReconciler::default().summarize(&results, false);
    assert_eq!(summary.breakdown.len(), 2);

    // Ordered by (service, model).
    let claude = &summary.breakdown[0];
    assert_eq!(claude.service, "anthropic");
    assert_eq!(claude.input_tokens, 200_000);
    assert_eq!(claude.input_cost, 0.6);
    assert_eq!(claude.output_cost, 0.15);

    let gpt = &summary.breakdown[1];
    assert_eq!(gpt.input_tokens, 2000);
    assert_eq!(gpt.output_tokens, 1000);
    // 0.005 USD -> 1 credit; 0.01 USD -> 1 credit.
    assert_eq!(gpt.input_cost, 0.01);
    assert_eq!(gpt.output_cost, 0.01);

    let manual_credits = usd_to_credits(0.6)
        + usd_to_credits(0.15)
        + usd_to_credits(2000.0 * 2.5 / 1e6)
        + usd_to_credits(1000.0 * 10.0 / 1e6);
    assert_eq!(summary.total_credits, manual_credits);
    assert_eq!(summary.total_credits, 77);

    let summed: f64 = summary.breakdown.iter().map(|b| b.total_cost()).sum();
    assert!((summed - summary.total_usd).abs() < 1e-9);
    assert_eq!(summary.total_usd, credits_to_usd(77));
}

#[test]
fn cached_questions_are_excluded_unless_requested() {
    let results = ResultSet::new(vec![result(
        "openai",
        "gpt-4o",
        &[
            ("fresh", 1_000_000, 0, Some((1.0, 1.0)), false),
            ("cached", 3_000_000, 1_000_000, Some((1.0, 1.0)), true),
        ],
    )]);
    let reconciler = CostReconciler::default();

    let without = reconciler.compute(&results, false);
    assert_eq!(without[0].input_tokens, 1_000_000);
    assert_eq!(without[0].output_tokens, 0);
    assert_eq!(without[0].input_cost, 1.0);
    assert_eq!(without[0].output_cost, 0.0);

    let with = reconciler.compute(&results, true);
    assert_eq!(with[0].input_tokens, 4_000_000);
    assert_eq!(with[0].output_tokens, 1_000_000);
    assert_eq!(with[0].input_cost, 4.0);
    assert_eq!(with[0].output_cost, 1.0);
}

#[test]
fn fully_cached_model_disappears_from_breakdown() {
    let results = ResultSet::new(vec![result(
        "openai",
        "gpt-4o",
        &[("q1", 10, 10, Some((1.0, 1.0)), true)],
    )]);
    assert!(CostReconciler::default().compute(&results, false).is_empty());
}

#[test]
fn missing_prices_fall_back_to_table_or_skip() {
    let priced = ModelKey::new("openai", "gpt-4o");
    let table = PriceTable::new().with_price(
        &priced,
        ModelPrice {
            input_per_million: 1.0,
            output_per_million: 2.0,
        },
    );
    let results = ResultSet::new(vec![
        result("openai", "gpt-4o", &[("q1", 1_000_000, 1_000_000, None, false)]),
        result("mystery", "m1", &[("q1", 1_000_000, 1_000_000, None, false)]),
    ]);

    let breakdown = CostReconciler::new(table).compute(&results, false);
    assert_eq!(breakdown.len(), 1);
    assert_eq!(breakdown[0].model, "gpt-4o");
    assert_eq!(breakdown[0].input_cost, 1.0);
    assert_eq!(breakdown[0].output_cost, 2.0);
}

#[test]
fn malformed_price_skips_only_that_question() {
    let mut bad = result(
        "openai",
        "gpt-4o",
        &[
            ("good", 1_000_000, 0, Some((1.0, 1.0)), false),
            ("bad", 1_000_000, 0, Some((1.0, 1.0)), false),
        ],
    );
    bad.raw_model_response.insert(
        "bad_input_price_per_million_tokens".into(),
        serde_json::json!("not a number"),
    );
    let breakdown = CostReconciler::default().compute(&ResultSet::new(vec![bad]), false);
    assert_eq!(breakdown.len(), 1);
    assert_eq!(breakdown[0].input_tokens, 1_000_000);
    assert_eq!(breakdown[0].input_cost, 1.0);
}

#[test]
fn string_prices_are_accepted() {
    let mut r = result("openai", "gpt-4o", &[("q1", 1_000_000, 0, None, false)]);
    r.raw_model_response.insert(
        "q1_input_price_per_million_tokens".into(),
        serde_json::json!("0.5"),
    );
    r.raw_model_response.insert(
        "q1_output_price_per_million_tokens".into(),
        serde_json::json!("1.5"),
    );
    let breakdown = CostReconciler::default().compute(&ResultSet::new(vec![r]), false);
    assert_eq!(breakdown[0].input_cost, 0.5);
}
