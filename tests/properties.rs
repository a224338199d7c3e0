//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. Short and flat windows never confirm
//! 2. Confirmation implies every gate passed
//! 3. Trend results are deterministic and scores stay bounded
//! 4. The FIFO ledger conserves units and cost basis
//! 5. Missing factors compare as zero

mod common;

use common::ts;
use proptest::prelude::*;
use trendgate::domain::condition_eval::evaluate;
use trendgate::domain::factor::FactorMap;
use trendgate::domain::fill::{Direction, Fill};
use trendgate::domain::ledger::{DEFAULT_LOT_EPSILON, compute_pnl};
use trendgate::domain::trend::{TrendConfig, TrendRejection, confirm_trend};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (0.01..100.0_f64).prop_map(|p| (p * 10_000.0).round() / 10_000.0)
}

fn arb_window() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(arb_price(), 4..40)
}

fn arb_config() -> impl Strategy<Value = TrendConfig> {
    (0.0..0.05_f64, 0.0..80.0_f64).prop_map(|(cv, score)| TrendConfig::with_thresholds(cv, score))
}

/// A buy spends `a` quote for `b` base; a sell offers `a` base for `b` quote.
fn arb_fills() -> impl Strategy<Value = Vec<Fill>> {
    prop::collection::vec((any::<bool>(), 0.01..500.0_f64, 0.01..500.0_f64), 1..30).prop_map(
        |raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, (is_buy, a, b))| {
                    if is_buy {
                        Fill::buy(ts(i as i64), a, b)
                    } else {
                        Fill::sell(ts(i as i64), a, b)
                    }
                })
                .collect()
        },
    )
}

// ── 1. Gates ─────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn short_windows_never_confirm(prices in prop::collection::vec(arb_price(), 0..4), config in arb_config()) {
        let t = confirm_trend(&prices, &config);
        prop_assert!(!t.confirmed);
        prop_assert_eq!(t.strength_score, 0.0);
        prop_assert_eq!(t.rejection, Some(TrendRejection::InsufficientData));
    }

    #[test]
    fn flat_windows_fail_noise(price in arb_price(), n in 4usize..40, config in arb_config()) {
        let t = confirm_trend(&vec![price; n], &config);
        prop_assert!(!t.confirmed);
        prop_assert_eq!(t.rejection, Some(TrendRejection::Noise));
    }

    #[test]
    fn confirmed_implies_all_gates(prices in arb_window(), config in arb_config()) {
        let t = confirm_trend(&prices, &config);
        if t.confirmed {
            prop_assert!(t.coefficient_of_variation > config.cv_threshold);
            prop_assert!(t.direction_votes >= 2);
            prop_assert!(t.strength_score >= config.score_threshold);
            prop_assert!(t.rejection.is_none());
        } else {
            prop_assert!(t.rejection.is_some());
        }
    }

    // ── 2. Determinism and bounds ───────────────────────────────────

    #[test]
    fn confirm_is_deterministic(prices in arb_window(), config in arb_config()) {
        let a = confirm_trend(&prices, &config);
        let b = confirm_trend(&prices, &config);
        prop_assert_eq!(a.strength_score.to_bits(), b.strength_score.to_bits());
        prop_assert_eq!(a.coefficient_of_variation.to_bits(), b.coefficient_of_variation.to_bits());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn score_is_bounded(prices in arb_window()) {
        let t = confirm_trend(&prices, &TrendConfig::default());
        prop_assert!(t.strength_score >= 0.0 && t.strength_score <= 100.0 + 1e-9);
        prop_assert!((0.0..=1.0).contains(&t.rise_ratio));
        prop_assert!(t.direction_votes <= 3);
    }

    // ── 3. Ledger ───────────────────────────────────────────────────

    #[test]
    fn ledger_conserves_units_and_cost(fills in arb_fills()) {
        let p = compute_pnl(&fills, DEFAULT_LOT_EPSILON).unwrap();

        prop_assert!(p.remaining_amount >= -1e-6);
        prop_assert!(p.remaining_cost >= -1e-6);
        prop_assert!(p.unconsumed_sell_amount >= 0.0);

        let bought: f64 = fills
            .iter()
            .filter(|f| f.direction == Direction::Buy && f.output_amount > 0.0)
            .map(|f| f.output_amount)
            .sum();
        let consumed: f64 = p.realized_sells.iter().map(|s| s.consumed).sum();
        // Lots below the epsilon are dropped, so allow that much per fill.
        let slack = 1e-6 + DEFAULT_LOT_EPSILON * fills.len() as f64;
        prop_assert!((bought - consumed - p.remaining_amount).abs() <= slack * bought.max(1.0));

        let cost_of_sold: f64 = p.realized_sells.iter().map(|s| s.cost_of_sold).sum();
        prop_assert!((p.total_spent - cost_of_sold - p.remaining_cost).abs() <= 1e-6 * p.total_spent.max(1.0));

        let realized: f64 = p.realized_sells.iter().map(|s| s.pnl).sum();
        prop_assert!((realized - p.total_realized_pnl).abs() <= 1e-6 * realized.abs().max(1.0));
    }

    // ── 4. Evaluator ────────────────────────────────────────────────

    #[test]
    fn missing_factor_compares_as_zero(value in -1000.0..1000.0_f64) {
        let expr = format!("unseen > {value}");
        prop_assert_eq!(evaluate(&expr, &FactorMap::new()), 0.0 > value);
    }
}
