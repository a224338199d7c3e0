//! Backtest harness.
//!
//! Composes trend confirmation, condition evaluation and the FIFO ledger per
//! asset. Assets are independent; [`run_backtest`] and [`calibrate`] fan
//! them out across the rayon pool and keep results in input order.

use crate::domain::fill::Fill;
use crate::domain::factor::FactorMap;
use crate::domain::ledger::{DEFAULT_LOT_EPSILON, PositionResult, compute_pnl};
use crate::domain::metrics::Summary;
use crate::domain::observation::{Observation, first_out_of_order};
use crate::domain::strategy::Strategy;
use crate::domain::trend::{TrendConfig, TrendResult, confirm_window};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fmt;
use tracing::{debug, info, warn};

pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Factor name under which the last window price is published.
pub const FACTOR_PRICE: &str = "price";

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub trend: TrendConfig,
    pub window_size: usize,
    pub lot_epsilon: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            trend: TrendConfig::default(),
            window_size: DEFAULT_WINDOW_SIZE,
            lot_epsilon: DEFAULT_LOT_EPSILON,
        }
    }
}

/// Everything known about one asset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetData {
    pub asset: String,
    pub observations: Vec<Observation>,
    pub fills: Vec<Fill>,
}

impl AssetData {
    pub fn new(asset: &str, observations: Vec<Observation>, fills: Vec<Fill>) -> Self {
        Self {
            asset: asset.to_string(),
            observations,
            fills,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Buy gate closed and nothing traded.
    NoSignal,
    /// Buy gate open but no fills recorded.
    SignalNotTraded,
    Profitable,
    Losing,
    Breakeven,
    /// Fills exist but none bought anything.
    Untraded,
}

impl Outcome {
    pub fn classify(buy_signal: bool, position: Option<&PositionResult>) -> Self {
        match position {
            None if buy_signal => Outcome::SignalNotTraded,
            None => Outcome::NoSignal,
            Some(p) if p.total_spent <= 0.0 => Outcome::Untraded,
            Some(p) if p.return_rate > 0.0 => Outcome::Profitable,
            Some(p) if p.return_rate < 0.0 => Outcome::Losing,
            Some(_) => Outcome::Breakeven,
        }
    }

    pub fn is_traded(self) -> bool {
        matches!(
            self,
            Outcome::Profitable | Outcome::Losing | Outcome::Breakeven
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::NoSignal => "no_signal",
            Outcome::SignalNotTraded => "signal_not_traded",
            Outcome::Profitable => "profitable",
            Outcome::Losing => "losing",
            Outcome::Breakeven => "breakeven",
            Outcome::Untraded => "untraded",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetReport {
    pub asset: String,
    pub trend: TrendResult,
    /// The factor map the conditions were evaluated against.
    pub factors: FactorMap,
    pub buy_signal: bool,
    /// `None` when the strategy has no sell condition.
    pub sell_signal: Option<bool>,
    pub position: Option<PositionResult>,
    pub outcome: Outcome,
}

impl AssetReport {
    pub fn return_rate(&self) -> Option<f64> {
        if self.outcome.is_traded() {
            self.position.as_ref().map(|p| p.return_rate)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub reports: Vec<AssetReport>,
    pub summary: Summary,
}

/// Observation factors of the window's last row, its price, and the trend
/// outputs. Trend factors overwrite same-named observation factors.
pub fn window_factors(window: &[Observation], trend: &TrendResult) -> FactorMap {
    let mut factors = FactorMap::new();
    if let Some(last) = window.last() {
        factors.merge(&last.factors);
        factors.insert(FACTOR_PRICE, last.price);
    }
    factors.merge(&trend.to_factors());
    factors
}

pub fn evaluate_asset(data: &AssetData, strategy: &Strategy, config: &BacktestConfig) -> AssetReport {
    let end = config.window_size.min(data.observations.len());
    let window = &data.observations[..end];

    if let Some(index) = first_out_of_order(window) {
        warn!(asset = %data.asset, index, "observation window is not in timestamp order");
    }

    let trend = confirm_window(window, &config.trend);
    if trend.invalid_points > 0 {
        warn!(
            asset = %data.asset,
            invalid_points = trend.invalid_points,
            "window contains invalid prices"
        );
    }

    let factors = window_factors(window, &trend);
    let buy_signal = strategy.buy_condition.evaluate(&factors);
    let sell_signal = strategy
        .sell_condition
        .as_ref()
        .map(|c| c.evaluate(&factors));

    let position = compute_pnl(&data.fills, config.lot_epsilon);
    let outcome = Outcome::classify(buy_signal, position.as_ref());

    debug!(
        asset = %data.asset,
        points = trend.points,
        confirmed = trend.confirmed,
        strength = trend.strength_score,
        buy_signal,
        %outcome,
        "asset evaluated"
    );

    AssetReport {
        asset: data.asset.clone(),
        trend,
        factors,
        buy_signal,
        sell_signal,
        position,
        outcome,
    }
}

fn evaluate_all(assets: &[AssetData], strategy: &Strategy, config: &BacktestConfig) -> Vec<AssetReport> {
    assets
        .par_iter()
        .map(|a| evaluate_asset(a, strategy, config))
        .collect()
}

pub fn run_backtest(assets: &[AssetData], strategy: &Strategy, config: &BacktestConfig) -> BacktestResult {
    let reports = evaluate_all(assets, strategy, config);
    let summary = Summary::compute(&reports);
    info!(
        strategy = %strategy.name,
        assets = summary.assets,
        signalled = summary.signalled,
        traded = summary.traded,
        "backtest complete"
    );
    BacktestResult { reports, summary }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Buy,
    Sell,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Buy => write!(f, "buy"),
            SignalKind::Sell => write!(f, "sell"),
        }
    }
}

/// A point where a condition switched from false to true.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalPoint {
    /// Index of the last observation in the triggering window.
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub kind: SignalKind,
    pub price: f64,
    pub strength_score: f64,
}

/// Slide a `window_size` window over the whole series and report each
/// rising edge of the buy and sell conditions. A series shorter than the
/// window is scanned as one window.
pub fn scan_signals(
    observations: &[Observation],
    strategy: &Strategy,
    config: &BacktestConfig,
) -> Vec<SignalPoint> {
    let n = observations.len();
    if n == 0 {
        return Vec::new();
    }
    let size = config.window_size.clamp(1, n);

    let mut signals = Vec::new();
    let mut prev_buy = false;
    let mut prev_sell = false;

    for end in size..=n {
        let window = &observations[end - size..end];
        let last = &window[size - 1];
        let trend = confirm_window(window, &config.trend);
        let factors = window_factors(window, &trend);

        let point = |kind| SignalPoint {
            index: end - 1,
            timestamp: last.timestamp,
            kind,
            price: last.price,
            strength_score: trend.strength_score,
        };

        let buy = strategy.buy_condition.evaluate(&factors);
        if buy && !prev_buy {
            signals.push(point(SignalKind::Buy));
        }
        prev_buy = buy;

        if let Some(sell_condition) = &strategy.sell_condition {
            let sell = sell_condition.evaluate(&factors);
            if sell && !prev_sell {
                signals.push(point(SignalKind::Sell));
            }
            prev_sell = sell;
        }
    }

    signals
}

/// One cell of a threshold grid.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationPoint {
    pub score_threshold: f64,
    pub cv_threshold: f64,
    pub confirmed: usize,
    pub signalled: usize,
    /// Signalled assets that were actually bought.
    pub traded: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub avg_return_rate: f64,
}

/// Re-run the harness for every `(score, cv)` threshold pair. Points are
/// ordered score-major.
pub fn calibrate(
    assets: &[AssetData],
    strategy: &Strategy,
    config: &BacktestConfig,
    score_thresholds: &[f64],
    cv_thresholds: &[f64],
) -> Vec<CalibrationPoint> {
    let mut points = Vec::with_capacity(score_thresholds.len() * cv_thresholds.len());

    for &score_threshold in score_thresholds {
        for &cv_threshold in cv_thresholds {
            let trial = BacktestConfig {
                trend: TrendConfig {
                    cv_threshold,
                    score_threshold,
                    ..config.trend
                },
                ..config.clone()
            };
            let reports = evaluate_all(assets, strategy, &trial);

            let confirmed = reports.iter().filter(|r| r.trend.confirmed).count();
            let signalled: Vec<&AssetReport> = reports.iter().filter(|r| r.buy_signal).collect();
            let returns: Vec<f64> = signalled.iter().filter_map(|r| r.return_rate()).collect();
            let traded = returns.len();
            let wins = returns.iter().filter(|r| **r > 0.0).count();
            let (win_rate, avg_return_rate) = if traded > 0 {
                (
                    wins as f64 / traded as f64,
                    returns.iter().sum::<f64>() / traded as f64,
                )
            } else {
                (0.0, 0.0)
            };

            debug!(score_threshold, cv_threshold, signalled = signalled.len(), traded, "calibration point");
            points.push(CalibrationPoint {
                score_threshold,
                cv_threshold,
                confirmed,
                signalled: signalled.len(),
                traded,
                wins,
                win_rate,
                avg_return_rate,
            });
        }
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trend::FACTOR_CONFIRMED;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap()
    }

    fn series(prices: &[f64]) -> Vec<Observation> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| Observation::new(ts(i as i64), *p))
            .collect()
    }

    fn strategy(buy: &str, sell: Option<&str>) -> Strategy {
        Strategy::from_expressions("test", buy, sell).unwrap()
    }

    const RISING: [f64; 5] = [1.0, 1.0, 1.0, 1.05, 1.10];

    #[test]
    fn window_factors_merge_last_row_price_and_trend() {
        let mut obs = series(&RISING);
        obs[4] = obs[4].clone().with_factor("holderCount", 42.0);
        obs[0] = obs[0].clone().with_factor("liquidity", 1.0);
        let trend = confirm_window(&obs, &TrendConfig::default());
        let f = window_factors(&obs, &trend);
        assert_eq!(f.get("holders"), Some(42.0));
        assert_eq!(f.get("liquidity"), None);
        assert_eq!(f.get(FACTOR_PRICE), Some(1.10));
        assert_eq!(f.get(FACTOR_CONFIRMED), Some(1.0));
    }

    #[test]
    fn evaluate_asset_signal_not_traded() {
        let data = AssetData::new("ALPHA", series(&RISING), vec![]);
        let report = evaluate_asset(
            &data,
            &strategy("trend_confirmed == 1", None),
            &BacktestConfig::default(),
        );
        assert!(report.trend.confirmed);
        assert!(report.buy_signal);
        assert_eq!(report.sell_signal, None);
        assert_eq!(report.outcome, Outcome::SignalNotTraded);
        assert!(report.return_rate().is_none());
    }

    #[test]
    fn evaluate_asset_profitable_trade() {
        let fills = vec![Fill::buy(ts(5), 10.0, 100.0), Fill::sell(ts(30), 100.0, 15.0)];
        let data = AssetData::new("ALPHA", series(&RISING), fills);
        let report = evaluate_asset(
            &data,
            &strategy("trend_confirmed == 1", Some("trend_total_return < -20")),
            &BacktestConfig::default(),
        );
        assert_eq!(report.outcome, Outcome::Profitable);
        assert_eq!(report.sell_signal, Some(false));
        assert_relative_eq!(report.return_rate().unwrap(), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn window_uses_leading_observations_only() {
        let mut prices = RISING.to_vec();
        prices.extend([0.5, 0.4, 0.3, 0.2, 0.1]);
        let data = AssetData::new("ALPHA", series(&prices), vec![]);
        let config = BacktestConfig {
            window_size: 5,
            ..BacktestConfig::default()
        };
        let report = evaluate_asset(&data, &strategy("trend_confirmed == 1", None), &config);
        assert_eq!(report.trend.points, 5);
        assert!(report.trend.confirmed);
        assert_eq!(report.factors.get(FACTOR_PRICE), Some(1.10));
    }

    #[test]
    fn short_series_is_unconfirmed_not_an_error() {
        let data = AssetData::new("ALPHA", series(&[1.0, 1.1]), vec![]);
        let report = evaluate_asset(
            &data,
            &strategy("trend_confirmed == 1", None),
            &BacktestConfig::default(),
        );
        assert!(!report.trend.confirmed);
        assert_eq!(report.outcome, Outcome::NoSignal);
    }

    #[test]
    fn empty_series_has_no_price_factor() {
        let data = AssetData::new("ALPHA", vec![], vec![]);
        let report = evaluate_asset(&data, &strategy("", None), &BacktestConfig::default());
        assert_eq!(report.factors.get(FACTOR_PRICE), None);
        assert!(report.buy_signal);
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(Outcome::classify(false, None), Outcome::NoSignal);
        assert_eq!(Outcome::classify(true, None), Outcome::SignalNotTraded);

        let sell_only = compute_pnl(&[Fill::sell(ts(0), 1.0, 1.0)], DEFAULT_LOT_EPSILON);
        assert_eq!(Outcome::classify(true, sell_only.as_ref()), Outcome::Untraded);

        let flat = compute_pnl(
            &[Fill::buy(ts(0), 10.0, 10.0), Fill::sell(ts(1), 10.0, 10.0)],
            DEFAULT_LOT_EPSILON,
        );
        assert_eq!(Outcome::classify(false, flat.as_ref()), Outcome::Breakeven);

        let loss = compute_pnl(
            &[Fill::buy(ts(0), 10.0, 10.0), Fill::sell(ts(1), 10.0, 4.0)],
            DEFAULT_LOT_EPSILON,
        );
        assert_eq!(Outcome::classify(true, loss.as_ref()), Outcome::Losing);
    }

    #[test]
    fn run_backtest_preserves_input_order() {
        let assets: Vec<AssetData> = (0..32)
            .map(|i| {
                let prices = if i % 2 == 0 { RISING.to_vec() } else { vec![1.0; 5] };
                AssetData::new(&format!("A{i:02}"), series(&prices), vec![])
            })
            .collect();
        let result = run_backtest(
            &assets,
            &strategy("trend_confirmed == 1", None),
            &BacktestConfig::default(),
        );
        assert_eq!(result.reports.len(), 32);
        for (i, report) in result.reports.iter().enumerate() {
            assert_eq!(report.asset, format!("A{i:02}"));
            assert_eq!(report.buy_signal, i % 2 == 0);
        }
        assert_eq!(result.summary.signalled, 16);
    }

    #[test]
    fn scan_signals_reports_rising_edges() {
        let prices = [
            1.0, 1.0, 1.0, 1.05, 1.10, // confirmed at index 4
            1.10, 1.10, 1.10, 1.10, 1.10, // flat windows from index 8
            1.10, 1.10, 1.10, 1.16, 1.22, // confirmed again at index 13
        ];
        let obs = series(&prices);
        let config = BacktestConfig {
            window_size: 5,
            ..BacktestConfig::default()
        };
        let signals = scan_signals(&obs, &strategy("trend_confirmed == 1", None), &config);
        let buys: Vec<usize> = signals
            .iter()
            .filter(|s| s.kind == SignalKind::Buy)
            .map(|s| s.index)
            .collect();
        assert_eq!(buys, vec![4, 13]);
        assert_eq!(signals[0].timestamp, ts(4));
        assert_relative_eq!(signals[0].price, 1.10);
    }

    #[test]
    fn scan_signals_emits_sell_edges() {
        let prices = [1.0, 0.9, 0.8, 0.7, 0.6, 0.5];
        let config = BacktestConfig {
            window_size: 4,
            ..BacktestConfig::default()
        };
        let signals = scan_signals(
            &series(&prices),
            &strategy("trend_confirmed == 1", Some("price < 0.75")),
            &config,
        );
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Sell);
        assert_eq!(signals[0].index, 3);
    }

    #[test]
    fn scan_signals_empty_series() {
        assert!(scan_signals(&[], &strategy("", None), &BacktestConfig::default()).is_empty());
    }

    #[test]
    fn calibrate_grid_is_score_major() {
        let fills = vec![Fill::buy(ts(5), 10.0, 100.0), Fill::sell(ts(30), 100.0, 12.0)];
        let assets = vec![
            AssetData::new("UP", series(&RISING), fills),
            AssetData::new("FLAT", series(&[1.0; 5]), vec![]),
        ];
        let points = calibrate(
            &assets,
            &strategy("trend_confirmed == 1", None),
            &BacktestConfig::default(),
            &[30.0, 90.0],
            &[0.005, 0.1],
        );
        assert_eq!(points.len(), 4);
        assert_eq!(
            points
                .iter()
                .map(|p| (p.score_threshold, p.cv_threshold))
                .collect::<Vec<_>>(),
            vec![(30.0, 0.005), (30.0, 0.1), (90.0, 0.005), (90.0, 0.1)]
        );

        let base = &points[0];
        assert_eq!(base.confirmed, 1);
        assert_eq!(base.signalled, 1);
        assert_eq!(base.traded, 1);
        assert_eq!(base.wins, 1);
        assert_relative_eq!(base.win_rate, 1.0);
        assert_relative_eq!(base.avg_return_rate, 20.0, epsilon = 1e-9);

        // CV of the rising window is ~0.038, below 0.1
        assert_eq!(points[1].signalled, 0);
        assert_eq!(points[1].win_rate, 0.0);
        // strength ~59.5 never reaches 90
        assert_eq!(points[2].signalled, 0);
    }
}
