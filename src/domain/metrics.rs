//! Aggregate statistics over a backtest's asset reports.

use crate::domain::backtest::AssetReport;
use crate::domain::trend::{mean, median};
use chrono::TimeDelta;

/// Factors profiled per cohort in [`Summary`].
pub const COHORT_FACTORS: [&str; 2] = ["liquidity", "fdv"];

/// Count of traded assets per return band (percent).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReturnBuckets {
    /// `> 50`
    pub above_50: usize,
    /// `(20, 50]`
    pub from_20_to_50: usize,
    /// `(0, 20]`
    pub from_0_to_20: usize,
    /// `(-20, 0]`
    pub from_neg_20_to_0: usize,
    /// `<= -20`
    pub below_neg_20: usize,
}

impl ReturnBuckets {
    pub fn record(&mut self, return_rate: f64) {
        if return_rate > 50.0 {
            self.above_50 += 1;
        } else if return_rate > 20.0 {
            self.from_20_to_50 += 1;
        } else if return_rate > 0.0 {
            self.from_0_to_20 += 1;
        } else if return_rate > -20.0 {
            self.from_neg_20_to_0 += 1;
        } else {
            self.below_neg_20 += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.above_50
            + self.from_20_to_50
            + self.from_0_to_20
            + self.from_neg_20_to_0
            + self.below_neg_20
    }

    /// `(label, count)` pairs, best band first.
    pub fn labelled(&self) -> [(&'static str, usize); 5] {
        [
            ("> 50%", self.above_50),
            ("20-50%", self.from_20_to_50),
            ("0-20%", self.from_0_to_20),
            ("-20-0%", self.from_neg_20_to_0),
            ("< -20%", self.below_neg_20),
        ]
    }
}

/// Distribution of one factor's positive values.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Lower quartile by index; `None` below four values.
    pub p25: Option<f64>,
    pub p75: Option<f64>,
}

impl FactorStats {
    /// Stats over the positive finite `values`. `None` when there are none.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| v.is_finite() && *v > 0.0)
            .collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let quartile = |num: usize| (n >= 4).then(|| sorted[n * num / 4]);

        Some(Self {
            count: n,
            min: sorted[0],
            max: sorted[n - 1],
            mean: mean(&sorted),
            median: median(&sorted),
            p25: quartile(1),
            p75: quartile(3),
        })
    }
}

/// Factor profile of a group of assets, read from each asset's evaluated
/// factor map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CohortStats {
    pub assets: usize,
    pub liquidity: Option<FactorStats>,
    pub fdv: Option<FactorStats>,
}

impl CohortStats {
    fn from_reports<'a>(reports: impl Iterator<Item = &'a AssetReport>) -> Self {
        let mut assets = 0;
        let mut values: [Vec<f64>; 2] = Default::default();
        for report in reports {
            assets += 1;
            for (name, bucket) in COHORT_FACTORS.iter().zip(values.iter_mut()) {
                if let Some(v) = report.factors.get(name) {
                    bucket.push(v);
                }
            }
        }
        let [liquidity, fdv] = values;
        Self {
            assets,
            liquidity: FactorStats::from_values(&liquidity),
            fdv: FactorStats::from_values(&fdv),
        }
    }

    /// `(factor name, stats)` pairs in [`COHORT_FACTORS`] order.
    pub fn factors(&self) -> [(&'static str, Option<&FactorStats>); 2] {
        [
            (COHORT_FACTORS[0], self.liquidity.as_ref()),
            (COHORT_FACTORS[1], self.fdv.as_ref()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub assets: usize,
    pub confirmed: usize,
    pub signalled: usize,
    pub traded: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    pub avg_return_rate: f64,
    pub max_return_rate: f64,
    pub min_return_rate: f64,
    pub total_spent: f64,
    pub total_received: f64,
    pub total_realized_pnl: f64,
    /// Pooled return over every traded asset, percent.
    pub aggregate_return_rate: f64,
    pub buckets: ReturnBuckets,
    pub best_asset: Option<(String, f64)>,
    pub worst_asset: Option<(String, f64)>,
    /// Mean hold time over realized sells that consumed a lot.
    pub avg_hold_time: Option<TimeDelta>,
    pub invalid_windows: usize,
    pub ignored_fills: usize,
    pub unconsumed_sells: usize,
    /// Assets with a realized outcome.
    pub traded_cohort: CohortStats,
    /// Every other asset, monitored but never traded.
    pub untraded_cohort: CohortStats,
}

impl Summary {
    pub fn compute(reports: &[AssetReport]) -> Self {
        let mut confirmed = 0usize;
        let mut signalled = 0usize;
        let mut invalid_windows = 0usize;
        let mut ignored_fills = 0usize;
        let mut unconsumed_sells = 0usize;

        let mut traded = 0usize;
        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut sum_return = 0.0_f64;
        let mut max_return_rate = 0.0_f64;
        let mut min_return_rate = 0.0_f64;
        let mut total_spent = 0.0_f64;
        let mut total_received = 0.0_f64;
        let mut total_value = 0.0_f64;
        let mut total_realized_pnl = 0.0_f64;
        let mut buckets = ReturnBuckets::default();
        let mut best_asset: Option<(String, f64)> = None;
        let mut worst_asset: Option<(String, f64)> = None;
        let mut hold_ms = 0i64;
        let mut holds = 0i64;

        for report in reports {
            if report.trend.confirmed {
                confirmed += 1;
            }
            if report.buy_signal {
                signalled += 1;
            }
            if report.trend.invalid_points > 0 {
                invalid_windows += 1;
            }

            let Some(position) = &report.position else {
                continue;
            };
            ignored_fills += position.ignored_fills;
            if position.has_data_gap() {
                unconsumed_sells += 1;
            }

            let Some(rate) = report.return_rate() else {
                continue;
            };

            if traded == 0 {
                max_return_rate = rate;
                min_return_rate = rate;
            }
            traded += 1;
            if rate > 0.0 {
                trades_won += 1;
            } else if rate < 0.0 {
                trades_lost += 1;
            } else {
                trades_breakeven += 1;
            }
            sum_return += rate;
            max_return_rate = max_return_rate.max(rate);
            min_return_rate = min_return_rate.min(rate);
            buckets.record(rate);

            total_spent += position.total_spent;
            total_received += position.total_received;
            total_value += position.total_value;
            total_realized_pnl += position.total_realized_pnl;

            if best_asset.as_ref().is_none_or(|(_, r)| rate > *r) {
                best_asset = Some((report.asset.clone(), rate));
            }
            if worst_asset.as_ref().is_none_or(|(_, r)| rate < *r) {
                worst_asset = Some((report.asset.clone(), rate));
            }

            for held in position.realized_sells.iter().filter_map(|s| s.hold_duration()) {
                hold_ms += held.num_milliseconds();
                holds += 1;
            }
        }

        let win_rate = if traded > 0 {
            trades_won as f64 / traded as f64
        } else {
            0.0
        };

        let avg_return_rate = if traded > 0 {
            sum_return / traded as f64
        } else {
            0.0
        };

        let aggregate_return_rate = if total_spent > 0.0 {
            (total_value - total_spent) / total_spent * 100.0
        } else {
            0.0
        };

        let avg_hold_time = if holds > 0 {
            Some(TimeDelta::milliseconds(hold_ms / holds))
        } else {
            None
        };

        let traded_cohort = CohortStats::from_reports(reports.iter().filter(|r| r.outcome.is_traded()));
        let untraded_cohort =
            CohortStats::from_reports(reports.iter().filter(|r| !r.outcome.is_traded()));

        Summary {
            assets: reports.len(),
            confirmed,
            signalled,
            traded,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            avg_return_rate,
            max_return_rate,
            min_return_rate,
            total_spent,
            total_received,
            total_realized_pnl,
            aggregate_return_rate,
            buckets,
            best_asset,
            worst_asset,
            avg_hold_time,
            invalid_windows,
            ignored_fills,
            unconsumed_sells,
            traded_cohort,
            untraded_cohort,
        }
    }
}
