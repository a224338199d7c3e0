//! Trend confirmation engine.
//!
//! Decides whether a price window is in a confirmed uptrend. Three gates run
//! in order and a failure short-circuits the rest:
//!
//! 1. **Noise**: coefficient of variation (population stddev / mean) must
//!    exceed `cv_threshold`. Flat windows never pass.
//! 2. **Direction**: at least two of three votes: OLS slope > 0,
//!    last > first, median(second half) > median(first half). The split is
//!    at `n / 2`; an odd middle element belongs to the second half.
//! 3. **Strength**: weighted composite of four sub-scores in `[0, 100]`,
//!    scaled by a multiplier chosen by the sign of the window's net return,
//!    must reach `score_threshold`.
//!
//! Windows shorter than [`MIN_TREND_POINTS`] and windows containing a
//! non-positive or non-finite price are rejected without scoring. Every
//! division by a mean or by the first price yields 0 when the divisor is 0.

use crate::domain::factor::FactorMap;
use crate::domain::observation::{self, Observation, is_valid_price};
use std::fmt;

pub const MIN_TREND_POINTS: usize = 4;
pub const DEFAULT_CV_THRESHOLD: f64 = 0.005;
pub const DEFAULT_SCORE_THRESHOLD: f64 = 30.0;

/// Canonical factor names under which a [`TrendResult`] is published.
pub const FACTOR_CV: &str = "trend_cv";
pub const FACTOR_DIRECTION_VOTES: &str = "trend_direction_votes";
pub const FACTOR_STRENGTH_SCORE: &str = "trend_strength_score";
pub const FACTOR_TOTAL_RETURN: &str = "trend_total_return";
pub const FACTOR_RISE_RATIO: &str = "trend_rise_ratio";
pub const FACTOR_SLOPE: &str = "trend_slope";
pub const FACTOR_CONFIRMED: &str = "trend_confirmed";

/// |normalized slope %| × 10 (i.e. |slope / mean| × 1000).
const SLOPE_SCORE_SCALE: f64 = 10.0;
/// |total return %| × 10.
const RETURN_SCORE_SCALE: f64 = 10.0;
/// (1 − CV × 10) × 100.
const STABILITY_CV_SCALE: f64 = 10.0;
const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub slope: f64,
    pub total_return: f64,
    pub consistency: f64,
    pub stability: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            slope: 0.3,
            total_return: 0.3,
            consistency: 0.2,
            stability: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.slope + self.total_return + self.consistency + self.stability
    }
}

/// Score multipliers keyed by the sign of the window's total return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionMultipliers {
    pub rising: f64,
    pub flat: f64,
    pub falling: f64,
}

impl Default for DirectionMultipliers {
    fn default() -> Self {
        Self {
            rising: 1.0,
            flat: 0.1,
            falling: 0.3,
        }
    }
}

impl DirectionMultipliers {
    pub fn for_return(&self, total_return_percent: f64) -> f64 {
        if total_return_percent > 0.0 {
            self.rising
        } else if total_return_percent == 0.0 {
            self.flat
        } else {
            self.falling
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendConfig {
    pub cv_threshold: f64,
    pub score_threshold: f64,
    pub weights: ScoreWeights,
    pub multipliers: DirectionMultipliers,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            cv_threshold: DEFAULT_CV_THRESHOLD,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            weights: ScoreWeights::default(),
            multipliers: DirectionMultipliers::default(),
        }
    }
}

impl TrendConfig {
    pub fn with_thresholds(cv_threshold: f64, score_threshold: f64) -> Self {
        Self {
            cv_threshold,
            score_threshold,
            ..Self::default()
        }
    }
}

/// The first gate a window failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrendRejection {
    InsufficientData,
    InvalidPrices,
    Noise,
    Direction,
    Strength,
}

impl fmt::Display for TrendRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendRejection::InsufficientData => "insufficient data",
            TrendRejection::InvalidPrices => "invalid prices",
            TrendRejection::Noise => "noise",
            TrendRejection::Direction => "direction",
            TrendRejection::Strength => "strength",
        };
        write!(f, "{s}")
    }
}

/// Sub-scores behind a strength score. Only present once gate 3 ran.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrengthBreakdown {
    pub slope_score: f64,
    pub return_score: f64,
    pub consistency_score: f64,
    pub stability_score: f64,
    pub raw_score: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendResult {
    /// Window length, valid or not.
    pub points: usize,
    /// Prices that were non-positive or non-finite.
    pub invalid_points: usize,
    pub coefficient_of_variation: f64,
    pub direction_votes: u8,
    pub strength_score: f64,
    pub total_return_percent: f64,
    pub rise_ratio: f64,
    /// Regression slope as a percentage of the window mean, per step.
    pub normalized_slope: f64,
    pub breakdown: Option<StrengthBreakdown>,
    pub confirmed: bool,
    pub rejection: Option<TrendRejection>,
}

impl TrendResult {
    fn rejected(points: usize, reason: TrendRejection) -> Self {
        Self {
            points,
            invalid_points: 0,
            coefficient_of_variation: 0.0,
            direction_votes: 0,
            strength_score: 0.0,
            total_return_percent: 0.0,
            rise_ratio: 0.0,
            normalized_slope: 0.0,
            breakdown: None,
            confirmed: false,
            rejection: Some(reason),
        }
    }

    /// Publish the result under the canonical `trend_*` factor names.
    pub fn to_factors(&self) -> FactorMap {
        let mut factors = FactorMap::new();
        factors.insert(FACTOR_CV, self.coefficient_of_variation);
        factors.insert(FACTOR_DIRECTION_VOTES, f64::from(self.direction_votes));
        factors.insert(FACTOR_STRENGTH_SCORE, self.strength_score);
        factors.insert(FACTOR_TOTAL_RETURN, self.total_return_percent);
        factors.insert(FACTOR_RISE_RATIO, self.rise_ratio);
        factors.insert(FACTOR_SLOPE, self.normalized_slope);
        factors.insert(FACTOR_CONFIRMED, if self.confirmed { 1.0 } else { 0.0 });
        factors
    }
}

/// Run the three gates over `prices`.
pub fn confirm_trend(prices: &[f64], config: &TrendConfig) -> TrendResult {
    let n = prices.len();
    if n < MIN_TREND_POINTS {
        return TrendResult::rejected(n, TrendRejection::InsufficientData);
    }

    let invalid_points = prices.iter().filter(|p| !is_valid_price(**p)).count();
    if invalid_points > 0 {
        return TrendResult {
            invalid_points,
            ..TrendResult::rejected(n, TrendRejection::InvalidPrices)
        };
    }

    // Gate 1: noise
    let cv = coefficient_of_variation(prices);
    let mut result = TrendResult {
        coefficient_of_variation: cv,
        ..TrendResult::rejected(n, TrendRejection::Noise)
    };
    let above_noise = cv > 0.0 && cv > config.cv_threshold;
    if !above_noise {
        return result;
    }

    // Gate 2: direction
    let first = prices[0];
    let last = prices[n - 1];
    let slope = regression_slope(prices);
    let mid = n / 2;
    let votes = [
        slope > 0.0,
        last > first,
        median(&prices[mid..]) > median(&prices[..mid]),
    ]
    .iter()
    .filter(|v| **v)
    .count() as u8;
    result.direction_votes = votes;
    if votes < 2 {
        result.rejection = Some(TrendRejection::Direction);
        return result;
    }

    // Gate 3: strength
    let window_mean = mean(prices);
    let normalized_slope = if window_mean != 0.0 {
        slope / window_mean * 100.0
    } else {
        0.0
    };
    let total_return_percent = if first != 0.0 {
        (last - first) / first * 100.0
    } else {
        0.0
    };
    let up_steps = prices.windows(2).filter(|w| w[1] > w[0]).count();
    let rise_ratio = up_steps as f64 / (n - 1) as f64;

    let slope_score = (normalized_slope.abs() * SLOPE_SCORE_SCALE).min(MAX_SCORE);
    let return_score = (total_return_percent.abs() * RETURN_SCORE_SCALE).min(MAX_SCORE);
    let consistency_score = (rise_ratio * MAX_SCORE).clamp(0.0, MAX_SCORE);
    let stability_score = ((1.0 - cv * STABILITY_CV_SCALE) * MAX_SCORE).clamp(0.0, MAX_SCORE);

    let w = &config.weights;
    let raw_score = w.slope * slope_score
        + w.total_return * return_score
        + w.consistency * consistency_score
        + w.stability * stability_score;
    let multiplier = config.multipliers.for_return(total_return_percent);
    let strength_score = raw_score * multiplier;
    let confirmed = strength_score >= config.score_threshold;

    result.strength_score = strength_score;
    result.total_return_percent = total_return_percent;
    result.rise_ratio = rise_ratio;
    result.normalized_slope = normalized_slope;
    result.breakdown = Some(StrengthBreakdown {
        slope_score,
        return_score,
        consistency_score,
        stability_score,
        raw_score,
        multiplier,
    });
    result.confirmed = confirmed;
    result.rejection = if confirmed {
        None
    } else {
        Some(TrendRejection::Strength)
    };
    result
}

/// [`confirm_trend`] over the prices of an observation window.
pub fn confirm_window(window: &[Observation], config: &TrendConfig) -> TrendResult {
    confirm_trend(&observation::prices(window), config)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation, computed on values shifted by the first
/// element so that a constant series yields exactly 0.
pub fn population_stddev(values: &[f64]) -> f64 {
    let Some(&pivot) = values.first() else {
        return 0.0;
    };
    let shifted: Vec<f64> = values.iter().map(|v| v - pivot).collect();
    let shifted_mean = mean(&shifted);
    let variance = shifted
        .iter()
        .map(|d| {
            let diff = d - shifted_mean;
            diff * diff
        })
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m == 0.0 {
        return 0.0;
    }
    population_stddev(values) / m
}

/// OLS slope of value against index.
pub fn regression_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    if sxx == 0.0 { 0.0 } else { sxy / sxx }
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
