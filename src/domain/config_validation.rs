//! Configuration validation.
//!
//! Checks every engine, strategy and calibration key before a run starts, so
//! the harness itself never sees a bad threshold or an unparsable condition.

use crate::domain::condition::Condition;
use crate::domain::error::TrendgateError;
use crate::domain::trend::ScoreWeights;
use crate::ports::config_port::ConfigPort;
use std::fmt;
use std::str::FromStr;

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), TrendgateError> {
    validate_window_size(config)?;
    validate_thresholds(config)?;
    validate_weights(config)?;
    validate_multipliers(config)?;
    validate_lot_epsilon(config)?;
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), TrendgateError> {
    validate_buy_condition(config)?;
    validate_sell_condition(config)?;
    Ok(())
}

pub fn validate_calibrate_config(config: &dyn ConfigPort) -> Result<(), TrendgateError> {
    for key in ["score_thresholds", "cv_thresholds"] {
        let Some(raw) = config.get_string("calibrate", key) else {
            continue;
        };
        let values = parse_number_list(&raw).map_err(|reason| invalid("calibrate", key, reason))?;
        if values.iter().any(|v| *v < 0.0) {
            return Err(invalid("calibrate", key, format!("{key} must be non-negative")));
        }
    }
    Ok(())
}

/// Parse `a, b, c` into numbers. Blank input is an empty list.
pub fn parse_number_list(raw: &str) -> Result<Vec<f64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("'{s}' is not a number"))
        })
        .collect()
}

fn invalid(section: &str, key: &str, reason: String) -> TrendgateError {
    TrendgateError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason,
    }
}

/// The value at `[section] key` parsed as `T`, `None` when the key is absent.
/// A value that is present but does not parse is an error, never a default.
fn read_present<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, TrendgateError>
where
    T::Err: fmt::Display,
{
    let Some(raw) = config.get_string(section, key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| invalid(section, key, format!("'{}' is not a valid number: {e}", raw.trim())))
}

/// A present `f64` must also be finite.
fn read_number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, TrendgateError> {
    match read_present::<f64>(config, section, key)? {
        Some(v) if !v.is_finite() => Err(invalid(section, key, format!("{key} must be finite"))),
        other => Ok(other),
    }
}

fn validate_window_size(config: &dyn ConfigPort) -> Result<(), TrendgateError> {
    if read_present::<i64>(config, "engine", "window_size")?.is_some_and(|v| v < 1) {
        return Err(invalid(
            "engine",
            "window_size",
            "window_size must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_thresholds(config: &dyn ConfigPort) -> Result<(), TrendgateError> {
    for key in ["cv_threshold", "score_threshold"] {
        if read_number(config, "engine", key)?.is_some_and(|v| v < 0.0) {
            return Err(invalid("engine", key, format!("{key} must be non-negative")));
        }
    }
    Ok(())
}

fn validate_weights(config: &dyn ConfigPort) -> Result<(), TrendgateError> {
    let defaults = ScoreWeights::default();
    let keys = [
        ("weight_slope", defaults.slope),
        ("weight_return", defaults.total_return),
        ("weight_consistency", defaults.consistency),
        ("weight_stability", defaults.stability),
    ];
    let mut sum = 0.0;
    for (key, default) in keys {
        let value = read_number(config, "engine", key)?.unwrap_or(default);
        if value < 0.0 {
            return Err(invalid("engine", key, format!("{key} must be non-negative")));
        }
        sum += value;
    }
    if sum <= 0.0 {
        return Err(invalid(
            "engine",
            "weight_slope",
            "score weights must not all be zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_multipliers(config: &dyn ConfigPort) -> Result<(), TrendgateError> {
    for key in ["multiplier_rising", "multiplier_flat", "multiplier_falling"] {
        if read_number(config, "engine", key)?.is_some_and(|v| v < 0.0) {
            return Err(invalid("engine", key, format!("{key} must be non-negative")));
        }
    }
    Ok(())
}

fn validate_lot_epsilon(config: &dyn ConfigPort) -> Result<(), TrendgateError> {
    if read_number(config, "engine", "lot_epsilon")?.is_some_and(|v| v <= 0.0) {
        return Err(invalid(
            "engine",
            "lot_epsilon",
            "lot_epsilon must be positive".to_string(),
        ));
    }
    Ok(())
}

fn validate_buy_condition(config: &dyn ConfigPort) -> Result<(), TrendgateError> {
    match config.get_string("strategy", "buy_condition") {
        Some(s) if !s.trim().is_empty() => {
            Condition::parse(&s)?;
            Ok(())
        }
        _ => Err(TrendgateError::ConfigMissing {
            section: "strategy".to_string(),
            key: "buy_condition".to_string(),
        }),
    }
}

fn validate_sell_condition(config: &dyn ConfigPort) -> Result<(), TrendgateError> {
    if let Some(s) = config.get_string("strategy", "sell_condition") {
        Condition::parse(&s)?;
    }
    Ok(())
}
