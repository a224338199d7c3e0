#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use trendgate::domain::backtest::{AssetData, BacktestConfig};
use trendgate::domain::error::TrendgateError;
use trendgate::domain::fill::Fill;
use trendgate::domain::observation::Observation;
use trendgate::domain::strategy::Strategy;
use trendgate::ports::data_port::DataPort;

/// The canonical confirmed uptrend window.
pub const RISING: [f64; 5] = [1.0, 1.0, 1.0, 1.05, 1.10];

pub struct MockDataPort {
    pub observations: HashMap<String, Vec<Observation>>,
    pub fills: HashMap<String, Vec<Fill>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            observations: HashMap::new(),
            fills: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_observations(mut self, asset: &str, observations: Vec<Observation>) -> Self {
        self.observations.insert(asset.to_string(), observations);
        self
    }

    pub fn with_fills(mut self, asset: &str, fills: Vec<Fill>) -> Self {
        self.fills.insert(asset.to_string(), fills);
        self
    }

    pub fn with_error(mut self, asset: &str, reason: &str) -> Self {
        self.errors.insert(asset.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn list_assets(&self) -> Result<Vec<String>, TrendgateError> {
        let mut assets: Vec<String> = self.observations.keys().cloned().collect();
        assets.sort();
        Ok(assets)
    }

    fn fetch_observations(&self, asset: &str) -> Result<Vec<Observation>, TrendgateError> {
        if let Some(reason) = self.errors.get(asset) {
            return Err(TrendgateError::DataSource {
                reason: reason.clone(),
            });
        }
        Ok(self.observations.get(asset).cloned().unwrap_or_default())
    }

    fn fetch_fills(&self, asset: &str) -> Result<Vec<Fill>, TrendgateError> {
        Ok(self.fills.get(asset).cloned().unwrap_or_default())
    }
}

/// `hours` after a fixed epoch.
pub fn ts(hours: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + hours * 3600, 0).unwrap()
}

/// One observation per hour starting at `ts(0)`.
pub fn series(prices: &[f64]) -> Vec<Observation> {
    prices
        .iter()
        .enumerate()
        .map(|(i, p)| Observation::new(ts(i as i64), *p))
        .collect()
}

/// `series` with the same factor on every observation.
pub fn series_with_factor(prices: &[f64], name: &str, value: f64) -> Vec<Observation> {
    series(prices)
        .into_iter()
        .map(|o| o.with_factor(name, value))
        .collect()
}

/// Buy `quote` worth of `amount` units, then sell them all for `proceeds`.
pub fn round_trip(quote: f64, amount: f64, proceeds: f64) -> Vec<Fill> {
    vec![
        Fill::buy(ts(10), quote, amount),
        Fill::sell(ts(12), amount, proceeds),
    ]
}

pub fn asset(name: &str, prices: &[f64], fills: Vec<Fill>) -> AssetData {
    AssetData::new(name, series(prices), fills)
}

pub fn trend_strategy() -> Strategy {
    Strategy::from_expressions("Trend gate", "trend_confirmed == 1", None).unwrap()
}

pub fn small_window_config() -> BacktestConfig {
    BacktestConfig {
        window_size: 5,
        ..BacktestConfig::default()
    }
}
