//! Time-ordered asset observations.

use crate::domain::factor::FactorMap;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub factors: FactorMap,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            price,
            factors: FactorMap::new(),
        }
    }

    pub fn with_factor(mut self, name: &str, value: f64) -> Self {
        self.factors.insert(name, value);
        self
    }

    /// A price the trend engine can use: finite and strictly positive.
    pub fn has_valid_price(&self) -> bool {
        is_valid_price(self.price)
    }
}

pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

/// Prices of a slice of observations, in order.
pub fn prices(observations: &[Observation]) -> Vec<f64> {
    observations.iter().map(|o| o.price).collect()
}

/// Index of the first observation whose timestamp is earlier than its
/// predecessor's, if any. Ordering is the caller's responsibility; this only
/// reports it.
pub fn first_out_of_order(observations: &[Observation]) -> Option<usize> {
    observations
        .windows(2)
        .position(|w| w[1].timestamp < w[0].timestamp)
        .map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn valid_price_rules() {
        assert!(is_valid_price(0.0001));
        assert!(!is_valid_price(0.0));
        assert!(!is_valid_price(-1.0));
        assert!(!is_valid_price(f64::NAN));
        assert!(!is_valid_price(f64::INFINITY));
    }

    #[test]
    fn with_factor_normalizes() {
        let obs = Observation::new(at(0), 1.0).with_factor("holderCount", 12.0);
        assert!(obs.has_valid_price());
        assert_eq!(obs.factors.get("holders"), Some(12.0));
    }

    #[test]
    fn out_of_order_detection() {
        let ordered = vec![
            Observation::new(at(0), 1.0),
            Observation::new(at(0), 1.1),
            Observation::new(at(5), 1.2),
        ];
        assert_eq!(first_out_of_order(&ordered), None);

        let unordered = vec![
            Observation::new(at(10), 1.0),
            Observation::new(at(20), 1.1),
            Observation::new(at(15), 1.2),
        ];
        assert_eq!(first_out_of_order(&unordered), Some(2));
    }

    #[test]
    fn prices_in_order() {
        let obs = vec![Observation::new(at(0), 2.0), Observation::new(at(1), 3.0)];
        assert_eq!(prices(&obs), vec![2.0, 3.0]);
    }
}
