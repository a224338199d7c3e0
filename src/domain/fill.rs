//! Executed buy/sell fills.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "buy"),
            Direction::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "b" => Ok(Direction::Buy),
            "sell" | "s" => Ok(Direction::Sell),
            other => Err(format!("invalid direction '{other}'")),
        }
    }
}

/// One executed trade.
///
/// For a [`Direction::Buy`], `input_amount` is quote currency spent and
/// `output_amount` is base asset received. For a [`Direction::Sell`],
/// `input_amount` is base asset offered and `output_amount` is quote received.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub direction: Direction,
    pub input_amount: f64,
    pub output_amount: f64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

impl Fill {
    pub fn buy(timestamp: DateTime<Utc>, quote_spent: f64, base_received: f64) -> Self {
        Self {
            direction: Direction::Buy,
            input_amount: quote_spent,
            output_amount: base_received,
            timestamp,
            success: true,
        }
    }

    pub fn sell(timestamp: DateTime<Utc>, base_offered: f64, quote_received: f64) -> Self {
        Self {
            direction: Direction::Sell,
            input_amount: base_offered,
            output_amount: quote_received,
            timestamp,
            success: true,
        }
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}
