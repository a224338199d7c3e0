//! Core domain types and logic.

pub mod backtest;
pub mod condition;
pub mod condition_eval;
pub mod condition_parser;
pub mod config_validation;
pub mod error;
pub mod factor;
pub mod fill;
pub mod ledger;
pub mod metrics;
pub mod observation;
pub mod strategy;
pub mod trend;
