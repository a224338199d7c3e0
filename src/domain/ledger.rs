//! FIFO position ledger.
//!
//! Replays an asset's fills against a queue of open lots. Sells consume the
//! oldest lots first; realized PnL is proceeds minus the cost basis of the
//! units consumed. The remaining position is valued at cost, so
//! `return_rate` is realized-plus-cost-basis, not mark-to-market. Use
//! [`PositionResult::unrealized_pnl`] for a mark-to-market view.

use crate::domain::fill::{Direction, Fill};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::VecDeque;
use std::fmt;
use tracing::warn;

pub const DEFAULT_LOT_EPSILON: f64 = 1e-8;

/// Base asset acquired by one buy, partially consumable by later sells.
#[derive(Debug, Clone, PartialEq)]
pub struct Lot {
    pub amount: f64,
    pub cost: f64,
    pub opened_at: DateTime<Utc>,
}

impl Lot {
    pub fn unit_cost(&self) -> f64 {
        if self.amount > 0.0 {
            self.cost / self.amount
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionStatus {
    Monitoring,
    Bought,
    Exited,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Monitoring => write!(f, "monitoring"),
            PositionStatus::Bought => write!(f, "bought"),
            PositionStatus::Exited => write!(f, "exited"),
        }
    }
}

/// Outcome of one sell fill.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedSell {
    pub timestamp: DateTime<Utc>,
    /// Base units the sell asked to dispose of.
    pub requested: f64,
    /// Base units actually matched against open lots.
    pub consumed: f64,
    pub proceeds: f64,
    pub cost_of_sold: f64,
    pub pnl: f64,
    /// Open time of the oldest lot this sell consumed.
    pub held_since: Option<DateTime<Utc>>,
}

impl RealizedSell {
    pub fn hold_duration(&self) -> Option<TimeDelta> {
        self.held_since.map(|opened| self.timestamp - opened)
    }

    /// PnL as a percentage of the consumed cost basis.
    pub fn return_percent(&self) -> f64 {
        if self.cost_of_sold > 0.0 {
            self.pnl / self.cost_of_sold * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionResult {
    pub total_realized_pnl: f64,
    pub remaining_amount: f64,
    pub remaining_cost: f64,
    pub open_lots: Vec<Lot>,
    pub total_spent: f64,
    pub total_received: f64,
    /// `total_spent`, or 1 when nothing was spent.
    pub total_cost: f64,
    /// `total_received + remaining_cost`.
    pub total_value: f64,
    pub return_rate: f64,
    pub status: PositionStatus,
    /// Sell volume that found no open lot to consume.
    pub unconsumed_sell_amount: f64,
    /// Successful fills that could not change the position.
    pub ignored_fills: usize,
    pub processed_fills: usize,
    pub realized_sells: Vec<RealizedSell>,
    pub first_buy_at: Option<DateTime<Utc>>,
    pub last_sell_at: Option<DateTime<Utc>>,
}

impl PositionResult {
    /// Profit on open lots if they were marked at `mark_price` (quote per base).
    pub fn unrealized_pnl(&self, mark_price: f64) -> f64 {
        self.remaining_amount * mark_price - self.remaining_cost
    }

    /// Received plus remaining cost basis, minus spent.
    pub fn net_pnl(&self) -> f64 {
        self.total_value - self.total_spent
    }

    pub fn has_data_gap(&self) -> bool {
        self.unconsumed_sell_amount > 0.0
    }
}

struct Ledger {
    lot_epsilon: f64,
    lots: VecDeque<Lot>,
    total_spent: f64,
    total_received: f64,
    total_realized_pnl: f64,
    unconsumed_sell_amount: f64,
    ignored_fills: usize,
    processed_fills: usize,
    effective_buys: usize,
    realized_sells: Vec<RealizedSell>,
    first_buy_at: Option<DateTime<Utc>>,
    last_sell_at: Option<DateTime<Utc>>,
}

impl Ledger {
    fn new(lot_epsilon: f64) -> Self {
        Self {
            lot_epsilon,
            lots: VecDeque::new(),
            total_spent: 0.0,
            total_received: 0.0,
            total_realized_pnl: 0.0,
            unconsumed_sell_amount: 0.0,
            ignored_fills: 0,
            processed_fills: 0,
            effective_buys: 0,
            realized_sells: Vec::new(),
            first_buy_at: None,
            last_sell_at: None,
        }
    }

    fn apply(&mut self, fill: &Fill) {
        self.processed_fills += 1;

        let amounts_ok = fill.input_amount.is_finite()
            && fill.output_amount.is_finite()
            && fill.input_amount >= 0.0
            && fill.output_amount >= 0.0;
        if !amounts_ok {
            warn!(
                direction = %fill.direction,
                input = fill.input_amount,
                output = fill.output_amount,
                "skipping fill with negative or non-finite amounts"
            );
            self.ignored_fills += 1;
            return;
        }

        match fill.direction {
            Direction::Buy => self.buy(fill),
            Direction::Sell => self.sell(fill),
        }
    }

    fn buy(&mut self, fill: &Fill) {
        if fill.output_amount <= 0.0 {
            self.ignored_fills += 1;
            return;
        }
        self.lots.push_back(Lot {
            amount: fill.output_amount,
            cost: fill.input_amount,
            opened_at: fill.timestamp,
        });
        self.total_spent += fill.input_amount;
        self.effective_buys += 1;
        if self.first_buy_at.is_none() {
            self.first_buy_at = Some(fill.timestamp);
        }
    }

    fn sell(&mut self, fill: &Fill) {
        let mut remaining = fill.input_amount;
        let mut cost_of_sold = 0.0;
        let mut held_since = None;

        while remaining > 0.0 {
            let Some(lot) = self.lots.front_mut() else {
                break;
            };
            if held_since.is_none() {
                held_since = Some(lot.opened_at);
            }

            let portion = remaining.min(lot.amount);
            let portion_cost = lot.unit_cost() * portion;
            cost_of_sold += portion_cost;
            lot.amount -= portion;
            lot.cost -= portion_cost;
            remaining -= portion;

            if lot.amount <= self.lot_epsilon {
                self.lots.pop_front();
            }
        }

        if remaining > self.lot_epsilon {
            warn!(
                requested = fill.input_amount,
                unconsumed = remaining,
                "sell exceeds open lots; fill sequence may be incomplete"
            );
            self.unconsumed_sell_amount += remaining;
        }

        let pnl = fill.output_amount - cost_of_sold;
        self.total_received += fill.output_amount;
        self.total_realized_pnl += pnl;
        self.last_sell_at = Some(fill.timestamp);
        self.realized_sells.push(RealizedSell {
            timestamp: fill.timestamp,
            requested: fill.input_amount,
            consumed: fill.input_amount - remaining.max(0.0),
            proceeds: fill.output_amount,
            cost_of_sold,
            pnl,
            held_since,
        });
    }

    fn finish(self) -> PositionResult {
        let remaining_amount: f64 = self.lots.iter().map(|l| l.amount).sum();
        let remaining_cost: f64 = self.lots.iter().map(|l| l.cost).sum();

        let total_cost = if self.total_spent == 0.0 {
            1.0
        } else {
            self.total_spent
        };
        let total_value = self.total_received + remaining_cost;
        let return_rate = (total_value - total_cost) / total_cost * 100.0;

        let status = if self.effective_buys > 0 && self.lots.is_empty() {
            PositionStatus::Exited
        } else if !self.lots.is_empty() || self.total_received > 0.0 {
            PositionStatus::Bought
        } else {
            PositionStatus::Monitoring
        };

        PositionResult {
            total_realized_pnl: self.total_realized_pnl,
            remaining_amount,
            remaining_cost,
            open_lots: self.lots.into_iter().collect(),
            total_spent: self.total_spent,
            total_received: self.total_received,
            total_cost,
            total_value,
            return_rate,
            status,
            unconsumed_sell_amount: self.unconsumed_sell_amount,
            ignored_fills: self.ignored_fills,
            processed_fills: self.processed_fills,
            realized_sells: self.realized_sells,
            first_buy_at: self.first_buy_at,
            last_sell_at: self.last_sell_at,
        }
    }
}

/// Replay the successful fills in `fills` in order. `None` when there are no
/// successful fills to account for.
pub fn compute_pnl(fills: &[Fill], lot_epsilon: f64) -> Option<PositionResult> {
    let mut successful = fills.iter().filter(|f| f.success).peekable();
    successful.peek()?;

    let mut ledger = Ledger::new(lot_epsilon);
    for fill in successful {
        ledger.apply(fill);
    }
    Some(ledger.finish())
}
