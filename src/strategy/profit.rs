//! Running estimate of hedged profit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Sum of potential profit over every submitted hedge, plus fill counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfitAccumulator {
    total: Decimal,
    hedge_count: u64,
    unhedged_count: u64,
}

impl ProfitAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from persisted totals.
    pub fn restore(total: Decimal, hedge_count: u64, unhedged_count: u64) -> Self {
        Self {
            total,
            hedge_count,
            unhedged_count,
        }
    }

    pub fn record_hedge(&mut self, profit: Decimal) {
        self.total += profit;
        self.hedge_count += 1;
    }

    pub fn record_unhedged(&mut self) {
        self.unhedged_count += 1;
    }

    /// Total potential profit in taker quote units. May be negative.
    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn hedge_count(&self) -> u64 {
        self.hedge_count
    }

    pub fn unhedged_count(&self) -> u64 {
        self.unhedged_count
    }
}
