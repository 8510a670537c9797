use crate::error::{Result, TaxError};
use crate::ledger::Side;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// Section 104 holding: all shares of one security acquired and not matched
/// under the same-day or 30-day rules, held at their pooled cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section104Pool {
    pub holding: String,
    pub pooled_qty: Decimal,
    pub pooled_cost: Decimal,
}

impl Section104Pool {
    pub fn new(holding: impl Into<String>) -> Self {
        Section104Pool {
            holding: holding.into(),
            pooled_qty: Decimal::ZERO,
            pooled_cost: Decimal::ZERO,
        }
    }

    /// Average cost per share; zero for an empty pool
    pub fn avg_cost(&self) -> Decimal {
        if self.pooled_qty.is_zero() {
            Decimal::ZERO
        } else {
            self.pooled_cost / self.pooled_qty
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pooled_qty.is_zero()
    }

    /// Add to the pool (acquisition)
    pub fn add(&mut self, quantity: Decimal, cost: Decimal) {
        self.pooled_qty += quantity;
        self.pooled_cost += cost;
        log::debug!(
            "Pool {} ADD: qty={}, cost={}. New total: qty={}, cost={}",
            self.holding,
            quantity,
            cost,
            self.pooled_qty,
            self.pooled_cost
        );
    }

    /// Remove from the pool (disposal) at the current average cost and return
    /// the allowable cost taken out. Never clamps: asking for more than the
    /// pool holds is an error and leaves the pool untouched.
    pub fn remove(&mut self, quantity: Decimal, transaction: &str, date: NaiveDate) -> Result<Decimal> {
        if quantity > self.pooled_qty {
            return Err(TaxError::InsufficientPoolQuantity {
                holding: self.holding.clone(),
                transaction: transaction.to_string(),
                date,
                required: quantity,
                available: self.pooled_qty,
            });
        }

        let cost = if quantity == self.pooled_qty {
            self.pooled_cost
        } else {
            pro_rata(self.pooled_cost, quantity, self.pooled_qty)
        };
        self.pooled_qty -= quantity;
        self.pooled_cost -= cost;
        log::debug!(
            "Pool {} REMOVE: qty={}, cost={}. Remaining: qty={}, cost={}",
            self.holding,
            quantity,
            cost,
            self.pooled_qty,
            self.pooled_cost
        );
        Ok(cost)
    }
}

/// `total * part / whole` for `part <= whole`, dividing first when the product overflows
pub(crate) fn pro_rata(total: Decimal, part: Decimal, whole: Decimal) -> Decimal {
    match total.checked_mul(part) {
        Some(product) => product / whole,
        None => total / whole * part,
    }
}

/// Pool state after one transaction of a holding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolHistoryEntry {
    pub date: NaiveDate,
    pub transaction: String,
    pub side: Side,
    /// Quantity of the transaction that went through the pool
    pub pool_quantity: Decimal,
    pub pooled_qty: Decimal,
    pub pooled_cost: Decimal,
}

impl PoolHistoryEntry {
    pub fn avg_cost(&self) -> Decimal {
        if self.pooled_qty.is_zero() {
            Decimal::ZERO
        } else {
            self.pooled_cost / self.pooled_qty
        }
    }
}
