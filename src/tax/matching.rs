//! Share identification for disposals.
//!
//! Every sell is matched, in order, against:
//! 1. acquisitions on the same day (same-day rule),
//! 2. acquisitions in the following `window_days` days, earliest first (bed & breakfast rule),
//! 3. the Section 104 pool at its average cost immediately before the sale.
//!
//! Losses on quantity matched under rule 2 are disallowed; gains are not.
//! A sell can never exceed the shares held at that point: later repurchases
//! decide the cost of a sale, not whether it could happen.

use crate::error::{Result, TaxError};
use crate::ledger::Transaction;
use crate::tax::pool::{pro_rata, PoolHistoryEntry, Section104Pool};
use crate::tax::uk::{TaxCalendar, TaxYear};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

/// Which HMRC rule was used for matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchingRule {
    SameDay,
    BedAndBreakfast,
    Pool,
}

impl MatchingRule {
    pub fn display(&self) -> &'static str {
        match self {
            MatchingRule::SameDay => "Same-Day",
            MatchingRule::BedAndBreakfast => "B&B",
            MatchingRule::Pool => "Pool",
        }
    }
}

impl std::fmt::Display for MatchingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// One portion of a disposal: a (sell, buy) pairing, or the pool-costed remainder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisposalMatch {
    pub sell_tx: String,
    pub rule: MatchingRule,
    /// The acquisition matched; `None` for the pool portion
    pub matched_buy_tx: Option<String>,
    pub matched_date: Option<NaiveDate>,
    pub qty_matched: Decimal,
    pub cost: Decimal,
    pub proceeds: Decimal,
    pub disallowed_loss: Decimal,
}

impl DisposalMatch {
    pub fn gain(&self) -> Decimal {
        self.proceeds - self.cost
    }
}

/// Snapshot of pool state at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub quantity: Decimal,
    pub cost: Decimal,
}

impl From<&Section104Pool> for PoolSnapshot {
    fn from(pool: &Section104Pool) -> Self {
        PoolSnapshot {
            quantity: pool.pooled_qty,
            cost: pool.pooled_cost,
        }
    }
}

/// Record of a disposal for CGT purposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disposal {
    pub sell_tx: String,
    /// Ledger sequence of the sell
    pub sequence: u64,
    pub holding: String,
    pub date: NaiveDate,
    pub tax_year: TaxYear,
    pub quantity: Decimal,
    /// Sale consideration net of fees
    pub proceeds: Decimal,
    pub allowable_cost: Decimal,
    pub disallowed_loss: Decimal,
    pub matches: Vec<DisposalMatch>,
    /// Pool state after this disposal
    pub pool_after: PoolSnapshot,
}

impl Disposal {
    pub fn gain(&self) -> Decimal {
        self.proceeds - self.allowable_cost
    }

    /// Report order: trade date, then the order the sells were recorded
    pub fn ordering_key(&self) -> (NaiveDate, u64) {
        (self.date, self.sequence)
    }

    /// Gain or loss that counts for tax: disallowed losses added back
    pub fn allowable_gain(&self) -> Decimal {
        self.gain() + self.disallowed_loss
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchingOptions {
    pub window_days: u32,
    pub same_day_rule: bool,
    pub calendar: TaxCalendar,
}

impl Default for MatchingOptions {
    fn default() -> Self {
        MatchingOptions {
            window_days: 30,
            same_day_rule: true,
            calendar: TaxCalendar::default(),
        }
    }
}

/// Everything derived from one holding's transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldingComputation {
    pub holding: String,
    pub pool: Section104Pool,
    pub history: Vec<PoolHistoryEntry>,
    pub disposals: Vec<Disposal>,
}

impl HoldingComputation {
    pub fn matches(&self) -> impl Iterator<Item = &DisposalMatch> {
        self.disposals.iter().flat_map(|d| d.matches.iter())
    }
}

/// Acquisition quantity claimed by a disposal before the pool is touched
#[derive(Debug, Clone, Copy)]
struct Allocation {
    buy: usize,
    rule: MatchingRule,
    quantity: Decimal,
    cost: Decimal,
}

/// Replay one holding's transactions, matching every disposal and building the pool.
///
/// `transactions` must all belong to `holding` and be strictly ordered by
/// `(trade_date, sequence)`.
pub fn compute_holding(
    holding: &str,
    transactions: &[&Transaction],
    options: &MatchingOptions,
) -> Result<HoldingComputation> {
    check_order(holding, transactions)?;

    let mut claimed: Vec<Decimal> = vec![Decimal::ZERO; transactions.len()];
    let mut claimed_cost: Vec<Decimal> = vec![Decimal::ZERO; transactions.len()];
    let mut allocations: Vec<Vec<Allocation>> = vec![Vec::new(); transactions.len()];

    let sells: Vec<usize> = (0..transactions.len())
        .filter(|&i| transactions[i].is_sell())
        .collect();

    // Same-day matches for every disposal take priority over any 30-day match
    if options.same_day_rule {
        for &s in &sells {
            let sell = transactions[s];
            let candidates = (0..transactions.len()).filter(|&b| {
                transactions[b].is_buy() && transactions[b].trade_date == sell.trade_date
            });
            allocate(
                s,
                candidates,
                MatchingRule::SameDay,
                transactions,
                &mut claimed,
                &mut claimed_cost,
                &mut allocations,
            );
        }
    }

    let window = Duration::days(i64::from(options.window_days));
    for &s in &sells {
        let sell = transactions[s];
        let window_end = sell
            .trade_date
            .checked_add_signed(window)
            .unwrap_or(NaiveDate::MAX);
        let candidates = (0..transactions.len()).filter(|&b| {
            let buy = transactions[b];
            buy.is_buy() && buy.trade_date > sell.trade_date && buy.trade_date <= window_end
        });
        allocate(
            s,
            candidates,
            MatchingRule::BedAndBreakfast,
            transactions,
            &mut claimed,
            &mut claimed_cost,
            &mut allocations,
        );
    }

    let mut pool = Section104Pool::new(holding);
    let mut history = Vec::with_capacity(transactions.len());
    let mut disposals = Vec::new();
    // shares owned after each transaction, regardless of how they were matched
    let mut held = Decimal::ZERO;

    for (i, tx) in transactions.iter().enumerate() {
        let pool_quantity = if tx.is_buy() {
            held += tx.quantity;
            let unmatched = tx.quantity - claimed[i];
            if unmatched > Decimal::ZERO {
                pool.add(unmatched, tx.total_cost() - claimed_cost[i]);
            }
            unmatched
        } else {
            let available = held + later_same_day_buys(i, transactions, options);
            if tx.quantity > available {
                return Err(TaxError::InsufficientPoolQuantity {
                    holding: holding.to_string(),
                    transaction: tx.id.clone(),
                    date: tx.trade_date,
                    required: tx.quantity,
                    available,
                });
            }
            held -= tx.quantity;
            let disposal = dispose(tx, &allocations[i], transactions, &mut pool, options)?;
            let from_pool: Decimal = disposal
                .matches
                .iter()
                .filter(|m| m.rule == MatchingRule::Pool)
                .map(|m| m.qty_matched)
                .sum();
            disposals.push(disposal);
            from_pool
        };

        history.push(PoolHistoryEntry {
            date: tx.trade_date,
            transaction: tx.id.clone(),
            side: tx.side,
            pool_quantity,
            pooled_qty: pool.pooled_qty,
            pooled_cost: pool.pooled_cost,
        });
    }

    Ok(HoldingComputation {
        holding: holding.to_string(),
        pool,
        history,
        disposals,
    })
}

/// Quantity bought on the same day as sell `s` but recorded after it
fn later_same_day_buys(s: usize, transactions: &[&Transaction], options: &MatchingOptions) -> Decimal {
    if !options.same_day_rule {
        return Decimal::ZERO;
    }
    let day = transactions[s].trade_date;
    transactions[s + 1..]
        .iter()
        .take_while(|t| t.trade_date == day)
        .filter(|t| t.is_buy())
        .map(|t| t.quantity)
        .sum()
}

fn check_order(holding: &str, transactions: &[&Transaction]) -> Result<()> {
    let order_error = |reason: String| TaxError::InvalidTransactionOrder {
        holding: holding.to_string(),
        reason,
    };
    if let Some(tx) = transactions.iter().find(|t| t.ticker != holding) {
        return Err(order_error(format!(
            "transaction {} belongs to {}",
            tx.id, tx.ticker
        )));
    }
    for pair in transactions.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if prev.id == next.id {
            return Err(order_error(format!("transaction {} appears twice", next.id)));
        }
        if next.ordering_key() <= prev.ordering_key() {
            return Err(order_error(format!(
                "transaction {} ({}, #{}) comes after {} ({}, #{})",
                next.id, next.trade_date, next.sequence, prev.id, prev.trade_date, prev.sequence
            )));
        }
    }
    Ok(())
}

/// Claim unclaimed acquisition quantity for sell `s` from `candidates`, in order
fn allocate(
    s: usize,
    candidates: impl Iterator<Item = usize>,
    rule: MatchingRule,
    transactions: &[&Transaction],
    claimed: &mut [Decimal],
    claimed_cost: &mut [Decimal],
    allocations: &mut [Vec<Allocation>],
) {
    let sell = transactions[s];
    let mut remaining = sell.quantity - allocations[s].iter().map(|a| a.quantity).sum::<Decimal>();

    for b in candidates {
        if remaining <= Decimal::ZERO {
            break;
        }
        let buy = transactions[b];
        let available = buy.quantity - claimed[b];
        if available <= Decimal::ZERO {
            continue;
        }
        let quantity = remaining.min(available);
        let cost = if quantity == available {
            // last slice of the acquisition takes whatever cost is left
            buy.total_cost() - claimed_cost[b]
        } else {
            pro_rata(buy.total_cost(), quantity, buy.quantity)
        };
        claimed[b] += quantity;
        claimed_cost[b] += cost;
        remaining -= quantity;
        log::debug!(
            "{} match: {} {} sold on {} against {} bought on {} at cost {}",
            rule,
            quantity,
            sell.ticker,
            sell.trade_date,
            buy.id,
            buy.trade_date,
            cost
        );
        allocations[s].push(Allocation {
            buy: b,
            rule,
            quantity,
            cost,
        });
    }
}

fn dispose(
    sell: &Transaction,
    allocations: &[Allocation],
    transactions: &[&Transaction],
    pool: &mut Section104Pool,
    options: &MatchingOptions,
) -> Result<Disposal> {
    let mut parts: Vec<(MatchingRule, Option<&Transaction>, Decimal, Decimal)> = allocations
        .iter()
        .map(|a| (a.rule, Some(transactions[a.buy]), a.quantity, a.cost))
        .collect();

    let matched: Decimal = allocations.iter().map(|a| a.quantity).sum();
    let from_pool = sell.quantity - matched;
    if from_pool > Decimal::ZERO {
        let cost = pool.remove(from_pool, &sell.id, sell.trade_date)?;
        log::debug!(
            "Pool match: {} {} at cost {}",
            from_pool,
            sell.ticker,
            cost
        );
        parts.push((MatchingRule::Pool, None, from_pool, cost));
    }

    let total_proceeds = sell.net_proceeds();
    let mut proceeds_left = total_proceeds;
    let last = parts.len().saturating_sub(1);

    let matches: Vec<DisposalMatch> = parts
        .into_iter()
        .enumerate()
        .map(|(n, (rule, buy, quantity, cost))| {
            let proceeds = if n == last {
                proceeds_left
            } else {
                pro_rata(total_proceeds, quantity, sell.quantity)
            };
            proceeds_left -= proceeds;
            let disallowed_loss = if rule == MatchingRule::BedAndBreakfast {
                (cost - proceeds).max(Decimal::ZERO)
            } else {
                Decimal::ZERO
            };
            DisposalMatch {
                sell_tx: sell.id.clone(),
                rule,
                matched_buy_tx: buy.map(|b| b.id.clone()),
                matched_date: buy.map(|b| b.trade_date),
                qty_matched: quantity,
                cost,
                proceeds,
                disallowed_loss,
            }
        })
        .collect();

    Ok(Disposal {
        sell_tx: sell.id.clone(),
        sequence: sell.sequence,
        holding: sell.ticker.clone(),
        date: sell.trade_date,
        tax_year: options.calendar.tax_year(sell.trade_date),
        quantity: sell.quantity,
        proceeds: total_proceeds,
        allowable_cost: matches.iter().map(|m| m.cost).sum(),
        disallowed_loss: matches.iter().map(|m| m.disallowed_loss).sum(),
        matches,
        pool_after: PoolSnapshot::from(&*pool),
    })
}
