//! Tax-loss harvesting: score held positions that stand at a loss.
//!
//! Scores are relative and only meant for ranking. They depend on the
//! current price so they are recomputed on every call.

use crate::config::HarvestConfig;
use crate::ledger::{Holding, Transaction};
use crate::tax::matching::Disposal;
use crate::tax::pool::Section104Pool;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockReason {
    /// A sale inside the window is still open to matching
    RecentDisposal,
    /// A sale today would be matched by an acquisition already on the ledger
    PendingRepurchase,
}

impl BlockReason {
    pub fn display(&self) -> &'static str {
        match self {
            BlockReason::RecentDisposal => "recent disposal",
            BlockReason::PendingRepurchase => "pending repurchase",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HarvestBlock {
    pub reason: BlockReason,
    pub trigger_date: NaiveDate,
    pub clears_on: NaiveDate,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlhOpportunity {
    pub ticker: String,
    pub name: String,
    pub pooled_qty: Decimal,
    pub avg_cost: Decimal,
    pub current_price: Decimal,
    pub cost_basis: Decimal,
    pub market_value: Decimal,
    pub unrealised_pnl: Decimal,
    pub unrealised_pnl_pct: Decimal,
    /// 0 to 100, higher is a better harvest
    pub score: Decimal,
    pub eligible: bool,
    pub block: Option<HarvestBlock>,
    pub reason: String,
}

/// Outcome of selling a whole position on one day, replayed against the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestPreview {
    pub ticker: String,
    pub as_of: NaiveDate,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fees: Decimal,
    /// Sale proceeds net of fees
    pub proceeds: Decimal,
    pub allowable_cost: Decimal,
    pub realised_loss: Decimal,
    /// Part of the realised loss lost to acquisitions already in the window
    pub disallowed_loss: Decimal,
    /// Loss that would count against gains
    pub allowable_loss: Decimal,
    pub block: Option<HarvestBlock>,
    pub disposal: Disposal,
}

impl HarvestPreview {
    pub fn new(
        as_of: NaiveDate,
        price: Decimal,
        fees: Decimal,
        disposal: Disposal,
        block: Option<HarvestBlock>,
    ) -> Self {
        let realised_loss = (-disposal.gain()).max(Decimal::ZERO);
        let allowable_loss = (-disposal.allowable_gain()).max(Decimal::ZERO);
        HarvestPreview {
            ticker: disposal.holding.clone(),
            as_of,
            quantity: disposal.quantity,
            price,
            fees,
            proceeds: disposal.proceeds,
            allowable_cost: disposal.allowable_cost,
            realised_loss,
            disallowed_loss: disposal.disallowed_loss,
            allowable_loss,
            block,
            disposal,
        }
    }

    pub fn eligible(&self) -> bool {
        self.block.is_none()
    }
}

/// Work out whether harvesting on `as_of` would run into the matching window.
///
/// `transactions` is the holding's full history, including anything after `as_of`.
pub fn harvest_block(
    transactions: &[&Transaction],
    as_of: NaiveDate,
    window_days: u32,
) -> Option<HarvestBlock> {
    let window = Duration::days(i64::from(window_days));
    let window_start = as_of.checked_sub_signed(window).unwrap_or(NaiveDate::MIN);
    let window_end = as_of.checked_add_signed(window).unwrap_or(NaiveDate::MAX);

    let recent = transactions
        .iter()
        .filter(|t| t.is_sell() && t.trade_date <= as_of && t.trade_date >= window_start)
        .map(|t| t.trade_date)
        .max()
        .map(|sold| {
            let clears_on = sold
                .checked_add_signed(window + Duration::days(1))
                .unwrap_or(NaiveDate::MAX);
            (BlockReason::RecentDisposal, sold, clears_on)
        });

    let pending = transactions
        .iter()
        .filter(|t| t.is_buy() && t.trade_date > as_of && t.trade_date <= window_end)
        .map(|t| t.trade_date)
        .max()
        .map(|bought| {
            let clears_on = bought.succ_opt().unwrap_or(NaiveDate::MAX);
            (BlockReason::PendingRepurchase, bought, clears_on)
        });

    recent
        .into_iter()
        .chain(pending)
        .max_by_key(|(_, _, clears_on)| *clears_on)
        .map(|(reason, trigger_date, clears_on)| HarvestBlock {
            reason,
            trigger_date,
            clears_on,
            days_remaining: (clears_on - as_of).num_days(),
        })
}

/// Harvest score for a loss of `loss` pounds that is `loss_pct` percent of cost
pub fn score(loss: Decimal, loss_pct: Decimal, blocked: bool, config: &HarvestConfig) -> Decimal {
    if loss <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let magnitude = loss / (loss + config.loss_scale);
    let percentage = loss_pct.max(Decimal::ZERO).min(config.percentage_cap) / config.percentage_cap;
    let mut score =
        dec!(100) * (config.magnitude_weight * magnitude + config.percentage_weight * percentage);
    if blocked {
        score *= config.blocked_penalty;
    }
    score.round_dp(2)
}

fn band(loss_pct: Decimal) -> &'static str {
    if loss_pct >= dec!(20) {
        "significant"
    } else if loss_pct >= dec!(10) {
        "moderate"
    } else {
        "small"
    }
}

/// Build the opportunity for one held position, or `None` when it is not at a loss
pub fn evaluate(
    holding: &Holding,
    pool: &Section104Pool,
    current_price: Decimal,
    block: Option<HarvestBlock>,
    config: &HarvestConfig,
) -> Option<TlhOpportunity> {
    if pool.is_empty() {
        return None;
    }
    let avg_cost = pool.avg_cost();
    if current_price >= avg_cost {
        return None;
    }

    let cost_basis = pool.pooled_cost;
    let market_value = pool.pooled_qty.checked_mul(current_price)?;
    let unrealised_pnl = market_value - cost_basis;
    let loss = -unrealised_pnl;
    if loss < config.min_unrealised_loss {
        log::debug!(
            "{}: loss {} below harvest minimum {}",
            holding.ticker,
            loss,
            config.min_unrealised_loss
        );
        return None;
    }
    let unrealised_pnl_pct = if cost_basis.is_zero() {
        Decimal::ZERO
    } else {
        unrealised_pnl / cost_basis * dec!(100)
    };
    let loss_pct = -unrealised_pnl_pct;

    let score = score(loss, loss_pct, block.is_some(), config);
    let constraint = match &block {
        None => "eligible to harvest now".to_string(),
        Some(b) => format!(
            "blocked by {} on {} until {} ({} days)",
            b.reason.display(),
            b.trigger_date,
            b.clears_on,
            b.days_remaining
        ),
    };
    let reason = format!(
        "Unrealised loss of £{:.2} ({:.1}%), {}: {} opportunity",
        loss,
        loss_pct,
        constraint,
        band(loss_pct)
    );

    Some(TlhOpportunity {
        ticker: holding.ticker.clone(),
        name: holding.name.clone(),
        pooled_qty: pool.pooled_qty,
        avg_cost,
        current_price,
        cost_basis,
        market_value,
        unrealised_pnl,
        unrealised_pnl_pct,
        score,
        eligible: block.is_none(),
        block,
        reason,
    })
}

/// Highest score first, ties by ticker
pub fn rank(mut opportunities: Vec<TlhOpportunity>) -> Vec<TlhOpportunity> {
    opportunities.sort_by(|a, b| match b.score.cmp(&a.score) {
        Ordering::Equal => a.ticker.cmp(&b.ticker),
        other => other,
    });
    opportunities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{buy, date, ledger, sell};

    fn pool(qty: Decimal, cost: Decimal) -> Section104Pool {
        let mut pool = Section104Pool::new("ABC");
        pool.add(qty, cost);
        pool
    }

    #[test]
    fn gains_and_empty_pools_are_not_opportunities() {
        let config = HarvestConfig::default();
        let holding = Holding::new("ABC");
        assert!(evaluate(&holding, &Section104Pool::new("ABC"), dec!(5), None, &config).is_none());
        assert!(evaluate(&holding, &pool(dec!(10), dec!(100)), dec!(10), None, &config).is_none());
        assert!(evaluate(&holding, &pool(dec!(10), dec!(100)), dec!(12), None, &config).is_none());
    }

    #[test]
    fn loss_position_is_described() {
        let config = HarvestConfig::default();
        let opp = evaluate(
            &Holding::new("ABC"),
            &pool(dec!(100), dec!(1000)),
            dec!(8.5),
            None,
            &config,
        )
        .unwrap();
        assert_eq!(opp.market_value, dec!(850));
        assert_eq!(opp.unrealised_pnl, dec!(-150));
        assert_eq!(opp.unrealised_pnl_pct, dec!(-15));
        assert!(opp.eligible);
        // 100 * (0.5 * 150/1150 + 0.5 * 15/50)
        assert_eq!(opp.score, dec!(21.52));
        assert_eq!(
            opp.reason,
            "Unrealised loss of £150.00 (15.0%), eligible to harvest now: moderate opportunity"
        );
    }

    #[test]
    fn minimum_loss_filters_small_positions() {
        let config = HarvestConfig {
            min_unrealised_loss: dec!(200),
            ..HarvestConfig::default()
        };
        let opp = evaluate(
            &Holding::new("ABC"),
            &pool(dec!(100), dec!(1000)),
            dec!(8.5),
            None,
            &config,
        );
        assert!(opp.is_none());
    }

    #[test]
    fn score_is_bounded_and_monotonic() {
        let config = HarvestConfig::default();
        let mut previous = Decimal::ZERO;
        for loss in [dec!(1), dec!(10), dec!(100), dec!(1000), dec!(1000000)] {
            let s = score(loss, dec!(10), false, &config);
            assert!(s > previous);
            assert!(s <= dec!(100));
            previous = s;
        }
        let mut previous = Decimal::ZERO;
        for pct in [dec!(1), dec!(5), dec!(25), dec!(49)] {
            let s = score(dec!(500), pct, false, &config);
            assert!(s > previous);
            previous = s;
        }
        assert_eq!(
            score(dec!(500), dec!(50), false, &config),
            score(dec!(500), dec!(90), false, &config)
        );
        assert_eq!(score(Decimal::ZERO, dec!(10), false, &config), Decimal::ZERO);
    }

    #[test]
    fn blocked_score_is_penalised() {
        let config = HarvestConfig::default();
        let open = score(dec!(1000), dec!(50), false, &config);
        let blocked = score(dec!(1000), dec!(50), true, &config);
        assert_eq!(open, dec!(75));
        assert_eq!(blocked, dec!(7.5));
    }

    #[test]
    fn recent_sale_blocks_until_window_passes() {
        let l = ledger(vec![
            buy("2024-01-01", "ABC", dec!(100), dec!(10)),
            sell("2024-06-01", "ABC", dec!(10), dec!(8)),
        ]);
        let txs = l.transactions_for("ABC");
        let block = harvest_block(&txs, date("2024-06-10"), 30).unwrap();
        assert_eq!(block.reason, BlockReason::RecentDisposal);
        assert_eq!(block.trigger_date, date("2024-06-01"));
        assert_eq!(block.clears_on, date("2024-07-02"));
        assert_eq!(block.days_remaining, 22);

        assert!(harvest_block(&txs, date("2024-07-01"), 30).is_some());
        assert!(harvest_block(&txs, date("2024-07-02"), 30).is_none());
    }

    #[test]
    fn upcoming_purchase_blocks_harvest() {
        let l = ledger(vec![
            buy("2024-01-01", "ABC", dec!(100), dec!(10)),
            buy("2024-06-20", "ABC", dec!(10), dec!(8)),
        ]);
        let txs = l.transactions_for("ABC");
        let block = harvest_block(&txs, date("2024-06-10"), 30).unwrap();
        assert_eq!(block.reason, BlockReason::PendingRepurchase);
        assert_eq!(block.trigger_date, date("2024-06-20"));
        assert_eq!(block.days_remaining, 11);

        // purchase more than a window away does not count
        assert!(harvest_block(&txs, date("2024-05-20"), 30).is_none());
    }

    #[test]
    fn latest_clearing_block_is_reported() {
        let l = ledger(vec![
            buy("2024-01-01", "ABC", dec!(100), dec!(10)),
            sell("2024-06-01", "ABC", dec!(10), dec!(8)),
            buy("2024-07-05", "ABC", dec!(10), dec!(8)),
        ]);
        let txs = l.transactions_for("ABC");
        let block = harvest_block(&txs, date("2024-06-10"), 30).unwrap();
        assert_eq!(block.reason, BlockReason::PendingRepurchase);
        assert_eq!(block.clears_on, date("2024-07-06"));
    }

    #[test]
    fn window_running_past_the_calendar_saturates() {
        let l = ledger(vec![
            buy("2024-01-01", "ABC", dec!(100), dec!(10)),
            sell("2024-06-01", "ABC", dec!(10), dec!(8)),
        ]);
        let txs = l.transactions_for("ABC");
        let block = harvest_block(&txs, date("2024-06-10"), u32::MAX).unwrap();
        assert_eq!(block.reason, BlockReason::RecentDisposal);
        assert_eq!(block.clears_on, NaiveDate::MAX);
    }

    #[test]
    fn ranking_orders_by_score_then_ticker() {
        let config = HarvestConfig::default();
        let make = |ticker: &str, price: Decimal| {
            let mut p = pool(dec!(100), dec!(1000));
            p.holding = ticker.to_string();
            evaluate(&Holding::new(ticker), &p, price, None, &config).unwrap()
        };
        let ranked = rank(vec![make("BBB", dec!(9)), make("CCC", dec!(5)), make("AAA", dec!(9))]);
        let order: Vec<&str> = ranked.iter().map(|o| o.ticker.as_str()).collect();
        assert_eq!(order, vec!["CCC", "AAA", "BBB"]);
    }
}
