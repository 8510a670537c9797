//! Pools command - Section 104 pool balances and history

use crate::cmd::{format_gbp, format_gbp_signed, format_quantity, load_engine, read_prices};
use chrono::NaiveDate;
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use taxlot::config::EngineConfig;
use taxlot::prices::PriceSource;
use taxlot::tax::{HoldingComputation, PoolHistoryEntry, Section104Pool};
use taxlot::TaxEngine;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct PoolsCommand {
    /// Ledger file (CSV or JSON). Reads from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Only show this holding
    #[arg(short, long)]
    ticker: Option<String>,

    /// Show the pool after every transaction instead of current balances
    #[arg(long)]
    history: bool,

    /// Price CSV (ticker,date,price) for valuing pools
    #[arg(short, long)]
    prices: Option<PathBuf>,

    /// Only include transactions up to this date; also the valuation date
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Output as JSON instead of formatted table
    #[arg(long)]
    json: bool,
}

/// Pool balance with optional market valuation
#[derive(Debug, Clone, Serialize)]
struct PoolView {
    holding: String,
    name: String,
    pooled_qty: Decimal,
    pooled_cost: Decimal,
    avg_cost: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    market_value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unrealised_pnl: Option<Decimal>,
}

impl PoolView {
    fn new(pool: &Section104Pool, name: &str, price: Option<Decimal>) -> Self {
        let market_value = price.map(|p| p * pool.pooled_qty);
        PoolView {
            holding: pool.holding.clone(),
            name: name.to_string(),
            pooled_qty: pool.pooled_qty,
            pooled_cost: pool.pooled_cost,
            avg_cost: pool.avg_cost(),
            price,
            market_value,
            unrealised_pnl: market_value.map(|v| v - pool.pooled_cost),
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryView<'a> {
    holding: &'a str,
    entries: &'a [PoolHistoryEntry],
}

impl PoolsCommand {
    pub fn exec(&self, config: &EngineConfig) -> anyhow::Result<()> {
        let mut engine = load_engine(&self.file, config)?;
        if let Some(as_of) = self.as_of {
            engine = TaxEngine::new(engine.ledger().up_to(as_of), config.clone())?;
        }

        let computations = match &self.ticker {
            Some(ticker) => vec![engine.compute(ticker)?],
            None => engine.compute_all()?,
        };

        if self.history {
            if self.json {
                let views: Vec<HistoryView> = computations
                    .iter()
                    .map(|c| HistoryView {
                        holding: &c.holding,
                        entries: &c.history,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                self.print_history(&computations);
            }
            return Ok(());
        }

        let prices = self.prices.as_deref().map(read_prices).transpose()?;
        let valuation_date = self
            .as_of
            .unwrap_or_else(|| chrono::Local::now().date_naive());

        let views: Vec<PoolView> = computations
            .iter()
            .filter(|c| self.ticker.is_some() || !c.pool.is_empty())
            .map(|c| {
                let name = engine
                    .ledger()
                    .holding(&c.holding)
                    .map_or(c.holding.as_str(), |h| h.name.as_str());
                let price = prices
                    .as_ref()
                    .and_then(|p| p.price(&c.holding, valuation_date));
                if prices.is_some() && price.is_none() {
                    log::warn!("No price for {} on or before {}", c.holding, valuation_date);
                }
                PoolView::new(&c.pool, name, price)
            })
            .collect();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&views)?);
        } else {
            self.print_balances(&views);
        }
        Ok(())
    }

    fn print_balances(&self, views: &[PoolView]) {
        if views.is_empty() {
            println!("No pool balances found matching filters");
            return;
        }

        println!();
        match self.as_of {
            Some(date) => println!("POOL BALANCES (as of {})", date),
            None => println!("POOL BALANCES"),
        }
        println!();

        let mut table = if self.prices.is_some() {
            let rows: Vec<ValuedRow> = views
                .iter()
                .map(|v| ValuedRow {
                    holding: v.holding.clone(),
                    quantity: format_quantity(v.pooled_qty),
                    cost: format_gbp(v.pooled_cost),
                    avg_cost: format_gbp(v.avg_cost),
                    price: v.price.map(format_gbp).unwrap_or_else(|| "-".to_string()),
                    value: v.market_value.map(format_gbp).unwrap_or_else(|| "-".to_string()),
                    unrealised: v
                        .unrealised_pnl
                        .map(format_gbp_signed)
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            Table::new(rows)
        } else {
            let rows: Vec<BalanceRow> = views
                .iter()
                .map(|v| BalanceRow {
                    holding: v.holding.clone(),
                    name: v.name.clone(),
                    quantity: format_quantity(v.pooled_qty),
                    cost: format_gbp(v.pooled_cost),
                    avg_cost: format_gbp(v.avg_cost),
                })
                .collect();
            Table::new(rows)
        };

        let table = table
            .with(Style::rounded())
            .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
            .to_string();
        println!("{}", table);
    }

    fn print_history(&self, computations: &[HoldingComputation]) {
        let rows: Vec<HistoryRow> = computations
            .iter()
            .flat_map(|c| {
                c.history.iter().map(move |e| HistoryRow {
                    date: e.date.format("%Y-%m-%d").to_string(),
                    holding: c.holding.clone(),
                    transaction: e.transaction.clone(),
                    side: e.side.display().to_string(),
                    pooled: format_quantity(e.pool_quantity),
                    quantity: format_quantity(e.pooled_qty),
                    cost: format_gbp(e.pooled_cost),
                    avg_cost: format_gbp(e.avg_cost()),
                })
            })
            .collect();

        if rows.is_empty() {
            println!("No pool history found matching filters");
            return;
        }

        println!();
        println!("POOL HISTORY");
        println!();

        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
            .to_string();
        println!("{}", table);
    }
}

#[derive(Debug, Clone, Tabled)]
struct BalanceRow {
    #[tabled(rename = "Holding")]
    holding: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Cost (GBP)")]
    cost: String,
    #[tabled(rename = "Avg Cost")]
    avg_cost: String,
}

#[derive(Debug, Clone, Tabled)]
struct ValuedRow {
    #[tabled(rename = "Holding")]
    holding: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Cost (GBP)")]
    cost: String,
    #[tabled(rename = "Avg Cost")]
    avg_cost: String,
    #[tabled(rename = "Price")]
    price: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unrealised")]
    unrealised: String,
}

#[derive(Debug, Clone, Tabled)]
struct HistoryRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Holding")]
    holding: String,
    #[tabled(rename = "Tx")]
    transaction: String,
    #[tabled(rename = "Side")]
    side: String,
    #[tabled(rename = "Via Pool")]
    pooled: String,
    #[tabled(rename = "Pool Qty")]
    quantity: String,
    #[tabled(rename = "Pool Cost")]
    cost: String,
    #[tabled(rename = "Avg Cost")]
    avg_cost: String,
}
