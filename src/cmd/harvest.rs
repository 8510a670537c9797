//! Harvest command - rank loss-making positions or preview harvesting one

use crate::cmd::{format_gbp, format_gbp_signed, format_quantity, load_engine, read_prices};
use anyhow::bail;
use chrono::NaiveDate;
use clap::Args;
use rust_decimal::Decimal;
use std::path::PathBuf;
use taxlot::config::EngineConfig;
use taxlot::prices::PriceSource;
use taxlot::tax::{HarvestPreview, TlhOpportunity};
use taxlot::TaxError;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct HarvestCommand {
    /// Ledger file (CSV or JSON). Reads from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Price CSV (ticker,date,price)
    #[arg(short, long, required_unless_present = "price")]
    prices: Option<PathBuf>,

    /// Date to rank on (defaults to today)
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Preview selling the whole position in this holding instead of ranking
    #[arg(long, value_name = "TICKER")]
    simulate: Option<String>,

    /// Sale price for --simulate (defaults to the price table)
    #[arg(long, requires = "simulate")]
    price: Option<Decimal>,

    /// Dealing costs for --simulate
    #[arg(long, requires = "simulate", default_value = "0")]
    fees: Decimal,

    /// Output as JSON instead of formatted table
    #[arg(long)]
    json: bool,
}

impl HarvestCommand {
    pub fn exec(&self, config: &EngineConfig) -> anyhow::Result<()> {
        let engine = load_engine(&self.file, config)?;
        let as_of = self
            .as_of
            .unwrap_or_else(|| chrono::Local::now().date_naive());

        if let Some(ticker) = &self.simulate {
            let price = match (self.price, &self.prices) {
                (Some(price), _) => price,
                (None, Some(path)) => read_prices(path)?
                    .price(&ticker.to_uppercase(), as_of)
                    .ok_or_else(|| TaxError::MissingMarketPrice {
                        ticker: ticker.to_uppercase(),
                        date: as_of,
                    })?,
                (None, None) => bail!("--simulate needs --price or --prices"),
            };
            let preview = engine.simulate_harvest(ticker, as_of, price, self.fees)?;
            if self.json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                print_preview(&preview);
            }
            return Ok(());
        }

        let Some(prices) = &self.prices else {
            bail!("ranking needs --prices");
        };
        let prices = read_prices(prices)?;
        let opportunities = engine.rank_tlh_opportunities(as_of, &prices);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&opportunities)?);
        } else {
            print_opportunities(&opportunities, as_of);
        }
        Ok(())
    }
}

fn print_opportunities(opportunities: &[TlhOpportunity], as_of: NaiveDate) {
    if opportunities.is_empty() {
        println!("No harvesting opportunities on {}", as_of);
        return;
    }

    println!();
    println!("HARVEST OPPORTUNITIES ({})", as_of);
    println!();

    let rows: Vec<OpportunityRow> = opportunities
        .iter()
        .map(|o| OpportunityRow {
            holding: o.ticker.clone(),
            quantity: format_quantity(o.pooled_qty),
            avg_cost: format_gbp(o.avg_cost),
            price: format_gbp(o.current_price),
            unrealised: format_gbp_signed(o.unrealised_pnl),
            pct: format!("{:.1}%", o.unrealised_pnl_pct),
            score: format!("{:.2}", o.score),
            status: match &o.block {
                None => "eligible".to_string(),
                Some(b) => format!("blocked {}d", b.days_remaining),
            },
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{}", table);
    println!();

    for o in opportunities {
        println!("  {}: {}", o.ticker, o.reason);
    }
    println!();
}

fn print_preview(preview: &HarvestPreview) {
    println!();
    println!("HARVEST PREVIEW: {} ON {}", preview.ticker, preview.as_of);
    println!();
    println!(
        "Sell {} at {} (fees {})",
        format_quantity(preview.quantity),
        format_gbp(preview.price),
        format_gbp(preview.fees)
    );
    println!("Net proceeds:     {}", format_gbp(preview.proceeds));
    println!("Allowable cost:   {}", format_gbp(preview.allowable_cost));
    println!("Realised loss:    {}", format_gbp(preview.realised_loss));
    println!("Disallowed loss:  {}", format_gbp(preview.disallowed_loss));
    println!("Allowable loss:   {}", format_gbp(preview.allowable_loss));
    println!();
    for m in &preview.disposal.matches {
        let against = match (&m.matched_buy_tx, m.matched_date) {
            (Some(tx), Some(date)) => format!("{} ({})", tx, date),
            _ => "pool".to_string(),
        };
        println!(
            "  {:8} {} against {}: cost {}",
            m.rule.display(),
            format_quantity(m.qty_matched),
            against,
            format_gbp(m.cost)
        );
    }
    if let Some(block) = &preview.block {
        println!();
        println!(
            "Blocked by {} on {} until {} ({} days)",
            block.reason.display(),
            block.trigger_date,
            block.clears_on,
            block.days_remaining
        );
    }
    println!();
}

#[derive(Debug, Clone, Tabled)]
struct OpportunityRow {
    #[tabled(rename = "Holding")]
    holding: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Avg Cost")]
    avg_cost: String,
    #[tabled(rename = "Price")]
    price: String,
    #[tabled(rename = "Unrealised")]
    unrealised: String,
    #[tabled(rename = "%")]
    pct: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Status")]
    status: String,
}
