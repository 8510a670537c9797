//! Disposals command - each sale with its share matching

use crate::cmd::{format_gbp, format_gbp_signed, format_quantity, load_engine};
use clap::Args;
use std::io;
use std::path::PathBuf;
use taxlot::config::EngineConfig;
use taxlot::tax::report::write_detailed_csv;
use taxlot::tax::{Disposal, TaxYear};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct DisposalsCommand {
    /// Ledger file (CSV or JSON). Reads from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Only show this holding
    #[arg(short, long)]
    ticker: Option<String>,

    /// Tax year to filter (e.g. 2025 or 2024/25)
    #[arg(short, long)]
    year: Option<TaxYear>,

    /// Output one CSV row per matched component
    #[arg(long, conflicts_with = "json")]
    csv: bool,

    /// Output as JSON instead of formatted table
    #[arg(long)]
    json: bool,
}

impl DisposalsCommand {
    pub fn exec(&self, config: &EngineConfig) -> anyhow::Result<()> {
        let engine = load_engine(&self.file, config)?;
        let mut disposals = match &self.ticker {
            Some(ticker) => engine.disposals(ticker)?,
            None => engine.all_disposals()?,
        };
        disposals.retain(|d| self.year.is_none_or(|y| d.tax_year == y));
        disposals.sort_by_key(Disposal::ordering_key);

        if self.csv {
            write_detailed_csv(&disposals, io::stdout())
        } else if self.json {
            println!("{}", serde_json::to_string_pretty(&disposals)?);
            Ok(())
        } else {
            self.print_table(&disposals);
            Ok(())
        }
    }

    fn print_table(&self, disposals: &[Disposal]) {
        if disposals.is_empty() {
            println!("No disposals found matching filters");
            return;
        }

        let year_str = self.year.map_or("All Years".to_string(), |y| y.display());
        println!();
        println!("DISPOSALS ({})", year_str);
        println!();

        let rows: Vec<DisposalRow> = disposals
            .iter()
            .flat_map(|d| {
                d.matches.iter().enumerate().map(move |(i, m)| {
                    let first = i == 0;
                    DisposalRow {
                        date: if first { d.date.format("%Y-%m-%d").to_string() } else { String::new() },
                        holding: if first { d.holding.clone() } else { String::new() },
                        rule: m.rule.display().to_string(),
                        matched: m
                            .matched_date
                            .map(|date| date.format("%Y-%m-%d").to_string())
                            .unwrap_or_default(),
                        quantity: format_quantity(m.qty_matched),
                        proceeds: format_gbp(m.proceeds),
                        cost: format_gbp(m.cost),
                        gain: format_gbp_signed(m.gain()),
                        disallowed: if m.disallowed_loss.is_zero() {
                            String::new()
                        } else {
                            format_gbp(m.disallowed_loss)
                        },
                    }
                })
            })
            .collect();

        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
            .to_string();
        println!("{}", table);

        let total_gain: rust_decimal::Decimal = disposals.iter().map(|d| d.gain()).sum();
        let total_disallowed: rust_decimal::Decimal =
            disposals.iter().map(|d| d.disallowed_loss).sum();
        println!();
        println!(
            "  Disposals: {} | Gain: {} | Disallowed losses: {}",
            disposals.len(),
            format_gbp_signed(total_gain),
            format_gbp(total_disallowed)
        );
    }
}

#[derive(Debug, Clone, Tabled)]
struct DisposalRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Holding")]
    holding: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Matched")]
    matched: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Proceeds")]
    proceeds: String,
    #[tabled(rename = "Cost")]
    cost: String,
    #[tabled(rename = "Gain")]
    gain: String,
    #[tabled(rename = "Disallowed")]
    disallowed: String,
}
