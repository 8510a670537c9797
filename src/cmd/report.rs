//! Report command - CGT position for one tax year

use crate::cmd::{format_gbp, format_gbp_signed, load_engine};
use clap::Args;
use std::io;
use std::path::PathBuf;
use taxlot::config::EngineConfig;
use taxlot::tax::report::bed_and_breakfast_count;
use taxlot::tax::{CgtReport, TaxYear};

#[derive(Args, Debug)]
pub struct ReportCommand {
    /// Ledger file (CSV or JSON). Reads from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Tax year to report (e.g. 2025 or 2024/25)
    #[arg(short, long)]
    year: TaxYear,

    /// Output the year's disposals as CSV
    #[arg(long, conflicts_with = "json")]
    csv: bool,

    /// Output as JSON instead of formatted text
    #[arg(long)]
    json: bool,
}

impl ReportCommand {
    pub fn exec(&self, config: &EngineConfig) -> anyhow::Result<()> {
        let engine = load_engine(&self.file, config)?;
        let report = engine.generate_cgt_report(self.year)?;

        if self.csv {
            report.write_csv(io::stdout())
        } else if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        } else {
            print_report(&report);
            Ok(())
        }
    }
}

fn print_report(report: &CgtReport) {
    let t = &report.totals;

    println!();
    println!(
        "CGT REPORT {} ({} to {})",
        report.tax_year.display(),
        report.start_date,
        report.end_date
    );
    println!();

    println!("DISPOSALS");
    println!(
        "  Count: {} (30-day matched: {})",
        t.disposal_count,
        bed_and_breakfast_count(report)
    );
    println!(
        "  Proceeds: {} | Costs: {}",
        format_gbp(t.proceeds),
        format_gbp(t.allowable_cost)
    );
    println!(
        "  Gains: {} | Losses: {} | Disallowed losses: {}",
        format_gbp(t.gross_gains),
        format_gbp(t.gross_losses),
        format_gbp(t.disallowed_losses)
    );
    println!();

    println!("GAINS");
    println!("  Net gains: {}", format_gbp_signed(t.net_gains));
    println!(
        "  Losses brought forward: {} | Used: {}",
        format_gbp(t.losses_brought_forward),
        format_gbp(t.losses_used)
    );
    println!("  Annual exempt amount: {}", format_gbp(t.annual_exempt_amount));
    println!("  Taxable gains: {}", format_gbp(t.taxable_gains));
    println!("  Losses carried forward: {}", format_gbp(t.carry_forward_losses));
    println!();
    println!("Fingerprint: {}", report.fingerprint);
    println!();
}
