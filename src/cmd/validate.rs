//! Validate command - surface data problems without generating full reports

use crate::cmd::load_engine;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use taxlot::config::EngineConfig;
use taxlot::TaxError;

#[derive(Args, Debug)]
pub struct ValidateCommand {
    /// Ledger file (CSV or JSON). Reads from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Output as JSON instead of formatted text
    #[arg(long)]
    json: bool,
}

/// A validation issue for output
#[derive(Debug, Clone, Serialize)]
struct ValidationIssue {
    #[serde(rename = "type")]
    issue_type: String,
    holding: String,
    message: String,
}

/// JSON output structure
#[derive(Debug, Serialize)]
struct ValidationOutput {
    holdings: usize,
    transactions: usize,
    issue_count: usize,
    issues: Vec<ValidationIssue>,
}

impl ValidateCommand {
    pub fn exec(&self, config: &EngineConfig) -> anyhow::Result<()> {
        let engine = load_engine(&self.file, config)?;
        let ledger = engine.ledger();

        let mut issues: Vec<ValidationIssue> = ledger
            .tickers()
            .iter()
            .filter_map(|ticker| {
                engine.compute(ticker).err().map(|err| ValidationIssue {
                    issue_type: error_type_name(&err).to_string(),
                    holding: ticker.clone(),
                    message: err.to_string(),
                })
            })
            .collect();

        for year in engine.tax_years() {
            if let Err(err) = config.annual_exempt_amount(year) {
                issues.push(ValidationIssue {
                    issue_type: error_type_name(&err).to_string(),
                    holding: String::new(),
                    message: err.to_string(),
                });
            }
        }

        let output = ValidationOutput {
            holdings: ledger.tickers().len(),
            transactions: ledger.transactions().len(),
            issue_count: issues.len(),
            issues,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            print_text(&output);
        }

        // Exit with code 1 if issues found
        if output.issue_count > 0 {
            std::process::exit(1);
        }
        Ok(())
    }
}

fn print_text(output: &ValidationOutput) {
    println!();
    println!(
        "VALIDATION RESULTS ({} holdings, {} transactions)",
        output.holdings, output.transactions
    );
    println!();

    if output.issues.is_empty() {
        println!("\u{2713} No issues found.");
        return;
    }

    println!("\u{26A0} {} issue(s) found:", output.issue_count);
    println!();
    for (i, issue) in output.issues.iter().enumerate() {
        if issue.holding.is_empty() {
            println!("  {}. [{}]", i + 1, issue.issue_type);
        } else {
            println!("  {}. [{}] {}", i + 1, issue.issue_type, issue.holding);
        }
        println!("     {}", issue.message);
        println!();
    }
}

fn error_type_name(err: &TaxError) -> &'static str {
    match err {
        TaxError::InsufficientPoolQuantity { .. } => "InsufficientPoolQuantity",
        TaxError::InvalidTransactionOrder { .. } => "InvalidTransactionOrder",
        TaxError::InvalidTransaction { .. } => "InvalidTransaction",
        TaxError::UnknownHolding(_) => "UnknownHolding",
        TaxError::MissingMarketPrice { .. } => "MissingMarketPrice",
        TaxError::ConfigurationMissing(_) => "ConfigurationMissing",
        TaxError::NotHarvestable { .. } => "NotHarvestable",
        TaxError::InvalidConfiguration(_) => "InvalidConfiguration",
    }
}
