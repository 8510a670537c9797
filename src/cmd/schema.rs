//! Schema command - print expected input formats

use clap::Args;
use schemars::schema_for;
use taxlot::ledger::LedgerInput;

#[derive(Args, Debug)]
pub struct SchemaCommand {
    /// Output format: json-schema or csv-header
    #[arg(value_enum, default_value = "json-schema")]
    format: SchemaFormat,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SchemaFormat {
    /// JSON Schema for the ledger input format
    JsonSchema,
    /// CSV header row with column names
    CsvHeader,
    /// CSV column descriptions
    CsvFields,
}

impl SchemaCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        match self.format {
            SchemaFormat::JsonSchema => {
                let schema = schema_for!(LedgerInput);
                println!("{}", serde_json::to_string_pretty(&schema)?);
            }
            SchemaFormat::CsvHeader => {
                let columns: Vec<&str> = CSV_FIELDS.iter().map(|(name, _, _)| *name).collect();
                println!("{}", columns.join(","));
            }
            SchemaFormat::CsvFields => {
                println!("CSV Ledger Format");
                println!("=================");
                println!();
                for (name, required, description) in CSV_FIELDS {
                    let req = if *required { "required" } else { "optional" };
                    println!("{:10} ({:8})  {}", name, req, description);
                }
                println!();
                println!("Prices: ticker,date,price (latest price on or before the date is used)");
            }
        }
        Ok(())
    }
}

const CSV_FIELDS: &[(&str, bool, &str)] = &[
    ("id", false, "Unique transaction id (generated as tx-N when empty)"),
    ("date", true, "Trade date (YYYY-MM-DD)"),
    ("ticker", true, "Holding identifier, case-insensitive"),
    ("name", false, "Security name, taken from the first row of a holding"),
    ("isin", false, "ISIN"),
    ("sedol", false, "SEDOL"),
    ("side", true, "BUY or SELL"),
    ("quantity", true, "Number of shares, positive"),
    ("price", true, "Price per share in GBP, positive"),
    ("fees", false, "Dealing costs in GBP, added to cost or deducted from proceeds"),
];
