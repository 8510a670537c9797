pub mod disposals;
pub mod harvest;
pub mod pools;
pub mod report;
pub mod schema;
pub mod validate;

use anyhow::Context;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use taxlot::config::EngineConfig;
use taxlot::ledger::{self, Ledger};
use taxlot::prices::PriceTable;
use taxlot::TaxEngine;

/// Read a ledger file, CSV or JSON by extension (or stdin with "-", format sniffed)
pub fn read_ledger(path: &Path) -> anyhow::Result<Ledger> {
    if path.as_os_str() == "-" {
        return read_from_stdin();
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let ledger = if is_json {
        ledger::read_json(reader)
    } else {
        ledger::read_csv(reader)
    };
    ledger.with_context(|| format!("reading ledger {}", path.display()))
}

fn read_from_stdin() -> anyhow::Result<Ledger> {
    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());

    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;

    let first = buffer.iter().find(|b| !b.is_ascii_whitespace());
    match first {
        None => anyhow::bail!("No input received. Provide a file or pipe data to stdin."),
        Some(b'{') => ledger::read_json(io::Cursor::new(buffer)),
        Some(_) => ledger::read_csv(io::Cursor::new(buffer)),
    }
}

/// Engine config from `--config`, defaults otherwise
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            EngineConfig::from_json(BufReader::new(file))
                .with_context(|| format!("reading config {}", path.display()))
        }
        None => Ok(EngineConfig::default()),
    }
}

pub fn load_engine(ledger: &Path, config: &EngineConfig) -> anyhow::Result<TaxEngine> {
    let ledger = read_ledger(ledger)?;
    Ok(TaxEngine::new(ledger, config.clone())?)
}

pub fn read_prices(path: &Path) -> anyhow::Result<PriceTable> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    PriceTable::read_csv(BufReader::new(file))
        .with_context(|| format!("reading prices {}", path.display()))
}

pub fn format_gbp(amount: Decimal) -> String {
    format!("£{:.2}", amount)
}

pub fn format_gbp_signed(amount: Decimal) -> String {
    if amount < Decimal::ZERO {
        format!("-£{:.2}", amount.abs())
    } else {
        format!("£{:.2}", amount)
    }
}

pub fn format_quantity(qty: Decimal) -> String {
    let s = format!("{:.8}", qty);
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn formatting() {
        assert_eq!(format_gbp(dec!(1234.5)), "£1234.50");
        assert_eq!(format_gbp_signed(dec!(-10)), "-£10.00");
        assert_eq!(format_quantity(dec!(150.000)), "150");
        assert_eq!(format_quantity(dec!(0.12345678)), "0.12345678");
    }
}
