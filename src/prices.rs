use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;

/// Market prices per holding
pub trait PriceSource: Sync {
    /// Latest known price for `ticker` on or before `on`
    fn price(&self, ticker: &str, on: NaiveDate) -> Option<Decimal>;
}

#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    prices: HashMap<String, BTreeMap<NaiveDate, Decimal>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    ticker: String,
    date: NaiveDate,
    price: Decimal,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later inserts for the same day replace earlier ones
    pub fn insert(&mut self, ticker: &str, date: NaiveDate, price: Decimal) {
        self.prices
            .entry(ticker.trim().to_uppercase())
            .or_default()
            .insert(date, price);
    }

    pub fn len(&self) -> usize {
        self.prices.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Read `ticker,date,price` rows
    pub fn read_csv<R: Read>(reader: R) -> anyhow::Result<PriceTable> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut table = PriceTable::new();
        for record in rdr.deserialize::<Record>() {
            let record = record?;
            if record.price <= Decimal::ZERO {
                anyhow::bail!(
                    "price for {} on {} must be positive, got {}",
                    record.ticker,
                    record.date,
                    record.price
                );
            }
            table.insert(&record.ticker, record.date, record.price);
        }
        Ok(table)
    }
}

impl PriceSource for PriceTable {
    fn price(&self, ticker: &str, on: NaiveDate) -> Option<Decimal> {
        self.prices
            .get(&ticker.to_uppercase())
            .and_then(|by_date| by_date.range(..=on).next_back())
            .map(|(_, price)| *price)
    }
}

impl FromIterator<(String, NaiveDate, Decimal)> for PriceTable {
    fn from_iter<I: IntoIterator<Item = (String, NaiveDate, Decimal)>>(iter: I) -> Self {
        let mut table = PriceTable::new();
        for (ticker, date, price) in iter {
            table.insert(&ticker, date, price);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn latest_price_on_or_before() {
        let csv = "ticker,date,price\nabc,2024-06-01,10.5\nABC,2024-06-10,11\nXYZ,2024-06-05,3\n";
        let table = PriceTable::read_csv(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.price("ABC", day("2024-06-01")), Some(dec!(10.5)));
        assert_eq!(table.price("abc", day("2024-06-09")), Some(dec!(10.5)));
        assert_eq!(table.price("ABC", day("2024-07-01")), Some(dec!(11)));
        assert_eq!(table.price("ABC", day("2024-05-31")), None);
        assert_eq!(table.price("NOPE", day("2024-07-01")), None);
    }

    #[test]
    fn rejects_non_positive_price() {
        let csv = "ticker,date,price\nABC,2024-06-01,0\n";
        assert!(PriceTable::read_csv(csv.as_bytes()).is_err());
    }
}
