//! Transaction ledger: typed holdings and buy/sell records, plus CSV and JSON readers.

use crate::error::{Result, TaxError};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;

/// Direction of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[serde(alias = "Buy", alias = "buy")]
    Buy,
    #[serde(alias = "Sell", alias = "sell")]
    Sell,
}

impl Side {
    pub fn display(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// A security. Created on the first transaction that references it and never changed after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Holding {
    /// Ticker symbol, the key transactions refer to
    pub ticker: String,
    /// Security name
    pub name: String,
    /// International Securities Identification Number
    #[serde(default)]
    pub isin: Option<String>,
    /// Stock Exchange Daily Official List code
    #[serde(default)]
    pub sedol: Option<String>,
}

impl Holding {
    pub fn new(ticker: impl Into<String>) -> Self {
        let ticker = ticker.into();
        Holding {
            name: ticker.clone(),
            ticker,
            isin: None,
            sedol: None,
        }
    }
}

/// A recorded buy or sell. Ordered by `(trade_date, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Insertion sequence within the ledger; breaks same-day ties
    pub sequence: u64,
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fees: Decimal,
    pub side: Side,
}

impl Transaction {
    pub fn gross_value(&self) -> Decimal {
        self.quantity * self.price
    }

    /// Allowable cost of a buy: consideration plus incidental costs
    pub fn total_cost(&self) -> Decimal {
        self.gross_value() + self.fees
    }

    /// Disposal proceeds of a sell, net of fees
    pub fn net_proceeds(&self) -> Decimal {
        self.gross_value() - self.fees
    }

    pub fn ordering_key(&self) -> (NaiveDate, u64) {
        (self.trade_date, self.sequence)
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side == Side::Sell
    }
}

/// Transaction row as it appears in CSV and JSON inputs
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransactionRecord {
    /// Unique identifier; generated from the row position when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Trade date (YYYY-MM-DD)
    #[schemars(with = "String")]
    pub date: NaiveDate,
    /// Ticker of the security traded
    pub ticker: String,
    /// Security name, used when the holding is first seen
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub isin: Option<String>,
    #[serde(default)]
    pub sedol: Option<String>,
    /// BUY or SELL
    pub side: Side,
    /// Number of shares (> 0)
    #[schemars(with = "f64")]
    pub quantity: Decimal,
    /// Price per share in GBP (> 0)
    #[schemars(with = "f64")]
    pub price: Decimal,
    /// Dealing costs in GBP (>= 0)
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub fees: Option<Decimal>,
}

/// JSON input root
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LedgerInput {
    #[serde(default)]
    pub holdings: Vec<Holding>,
    pub transactions: Vec<TransactionRecord>,
}

/// Immutable-once-recorded log of transactions across holdings
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    holdings: BTreeMap<String, Holding>,
    transactions: Vec<Transaction>,
    ids: HashSet<String>,
    next_sequence: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger::default()
    }

    /// Register a holding. The first registration wins; later metadata is ignored.
    pub fn add_holding(&mut self, holding: Holding) {
        match self.holdings.get(&holding.ticker) {
            Some(existing) if existing != &holding => {
                log::warn!(
                    "Holding {} already registered as '{}', ignoring '{}'",
                    holding.ticker,
                    existing.name,
                    holding.name
                );
            }
            Some(_) => {}
            None => {
                self.holdings.insert(holding.ticker.clone(), holding);
            }
        }
    }

    /// Append a transaction, assigning the next insertion sequence
    pub fn record(&mut self, record: TransactionRecord) -> Result<&Transaction> {
        let sequence = self.next_sequence;
        let id = record
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("tx-{}", sequence + 1));
        let fees = record.fees.unwrap_or(Decimal::ZERO);

        let invalid = |reason: &str| TaxError::InvalidTransaction {
            id: id.clone(),
            reason: reason.to_string(),
        };
        if record.ticker.trim().is_empty() {
            return Err(invalid("ticker is empty"));
        }
        if record.quantity <= Decimal::ZERO {
            return Err(invalid("quantity must be positive"));
        }
        if record.price <= Decimal::ZERO {
            return Err(invalid("price must be positive"));
        }
        if fees < Decimal::ZERO {
            return Err(invalid("fees must not be negative"));
        }
        if record
            .quantity
            .checked_mul(record.price)
            .and_then(|value| value.checked_add(fees))
            .is_none()
        {
            return Err(invalid("quantity times price is too large"));
        }
        if self.ids.contains(&id) {
            return Err(TaxError::InvalidTransactionOrder {
                holding: record.ticker.clone(),
                reason: format!("duplicate transaction id {id}"),
            });
        }

        let ticker = record.ticker.trim().to_uppercase();
        if !self.holdings.contains_key(&ticker) {
            let mut holding = Holding::new(ticker.clone());
            if let Some(name) = record.name.filter(|n| !n.trim().is_empty()) {
                holding.name = name;
            }
            holding.isin = record.isin;
            holding.sedol = record.sedol;
            self.holdings.insert(ticker.clone(), holding);
        }

        self.ids.insert(id.clone());
        self.next_sequence += 1;
        self.transactions.push(Transaction {
            id,
            sequence,
            ticker,
            trade_date: record.date,
            quantity: record.quantity,
            price: record.price,
            fees,
            side: record.side,
        });
        Ok(&self.transactions[self.transactions.len() - 1])
    }

    pub fn from_input(input: LedgerInput) -> Result<Self> {
        let mut ledger = Ledger::new();
        for mut holding in input.holdings {
            holding.ticker = holding.ticker.trim().to_uppercase();
            ledger.add_holding(holding);
        }
        for record in input.transactions {
            ledger.record(record)?;
        }
        Ok(ledger)
    }

    pub fn holdings(&self) -> impl Iterator<Item = &Holding> {
        self.holdings.values()
    }

    pub fn holding(&self, ticker: &str) -> Option<&Holding> {
        self.holdings.get(&ticker.to_uppercase())
    }

    pub fn tickers(&self) -> Vec<String> {
        self.holdings.keys().cloned().collect()
    }

    /// All transactions in insertion order
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Transactions for one holding ordered by `(trade_date, sequence)`
    pub fn transactions_for(&self, ticker: &str) -> Vec<&Transaction> {
        let ticker = ticker.to_uppercase();
        let mut txs: Vec<&Transaction> = self
            .transactions
            .iter()
            .filter(|t| t.ticker == ticker)
            .collect();
        txs.sort_by_key(|t| t.ordering_key());
        txs
    }

    /// Copy of the ledger holding only transactions dated on or before `date`
    pub fn up_to(&self, date: NaiveDate) -> Ledger {
        Ledger {
            holdings: self.holdings.clone(),
            transactions: self
                .transactions
                .iter()
                .filter(|t| t.trade_date <= date)
                .cloned()
                .collect(),
            ids: self.ids.clone(),
            next_sequence: self.next_sequence,
        }
    }

    /// `ticker`'s transactions up to `date` plus its later acquisitions:
    /// everything a further sale on `date` could be matched against.
    pub fn before_sale(&self, ticker: &str, date: NaiveDate) -> Ledger {
        let ticker = ticker.trim().to_uppercase();
        Ledger {
            holdings: self
                .holdings
                .get(&ticker)
                .map(|h| BTreeMap::from([(ticker.clone(), h.clone())]))
                .unwrap_or_default(),
            transactions: self
                .transactions
                .iter()
                .filter(|t| t.ticker == ticker && (t.trade_date <= date || t.is_buy()))
                .cloned()
                .collect(),
            ids: self.ids.clone(),
            next_sequence: self.next_sequence,
        }
    }

    /// SHA-256 over the canonical form of every transaction.
    /// Two ledgers with the same content hash identically regardless of load path.
    pub fn fingerprint(&self) -> String {
        let mut ordered: Vec<&Transaction> = self.transactions.iter().collect();
        ordered.sort_by(|a, b| {
            a.ticker
                .cmp(&b.ticker)
                .then(a.ordering_key().cmp(&b.ordering_key()))
        });
        let mut hasher = Sha256::new();
        for tx in ordered {
            hasher.update(tx.id.as_bytes());
            hasher.update([0]);
            hasher.update(tx.ticker.as_bytes());
            hasher.update([0]);
            hasher.update(tx.trade_date.to_string().as_bytes());
            hasher.update(tx.sequence.to_le_bytes());
            hasher.update(tx.side.display().as_bytes());
            hasher.update(tx.quantity.normalize().to_string().as_bytes());
            hasher.update([0]);
            hasher.update(tx.price.normalize().to_string().as_bytes());
            hasher.update([0]);
            hasher.update(tx.fees.normalize().to_string().as_bytes());
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Read a ledger from CSV rows
pub fn read_csv<R: Read>(reader: R) -> anyhow::Result<Ledger> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let records: std::result::Result<Vec<TransactionRecord>, _> =
        rdr.deserialize::<TransactionRecord>().collect();
    let input = LedgerInput {
        holdings: Vec::new(),
        transactions: records?,
    };
    Ok(Ledger::from_input(input)?)
}

/// Read a ledger from the JSON input format
pub fn read_json<R: Read>(reader: R) -> anyhow::Result<Ledger> {
    let input: LedgerInput = serde_json::from_reader(reader)?;
    Ok(Ledger::from_input(input)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub(crate) fn rec(
        date_str: &str,
        ticker: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
    ) -> TransactionRecord {
        TransactionRecord {
            id: None,
            date: date(date_str),
            ticker: ticker.to_string(),
            name: None,
            isin: None,
            sedol: None,
            side,
            quantity: qty,
            price,
            fees: None,
        }
    }

    pub(crate) fn buy(date_str: &str, ticker: &str, qty: Decimal, price: Decimal) -> TransactionRecord {
        rec(date_str, ticker, Side::Buy, qty, price)
    }

    pub(crate) fn sell(date_str: &str, ticker: &str, qty: Decimal, price: Decimal) -> TransactionRecord {
        rec(date_str, ticker, Side::Sell, qty, price)
    }

    pub(crate) fn ledger(records: Vec<TransactionRecord>) -> Ledger {
        Ledger::from_input(LedgerInput {
            holdings: Vec::new(),
            transactions: records,
        })
        .unwrap()
    }

    #[test]
    fn record_assigns_sequence_and_ids() {
        let l = ledger(vec![
            buy("2024-01-10", "abc", dec!(100), dec!(10)),
            sell("2024-01-05", "ABC", dec!(10), dec!(12)),
        ]);
        let txs = l.transactions();
        assert_eq!(txs[0].id, "tx-1");
        assert_eq!(txs[0].sequence, 0);
        assert_eq!(txs[0].ticker, "ABC");
        assert_eq!(txs[1].id, "tx-2");
        assert_eq!(txs[1].sequence, 1);
    }

    #[test]
    fn transactions_for_orders_by_date_then_sequence() {
        let l = ledger(vec![
            buy("2024-02-01", "ABC", dec!(1), dec!(10)),
            buy("2024-01-01", "ABC", dec!(2), dec!(10)),
            sell("2024-02-01", "ABC", dec!(1), dec!(10)),
            buy("2024-01-15", "XYZ", dec!(5), dec!(1)),
        ]);
        let ids: Vec<_> = l.transactions_for("abc").iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["tx-2", "tx-1", "tx-3"]);
    }

    #[test]
    fn duplicate_id_is_an_ordering_error() {
        let mut first = buy("2024-01-01", "ABC", dec!(1), dec!(10));
        first.id = Some("a".to_string());
        let mut second = buy("2024-01-02", "ABC", dec!(1), dec!(10));
        second.id = Some("a".to_string());

        let err = Ledger::from_input(LedgerInput {
            holdings: Vec::new(),
            transactions: vec![first, second],
        })
        .unwrap_err();
        assert!(matches!(err, TaxError::InvalidTransactionOrder { .. }));
    }

    #[test]
    fn rejects_invalid_amounts() {
        let mut l = Ledger::new();
        let err = l.record(buy("2024-01-01", "ABC", dec!(0), dec!(10))).unwrap_err();
        assert!(matches!(err, TaxError::InvalidTransaction { .. }));

        let mut r = buy("2024-01-01", "ABC", dec!(1), dec!(10));
        r.fees = Some(dec!(-1));
        assert!(matches!(l.record(r), Err(TaxError::InvalidTransaction { .. })));

        let huge = dec!(1000000000000000);
        let err = l.record(buy("2024-01-01", "ABC", huge, huge)).unwrap_err();
        assert!(matches!(err, TaxError::InvalidTransaction { .. }));
        assert!(l.is_empty());
    }

    #[test]
    fn buy_cost_and_sell_proceeds_include_fees() {
        let mut l = Ledger::new();
        let mut b = buy("2024-01-01", "ABC", dec!(100), dec!(10));
        b.fees = Some(dec!(1));
        let mut s = sell("2024-02-01", "ABC", dec!(50), dec!(12));
        s.fees = Some(dec!(2.50));
        l.record(b).unwrap();
        l.record(s).unwrap();
        assert_eq!(l.transactions()[0].total_cost(), dec!(1001));
        assert_eq!(l.transactions()[1].net_proceeds(), dec!(597.50));
    }

    #[test]
    fn first_holding_metadata_wins() {
        let mut l = Ledger::new();
        let mut r = buy("2024-01-01", "ABC", dec!(1), dec!(10));
        r.name = Some("ABC Corporation".to_string());
        l.record(r).unwrap();
        let mut r = buy("2024-01-02", "ABC", dec!(1), dec!(10));
        r.name = Some("Renamed".to_string());
        l.record(r).unwrap();
        assert_eq!(l.holding("abc").unwrap().name, "ABC Corporation");
        // ticker-only rows get the ticker as name
        l.record(buy("2024-01-02", "XYZ", dec!(1), dec!(10))).unwrap();
        assert_eq!(l.holding("XYZ").unwrap().name, "XYZ");
    }

    #[test]
    fn up_to_drops_later_transactions() {
        let l = ledger(vec![
            buy("2024-01-01", "ABC", dec!(1), dec!(10)),
            buy("2024-03-01", "ABC", dec!(1), dec!(10)),
        ]);
        let cut = l.up_to(date("2024-02-01"));
        assert_eq!(cut.transactions().len(), 1);
        assert!(cut.holding("ABC").is_some());
    }

    #[test]
    fn before_sale_keeps_later_buys_and_sequence() {
        let l = ledger(vec![
            buy("2024-01-01", "ABC", dec!(5), dec!(10)),
            sell("2024-03-01", "ABC", dec!(1), dec!(10)),
            buy("2024-03-05", "ABC", dec!(1), dec!(10)),
            buy("2024-01-15", "XYZ", dec!(5), dec!(1)),
        ]);
        let mut scenario = l.before_sale("abc", date("2024-02-01"));
        let ids: Vec<_> = scenario.transactions().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["tx-1", "tx-3"]);
        assert!(scenario.holding("XYZ").is_none());

        let added = scenario.record(sell("2024-02-01", "ABC", dec!(5), dec!(8))).unwrap();
        assert_eq!(added.sequence, 4);
        assert_eq!(added.id, "tx-5");
    }

    #[test]
    fn fingerprint_ignores_scale_but_not_content() {
        let a = ledger(vec![buy("2024-01-01", "ABC", dec!(100), dec!(10))]);
        let b = ledger(vec![buy("2024-01-01", "ABC", dec!(100.00), dec!(10.0))]);
        let c = ledger(vec![buy("2024-01-01", "ABC", dec!(100), dec!(11))]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn read_csv_rows() {
        let data = "\
id,date,ticker,name,isin,sedol,side,quantity,price,fees
b1,2024-01-10,ABC,ABC Corporation,GB00ABC00001,,BUY,100,10.00,1.00
s1,2024-03-10,ABC,,,,SELL,50,12.00,
";
        let l = read_csv(data.as_bytes()).unwrap();
        assert_eq!(l.transactions().len(), 2);
        assert_eq!(l.transactions()[0].fees, dec!(1));
        assert_eq!(l.transactions()[1].fees, Decimal::ZERO);
        let h = l.holding("ABC").unwrap();
        assert_eq!(h.name, "ABC Corporation");
        assert_eq!(h.isin.as_deref(), Some("GB00ABC00001"));
        assert_eq!(h.sedol, None);
    }

    #[test]
    fn read_json_with_holdings() {
        let data = r#"{
            "holdings": [{"ticker": "xyz", "name": "XYZ plc"}],
            "transactions": [
                {"date": "2024-01-10", "ticker": "XYZ", "side": "BUY", "quantity": 10, "price": "4.5"}
            ]
        }"#;
        let l = read_json(data.as_bytes()).unwrap();
        assert_eq!(l.holding("XYZ").unwrap().name, "XYZ plc");
        assert_eq!(l.transactions()[0].price, dec!(4.5));
    }
}
