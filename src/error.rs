use crate::tax::uk::TaxYear;
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Failures raised by the tax engine. None of them are recovered silently:
/// ranking skips the affected holding, reporting aborts the affected year.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TaxError {
    #[error(
        "insufficient holding of {holding}: disposal {transaction} on {date} \
         sells {required} but only {available} is available"
    )]
    InsufficientPoolQuantity {
        holding: String,
        transaction: String,
        date: NaiveDate,
        required: Decimal,
        available: Decimal,
    },
    #[error("invalid transaction order for {holding}: {reason}")]
    InvalidTransactionOrder { holding: String, reason: String },
    #[error("invalid transaction {id}: {reason}")]
    InvalidTransaction { id: String, reason: String },
    #[error("unknown holding: {0}")]
    UnknownHolding(String),
    #[error("no market price for {ticker} on or before {date}")]
    MissingMarketPrice { ticker: String, date: NaiveDate },
    #[error("no annual exempt amount configured for tax year {0}")]
    ConfigurationMissing(TaxYear),
    #[error("cannot harvest {holding}: {reason}")]
    NotHarvestable { holding: String, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T, E = TaxError> = std::result::Result<T, E>;
