//! UK capital gains tax lot accounting: Section 104 pooling, same-day and
//! 30-day share matching, yearly CGT reports and tax-loss-harvesting ranking.

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod prices;
pub mod tax;

pub use config::EngineConfig;
pub use engine::TaxEngine;
pub use error::TaxError;
pub use ledger::Ledger;
