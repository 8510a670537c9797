pub mod harvest;
pub mod matching;
pub mod pool;
pub mod report;
pub mod uk;

pub use harvest::{BlockReason, HarvestBlock, HarvestPreview, TlhOpportunity};
pub use matching::{Disposal, DisposalMatch, HoldingComputation, MatchingRule};
pub use pool::{PoolHistoryEntry, Section104Pool};
pub use report::{CgtReport, CgtTotals};
pub use uk::{TaxCalendar, TaxYear};
