//! Read-only facade over a ledger and its configuration.
//!
//! Nothing here holds pool state between calls: every operation replays the
//! immutable ledger, holdings in parallel.

use crate::config::EngineConfig;
use crate::error::{Result, TaxError};
use crate::ledger::{Ledger, Side, Transaction, TransactionRecord};
use crate::prices::PriceSource;
use crate::tax::harvest::{self, HarvestPreview, TlhOpportunity};
use crate::tax::matching::{
    compute_holding, Disposal, DisposalMatch, HoldingComputation, MatchingOptions,
};
use crate::tax::pool::{PoolHistoryEntry, Section104Pool};
use crate::tax::report::CgtReport;
use crate::tax::uk::TaxYear;
use chrono::NaiveDate;
use log::{debug, info, warn};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

type ReportKey = (String, TaxYear);

/// Reports keyed by ledger fingerprint and tax year. Concurrent requests for
/// the same key share one computation.
#[derive(Debug, Default)]
pub struct ReportCache {
    entries: Mutex<HashMap<ReportKey, Arc<OnceLock<Result<CgtReport>>>>>,
}

impl ReportCache {
    pub fn get_or_compute<F>(&self, key: ReportKey, compute: F) -> Result<CgtReport>
    where
        F: FnOnce() -> Result<CgtReport>,
    {
        let cell = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(entries.entry(key).or_default())
        };
        cell.get_or_init(compute).clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct TaxEngine {
    ledger: Ledger,
    config: EngineConfig,
    fingerprint: String,
    reports: ReportCache,
}

impl TaxEngine {
    pub fn new(ledger: Ledger, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let fingerprint = ledger.fingerprint();
        Ok(TaxEngine {
            ledger,
            config,
            fingerprint,
            reports: ReportCache::default(),
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn options(&self) -> MatchingOptions {
        MatchingOptions {
            window_days: self.config.window_days,
            same_day_rule: self.config.same_day_rule,
            calendar: self.config.tax_year_start,
        }
    }

    fn transactions(&self, holding: &str) -> Result<(String, Vec<&Transaction>)> {
        let ticker = self
            .ledger
            .holding(holding)
            .map(|h| h.ticker.clone())
            .ok_or_else(|| TaxError::UnknownHolding(holding.to_string()))?;
        let transactions = self.ledger.transactions_for(&ticker);
        Ok((ticker, transactions))
    }

    /// Full replay of one holding
    pub fn compute(&self, holding: &str) -> Result<HoldingComputation> {
        let (ticker, transactions) = self.transactions(holding)?;
        compute_holding(&ticker, &transactions, &self.options())
    }

    /// Pool state after every transaction of `holding`
    pub fn compute_pool(&self, holding: &str) -> Result<Section104Pool> {
        Ok(self.compute(holding)?.pool)
    }

    pub fn pool_history(&self, holding: &str) -> Result<Vec<PoolHistoryEntry>> {
        Ok(self.compute(holding)?.history)
    }

    /// Every matched component of every disposal of `holding`, in sale order
    pub fn match_disposals(&self, holding: &str) -> Result<Vec<DisposalMatch>> {
        Ok(self.compute(holding)?.matches().cloned().collect())
    }

    pub fn disposals(&self, holding: &str) -> Result<Vec<Disposal>> {
        Ok(self.compute(holding)?.disposals)
    }

    /// Replay all holdings in parallel. The first failing holding, by ticker, wins.
    pub fn compute_all(&self) -> Result<Vec<HoldingComputation>> {
        let options = self.options();
        let tickers = self.ledger.tickers();
        debug!("Replaying {} holdings", tickers.len());
        tickers
            .par_iter()
            .map(|ticker| {
                let transactions = self.ledger.transactions_for(ticker);
                compute_holding(ticker, &transactions, &options)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }

    pub fn all_disposals(&self) -> Result<Vec<Disposal>> {
        Ok(self
            .compute_all()?
            .into_iter()
            .flat_map(|c| c.disposals)
            .collect())
    }

    /// Tax years in which the ledger has at least one disposal
    pub fn tax_years(&self) -> BTreeSet<TaxYear> {
        self.ledger
            .transactions()
            .iter()
            .filter(|t| t.is_sell())
            .map(|t| self.config.tax_year_start.tax_year(t.trade_date))
            .collect()
    }

    /// CGT report for `year`. Cached per ledger content and year.
    pub fn generate_cgt_report(&self, year: TaxYear) -> Result<CgtReport> {
        let key = (self.fingerprint.clone(), year);
        self.reports.get_or_compute(key, || {
            info!("Generating CGT report for {}", year);
            let disposals = self.all_disposals()?;
            CgtReport::generate(year, &disposals, &self.config)
        })
    }

    /// Reports for several years, computed in parallel
    pub fn generate_cgt_reports(&self, years: &[TaxYear]) -> Vec<(TaxYear, Result<CgtReport>)> {
        years
            .par_iter()
            .map(|year| (*year, self.generate_cgt_report(*year)))
            .collect()
    }

    pub fn cached_reports(&self) -> usize {
        self.reports.len()
    }

    /// Rank held positions standing at a loss on `as_of`. Holdings that cannot
    /// be priced or replayed are skipped with a warning.
    pub fn rank_tlh_opportunities(
        &self,
        as_of: NaiveDate,
        prices: &dyn PriceSource,
    ) -> Vec<TlhOpportunity> {
        let held = self.ledger.up_to(as_of);
        let options = self.options();
        let harvest_config = &self.config.harvest;

        let opportunities: Vec<TlhOpportunity> = held
            .holdings()
            .collect::<Vec<_>>()
            .par_iter()
            .filter_map(|holding| {
                let ticker = holding.ticker.as_str();
                let transactions = held.transactions_for(ticker);
                let pool = match compute_holding(ticker, &transactions, &options) {
                    Ok(computation) => computation.pool,
                    Err(err) => {
                        warn!("Skipping {} for harvest ranking: {}", ticker, err);
                        return None;
                    }
                };
                if pool.is_empty() {
                    return None;
                }
                let Some(price) = prices.price(ticker, as_of) else {
                    let err = TaxError::MissingMarketPrice {
                        ticker: ticker.to_string(),
                        date: as_of,
                    };
                    warn!("Skipping {} for harvest ranking: {}", ticker, err);
                    return None;
                };
                let full_history = self.ledger.transactions_for(ticker);
                let block = harvest::harvest_block(&full_history, as_of, options.window_days);
                harvest::evaluate(holding, &pool, price, block, harvest_config)
            })
            .collect();

        debug!("{} harvest opportunities on {}", opportunities.len(), as_of);
        harvest::rank(opportunities)
    }

    /// Replay a sale of the whole `holding` pool on `as_of` without touching the ledger.
    ///
    /// Acquisitions already recorded after `as_of` can still match the sale, so a
    /// pending repurchase shows up as a disallowed loss. Disposals after `as_of` are
    /// left out of the replay.
    pub fn simulate_harvest(
        &self,
        holding: &str,
        as_of: NaiveDate,
        price: Decimal,
        fees: Decimal,
    ) -> Result<HarvestPreview> {
        let (ticker, _) = self.transactions(holding)?;
        let options = self.options();
        let not_harvestable = |reason: String| TaxError::NotHarvestable {
            holding: ticker.clone(),
            reason,
        };

        let held = self.ledger.up_to(as_of);
        let pool = compute_holding(&ticker, &held.transactions_for(&ticker), &options)?.pool;
        if pool.is_empty() {
            return Err(not_harvestable(format!("nothing held on {as_of}")));
        }
        if price >= pool.avg_cost() {
            return Err(not_harvestable(format!(
                "price {} is not below the average cost {}",
                price,
                pool.avg_cost().round_dp(4)
            )));
        }

        let sale_id = format!("harvest-{as_of}");
        let mut scenario = self.ledger.before_sale(&ticker, as_of);
        scenario.record(TransactionRecord {
            id: Some(sale_id.clone()),
            date: as_of,
            ticker: ticker.clone(),
            name: None,
            isin: None,
            sedol: None,
            side: Side::Sell,
            quantity: pool.pooled_qty,
            price,
            fees: Some(fees),
        })?;
        let disposal = compute_holding(&ticker, &scenario.transactions_for(&ticker), &options)?
            .disposals
            .into_iter()
            .find(|d| d.sell_tx == sale_id)
            .ok_or_else(|| not_harvestable("sale could not be replayed".to_string()))?;

        let block = harvest::harvest_block(
            &self.ledger.transactions_for(&ticker),
            as_of,
            options.window_days,
        );
        if let Some(block) = &block {
            info!(
                "Harvest of {} on {} is blocked by {} until {}",
                ticker,
                as_of,
                block.reason.display(),
                block.clears_on
            );
        }
        Ok(HarvestPreview::new(as_of, price, fees, disposal, block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{buy, date, ledger, sell};
    use crate::prices::PriceTable;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn engine(records: Vec<crate::ledger::TransactionRecord>) -> TaxEngine {
        TaxEngine::new(ledger(records), EngineConfig::default()).unwrap()
    }

    #[test]
    fn unknown_holding() {
        let e = engine(vec![buy("2024-01-01", "ABC", dec!(1), dec!(1))]);
        assert_eq!(
            e.compute_pool("XYZ").unwrap_err(),
            TaxError::UnknownHolding("XYZ".to_string())
        );
        assert_eq!(e.compute_pool("abc").unwrap().pooled_qty, dec!(1));
    }

    #[test]
    fn report_is_cached_per_year() {
        let e = engine(vec![
            buy("2024-01-01", "ABC", dec!(10), dec!(100)),
            sell("2024-06-01", "ABC", dec!(5), dec!(200)),
        ]);
        let first = e.generate_cgt_report(TaxYear(2025)).unwrap();
        let second = e.generate_cgt_report(TaxYear(2025)).unwrap();
        assert_eq!(first, second);
        assert_eq!(e.cached_reports(), 1);

        e.generate_cgt_report(TaxYear(2024)).unwrap();
        assert_eq!(e.cached_reports(), 2);
    }

    #[test]
    fn cached_failure_is_returned_again() {
        let e = engine(vec![sell("2024-06-01", "ABC", dec!(5), dec!(200))]);
        let err = e.generate_cgt_report(TaxYear(2025)).unwrap_err();
        assert!(matches!(err, TaxError::InsufficientPoolQuantity { .. }));
        assert_eq!(e.generate_cgt_report(TaxYear(2025)).unwrap_err(), err);
    }

    #[test]
    fn parallel_reports_match_sequential() {
        let e = engine(vec![
            buy("2022-01-01", "ABC", dec!(10), dec!(100)),
            sell("2022-06-01", "ABC", dec!(5), dec!(50)),
            buy("2023-01-01", "XYZ", dec!(10), dec!(10)),
            sell("2024-06-01", "ABC", dec!(5), dec!(400)),
            sell("2024-07-01", "XYZ", dec!(10), dec!(20)),
        ]);
        let years: Vec<TaxYear> = e.tax_years().into_iter().collect();
        assert_eq!(years, vec![TaxYear(2023), TaxYear(2025)]);
        for (year, report) in e.generate_cgt_reports(&years) {
            let fresh = TaxEngine::new(e.ledger().clone(), EngineConfig::default())
                .unwrap()
                .generate_cgt_report(year)
                .unwrap();
            assert_eq!(report.unwrap(), fresh);
        }
    }

    #[test]
    fn harvest_skips_unpriced_holdings() {
        let e = engine(vec![
            buy("2024-01-01", "ABC", dec!(10), dec!(100)),
            buy("2024-01-01", "XYZ", dec!(10), dec!(100)),
            buy("2024-01-01", "GAIN", dec!(10), dec!(100)),
        ]);
        let prices: PriceTable = vec![
            ("ABC".to_string(), date("2024-05-01"), dec!(80)),
            ("GAIN".to_string(), date("2024-05-01"), dec!(120)),
        ]
        .into_iter()
        .collect();
        let ranked = e.rank_tlh_opportunities(date("2024-06-01"), &prices);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].ticker, "ABC");
        assert_eq!(ranked[0].unrealised_pnl, dec!(-200));
        assert!(ranked[0].eligible);
    }

    #[test]
    fn simulated_harvest_realises_the_loss() {
        let e = engine(vec![
            buy("2024-01-01", "ABC", dec!(100), dec!(10)),
            buy("2024-02-01", "ABC", dec!(100), dec!(8)),
        ]);
        let preview = e
            .simulate_harvest("abc", date("2024-06-01"), dec!(6), dec!(5))
            .unwrap();
        assert_eq!(preview.ticker, "ABC");
        assert_eq!(preview.quantity, dec!(200));
        assert_eq!(preview.proceeds, dec!(1195));
        assert_eq!(preview.allowable_cost, dec!(1800));
        assert_eq!(preview.realised_loss, dec!(605));
        assert_eq!(preview.disallowed_loss, Decimal::ZERO);
        assert_eq!(preview.allowable_loss, dec!(605));
        assert!(preview.eligible());
        // the ledger itself is unchanged
        assert_eq!(e.compute_pool("ABC").unwrap().pooled_qty, dec!(200));
    }

    #[test]
    fn simulated_harvest_with_pending_repurchase_is_disallowed() {
        let e = engine(vec![
            buy("2024-01-01", "ABC", dec!(100), dec!(10)),
            buy("2024-06-10", "ABC", dec!(40), dec!(7)),
        ]);
        let preview = e
            .simulate_harvest("ABC", date("2024-06-01"), dec!(6), Decimal::ZERO)
            .unwrap();
        assert_eq!(preview.quantity, dec!(100));
        // 40 shares matched to the 10 June buy at 7, 60 from the pool at 10
        assert_eq!(preview.allowable_cost, dec!(880));
        assert_eq!(preview.realised_loss, dec!(280));
        assert_eq!(preview.disallowed_loss, dec!(40));
        assert_eq!(preview.allowable_loss, dec!(240));
        let block = preview.block.unwrap();
        assert_eq!(block.reason, harvest::BlockReason::PendingRepurchase);
        assert!(!preview.eligible());
    }

    #[test]
    fn simulated_harvest_rejects_gains_and_empty_positions() {
        let e = engine(vec![
            buy("2024-01-01", "ABC", dec!(10), dec!(10)),
            sell("2024-03-01", "ABC", dec!(10), dec!(12)),
        ]);
        assert!(matches!(
            e.simulate_harvest("ABC", date("2024-02-01"), dec!(11), Decimal::ZERO),
            Err(TaxError::NotHarvestable { .. })
        ));
        assert!(matches!(
            e.simulate_harvest("ABC", date("2024-04-01"), dec!(5), Decimal::ZERO),
            Err(TaxError::NotHarvestable { .. })
        ));
        assert!(matches!(
            e.simulate_harvest("ABC", date("2024-02-01"), dec!(5), dec!(-1)),
            Err(TaxError::InvalidTransaction { .. })
        ));
        assert_eq!(
            e.simulate_harvest("XYZ", date("2024-02-01"), dec!(5), Decimal::ZERO)
                .unwrap_err(),
            TaxError::UnknownHolding("XYZ".to_string())
        );
    }

    #[test]
    fn harvest_uses_position_as_of_date() {
        let e = engine(vec![
            buy("2024-01-01", "ABC", dec!(10), dec!(100)),
            sell("2024-03-01", "ABC", dec!(10), dec!(90)),
            buy("2024-06-15", "ABC", dec!(10), dec!(50)),
        ]);
        let prices: PriceTable = vec![("ABC".to_string(), date("2024-01-01"), dec!(40))]
            .into_iter()
            .collect();

        // sold out before the date: nothing held
        assert!(e.rank_tlh_opportunities(date("2024-05-01"), &prices).is_empty());

        let ranked = e.rank_tlh_opportunities(date("2024-02-01"), &prices);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].pooled_qty, dec!(10));
        assert!(ranked[0].eligible);

        let ranked = e.rank_tlh_opportunities(date("2024-06-20"), &prices);
        assert_eq!(ranked[0].avg_cost, dec!(50));
        assert_eq!(ranked[0].unrealised_pnl, dec!(-100));
        assert_eq!(ranked[0].block, None);
        assert!(ranked[0].score > Decimal::ZERO);
    }
}
