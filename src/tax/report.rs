use crate::config::EngineConfig;
use crate::error::{Result, TaxError};
use crate::tax::matching::{Disposal, MatchingRule};
use crate::tax::uk::TaxYear;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;

/// Year totals after losses and the annual exempt amount
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CgtTotals {
    pub disposal_count: usize,
    pub proceeds: Decimal,
    pub allowable_cost: Decimal,
    pub gross_gains: Decimal,
    pub gross_losses: Decimal,
    pub disallowed_losses: Decimal,
    pub net_gains: Decimal,
    pub losses_brought_forward: Decimal,
    pub losses_used: Decimal,
    pub annual_exempt_amount: Decimal,
    pub taxable_gains: Decimal,
    pub carry_forward_losses: Decimal,
}

/// CGT position for one tax year
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CgtReport {
    pub tax_year: TaxYear,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub disposals: Vec<Disposal>,
    pub totals: CgtTotals,
    /// SHA-256 over the report content
    pub fingerprint: String,
}

/// How brought-forward losses meet one year's net gains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LossOffset {
    pub brought_forward: Decimal,
    pub losses_used: Decimal,
    pub new_losses: Decimal,
    pub carried_forward: Decimal,
}

/// Losses brought forward are used in full against positive net gains,
/// before the annual exempt amount. A net loss is added to the carry-forward.
pub fn offset_losses(net_gains: Decimal, brought_forward: Decimal) -> LossOffset {
    let (losses_used, new_losses) = if net_gains > Decimal::ZERO {
        (brought_forward.min(net_gains), Decimal::ZERO)
    } else {
        (Decimal::ZERO, -net_gains)
    };
    LossOffset {
        brought_forward,
        losses_used,
        new_losses,
        carried_forward: brought_forward - losses_used + new_losses,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct YearSums {
    proceeds: Decimal,
    allowable_cost: Decimal,
    gross_gains: Decimal,
    gross_losses: Decimal,
    disallowed_losses: Decimal,
}

impl YearSums {
    fn of<'a>(disposals: impl IntoIterator<Item = &'a Disposal>) -> Self {
        let mut sums = YearSums::default();
        for d in disposals {
            let gain = d.allowable_gain();
            if gain > Decimal::ZERO {
                sums.gross_gains += gain;
            } else {
                sums.gross_losses -= gain;
            }
            sums.proceeds += d.proceeds;
            sums.allowable_cost += d.allowable_cost;
            sums.disallowed_losses += d.disallowed_loss;
        }
        sums
    }

    fn net_gains(&self) -> Decimal {
        self.gross_gains - self.gross_losses
    }
}

/// Walk every year before `year` in order and return the losses carried into it
pub fn losses_brought_forward(disposals: &[Disposal], year: TaxYear, opening: Decimal) -> Decimal {
    let mut by_year: BTreeMap<TaxYear, Vec<&Disposal>> = BTreeMap::new();
    for d in disposals.iter().filter(|d| d.tax_year < year) {
        by_year.entry(d.tax_year).or_default().push(d);
    }
    by_year.into_iter().fold(opening, |brought_forward, (y, year_disposals)| {
        let net = YearSums::of(year_disposals).net_gains();
        let offset = offset_losses(net, brought_forward);
        log::debug!(
            "{}: net gains {}, losses used {}, carried forward {}",
            y,
            net,
            offset.losses_used,
            offset.carried_forward
        );
        offset.carried_forward
    })
}

impl CgtReport {
    /// Build the report for `year` from the disposals of every holding.
    ///
    /// `disposals` may span many years: earlier years feed the loss
    /// carry-forward, later years are ignored.
    pub fn generate(year: TaxYear, disposals: &[Disposal], config: &EngineConfig) -> Result<Self> {
        let annual_exempt_amount = config.annual_exempt_amount(year)?;
        let calendar = config.tax_year_start;
        let (start_date, end_date) = calendar
            .start_date(year)
            .zip(calendar.end_date(year))
            .ok_or_else(|| {
                TaxError::InvalidConfiguration(format!("tax year {year} has no valid dates"))
            })?;

        let brought_forward = losses_brought_forward(disposals, year, config.opening_losses);

        let mut in_year: Vec<Disposal> = disposals
            .iter()
            .filter(|d| d.tax_year == year)
            .cloned()
            .collect();
        in_year.sort_by_key(Disposal::ordering_key);

        let sums = YearSums::of(&in_year);
        let net_gains = sums.net_gains();
        let offset = offset_losses(net_gains, brought_forward);
        let taxable_gains = if net_gains > Decimal::ZERO {
            (net_gains - offset.losses_used - annual_exempt_amount).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        let totals = CgtTotals {
            disposal_count: in_year.len(),
            proceeds: sums.proceeds,
            allowable_cost: sums.allowable_cost,
            gross_gains: sums.gross_gains,
            gross_losses: sums.gross_losses,
            disallowed_losses: sums.disallowed_losses,
            net_gains,
            losses_brought_forward: brought_forward,
            losses_used: offset.losses_used,
            annual_exempt_amount,
            taxable_gains,
            carry_forward_losses: offset.carried_forward,
        };

        let fingerprint = fingerprint(year, &in_year, &totals);
        Ok(CgtReport {
            tax_year: year,
            start_date,
            end_date,
            disposals: in_year,
            totals,
            fingerprint,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.disposals.is_empty()
    }

    /// One row per disposal
    pub fn write_csv<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for disposal in &self.disposals {
            wtr.serialize(DisposalCsvRecord::from(disposal))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// One row per matched component, with a running total of allowable gains
    pub fn write_detailed_csv<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        write_detailed_csv(&self.disposals, writer)
    }
}

fn fingerprint(year: TaxYear, disposals: &[Disposal], totals: &CgtTotals) -> String {
    let mut hasher = Sha256::new();
    let mut put = |value: &dyn std::fmt::Display| {
        hasher.update(value.to_string().as_bytes());
        hasher.update([0]);
    };
    put(&year);
    for d in disposals {
        put(&d.sell_tx);
        put(&d.holding);
        put(&d.date);
        for m in &d.matches {
            put(&m.rule);
            put(&m.matched_buy_tx.as_deref().unwrap_or("-"));
            put(&m.qty_matched.normalize());
            put(&m.cost.normalize());
            put(&m.proceeds.normalize());
            put(&m.disallowed_loss.normalize());
        }
    }
    for amount in [
        totals.gross_gains,
        totals.gross_losses,
        totals.disallowed_losses,
        totals.net_gains,
        totals.losses_brought_forward,
        totals.losses_used,
        totals.annual_exempt_amount,
        totals.taxable_gains,
        totals.carry_forward_losses,
    ] {
        put(&amount.normalize());
    }
    hex::encode(hasher.finalize())
}

/// CSV record for disposal output
#[derive(Debug, Serialize, Deserialize)]
pub struct DisposalCsvRecord {
    pub date: String,
    pub tax_year: String,
    pub holding: String,
    pub transaction: String,
    pub quantity: String,
    pub proceeds_gbp: String,
    pub allowable_cost_gbp: String,
    pub gain_gbp: String,
    pub disallowed_loss_gbp: String,
    pub allowable_gain_gbp: String,
}

impl From<&Disposal> for DisposalCsvRecord {
    fn from(d: &Disposal) -> Self {
        DisposalCsvRecord {
            date: d.date.format("%Y-%m-%d").to_string(),
            tax_year: d.tax_year.display(),
            holding: d.holding.clone(),
            transaction: d.sell_tx.clone(),
            quantity: d.quantity.normalize().to_string(),
            proceeds_gbp: d.proceeds.round_dp(2).to_string(),
            allowable_cost_gbp: d.allowable_cost.round_dp(2).to_string(),
            gain_gbp: d.gain().round_dp(2).to_string(),
            disallowed_loss_gbp: d.disallowed_loss.round_dp(2).to_string(),
            allowable_gain_gbp: d.allowable_gain().round_dp(2).to_string(),
        }
    }
}

/// CSV record for detailed disposal output with per-rule breakdown
#[derive(Debug, Serialize, Deserialize)]
pub struct DetailedDisposalCsvRecord {
    pub date: String,
    pub tax_year: String,
    pub holding: String,
    pub transaction: String,
    pub rule: String,
    pub matched_transaction: String,
    pub matched_date: String,
    pub quantity: String,
    pub proceeds_gbp: String,
    pub cost_gbp: String,
    pub gain_gbp: String,
    pub disallowed_loss_gbp: String,
    pub pool_quantity: String,
    pub pool_cost_gbp: String,
    pub running_gain_gbp: String,
}

/// Write matched components of `disposals`, in the given order
pub fn write_detailed_csv<W: Write>(disposals: &[Disposal], writer: W) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut running_gain = Decimal::ZERO;

    for disposal in disposals {
        for component in &disposal.matches {
            let allowable = component.gain() + component.disallowed_loss;
            running_gain += allowable;

            let record = DetailedDisposalCsvRecord {
                date: disposal.date.format("%Y-%m-%d").to_string(),
                tax_year: disposal.tax_year.display(),
                holding: disposal.holding.clone(),
                transaction: disposal.sell_tx.clone(),
                rule: component.rule.display().to_string(),
                matched_transaction: component.matched_buy_tx.clone().unwrap_or_default(),
                matched_date: component
                    .matched_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
                quantity: component.qty_matched.normalize().to_string(),
                proceeds_gbp: component.proceeds.round_dp(2).to_string(),
                cost_gbp: component.cost.round_dp(2).to_string(),
                gain_gbp: component.gain().round_dp(2).to_string(),
                disallowed_loss_gbp: component.disallowed_loss.round_dp(2).to_string(),
                pool_quantity: disposal.pool_after.quantity.normalize().to_string(),
                pool_cost_gbp: disposal.pool_after.cost.round_dp(2).to_string(),
                running_gain_gbp: running_gain.round_dp(2).to_string(),
            };
            wtr.serialize(record)?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Disposals of a year that used the bed & breakfast rule
pub fn bed_and_breakfast_count(report: &CgtReport) -> usize {
    report
        .disposals
        .iter()
        .filter(|d| d.matches.iter().any(|m| m.rule == MatchingRule::BedAndBreakfast))
        .count()
}
