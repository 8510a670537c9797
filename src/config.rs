//! Engine configuration: annual exempt amounts, tax-year boundary, matching window
//! and harvest scoring parameters. Every field has a default so a config file only
//! needs to name what it changes.

use crate::error::{Result, TaxError};
use crate::tax::uk::{TaxCalendar, TaxYear};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

/// Longest matching window accepted, in days (ten years)
pub const MAX_WINDOW_DAYS: u32 = 3653;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// First day of each tax year
    pub tax_year_start: TaxCalendar,
    /// Length of the bed & breakfast window in days after a disposal
    pub window_days: u32,
    /// Match disposals against same-day acquisitions before the 30-day rule
    pub same_day_rule: bool,
    /// Annual exempt amount keyed by tax year ("2024/25")
    pub annual_exempt_amounts: BTreeMap<TaxYear, Decimal>,
    /// Allowable losses brought forward from before the first ledger entry
    pub opening_losses: Decimal,
    pub harvest: HarvestConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tax_year_start: TaxCalendar::default(),
            window_days: 30,
            same_day_rule: true,
            annual_exempt_amounts: default_exempt_amounts(),
            opening_losses: Decimal::ZERO,
            harvest: HarvestConfig::default(),
        }
    }
}

/// HMRC annual exempt amounts for individuals
fn default_exempt_amounts() -> BTreeMap<TaxYear, Decimal> {
    BTreeMap::from([
        (TaxYear(2017), dec!(11100)),
        (TaxYear(2018), dec!(11300)),
        (TaxYear(2019), dec!(11700)),
        (TaxYear(2020), dec!(12000)),
        (TaxYear(2021), dec!(12300)),
        (TaxYear(2022), dec!(12300)),
        (TaxYear(2023), dec!(12300)),
        (TaxYear(2024), dec!(6000)),
        (TaxYear(2025), dec!(3000)),
        (TaxYear(2026), dec!(3000)),
    ])
}

impl EngineConfig {
    /// Annual exempt amount for `year`, or `ConfigurationMissing`
    pub fn annual_exempt_amount(&self, year: TaxYear) -> Result<Decimal> {
        self.annual_exempt_amounts
            .get(&year)
            .copied()
            .ok_or(TaxError::ConfigurationMissing(year))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tax_year_start.is_valid() {
            return Err(TaxError::InvalidConfiguration(format!(
                "tax year cannot start on {:02}-{:02}",
                self.tax_year_start.start_month, self.tax_year_start.start_day
            )));
        }
        if self.window_days == 0 || self.window_days > MAX_WINDOW_DAYS {
            return Err(TaxError::InvalidConfiguration(format!(
                "window_days must be between 1 and {MAX_WINDOW_DAYS}, got {}",
                self.window_days
            )));
        }
        if self.opening_losses < Decimal::ZERO {
            return Err(TaxError::InvalidConfiguration(
                "opening_losses must not be negative".to_string(),
            ));
        }
        if let Some((year, _)) = self
            .annual_exempt_amounts
            .iter()
            .find(|(_, amount)| **amount < Decimal::ZERO)
        {
            return Err(TaxError::InvalidConfiguration(format!(
                "negative annual exempt amount for {year}"
            )));
        }
        self.harvest.validate()
    }

    /// Read a JSON config; missing fields take their defaults
    pub fn from_json<R: Read>(reader: R) -> anyhow::Result<Self> {
        let config: EngineConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}

/// Tax-loss-harvesting score parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Weight of the absolute-loss component
    pub magnitude_weight: Decimal,
    /// Weight of the percentage-loss component
    pub percentage_weight: Decimal,
    /// Loss in GBP at which the magnitude component reaches one half
    pub loss_scale: Decimal,
    /// Loss percentage at which the percentage component saturates
    pub percentage_cap: Decimal,
    /// Multiplier applied to the score of a blocked holding
    pub blocked_penalty: Decimal,
    /// Losses smaller than this are not reported
    pub min_unrealised_loss: Decimal,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        HarvestConfig {
            magnitude_weight: dec!(0.5),
            percentage_weight: dec!(0.5),
            loss_scale: dec!(1000),
            percentage_cap: dec!(50),
            blocked_penalty: dec!(0.1),
            min_unrealised_loss: Decimal::ZERO,
        }
    }
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(TaxError::InvalidConfiguration(msg.to_string()));
        if self.magnitude_weight < Decimal::ZERO || self.percentage_weight < Decimal::ZERO {
            return invalid("harvest weights must not be negative");
        }
        if self.magnitude_weight + self.percentage_weight != Decimal::ONE {
            return invalid("harvest weights must sum to 1");
        }
        if self.loss_scale <= Decimal::ZERO || self.percentage_cap <= Decimal::ZERO {
            return invalid("harvest loss_scale and percentage_cap must be positive");
        }
        if self.blocked_penalty < Decimal::ZERO || self.blocked_penalty > Decimal::ONE {
            return invalid("harvest blocked_penalty must be between 0 and 1");
        }
        if self.min_unrealised_loss < Decimal::ZERO {
            return invalid("harvest min_unrealised_loss must not be negative");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_exempt_amounts_by_year() {
        let config = EngineConfig::default();
        assert_eq!(config.annual_exempt_amount(TaxYear(2025)), Ok(dec!(3000)));
        assert_eq!(config.annual_exempt_amount(TaxYear(2024)), Ok(dec!(6000)));
        assert_eq!(config.annual_exempt_amount(TaxYear(2023)), Ok(dec!(12300)));
        assert_eq!(
            config.annual_exempt_amount(TaxYear(1990)),
            Err(TaxError::ConfigurationMissing(TaxYear(1990)))
        );
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "window_days": 45,
            "annual_exempt_amounts": {"2026/27": "3500"},
            "harvest": {"blocked_penalty": "0"}
        }"#;
        let config = EngineConfig::from_json(json.as_bytes()).unwrap();
        assert_eq!(config.window_days, 45);
        assert!(config.same_day_rule);
        assert_eq!(config.tax_year_start, TaxCalendar::default());
        assert_eq!(config.annual_exempt_amount(TaxYear(2027)), Ok(dec!(3500)));
        // replacing the map drops the built-in years
        assert!(config.annual_exempt_amount(TaxYear(2025)).is_err());
        assert_eq!(config.harvest.blocked_penalty, Decimal::ZERO);
        assert_eq!(config.harvest.loss_scale, dec!(1000));
    }

    #[test]
    fn custom_tax_year_start() {
        let json = r#"{"tax_year_start": {"start_month": 1, "start_day": 1}}"#;
        let config = EngineConfig::from_json(json.as_bytes()).unwrap();
        assert_eq!(config.tax_year_start.start_month, 1);
    }

    #[test]
    fn rejects_invalid_values() {
        let config = EngineConfig {
            window_days: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.harvest.magnitude_weight = dec!(0.9);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.annual_exempt_amounts.insert(TaxYear(2030), dec!(-1));
        assert!(config.validate().is_err());

        assert!(EngineConfig::from_json(r#"{"window_days": 0}"#.as_bytes()).is_err());
    }

    #[test]
    fn rejects_window_beyond_maximum() {
        let err = EngineConfig::from_json(r#"{"window_days": 200000000}"#.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("window_days"));

        let config = EngineConfig {
            window_days: MAX_WINDOW_DAYS,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
        let config = EngineConfig {
            window_days: MAX_WINDOW_DAYS + 1,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TaxError::InvalidConfiguration(_))
        ));
    }
}
