use chrono::{Datelike, NaiveDate};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// UK Tax Year (runs 6 April to 5 April by default)
/// The year value represents the end year (e.g., 2025 = 2024/25 tax year)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaxYear(pub i32);

impl TaxYear {
    /// Tax year containing `date` under the standard 6 April boundary
    pub fn from_date(date: NaiveDate) -> Self {
        TaxCalendar::default().tax_year(date)
    }

    /// Display as "2024/25" format
    pub fn display(&self) -> String {
        format!("{}/{:02}", self.0 - 1, self.0.rem_euclid(100))
    }
}

impl std::fmt::Display for TaxYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid tax year '{0}', expected e.g. 2025, 2024/25 or 2024-25")]
pub struct ParseTaxYearError(String);

impl FromStr for TaxYear {
    type Err = ParseTaxYearError;

    /// Accepts the end year ("2025") or the span form ("2024/25", "2024-25")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTaxYearError(s.to_string());
        let s = s.trim();
        match s.split_once(['/', '-']) {
            None => s.parse::<i32>().map(TaxYear).map_err(|_| err()),
            Some((start, end)) => {
                let start: i32 = start.parse().map_err(|_| err())?;
                let end: i32 = end.parse().map_err(|_| err())?;
                let expected = start + 1;
                let matches = match end {
                    0..=99 => expected.rem_euclid(100) == end,
                    _ => expected == end,
                };
                if matches {
                    Ok(TaxYear(expected))
                } else {
                    Err(err())
                }
            }
        }
    }
}

impl Serialize for TaxYear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.display())
    }
}

impl<'de> Deserialize<'de> for TaxYear {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// First day of the tax year. HMRC uses 6 April; kept configurable so a rule
/// change does not need a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxCalendar {
    pub start_month: u32,
    pub start_day: u32,
}

impl Default for TaxCalendar {
    fn default() -> Self {
        TaxCalendar {
            start_month: 4,
            start_day: 6,
        }
    }
}

impl TaxCalendar {
    pub fn tax_year(&self, date: NaiveDate) -> TaxYear {
        let year = date.year();
        if (date.month(), date.day()) >= (self.start_month, self.start_day) {
            TaxYear(year + 1)
        } else {
            TaxYear(year)
        }
    }

    /// First day of the tax year
    pub fn start_date(&self, year: TaxYear) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year.0 - 1, self.start_month, self.start_day)
    }

    /// Last day of the tax year
    pub fn end_date(&self, year: TaxYear) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year.0, self.start_month, self.start_day)
            .and_then(|d| d.pred_opt())
    }

    pub fn is_valid(&self) -> bool {
        // 29 February would vanish in non-leap years
        !(self.start_month == 2 && self.start_day == 29)
            && NaiveDate::from_ymd_opt(2001, self.start_month, self.start_day).is_some()
    }
}
