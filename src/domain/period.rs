//! Historical period shorthand (`2y`, `6mo`, `max`).

use crate::domain::error::PortoptError;
use chrono::{Months, NaiveDate};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Months(u32),
    Years(u32),
    Max,
}

impl Period {
    /// First calendar date covered by the period when ending at `as_of`.
    pub fn start_date(&self, as_of: NaiveDate) -> NaiveDate {
        let months = match self {
            Period::Months(m) => *m,
            Period::Years(y) => y.saturating_mul(12),
            Period::Max => return NaiveDate::MIN,
        };
        as_of
            .checked_sub_months(Months::new(months))
            .unwrap_or(NaiveDate::MIN)
    }
}

impl Default for Period {
    fn default() -> Self {
        Period::Years(2)
    }
}

impl FromStr for Period {
    type Err = PortoptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "max" {
            return Ok(Period::Max);
        }
        let invalid = || {
            PortoptError::invalid(
                "period",
                format!("'{s}' is not a period (expected e.g. 6mo, 2y, 10y, max)"),
            )
        };
        let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?);
        let n: u32 = digits.parse().map_err(|_| invalid())?;
        if n == 0 {
            return Err(invalid());
        }
        match unit {
            "mo" => Ok(Period::Months(n)),
            "y" => Ok(Period::Years(n)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Months(m) => write!(f, "{m}mo"),
            Period::Years(y) => write!(f, "{y}y"),
            Period::Max => write!(f, "max"),
        }
    }
}
