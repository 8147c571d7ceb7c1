//! Static-weight backtest with periodic rebalancing.

use crate::domain::error::PortoptError;
use crate::domain::price::PriceMatrix;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rebalance {
    Monthly,
    #[default]
    Quarterly,
    Yearly,
    None,
}

impl Rebalance {
    /// Calendar bucket a date falls into; a change of bucket triggers a rebalance.
    fn bucket(self, date: NaiveDate) -> Option<(i32, u32)> {
        match self {
            Rebalance::Monthly => Some((date.year(), date.month())),
            Rebalance::Quarterly => Some((date.year(), (date.month() - 1) / 3)),
            Rebalance::Yearly => Some((date.year(), 0)),
            Rebalance::None => None,
        }
    }
}

impl FromStr for Rebalance {
    type Err = PortoptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monthly" => Ok(Rebalance::Monthly),
            "quarterly" => Ok(Rebalance::Quarterly),
            "yearly" | "annual" => Ok(Rebalance::Yearly),
            "none" | "never" => Ok(Rebalance::None),
            other => Err(PortoptError::invalid(
                "rebalance",
                format!("'{other}' is not a rebalance frequency (monthly, quarterly, yearly, none)"),
            )),
        }
    }
}

impl fmt::Display for Rebalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rebalance::Monthly => "monthly",
            Rebalance::Quarterly => "quarterly",
            Rebalance::Yearly => "yearly",
            Rebalance::None => "none",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_value: f64,
    pub rebalance: Rebalance,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_value: 10_000.0,
            rebalance: Rebalance::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub equity_curve: Vec<EquityPoint>,
    pub rebalances: usize,
}

impl BacktestResult {
    pub fn final_value(&self) -> Option<f64> {
        self.equity_curve.last().map(|p| p.value)
    }
}

/// Holds `weights` over the price history, resetting to them whenever the
/// rebalance bucket changes. Fractional shares, no costs.
pub fn run_backtest(
    prices: &PriceMatrix,
    weights: &[f64],
    config: &BacktestConfig,
) -> Result<BacktestResult, PortoptError> {
    if weights.len() != prices.asset_count() {
        return Err(PortoptError::invalid(
            "weights",
            format!("{} weights for {} assets", weights.len(), prices.asset_count()),
        ));
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0)
        || (weights.iter().sum::<f64>() - 1.0).abs() > 1e-6
    {
        return Err(PortoptError::invalid(
            "weights",
            "must be non-negative and sum to 1",
        ));
    }
    if !(config.initial_value > 0.0) {
        return Err(PortoptError::invalid(
            "initial_value",
            format!("{} must be positive", config.initial_value),
        ));
    }
    if prices.observation_count() == 0 {
        return Err(PortoptError::insufficient(
            prices.tickers().join(","),
            "no prices to backtest",
        ));
    }

    let buy = |value: f64, row: &[f64]| -> Vec<f64> {
        weights.iter().zip(row).map(|(w, p)| value * w / p).collect()
    };
    let mark = |shares: &[f64], row: &[f64]| -> f64 { shares.iter().zip(row).map(|(s, p)| s * p).sum() };

    let dates = prices.dates();
    let rows = prices.rows();
    let mut shares = buy(config.initial_value, &rows[0]);
    let mut bucket = config.rebalance.bucket(dates[0]);
    let mut rebalances = 0usize;
    let mut equity_curve = Vec::with_capacity(dates.len());

    for (date, row) in dates.iter().zip(rows) {
        let value = mark(&shares, row);
        let current = config.rebalance.bucket(*date);
        if current != bucket {
            shares = buy(value, row);
            bucket = current;
            rebalances += 1;
        }
        equity_curve.push(EquityPoint { date: *date, value });
    }

    Ok(BacktestResult {
        equity_curve,
        rebalances,
    })
}

/// 1/N weights for `n` assets.
pub fn equal_weights(n: usize) -> Vec<f64> {
    vec![1.0 / n.max(1) as f64; n]
}
