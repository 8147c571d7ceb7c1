//! Whole-share allocation of target weights.

use crate::domain::error::PortoptError;
use crate::domain::result::OptimizationResult;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub shares: BTreeMap<String, u64>,
    pub leftover: f64,
}

impl Allocation {
    pub fn invested(&self, prices: &HashMap<String, f64>) -> f64 {
        self.shares
            .iter()
            .map(|(t, n)| *n as f64 * prices.get(t).copied().unwrap_or(0.0))
            .sum()
    }
}

/// Greedy allocation: floor of each target, then the leftover goes one
/// share at a time to the affordable asset furthest below its target.
pub fn discrete_allocation(
    portfolio: &OptimizationResult,
    latest_prices: &HashMap<String, f64>,
    total_value: f64,
) -> Result<Allocation, PortoptError> {
    if !(total_value > 0.0) || !total_value.is_finite() {
        return Err(PortoptError::invalid(
            "total_value",
            format!("{total_value} must be positive"),
        ));
    }

    let mut assets: Vec<(&str, f64, f64)> = Vec::new();
    for (ticker, weight) in portfolio.holdings() {
        let price = latest_prices
            .get(ticker)
            .copied()
            .ok_or_else(|| PortoptError::invalid("prices", format!("no price for {ticker}")))?;
        if !(price > 0.0) {
            return Err(PortoptError::invalid(
                "prices",
                format!("non-positive price {price} for {ticker}"),
            ));
        }
        assets.push((ticker, weight, price));
    }

    let mut shares: Vec<u64> = assets
        .iter()
        .map(|(_, w, p)| (w * total_value / p).floor() as u64)
        .collect();
    let mut cash = total_value
        - assets
            .iter()
            .zip(&shares)
            .map(|((_, _, p), n)| p * *n as f64)
            .sum::<f64>();

    loop {
        let pick = assets
            .iter()
            .enumerate()
            .filter(|(_, (_, _, p))| *p <= cash + 1e-9)
            .map(|(i, (_, w, p))| (i, w * total_value - shares[i] as f64 * p))
            .reduce(|best, cand| if cand.1 > best.1 { cand } else { best });
        match pick {
            Some((i, _)) => {
                shares[i] += 1;
                cash -= assets[i].2;
            }
            None => break,
        }
    }

    Ok(Allocation {
        shares: assets
            .iter()
            .zip(shares)
            .filter(|(_, n)| *n > 0)
            .map(|((t, _, _), n)| (t.to_string(), n))
            .collect(),
        leftover: cash.max(0.0),
    })
}
