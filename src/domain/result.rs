//! Optimization outputs: single portfolios and frontiers.

use crate::domain::estimate::ReturnsEstimate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Weights below this are treated as dust.
pub const WEIGHT_CUTOFF: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub tickers: Vec<String>,
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

impl OptimizationResult {
    /// Evaluates `weights` against `estimate`.
    pub fn from_weights(estimate: &ReturnsEstimate, weights: Vec<f64>, risk_free_rate: f64) -> Self {
        let (expected_return, volatility, sharpe_ratio) =
            portfolio_performance(&weights, estimate, risk_free_rate);
        Self {
            tickers: estimate.tickers().to_vec(),
            weights,
            expected_return,
            volatility,
            sharpe_ratio,
        }
    }

    pub fn weight(&self, ticker: &str) -> Option<f64> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|i| self.weights[i])
    }

    pub fn weight_map(&self) -> BTreeMap<String, f64> {
        self.tickers
            .iter()
            .cloned()
            .zip(self.weights.iter().copied())
            .collect()
    }

    /// Non-dust positions, largest first.
    pub fn holdings(&self) -> Vec<(&str, f64)> {
        let mut held: Vec<(&str, f64)> = self
            .tickers
            .iter()
            .map(String::as_str)
            .zip(self.weights.iter().copied())
            .filter(|(_, w)| *w >= WEIGHT_CUTOFF)
            .collect();
        held.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        held
    }
}

/// Number of simulations behind a resampled frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    pub requested: usize,
    pub succeeded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frontier {
    pub algorithm: String,
    pub points: Vec<OptimizationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulations: Option<SimulationSummary>,
}

impl Frontier {
    pub fn new(algorithm: impl Into<String>, points: Vec<OptimizationResult>) -> Self {
        Self {
            algorithm: algorithm.into(),
            points,
            simulations: None,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptimizationResult> {
        self.points.iter()
    }

    /// Point with the highest Sharpe ratio (first on ties).
    pub fn max_sharpe(&self) -> Option<&OptimizationResult> {
        self.points.iter().reduce(|best, p| {
            if p.sharpe_ratio > best.sharpe_ratio {
                p
            } else {
                best
            }
        })
    }

    pub fn min_volatility(&self) -> Option<&OptimizationResult> {
        self.points
            .iter()
            .reduce(|best, p| if p.volatility < best.volatility { p } else { best })
    }
}

pub fn sharpe_ratio(expected_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    if volatility > 0.0 {
        (expected_return - risk_free_rate) / volatility
    } else {
        0.0
    }
}

/// Returns (expected return, volatility, Sharpe ratio).
pub fn portfolio_performance(
    weights: &[f64],
    estimate: &ReturnsEstimate,
    risk_free_rate: f64,
) -> (f64, f64, f64) {
    let ret = estimate.portfolio_return(weights);
    let vol = estimate.portfolio_volatility(weights);
    (ret, vol, sharpe_ratio(ret, vol, risk_free_rate))
}

/// Zeroes weights below `cutoff` (negatives included) and renormalizes.
pub fn clean_weights(weights: &[f64], cutoff: f64) -> Vec<f64> {
    let clipped: Vec<f64> = weights
        .iter()
        .map(|w| if *w < cutoff { 0.0 } else { *w })
        .collect();
    let total: f64 = clipped.iter().sum();
    if total > 0.0 {
        return clipped.into_iter().map(|w| w / total).collect();
    }
    // Everything was dust: keep the positive part instead of returning zeros.
    let positive: Vec<f64> = weights.iter().map(|w| w.max(0.0)).collect();
    let total: f64 = positive.iter().sum();
    if total > 0.0 {
        positive.into_iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / weights.len().max(1) as f64; weights.len()]
    }
}
