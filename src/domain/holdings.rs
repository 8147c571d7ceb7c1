//! Current holdings: valuation, risk analysis and rebalancing trades.

use crate::domain::error::PortoptError;
use crate::domain::estimate::ReturnsEstimate;
use crate::domain::result::{OptimizationResult, portfolio_performance};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Minimum share difference that produces a trade.
pub const TRADE_THRESHOLD_SHARES: f64 = 0.5;

/// Share quantities per ticker plus uninvested cash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Holdings {
    pub positions: BTreeMap<String, f64>,
    #[serde(default)]
    pub cash: f64,
}

impl Holdings {
    /// Parses `{"positions": {"AAPL": 10}, "cash": 500}`. Tickers are uppercased.
    pub fn from_json(input: &str) -> Result<Self, PortoptError> {
        let raw: Holdings = serde_json::from_str(input).map_err(|e| PortoptError::Data {
            reason: format!("invalid holdings JSON: {e}"),
        })?;
        let mut positions = BTreeMap::new();
        for (ticker, shares) in raw.positions {
            if !shares.is_finite() || shares < 0.0 {
                return Err(PortoptError::invalid(
                    "holdings",
                    format!("{ticker} has invalid quantity {shares}"),
                ));
            }
            positions.insert(ticker.trim().to_uppercase(), shares);
        }
        Ok(Holdings {
            positions,
            cash: raw.cash,
        })
    }

    pub fn tickers(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn position_values(
        &self,
        prices: &HashMap<String, f64>,
    ) -> Result<BTreeMap<String, f64>, PortoptError> {
        self.positions
            .iter()
            .map(|(ticker, shares)| Ok((ticker.clone(), shares * price_of(prices, ticker)?)))
            .collect()
    }

    /// Value of all positions plus cash.
    pub fn total_value(&self, prices: &HashMap<String, f64>) -> Result<f64, PortoptError> {
        Ok(self.position_values(prices)?.values().sum::<f64>() + self.cash)
    }

    /// Weight of each position within the invested (non-cash) value.
    pub fn weights(&self, prices: &HashMap<String, f64>) -> Result<BTreeMap<String, f64>, PortoptError> {
        let values = self.position_values(prices)?;
        let invested: f64 = values.values().sum();
        if invested <= 0.0 {
            return Err(PortoptError::invalid("holdings", "no invested value"));
        }
        Ok(values.into_iter().map(|(t, v)| (t, v / invested)).collect())
    }
}

fn price_of(prices: &HashMap<String, f64>, ticker: &str) -> Result<f64, PortoptError> {
    match prices.get(ticker) {
        Some(p) if *p > 0.0 => Ok(*p),
        _ => Err(PortoptError::invalid(
            "prices",
            format!("no usable price for {ticker}"),
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingsAnalysis {
    pub total_value: f64,
    pub invested_value: f64,
    pub cash: f64,
    pub weights: BTreeMap<String, f64>,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

pub fn analyze(
    holdings: &Holdings,
    estimate: &ReturnsEstimate,
    prices: &HashMap<String, f64>,
    risk_free_rate: f64,
) -> Result<HoldingsAnalysis, PortoptError> {
    for ticker in holdings.positions.keys() {
        if !estimate.tickers().contains(ticker) {
            return Err(PortoptError::invalid(
                "holdings",
                format!("{ticker} is not in the estimated universe"),
            ));
        }
    }
    let weights = holdings.weights(prices)?;
    let vector: Vec<f64> = estimate
        .tickers()
        .iter()
        .map(|t| weights.get(t).copied().unwrap_or(0.0))
        .collect();
    let (expected_return, volatility, sharpe_ratio) =
        portfolio_performance(&vector, estimate, risk_free_rate);
    let invested_value: f64 = holdings.position_values(prices)?.values().sum();

    Ok(HoldingsAnalysis {
        total_value: invested_value + holdings.cash,
        invested_value,
        cash: holdings.cash,
        weights,
        expected_return,
        volatility,
        sharpe_ratio,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub ticker: String,
    pub action: TradeAction,
    pub shares: f64,
    pub value: f64,
    pub current_weight: f64,
    pub target_weight: f64,
}

/// Trades moving `holdings` (cash included) onto the target weights.
/// Differences of half a share or less are left alone.
pub fn rebalance_trades(
    holdings: &Holdings,
    target: &OptimizationResult,
    prices: &HashMap<String, f64>,
) -> Result<Vec<Trade>, PortoptError> {
    let total = holdings.total_value(prices)?;
    if total <= 0.0 {
        return Err(PortoptError::invalid("holdings", "portfolio has no value"));
    }

    let tickers: BTreeSet<&String> = holdings.positions.keys().chain(target.tickers.iter()).collect();
    let mut trades = Vec::new();
    for ticker in tickers {
        let target_weight = target.weight(ticker).unwrap_or(0.0);
        let current_shares = holdings.positions.get(ticker).copied().unwrap_or(0.0);
        if target_weight == 0.0 && current_shares == 0.0 {
            continue;
        }
        let price = price_of(prices, ticker)?;
        let diff = target_weight * total / price - current_shares;
        if diff.abs() <= TRADE_THRESHOLD_SHARES {
            continue;
        }
        let shares = diff.abs().round();
        trades.push(Trade {
            ticker: ticker.clone(),
            action: if diff > 0.0 { TradeAction::Buy } else { TradeAction::Sell },
            shares,
            value: shares * price,
            current_weight: current_shares * price / total,
            target_weight,
        });
    }
    Ok(trades)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    fn prices() -> HashMap<String, f64> {
        HashMap::from([("AAA".to_string(), 10.0), ("BBB".to_string(), 20.0)])
    }

    fn holdings() -> Holdings {
        Holdings::from_json(r#"{"positions": {"aaa": 60, "BBB": 20}, "cash": 0}"#).unwrap()
    }

    fn target(a: f64, b: f64) -> OptimizationResult {
        OptimizationResult {
            tickers: vec!["AAA".into(), "BBB".into()],
            weights: vec![a, b],
            expected_return: 0.0,
            volatility: 0.0,
            sharpe_ratio: 0.0,
        }
    }

    #[test]
    fn parses_and_values_holdings() {
        let h = holdings();
        assert_eq!(h.tickers(), vec!["AAA", "BBB"]);
        assert_relative_eq!(h.total_value(&prices()).unwrap(), 1000.0);
        let w = h.weights(&prices()).unwrap();
        assert_relative_eq!(w["AAA"], 0.6);
        assert_relative_eq!(w["BBB"], 0.4);
    }

    #[test]
    fn rejects_bad_json_and_quantities() {
        assert!(matches!(Holdings::from_json("{"), Err(PortoptError::Data { .. })));
        assert!(Holdings::from_json(r#"{"positions": {"AAA": -1}}"#).is_err());
    }

    #[test]
    fn analysis_uses_estimate_order() {
        let est = ReturnsEstimate::new(
            vec!["BBB".into(), "AAA".into()],
            DVector::from_vec(vec![0.2, 0.1]),
            DMatrix::from_diagonal(&DVector::from_vec(vec![0.09, 0.04])),
        )
        .unwrap();
        let a = analyze(&holdings(), &est, &prices(), 0.0).unwrap();
        assert_relative_eq!(a.expected_return, 0.6 * 0.1 + 0.4 * 0.2, epsilon = 1e-12);
        assert_relative_eq!(a.total_value, 1000.0);
    }

    #[test]
    fn analysis_rejects_unknown_ticker() {
        let est = ReturnsEstimate::new(
            vec!["AAA".into()],
            DVector::from_vec(vec![0.1]),
            DMatrix::from_element(1, 1, 0.04),
        )
        .unwrap();
        let err = analyze(&holdings(), &est, &prices(), 0.0).unwrap_err();
        assert!(err.to_string().contains("BBB"));
    }

    #[test]
    fn rebalance_moves_toward_target() {
        let trades = rebalance_trades(&holdings(), &target(0.4, 0.6), &prices()).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].ticker, "AAA");
        assert_eq!(trades[0].action, TradeAction::Sell);
        assert_relative_eq!(trades[0].shares, 20.0);
        assert_eq!(trades[1].action, TradeAction::Buy);
        assert_relative_eq!(trades[1].shares, 10.0);
        assert_relative_eq!(trades[1].value, 200.0);
    }

    #[test]
    fn small_differences_are_ignored() {
        // AAA target is 60.4 shares, BBB 19.8: both within half a share.
        let trades = rebalance_trades(&holdings(), &target(0.604, 0.396), &prices()).unwrap();
        assert!(trades.is_empty());
    }
}
