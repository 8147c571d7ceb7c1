//! Realized performance of an equity curve.
//!
//! Daily figures are annualized with the same trading-day convention the
//! estimator uses, so a backtest's realized volatility is comparable with
//! the volatility the optimizer predicted.

use super::backtest::EquityPoint;
use super::estimate::TRADING_DAYS_PER_YEAR;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Annualized return over maximum drawdown; 0 without a drawdown.
    pub calmar_ratio: f64,
    /// Deepest peak-to-trough loss as a positive fraction.
    pub max_drawdown: f64,
    /// Longest run of observations spent below a previous peak.
    pub max_drawdown_days: usize,
    pub best_day: f64,
    pub worst_day: f64,
}

impl PerformanceMetrics {
    pub fn compute(equity_curve: &[EquityPoint], risk_free_rate: f64) -> Self {
        let returns = daily_returns(equity_curve);
        let start = equity_curve.first().map_or(0.0, |p| p.value);
        let end = equity_curve.last().map_or(start, |p| p.value);

        let total_return = if start > 0.0 { end / start - 1.0 } else { 0.0 };
        let years = returns.len() as f64 / TRADING_DAYS_PER_YEAR;
        let annualized_return = if years > 0.0 && total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
        let annualizer = TRADING_DAYS_PER_YEAR.sqrt();
        let mean = mean(&returns);
        let volatility = sample_std(&returns, mean);
        let downside = downside_deviation(&returns, daily_rf);
        let ratio = |risk: f64| {
            if risk > 0.0 {
                (mean - daily_rf) / risk * annualizer
            } else {
                0.0
            }
        };

        let drawdown = Drawdown::of(equity_curve);
        let calmar_ratio = if drawdown.depth > 0.0 {
            annualized_return / drawdown.depth
        } else {
            0.0
        };

        PerformanceMetrics {
            total_return,
            annualized_return,
            annualized_volatility: volatility * annualizer,
            sharpe_ratio: ratio(volatility),
            sortino_ratio: ratio(downside),
            calmar_ratio,
            max_drawdown: drawdown.depth,
            max_drawdown_days: drawdown.length,
            best_day: returns.iter().copied().reduce(f64::max).unwrap_or(0.0),
            worst_day: returns.iter().copied().reduce(f64::min).unwrap_or(0.0),
        }
    }
}

/// Simple day-over-day returns. A non-positive value yields a zero return.
pub fn daily_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            if w[0].value > 0.0 {
                w[1].value / w[0].value - 1.0
            } else {
                0.0
            }
        })
        .collect()
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn sample_std(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let ss: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum();
    (ss / (xs.len() - 1) as f64).sqrt()
}

// Root mean square shortfall below `threshold`, averaged over every day.
fn downside_deviation(xs: &[f64], threshold: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let ss: f64 = xs
        .iter()
        .map(|&x| (x - threshold).min(0.0).powi(2))
        .sum();
    (ss / xs.len() as f64).sqrt()
}

#[derive(Debug, Default, PartialEq)]
struct Drawdown {
    depth: f64,
    length: usize,
}

impl Drawdown {
    fn of(equity_curve: &[EquityPoint]) -> Self {
        let mut worst = Drawdown::default();
        let mut peak = f64::NEG_INFINITY;
        let mut underwater = 0;

        for point in equity_curve {
            if point.value >= peak {
                peak = point.value;
                underwater = 0;
                continue;
            }
            underwater += 1;
            worst.length = worst.length.max(underwater);
            if peak > 0.0 {
                worst.depth = worst.depth.max(1.0 - point.value / peak);
            }
        }
        worst
    }
}
