//! Report rendering port.
//!
//! Adapters write to any [`Write`] sink so the CLI can target stdout and
//! tests can capture into a buffer.

use crate::domain::allocation::Allocation;
use crate::domain::backtest::BacktestResult;
use crate::domain::error::PortoptError;
use crate::domain::holdings::{HoldingsAnalysis, Trade};
use crate::domain::metrics::PerformanceMetrics;
use crate::domain::result::{Frontier, OptimizationResult};
use serde::Serialize;
use std::io::Write;

/// One labelled portfolio, e.g. a strategy in a side-by-side comparison.
#[derive(Debug, Clone, Serialize)]
pub struct NamedPortfolio<'a> {
    pub name: String,
    pub portfolio: &'a OptimizationResult,
}

/// One labelled backtest run with its metrics.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestRun<'a> {
    pub name: String,
    pub final_value: f64,
    pub rebalances: usize,
    pub metrics: &'a PerformanceMetrics,
    #[serde(skip)]
    pub result: &'a BacktestResult,
}

pub trait ReportPort {
    fn write_portfolio(
        &self,
        out: &mut dyn Write,
        title: &str,
        portfolio: &OptimizationResult,
    ) -> Result<(), PortoptError>;

    fn write_frontier(&self, out: &mut dyn Write, frontier: &Frontier) -> Result<(), PortoptError>;

    fn write_comparison(
        &self,
        out: &mut dyn Write,
        portfolios: &[NamedPortfolio<'_>],
    ) -> Result<(), PortoptError>;

    fn write_analysis(
        &self,
        out: &mut dyn Write,
        analysis: &HoldingsAnalysis,
    ) -> Result<(), PortoptError>;

    fn write_trades(&self, out: &mut dyn Write, trades: &[Trade]) -> Result<(), PortoptError>;

    fn write_allocation(
        &self,
        out: &mut dyn Write,
        allocation: &Allocation,
    ) -> Result<(), PortoptError>;

    fn write_backtest(&self, out: &mut dyn Write, runs: &[BacktestRun<'_>]) -> Result<(), PortoptError>;
}
