//! JSON report adapter. Each call writes one pretty-printed document.

use crate::domain::allocation::Allocation;
use crate::domain::error::PortoptError;
use crate::domain::holdings::{HoldingsAnalysis, Trade};
use crate::domain::result::{Frontier, OptimizationResult};
use crate::ports::report_port::{BacktestRun, NamedPortfolio, ReportPort};
use serde::Serialize;
use serde_json::json;
use std::io::Write;

pub struct JsonReport;

fn emit<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<(), PortoptError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| PortoptError::Data {
        reason: format!("failed to serialize report: {e}"),
    })?;
    writeln!(out, "{text}")?;
    Ok(())
}

impl ReportPort for JsonReport {
    fn write_portfolio(
        &self,
        out: &mut dyn Write,
        title: &str,
        portfolio: &OptimizationResult,
    ) -> Result<(), PortoptError> {
        emit(
            out,
            &json!({
                "title": title,
                "weights": portfolio.weight_map(),
                "expected_return": portfolio.expected_return,
                "volatility": portfolio.volatility,
                "sharpe_ratio": portfolio.sharpe_ratio,
            }),
        )
    }

    fn write_frontier(&self, out: &mut dyn Write, frontier: &Frontier) -> Result<(), PortoptError> {
        emit(out, frontier)
    }

    fn write_comparison(
        &self,
        out: &mut dyn Write,
        portfolios: &[NamedPortfolio<'_>],
    ) -> Result<(), PortoptError> {
        emit(out, portfolios)
    }

    fn write_analysis(
        &self,
        out: &mut dyn Write,
        analysis: &HoldingsAnalysis,
    ) -> Result<(), PortoptError> {
        emit(out, analysis)
    }

    fn write_trades(&self, out: &mut dyn Write, trades: &[Trade]) -> Result<(), PortoptError> {
        emit(out, &json!({ "trades": trades }))
    }

    fn write_allocation(
        &self,
        out: &mut dyn Write,
        allocation: &Allocation,
    ) -> Result<(), PortoptError> {
        emit(out, allocation)
    }

    fn write_backtest(&self, out: &mut dyn Write, runs: &[BacktestRun<'_>]) -> Result<(), PortoptError> {
        emit(out, &json!({ "runs": runs }))
    }
}
