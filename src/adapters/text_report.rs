//! Plain-text report adapter: aligned grid tables for terminal output.

use crate::domain::allocation::Allocation;
use crate::domain::error::PortoptError;
use crate::domain::holdings::{HoldingsAnalysis, Trade, TradeAction};
use crate::domain::result::{Frontier, OptimizationResult};
use crate::ports::report_port::{BacktestRun, NamedPortfolio, ReportPort};
use std::io::Write;
use tabled::builder::Builder;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Modify, Style};

pub struct TextReport;

/// Grid table. The first column is left-aligned, the rest right-aligned.
struct Table {
    builder: Builder,
}

impl Table {
    fn new(headers: &[&str]) -> Self {
        let mut builder = Builder::default();
        builder.push_record(headers.iter().copied());
        Self { builder }
    }

    fn row(&mut self, cells: Vec<String>) {
        self.builder.push_record(cells);
    }

    fn render(self) -> String {
        let mut table = self.builder.build();
        table
            .with(Style::ascii())
            .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
            .with(Modify::new(Columns::first()).with(Alignment::left()));
        format!("{table}\n")
    }
}

fn pct(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

fn fmt_currency(value: f64) -> String {
    if value >= 0.0 {
        format!("${:.2}", value)
    } else {
        format!("-${:.2}", value.abs())
    }
}

fn emit(out: &mut dyn Write, text: &str) -> Result<(), PortoptError> {
    out.write_all(text.as_bytes())?;
    Ok(())
}

fn summary_table(portfolio: &OptimizationResult) -> String {
    let mut table = Table::new(&["Metric", "Value"]);
    table.row(vec!["Expected Return".into(), pct(portfolio.expected_return)]);
    table.row(vec!["Volatility".into(), pct(portfolio.volatility)]);
    table.row(vec!["Sharpe Ratio".into(), format!("{:.3}", portfolio.sharpe_ratio)]);
    table.render()
}

fn weights_table(portfolio: &OptimizationResult) -> String {
    let mut table = Table::new(&["Ticker", "Weight"]);
    for (ticker, weight) in portfolio.holdings() {
        table.row(vec![ticker.to_string(), pct(weight)]);
    }
    table.render()
}

impl ReportPort for TextReport {
    fn write_portfolio(
        &self,
        out: &mut dyn Write,
        title: &str,
        portfolio: &OptimizationResult,
    ) -> Result<(), PortoptError> {
        let mut output = format!("=== {title} ===\n");
        output.push_str(&weights_table(portfolio));
        output.push_str(&summary_table(portfolio));
        emit(out, &output)
    }

    fn write_frontier(&self, out: &mut dyn Write, frontier: &Frontier) -> Result<(), PortoptError> {
        let mut output = format!("=== Efficient Frontier ({}) ===\n", frontier.algorithm);
        if let Some(sims) = frontier.simulations {
            output.push_str(&format!(
                "Simulations: {} of {} succeeded\n",
                sims.succeeded, sims.requested
            ));
        }

        let tickers = frontier
            .points
            .first()
            .map(|p| p.tickers.clone())
            .unwrap_or_default();
        let mut headers = vec!["#", "Return", "Volatility", "Sharpe"];
        headers.extend(tickers.iter().map(String::as_str));
        let mut table = Table::new(&headers);
        for (i, point) in frontier.iter().enumerate() {
            let mut row = vec![
                (i + 1).to_string(),
                pct(point.expected_return),
                pct(point.volatility),
                format!("{:.3}", point.sharpe_ratio),
            ];
            row.extend(point.weights.iter().map(|w| pct(*w)));
            table.row(row);
        }
        output.push_str(&table.render());

        if let Some(best) = frontier.max_sharpe() {
            output.push_str(&format!(
                "Max Sharpe point: return {}, volatility {}, sharpe {:.3}\n",
                pct(best.expected_return),
                pct(best.volatility),
                best.sharpe_ratio
            ));
        }
        emit(out, &output)
    }

    fn write_comparison(
        &self,
        out: &mut dyn Write,
        portfolios: &[NamedPortfolio<'_>],
    ) -> Result<(), PortoptError> {
        let mut output = String::from("=== Strategy Comparison ===\n");
        let mut table = Table::new(&["Strategy", "Return", "Volatility", "Sharpe", "Top Holdings"]);
        for entry in portfolios {
            let top: Vec<String> = entry
                .portfolio
                .holdings()
                .iter()
                .take(3)
                .map(|(t, w)| format!("{t} {:.0}%", w * 100.0))
                .collect();
            table.row(vec![
                entry.name.clone(),
                pct(entry.portfolio.expected_return),
                pct(entry.portfolio.volatility),
                format!("{:.3}", entry.portfolio.sharpe_ratio),
                top.join(", "),
            ]);
        }
        output.push_str(&table.render());
        emit(out, &output)
    }

    fn write_analysis(
        &self,
        out: &mut dyn Write,
        analysis: &HoldingsAnalysis,
    ) -> Result<(), PortoptError> {
        let mut output = String::from("=== Current Portfolio ===\n");
        let mut weights = Table::new(&["Ticker", "Weight"]);
        for (ticker, weight) in &analysis.weights {
            weights.row(vec![ticker.clone(), pct(*weight)]);
        }
        output.push_str(&weights.render());

        let mut table = Table::new(&["Metric", "Value"]);
        table.row(vec!["Total Value".into(), fmt_currency(analysis.total_value)]);
        table.row(vec!["Invested".into(), fmt_currency(analysis.invested_value)]);
        table.row(vec!["Cash".into(), fmt_currency(analysis.cash)]);
        table.row(vec!["Expected Return".into(), pct(analysis.expected_return)]);
        table.row(vec!["Volatility".into(), pct(analysis.volatility)]);
        table.row(vec!["Sharpe Ratio".into(), format!("{:.3}", analysis.sharpe_ratio)]);
        output.push_str(&table.render());
        emit(out, &output)
    }

    fn write_trades(&self, out: &mut dyn Write, trades: &[Trade]) -> Result<(), PortoptError> {
        let mut output = String::from("=== Rebalancing Trades ===\n");
        if trades.is_empty() {
            output.push_str("Portfolio is already on target.\n");
            return emit(out, &output);
        }
        let mut table = Table::new(&["Ticker", "Action", "Shares", "Value", "Current", "Target"]);
        for trade in trades {
            let action = match trade.action {
                TradeAction::Buy => "BUY",
                TradeAction::Sell => "SELL",
            };
            table.row(vec![
                trade.ticker.clone(),
                action.into(),
                format!("{:.0}", trade.shares),
                fmt_currency(trade.value),
                pct(trade.current_weight),
                pct(trade.target_weight),
            ]);
        }
        output.push_str(&table.render());
        emit(out, &output)
    }

    fn write_allocation(
        &self,
        out: &mut dyn Write,
        allocation: &Allocation,
    ) -> Result<(), PortoptError> {
        let mut output = String::from("=== Discrete Allocation ===\n");
        let mut table = Table::new(&["Ticker", "Shares"]);
        for (ticker, shares) in &allocation.shares {
            table.row(vec![ticker.clone(), shares.to_string()]);
        }
        output.push_str(&table.render());
        output.push_str(&format!("Leftover cash: {}\n", fmt_currency(allocation.leftover)));
        emit(out, &output)
    }

    fn write_backtest(&self, out: &mut dyn Write, runs: &[BacktestRun<'_>]) -> Result<(), PortoptError> {
        let mut output = String::from("=== Backtest ===\n");
        if let Some(first) = runs.first() {
            if let (Some(start), Some(end)) =
                (first.result.equity_curve.first(), first.result.equity_curve.last())
            {
                output.push_str(&format!("Period: {} to {}\n", start.date, end.date));
            }
        }
        let mut table = Table::new(&[
            "Portfolio",
            "Final Value",
            "Total Return",
            "Annualized",
            "Volatility",
            "Sharpe",
            "Max Drawdown",
            "Rebalances",
        ]);
        for run in runs {
            let m = run.metrics;
            table.row(vec![
                run.name.clone(),
                fmt_currency(run.final_value),
                pct(m.total_return),
                pct(m.annualized_return),
                pct(m.annualized_volatility),
                format!("{:.2}", m.sharpe_ratio),
                format!("-{:.1}%", m.max_drawdown * 100.0),
                run.rebalances.to_string(),
            ]);
        }
        output.push_str(&table.render());
        emit(out, &output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::SimulationSummary;
    use std::collections::BTreeMap;

    fn portfolio() -> OptimizationResult {
        OptimizationResult {
            tickers: vec!["AAA".into(), "BBB".into(), "CCC".into()],
            weights: vec![0.25, 0.75, 0.0],
            expected_return: 0.1234,
            volatility: 0.2,
            sharpe_ratio: 0.517,
        }
    }

    fn render<F>(f: F) -> String
    where
        F: FnOnce(&mut dyn Write) -> Result<(), PortoptError>,
    {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn table_aligns_columns() {
        let mut table = Table::new(&["Ticker", "Weight"]);
        table.row(vec!["A".into(), "1.00%".into()]);
        table.row(vec!["LONGNAME".into(), "100.00%".into()]);
        let text = table.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines.iter().all(|l| l.len() == lines[0].len()));
        assert_eq!(lines[3], "| A        |   1.00% |");
    }

    #[test]
    fn portfolio_skips_dust_and_sorts() {
        let text = render(|out| TextReport.write_portfolio(out, "Max Sharpe", &portfolio()));
        assert!(text.starts_with("=== Max Sharpe ===\n"));
        assert!(!text.contains("CCC"));
        let bbb = text.find("BBB").unwrap();
        let aaa = text.find("AAA").unwrap();
        assert!(bbb < aaa);
        assert!(text.contains("12.34%"));
        assert!(text.contains("0.517"));
    }

    #[test]
    fn frontier_lists_points_and_simulations() {
        let mut frontier = Frontier::new("monte_carlo_resampling", vec![portfolio(), portfolio()]);
        frontier.simulations = Some(SimulationSummary {
            requested: 10,
            succeeded: 9,
        });
        let text = render(|out| TextReport.write_frontier(out, &frontier));
        assert!(text.contains("monte_carlo_resampling"));
        assert!(text.contains("9 of 10"));
        assert!(text.contains("| 2 "));
        assert!(text.contains("Max Sharpe point"));
    }

    #[test]
    fn empty_trades_message() {
        let text = render(|out| TextReport.write_trades(out, &[]));
        assert!(text.contains("already on target"));
    }

    #[test]
    fn allocation_reports_leftover() {
        let allocation = Allocation {
            shares: BTreeMap::from([("AAA".to_string(), 12)]),
            leftover: 3.5,
        };
        let text = render(|out| TextReport.write_allocation(out, &allocation));
        assert!(text.contains("| AAA    |     12 |"));
        assert!(text.contains("Leftover cash: $3.50"));
    }

    #[test]
    fn currency_formatting() {
        assert_eq!(fmt_currency(12.345), "$12.35");
        assert_eq!(fmt_currency(-5.0), "-$5.00");
    }
}
