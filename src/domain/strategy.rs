//! Named investment strategies and risk levels.

use crate::domain::error::PortoptError;
use crate::domain::estimate::ReturnsEstimate;
use crate::domain::result::{Frontier, OptimizationResult};
use crate::domain::solver::{self, Constraints, Objective};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskLevel {
    /// Annualized volatility the level aims for.
    pub fn target_volatility(self) -> f64 {
        match self {
            RiskLevel::Conservative => 0.10,
            RiskLevel::Moderate => 0.15,
            RiskLevel::Aggressive => 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    MaxSharpe,
    MinVolatility,
    RiskLevel(RiskLevel),
}

impl Strategy {
    /// Every strategy, in the order the comparison report lists them.
    pub const ALL: [Strategy; 5] = [
        Strategy::MaxSharpe,
        Strategy::MinVolatility,
        Strategy::RiskLevel(RiskLevel::Conservative),
        Strategy::RiskLevel(RiskLevel::Moderate),
        Strategy::RiskLevel(RiskLevel::Aggressive),
    ];

    pub fn objective(self) -> Objective {
        match self {
            Strategy::MaxSharpe => Objective::MaxSharpe,
            Strategy::MinVolatility => Objective::MinVolatility,
            Strategy::RiskLevel(level) => Objective::TargetVolatility(level.target_volatility()),
        }
    }
}

impl FromStr for Strategy {
    type Err = PortoptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "max_sharpe" => Ok(Strategy::MaxSharpe),
            "min_volatility" => Ok(Strategy::MinVolatility),
            "conservative" => Ok(Strategy::RiskLevel(RiskLevel::Conservative)),
            "moderate" => Ok(Strategy::RiskLevel(RiskLevel::Moderate)),
            "aggressive" => Ok(Strategy::RiskLevel(RiskLevel::Aggressive)),
            other => Err(PortoptError::invalid(
                "strategy",
                format!(
                    "'{other}' is not a strategy \
                     (max_sharpe, min_volatility, conservative, moderate, aggressive)"
                ),
            )),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::MaxSharpe => "max_sharpe",
            Strategy::MinVolatility => "min_volatility",
            Strategy::RiskLevel(RiskLevel::Conservative) => "conservative",
            Strategy::RiskLevel(RiskLevel::Moderate) => "moderate",
            Strategy::RiskLevel(RiskLevel::Aggressive) => "aggressive",
        };
        f.write_str(name)
    }
}

/// Solves a strategy. A risk level whose volatility cannot be reached
/// falls back to the maximum Sharpe portfolio.
pub fn run_strategy(
    estimate: &ReturnsEstimate,
    strategy: Strategy,
    constraints: &Constraints,
    risk_free_rate: f64,
) -> Result<OptimizationResult, PortoptError> {
    solve_with_fallback(strategy, |objective| {
        solver::solve(estimate, objective, constraints, risk_free_rate)
    })
}

/// Runs `solve` on the strategy's objective, retrying with max Sharpe when
/// a risk level reports `TargetNotAchievable`.
pub fn solve_with_fallback<T, F>(strategy: Strategy, mut solve: F) -> Result<T, PortoptError>
where
    F: FnMut(Objective) -> Result<T, PortoptError>,
{
    match solve(strategy.objective()) {
        Err(PortoptError::TargetNotAchievable { target, reason })
            if matches!(strategy, Strategy::RiskLevel(_)) =>
        {
            tracing::debug!(%strategy, %target, %reason, "falling back to max_sharpe");
            eprintln!("Warning: {strategy} target not achievable ({reason}); using max_sharpe");
            solve(Objective::MaxSharpe)
        }
        other => other,
    }
}

/// Picks the frontier point that best serves an objective.
///
/// Target volatility takes the highest-return point within the target.
/// Target return takes the least volatile point reaching the target. A
/// target outside the frontier's span is `TargetNotAchievable`, never
/// clamped to an endpoint.
pub fn select_from_frontier(
    frontier: &Frontier,
    objective: Objective,
) -> Result<&OptimizationResult, PortoptError> {
    let picked = match objective {
        Objective::MaxSharpe => frontier.max_sharpe(),
        Objective::MinVolatility => frontier.min_volatility(),
        Objective::TargetVolatility(target) => {
            let tol = solver::VOLATILITY_TOLERANCE;
            within_span(frontier, "volatility", target, tol, |p| p.volatility)?;
            frontier
                .iter()
                .filter(|p| p.volatility <= target + tol)
                .reduce(|best, p| if p.expected_return > best.expected_return { p } else { best })
        }
        Objective::TargetReturn(target) => {
            let tol = solver::VOLATILITY_TOLERANCE * (1.0 + target.abs());
            within_span(frontier, "return", target, tol, |p| p.expected_return)?;
            frontier
                .iter()
                .filter(|p| p.expected_return >= target - tol)
                .reduce(|best, p| if p.volatility < best.volatility { p } else { best })
        }
    };
    picked.ok_or_else(|| PortoptError::insufficient(frontier.algorithm.clone(), "empty frontier"))
}

// An empty frontier passes; the caller reports it.
fn within_span(
    frontier: &Frontier,
    measure: &str,
    target: f64,
    tol: f64,
    key: impl Fn(&OptimizationResult) -> f64,
) -> Result<(), PortoptError> {
    let Some((low, high)) = frontier.iter().map(key).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
    }) else {
        return Ok(());
    };
    if target.is_finite() && target >= low - tol && target <= high + tol {
        return Ok(());
    }
    Err(PortoptError::unreachable_target(
        format!("{measure} {target}"),
        format!("{} frontier spans [{low:.6}, {high:.6}]", frontier.algorithm),
    ))
}
