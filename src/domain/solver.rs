//! Mean-variance frontier solver.
//!
//! Every objective reduces to one or more calls into the active-set QP in
//! [`crate::domain::qp`] over the bounded simplex
//! `{ w : Σw = 1, min_weight ≤ w_i ≤ max_weight }`.

use crate::domain::error::PortoptError;
use crate::domain::estimate::ReturnsEstimate;
use crate::domain::qp::{self, QuadraticProgram};
use crate::domain::result::{
    Frontier, OptimizationResult, WEIGHT_CUTOFF, clean_weights, sharpe_ratio,
};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use std::fmt;

/// Tolerance when comparing a requested volatility to the achievable range.
pub const VOLATILITY_TOLERANCE: f64 = 1e-9;
const RETURN_TOLERANCE: f64 = 1e-12;
const BISECTION_STEPS: usize = 100;
const GOLDEN_STEPS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "objective", content = "target")]
pub enum Objective {
    MaxSharpe,
    MinVolatility,
    TargetVolatility(f64),
    TargetReturn(f64),
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::MaxSharpe => write!(f, "max_sharpe"),
            Objective::MinVolatility => write!(f, "min_volatility"),
            Objective::TargetVolatility(v) => write!(f, "target_volatility({v})"),
            Objective::TargetReturn(r) => write!(f, "target_return({r})"),
        }
    }
}

/// Uniform per-asset weight bounds on a fully invested portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Constraints {
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            min_weight: 0.0,
            max_weight: 1.0,
        }
    }
}

impl Constraints {
    pub fn new(min_weight: f64, max_weight: f64) -> Self {
        Self {
            min_weight,
            max_weight,
        }
    }

    pub fn validate(&self, asset_count: usize) -> Result<(), PortoptError> {
        let (lo, hi) = (self.min_weight, self.max_weight);
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
            return Err(PortoptError::invalid(
                "weight_bounds",
                format!("[{lo}, {hi}] must satisfy 0 <= min <= max <= 1"),
            ));
        }
        let n = asset_count as f64;
        if n * lo > 1.0 + 1e-12 || n * hi < 1.0 - 1e-12 {
            return Err(PortoptError::invalid(
                "weight_bounds",
                format!("[{lo}, {hi}] cannot hold a fully invested portfolio of {asset_count} assets"),
            ));
        }
        Ok(())
    }

    /// Drops dust positions without leaving the bounds. In the plain
    /// long-only box the rest is renormalized. Otherwise the removed weight
    /// goes to held positions in proportion to their room below
    /// `max_weight`. With a positive lower bound, or too little room, the
    /// weights are only clamped.
    pub fn clean(&self, weights: &[f64]) -> Vec<f64> {
        let clamped: Vec<f64> = weights
            .iter()
            .map(|w| w.clamp(self.min_weight, self.max_weight))
            .collect();
        if self.is_long_only_box() {
            return clean_weights(&clamped, WEIGHT_CUTOFF);
        }
        if self.min_weight > 0.0 {
            return clamped;
        }
        let dust: f64 = clamped.iter().filter(|w| **w < WEIGHT_CUTOFF).sum();
        if dust == 0.0 {
            return clamped;
        }
        let room = |w: f64| (self.max_weight - w).max(0.0);
        let free: f64 = clamped
            .iter()
            .filter(|w| **w >= WEIGHT_CUTOFF)
            .map(|w| room(*w))
            .sum();
        if free < dust {
            return clamped;
        }
        clamped
            .iter()
            .map(|&w| if w < WEIGHT_CUTOFF { 0.0 } else { w + dust * room(w) / free })
            .collect()
    }

    fn is_long_only_box(&self) -> bool {
        self.min_weight == 0.0 && self.max_weight >= 1.0
    }
}

/// Solves one objective and reports cleaned weights with their moments.
pub fn solve(
    estimate: &ReturnsEstimate,
    objective: Objective,
    constraints: &Constraints,
    risk_free_rate: f64,
) -> Result<OptimizationResult, PortoptError> {
    constraints.validate(estimate.asset_count())?;
    let weights = match objective {
        Objective::MinVolatility => min_volatility_weights(estimate, constraints)?,
        Objective::TargetReturn(r) => target_return_weights(estimate, constraints, r)?,
        Objective::TargetVolatility(v) => target_volatility_weights(estimate, constraints, v)?,
        Objective::MaxSharpe => max_sharpe_weights(estimate, constraints, risk_free_rate)?,
    };
    tracing::debug!(%objective, "solved");
    Ok(OptimizationResult::from_weights(
        estimate,
        constraints.clean(&weights),
        risk_free_rate,
    ))
}

/// Evenly spaced target returns from the min-volatility portfolio to the
/// maximum achievable return.
pub fn efficient_frontier(
    estimate: &ReturnsEstimate,
    num_portfolios: usize,
    constraints: &Constraints,
    risk_free_rate: f64,
) -> Result<Frontier, PortoptError> {
    let points = frontier_weights(estimate, num_portfolios, constraints)?
        .into_iter()
        .map(|w| {
            OptimizationResult::from_weights(
                estimate,
                constraints.clean(&w),
                risk_free_rate,
            )
        })
        .collect();
    Ok(Frontier::new("mean_variance", points))
}

/// Raw (uncleaned) frontier weights, ordered by increasing target return.
pub fn frontier_weights(
    estimate: &ReturnsEstimate,
    num_portfolios: usize,
    constraints: &Constraints,
) -> Result<Vec<Vec<f64>>, PortoptError> {
    if num_portfolios < 2 {
        return Err(PortoptError::invalid(
            "num_portfolios",
            format!("{num_portfolios} is below the minimum of 2"),
        ));
    }
    constraints.validate(estimate.asset_count())?;

    let min_vol = min_volatility_weights(estimate, constraints)?;
    let r_min = estimate.portfolio_return(&min_vol);
    let r_max = estimate
        .portfolio_return(&extreme_return_weights(estimate, constraints, true))
        .max(r_min);

    let mut out = Vec::with_capacity(num_portfolios);
    out.push(min_vol);
    let span = r_max - r_min;
    for k in 1..num_portfolios {
        let target = r_min + span * k as f64 / (num_portfolios - 1) as f64;
        out.push(target_return_weights(estimate, constraints, target)?);
    }
    Ok(out)
}

fn budget_program(estimate: &ReturnsEstimate, constraints: &Constraints) -> QuadraticProgram {
    let n = estimate.asset_count();
    QuadraticProgram {
        hessian: estimate.covariance().clone(),
        eq_matrix: DMatrix::from_element(1, n, 1.0),
        eq_rhs: DVector::from_element(1, 1.0),
        lower: vec![constraints.min_weight; n],
        upper: vec![constraints.max_weight; n],
    }
}

fn min_volatility_weights(
    estimate: &ReturnsEstimate,
    constraints: &Constraints,
) -> Result<Vec<f64>, PortoptError> {
    let n = estimate.asset_count();
    let start = vec![1.0 / n as f64; n];
    Ok(qp::solve(&budget_program(estimate, constraints), &start)?.x)
}

/// Vertex of the bounded simplex with the lowest or highest return.
///
/// Fills assets at their lower bound, then spends the remaining budget on
/// assets in return order up to the upper bound. Ties keep universe order.
fn extreme_return_weights(
    estimate: &ReturnsEstimate,
    constraints: &Constraints,
    highest: bool,
) -> Vec<f64> {
    let n = estimate.asset_count();
    let mu = estimate.expected_returns();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        let cmp = mu[a].total_cmp(&mu[b]);
        if highest { cmp.reverse() } else { cmp }
    });

    let mut weights = vec![constraints.min_weight; n];
    let mut budget = 1.0 - constraints.min_weight * n as f64;
    for i in order {
        if budget <= 0.0 {
            break;
        }
        let add = budget.min(constraints.max_weight - constraints.min_weight);
        weights[i] += add;
        budget -= add;
    }
    weights
}

fn target_return_weights(
    estimate: &ReturnsEstimate,
    constraints: &Constraints,
    target: f64,
) -> Result<Vec<f64>, PortoptError> {
    let low = extreme_return_weights(estimate, constraints, false);
    let high = extreme_return_weights(estimate, constraints, true);
    let r_low = estimate.portfolio_return(&low);
    let r_high = estimate.portfolio_return(&high);
    let tol = RETURN_TOLERANCE * (1.0 + target.abs());

    if !target.is_finite() || target < r_low - tol || target > r_high + tol {
        return Err(PortoptError::unreachable_target(
            format!("return {target}"),
            format!("achievable returns span [{r_low:.6}, {r_high:.6}]"),
        ));
    }
    if r_high - r_low <= tol {
        return min_volatility_weights(estimate, constraints);
    }

    let theta = ((target - r_low) / (r_high - r_low)).clamp(0.0, 1.0);
    let start: Vec<f64> = low
        .iter()
        .zip(&high)
        .map(|(l, h)| (1.0 - theta) * l + theta * h)
        .collect();

    let mut program = budget_program(estimate, constraints);
    let n = estimate.asset_count();
    let mut eq = DMatrix::from_element(2, n, 1.0);
    for i in 0..n {
        eq[(1, i)] = estimate.expected_returns()[i];
    }
    program.eq_matrix = eq;
    program.eq_rhs = DVector::from_vec(vec![1.0, estimate.portfolio_return(&start)]);
    match qp::solve(&program, &start) {
        Ok(solution) => Ok(solution.x),
        // At an end of the range the feasible set collapses onto the
        // extreme vertex, which is then optimal.
        Err(err) if theta == 0.0 || theta == 1.0 => {
            tracing::debug!(%err, target, "degenerate end of return range, using vertex");
            Ok(start)
        }
        Err(err) => Err(err),
    }
}

fn target_volatility_weights(
    estimate: &ReturnsEstimate,
    constraints: &Constraints,
    target: f64,
) -> Result<Vec<f64>, PortoptError> {
    let floor = min_volatility_weights(estimate, constraints)?;
    let sigma_floor = estimate.portfolio_volatility(&floor);
    let r_floor = estimate.portfolio_return(&floor);

    let r_top = estimate.portfolio_return(&extreme_return_weights(estimate, constraints, true));
    let top = target_return_weights(estimate, constraints, r_top)?;
    let sigma_top = estimate.portfolio_volatility(&top);

    if !target.is_finite() || target < sigma_floor - VOLATILITY_TOLERANCE {
        return Err(PortoptError::unreachable_target(
            format!("volatility {target}"),
            format!("below the minimum achievable volatility {sigma_floor:.6}"),
        ));
    }
    if target > sigma_top + VOLATILITY_TOLERANCE {
        return Err(PortoptError::unreachable_target(
            format!("volatility {target}"),
            format!("above the volatility of the maximum-return portfolio {sigma_top:.6}"),
        ));
    }
    if target <= sigma_floor {
        return Ok(floor);
    }
    if target >= sigma_top {
        return Ok(top);
    }

    // Volatility increases with target return along the efficient branch.
    let (mut lo, mut hi) = (r_floor, r_top);
    let mut best = floor;
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        let w = target_return_weights(estimate, constraints, mid)?;
        let sigma = estimate.portfolio_volatility(&w);
        if sigma > target {
            hi = mid;
        } else {
            lo = mid;
            best = w;
        }
        if (sigma - target).abs() <= 1e-12 || hi - lo <= 1e-15 * (1.0 + hi.abs()) {
            break;
        }
    }
    Ok(best)
}

fn max_sharpe_weights(
    estimate: &ReturnsEstimate,
    constraints: &Constraints,
    risk_free_rate: f64,
) -> Result<Vec<f64>, PortoptError> {
    let mu = estimate.expected_returns();
    let excess: Vec<f64> = mu.iter().map(|r| r - risk_free_rate).collect();
    let (best_asset, best_excess) = excess
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |acc, (i, e)| if e > acc.1 { (i, e) } else { acc });

    if best_excess <= 0.0 {
        return Err(PortoptError::unreachable_target(
            "max_sharpe",
            format!("no asset has an expected return above the risk-free rate {risk_free_rate}"),
        ));
    }

    if constraints.is_long_only_box() {
        let n = estimate.asset_count();
        let program = QuadraticProgram {
            hessian: estimate.covariance().clone(),
            eq_matrix: DMatrix::from_row_slice(1, n, &excess),
            eq_rhs: DVector::from_element(1, 1.0),
            lower: vec![0.0; n],
            upper: vec![f64::INFINITY; n],
        };
        let mut start = vec![0.0; n];
        start[best_asset] = 1.0 / best_excess;
        let y = qp::solve(&program, &start)?.x;
        let total: f64 = y.iter().sum();
        return Ok(y.into_iter().map(|v| v / total).collect());
    }

    let floor = min_volatility_weights(estimate, constraints)?;
    let r_floor = estimate.portfolio_return(&floor);
    let r_top = estimate.portfolio_return(&extreme_return_weights(estimate, constraints, true));
    if r_top <= risk_free_rate {
        return Err(PortoptError::unreachable_target(
            "max_sharpe",
            format!("no admissible portfolio returns more than the risk-free rate {risk_free_rate}"),
        ));
    }
    golden_section_sharpe(estimate, constraints, risk_free_rate, r_floor.max(risk_free_rate), r_top)
}

/// Maximizes Sharpe over target returns in `[lo, hi]` on the frontier.
fn golden_section_sharpe(
    estimate: &ReturnsEstimate,
    constraints: &Constraints,
    risk_free_rate: f64,
    lo: f64,
    hi: f64,
) -> Result<Vec<f64>, PortoptError> {
    let ratio = (5.0_f64.sqrt() - 1.0) / 2.0;
    let evaluate = |r: f64| -> Result<(f64, Vec<f64>), PortoptError> {
        let w = target_return_weights(estimate, constraints, r)?;
        let s = sharpe_ratio(
            estimate.portfolio_return(&w),
            estimate.portfolio_volatility(&w),
            risk_free_rate,
        );
        Ok((s, w))
    };

    let (mut a, mut b) = (lo, hi);
    let mut c = b - ratio * (b - a);
    let mut d = a + ratio * (b - a);
    let mut fc = evaluate(c)?;
    let mut fd = evaluate(d)?;
    for _ in 0..GOLDEN_STEPS {
        if b - a <= 1e-12 * (1.0 + b.abs()) {
            break;
        }
        if fc.0 >= fd.0 {
            b = d;
            d = c;
            fd = fc;
            c = b - ratio * (b - a);
            fc = evaluate(c)?;
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + ratio * (b - a);
            fd = evaluate(d)?;
        }
    }

    // The optimum may sit on an end of the interval.
    let mut best = if fc.0 >= fd.0 { fc } else { fd };
    for end in [lo, hi] {
        let candidate = evaluate(end)?;
        if candidate.0 > best.0 {
            best = candidate;
        }
    }
    Ok(best.1)
}
