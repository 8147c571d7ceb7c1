//! Dense primal active-set solver for small convex quadratic programs.
//!
//! Solves
//!
//! ```text
//! minimize    ½ xᵀ H x
//! subject to  A x = b
//!             lo ≤ x ≤ hi      (hi may be +∞)
//! ```
//!
//! from a feasible starting point. The working set holds the variables
//! pinned at a bound; each iteration either takes a step in the null space
//! of the equality rows restricted to the free variables, or releases the
//! bound with the most negative multiplier. Iterations are capped so a
//! degenerate or near-singular problem fails instead of spinning.

use crate::domain::error::PortoptError;
use nalgebra::{DMatrix, DVector};

const FEASIBILITY_TOL: f64 = 1e-9;
const BOUND_SNAP: f64 = 1e-12;
const STEP_TOL: f64 = 1e-12;
const MULTIPLIER_TOL: f64 = 1e-10;
const RANK_TOL: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct QuadraticProgram {
    pub hessian: DMatrix<f64>,
    pub eq_matrix: DMatrix<f64>,
    pub eq_rhs: DVector<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QpSolution {
    pub x: Vec<f64>,
    pub iterations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundState {
    Free,
    Lower,
    Upper,
}

impl QuadraticProgram {
    pub fn dimension(&self) -> usize {
        self.hessian.nrows()
    }

    pub fn iteration_limit(&self) -> usize {
        50 * (self.dimension() + self.eq_matrix.nrows()) + 100
    }

    pub fn objective(&self, x: &[f64]) -> f64 {
        let v = DVector::from_column_slice(x);
        0.5 * v.dot(&(&self.hessian * &v))
    }

    fn check_start(&self, x: &[f64]) -> Result<(), PortoptError> {
        let n = self.dimension();
        if x.len() != n
            || self.lower.len() != n
            || self.upper.len() != n
            || self.eq_matrix.ncols() != n
            || self.eq_matrix.nrows() != self.eq_rhs.len()
        {
            return Err(failure(0, "problem dimensions are inconsistent"));
        }
        for i in 0..n {
            if self.lower[i] > self.upper[i] {
                return Err(failure(0, format!("empty bound interval for variable {i}")));
            }
            if x[i] < self.lower[i] - FEASIBILITY_TOL || x[i] > self.upper[i] + FEASIBILITY_TOL {
                return Err(failure(0, format!("starting point violates bounds at {i}")));
            }
        }
        let residual = &self.eq_rhs - &self.eq_matrix * DVector::from_column_slice(x);
        if residual.amax() > FEASIBILITY_TOL * (1.0 + self.eq_rhs.amax()) {
            return Err(failure(0, "starting point violates equality constraints"));
        }
        Ok(())
    }
}

fn failure(iterations: usize, reason: impl Into<String>) -> PortoptError {
    PortoptError::SolverFailure {
        iterations,
        reason: reason.into(),
    }
}

pub fn solve(qp: &QuadraticProgram, start: &[f64]) -> Result<QpSolution, PortoptError> {
    qp.check_start(start)?;
    let n = qp.dimension();
    let a = &qp.eq_matrix;

    let mut x = start.to_vec();
    let mut state: Vec<BoundState> = (0..n)
        .map(|i| {
            if x[i] - qp.lower[i] <= BOUND_SNAP {
                x[i] = qp.lower[i];
                BoundState::Lower
            } else if qp.upper[i] - x[i] <= BOUND_SNAP {
                x[i] = qp.upper[i];
                BoundState::Upper
            } else {
                BoundState::Free
            }
        })
        .collect();
    release_for_rank(a, &mut state);

    let mut subspace_solved = false;
    let limit = qp.iteration_limit();

    for iteration in 1..=limit {
        let free: Vec<usize> = (0..n).filter(|&i| state[i] == BoundState::Free).collect();
        let xv = DVector::from_column_slice(&x);
        let gradient = &qp.hessian * &xv;
        let residual = &qp.eq_rhs - a * &xv;
        let (step, multipliers) = kkt_step(qp, &free, &gradient, &residual)
            .ok_or_else(|| failure(iteration, "singular KKT system"))?;

        let scale = 1.0 + x.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        if subspace_solved || step.amax() <= STEP_TOL * scale {
            let tol = MULTIPLIER_TOL * (1.0 + gradient.amax());
            let mut release: Option<(usize, f64)> = None;
            for i in (0..n).filter(|&i| state[i] != BoundState::Free) {
                let reduced = gradient[i] + a.column(i).dot(&multipliers);
                let mult = match state[i] {
                    BoundState::Lower => reduced,
                    BoundState::Upper => -reduced,
                    BoundState::Free => unreachable!(),
                };
                if mult < -tol && release.is_none_or(|(_, worst)| mult < worst) {
                    release = Some((i, mult));
                }
            }
            match release {
                None => {
                    tracing::trace!(iterations = iteration, "active-set solve converged");
                    return Ok(QpSolution {
                        x,
                        iterations: iteration,
                    });
                }
                Some((i, _)) => {
                    state[i] = BoundState::Free;
                    subspace_solved = false;
                    continue;
                }
            }
        }

        let mut alpha = 1.0_f64;
        let mut blocking: Option<(usize, BoundState)> = None;
        for (k, &i) in free.iter().enumerate() {
            let p = step[k];
            if p < 0.0 {
                let ratio = (qp.lower[i] - x[i]) / p;
                if ratio < alpha {
                    alpha = ratio;
                    blocking = Some((i, BoundState::Lower));
                }
            } else if p > 0.0 && qp.upper[i].is_finite() {
                let ratio = (qp.upper[i] - x[i]) / p;
                if ratio < alpha {
                    alpha = ratio;
                    blocking = Some((i, BoundState::Upper));
                }
            }
        }
        let alpha = alpha.max(0.0);
        for (k, &i) in free.iter().enumerate() {
            x[i] += alpha * step[k];
        }

        match blocking {
            Some((i, side)) => {
                state[i] = side;
                x[i] = match side {
                    BoundState::Lower => qp.lower[i],
                    _ => qp.upper[i],
                };
                subspace_solved = false;
            }
            None => subspace_solved = true,
        }
    }

    Err(failure(limit, "iteration limit reached"))
}

/// Frees bounded variables (lowest index first) until the equality rows
/// restricted to the free variables reach the rank of the full matrix.
fn release_for_rank(a: &DMatrix<f64>, state: &mut [BoundState]) {
    if a.nrows() == 0 {
        return;
    }
    let target = a.rank(RANK_TOL);
    let mut current = free_rank(a, state);
    for i in 0..state.len() {
        if current >= target {
            break;
        }
        if state[i] == BoundState::Free {
            continue;
        }
        let previous = state[i];
        state[i] = BoundState::Free;
        let rank = free_rank(a, state);
        if rank > current {
            current = rank;
        } else {
            state[i] = previous;
        }
    }
}

fn free_rank(a: &DMatrix<f64>, state: &[BoundState]) -> usize {
    let free: Vec<usize> = (0..state.len())
        .filter(|&i| state[i] == BoundState::Free)
        .collect();
    if free.is_empty() {
        0
    } else {
        a.select_columns(free.iter()).rank(RANK_TOL)
    }
}

/// Solves the equality-constrained subproblem on the free variables:
///
/// ```text
/// [ H_FF  A_Fᵀ ] [ p ]   [ -g_F ]
/// [ A_F   0    ] [ ν ] = [  r   ]
/// ```
///
/// where `r = b - A x` absorbs accumulated round-off.
fn kkt_step(
    qp: &QuadraticProgram,
    free: &[usize],
    gradient: &DVector<f64>,
    residual: &DVector<f64>,
) -> Option<(DVector<f64>, DVector<f64>)> {
    let k = free.len();
    let m = qp.eq_matrix.nrows();
    let size = k + m;
    if size == 0 {
        return Some((DVector::zeros(0), DVector::zeros(0)));
    }

    let mut kkt = DMatrix::<f64>::zeros(size, size);
    let mut rhs = DVector::<f64>::zeros(size);
    for (r, &i) in free.iter().enumerate() {
        for (c, &j) in free.iter().enumerate() {
            kkt[(r, c)] = qp.hessian[(i, j)];
        }
        for e in 0..m {
            kkt[(r, k + e)] = qp.eq_matrix[(e, i)];
            kkt[(k + e, r)] = qp.eq_matrix[(e, i)];
        }
        rhs[r] = -gradient[i];
    }
    for e in 0..m {
        rhs[k + e] = residual[e];
    }

    let accept = |s: &DVector<f64>| {
        s.iter().all(|v| v.is_finite())
            && (&kkt * s - &rhs).amax() <= 1e-9 * (1.0 + rhs.amax())
    };

    let solution = match kkt.clone().lu().solve(&rhs) {
        Some(s) if accept(&s) => s,
        _ => {
            let s = kkt.clone().svd(true, true).solve(&rhs, 1e-14).ok()?;
            if !s.iter().all(|v| v.is_finite()) {
                return None;
            }
            s
        }
    };

    Some((
        solution.rows(0, k).into_owned(),
        solution.rows(k, m).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn budget_problem(hessian: DMatrix<f64>, lower: f64, upper: f64) -> QuadraticProgram {
        let n = hessian.nrows();
        QuadraticProgram {
            hessian,
            eq_matrix: DMatrix::from_element(1, n, 1.0),
            eq_rhs: DVector::from_element(1, 1.0),
            lower: vec![lower; n],
            upper: vec![upper; n],
        }
    }

    #[test]
    fn unconstrained_interior_minimum() {
        let qp = budget_problem(DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 4.0])), 0.0, 1.0);
        let sol = solve(&qp, &[0.5, 0.5]).unwrap();
        // min x1² + 4x2² s.t. x1 + x2 = 1 → x = (0.8, 0.2)
        assert_relative_eq!(sol.x[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(sol.x[1], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn upper_bound_becomes_active() {
        let qp = budget_problem(DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 4.0])), 0.0, 0.6);
        let sol = solve(&qp, &[0.5, 0.5]).unwrap();
        assert_relative_eq!(sol.x[0], 0.6, epsilon = 1e-12);
        assert_relative_eq!(sol.x[1], 0.4, epsilon = 1e-12);
    }

    #[test]
    fn releases_bound_from_vertex_start() {
        let h = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0, 1.0]));
        let qp = budget_problem(h, 0.0, 1.0);
        let sol = solve(&qp, &[1.0, 0.0, 0.0]).unwrap();
        for v in &sol.x {
            assert_relative_eq!(*v, 1.0 / 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn lower_bound_binds_for_dominated_asset() {
        // Strong positive correlation makes the riskier asset a short at the optimum.
        let h = DMatrix::from_row_slice(2, 2, &[0.04, 0.05, 0.05, 0.09]);
        let qp = budget_problem(h, 0.0, 1.0);
        let sol = solve(&qp, &[0.5, 0.5]).unwrap();
        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(sol.x[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn two_equalities_with_return_target() {
        let h = DMatrix::from_diagonal(&DVector::from_vec(vec![0.04, 0.09, 0.01]));
        let mut a = DMatrix::from_element(2, 3, 1.0);
        a[(1, 0)] = 0.10;
        a[(1, 1)] = 0.15;
        a[(1, 2)] = 0.08;
        let qp = QuadraticProgram {
            hessian: h,
            eq_matrix: a,
            eq_rhs: DVector::from_vec(vec![1.0, 0.12]),
            lower: vec![0.0; 3],
            upper: vec![1.0; 3],
        };
        // Start on the segment between the 0.08 and 0.15 vertices.
        let theta = (0.12 - 0.08) / (0.15 - 0.08);
        let sol = solve(&qp, &[0.0, theta, 1.0 - theta]).unwrap();
        let sum: f64 = sol.x.iter().sum();
        let ret = 0.10 * sol.x[0] + 0.15 * sol.x[1] + 0.08 * sol.x[2];
        assert_relative_eq!(sum, 1.0, epsilon = 1e-10);
        assert_relative_eq!(ret, 0.12, epsilon = 1e-10);
        assert!(sol.x.iter().all(|v| *v >= -1e-12));
        assert!(qp.objective(&sol.x) <= qp.objective(&[0.0, theta, 1.0 - theta]));
    }

    #[test]
    fn infinite_upper_bounds_are_supported() {
        let h = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0]));
        let qp = QuadraticProgram {
            hessian: h,
            eq_matrix: DMatrix::from_row_slice(1, 2, &[1.0, 2.0]),
            eq_rhs: DVector::from_element(1, 1.0),
            lower: vec![0.0; 2],
            upper: vec![f64::INFINITY; 2],
        };
        let sol = solve(&qp, &[0.0, 0.5]).unwrap();
        // min x² + y² on x + 2y = 1 → (0.2, 0.4)
        assert_relative_eq!(sol.x[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(sol.x[1], 0.4, epsilon = 1e-12);
    }

    #[test]
    fn infeasible_start_is_rejected() {
        let qp = budget_problem(DMatrix::identity(2, 2), 0.0, 1.0);
        let err = solve(&qp, &[0.9, 0.9]).unwrap_err();
        assert!(matches!(err, PortoptError::SolverFailure { .. }));
    }

    #[test]
    fn deterministic_for_identical_input() {
        let h = DMatrix::from_row_slice(3, 3, &[
            0.05, 0.01, 0.02,
            0.01, 0.07, 0.015,
            0.02, 0.015, 0.03,
        ]);
        let qp = budget_problem(h, 0.0, 1.0);
        let start = [1.0 / 3.0; 3];
        assert_eq!(solve(&qp, &start).unwrap(), solve(&qp, &start).unwrap());
    }
}
