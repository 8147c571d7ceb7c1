//! Resampled efficient frontier.
//!
//! Each simulation draws a synthetic daily return history of the same
//! length as the observed one, re-estimates the moments, blends them with
//! the base estimate and solves a full frontier. Frontiers are then
//! averaged point by point (k-th point with k-th point) and the averaged
//! weights are evaluated against the base estimate.

use crate::domain::error::PortoptError;
use crate::domain::estimate::{self, EstimatorConfig, ReturnsEstimate};
use crate::domain::price::PriceMatrix;
use crate::domain::result::{Frontier, OptimizationResult, SimulationSummary};
use crate::domain::solver::{self, Constraints};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;

pub const ALGORITHM_NAME: &str = "monte_carlo_resampling";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplingMethod {
    /// Multivariate normal draws from the base daily moments.
    #[default]
    Parametric,
    /// Historical return rows sampled with replacement.
    Bootstrap,
}

impl FromStr for ResamplingMethod {
    type Err = PortoptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "parametric" => Ok(ResamplingMethod::Parametric),
            "bootstrap" => Ok(ResamplingMethod::Bootstrap),
            other => Err(PortoptError::invalid(
                "method",
                format!("'{other}' is not a resampling method (parametric, bootstrap)"),
            )),
        }
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResamplingMethod::Parametric => write!(f, "parametric"),
            ResamplingMethod::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResamplingConfig {
    pub num_simulations: usize,
    pub num_portfolios: usize,
    pub estimator: EstimatorConfig,
    pub constraints: Constraints,
    pub risk_free_rate: f64,
    pub method: ResamplingMethod,
    pub noise_scale: f64,
    pub seed: u64,
    pub min_success_fraction: f64,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            num_simulations: 500,
            num_portfolios: 10,
            estimator: EstimatorConfig::default(),
            constraints: Constraints::default(),
            risk_free_rate: 0.02,
            method: ResamplingMethod::default(),
            noise_scale: 1.0,
            seed: 42,
            min_success_fraction: 0.5,
        }
    }
}

impl ResamplingConfig {
    pub fn validate(&self) -> Result<(), PortoptError> {
        if self.num_simulations < 1 {
            return Err(PortoptError::invalid(
                "num_simulations",
                "at least one simulation is required",
            ));
        }
        if self.num_portfolios < 2 {
            return Err(PortoptError::invalid(
                "num_portfolios",
                format!("{} is below the minimum of 2", self.num_portfolios),
            ));
        }
        // Blends beyond 1 extrapolate past the sample and can lose positive definiteness.
        if !(0.0..=1.0).contains(&self.noise_scale) {
            return Err(PortoptError::invalid(
                "noise_scale",
                format!("{} is outside [0, 1]", self.noise_scale),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_success_fraction) {
            return Err(PortoptError::invalid(
                "min_success_fraction",
                format!("{} is outside [0, 1]", self.min_success_fraction),
            ));
        }
        self.estimator.validate()
    }

    /// Successful simulations needed for a usable result.
    pub fn required_successes(&self) -> usize {
        ((self.min_success_fraction * self.num_simulations as f64).ceil() as usize).max(1)
    }
}

/// Resampled frontier for an aligned price history.
pub fn resample(prices: &PriceMatrix, config: &ResamplingConfig) -> Result<Frontier, PortoptError> {
    config.validate()?;
    let base = estimate::estimate(prices, &config.estimator)?;
    let returns = estimate::daily_returns(prices, config.estimator.return_kind);
    resample_from_returns(&base, &returns, config)
}

/// Resampling core over a base estimate and the daily returns behind it.
pub fn resample_from_returns(
    base: &ReturnsEstimate,
    returns: &[Vec<f64>],
    config: &ResamplingConfig,
) -> Result<Frontier, PortoptError> {
    config.validate()?;
    config.constraints.validate(base.asset_count())?;
    if returns.len() < 2 {
        return Err(PortoptError::insufficient(
            base.tickers().join(","),
            format!("{} return observations, need at least 2", returns.len()),
        ));
    }

    let sampler = Sampler::new(base, returns, config.method)?;
    tracing::info!(
        simulations = config.num_simulations,
        method = %config.method,
        "starting resampling"
    );

    let outcomes: Vec<Option<Vec<Vec<f64>>>> = (0..config.num_simulations)
        .into_par_iter()
        .map(|i| match simulate(i, base, &sampler, config) {
            Ok(weights) => Some(weights),
            Err(err) => {
                tracing::debug!(simulation = i, %err, "simulation discarded");
                None
            }
        })
        .collect();
    let frontiers: Vec<Vec<Vec<f64>>> = outcomes.into_iter().flatten().collect();

    let required = config.required_successes();
    if frontiers.len() < required {
        return Err(PortoptError::MinimumSimulations {
            requested: config.num_simulations,
            succeeded: frontiers.len(),
            required,
        });
    }
    tracing::info!(
        succeeded = frontiers.len(),
        requested = config.num_simulations,
        "resampling complete"
    );

    let points = average_by_rank(&frontiers, config.num_portfolios, base.asset_count())
        .into_iter()
        .map(|w| {
            OptimizationResult::from_weights(
                base,
                config.constraints.clean(&w),
                config.risk_free_rate,
            )
        })
        .collect();

    let mut frontier = Frontier::new(ALGORITHM_NAME, points);
    frontier.simulations = Some(SimulationSummary {
        requested: config.num_simulations,
        succeeded: frontiers.len(),
    });
    Ok(frontier)
}

fn simulate(
    index: usize,
    base: &ReturnsEstimate,
    sampler: &Sampler<'_>,
    config: &ResamplingConfig,
) -> Result<Vec<Vec<f64>>, PortoptError> {
    let mut rng = StdRng::seed_from_u64(simulation_seed(config.seed, index));
    let draws = sampler.draw(&mut rng);
    let simulated = estimate::estimate_from_returns(base.tickers().to_vec(), &draws, &config.estimator)?;
    let blended = base.blend_toward(&simulated, config.noise_scale);
    solver::frontier_weights(&blended, config.num_portfolios, &config.constraints)
}

/// Independent stream per simulation, stable across thread schedules.
fn simulation_seed(seed: u64, index: usize) -> u64 {
    let mut z = seed ^ (index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Mean of the k-th weight vector across frontiers, renormalized to sum 1.
fn average_by_rank(frontiers: &[Vec<Vec<f64>>], points: usize, assets: usize) -> Vec<Vec<f64>> {
    (0..points)
        .map(|k| {
            let mut avg = vec![0.0; assets];
            for frontier in frontiers {
                for (a, w) in avg.iter_mut().zip(&frontier[k]) {
                    *a += w;
                }
            }
            let total: f64 = avg.iter().sum();
            avg.into_iter().map(|a| a / total).collect()
        })
        .collect()
}

enum Sampler<'a> {
    Parametric {
        mean: DVector<f64>,
        factor: DMatrix<f64>,
        length: usize,
    },
    Bootstrap {
        rows: &'a [Vec<f64>],
    },
}

impl<'a> Sampler<'a> {
    fn new(
        base: &ReturnsEstimate,
        returns: &'a [Vec<f64>],
        method: ResamplingMethod,
    ) -> Result<Self, PortoptError> {
        match method {
            ResamplingMethod::Bootstrap => Ok(Sampler::Bootstrap { rows: returns }),
            ResamplingMethod::Parametric => {
                let days = base.trading_days();
                let mean = base.expected_returns() / days;
                let cov = base.covariance() / days;
                let factor = cov
                    .clone()
                    .cholesky()
                    .or_else(|| {
                        let ridge = 1e-12 * cov.diagonal().mean();
                        (cov + DMatrix::identity(mean.len(), mean.len()) * ridge).cholesky()
                    })
                    .ok_or_else(|| {
                        PortoptError::insufficient(
                            base.tickers().join(","),
                            "covariance is not positive definite",
                        )
                    })?
                    .l();
                Ok(Sampler::Parametric {
                    mean,
                    factor,
                    length: returns.len(),
                })
            }
        }
    }

    fn draw(&self, rng: &mut StdRng) -> Vec<Vec<f64>> {
        match self {
            Sampler::Bootstrap { rows } => (0..rows.len())
                .map(|_| rows[rng.gen_range(0..rows.len())].clone())
                .collect(),
            Sampler::Parametric {
                mean,
                factor,
                length,
            } => (0..*length)
                .map(|_| {
                    let z = DVector::from_fn(mean.len(), |_, _| rng.sample::<f64, _>(StandardNormal));
                    (mean + factor * z).iter().copied().collect()
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    fn synthetic_prices(days: usize, seed: u64) -> PriceMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let drift = [0.0004, 0.0006, 0.0002];
        let vol = [0.010, 0.015, 0.006];
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let mut level = [100.0, 50.0, 20.0];
        let mut dates = Vec::new();
        let mut rows = Vec::new();
        for t in 0..days {
            if t > 0 {
                let common: f64 = rng.sample(StandardNormal);
                for i in 0..3 {
                    let own: f64 = rng.sample(StandardNormal);
                    level[i] *= 1.0 + drift[i] + vol[i] * (0.4 * common + 0.9 * own);
                }
            }
            dates.push(start + Duration::days(t as i64));
            rows.push(level.to_vec());
        }
        PriceMatrix::from_rows(vec!["AAA".into(), "BBB".into(), "CCC".into()], dates, rows).unwrap()
    }

    fn config(sims: usize) -> ResamplingConfig {
        ResamplingConfig {
            num_simulations: sims,
            num_portfolios: 6,
            ..ResamplingConfig::default()
        }
    }

    #[test]
    fn zero_noise_single_simulation_matches_plain_frontier() {
        let prices = synthetic_prices(300, 7);
        let cfg = ResamplingConfig {
            noise_scale: 0.0,
            ..config(1)
        };
        let resampled = resample(&prices, &cfg).unwrap();
        let base = estimate::estimate(&prices, &cfg.estimator).unwrap();
        let plain = solver::efficient_frontier(&base, 6, &cfg.constraints, cfg.risk_free_rate).unwrap();

        assert_eq!(resampled.len(), plain.len());
        for (r, p) in resampled.iter().zip(plain.iter()) {
            for (a, b) in r.weights.iter().zip(&p.weights) {
                assert_relative_eq!(*a, *b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn same_seed_same_frontier() {
        let prices = synthetic_prices(200, 11);
        let a = resample(&prices, &config(20)).unwrap();
        let b = resample(&prices, &config(20)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bootstrap_produces_valid_weights() {
        let prices = synthetic_prices(200, 3);
        let cfg = ResamplingConfig {
            method: ResamplingMethod::Bootstrap,
            ..config(15)
        };
        let frontier = resample(&prices, &cfg).unwrap();
        assert_eq!(frontier.algorithm, ALGORITHM_NAME);
        assert_eq!(frontier.simulations.map(|s| s.requested), Some(15));
        for p in frontier.iter() {
            assert_relative_eq!(p.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
            assert!(p.weights.iter().all(|w| (0.0..=1.0).contains(w)));
        }
    }

    #[test]
    fn rejects_bad_parameters() {
        let prices = synthetic_prices(50, 1);
        for cfg in [
            config(0),
            ResamplingConfig {
                num_portfolios: 1,
                ..config(5)
            },
            ResamplingConfig {
                noise_scale: -1.0,
                ..config(5)
            },
            ResamplingConfig {
                noise_scale: 1.5,
                ..config(5)
            },
            ResamplingConfig {
                noise_scale: f64::NAN,
                ..config(5)
            },
        ] {
            let err = resample(&prices, &cfg).unwrap_err();
            assert!(matches!(err, PortoptError::InvalidParameter { .. }), "{err}");
        }
    }

    #[test]
    fn too_many_failed_simulations() {
        // Two returns per asset: a bootstrap draw repeating one row has zero variance.
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let prices = PriceMatrix::from_rows(
            vec!["AAA".into(), "BBB".into()],
            vec![start, start + Duration::days(1), start + Duration::days(2)],
            vec![vec![100.0, 10.0], vec![101.0, 10.5], vec![103.0, 10.2]],
        )
        .unwrap();
        let cfg = ResamplingConfig {
            method: ResamplingMethod::Bootstrap,
            min_success_fraction: 1.0,
            ..config(64)
        };
        let err = resample(&prices, &cfg).unwrap_err();
        assert!(matches!(err, PortoptError::MinimumSimulations { requested: 64, .. }));
    }

    #[test]
    fn method_parsing() {
        assert_eq!("Bootstrap".parse::<ResamplingMethod>().unwrap(), ResamplingMethod::Bootstrap);
        assert!("jackknife".parse::<ResamplingMethod>().is_err());
    }

    #[test]
    fn seeds_differ_per_simulation() {
        assert_ne!(simulation_seed(42, 0), simulation_seed(42, 1));
        assert_eq!(simulation_seed(42, 3), simulation_seed(42, 3));
    }
}
