//! Pluggable optimization algorithms selected by name.

use crate::domain::error::PortoptError;
use crate::domain::estimate::{self, EstimatorConfig};
use crate::domain::period::Period;
use crate::domain::price::PriceMatrix;
use crate::domain::resampling::{self, ResamplingConfig, ResamplingMethod};
use crate::domain::result::{Frontier, OptimizationResult};
use crate::domain::solver::{self, Constraints, Objective};

/// Settings shared by every optimizer. Optimizers ignore what they do not use.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSettings {
    pub estimator: EstimatorConfig,
    pub constraints: Constraints,
    pub risk_free_rate: f64,
    pub num_portfolios: usize,
    pub objective: Option<Objective>,
    pub num_simulations: usize,
    pub method: ResamplingMethod,
    pub noise_scale: f64,
    pub seed: u64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        let r = ResamplingConfig::default();
        Self {
            estimator: r.estimator,
            constraints: r.constraints,
            risk_free_rate: r.risk_free_rate,
            num_portfolios: r.num_portfolios,
            objective: None,
            num_simulations: r.num_simulations,
            method: r.method,
            noise_scale: r.noise_scale,
            seed: r.seed,
        }
    }
}

impl OptimizerSettings {
    pub fn resampling_config(&self) -> ResamplingConfig {
        ResamplingConfig {
            num_simulations: self.num_simulations,
            num_portfolios: self.num_portfolios,
            estimator: self.estimator.clone(),
            constraints: self.constraints,
            risk_free_rate: self.risk_free_rate,
            method: self.method,
            noise_scale: self.noise_scale,
            seed: self.seed,
            ..ResamplingConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OptimizeRequest<'a> {
    pub prices: &'a PriceMatrix,
    pub period: Period,
    pub settings: &'a OptimizerSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptimizationOutput {
    Portfolio(OptimizationResult),
    Frontier(Frontier),
}

pub trait Optimizer: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn optimize(&self, request: &OptimizeRequest<'_>) -> Result<OptimizationOutput, PortoptError>;
}

/// Classic Markowitz optimization on the historical estimate.
pub struct MeanVarianceOptimizer;

impl Optimizer for MeanVarianceOptimizer {
    fn name(&self) -> &'static str {
        "mean_variance"
    }

    fn description(&self) -> &'static str {
        "Markowitz mean-variance optimization on historical moments"
    }

    fn optimize(&self, request: &OptimizeRequest<'_>) -> Result<OptimizationOutput, PortoptError> {
        let s = request.settings;
        let est = estimate::estimate(request.prices, &s.estimator)?;
        tracing::debug!(
            assets = est.asset_count(),
            observations = est.observations(),
            period = %request.period,
            "mean-variance estimate ready"
        );
        match s.objective {
            Some(objective) => solver::solve(&est, objective, &s.constraints, s.risk_free_rate)
                .map(OptimizationOutput::Portfolio),
            None => solver::efficient_frontier(&est, s.num_portfolios, &s.constraints, s.risk_free_rate)
                .map(OptimizationOutput::Frontier),
        }
    }
}

/// Michaud resampled efficient frontier.
pub struct ResamplingOptimizer;

impl Optimizer for ResamplingOptimizer {
    fn name(&self) -> &'static str {
        resampling::ALGORITHM_NAME
    }

    fn description(&self) -> &'static str {
        "Resampled efficient frontier averaged over simulated return histories"
    }

    fn optimize(&self, request: &OptimizeRequest<'_>) -> Result<OptimizationOutput, PortoptError> {
        tracing::debug!(period = %request.period, "resampling request");
        resampling::resample(request.prices, &request.settings.resampling_config())
            .map(OptimizationOutput::Frontier)
    }
}

pub fn available_optimizers() -> Vec<Box<dyn Optimizer>> {
    vec![Box::new(MeanVarianceOptimizer), Box::new(ResamplingOptimizer)]
}

pub fn optimizer_by_name(name: &str) -> Result<Box<dyn Optimizer>, PortoptError> {
    available_optimizers()
        .into_iter()
        .find(|o| o.name() == name)
        .ok_or_else(|| {
            let known: Vec<&str> = available_optimizers().iter().map(|o| o.name()).collect();
            PortoptError::invalid(
                "optimizer",
                format!("unknown optimizer '{name}' (available: {})", known.join(", ")),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn prices() -> PriceMatrix {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let a = [100.0, 101.0, 100.5, 102.0, 103.5, 102.8, 104.0, 105.1];
        let b = [50.0, 49.0, 50.5, 51.5, 50.9, 52.3, 53.0, 52.2];
        PriceMatrix::from_rows(
            vec!["AAA".into(), "BBB".into()],
            (0..a.len()).map(|i| start + Duration::days(i as i64)).collect(),
            a.iter().zip(&b).map(|(x, y)| vec![*x, *y]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn registry_lookup() {
        assert_eq!(optimizer_by_name("mean_variance").unwrap().name(), "mean_variance");
        assert_eq!(
            optimizer_by_name("monte_carlo_resampling").unwrap().name(),
            "monte_carlo_resampling"
        );
        let err = optimizer_by_name("black_litterman").err().unwrap();
        assert!(matches!(err, PortoptError::InvalidParameter { .. }));
        assert!(err.to_string().contains("mean_variance"));
    }

    #[test]
    fn mean_variance_returns_portfolio_for_objective() {
        let prices = prices();
        let settings = OptimizerSettings {
            objective: Some(Objective::MinVolatility),
            ..OptimizerSettings::default()
        };
        let request = OptimizeRequest {
            prices: &prices,
            period: Period::default(),
            settings: &settings,
        };
        match MeanVarianceOptimizer.optimize(&request).unwrap() {
            OptimizationOutput::Portfolio(p) => assert_eq!(p.tickers, vec!["AAA", "BBB"]),
            other => panic!("expected portfolio, got {other:?}"),
        }
    }

    #[test]
    fn mean_variance_returns_frontier_without_objective() {
        let prices = prices();
        let settings = OptimizerSettings {
            num_portfolios: 4,
            ..OptimizerSettings::default()
        };
        let request = OptimizeRequest {
            prices: &prices,
            period: Period::default(),
            settings: &settings,
        };
        match MeanVarianceOptimizer.optimize(&request).unwrap() {
            OptimizationOutput::Frontier(f) => assert_eq!(f.len(), 4),
            other => panic!("expected frontier, got {other:?}"),
        }
    }

    #[test]
    fn resampling_always_returns_frontier() {
        let prices = prices();
        let settings = OptimizerSettings {
            objective: Some(Objective::MaxSharpe),
            num_simulations: 8,
            num_portfolios: 3,
            method: ResamplingMethod::Bootstrap,
            ..OptimizerSettings::default()
        };
        let request = OptimizeRequest {
            prices: &prices,
            period: Period::default(),
            settings: &settings,
        };
        match ResamplingOptimizer.optimize(&request).unwrap() {
            OptimizationOutput::Frontier(f) => {
                assert_eq!(f.algorithm, "monte_carlo_resampling");
                assert_eq!(f.len(), 3);
            }
            other => panic!("expected frontier, got {other:?}"),
        }
    }
}
