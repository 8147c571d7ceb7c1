//! Returns estimation: annualized expected returns and shrunk covariance.
//!
//! Expected returns are the mean daily return scaled by the number of
//! trading days per year. The annualized sample covariance is blended
//! toward a structured target as `(1 - δ) * sample + δ * target`.
//! Expected returns may be pulled the same way toward `mean / factor`.

use crate::domain::error::PortoptError;
use crate::domain::price::PriceMatrix;
use nalgebra::{DMatrix, DVector};
use std::str::FromStr;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Divisor applied to the sample mean to form the conservative return target.
pub const RETURN_SHRINKAGE_FACTOR: f64 = 2.2;

/// Daily variance at or below this is treated as a constant series.
const ZERO_VARIANCE: f64 = 1e-18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShrinkageTarget {
    /// Sample variances with every pair at the average sample correlation.
    #[default]
    ConstantCorrelation,
    /// Sample variances, zero covariances.
    Diagonal,
}

impl FromStr for ShrinkageTarget {
    type Err = PortoptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "constant_correlation" => Ok(ShrinkageTarget::ConstantCorrelation),
            "diagonal" => Ok(ShrinkageTarget::Diagonal),
            other => Err(PortoptError::invalid(
                "shrinkage_target",
                format!("unknown target '{other}' (expected constant_correlation or diagonal)"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnKind {
    #[default]
    Simple,
    Log,
}

impl FromStr for ReturnKind {
    type Err = PortoptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(ReturnKind::Simple),
            "log" => Ok(ReturnKind::Log),
            other => Err(PortoptError::invalid(
                "returns",
                format!("unknown return kind '{other}' (expected simple or log)"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    pub shrinkage_intensity: f64,
    pub shrinkage_target: ShrinkageTarget,
    pub return_kind: ReturnKind,
    pub trading_days: f64,
    /// Weight on `mean / return_shrinkage_factor` versus the sample mean.
    pub return_shrinkage: f64,
    pub return_shrinkage_factor: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            shrinkage_intensity: 0.0,
            shrinkage_target: ShrinkageTarget::default(),
            return_kind: ReturnKind::default(),
            trading_days: TRADING_DAYS_PER_YEAR,
            return_shrinkage: 0.0,
            return_shrinkage_factor: RETURN_SHRINKAGE_FACTOR,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), PortoptError> {
        if !(0.0..=1.0).contains(&self.shrinkage_intensity) {
            return Err(PortoptError::invalid(
                "shrinkage_intensity",
                format!("{} is outside [0, 1]", self.shrinkage_intensity),
            ));
        }
        if !(0.0..=1.0).contains(&self.return_shrinkage) {
            return Err(PortoptError::invalid(
                "return_shrinkage",
                format!("{} is outside [0, 1]", self.return_shrinkage),
            ));
        }
        if !(self.return_shrinkage_factor >= 1.0) || !self.return_shrinkage_factor.is_finite() {
            return Err(PortoptError::invalid(
                "return_shrinkage_factor",
                format!("{} must be a finite number of at least 1", self.return_shrinkage_factor),
            ));
        }
        if !(self.trading_days > 0.0) {
            return Err(PortoptError::invalid(
                "trading_days",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Annualized expected returns and covariance for a universe.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnsEstimate {
    tickers: Vec<String>,
    expected_returns: DVector<f64>,
    covariance: DMatrix<f64>,
    observations: usize,
    trading_days: f64,
}

impl ReturnsEstimate {
    /// Builds an estimate from annualized moments supplied directly.
    pub fn new(
        tickers: Vec<String>,
        expected_returns: DVector<f64>,
        covariance: DMatrix<f64>,
    ) -> Result<Self, PortoptError> {
        let n = tickers.len();
        if n == 0 {
            return Err(PortoptError::invalid("tickers", "universe is empty"));
        }
        if expected_returns.len() != n || covariance.nrows() != n || covariance.ncols() != n {
            return Err(PortoptError::invalid(
                "covariance",
                format!("dimensions do not match {n} tickers"),
            ));
        }
        for i in 0..n {
            for j in 0..i {
                let (a, b) = (covariance[(i, j)], covariance[(j, i)]);
                if (a - b).abs() > 1e-10 * (1.0 + a.abs().max(b.abs())) {
                    return Err(PortoptError::invalid(
                        "covariance",
                        format!("not symmetric at ({}, {})", tickers[i], tickers[j]),
                    ));
                }
            }
            if covariance[(i, i)] <= 0.0 {
                return Err(PortoptError::insufficient(
                    &tickers[i],
                    "non-positive variance",
                ));
            }
        }
        Ok(Self {
            tickers,
            expected_returns,
            covariance,
            observations: 0,
            trading_days: TRADING_DAYS_PER_YEAR,
        })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn asset_count(&self) -> usize {
        self.tickers.len()
    }

    pub fn expected_returns(&self) -> &DVector<f64> {
        &self.expected_returns
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Number of return observations behind the estimate (0 when supplied directly).
    pub fn observations(&self) -> usize {
        self.observations
    }

    pub fn trading_days(&self) -> f64 {
        self.trading_days
    }

    pub fn portfolio_return(&self, weights: &[f64]) -> f64 {
        weights
            .iter()
            .zip(self.expected_returns.iter())
            .map(|(w, r)| w * r)
            .sum()
    }

    pub fn portfolio_volatility(&self, weights: &[f64]) -> f64 {
        let w = DVector::from_column_slice(weights);
        let variance = (w.transpose() * &self.covariance * &w)[(0, 0)];
        variance.max(0.0).sqrt()
    }

    /// `self + scale * (other - self)`, applied to both moments.
    pub fn blend_toward(&self, other: &ReturnsEstimate, scale: f64) -> ReturnsEstimate {
        ReturnsEstimate {
            tickers: self.tickers.clone(),
            expected_returns: &self.expected_returns
                + (&other.expected_returns - &self.expected_returns) * scale,
            covariance: &self.covariance + (&other.covariance - &self.covariance) * scale,
            observations: other.observations,
            trading_days: self.trading_days,
        }
    }
}

/// Daily returns, one row per date after the first.
pub fn daily_returns(prices: &PriceMatrix, kind: ReturnKind) -> Vec<Vec<f64>> {
    prices
        .rows()
        .windows(2)
        .map(|w| {
            w[0].iter()
                .zip(&w[1])
                .map(|(prev, curr)| match kind {
                    ReturnKind::Simple => curr / prev - 1.0,
                    ReturnKind::Log => (curr / prev).ln(),
                })
                .collect()
        })
        .collect()
}

pub fn estimate(prices: &PriceMatrix, config: &EstimatorConfig) -> Result<ReturnsEstimate, PortoptError> {
    config.validate()?;
    if prices.observation_count() < 3 {
        return Err(PortoptError::insufficient(
            prices.tickers().join(","),
            format!(
                "{} aligned prices, need at least 3",
                prices.observation_count()
            ),
        ));
    }
    let returns = daily_returns(prices, config.return_kind);
    estimate_from_returns(prices.tickers().to_vec(), &returns, config)
}

/// Estimates annualized moments from a daily returns matrix (rows = dates).
pub fn estimate_from_returns(
    tickers: Vec<String>,
    returns: &[Vec<f64>],
    config: &EstimatorConfig,
) -> Result<ReturnsEstimate, PortoptError> {
    config.validate()?;
    let n = tickers.len();
    let t = returns.len();
    if n == 0 {
        return Err(PortoptError::invalid("tickers", "universe is empty"));
    }
    if t < 2 {
        return Err(PortoptError::insufficient(
            tickers.join(","),
            format!("{t} return observations, need at least 2"),
        ));
    }

    let data = DMatrix::from_fn(t, n, |r, c| returns[r][c]);
    let mean: DVector<f64> = DVector::from_fn(n, |c, _| data.column(c).mean());

    let mut centered = data;
    for c in 0..n {
        let m = mean[c];
        centered.column_mut(c).add_scalar_mut(-m);
    }
    let daily_cov = (centered.transpose() * &centered) / (t as f64 - 1.0);

    for (i, ticker) in tickers.iter().enumerate() {
        if daily_cov[(i, i)] <= ZERO_VARIANCE {
            return Err(PortoptError::insufficient(
                ticker,
                "zero-variance return series",
            ));
        }
    }

    let sample = daily_cov * config.trading_days;
    let target = shrinkage_target(&sample, config.shrinkage_target);
    let covariance = shrink(&sample, &target, config.shrinkage_intensity);

    let sample_mean = mean * config.trading_days;
    let mean_target = &sample_mean / config.return_shrinkage_factor;
    let expected_returns = shrink_returns(&sample_mean, &mean_target, config.return_shrinkage);

    Ok(ReturnsEstimate {
        tickers,
        expected_returns,
        covariance,
        observations: t,
        trading_days: config.trading_days,
    })
}

/// Structured covariance target built from a sample covariance.
pub fn shrinkage_target(sample: &DMatrix<f64>, target: ShrinkageTarget) -> DMatrix<f64> {
    let n = sample.nrows();
    let sd: Vec<f64> = (0..n).map(|i| sample[(i, i)].max(0.0).sqrt()).collect();
    match target {
        ShrinkageTarget::Diagonal => DMatrix::from_diagonal(&sample.diagonal()),
        ShrinkageTarget::ConstantCorrelation => {
            let mut sum = 0.0;
            let mut pairs = 0usize;
            for i in 0..n {
                for j in (i + 1)..n {
                    let denom = sd[i] * sd[j];
                    if denom > 0.0 {
                        sum += sample[(i, j)] / denom;
                    }
                    pairs += 1;
                }
            }
            let avg_corr = if pairs > 0 { sum / pairs as f64 } else { 0.0 };
            DMatrix::from_fn(n, n, |i, j| {
                if i == j {
                    sample[(i, i)]
                } else {
                    avg_corr * sd[i] * sd[j]
                }
            })
        }
    }
}

pub fn shrink_returns(sample: &DVector<f64>, target: &DVector<f64>, intensity: f64) -> DVector<f64> {
    sample * (1.0 - intensity) + target * intensity
}

pub fn shrink(sample: &DMatrix<f64>, target: &DMatrix<f64>, intensity: f64) -> DMatrix<f64> {
    sample * (1.0 - intensity) + target * intensity
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn matrix(columns: &[&[f64]]) -> PriceMatrix {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let t = columns[0].len();
        let tickers = (0..columns.len()).map(|i| format!("A{i}")).collect();
        let dates = (0..t).map(|k| start + chrono::Duration::days(k as i64)).collect();
        let rows = (0..t).map(|k| columns.iter().map(|c| c[k]).collect()).collect();
        PriceMatrix::from_rows(tickers, dates, rows).unwrap()
    }

    fn sample_prices() -> PriceMatrix {
        matrix(&[
            &[100.0, 101.0, 100.5, 102.0, 103.5, 103.0],
            &[50.0, 49.0, 50.5, 51.0, 50.0, 52.0],
            &[20.0, 20.4, 20.2, 20.9, 21.0, 21.6],
        ])
    }

    #[test]
    fn simple_returns_match_hand_computation() {
        let m = matrix(&[&[100.0, 110.0, 99.0]]);
        let r = daily_returns(&m, ReturnKind::Simple);
        assert_relative_eq!(r[0][0], 0.10, epsilon = 1e-12);
        assert_relative_eq!(r[1][0], -0.10, epsilon = 1e-12);

        let r = daily_returns(&m, ReturnKind::Log);
        assert_relative_eq!(r[0][0], 1.1f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn expected_returns_are_annualized_means() {
        let m = matrix(&[&[100.0, 101.0, 103.0]]);
        let est = estimate(&m, &EstimatorConfig::default()).unwrap();
        let mean = (0.01 + (103.0 / 101.0 - 1.0)) / 2.0;
        assert_relative_eq!(est.expected_returns()[0], mean * 252.0, epsilon = 1e-9);
        assert_eq!(est.observations(), 2);
    }

    #[test]
    fn covariance_is_symmetric_and_annualized() {
        let est = estimate(&sample_prices(), &EstimatorConfig::default()).unwrap();
        let cov = est.covariance();
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(cov[(i, j)], cov[(j, i)], epsilon = 1e-15);
            }
        }

        let returns = daily_returns(&sample_prices(), ReturnKind::Simple);
        let col: Vec<f64> = returns.iter().map(|r| r[0]).collect();
        let mean = col.iter().sum::<f64>() / col.len() as f64;
        let var = col.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (col.len() as f64 - 1.0);
        assert_relative_eq!(cov[(0, 0)], var * 252.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_intensity_reproduces_sample() {
        let prices = sample_prices();
        let raw = estimate(&prices, &EstimatorConfig::default()).unwrap();
        let returns = daily_returns(&prices, ReturnKind::Simple);
        let est = estimate_from_returns(
            prices.tickers().to_vec(),
            &returns,
            &EstimatorConfig {
                shrinkage_intensity: 0.0,
                ..EstimatorConfig::default()
            },
        )
        .unwrap();
        assert_eq!(est.covariance(), raw.covariance());
    }

    #[test]
    fn full_intensity_reproduces_target() {
        let prices = sample_prices();
        let raw = estimate(&prices, &EstimatorConfig::default()).unwrap();
        for target in [ShrinkageTarget::Diagonal, ShrinkageTarget::ConstantCorrelation] {
            let shrunk = estimate(
                &prices,
                &EstimatorConfig {
                    shrinkage_intensity: 1.0,
                    shrinkage_target: target,
                    ..EstimatorConfig::default()
                },
            )
            .unwrap();
            let expected = shrinkage_target(raw.covariance(), target);
            assert_eq!(shrunk.covariance(), &expected);
        }
    }

    #[test]
    fn return_shrinkage_limits() {
        let prices = sample_prices();
        let raw = estimate(&prices, &EstimatorConfig::default()).unwrap();
        let with = |delta: f64| {
            estimate(
                &prices,
                &EstimatorConfig {
                    return_shrinkage: delta,
                    ..EstimatorConfig::default()
                },
            )
            .unwrap()
        };

        let untouched = with(0.0);
        assert_eq!(untouched.expected_returns(), raw.expected_returns());

        let full = with(1.0);
        for (shrunk, sample) in full.expected_returns().iter().zip(raw.expected_returns().iter()) {
            assert_relative_eq!(*shrunk, sample / RETURN_SHRINKAGE_FACTOR, epsilon = 1e-15);
        }
        assert_eq!(full.covariance(), raw.covariance());

        let half = with(0.5);
        let expected = raw.expected_returns()[0] * (0.5 + 0.5 / RETURN_SHRINKAGE_FACTOR);
        assert_relative_eq!(half.expected_returns()[0], expected, epsilon = 1e-15);
    }

    #[test]
    fn bad_return_shrinkage_is_rejected() {
        for (config, key) in [
            (
                EstimatorConfig { return_shrinkage: -0.1, ..EstimatorConfig::default() },
                "return_shrinkage",
            ),
            (
                EstimatorConfig { return_shrinkage_factor: 0.5, ..EstimatorConfig::default() },
                "return_shrinkage_factor",
            ),
        ] {
            let err = estimate(&sample_prices(), &config).unwrap_err();
            assert!(matches!(err, PortoptError::InvalidParameter { ref name, .. } if name == key), "{err}");
        }
    }

    #[test]
    fn constant_correlation_target_keeps_variances() {
        let sample = DMatrix::from_row_slice(3, 3, &[
            0.04, 0.006, 0.002,
            0.006, 0.09, 0.009,
            0.002, 0.009, 0.01,
        ]);
        let target = shrinkage_target(&sample, ShrinkageTarget::ConstantCorrelation);
        let avg = (0.006 / (0.2 * 0.3) + 0.002 / (0.2 * 0.1) + 0.009 / (0.3 * 0.1)) / 3.0;
        assert_relative_eq!(target[(0, 0)], 0.04);
        assert_relative_eq!(target[(0, 1)], avg * 0.2 * 0.3, epsilon = 1e-15);
        assert_relative_eq!(target[(2, 1)], avg * 0.1 * 0.3, epsilon = 1e-15);
    }

    #[test]
    fn too_few_prices_is_insufficient() {
        let m = matrix(&[&[100.0, 101.0]]);
        let err = estimate(&m, &EstimatorConfig::default()).unwrap_err();
        assert!(matches!(err, PortoptError::InsufficientData { .. }));
    }

    #[test]
    fn constant_series_is_insufficient() {
        let m = matrix(&[&[100.0, 101.0, 99.0, 100.0], &[10.0, 10.0, 10.0, 10.0]]);
        let err = estimate(&m, &EstimatorConfig::default()).unwrap_err();
        assert!(matches!(err, PortoptError::InsufficientData { ticker, .. } if ticker == "A1"));
    }

    #[test]
    fn intensity_out_of_range_is_rejected() {
        let config = EstimatorConfig {
            shrinkage_intensity: 1.5,
            ..EstimatorConfig::default()
        };
        let err = estimate(&sample_prices(), &config).unwrap_err();
        assert!(matches!(err, PortoptError::InvalidParameter { name, .. } if name == "shrinkage_intensity"));
    }

    #[test]
    fn blend_toward_interpolates_moments() {
        let a = ReturnsEstimate::new(
            vec!["X".into()],
            DVector::from_vec(vec![0.1]),
            DMatrix::from_element(1, 1, 0.04),
        )
        .unwrap();
        let b = ReturnsEstimate::new(
            vec!["X".into()],
            DVector::from_vec(vec![0.3]),
            DMatrix::from_element(1, 1, 0.08),
        )
        .unwrap();
        let mid = a.blend_toward(&b, 0.5);
        assert_relative_eq!(mid.expected_returns()[0], 0.2, epsilon = 1e-15);
        assert_relative_eq!(mid.covariance()[(0, 0)], 0.06, epsilon = 1e-15);
        assert_eq!(a.blend_toward(&b, 0.0).covariance(), a.covariance());
    }

    #[test]
    fn portfolio_moments() {
        let est = ReturnsEstimate::new(
            vec!["X".into(), "Y".into()],
            DVector::from_vec(vec![0.10, 0.20]),
            DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.09]),
        )
        .unwrap();
        let w = [0.5, 0.5];
        assert_relative_eq!(est.portfolio_return(&w), 0.15, epsilon = 1e-15);
        assert_relative_eq!(
            est.portfolio_volatility(&w),
            (0.25 * 0.04 + 0.25 * 0.09f64).sqrt(),
            epsilon = 1e-15
        );
    }
}
