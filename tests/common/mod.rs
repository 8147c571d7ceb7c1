#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use nalgebra::{DMatrix, DVector};
use portopt::domain::error::PortoptError;
use portopt::domain::estimate::ReturnsEstimate;
use portopt::domain::price::{PriceMatrix, PricePoint, PriceSeries};
use portopt::ports::data_port::DataPort;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

pub struct MockDataPort {
    pub data: HashMap<String, PriceSeries>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_series(mut self, series: PriceSeries) -> Self {
        self.data.insert(series.ticker.clone(), series);
        self
    }

    pub fn with_error(mut self, ticker: &str, reason: &str) -> Self {
        self.errors.insert(ticker.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_prices(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PriceSeries, PortoptError> {
        if let Some(reason) = self.errors.get(ticker) {
            return Err(PortoptError::Data {
                reason: reason.clone(),
            });
        }
        let points = self
            .data
            .get(ticker)
            .map(|s| {
                s.points
                    .iter()
                    .filter(|p| p.date >= start_date && p.date <= end_date)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        Ok(PriceSeries::new(ticker, points))
    }

    fn list_symbols(&self) -> Result<Vec<String>, PortoptError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    fn get_data_range(
        &self,
        ticker: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, PortoptError> {
        Ok(self.data.get(ticker).and_then(|s| {
            Some((s.first_date()?, s.last_date()?, s.len()))
        }))
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn start_date() -> NaiveDate {
    date(2023, 1, 2)
}

/// Geometric random walk with the given annual drift and volatility.
pub fn random_walk(ticker: &str, days: usize, drift: f64, vol: f64, seed: u64) -> PriceSeries {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(drift / 252.0, vol / 252f64.sqrt()).unwrap();
    let mut price = 100.0;
    let points = (0..days)
        .map(|i| {
            if i > 0 {
                price *= (1.0 + normal.sample(&mut rng)).max(0.01);
            }
            PricePoint {
                date: start_date() + Duration::days(i as i64),
                price,
            }
        })
        .collect();
    PriceSeries::new(ticker, points)
}

/// Four assets with distinct risk/return profiles over `days` observations.
pub fn sample_universe(days: usize) -> Vec<PriceSeries> {
    vec![
        random_walk("AAA", days, 0.12, 0.25, 1),
        random_walk("BBB", days, 0.08, 0.15, 2),
        random_walk("CCC", days, 0.05, 0.08, 3),
        random_walk("DDD", days, 0.15, 0.35, 4),
    ]
}

pub fn sample_matrix(days: usize) -> PriceMatrix {
    PriceMatrix::align(&sample_universe(days)).unwrap()
}

pub fn diagonal_estimate(returns: &[f64], variances: &[f64]) -> ReturnsEstimate {
    let tickers = (0..returns.len()).map(|i| format!("A{i}")).collect();
    ReturnsEstimate::new(
        tickers,
        DVector::from_column_slice(returns),
        DMatrix::from_diagonal(&DVector::from_column_slice(variances)),
    )
    .unwrap()
}

pub fn write_price_csv(dir: &Path, series: &PriceSeries) {
    let mut content = String::from("date,adj_close\n");
    for p in &series.points {
        content.push_str(&format!("{},{:.6}\n", p.date, p.price));
    }
    std::fs::write(dir.join(format!("{}.csv", series.ticker)), content).unwrap();
}

pub fn write_temp_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

pub fn assert_valid_weights(weights: &[f64]) {
    let sum: f64 = weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6, "weights sum to {sum}");
    for w in weights {
        assert!((-1e-9..=1.0 + 1e-9).contains(w), "weight {w} out of range");
    }
}
