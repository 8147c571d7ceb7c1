//! Price history types and date alignment.

use crate::domain::error::PortoptError;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Adjusted close history for a single ticker, sorted by date.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    pub ticker: String,
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<String>, mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Self {
            ticker: ticker.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    pub fn latest_price(&self) -> Option<f64> {
        self.points.last().map(|p| p.price)
    }
}

/// Prices for a universe on a shared set of dates.
///
/// `prices[t][i]` is the price of `tickers[i]` on `dates[t]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceMatrix {
    tickers: Vec<String>,
    dates: Vec<NaiveDate>,
    prices: Vec<Vec<f64>>,
}

impl PriceMatrix {
    /// Builds a matrix from already-aligned rows.
    pub fn from_rows(
        tickers: Vec<String>,
        dates: Vec<NaiveDate>,
        prices: Vec<Vec<f64>>,
    ) -> Result<Self, PortoptError> {
        check_unique(&tickers)?;
        if tickers.is_empty() {
            return Err(PortoptError::invalid("tickers", "universe is empty"));
        }
        if dates.len() != prices.len() {
            return Err(PortoptError::invalid(
                "prices",
                format!("{} dates but {} price rows", dates.len(), prices.len()),
            ));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PortoptError::invalid(
                "dates",
                "dates must be strictly increasing",
            ));
        }
        for (row, date) in prices.iter().zip(&dates) {
            if row.len() != tickers.len() {
                return Err(PortoptError::invalid(
                    "prices",
                    format!("row for {} has {} prices, expected {}", date, row.len(), tickers.len()),
                ));
            }
            if let Some(i) = row.iter().position(|p| !p.is_finite() || *p <= 0.0) {
                return Err(PortoptError::Data {
                    reason: format!("non-positive price for {} on {}", tickers[i], date),
                });
            }
        }
        Ok(Self {
            tickers,
            dates,
            prices,
        })
    }

    /// Intersects the date sets of all series and keeps only shared dates.
    pub fn align(series: &[PriceSeries]) -> Result<Self, PortoptError> {
        if series.is_empty() {
            return Err(PortoptError::invalid("tickers", "universe is empty"));
        }
        let tickers: Vec<String> = series.iter().map(|s| s.ticker.clone()).collect();
        check_unique(&tickers)?;

        if let Some(empty) = series.iter().find(|s| s.is_empty()) {
            return Err(PortoptError::insufficient(&empty.ticker, "no price history"));
        }

        let mut common: BTreeSet<NaiveDate> = series[0].points.iter().map(|p| p.date).collect();
        for s in &series[1..] {
            let dates: HashSet<NaiveDate> = s.points.iter().map(|p| p.date).collect();
            common.retain(|d| dates.contains(d));
        }

        if common.is_empty() {
            return Err(PortoptError::insufficient(
                tickers.join(","),
                "price histories share no common dates",
            ));
        }

        let lookups: Vec<HashMap<NaiveDate, f64>> = series
            .iter()
            .map(|s| s.points.iter().map(|p| (p.date, p.price)).collect())
            .collect();

        let dates: Vec<NaiveDate> = common.into_iter().collect();
        let prices = dates
            .iter()
            .map(|d| lookups.iter().map(|l| l[d]).collect())
            .collect();

        Self::from_rows(tickers, dates, prices)
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.prices
    }

    pub fn asset_count(&self) -> usize {
        self.tickers.len()
    }

    pub fn observation_count(&self) -> usize {
        self.dates.len()
    }

    /// Price column for one asset.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.prices.iter().map(|row| row[index]).collect()
    }

    /// Last aligned price per ticker.
    pub fn latest_prices(&self) -> HashMap<String, f64> {
        match self.prices.last() {
            Some(row) => self
                .tickers
                .iter()
                .cloned()
                .zip(row.iter().copied())
                .collect(),
            None => HashMap::new(),
        }
    }

    /// Restricts the matrix to dates in `[start, end]`.
    pub fn slice(&self, start: NaiveDate, end: NaiveDate) -> Result<Self, PortoptError> {
        let (dates, prices): (Vec<_>, Vec<_>) = self
            .dates
            .iter()
            .zip(&self.prices)
            .filter(|(d, _)| **d >= start && **d <= end)
            .map(|(d, row)| (*d, row.clone()))
            .unzip();
        Self::from_rows(self.tickers.clone(), dates, prices)
    }
}

fn check_unique(tickers: &[String]) -> Result<(), PortoptError> {
    let mut seen = HashSet::new();
    for t in tickers {
        if !seen.insert(t.as_str()) {
            return Err(PortoptError::invalid("tickers", format!("duplicate ticker {t}")));
        }
    }
    Ok(())
}
