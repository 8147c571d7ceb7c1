//! In-process cache of aligned price matrices.
//!
//! Owned by the caller. Entries are keyed by the ticker set (order
//! independent), the period and the as-of date, so a new trading day or a
//! different lookback never hits a stale entry.

use crate::domain::error::PortoptError;
use crate::domain::period::Period;
use crate::domain::price::{PriceMatrix, PriceSeries};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tickers: BTreeSet<String>,
    period: Period,
    as_of: NaiveDate,
}

impl CacheKey {
    pub fn new(tickers: &[String], period: Period, as_of: NaiveDate) -> Self {
        Self {
            tickers: tickers.iter().cloned().collect(),
            period,
            as_of,
        }
    }
}

#[derive(Debug, Default)]
pub struct PriceCache {
    entries: HashMap<CacheKey, PriceMatrix>,
    hits: usize,
    misses: usize,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<&PriceMatrix> {
        match self.entries.get(key) {
            Some(matrix) => {
                self.hits += 1;
                Some(matrix)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, prices: PriceMatrix) {
        self.entries.insert(key, prices);
    }

    /// `(hits, misses)` since construction.
    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    /// Returns the cached matrix for the request, loading and aligning the
    /// series through `load` on a miss.
    pub fn get_or_load<F>(
        &mut self,
        tickers: &[String],
        period: Period,
        as_of: NaiveDate,
        load: F,
    ) -> Result<PriceMatrix, PortoptError>
    where
        F: FnOnce() -> Result<Vec<PriceSeries>, PortoptError>,
    {
        let key = CacheKey::new(tickers, period, as_of);
        if let Some(matrix) = self.get(&key) {
            tracing::debug!(tickers = tickers.len(), %period, %as_of, "price cache hit");
            return Ok(matrix.clone());
        }
        let matrix = PriceMatrix::align(&load()?)?;
        self.insert(key, matrix.clone());
        Ok(matrix)
    }
}
