//! Ticker universe parsing and validation.
//!
//! Parses ticker lists from configuration or the command line and checks
//! that each ticker has enough price history to take part in estimation.

use crate::domain::error::PortoptError;
use crate::domain::price::PriceSeries;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::collections::HashSet;

pub const MIN_OBSERVATIONS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    pub tickers: Vec<String>,
}

impl Universe {
    pub fn count(&self) -> usize {
        self.tickers.len()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in ticker list")]
    EmptyToken,

    #[error("duplicate ticker: {0}")]
    DuplicateTicker(String),
}

impl From<UniverseError> for PortoptError {
    fn from(err: UniverseError) -> Self {
        PortoptError::invalid("tickers", err.to_string())
    }
}

pub fn parse_tickers(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut tickers = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let ticker = trimmed.to_uppercase();
        if !seen.insert(ticker.clone()) {
            return Err(UniverseError::DuplicateTicker(ticker));
        }
        tickers.push(ticker);
    }

    Ok(tickers)
}

pub struct UniverseValidationResult {
    pub universe: Universe,
    /// Price history of every kept ticker, in universe order.
    pub series: Vec<PriceSeries>,
    pub skipped: Vec<SkippedTicker>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTicker {
    pub ticker: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoData,
    InsufficientObservations { observations: usize },
}

pub fn validate_universe(
    data_port: &dyn DataPort,
    tickers: Vec<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<UniverseValidationResult, PortoptError> {
    let mut kept = Vec::new();
    let mut series = Vec::new();
    let mut skipped = Vec::new();
    let requested = tickers.len();

    for ticker in tickers {
        let prices = match data_port.fetch_prices(&ticker, start_date, end_date) {
            Ok(prices) => prices,
            Err(e) => {
                eprintln!("Warning: skipping {} ({})", ticker, e);
                skipped.push(SkippedTicker {
                    ticker,
                    reason: SkipReason::NoData,
                });
                continue;
            }
        };

        if prices.is_empty() {
            eprintln!("Warning: skipping {} (no data found)", ticker);
            skipped.push(SkippedTicker {
                ticker,
                reason: SkipReason::NoData,
            });
            continue;
        }

        if prices.len() < MIN_OBSERVATIONS {
            eprintln!(
                "Warning: skipping {} (only {} prices, minimum {} required)",
                ticker,
                prices.len(),
                MIN_OBSERVATIONS
            );
            skipped.push(SkippedTicker {
                ticker,
                reason: SkipReason::InsufficientObservations {
                    observations: prices.len(),
                },
            });
            continue;
        }

        eprintln!("  {}: {} prices [OK]", ticker, prices.len());
        kept.push(ticker);
        series.push(prices);
    }

    if kept.is_empty() {
        return Err(PortoptError::insufficient(
            "all",
            format!("no ticker has at least {MIN_OBSERVATIONS} prices"),
        ));
    }

    if !skipped.is_empty() {
        eprintln!("Using {} of {} tickers", kept.len(), requested);
    }

    Ok(UniverseValidationResult {
        universe: Universe { tickers: kept },
        series,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price::PricePoint;
    use std::collections::HashMap;

    struct FixedData(HashMap<String, usize>);

    impl DataPort for FixedData {
        fn fetch_prices(
            &self,
            ticker: &str,
            start_date: NaiveDate,
            _end_date: NaiveDate,
        ) -> Result<PriceSeries, PortoptError> {
            let n = self
                .0
                .get(ticker)
                .copied()
                .ok_or_else(|| PortoptError::Data {
                    reason: format!("no file for {ticker}"),
                })?;
            let points = (0..n)
                .map(|i| PricePoint {
                    date: start_date + chrono::Duration::days(i as i64),
                    price: 100.0 + i as f64,
                })
                .collect();
            Ok(PriceSeries::new(ticker, points))
        }

        fn list_symbols(&self) -> Result<Vec<String>, PortoptError> {
            Ok(self.0.keys().cloned().collect())
        }

        fn get_data_range(
            &self,
            _ticker: &str,
        ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, PortoptError> {
            Ok(None)
        }
    }

    fn range() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
    }

    #[test]
    fn test_parse_tickers_basic() {
        let result = parse_tickers("AAPL,MSFT,GOOG").unwrap();
        assert_eq!(result, vec!["AAPL", "MSFT", "GOOG"]);
    }

    #[test]
    fn test_parse_tickers_whitespace_and_case() {
        let result = parse_tickers("  aapl , Msft ,goog").unwrap();
        assert_eq!(result, vec!["AAPL", "MSFT", "GOOG"]);
    }

    #[test]
    fn test_parse_tickers_empty_token() {
        assert!(matches!(parse_tickers("AAPL,,MSFT"), Err(UniverseError::EmptyToken)));
        assert!(matches!(parse_tickers(""), Err(UniverseError::EmptyToken)));
    }

    #[test]
    fn test_parse_tickers_duplicate() {
        let result = parse_tickers("AAPL,MSFT,aapl");
        assert!(matches!(result, Err(UniverseError::DuplicateTicker(s)) if s == "AAPL"));
    }

    #[test]
    fn test_universe_error_maps_to_invalid_parameter() {
        let err: PortoptError = UniverseError::EmptyToken.into();
        assert!(matches!(err, PortoptError::InvalidParameter { .. }));
    }

    #[test]
    fn test_validate_skips_short_and_missing() {
        let data = FixedData(HashMap::from([
            ("AAA".to_string(), 40),
            ("BBB".to_string(), 5),
            ("CCC".to_string(), 30),
        ]));
        let (start, end) = range();
        let tickers = vec!["AAA".into(), "BBB".into(), "CCC".into(), "ZZZ".into()];
        let result = validate_universe(&data, tickers, start, end).unwrap();

        assert_eq!(result.universe.tickers, vec!["AAA", "CCC"]);
        assert_eq!(result.universe.count(), 2);
        assert_eq!(result.series.len(), 2);
        assert_eq!(result.skipped.len(), 2);
        assert_eq!(
            result.skipped[0].reason,
            SkipReason::InsufficientObservations { observations: 5 }
        );
        assert_eq!(result.skipped[1].reason, SkipReason::NoData);
    }

    #[test]
    fn test_validate_fails_when_nothing_remains() {
        let data = FixedData(HashMap::from([("AAA".to_string(), 3)]));
        let (start, end) = range();
        let err = validate_universe(&data, vec!["AAA".into()], start, end).err().unwrap();
        assert!(matches!(err, PortoptError::InsufficientData { .. }));
    }
}
