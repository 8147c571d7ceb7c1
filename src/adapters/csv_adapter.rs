//! CSV file price adapter.
//!
//! One file per ticker, `<TICKER>.csv`, with a `date` column (YYYY-MM-DD)
//! and an `adj_close` column (or `close` when no adjusted series exists).

use crate::domain::error::PortoptError;
use crate::domain::price::{PricePoint, PriceSeries};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

pub struct CsvAdapter {
    base_path: PathBuf,
}

struct Columns {
    date: usize,
    price: usize,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn csv_path(&self, ticker: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", ticker))
    }

    fn read_all(&self, ticker: &str) -> Result<Vec<PricePoint>, PortoptError> {
        let path = self.csv_path(ticker);
        let content = fs::read_to_string(&path).map_err(|e| PortoptError::Data {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let headers = rdr.headers().map_err(|e| PortoptError::Data {
            reason: format!("CSV header error in {}: {}", path.display(), e),
        })?;
        let columns = find_columns(headers).ok_or_else(|| PortoptError::Data {
            reason: format!(
                "{} needs a date column and an adj_close or close column",
                path.display()
            ),
        })?;

        let mut points = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| PortoptError::Data {
                reason: format!("CSV parse error: {}", e),
            })?;

            let date_str = record.get(columns.date).ok_or_else(|| PortoptError::Data {
                reason: "missing date column".into(),
            })?;
            let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d").map_err(|e| {
                PortoptError::Data {
                    reason: format!("invalid date format: {}", e),
                }
            })?;

            let raw = record.get(columns.price).unwrap_or("").trim();
            if raw.is_empty() {
                // Gaps are dropped here and removed again by date alignment.
                continue;
            }
            let price: f64 = raw.parse().map_err(|e| PortoptError::Data {
                reason: format!("invalid price value for {} on {}: {}", ticker, date, e),
            })?;
            if !price.is_finite() || price <= 0.0 {
                return Err(PortoptError::Data {
                    reason: format!("non-positive price for {} on {}", ticker, date),
                });
            }

            points.push(PricePoint { date, price });
        }
        Ok(points)
    }
}

fn find_columns(headers: &csv::StringRecord) -> Option<Columns> {
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };
    Some(Columns {
        date: position("date")?,
        price: position("adj_close").or_else(|| position("close"))?,
    })
}

impl DataPort for CsvAdapter {
    fn fetch_prices(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PriceSeries, PortoptError> {
        let points = self
            .read_all(ticker)?
            .into_iter()
            .filter(|p| p.date >= start_date && p.date <= end_date)
            .collect();
        Ok(PriceSeries::new(ticker, points))
    }

    fn list_symbols(&self) -> Result<Vec<String>, PortoptError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| PortoptError::Data {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PortoptError::Data {
                reason: format!("directory entry error: {}", e),
            })?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(ticker) = name_str.strip_suffix(".csv") {
                symbols.push(ticker.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }

    fn get_data_range(
        &self,
        ticker: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, PortoptError> {
        if !self.csv_path(ticker).exists() {
            return Ok(None);
        }
        let series = PriceSeries::new(ticker, self.read_all(ticker)?);
        Ok(match (series.first_date(), series.last_date()) {
            (Some(first), Some(last)) => Some((first, last, series.len())),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "date,open,high,low,close,adj_close,volume\n\
            2024-01-17,110.0,120.0,105.0,115.0,114.0,55000\n\
            2024-01-15,100.0,110.0,90.0,105.0,104.0,50000\n\
            2024-01-16,105.0,115.0,100.0,110.0,109.0,60000\n";

        fs::write(path.join("AAPL.csv"), csv_content).unwrap();
        fs::write(path.join("MSFT.csv"), "Date,Close\n2024-01-15,300.5\n2024-01-16,\n").unwrap();
        fs::write(path.join("BAD.csv"), "date,volume\n2024-01-15,1\n").unwrap();
        fs::write(path.join("notes.txt"), "ignore me").unwrap();

        (dir, path)
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn fetch_prices_prefers_adjusted_close_and_sorts() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let series = adapter
            .fetch_prices("AAPL", d(2024, 1, 1), d(2024, 1, 31))
            .unwrap();

        assert_eq!(series.ticker, "AAPL");
        assert_eq!(series.len(), 3);
        assert_eq!(series.points[0].date, d(2024, 1, 15));
        assert_eq!(series.points[0].price, 104.0);
        assert_eq!(series.latest_price(), Some(114.0));
    }

    #[test]
    fn fetch_prices_filters_by_date() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let series = adapter
            .fetch_prices("AAPL", d(2024, 1, 16), d(2024, 1, 16))
            .unwrap();

        assert_eq!(series.len(), 1);
        assert_eq!(series.points[0].date, d(2024, 1, 16));
    }

    #[test]
    fn falls_back_to_close_and_skips_blanks() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let series = adapter
            .fetch_prices("MSFT", d(2024, 1, 1), d(2024, 1, 31))
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.points[0].price, 300.5);
    }

    #[test]
    fn missing_file_and_missing_columns_are_errors() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        assert!(adapter.fetch_prices("XYZ", d(2024, 1, 1), d(2024, 1, 31)).is_err());
        assert!(matches!(
            adapter.fetch_prices("BAD", d(2024, 1, 1), d(2024, 1, 31)),
            Err(PortoptError::Data { .. })
        ));
    }

    #[test]
    fn list_symbols_returns_csv_stems() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let symbols = adapter.list_symbols().unwrap();
        assert_eq!(symbols, vec!["AAPL", "BAD", "MSFT"]);
    }

    #[test]
    fn data_range_reports_bounds() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        assert_eq!(
            adapter.get_data_range("AAPL").unwrap(),
            Some((d(2024, 1, 15), d(2024, 1, 17), 3))
        );
        assert_eq!(adapter.get_data_range("XYZ").unwrap(), None);
    }
}
