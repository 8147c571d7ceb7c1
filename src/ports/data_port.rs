//! Price data access port.

use crate::domain::error::PortoptError;
use crate::domain::price::PriceSeries;
use chrono::NaiveDate;

pub trait DataPort {
    /// Adjusted close prices for `ticker` within `[start_date, end_date]`.
    fn fetch_prices(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PriceSeries, PortoptError>;

    fn list_symbols(&self) -> Result<Vec<String>, PortoptError>;

    /// First date, last date and observation count, or `None` when unknown.
    fn get_data_range(
        &self,
        ticker: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, PortoptError>;
}
