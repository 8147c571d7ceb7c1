//! Concrete implementations of the ports.

pub mod csv_adapter;
pub mod file_config_adapter;
pub mod json_report;
pub mod price_cache;
pub mod text_report;
