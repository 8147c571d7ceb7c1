//! Core domain types and logic. No I/O happens here.

pub mod allocation;
pub mod backtest;
pub mod config_validation;
pub mod error;
pub mod estimate;
pub mod holdings;
pub mod metrics;
pub mod optimizer;
pub mod period;
pub mod price;
pub mod qp;
pub mod resampling;
pub mod result;
pub mod solver;
pub mod strategy;
pub mod universe;
