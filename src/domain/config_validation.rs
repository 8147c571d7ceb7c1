//! Configuration validation.
//!
//! Checks every config field before an optimization or backtest runs.

use crate::domain::backtest::Rebalance;
use crate::domain::error::PortoptError;
use crate::domain::estimate::{RETURN_SHRINKAGE_FACTOR, ReturnKind, ShrinkageTarget};
use crate::domain::resampling::ResamplingMethod;
use crate::ports::config_port::ConfigPort;
use std::str::FromStr;

pub fn validate_optimizer_config(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    validate_risk_free_rate(config)?;
    validate_trading_days(config)?;
    validate_shrinkage(config)?;
    validate_num_portfolios(config)?;
    validate_weight_bounds(config)?;
    validate_parsed::<ReturnKind>(config, "optimizer", "returns")?;
    Ok(())
}

pub fn validate_resampling_config(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    validate_num_simulations(config)?;
    validate_noise_scale(config)?;
    validate_parsed::<ResamplingMethod>(config, "resampling", "method")?;
    validate_seed(config)?;
    Ok(())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    validate_parsed::<Rebalance>(config, "backtest", "rebalance")?;
    let value = config.get_double("backtest", "initial_value", 10_000.0);
    if value <= 0.0 {
        return Err(invalid("backtest", "initial_value", "initial_value must be positive"));
    }
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> PortoptError {
    PortoptError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Rejects values present in the config that do not parse as numbers.
fn require_number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), PortoptError> {
    match config.get_string(section, key) {
        Some(s) if s.trim().parse::<f64>().is_err() => {
            Err(invalid(section, key, format!("'{}' is not a number", s.trim())))
        }
        _ => Ok(()),
    }
}

fn validate_parsed<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<(), PortoptError> {
    match config.get_string(section, key) {
        Some(s) if s.parse::<T>().is_err() => {
            Err(invalid(section, key, format!("unrecognized value '{}'", s.trim())))
        }
        _ => Ok(()),
    }
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    require_number(config, "optimizer", "risk_free_rate")?;
    let value = config.get_double("optimizer", "risk_free_rate", 0.02);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(
            "optimizer",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_trading_days(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    let value = config.get_int("optimizer", "trading_days", 252);
    if value < 1 {
        return Err(invalid(
            "optimizer",
            "trading_days",
            "trading_days must be at least 1",
        ));
    }
    Ok(())
}

fn validate_shrinkage(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    require_number(config, "optimizer", "shrinkage_intensity")?;
    let value = config.get_double("optimizer", "shrinkage_intensity", 0.0);
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(
            "optimizer",
            "shrinkage_intensity",
            "shrinkage_intensity must be between 0 and 1",
        ));
    }
    validate_parsed::<ShrinkageTarget>(config, "optimizer", "shrinkage_target")?;

    require_number(config, "optimizer", "return_shrinkage")?;
    require_number(config, "optimizer", "return_shrinkage_factor")?;
    let returns = config.get_double("optimizer", "return_shrinkage", 0.0);
    if !(0.0..=1.0).contains(&returns) {
        return Err(invalid(
            "optimizer",
            "return_shrinkage",
            "return_shrinkage must be between 0 and 1",
        ));
    }
    let factor = config.get_double("optimizer", "return_shrinkage_factor", RETURN_SHRINKAGE_FACTOR);
    if !(factor >= 1.0) || !factor.is_finite() {
        return Err(invalid(
            "optimizer",
            "return_shrinkage_factor",
            "return_shrinkage_factor must be at least 1",
        ));
    }
    Ok(())
}

fn validate_num_portfolios(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    let value = config.get_int("optimizer", "num_portfolios", 10);
    if value < 2 {
        return Err(invalid(
            "optimizer",
            "num_portfolios",
            "num_portfolios must be at least 2",
        ));
    }
    Ok(())
}

fn validate_weight_bounds(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    require_number(config, "optimizer", "min_weight")?;
    require_number(config, "optimizer", "max_weight")?;
    let min = config.get_double("optimizer", "min_weight", 0.0);
    let max = config.get_double("optimizer", "max_weight", 1.0);
    if !(0.0..=1.0).contains(&min) {
        return Err(invalid("optimizer", "min_weight", "min_weight must be between 0 and 1"));
    }
    if !(0.0..=1.0).contains(&max) {
        return Err(invalid("optimizer", "max_weight", "max_weight must be between 0 and 1"));
    }
    if min > max {
        return Err(invalid(
            "optimizer",
            "min_weight",
            "min_weight must not exceed max_weight",
        ));
    }
    Ok(())
}

fn validate_num_simulations(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    let value = config.get_int("resampling", "num_simulations", 500);
    if value < 1 {
        return Err(invalid(
            "resampling",
            "num_simulations",
            "num_simulations must be at least 1",
        ));
    }
    Ok(())
}

fn validate_noise_scale(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    require_number(config, "resampling", "noise_scale")?;
    let value = config.get_double("resampling", "noise_scale", 1.0);
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(
            "resampling",
            "noise_scale",
            "noise_scale must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_seed(config: &dyn ConfigPort) -> Result<(), PortoptError> {
    match config.get_string("resampling", "seed") {
        Some(s) if s.trim().parse::<u64>().is_err() => Err(invalid(
            "resampling",
            "seed",
            "seed must be a non-negative integer",
        )),
        _ => Ok(()),
    }
}
