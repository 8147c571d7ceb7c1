//! portopt: mean-variance portfolio optimization with resampled frontiers.
//!
//! Hexagonal architecture: estimation, optimization and resampling in
//! [`domain`], port traits in [`ports`], CSV/INI/report implementations in
//! [`adapters`], and the command-line front end in [`cli`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
