//! Configuration and execution of prevalence estimates.

mod config;
mod runner;

pub use config::PrevalenceConfig;
pub use runner::{estimate_prevalence, Prevalence};
