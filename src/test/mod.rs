//! Goodness-of-fit testing of simulated against counted prevalence.

pub mod poisson;

pub use poisson::{exact_poisson_test, PoissonTestResult};
