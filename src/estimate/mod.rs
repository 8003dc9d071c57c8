//! Point estimates of prevalence with confidence intervals.

mod point;

pub use point::{point_estimate, round_to, z_value, EstimateOptions, PrevalenceEstimate};
