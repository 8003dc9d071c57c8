//! General-population mortality.
//!
//! Converts a life table of annual rates into continuous survival
//! probabilities, used to model survivors past the cure time.

mod population;

pub use population::{HazardCurve, PopulationSurvival};
