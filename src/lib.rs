//! Composable Registry Prevalence Library
//!
//! This library estimates point prevalence of a disease from a registry that
//! covers fewer years than requested. Years inside the registry are counted
//! directly; earlier years are simulated from fitted incidence and survival
//! models, with bootstrap draws carrying the survival uncertainty.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Registry records, life tables, column roles and results
//! - **incidence**: Registry year arithmetic, counting and incidence models
//! - **model**: Parametric survival models (Weibull, log-logistic, cure)
//! - **mortality**: Population survival from life tables
//! - **simulate**: Bootstrap fitting and simulation of years
//! - **estimate**: Aggregation into estimates with confidence intervals
//! - **test**: Exact Poisson goodness-of-fit test
//! - **pipeline**: Configuration and execution
//!
//! # Example
//!
//! ```no_run
//! use composable_prevalence::prelude::*;
//!
//! let roles = RoleSpec::parse(
//!     "Surv(time, status) ~ age(age) + sex(sex) + entry(diagnosis) + event(death)",
//! ).unwrap();
//! let registry = Registry::from_csv("registry.csv", &roles).unwrap();
//!
//! let result = Prevalence::new()
//!     .years(&[5, 10, 20])
//!     .population_size(3_500_000.0)
//!     .n_bootstrap(500)
//!     .run(&registry)
//!     .unwrap();
//! println!("{}", result);
//! ```

pub mod data;
pub mod error;
pub mod estimate;
pub mod incidence;
pub mod model;
pub mod mortality;
pub mod pipeline;
pub mod simulate;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::data::{
        LifeTable, LifeTableRow, PrevalenceResult, Registry, RegistryRecord, Role, RoleSpec,
    };
    pub use crate::error::{PrevalenceError, Result};
    pub use crate::estimate::{point_estimate, EstimateOptions, PrevalenceEstimate};
    pub use crate::incidence::{
        counted_prevalence, determine_registry_years, raw_incidence, CovariatePool,
        HomogeneousPoisson, IncidenceData, IncidenceFit, IncidenceModel, IncidenceModelKind,
        IncidentCase,
    };
    pub use crate::model::{
        CovariateRow, FixedCureModel, LogLogisticModel, MixtureCureModel, SurvivalData,
        SurvivalFit, SurvivalModel, SurvivalModelKind, WeibullModel,
    };
    pub use crate::mortality::PopulationSurvival;
    pub use crate::pipeline::{estimate_prevalence, Prevalence, PrevalenceConfig};
    pub use crate::simulate::{BootstrapDraws, CancelToken, YearlyContribution};
    pub use crate::test::{exact_poisson_test, PoissonTestResult};
}
