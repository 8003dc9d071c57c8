//! Incidence models.
//!
//! An incidence model is fitted to the diagnosis dates of one stratum and
//! then produces synthetic incident populations for years outside the
//! registry. Covariates of synthetic cases are sampled from the stratum's
//! empirical distribution through a [`CovariatePool`].

pub mod counting;
pub mod poisson;

pub use counting::{
    counted_prevalence, default_num_registry_years, determine_registry_years, raw_incidence,
};
pub use poisson::HomogeneousPoisson;

use crate::data::RegistryRecord;
use crate::error::{PrevalenceError, Result};
use crate::model::CovariateRow;
use crate::simulate::{SimRng, DAYS_PER_YEAR};
use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Diagnosis dates of one stratum together with the registry window.
#[derive(Debug, Clone)]
pub struct IncidenceData {
    /// Diagnosis dates; dates outside `[start_date, index_date)` are ignored.
    pub entry_dates: Vec<NaiveDate>,
    /// First day of the registry.
    pub start_date: NaiveDate,
    /// Index date (end of the last registry year).
    pub index_date: NaiveDate,
    /// Number of whole registry years.
    pub num_registry_years: usize,
}

impl IncidenceData {
    /// Number of diagnoses inside the registry window.
    pub fn n_diagnoses(&self) -> usize {
        self.entry_dates
            .iter()
            .filter(|d| **d >= self.start_date && **d < self.index_date)
            .count()
    }

    /// Length of the registry window in days.
    pub fn elapsed_days(&self) -> f64 {
        (self.index_date - self.start_date).num_days() as f64
    }
}

/// Fitted incidence parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidenceFit {
    pub model: String,
    pub parameter_names: Vec<String>,
    pub parameters: Vec<f64>,
}

impl IncidenceFit {
    /// Get a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameter_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.parameters[i])
    }
}

/// One synthetic incident case.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IncidentCase {
    /// Day of diagnosis within the simulated timeframe.
    pub arrival_day: f64,
    pub covariates: CovariateRow,
}

/// Empirical covariate distribution of one stratum.
#[derive(Debug, Clone)]
pub struct CovariatePool {
    ages: Vec<f64>,
    sex: Option<usize>,
}

impl CovariatePool {
    pub fn new(ages: Vec<f64>, sex: Option<usize>) -> Result<Self> {
        if ages.is_empty() {
            return Err(PrevalenceError::EmptyData(
                "Covariate pool has no ages to sample from".to_string(),
            ));
        }
        Ok(Self { ages, sex })
    }

    /// Pool of a stratum's registry records.
    pub fn from_records(records: &[&RegistryRecord], sex: Option<usize>) -> Result<Self> {
        Self::new(records.iter().map(|r| r.age).collect(), sex)
    }

    pub fn ages(&self) -> &[f64] {
        &self.ages
    }

    pub fn sex(&self) -> Option<usize> {
        self.sex
    }

    /// Fail if a required covariate cannot be supplied.
    pub fn check(&self, required: &[String]) -> Result<()> {
        match required.iter().find(|c| c.as_str() != "age" && c.as_str() != "sex") {
            Some(name) => Err(PrevalenceError::InvalidParameter(format!(
                "covariate '{}' is required by the survival model but cannot be sampled; \
                 only 'age' and 'sex' are available",
                name
            ))),
            None => Ok(()),
        }
    }

    /// Draw one covariate row with replacement.
    ///
    /// Age is always drawn since it is needed for the age at the index date.
    pub fn sample(&self, required: &[String], rng: &mut SimRng) -> Result<CovariateRow> {
        self.check(required)?;
        Ok(self.sample_unchecked(rng))
    }

    pub(crate) fn sample_unchecked(&self, rng: &mut SimRng) -> CovariateRow {
        let age = self.ages[rng.random_range(0..self.ages.len())];
        CovariateRow { age, sex: self.sex }
    }
}

/// A fittable incidence process.
pub trait IncidenceModel: Send + Sync + fmt::Debug {
    /// Short model name.
    fn name(&self) -> &str;

    /// Estimate parameters from diagnosis dates.
    fn fit(&self, data: &IncidenceData) -> Result<IncidenceFit>;

    /// Synthetic incident cases with arrival days in `[0, timeframe_days)`.
    fn draw_incident_population(
        &self,
        fit: &IncidenceFit,
        timeframe_days: f64,
        required_covariates: &[String],
        pool: &CovariatePool,
        rng: &mut SimRng,
    ) -> Result<Vec<IncidentCase>>;
}

/// Built-in incidence models selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidenceModelKind {
    /// Constant-rate Poisson arrivals.
    #[default]
    HomogeneousPoisson,
}

impl IncidenceModelKind {
    pub fn build(&self) -> Arc<dyn IncidenceModel> {
        match self {
            IncidenceModelKind::HomogeneousPoisson => Arc::new(HomogeneousPoisson),
        }
    }
}

impl fmt::Display for IncidenceModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidenceModelKind::HomogeneousPoisson => write!(f, "homogeneous_poisson"),
        }
    }
}

/// One-off check of an incidence model's output over a year.
///
/// Arrival days must be finite and inside the timeframe, and each case must
/// carry every required covariate.
pub fn validate_incidence_model(
    model: &dyn IncidenceModel,
    fit: &IncidenceFit,
    required: &[String],
    pool: &CovariatePool,
    rng: &mut SimRng,
) -> Result<()> {
    let cases = model.draw_incident_population(fit, DAYS_PER_YEAR, required, pool, rng)?;
    for case in &cases {
        if !case.arrival_day.is_finite()
            || case.arrival_day < 0.0
            || case.arrival_day >= DAYS_PER_YEAR
        {
            return Err(PrevalenceError::InvalidModelOutput(format!(
                "{}: arrival day {} outside [0, {})",
                model.name(),
                case.arrival_day,
                DAYS_PER_YEAR
            )));
        }
        if !case.covariates.age.is_finite() {
            return Err(PrevalenceError::InvalidModelOutput(format!(
                "{}: non-finite age in incident case",
                model.name()
            )));
        }
        if required.iter().any(|c| c == "sex") && pool.sex().is_some() && case.covariates.sex.is_none()
        {
            return Err(PrevalenceError::InvalidModelOutput(format!(
                "{}: incident case is missing the 'sex' covariate",
                model.name()
            )));
        }
    }
    Ok(())
}
