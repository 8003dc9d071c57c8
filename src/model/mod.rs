//! Survival models.
//!
//! Every model implements [`SurvivalModel`]: fit coefficients to a (possibly
//! resampled) survival sample, report which covariates it needs, and predict
//! survival probabilities for paired `(row, time)` inputs. The simulation
//! engine only talks to the trait, so built-in and caller-supplied models are
//! interchangeable.

pub mod cure;
pub mod loglogistic;
pub mod optim;
pub mod weibull;

pub use cure::{FixedCureModel, MixtureCureModel};
pub use loglogistic::LogLogisticModel;
pub use optim::{maximize, OptimConfig, OptimResult};
pub use weibull::WeibullModel;

use crate::data::Registry;
use crate::error::{PrevalenceError, Result};
use crate::mortality::PopulationSurvival;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Survival times below this (in days) are raised to it before taking logs.
pub const MIN_SURVIVAL_TIME: f64 = 0.5;

/// Covariates of one individual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CovariateRow {
    /// Age at diagnosis, in years.
    pub age: f64,
    /// Index into the registry's sex levels.
    pub sex: Option<usize>,
}

/// Right-censored survival sample.
#[derive(Debug, Clone)]
pub struct SurvivalData {
    /// Covariates per subject.
    pub rows: Vec<CovariateRow>,
    /// Follow-up time in days.
    pub time: Vec<f64>,
    /// Event indicator.
    pub status: Vec<bool>,
    /// Sex levels the `sex` indices refer to.
    pub sex_levels: Vec<String>,
}

impl SurvivalData {
    /// Build a survival sample from every registry record.
    pub fn from_registry(registry: &Registry) -> Self {
        let records = registry.records();
        Self {
            rows: records
                .iter()
                .map(|r| CovariateRow {
                    age: r.age,
                    sex: registry.sex_index(r),
                })
                .collect(),
            time: records.iter().map(|r| r.survival_time).collect(),
            status: records.iter().map(|r| r.event_status).collect(),
            sex_levels: registry.sex_levels().to_vec(),
        }
    }

    /// Number of subjects.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of observed events.
    pub fn n_events(&self) -> usize {
        self.status.iter().filter(|&&s| s).count()
    }

    /// Whether a sex term can be estimated (two levels present).
    pub fn has_sex_contrast(&self) -> bool {
        self.sex_levels.len() == 2
    }

    /// Subset rows by index; indices may repeat.
    pub fn resample(&self, indices: &[usize]) -> Self {
        Self {
            rows: indices.iter().map(|&i| self.rows[i]).collect(),
            time: indices.iter().map(|&i| self.time[i]).collect(),
            status: indices.iter().map(|&i| self.status[i]).collect(),
            sex_levels: self.sex_levels.clone(),
        }
    }
}

/// Fitted coefficients of a survival model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalFit {
    /// Name of the model that produced the fit.
    pub model: String,
    /// Coefficient names, aligned with `coefficients`.
    pub coefficient_names: Vec<String>,
    /// Coefficient values.
    pub coefficients: Vec<f64>,
    /// Covariates the model reads from each row.
    pub covariates: Vec<String>,
    /// Log-likelihood at the optimum.
    pub log_likelihood: f64,
    /// Optimiser iterations used.
    pub iterations: usize,
}

impl SurvivalFit {
    /// Get a coefficient by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficient_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.coefficients[i])
    }

    /// Whether the fit uses the sex contrast.
    pub fn uses_sex(&self) -> bool {
        self.covariates.iter().any(|c| c == "sex")
    }
}

/// A fittable survival process.
pub trait SurvivalModel: Send + Sync + fmt::Debug {
    /// Short model name.
    fn name(&self) -> &str;

    /// Fit coefficients to a sample. Must tolerate duplicate rows.
    fn fit(&self, data: &SurvivalData) -> Result<SurvivalFit>;

    /// Covariates the fitted model needs for each row.
    fn covariate_names(&self, fit: &SurvivalFit) -> Vec<String> {
        fit.covariates.clone()
    }

    /// Survival probability for each `(rows[i], times[i])` pair.
    fn predict_survival(
        &self,
        fit: &SurvivalFit,
        rows: &[CovariateRow],
        times: &[f64],
    ) -> Result<Vec<f64>>;
}

/// Built-in survival models selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurvivalModelKind {
    /// Proportional-hazards Weibull regression.
    #[default]
    Weibull,
    /// Log-logistic accelerated failure time regression.
    LogLogistic,
    /// Weibull mixture cure model.
    MixtureCure,
}

impl SurvivalModelKind {
    /// Instantiate the model.
    ///
    /// `population` is only consulted by the mixture cure model.
    pub fn build(&self, population: Option<Arc<PopulationSurvival>>) -> Arc<dyn SurvivalModel> {
        match self {
            SurvivalModelKind::Weibull => Arc::new(WeibullModel::default()),
            SurvivalModelKind::LogLogistic => Arc::new(LogLogisticModel::default()),
            SurvivalModelKind::MixtureCure => Arc::new(MixtureCureModel::new(population)),
        }
    }

    /// Whether the model needs population mortality rates.
    pub fn needs_population(&self) -> bool {
        matches!(self, SurvivalModelKind::MixtureCure)
    }
}

impl fmt::Display for SurvivalModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SurvivalModelKind::Weibull => "weibull",
            SurvivalModelKind::LogLogistic => "log_logistic",
            SurvivalModelKind::MixtureCure => "mixture_cure",
        };
        write!(f, "{}", name)
    }
}

/// Check a model's predictions on its own sample: probabilities must lie in
/// `[0, 1]` and not increase with time for a fixed row.
pub fn validate_survival_model(
    model: &dyn SurvivalModel,
    fit: &SurvivalFit,
    data: &SurvivalData,
) -> Result<()> {
    let n = data.len().min(20);
    let grid = [0.0, 30.0, 365.0, 1825.0, 3650.0];

    for row in data.rows.iter().take(n) {
        let rows = vec![*row; grid.len()];
        let probs = model.predict_survival(fit, &rows, &grid)?;
        if probs.len() != grid.len() {
            return Err(PrevalenceError::InvalidModelOutput(format!(
                "{}: expected {} survival probabilities, got {}",
                model.name(),
                grid.len(),
                probs.len()
            )));
        }
        if let Some(p) = probs.iter().find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0) {
            return Err(PrevalenceError::InvalidModelOutput(format!(
                "{}: survival probability {} outside [0, 1]",
                model.name(),
                p
            )));
        }
        if probs.windows(2).any(|w| w[1] > w[0] + 1e-9) {
            return Err(PrevalenceError::InvalidModelOutput(format!(
                "{}: survival probability increases with time",
                model.name()
            )));
        }
    }
    Ok(())
}

/// Regression design shared by the parametric models.
///
/// Covariate columns are centred for numerical stability; [`Design::uncenter`]
/// maps the fitted coefficients back to the raw covariate scale.
#[derive(Debug, Clone)]
pub(crate) struct Design {
    /// n × p matrix: intercept column followed by centred covariates.
    pub x: DMatrix<f64>,
    /// Column means (0 for the intercept).
    pub means: Vec<f64>,
    /// Covariate names read from rows.
    pub covariates: Vec<String>,
    /// Coefficient names of the linear predictor.
    pub names: Vec<String>,
}

impl Design {
    pub fn from_data(data: &SurvivalData) -> Result<Self> {
        if data.is_empty() {
            return Err(PrevalenceError::EmptyData(
                "Survival sample has no rows".to_string(),
            ));
        }
        if data.time.len() != data.len() || data.status.len() != data.len() {
            return Err(PrevalenceError::DimensionMismatch {
                expected: data.len(),
                actual: data.time.len().min(data.status.len()),
            });
        }

        let with_sex = data.has_sex_contrast();
        let n = data.len();
        let p = if with_sex { 3 } else { 2 };

        let mut covariates = vec!["age".to_string()];
        let mut names = vec!["(Intercept)".to_string(), "age".to_string()];
        if with_sex {
            covariates.push("sex".to_string());
            names.push(format!("sex{}", data.sex_levels[1]));
        }

        let raw = DMatrix::from_fn(n, p, |i, j| covariate_value(&data.rows[i], j, with_sex));
        let means: Vec<f64> = (0..p)
            .map(|j| if j == 0 { 0.0 } else { raw.column(j).mean() })
            .collect();
        let x = DMatrix::from_fn(n, p, |i, j| raw[(i, j)] - means[j]);

        Ok(Self {
            x,
            means,
            covariates,
            names,
        })
    }

    pub fn n_coef(&self) -> usize {
        self.x.ncols()
    }

    /// Convert coefficients estimated on centred covariates to the raw scale.
    pub fn uncenter(&self, beta: &[f64]) -> Vec<f64> {
        let mut out = beta.to_vec();
        out[0] = beta[0]
            - beta
                .iter()
                .zip(&self.means)
                .skip(1)
                .map(|(b, m)| b * m)
                .sum::<f64>();
        out
    }
}

/// Column `j` of the design row for one individual (0 is the intercept).
fn covariate_value(row: &CovariateRow, j: usize, with_sex: bool) -> f64 {
    match j {
        0 => 1.0,
        1 => row.age,
        2 if with_sex => {
            if row.sex == Some(1) {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Linear predictor on the raw covariate scale; `beta` starts with the intercept.
pub(crate) fn linear_predictor(beta: &[f64], row: &CovariateRow, with_sex: bool) -> f64 {
    let mut eta = beta[0] + beta[1] * row.age;
    if with_sex && row.sex == Some(1) {
        eta += beta[2];
    }
    eta
}

/// `log(1 + exp(x))` without overflow.
pub(crate) fn softplus(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else if x < -30.0 {
        x.exp()
    } else {
        x.exp().ln_1p()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_data() -> SurvivalData {
        SurvivalData {
            rows: vec![
                CovariateRow { age: 50.0, sex: Some(0) },
                CovariateRow { age: 60.0, sex: Some(1) },
                CovariateRow { age: 70.0, sex: Some(1) },
            ],
            time: vec![100.0, 200.0, 300.0],
            status: vec![true, false, true],
            sex_levels: vec!["F".into(), "M".into()],
        }
    }

    #[test]
    fn test_design_centering() {
        let data = small_data();
        let design = Design::from_data(&data).unwrap();
        assert_eq!(design.names, vec!["(Intercept)", "age", "sexM"]);
        assert_eq!(design.covariates, vec!["age", "sex"]);
        assert_relative_eq!(design.means[1], 60.0);
        assert_relative_eq!(design.x.column(1).sum(), 0.0, epsilon = 1e-12);

        // Uncentred coefficients give the same linear predictor
        let beta = vec![0.5, 0.1, -0.3];
        let raw = design.uncenter(&beta);
        for (i, row) in data.rows.iter().enumerate() {
            let centred: f64 = (0..3).map(|j| design.x[(i, j)] * beta[j]).sum();
            assert_relative_eq!(linear_predictor(&raw, row, true), centred, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_design_single_sex() {
        let mut data = small_data();
        data.sex_levels = vec!["F".into()];
        for r in &mut data.rows {
            r.sex = Some(0);
        }
        let design = Design::from_data(&data).unwrap();
        assert_eq!(design.n_coef(), 2);
        assert_eq!(design.covariates, vec!["age"]);
    }

    #[test]
    fn test_resample_with_duplicates() {
        let data = small_data();
        let boot = data.resample(&[2, 2, 0]);
        assert_eq!(boot.len(), 3);
        assert_eq!(boot.time, vec![300.0, 300.0, 100.0]);
        assert_eq!(boot.n_events(), 3);
    }

    #[test]
    fn test_softplus() {
        assert_relative_eq!(softplus(0.0), 2f64.ln());
        assert_relative_eq!(softplus(100.0), 100.0);
        assert!(softplus(-100.0) > 0.0);
    }

    #[test]
    fn test_kind_serde() {
        let kind: SurvivalModelKind = serde_yaml::from_str("mixture_cure").unwrap();
        assert_eq!(kind, SurvivalModelKind::MixtureCure);
        assert!(kind.needs_population());
        assert_eq!(SurvivalModelKind::default().to_string(), "weibull");
    }
}
