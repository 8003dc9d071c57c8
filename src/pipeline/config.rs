//! Run configuration.

use crate::error::{PrevalenceError, Result};
use crate::estimate::EstimateOptions;
use crate::incidence::IncidenceModelKind;
use crate::model::SurvivalModelKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Configuration of a prevalence run, loadable from YAML or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrevalenceConfig {
    /// Numbers of years of incidence to estimate prevalence for.
    pub num_years_to_estimate: Vec<usize>,
    /// Size of the population the registry covers.
    pub population_size: Option<f64>,
    /// First day of the registry; defaults to the earliest diagnosis.
    pub start_date: Option<NaiveDate>,
    /// Whole registry years to use; defaults to every complete year.
    pub num_registry_years: Option<usize>,
    /// Days after which survivors follow population mortality.
    pub cure_time: Option<f64>,
    /// Bootstrap refits of the survival model.
    pub n_bootstrap: usize,
    pub survival_model: SurvivalModelKind,
    pub incidence_model: IncidenceModelKind,
    /// Confidence level of the intervals.
    pub level: f64,
    /// Decimal places of reported rates.
    pub precision: u32,
    /// Rates are reported per this many people.
    pub proportion: f64,
    /// Worker threads; `None` uses the global rayon pool.
    pub n_threads: Option<usize>,
    pub seed: u64,
    /// Smallest share of bootstrap fits that must succeed.
    pub min_success_fraction: f64,
}

impl Default for PrevalenceConfig {
    fn default() -> Self {
        Self {
            num_years_to_estimate: vec![10],
            population_size: None,
            start_date: None,
            num_registry_years: None,
            cure_time: None,
            n_bootstrap: 1000,
            survival_model: SurvivalModelKind::default(),
            incidence_model: IncidenceModelKind::default(),
            level: 0.95,
            precision: 2,
            proportion: 1e5,
            n_threads: None,
            seed: 42,
            min_success_fraction: 0.9,
        }
    }
}

impl PrevalenceConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(PrevalenceError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(PrevalenceError::from)
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(PrevalenceError::from)
    }

    pub fn with_years(mut self, years: Vec<usize>) -> Self {
        self.num_years_to_estimate = years;
        self
    }

    pub fn with_population_size(mut self, population_size: f64) -> Self {
        self.population_size = Some(population_size);
        self
    }

    pub fn with_start_date(mut self, start_date: NaiveDate) -> Self {
        self.start_date = Some(start_date);
        self
    }

    pub fn with_registry_years(mut self, n: usize) -> Self {
        self.num_registry_years = Some(n);
        self
    }

    pub fn with_cure_time(mut self, days: f64) -> Self {
        self.cure_time = Some(days);
        self
    }

    pub fn with_bootstrap(mut self, n: usize) -> Self {
        self.n_bootstrap = n;
        self
    }

    pub fn with_survival_model(mut self, kind: SurvivalModelKind) -> Self {
        self.survival_model = kind;
        self
    }

    pub fn with_level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }

    pub fn with_threads(mut self, n: usize) -> Self {
        self.n_threads = Some(n);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Largest requested number of years.
    pub fn max_years(&self) -> usize {
        self.num_years_to_estimate.iter().copied().max().unwrap_or(0)
    }

    /// Reporting options for the point estimator.
    pub fn estimate_options(&self) -> EstimateOptions {
        EstimateOptions {
            population_size: self.population_size,
            level: self.level,
            proportion: self.proportion,
            precision: self.precision,
        }
    }

    /// Check every parameter before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.num_years_to_estimate.is_empty() {
            return Err(invalid("num_years_to_estimate must list at least one value"));
        }
        if let Some(&n) = self.num_years_to_estimate.iter().find(|&&n| n < 1) {
            return Err(invalid(format!(
                "num_years_to_estimate values must be at least 1, got {}",
                n
            )));
        }
        if let Some(n) = self.population_size {
            if !n.is_finite() || n <= 0.0 {
                return Err(invalid(format!("population_size must be positive, got {}", n)));
            }
        }
        if self.num_registry_years == Some(0) {
            return Err(invalid("num_registry_years must be at least 1"));
        }
        if let Some(t) = self.cure_time {
            if !t.is_finite() || t <= 0.0 {
                return Err(invalid(format!(
                    "cure_time must be a positive number of days, got {}",
                    t
                )));
            }
        }
        if self.n_bootstrap < 1 {
            return Err(invalid("n_bootstrap must be at least 1"));
        }
        if !(self.level > 0.0 && self.level < 1.0) {
            return Err(invalid(format!("level must be in (0, 1), got {}", self.level)));
        }
        if !self.proportion.is_finite() || self.proportion <= 0.0 {
            return Err(invalid(format!(
                "proportion must be positive, got {}",
                self.proportion
            )));
        }
        if self.n_threads == Some(0) {
            return Err(invalid("n_threads must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.min_success_fraction) {
            return Err(invalid(format!(
                "min_success_fraction must be in [0, 1], got {}",
                self.min_success_fraction
            )));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> PrevalenceError {
    PrevalenceError::InvalidParameter(msg.into())
}
