//! Prevalence runner.
//!
//! Ties the pieces together: counts the registry, decides whether simulation
//! is needed, fits and bootstraps the survival model, simulates the years
//! outside the registry and aggregates everything into estimates.

use super::PrevalenceConfig;
use crate::data::{LifeTable, PrevalenceResult, Registry};
use crate::error::{PrevalenceError, Result};
use crate::estimate::point_estimate;
use crate::incidence::{
    counted_prevalence, default_num_registry_years, determine_registry_years, raw_incidence,
    validate_incidence_model, CovariatePool, IncidenceData, IncidenceModel,
};
use crate::model::{validate_survival_model, FixedCureModel, SurvivalData, SurvivalModel};
use crate::mortality::PopulationSurvival;
use crate::simulate::{
    fit_bootstrap, fit_full, simulate_contributions, task_seeds, CancelToken, SimRng,
    SimulationContext, Stratum, YearlyContribution,
};
use crate::test::exact_poisson_test;
use chrono::NaiveDate;
use log::{debug, info};
use rand::SeedableRng;
use std::sync::Arc;

/// Builder for configuring and running a prevalence estimate.
#[derive(Debug, Clone, Default)]
pub struct Prevalence {
    config: PrevalenceConfig,
    survival_model: Option<Arc<dyn SurvivalModel>>,
    incidence_model: Option<Arc<dyn IncidenceModel>>,
    life_table: Option<LifeTable>,
    cancel: CancelToken,
}

/// Registry window shared by every phase of a run.
struct Window {
    start: NaiveDate,
    index: NaiveDate,
    years: usize,
}

impl Prevalence {
    /// Create a runner with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a config.
    pub fn from_config(config: &PrevalenceConfig) -> Self {
        Self {
            config: config.clone(),
            ..Self::default()
        }
    }

    pub fn config(&self) -> &PrevalenceConfig {
        &self.config
    }

    /// Estimate prevalence for these numbers of years.
    pub fn years(mut self, years: &[usize]) -> Self {
        self.config.num_years_to_estimate = years.to_vec();
        self
    }

    pub fn population_size(mut self, n: f64) -> Self {
        self.config.population_size = Some(n);
        self
    }

    pub fn cure_time(mut self, days: f64) -> Self {
        self.config.cure_time = Some(days);
        self
    }

    pub fn n_bootstrap(mut self, n: usize) -> Self {
        self.config.n_bootstrap = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Use a caller-supplied survival model instead of the configured one.
    pub fn survival_model(mut self, model: Arc<dyn SurvivalModel>) -> Self {
        self.survival_model = Some(model);
        self
    }

    /// Use a caller-supplied incidence model instead of the configured one.
    pub fn incidence_model(mut self, model: Arc<dyn IncidenceModel>) -> Self {
        self.incidence_model = Some(model);
        self
    }

    /// Life table for population mortality; defaults to the bundled table.
    pub fn life_table(mut self, table: LifeTable) -> Self {
        self.life_table = Some(table);
        self
    }

    /// Token that cancels the run from another thread.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run on a registry.
    pub fn run(&self, registry: &Registry) -> Result<PrevalenceResult> {
        self.config.validate()?;

        match self.config.n_threads {
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| PrevalenceError::ThreadPool(e.to_string()))?;
                debug!("Running on a dedicated pool of {} threads", n);
                pool.install(|| self.run_inner(registry))
            }
            None => self.run_inner(registry),
        }
    }

    fn window(&self, registry: &Registry) -> Result<Window> {
        let start = self.config.start_date.unwrap_or_else(|| registry.earliest_entry());
        let years = match self.config.num_registry_years {
            Some(n) => n,
            None => default_num_registry_years(start, registry.latest_entry()),
        };
        if years == 0 {
            return Err(PrevalenceError::InvalidParameter(format!(
                "num_registry_years: the registry from {} to {} does not cover a whole year",
                start,
                registry.latest_entry()
            )));
        }
        let boundaries = determine_registry_years(start, years)?;
        Ok(Window {
            start,
            index: boundaries[years],
            years,
        })
    }

    fn run_inner(&self, registry: &Registry) -> Result<PrevalenceResult> {
        let config = &self.config;
        let window = self.window(registry)?;
        info!(
            "Registry of {} records, {} sex level(s), {} years from {} to {}",
            registry.len(),
            registry.sex_levels().len(),
            window.years,
            window.start,
            window.index
        );

        let incidence_counts = raw_incidence(&registry.entry_dates(), window.start, window.years)?;
        let counted = counted_prevalence(registry, window.start, window.years)?;
        let counted_total: usize = counted.iter().sum();
        let known_incidence_rate = config.population_size.map(|n| {
            incidence_counts
                .iter()
                .map(|&c| c as f64 / n * config.proportion)
                .collect()
        });

        let options = config.estimate_options();
        let incidence_name = match &self.incidence_model {
            Some(m) => m.name().to_string(),
            None => config.incidence_model.to_string(),
        };

        if config.max_years() <= window.years {
            info!(
                "All requested years lie inside the registry; counting only ({} prevalent)",
                counted_total
            );
            let estimates = config
                .num_years_to_estimate
                .iter()
                .map(|&n| point_estimate(n, &counted, None, &options))
                .collect::<Result<Vec<_>>>()?;
            let survival_name = match &self.survival_model {
                Some(m) => m.name().to_string(),
                None => config.survival_model.to_string(),
            };

            return Ok(PrevalenceResult {
                estimates,
                simulated: None,
                counted,
                start_date: window.start,
                index_date: window.index,
                num_registry_years: window.years,
                incidence_counts,
                known_incidence_rate,
                population_size: config.population_size,
                proportion: config.proportion,
                bootstrap: None,
                full_fit: None,
                goodness_of_fit: exact_poisson_test(counted_total as u64, counted_total as f64)?,
                survival_model: survival_name,
                incidence_model: incidence_name,
            });
        }

        let survival = self.build_survival_model(registry)?;
        let incidence = self
            .incidence_model
            .clone()
            .unwrap_or_else(|| config.incidence_model.build());

        let seeds = task_seeds(config.seed, 3);
        let (bootstrap_seed, simulation_seed, validation_seed) = (seeds[0], seeds[1], seeds[2]);

        let data = SurvivalData::from_registry(registry);
        let full_fit = fit_full(survival.as_ref(), &data)?;
        validate_survival_model(survival.as_ref(), &full_fit, &data)?;
        let required = survival.covariate_names(&full_fit);

        let draws = fit_bootstrap(
            survival.as_ref(),
            &data,
            config.n_bootstrap,
            bootstrap_seed,
            config.min_success_fraction,
            &self.cancel,
        )?;

        let strata = build_strata(registry, incidence.as_ref(), &window)?;
        let mut rng = SimRng::seed_from_u64(validation_seed);
        for stratum in &strata {
            validate_incidence_model(
                incidence.as_ref(),
                &stratum.incidence_fit,
                &required,
                &stratum.pool,
                &mut rng,
            )?;
        }

        let ctx = SimulationContext {
            incidence: incidence.as_ref(),
            survival: survival.as_ref(),
            draws: &draws,
            strata: &strata,
            num_years: config.max_years(),
            required_covariates: &required,
            cancel: &self.cancel,
        };
        let simulated = simulate_contributions(&ctx, simulation_seed)?;
        info!(
            "Simulated {} years over {} draws",
            simulated.len(),
            draws.len()
        );

        let estimates = config
            .num_years_to_estimate
            .iter()
            .map(|&n| point_estimate(n, &counted, Some(&simulated), &options))
            .collect::<Result<Vec<_>>>()?;

        let goodness_of_fit = exact_poisson_test(
            counted_total as u64,
            simulated_registry_mean(&simulated, window.years),
        )?;
        debug!(
            "Goodness of fit: counted {} vs simulated {:.2}, p = {:.4}",
            goodness_of_fit.observed, goodness_of_fit.expected, goodness_of_fit.p_value
        );

        Ok(PrevalenceResult {
            estimates,
            simulated: Some(simulated),
            counted,
            start_date: window.start,
            index_date: window.index,
            num_registry_years: window.years,
            incidence_counts,
            known_incidence_rate,
            population_size: config.population_size,
            proportion: config.proportion,
            bootstrap: Some(draws),
            full_fit: Some(full_fit),
            goodness_of_fit,
            survival_model: survival.name().to_string(),
            incidence_model: incidence.name().to_string(),
        })
    }

    /// The survival model of the run, wrapped in a fixed cure when configured.
    fn build_survival_model(&self, registry: &Registry) -> Result<Arc<dyn SurvivalModel>> {
        let config = &self.config;
        let needs_population = config.cure_time.is_some()
            || (self.survival_model.is_none() && config.survival_model.needs_population());

        let population = if needs_population {
            let table = self.life_table.clone().unwrap_or_default();
            Some(Arc::new(PopulationSurvival::from_life_table(
                &table,
                registry.sex_levels(),
            )?))
        } else {
            None
        };

        let base = match &self.survival_model {
            Some(model) => model.clone(),
            None => config.survival_model.build(population.clone()),
        };

        match (config.cure_time, population) {
            (Some(cure_time), Some(population)) => {
                debug!("Survival switches to population mortality after {} days", cure_time);
                Ok(Arc::new(FixedCureModel::new(base, cure_time, population)?))
            }
            _ => Ok(base),
        }
    }
}

/// One stratum per sex level, or a single stratum for unstratified registries.
fn build_strata(
    registry: &Registry,
    incidence: &dyn IncidenceModel,
    window: &Window,
) -> Result<Vec<Stratum>> {
    let sexes: Vec<Option<usize>> = if registry.is_stratified() {
        (0..registry.sex_levels().len()).map(Some).collect()
    } else {
        vec![None]
    };

    sexes
        .into_iter()
        .map(|sex| {
            let records = registry.stratum(sex);
            let entry_dates: Vec<NaiveDate> = records.iter().map(|r| r.entry_date).collect();
            let data = IncidenceData {
                entry_dates,
                start_date: window.start,
                index_date: window.index,
                num_registry_years: window.years,
            };
            let incidence_fit = incidence.fit(&data)?;
            let mut observed_counts = raw_incidence(&data.entry_dates, window.start, window.years)?;
            observed_counts.reverse();
            debug!(
                "Stratum {:?}: {} diagnoses, incidence {:?}",
                sex, records.len(), incidence_fit.parameters
            );
            Ok(Stratum {
                sex,
                pool: CovariatePool::from_records(&records, sex)?,
                incidence_fit,
                observed_counts,
            })
        })
        .collect()
}

/// Mean simulated prevalence over the registry years.
fn simulated_registry_mean(simulated: &[YearlyContribution], registry_years: usize) -> f64 {
    simulated
        .iter()
        .take(registry_years)
        .map(|y| y.mean_cases())
        .sum()
}

/// Run a prevalence estimate with a configuration.
pub fn estimate_prevalence(
    registry: &Registry,
    config: &PrevalenceConfig,
) -> Result<PrevalenceResult> {
    Prevalence::from_config(config).run(registry)
}
