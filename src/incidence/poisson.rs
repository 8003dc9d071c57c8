//! Homogeneous Poisson incidence.

use super::{CovariatePool, IncidenceData, IncidenceFit, IncidenceModel, IncidentCase};
use crate::error::{PrevalenceError, Result};
use crate::simulate::{SimRng, DAYS_PER_YEAR};
use rand_distr::{Distribution, Exp, Normal};

/// Constant daily diagnosis rate estimated as count / elapsed days.
///
/// Each draw first perturbs the yearly rate with
/// `Normal(mean, sqrt(mean) / n_registry_years)`, clipped at zero, so the
/// simulated years carry the uncertainty of the rate estimate. Arrivals are
/// then exponential gaps at the perturbed rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomogeneousPoisson;

const MEAN_YEARLY: usize = 1;
const SD_YEARLY: usize = 2;

impl IncidenceModel for HomogeneousPoisson {
    fn name(&self) -> &str {
        "homogeneous_poisson"
    }

    fn fit(&self, data: &IncidenceData) -> Result<IncidenceFit> {
        let count = data.n_diagnoses();
        if count == 0 {
            return Err(PrevalenceError::EmptyData(
                "No diagnoses inside the registry window to estimate incidence".to_string(),
            ));
        }
        let elapsed = data.elapsed_days();
        if elapsed <= 0.0 || data.num_registry_years == 0 {
            return Err(PrevalenceError::InvalidParameter(format!(
                "registry window must span at least one year, got {} days",
                elapsed
            )));
        }

        let rate_per_day = count as f64 / elapsed;
        let mean_yearly = count as f64 / data.num_registry_years as f64;
        let sd_yearly = mean_yearly.sqrt() / data.num_registry_years as f64;

        Ok(IncidenceFit {
            model: self.name().to_string(),
            parameter_names: vec![
                "rate_per_day".to_string(),
                "mean_yearly".to_string(),
                "sd_yearly".to_string(),
            ],
            parameters: vec![rate_per_day, mean_yearly, sd_yearly],
        })
    }

    fn draw_incident_population(
        &self,
        fit: &IncidenceFit,
        timeframe_days: f64,
        required_covariates: &[String],
        pool: &CovariatePool,
        rng: &mut SimRng,
    ) -> Result<Vec<IncidentCase>> {
        if fit.parameters.len() != 3 {
            return Err(PrevalenceError::DimensionMismatch {
                expected: 3,
                actual: fit.parameters.len(),
            });
        }
        pool.check(required_covariates)?;

        let mean = fit.parameters[MEAN_YEARLY];
        let sd = fit.parameters[SD_YEARLY];

        let perturbed = Normal::new(mean, sd)
            .map_err(|e| PrevalenceError::Numerical(format!("yearly rate distribution: {}", e)))?
            .sample(rng)
            .max(0.0);
        // A simulated year is DAYS_PER_YEAR long, so the perturbed yearly
        // count is spread over exactly that many days.
        let daily = perturbed / DAYS_PER_YEAR;
        if daily <= 0.0 || timeframe_days <= 0.0 {
            return Ok(Vec::new());
        }

        let gaps = Exp::new(daily)
            .map_err(|e| PrevalenceError::Numerical(format!("inter-arrival distribution: {}", e)))?;

        // Over-sample so one batch usually covers the timeframe
        let expected = daily * timeframe_days;
        let batch = (expected * 1.5).ceil() as usize + 10;

        let mut arrivals = Vec::with_capacity(batch);
        let mut t = 0.0;
        'outer: loop {
            for _ in 0..batch {
                t += gaps.sample(rng);
                if t >= timeframe_days {
                    break 'outer;
                }
                arrivals.push(t);
            }
        }

        Ok(arrivals
            .into_iter()
            .map(|arrival_day| IncidentCase {
                arrival_day,
                covariates: pool.sample_unchecked(rng),
            })
            .collect())
    }
}

impl HomogeneousPoisson {
    /// Expected cases in one simulated year.
    pub fn expected_yearly(fit: &IncidenceFit) -> f64 {
        fit.parameters.get(MEAN_YEARLY).copied().unwrap_or(0.0)
    }
}
