//! Year simulator.
//!
//! For one year offset, one bootstrap draw and one sex stratum, draws the
//! incident population of that year, ages it to the index date, and keeps the
//! individuals who survive. Year offset 0 is the year ending at the index date.

use super::{task_seeds, BootstrapDraws, CancelToken, SimRng, DAYS_PER_YEAR};
use crate::error::{PrevalenceError, Result};
use crate::incidence::{CovariatePool, IncidenceFit, IncidenceModel};
use crate::model::{CovariateRow, SurvivalFit, SurvivalModel};
use log::debug;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Simulated survivors of one year of diagnoses, per bootstrap draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyContribution {
    /// Year offset from the index date.
    pub year: usize,
    /// Survivors at the index date, one entry per draw.
    pub case_counts: Vec<usize>,
    /// Ages at the index date of the survivors, one sequence per draw.
    pub posterior_ages: Vec<Vec<f64>>,
}

/// Summary of the posterior age distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeSummary {
    pub n: usize,
    pub mean: f64,
    pub median: f64,
    pub lower_quartile: f64,
    pub upper_quartile: f64,
}

impl YearlyContribution {
    pub fn new(year: usize, n_draws: usize) -> Self {
        Self {
            year,
            case_counts: vec![0; n_draws],
            posterior_ages: vec![Vec::new(); n_draws],
        }
    }

    pub fn n_draws(&self) -> usize {
        self.case_counts.len()
    }

    /// Mean survivor count across draws.
    pub fn mean_cases(&self) -> f64 {
        if self.case_counts.is_empty() {
            return 0.0;
        }
        self.case_counts.iter().sum::<usize>() as f64 / self.case_counts.len() as f64
    }

    /// Sample variance of the survivor count across draws.
    pub fn case_variance(&self) -> f64 {
        sample_variance(self.case_counts.iter().map(|&c| c as f64))
    }

    /// Summary of every posterior age across all draws.
    pub fn posterior_age_summary(&self) -> Option<AgeSummary> {
        let mut ages: Vec<f64> = self.posterior_ages.iter().flatten().copied().collect();
        if ages.is_empty() {
            return None;
        }
        ages.sort_by(|a, b| a.total_cmp(b));
        let n = ages.len();
        Some(AgeSummary {
            n,
            mean: ages.iter().sum::<f64>() / n as f64,
            median: quantile(&ages, 0.5),
            lower_quartile: quantile(&ages, 0.25),
            upper_quartile: quantile(&ages, 0.75),
        })
    }
}

/// Sample variance with `n - 1` denominator; 0 for fewer than two values.
pub(crate) fn sample_variance(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Linear-interpolation quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// One sex stratum of the simulation.
#[derive(Debug, Clone)]
pub struct Stratum {
    /// Sex index, or `None` for an unstratified registry.
    pub sex: Option<usize>,
    /// Empirical covariates of the stratum.
    pub pool: CovariatePool,
    /// Incidence fitted on the stratum's diagnoses.
    pub incidence_fit: IncidenceFit,
    /// Observed diagnoses per registry year, offset 0 first.
    pub observed_counts: Vec<usize>,
}

/// Shared read-only inputs of a simulation run.
#[derive(Debug, Clone, Copy)]
pub struct SimulationContext<'a> {
    pub incidence: &'a dyn IncidenceModel,
    pub survival: &'a dyn SurvivalModel,
    pub draws: &'a BootstrapDraws,
    pub strata: &'a [Stratum],
    /// Number of year offsets to simulate, starting at 0.
    pub num_years: usize,
    pub required_covariates: &'a [String],
    pub cancel: &'a CancelToken,
}

/// Simulate one (year, draw, stratum) cell.
///
/// Returns the number of survivors and their ages at the index date.
pub fn simulate_year(
    ctx: &SimulationContext<'_>,
    stratum: &Stratum,
    year: usize,
    fit: &SurvivalFit,
    rng: &mut SimRng,
) -> Result<(usize, Vec<f64>)> {
    let year_start = year as f64 * DAYS_PER_YEAR;

    // Registry years keep their observed incidence; only the day is unknown
    let (rows, elapsed): (Vec<CovariateRow>, Vec<f64>) = match stratum.observed_counts.get(year) {
        Some(&count) => {
            stratum.pool.check(ctx.required_covariates)?;
            (0..count)
                .map(|_| {
                    let row = stratum.pool.sample_unchecked(rng);
                    let offset = DAYS_PER_YEAR - rng.random::<f64>() * DAYS_PER_YEAR;
                    (row, year_start + offset)
                })
                .unzip()
        }
        None => ctx
            .incidence
            .draw_incident_population(
                &stratum.incidence_fit,
                DAYS_PER_YEAR,
                ctx.required_covariates,
                &stratum.pool,
                rng,
            )?
            .into_iter()
            .map(|case| (case.covariates, year_start + DAYS_PER_YEAR - case.arrival_day))
            .unzip(),
    };

    if rows.is_empty() {
        return Ok((0, Vec::new()));
    }

    let survival = ctx.survival.predict_survival(fit, &rows, &elapsed)?;
    if survival.len() != rows.len() {
        return Err(PrevalenceError::InvalidModelOutput(format!(
            "{}: expected {} survival probabilities, got {}",
            ctx.survival.name(),
            rows.len(),
            survival.len()
        )));
    }

    let ages: Vec<f64> = rows
        .iter()
        .zip(&elapsed)
        .zip(&survival)
        .filter_map(|((row, &t), &s)| {
            let alive = rng.random::<f64>() < s;
            alive.then(|| row.age + t / DAYS_PER_YEAR)
        })
        .collect();

    Ok((ages.len(), ages))
}

/// Simulate every year offset for every draw and stratum, merged across strata.
///
/// (stratum, draw) tasks run in parallel, each seeded from `seed` by index.
pub fn simulate_contributions(
    ctx: &SimulationContext<'_>,
    seed: u64,
) -> Result<Vec<YearlyContribution>> {
    let n_draws = ctx.draws.len();
    if n_draws == 0 {
        return Err(PrevalenceError::EmptyData(
            "No bootstrap draws to simulate with".to_string(),
        ));
    }
    if ctx.strata.is_empty() {
        return Err(PrevalenceError::EmptyData(
            "No strata to simulate".to_string(),
        ));
    }

    let n_tasks = ctx.strata.len() * n_draws;
    let seeds = task_seeds(seed, n_tasks);

    let cells: Vec<Vec<(usize, Vec<f64>)>> = seeds
        .par_iter()
        .enumerate()
        .map(|(task, &s)| {
            if ctx.cancel.is_cancelled() {
                return Err(PrevalenceError::Cancelled);
            }
            let stratum = &ctx.strata[task / n_draws];
            let fit = &ctx.draws.fits[task % n_draws];
            let mut rng = SimRng::seed_from_u64(s);
            (0..ctx.num_years)
                .map(|year| simulate_year(ctx, stratum, year, fit, &mut rng))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let mut per_stratum = Vec::with_capacity(ctx.strata.len());
    let mut cells = cells.into_iter();
    for _ in ctx.strata {
        let mut years: Vec<YearlyContribution> = (0..ctx.num_years)
            .map(|y| YearlyContribution::new(y, n_draws))
            .collect();
        for d in 0..n_draws {
            let Some(task) = cells.next() else {
                return Err(PrevalenceError::DimensionMismatch {
                    expected: n_tasks,
                    actual: d,
                });
            };
            for (y, (count, ages)) in task.into_iter().enumerate() {
                years[y].case_counts[d] = count;
                years[y].posterior_ages[d] = ages;
            }
        }
        per_stratum.push(years);
    }

    let merged = merge_contributions(per_stratum)?;
    debug!(
        "Simulated {} years x {} draws x {} strata",
        ctx.num_years,
        n_draws,
        ctx.strata.len()
    );
    Ok(merged)
}

/// Combine per-stratum contributions.
///
/// Case counts are summed per draw and posterior ages concatenated per draw.
/// A single part is returned unchanged.
pub fn merge_contributions(
    parts: Vec<Vec<YearlyContribution>>,
) -> Result<Vec<YearlyContribution>> {
    let mut parts = parts.into_iter();
    let Some(mut merged) = parts.next() else {
        return Ok(Vec::new());
    };

    for part in parts {
        if part.len() != merged.len() {
            return Err(PrevalenceError::DimensionMismatch {
                expected: merged.len(),
                actual: part.len(),
            });
        }
        for (acc, other) in merged.iter_mut().zip(part) {
            if other.n_draws() != acc.n_draws() {
                return Err(PrevalenceError::DimensionMismatch {
                    expected: acc.n_draws(),
                    actual: other.n_draws(),
                });
            }
            for (c, o) in acc.case_counts.iter_mut().zip(&other.case_counts) {
                *c += o;
            }
            for (ages, more) in acc.posterior_ages.iter_mut().zip(other.posterior_ages) {
                ages.extend(more);
            }
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incidence::HomogeneousPoisson;
    use approx::assert_relative_eq;

    /// Survival model with constant daily hazard stored as its only coefficient.
    #[derive(Debug)]
    struct ExponentialModel;

    impl SurvivalModel for ExponentialModel {
        fn name(&self) -> &str {
            "exponential"
        }

        fn fit(&self, _data: &crate::model::SurvivalData) -> Result<SurvivalFit> {
            Ok(exp_fit(0.0))
        }

        fn predict_survival(
            &self,
            fit: &SurvivalFit,
            rows: &[CovariateRow],
            times: &[f64],
        ) -> Result<Vec<f64>> {
            let rate = fit.coefficients[0];
            Ok(rows.iter().zip(times).map(|(_, t)| (-rate * t).exp()).collect())
        }
    }

    fn exp_fit(rate: f64) -> SurvivalFit {
        SurvivalFit {
            model: "exponential".to_string(),
            coefficient_names: vec!["rate".to_string()],
            coefficients: vec![rate],
            covariates: vec!["age".to_string()],
            log_likelihood: 0.0,
            iterations: 0,
        }
    }

    fn draws(rates: &[f64]) -> BootstrapDraws {
        BootstrapDraws {
            coefficient_names: vec!["rate".to_string()],
            fits: rates.iter().map(|&r| exp_fit(r)).collect(),
            n_requested: rates.len(),
            n_failed: 0,
        }
    }

    fn stratum(sex: Option<usize>, observed: Vec<usize>, yearly: f64) -> Stratum {
        Stratum {
            sex,
            pool: CovariatePool::new(vec![50.0, 60.0, 70.0], sex).unwrap(),
            incidence_fit: IncidenceFit {
                model: "homogeneous_poisson".to_string(),
                parameter_names: vec![
                    "rate_per_day".to_string(),
                    "mean_yearly".to_string(),
                    "sd_yearly".to_string(),
                ],
                parameters: vec![yearly / DAYS_PER_YEAR, yearly, yearly.sqrt() / 5.0],
            },
            observed_counts: observed,
        }
    }

    #[test]
    fn test_no_deaths_keeps_observed_counts() {
        let strata = vec![stratum(None, vec![12, 7], 10.0)];
        let d = draws(&[0.0, 0.0]);
        let required = vec!["age".to_string()];
        let cancel = CancelToken::new();
        let ctx = SimulationContext {
            incidence: &HomogeneousPoisson,
            survival: &ExponentialModel,
            draws: &d,
            strata: &strata,
            num_years: 2,
            required_covariates: &required,
            cancel: &cancel,
        };
        let out = simulate_contributions(&ctx, 1).unwrap();
        assert_eq!(out[0].case_counts, vec![12, 12]);
        assert_eq!(out[1].case_counts, vec![7, 7]);

        // Ages at index are shifted by the elapsed time
        for ages in &out[1].posterior_ages {
            for a in ages {
                let shift = a - 10.0 * (a / 10.0).floor();
                assert!(shift > 1.0 && shift <= 2.0 + 1e-12, "shift {}", shift);
            }
        }
    }

    #[test]
    fn test_certain_death_gives_zero() {
        let strata = vec![stratum(None, vec![20], 30.0)];
        let d = draws(&[1e6]);
        let required = vec!["age".to_string()];
        let cancel = CancelToken::new();
        let ctx = SimulationContext {
            incidence: &HomogeneousPoisson,
            survival: &ExponentialModel,
            draws: &d,
            strata: &strata,
            num_years: 3,
            required_covariates: &required,
            cancel: &cancel,
        };
        let out = simulate_contributions(&ctx, 2).unwrap();
        assert!(out.iter().all(|y| y.case_counts == vec![0]));
        assert!(out[2].posterior_age_summary().is_none());
    }

    #[test]
    fn test_simulated_years_follow_incidence() {
        let strata = vec![stratum(None, vec![], 100.0)];
        let d = draws(&vec![0.0; 300]);
        let required = vec!["age".to_string()];
        let cancel = CancelToken::new();
        let ctx = SimulationContext {
            incidence: &HomogeneousPoisson,
            survival: &ExponentialModel,
            draws: &d,
            strata: &strata,
            num_years: 1,
            required_covariates: &required,
            cancel: &cancel,
        };
        let out = simulate_contributions(&ctx, 3).unwrap();
        assert_relative_eq!(out[0].mean_cases(), 100.0, epsilon = 3.0);
        assert!(out[0].case_variance() > 0.0);
    }

    #[test]
    fn test_reproducible_and_stratum_merge() {
        let strata = vec![stratum(Some(0), vec![5, 5], 8.0), stratum(Some(1), vec![3, 4], 6.0)];
        let d = draws(&[0.0002, 0.0004, 0.0003]);
        let required = vec!["age".to_string(), "sex".to_string()];
        let cancel = CancelToken::new();
        let ctx = SimulationContext {
            incidence: &HomogeneousPoisson,
            survival: &ExponentialModel,
            draws: &d,
            strata: &strata,
            num_years: 4,
            required_covariates: &required,
            cancel: &cancel,
        };
        let a = simulate_contributions(&ctx, 11).unwrap();
        let b = simulate_contributions(&ctx, 11).unwrap();
        assert_eq!(a, b);
        for year in &a {
            for (count, ages) in year.case_counts.iter().zip(&year.posterior_ages) {
                assert_eq!(*count, ages.len());
            }
        }
    }

    #[test]
    fn test_merge_contributions() {
        let a = vec![YearlyContribution {
            year: 0,
            case_counts: vec![1, 2],
            posterior_ages: vec![vec![50.0], vec![60.0, 61.0]],
        }];
        let b = vec![YearlyContribution {
            year: 0,
            case_counts: vec![3, 0],
            posterior_ages: vec![vec![40.0, 41.0, 42.0], vec![]],
        }];
        let merged = merge_contributions(vec![a.clone(), b]).unwrap();
        assert_eq!(merged[0].case_counts, vec![4, 2]);
        assert_eq!(merged[0].posterior_ages[0], vec![50.0, 40.0, 41.0, 42.0]);

        // Degenerate merge is the identity
        assert_eq!(merge_contributions(vec![a.clone()]).unwrap(), a);

        let short = vec![YearlyContribution::new(0, 1)];
        assert!(merge_contributions(vec![a, short]).is_err());
    }

    #[test]
    fn test_summary_statistics() {
        let year = YearlyContribution {
            year: 1,
            case_counts: vec![2, 4, 6],
            posterior_ages: vec![vec![50.0, 60.0], vec![], vec![70.0]],
        };
        assert_relative_eq!(year.mean_cases(), 4.0);
        assert_relative_eq!(year.case_variance(), 4.0);
        let summary = year.posterior_age_summary().unwrap();
        assert_eq!(summary.n, 3);
        assert_relative_eq!(summary.median, 60.0);
        assert_relative_eq!(summary.lower_quartile, 55.0);
    }

    #[test]
    fn test_cancelled() {
        let strata = vec![stratum(None, vec![1], 1.0)];
        let d = draws(&[0.0]);
        let required = vec!["age".to_string()];
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = SimulationContext {
            incidence: &HomogeneousPoisson,
            survival: &ExponentialModel,
            draws: &d,
            strata: &strata,
            num_years: 1,
            required_covariates: &required,
            cancel: &cancel,
        };
        assert!(matches!(
            simulate_contributions(&ctx, 0),
            Err(PrevalenceError::Cancelled)
        ));
    }
}
