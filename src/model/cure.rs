//! Cure models.
//!
//! [`FixedCureModel`] switches any survival model to general-population
//! mortality after a fixed cure time. [`MixtureCureModel`] estimates a cured
//! fraction directly from the registry.

use super::optim::{maximize, OptimConfig};
use super::weibull::WeibullModel;
use super::{linear_predictor, softplus, CovariateRow, Design, SurvivalData, SurvivalFit};
use super::{SurvivalModel, MIN_SURVIVAL_TIME};
use crate::error::{PrevalenceError, Result};
use crate::mortality::PopulationSurvival;
use crate::simulate::DAYS_PER_YEAR;
use std::sync::Arc;

/// Disease survival up to `cure_time` days, population survival afterwards.
///
/// For `t > cure_time`:
/// `S(t) = S_inner(cure_time) · S_pop(age + cure_time / 365, t - cure_time)`.
#[derive(Debug, Clone)]
pub struct FixedCureModel {
    inner: Arc<dyn SurvivalModel>,
    cure_time: f64,
    population: Arc<PopulationSurvival>,
}

impl FixedCureModel {
    /// Wrap `inner` with a cure time in days.
    pub fn new(
        inner: Arc<dyn SurvivalModel>,
        cure_time: f64,
        population: Arc<PopulationSurvival>,
    ) -> Result<Self> {
        if !cure_time.is_finite() || cure_time <= 0.0 {
            return Err(PrevalenceError::InvalidParameter(format!(
                "cure_time must be a positive number of days, got {}",
                cure_time
            )));
        }
        Ok(Self {
            inner,
            cure_time,
            population,
        })
    }

    /// Cure time in days.
    pub fn cure_time(&self) -> f64 {
        self.cure_time
    }

    /// The wrapped disease model.
    pub fn inner(&self) -> &Arc<dyn SurvivalModel> {
        &self.inner
    }
}

impl SurvivalModel for FixedCureModel {
    fn name(&self) -> &str {
        "fixed_cure"
    }

    fn fit(&self, data: &SurvivalData) -> Result<SurvivalFit> {
        self.inner.fit(data)
    }

    fn covariate_names(&self, fit: &SurvivalFit) -> Vec<String> {
        self.inner.covariate_names(fit)
    }

    fn predict_survival(
        &self,
        fit: &SurvivalFit,
        rows: &[CovariateRow],
        times: &[f64],
    ) -> Result<Vec<f64>> {
        if rows.len() != times.len() {
            return Err(PrevalenceError::DimensionMismatch {
                expected: rows.len(),
                actual: times.len(),
            });
        }
        let clipped: Vec<f64> = times.iter().map(|&t| t.min(self.cure_time)).collect();
        let disease = self.inner.predict_survival(fit, rows, &clipped)?;

        Ok(rows
            .iter()
            .zip(times)
            .zip(disease)
            .map(|((row, &t), s)| {
                if t <= self.cure_time {
                    s
                } else {
                    let age_at_cure = row.age + self.cure_time / DAYS_PER_YEAR;
                    s * self.population.daily_survival_probability(
                        age_at_cure,
                        t - self.cure_time,
                        row.sex,
                    )
                }
            })
            .collect())
    }
}

/// Weibull mixture cure model.
///
/// `S(t) = S_pop(t) · (π + (1 - π) · S_w(t))` where `S_w` is a Weibull PH
/// survival on age (and sex) and `π = 1 / (1 + exp(-α))` is the cured
/// fraction. Background mortality is applied at prediction time only.
#[derive(Debug, Clone, Default)]
pub struct MixtureCureModel {
    population: Option<Arc<PopulationSurvival>>,
    /// Optimiser settings.
    pub optim: OptimConfig,
}

impl MixtureCureModel {
    pub fn new(population: Option<Arc<PopulationSurvival>>) -> Self {
        Self {
            population,
            optim: OptimConfig::default(),
        }
    }

    /// Cured fraction implied by a fit.
    pub fn cure_fraction(fit: &SurvivalFit) -> Option<f64> {
        fit.coefficient("logit(cure)")
            .map(|alpha| 1.0 / (1.0 + (-alpha).exp()))
    }
}

/// Bound on `logit(cure)`; cure fractions beyond it are indistinguishable
/// from 0 or 1.
const MAX_CURE_LOGIT: f64 = 20.0;

/// `log(exp(a) + exp(b))`.
fn log_add_exp(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    if m == f64::NEG_INFINITY {
        return m;
    }
    m + ((a - m).exp() + (b - m).exp()).ln()
}

impl SurvivalModel for MixtureCureModel {
    fn name(&self) -> &str {
        "mixture_cure"
    }

    fn fit(&self, data: &SurvivalData) -> Result<SurvivalFit> {
        let design = Design::from_data(data)?;
        let p = design.n_coef();
        let log_t: Vec<f64> = data
            .time
            .iter()
            .map(|t| t.max(MIN_SURVIVAL_TIME).ln())
            .collect();

        // Uncured component starts from the plain Weibull fit
        let (weibull_theta, _, _) = WeibullModel::default().fit_centered(&design, data)?;
        let mut start: Vec<f64> = weibull_theta.iter().copied().collect();
        start.push(-1.0);

        let log_lik = |theta: &[f64]| -> f64 {
            let gamma = theta[p];
            let alpha = theta[p + 1].clamp(-MAX_CURE_LOGIT, MAX_CURE_LOGIT);
            let k = gamma.exp();
            let log_cured = -softplus(-alpha);
            let log_uncured = -softplus(alpha);
            (0..design.x.nrows())
                .map(|i| {
                    let eta: f64 = (0..p).map(|j| design.x[(i, j)] * theta[j]).sum();
                    let u = (eta + k * log_t[i]).exp();
                    if data.status[i] {
                        log_uncured + gamma + (k - 1.0) * log_t[i] + eta - u
                    } else {
                        log_add_exp(log_cured, log_uncured - u)
                    }
                })
                .sum()
        };

        let result = maximize(self.name(), log_lik, &start, &self.optim)?;

        let mut coefficients = design.uncenter(&result.params[..p]);
        coefficients.push(result.params[p]);
        coefficients.push(result.params[p + 1].clamp(-MAX_CURE_LOGIT, MAX_CURE_LOGIT));
        let mut coefficient_names = design.names.clone();
        coefficient_names.push("log(shape)".to_string());
        coefficient_names.push("logit(cure)".to_string());

        Ok(SurvivalFit {
            model: self.name().to_string(),
            coefficient_names,
            coefficients,
            covariates: design.covariates,
            log_likelihood: result.value,
            iterations: result.iterations,
        })
    }

    fn predict_survival(
        &self,
        fit: &SurvivalFit,
        rows: &[CovariateRow],
        times: &[f64],
    ) -> Result<Vec<f64>> {
        if rows.len() != times.len() {
            return Err(PrevalenceError::DimensionMismatch {
                expected: rows.len(),
                actual: times.len(),
            });
        }
        let n_coef = fit.coefficients.len();
        if n_coef < 4 {
            return Err(PrevalenceError::InvalidParameter(format!(
                "mixture cure fit needs at least 4 coefficients, got {}",
                n_coef
            )));
        }
        let with_sex = fit.uses_sex();
        let shape = fit.coefficients[n_coef - 2].exp();
        let alpha = fit.coefficients[n_coef - 1];
        let cured = 1.0 / (1.0 + (-alpha).exp());

        Ok(rows
            .iter()
            .zip(times)
            .map(|(row, &t)| {
                if t <= 0.0 {
                    return 1.0;
                }
                let eta = linear_predictor(&fit.coefficients, row, with_sex);
                let s_w = (-(eta + shape * t.ln()).exp()).exp();
                let s_pop = self
                    .population
                    .as_ref()
                    .map(|pop| pop.daily_survival_probability(row.age, t, row.sex))
                    .unwrap_or(1.0);
                s_pop * (cured + (1.0 - cured) * s_w)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LifeTable, LifeTableRow};
    use crate::model::test_support::weibull_data;
    use crate::simulate::{fit_bootstrap, CancelToken, SimRng};
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};

    fn flat_population(rate: f64, levels: &[String]) -> Arc<PopulationSurvival> {
        let rows = (0..=100u32)
            .flat_map(|age| {
                ["F", "M"].into_iter().map(move |sex| LifeTableRow {
                    age,
                    sex: sex.to_string(),
                    rate,
                })
            })
            .collect();
        let table = LifeTable::new(rows).unwrap();
        Arc::new(PopulationSurvival::from_life_table(&table, levels).unwrap())
    }

    #[test]
    fn test_fixed_cure_matches_inner_before_cure() {
        let data = weibull_data(400, -8.0, 0.02, 0.2, 1.1, 3000.0, 9);
        let inner: Arc<dyn SurvivalModel> = Arc::new(WeibullModel::default());
        let pop = flat_population(0.01, &data.sex_levels);
        let cure = FixedCureModel::new(inner.clone(), 1000.0, pop.clone()).unwrap();
        let fit = cure.fit(&data).unwrap();

        let row = CovariateRow { age: 60.0, sex: Some(0) };
        let times = vec![10.0, 500.0, 1000.0, 2500.0];
        let rows = vec![row; times.len()];
        let wrapped = cure.predict_survival(&fit, &rows, &times).unwrap();
        let plain = inner.predict_survival(&fit, &rows, &times).unwrap();

        for i in 0..3 {
            assert_relative_eq!(wrapped[i], plain[i], epsilon = 1e-12);
        }
        let at_cure = plain[2];
        let expected =
            at_cure * pop.daily_survival_probability(60.0 + 1000.0 / DAYS_PER_YEAR, 1500.0, Some(0));
        assert_relative_eq!(wrapped[3], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_fixed_cure_raises_survival_with_low_population_hazard() {
        // Disease hazard far above a population rate of 0.1% per year
        let data = weibull_data(400, -6.0, 0.0, 0.0, 1.0, 3000.0, 2);
        let inner: Arc<dyn SurvivalModel> = Arc::new(WeibullModel::default());
        let cure =
            FixedCureModel::new(inner.clone(), 365.0, flat_population(0.001, &data.sex_levels))
                .unwrap();
        let fit = inner.fit(&data).unwrap();

        let rows = vec![CovariateRow { age: 50.0, sex: Some(1) }; 2];
        let times = [1000.0, 3000.0];
        let wrapped = cure.predict_survival(&fit, &rows, &times).unwrap();
        let plain = inner.predict_survival(&fit, &rows, &times).unwrap();
        assert!(wrapped[0] > plain[0]);
        assert!(wrapped[1] > plain[1]);
        assert!(wrapped[1] <= wrapped[0]);
    }

    #[test]
    fn test_fixed_cure_rejects_bad_time() {
        let inner: Arc<dyn SurvivalModel> = Arc::new(WeibullModel::default());
        let pop = flat_population(0.01, &[]);
        assert!(FixedCureModel::new(inner, 0.0, pop).is_err());
    }

    /// Weibull sample where a `cured` fraction never has the event.
    fn cure_data(n: usize, cured: f64, seed: u64) -> SurvivalData {
        let mut rng = SimRng::seed_from_u64(seed);
        let mut data = weibull_data(n, -8.0, 0.0, 0.0, 1.2, 5000.0, seed + 1);
        for i in 0..data.len() {
            if rng.random::<f64>() < cured {
                data.time[i] = 5000.0;
                data.status[i] = false;
            }
        }
        data
    }

    #[test]
    fn test_mixture_cure_recovers_fraction() {
        let data = cure_data(1500, 0.3, 13);

        let model = MixtureCureModel::new(None);
        let fit = model.fit(&data).unwrap();
        assert_eq!(fit.coefficient_names.last().unwrap(), "logit(cure)");
        let pi = MixtureCureModel::cure_fraction(&fit).unwrap();
        assert_relative_eq!(pi, 0.3, epsilon = 0.06);

        // Survival plateaus at the cured fraction without background mortality
        let row = CovariateRow { age: 60.0, sex: Some(0) };
        let probs = model.predict_survival(&fit, &[row], &[1.0e6]).unwrap();
        assert_relative_eq!(probs[0], pi, epsilon = 1e-6);
    }

    #[test]
    fn test_mixture_cure_applies_population_mortality() {
        let data = cure_data(600, 0.4, 4);
        let pop = flat_population(0.05, &data.sex_levels);
        let with_pop = MixtureCureModel::new(Some(pop));
        let without = MixtureCureModel::new(None);
        let fit = without.fit(&data).unwrap();

        let row = CovariateRow { age: 60.0, sex: Some(1) };
        let a = with_pop.predict_survival(&fit, &[row], &[3650.0]).unwrap()[0];
        let b = without.predict_survival(&fit, &[row], &[3650.0]).unwrap()[0];
        assert_relative_eq!(a, b * (-0.5f64).exp(), epsilon = 1e-9);
    }

    #[test]
    fn test_mixture_cure_without_cured_fraction() {
        // Exponential survival with administrative censoring only
        let data = weibull_data(300, -7.0, 0.0, 0.0, 1.0, 1825.0, 21);
        let model = MixtureCureModel::new(None);

        let fit = model.fit(&data).unwrap();
        assert!(MixtureCureModel::cure_fraction(&fit).unwrap() < 0.2);

        let draws = fit_bootstrap(&model, &data, 30, 8, 0.9, &CancelToken::new()).unwrap();
        assert!(draws.len() >= 27);
        assert_eq!(draws.len() + draws.n_failed, 30);
    }
}
