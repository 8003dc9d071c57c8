//! Log-logistic accelerated failure time regression.
//!
//! `S(t | x) = 1 / (1 + (t / exp(x'β))^k)` with `k = exp(γ)`.

use super::optim::{maximize, OptimConfig};
use super::{linear_predictor, softplus, CovariateRow, Design, SurvivalData, SurvivalFit};
use super::{SurvivalModel, MIN_SURVIVAL_TIME};
use crate::error::{PrevalenceError, Result};
use serde::{Deserialize, Serialize};

/// Log-logistic AFT model on age (and sex when two levels are present).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogLogisticModel {
    /// Optimiser settings.
    pub optim: OptimConfig,
}

impl SurvivalModel for LogLogisticModel {
    fn name(&self) -> &str {
        "log_logistic"
    }

    fn fit(&self, data: &SurvivalData) -> Result<SurvivalFit> {
        let design = Design::from_data(data)?;
        if data.n_events() == 0 {
            return Err(PrevalenceError::Numerical(
                "Log-logistic fit requires at least one observed event".to_string(),
            ));
        }
        let p = design.n_coef();
        let log_t: Vec<f64> = data
            .time
            .iter()
            .map(|t| t.max(MIN_SURVIVAL_TIME).ln())
            .collect();

        let log_lik = |theta: &[f64]| -> f64 {
            let gamma = theta[p];
            let k = gamma.exp();
            (0..design.x.nrows())
                .map(|i| {
                    let eta: f64 = (0..p).map(|j| design.x[(i, j)] * theta[j]).sum();
                    let z = k * (log_t[i] - eta);
                    if data.status[i] {
                        // log f = log k - log t + z - 2 log(1 + e^z)
                        gamma - log_t[i] + z - 2.0 * softplus(z)
                    } else {
                        -softplus(z)
                    }
                })
                .sum()
        };

        let mut start = vec![0.0; p + 1];
        start[0] = log_t.iter().sum::<f64>() / log_t.len() as f64;

        let result = maximize(self.name(), log_lik, &start, &self.optim)?;

        let mut coefficients = design.uncenter(&result.params[..p]);
        coefficients.push(result.params[p]);
        let mut coefficient_names = design.names.clone();
        coefficient_names.push("log(shape)".to_string());

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
        let with_sex = fit.uses_sex();
        let shape = fit.coefficients.last().copied().unwrap_or(0.0).exp();

        Ok(rows
            .iter()
            .zip(times)
            .map(|(row, &t)| {
                if t <= 0.0 {
                    return 1.0;
                }
                let eta = linear_predictor(&fit.coefficients, row, with_sex);
                let z = shape * (t.ln() - eta);
                (-softplus(z)).exp()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::SimRng;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};

    /// Log-logistic AFT sample: log T = eta + logistic noise / k.
    fn loglogistic_data(n: usize, b0: f64, b_age: f64, shape: f64, seed: u64) -> SurvivalData {
        let mut rng = SimRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        let mut time = Vec::new();
        let mut status = Vec::new();
        for _ in 0..n {
            let age = 40.0 + 40.0 * rng.random::<f64>();
            let u: f64 = rng.random::<f64>().clamp(1e-9, 1.0 - 1e-9);
            let log_t = b0 + b_age * age + (u / (1.0 - u)).ln() / shape;
            let t = log_t.exp();
            rows.push(CovariateRow { age, sex: None });
            if t > 8000.0 {
                time.push(8000.0);
                status.push(false);
            } else {
                time.push(t);
                status.push(true);
            }
        }
        SurvivalData {
            rows,
            time,
            status,
            sex_levels: Vec::new(),
        }
    }

    #[test]
    fn test_loglogistic_recovers_parameters() {
        let data = loglogistic_data(1500, 8.0, -0.02, 1.5, 21);
        let model = LogLogisticModel::default();
        let fit = model.fit(&data).unwrap();

        assert_eq!(fit.coefficient_names, vec!["(Intercept)", "age", "log(shape)"]);
        assert_relative_eq!(fit.coefficient("log(shape)").unwrap().exp(), 1.5, epsilon = 0.15);
        assert_relative_eq!(fit.coefficient("age").unwrap(), -0.02, epsilon = 0.01);
        assert_relative_eq!(fit.coefficient("(Intercept)").unwrap(), 8.0, epsilon = 0.5);
    }

    #[test]
    fn test_loglogistic_median() {
        let data = loglogistic_data(600, 7.0, 0.0, 2.0, 4);
        let model = LogLogisticModel::default();
        let fit = model.fit(&data).unwrap();

        // At t = exp(eta) survival is exactly one half
        let row = CovariateRow { age: 50.0, sex: None };
        let eta = linear_predictor(&fit.coefficients, &row, false);
        let probs = model.predict_survival(&fit, &[row], &[eta.exp()]).unwrap();
        assert_relative_eq!(probs[0], 0.5, epsilon = 1e-10);
    }
}
