//! Weibull proportional-hazards regression.
//!
//! `S(t | x) = exp(-exp(x'β) · t^k)` with shape `k = exp(γ)`. Fitted by
//! Newton-Raphson on the analytic score and Hessian, which keeps thousands of
//! bootstrap refits cheap.

use super::{linear_predictor, CovariateRow, Design, SurvivalData, SurvivalFit, SurvivalModel};
use super::MIN_SURVIVAL_TIME;
use crate::error::{PrevalenceError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Maximum Newton iterations.
const MAX_ITER: usize = 50;

/// Convergence tolerance on the largest parameter step.
const TOL: f64 = 1e-8;

/// Maximum number of step halvings per iteration.
const MAX_HALVINGS: usize = 30;

/// Weibull PH regression on age (and sex when two levels are present).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeibullModel {
    /// Maximum Newton iterations.
    pub max_iter: usize,
    /// Convergence tolerance.
    pub tol: f64,
}

impl Default for WeibullModel {
    fn default() -> Self {
        Self {
            max_iter: MAX_ITER,
            tol: TOL,
        }
    }
}

/// Log-likelihood, score and Hessian at `theta = (β, γ)` on centred design.
pub(crate) fn weibull_derivatives(
    x: &DMatrix<f64>,
    log_t: &[f64],
    status: &[bool],
    theta: &DVector<f64>,
) -> (f64, DVector<f64>, DMatrix<f64>) {
    let n = x.nrows();
    let p = x.ncols();
    let gamma = theta[p];
    let k = gamma.exp();

    let mut ll = 0.0;
    let mut grad = DVector::zeros(p + 1);
    let mut hess = DMatrix::zeros(p + 1, p + 1);

    for i in 0..n {
        let row = x.row(i);
        let eta: f64 = (0..p).map(|j| row[j] * theta[j]).sum();
        let kl = k * log_t[i];
        let u = (eta + kl).exp();
        let d = if status[i] { 1.0 } else { 0.0 };

        ll += d * (gamma + (k - 1.0) * log_t[i] + eta) - u;

        let r = d - u;
        for j in 0..p {
            grad[j] += r * row[j];
        }
        grad[p] += d * (1.0 + kl) - u * kl;

        for a in 0..p {
            for b in a..p {
                let v = -u * row[a] * row[b];
                hess[(a, b)] += v;
                if a != b {
                    hess[(b, a)] += v;
                }
            }
            let v = -u * kl * row[a];
            hess[(a, p)] += v;
            hess[(p, a)] += v;
        }
        hess[(p, p)] += d * kl - u * kl * kl - u * kl;
    }

    (ll, grad, hess)
}

fn weibull_log_likelihood(
    x: &DMatrix<f64>,
    log_t: &[f64],
    status: &[bool],
    theta: &DVector<f64>,
) -> f64 {
    let p = x.ncols();
    let gamma = theta[p];
    let k = gamma.exp();
    (0..x.nrows())
        .map(|i| {
            let eta: f64 = (0..p).map(|j| x[(i, j)] * theta[j]).sum();
            let u = (eta + k * log_t[i]).exp();
            let d = if status[i] { 1.0 } else { 0.0 };
            d * (gamma + (k - 1.0) * log_t[i] + eta) - u
        })
        .sum()
}

impl WeibullModel {
    /// Fit on a prepared design; returns centred `θ = (β, γ)`, log-likelihood and iterations.
    pub(crate) fn fit_centered(
        &self,
        design: &Design,
        data: &SurvivalData,
    ) -> Result<(DVector<f64>, f64, usize)> {
        let n_events = data.n_events();
        if n_events == 0 {
            return Err(PrevalenceError::Numerical(
                "Weibull fit requires at least one observed event".to_string(),
            ));
        }

        let log_t: Vec<f64> = data
            .time
            .iter()
            .map(|t| t.max(MIN_SURVIVAL_TIME).ln())
            .collect();
        let total_time: f64 = data.time.iter().map(|t| t.max(MIN_SURVIVAL_TIME)).sum();

        let p = design.n_coef();
        // Start from the exponential MLE
        let mut theta = DVector::zeros(p + 1);
        theta[0] = (n_events as f64 / total_time).ln();

        for iter in 0..self.max_iter {
            let (ll, grad, hess) = weibull_derivatives(&design.x, &log_t, &data.status, &theta);
            if !ll.is_finite() {
                return Err(PrevalenceError::Numerical(
                    "Weibull log-likelihood is not finite".to_string(),
                ));
            }

            // Newton direction; fall back to a scaled gradient step when -H is not PD
            let neg_hess = -hess;
            let mut step = match neg_hess.cholesky() {
                Some(chol) => chol.solve(&grad),
                None => &grad / (1.0 + grad.amax()),
            };

            let mut halvings = 0;
            loop {
                let candidate = &theta + &step;
                let new_ll =
                    weibull_log_likelihood(&design.x, &log_t, &data.status, &candidate);
                if new_ll.is_finite() && new_ll >= ll - 1e-10 {
                    break;
                }
                halvings += 1;
                if halvings > MAX_HALVINGS {
                    return Err(PrevalenceError::Convergence {
                        model: "weibull".to_string(),
                        iterations: iter + 1,
                    });
                }
                step /= 2.0;
            }

            theta += &step;
            if step.amax() < self.tol {
                let ll = weibull_log_likelihood(&design.x, &log_t, &data.status, &theta);
                return Ok((theta, ll, iter + 1));
            }
        }

        Err(PrevalenceError::Convergence {
            model: "weibull".to_string(),
            iterations: self.max_iter,
        })
    }
}

impl SurvivalModel for WeibullModel {
    fn name(&self) -> &str {
        "weibull"
    }

    fn fit(&self, data: &SurvivalData) -> Result<SurvivalFit> {
        let design = Design::from_data(data)?;
        let (theta, log_likelihood, iterations) = self.fit_centered(&design, data)?;
        let p = design.n_coef();

        let mut coefficients = design.uncenter(&theta.as_slice()[..p]);
        coefficients.push(theta[p]);

        let mut coefficient_names = design.names.clone();
        coefficient_names.push("log(shape)".to_string());

        Ok(SurvivalFit {
            model: self.name().to_string(),
            coefficient_names,
            coefficients,
            covariates: design.covariates,
            log_likelihood,
            iterations,
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
                (-(eta + shape * t.ln()).exp()).exp()
            })
            .collect())
    }
}
