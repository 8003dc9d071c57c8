//! Damped Newton maximisation with finite-difference derivatives.
//!
//! Used by models without an analytic Hessian. Parameter counts are small
//! (a handful of coefficients), so the O(p²) likelihood evaluations per
//! iteration are affordable.

use crate::error::{PrevalenceError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Optimiser settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimConfig {
    /// Maximum Newton iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the largest parameter step, and on the
    /// relative change of the objective.
    pub tol: f64,
    /// Finite-difference step.
    pub h: f64,
    /// Maximum step halvings per iteration.
    pub max_halvings: usize,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-6,
            h: 1e-4,
            max_halvings: 40,
        }
    }
}

/// Result of a successful maximisation.
#[derive(Debug, Clone)]
pub struct OptimResult {
    /// Parameters at the optimum.
    pub params: Vec<f64>,
    /// Objective value at the optimum.
    pub value: f64,
    /// Iterations used.
    pub iterations: usize,
}

fn eval<F: Fn(&[f64]) -> f64>(f: &F, x: &DVector<f64>) -> f64 {
    let v = f(x.as_slice());
    if v.is_nan() {
        f64::NEG_INFINITY
    } else {
        v
    }
}

fn gradient<F: Fn(&[f64]) -> f64>(f: &F, x: &DVector<f64>, h: f64) -> DVector<f64> {
    let p = x.len();
    DVector::from_fn(p, |j, _| {
        let mut up = x.clone();
        let mut down = x.clone();
        up[j] += h;
        down[j] -= h;
        (eval(f, &up) - eval(f, &down)) / (2.0 * h)
    })
}

fn hessian<F: Fn(&[f64]) -> f64>(f: &F, x: &DVector<f64>, fx: f64, h: f64) -> DMatrix<f64> {
    let p = x.len();
    let mut hess = DMatrix::zeros(p, p);
    for a in 0..p {
        let mut up = x.clone();
        let mut down = x.clone();
        up[a] += h;
        down[a] -= h;
        hess[(a, a)] = (eval(f, &up) - 2.0 * fx + eval(f, &down)) / (h * h);

        for b in (a + 1)..p {
            let shifted = |da: f64, db: f64| {
                let mut y = x.clone();
                y[a] += da;
                y[b] += db;
                eval(f, &y)
            };
            let v = (shifted(h, h) - shifted(h, -h) - shifted(-h, h) + shifted(-h, -h))
                / (4.0 * h * h);
            hess[(a, b)] = v;
            hess[(b, a)] = v;
        }
    }
    hess
}

/// Maximise `f` starting from `x0`.
///
/// `model` names the caller in convergence errors.
pub fn maximize<F>(model: &str, f: F, x0: &[f64], config: &OptimConfig) -> Result<OptimResult>
where
    F: Fn(&[f64]) -> f64,
{
    let mut x = DVector::from_column_slice(x0);
    let mut fx = eval(&f, &x);
    if !fx.is_finite() {
        return Err(PrevalenceError::Numerical(format!(
            "{}: objective is not finite at the starting values",
            model
        )));
    }

    for iter in 0..config.max_iter {
        let grad = gradient(&f, &x, config.h);
        let hess = hessian(&f, &x, fx, config.h);

        let (mut step, newton) = match (-hess).cholesky() {
            Some(chol) => (chol.solve(&grad), true),
            None => (&grad / (1.0 + grad.amax()), false),
        };

        let mut halvings = 0;
        let (new_x, new_fx) = loop {
            let candidate = &x + &step;
            let value = eval(&f, &candidate);
            if value.is_finite() && value >= fx - 1e-10 {
                break (candidate, value);
            }
            halvings += 1;
            if halvings > config.max_halvings {
                return Err(PrevalenceError::Convergence {
                    model: model.to_string(),
                    iterations: iter + 1,
                });
            }
            step /= 2.0;
        };

        // A maximum on the boundary of the parameter space keeps the steps
        // large while the objective flattens out.
        let flat = newton && (new_fx - fx).abs() < config.tol * (fx.abs() + config.tol);
        x = new_x;
        fx = new_fx;

        if step.amax() < config.tol || flat {
            return Ok(OptimResult {
                params: x.iter().copied().collect(),
                value: fx,
                iterations: iter + 1,
            });
        }
    }

    Err(PrevalenceError::Convergence {
        model: model.to_string(),
        iterations: config.max_iter,
    })
}
