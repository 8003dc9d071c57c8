//! Bootstrap refits of the survival model.
//!
//! Each iteration resamples the registry rows with replacement and refits the
//! model. Iterations run in parallel with rayon; every iteration draws from its
//! own generator seeded by index, so the draws do not depend on the number of
//! threads. Failed fits are discarded and counted.

use super::{task_seeds, CancelToken, SimRng};
use crate::error::{PrevalenceError, Result};
use crate::model::{SurvivalData, SurvivalFit, SurvivalModel};
use log::{debug, info, warn};
use nalgebra::DMatrix;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Survival-model coefficients from repeated refits on resampled data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapDraws {
    /// Names of the coefficients in each draw.
    pub coefficient_names: Vec<String>,
    /// Successful fits in shuffled order.
    pub fits: Vec<SurvivalFit>,
    /// Number of iterations requested.
    pub n_requested: usize,
    /// Number of iterations whose fit failed.
    pub n_failed: usize,
}

impl BootstrapDraws {
    /// Number of usable draws.
    pub fn len(&self) -> usize {
        self.fits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fits.is_empty()
    }

    /// Draws as a matrix, one row per draw.
    pub fn matrix(&self) -> DMatrix<f64> {
        let p = self.coefficient_names.len();
        DMatrix::from_fn(self.fits.len(), p, |i, j| {
            self.fits[i].coefficients.get(j).copied().unwrap_or(f64::NAN)
        })
    }

    /// Mean of each coefficient across draws.
    pub fn mean_coefficients(&self) -> Vec<f64> {
        let m = self.matrix();
        (0..m.ncols()).map(|j| m.column(j).mean()).collect()
    }
}

/// Fit the model once on the full sample.
pub fn fit_full(model: &dyn SurvivalModel, data: &SurvivalData) -> Result<SurvivalFit> {
    let fit = model.fit(data)?;
    debug!(
        "Full {} fit: {:?} = {:?} (log-likelihood {:.3})",
        model.name(),
        fit.coefficient_names,
        fit.coefficients,
        fit.log_likelihood
    );
    Ok(fit)
}

/// Resample indices `0..n` with replacement.
fn resample_indices(n: usize, rng: &mut SimRng) -> Vec<usize> {
    (0..n).map(|_| rng.random_range(0..n)).collect()
}

/// Refit `model` on `n_boot` resamples of `data`.
///
/// Fails with [`PrevalenceError::InsufficientDraws`] when fewer than
/// `ceil(min_success_fraction * n_boot)` fits succeed (and always when none
/// do), and with [`PrevalenceError::Cancelled`] when `cancel` fires.
pub fn fit_bootstrap(
    model: &dyn SurvivalModel,
    data: &SurvivalData,
    n_boot: usize,
    seed: u64,
    min_success_fraction: f64,
    cancel: &CancelToken,
) -> Result<BootstrapDraws> {
    if n_boot == 0 {
        return Err(PrevalenceError::InvalidParameter(
            "n_bootstrap must be at least 1".to_string(),
        ));
    }
    if data.is_empty() {
        return Err(PrevalenceError::EmptyData(
            "Cannot bootstrap an empty survival sample".to_string(),
        ));
    }

    // One seed per iteration plus one for the final shuffle
    let seeds = task_seeds(seed, n_boot + 1);
    let n = data.len();

    let outcomes: Vec<Result<SurvivalFit>> = seeds[..n_boot]
        .par_iter()
        .map(|&s| {
            if cancel.is_cancelled() {
                return Err(PrevalenceError::Cancelled);
            }
            let mut rng = SimRng::seed_from_u64(s);
            let resampled = data.resample(&resample_indices(n, &mut rng));
            model.fit(&resampled)
        })
        .collect();

    if cancel.is_cancelled() {
        return Err(PrevalenceError::Cancelled);
    }

    let mut fits = Vec::with_capacity(n_boot);
    let mut n_failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(fit) => fits.push(fit),
            Err(PrevalenceError::Cancelled) => return Err(PrevalenceError::Cancelled),
            Err(e) => {
                n_failed += 1;
                debug!("Bootstrap fit discarded: {}", e);
            }
        }
    }

    let required = ((min_success_fraction.clamp(0.0, 1.0) * n_boot as f64).ceil() as usize).max(1);
    if fits.len() < required {
        return Err(PrevalenceError::InsufficientDraws {
            successful: fits.len(),
            requested: n_boot,
            required,
        });
    }
    if n_failed > 0 {
        warn!(
            "{} of {} bootstrap fits of {} failed and were discarded",
            n_failed,
            n_boot,
            model.name()
        );
    }

    let mut rng = SimRng::seed_from_u64(seeds[n_boot]);
    fits.shuffle(&mut rng);

    let coefficient_names = fits[0].coefficient_names.clone();
    info!(
        "Bootstrap complete: {} draws of {} ({} failed)",
        fits.len(),
        model.name(),
        n_failed
    );

    Ok(BootstrapDraws {
        coefficient_names,
        fits,
        n_requested: n_boot,
        n_failed,
    })
}
