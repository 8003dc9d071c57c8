//! Aggregation of counted and simulated contributions.
//!
//! For `n` requested years and `R` registry years:
//!
//! - `n <= R`: the estimate is the counted prevalence of the `n` most recent
//!   years, with binomial variance `p(1 - p) / N`.
//! - `n > R`: all counted years plus the mean over draws of the simulated
//!   years `R..n`. The draw-to-draw variance of the simulated sum, divided by
//!   `N²`, is added to the binomial variance.
//!
//! The interval is `rate ± z · sqrt(var) · unit`.

use crate::error::{PrevalenceError, Result};
use crate::simulate::year::sample_variance;
use crate::simulate::YearlyContribution;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;

/// Reporting options for [`point_estimate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateOptions {
    /// Population size; without it no rate or interval is reported.
    pub population_size: Option<f64>,
    /// Confidence level in (0, 1).
    pub level: f64,
    /// Rates are reported per this many people.
    pub proportion: f64,
    /// Decimal places of the reported rate and interval.
    pub precision: u32,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            population_size: None,
            level: 0.95,
            proportion: 1e5,
            precision: 2,
        }
    }
}

/// Prevalence for one number of years.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrevalenceEstimate {
    /// Years of incidence the estimate covers.
    pub years: usize,
    /// Estimated number of prevalent cases.
    pub absolute_prevalence: f64,
    /// Prevalence per `proportion` people.
    pub per_unit: Option<f64>,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
}

impl fmt::Display for PrevalenceEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-year: {:.1} cases", self.years, self.absolute_prevalence)?;
        if let (Some(rate), Some(lo), Some(hi)) = (self.per_unit, self.ci_lower, self.ci_upper) {
            write!(f, ", {} per unit ({} - {})", rate, lo, hi)?;
        }
        Ok(())
    }
}

/// Two-sided standard normal quantile for a confidence level.
pub fn z_value(level: f64) -> Result<f64> {
    if !(level > 0.0 && level < 1.0) {
        return Err(PrevalenceError::InvalidParameter(format!(
            "level must be in (0, 1), got {}",
            level
        )));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| PrevalenceError::Numerical(e.to_string()))?;
    Ok(normal.inverse_cdf(1.0 - (1.0 - level) / 2.0))
}

/// Round to `precision` decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Prevalence over the `years` most recent years of incidence.
///
/// `counted` holds the registry contributions with offset 0 first, so its
/// length is the number of registry years. `simulated` must cover offsets up
/// to `years - 1` when `years` exceeds it.
pub fn point_estimate(
    years: usize,
    counted: &[usize],
    simulated: Option<&[YearlyContribution]>,
    options: &EstimateOptions,
) -> Result<PrevalenceEstimate> {
    if years == 0 {
        return Err(PrevalenceError::InvalidParameter(
            "num_years_to_estimate must be at least 1".to_string(),
        ));
    }
    let registry_years = counted.len();

    let counted_total = counted.iter().take(years).sum::<usize>() as f64;
    let (absolute, simulated_variance) = if years <= registry_years {
        (counted_total, 0.0)
    } else {
        let simulated = simulated.ok_or_else(|| {
            PrevalenceError::InvalidParameter(format!(
                "num_years_to_estimate = {} exceeds the {} registry years but no simulation was run",
                years, registry_years
            ))
        })?;
        if simulated.len() < years {
            return Err(PrevalenceError::DimensionMismatch {
                expected: years,
                actual: simulated.len(),
            });
        }
        let n_draws = simulated[registry_years].n_draws();
        let sums: Vec<f64> = (0..n_draws)
            .map(|d| {
                simulated[registry_years..years]
                    .iter()
                    .map(|y| y.case_counts.get(d).copied().unwrap_or(0) as f64)
                    .sum()
            })
            .collect();
        let mean = if sums.is_empty() {
            0.0
        } else {
            sums.iter().sum::<f64>() / sums.len() as f64
        };
        (counted_total + mean, sample_variance(sums.into_iter()))
    };

    let Some(population) = options.population_size else {
        return Ok(PrevalenceEstimate {
            years,
            absolute_prevalence: absolute,
            per_unit: None,
            ci_lower: None,
            ci_upper: None,
        });
    };
    if !population.is_finite() || population <= 0.0 {
        return Err(PrevalenceError::InvalidParameter(format!(
            "population_size must be positive, got {}",
            population
        )));
    }

    let p = counted_total / population;
    let variance = p * (1.0 - p) / population + simulated_variance / population.powi(2);
    let rate = absolute / population * options.proportion;
    let half_width = z_value(options.level)? * variance.max(0.0).sqrt() * options.proportion;

    Ok(PrevalenceEstimate {
        years,
        absolute_prevalence: absolute,
        per_unit: Some(round_to(rate, options.precision)),
        ci_lower: Some(round_to(rate - half_width, options.precision)),
        ci_upper: Some(round_to(rate + half_width, options.precision)),
    })
}
