//! Exact two-sided Poisson test.
//!
//! Tests an observed count against the mean of a Poisson distribution. The
//! two-sided p-value sums the probabilities of every outcome no more likely
//! than the observed one, with a small relative tolerance for ties.

use crate::error::{PrevalenceError, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Discrete, DiscreteCDF, Poisson};

/// Relative tolerance when comparing outcome probabilities.
const REL_ERR: f64 = 1.0 + 1e-7;

/// Result of an exact Poisson test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoissonTestResult {
    /// Observed count.
    pub observed: u64,
    /// Expected count under the null.
    pub expected: f64,
    /// Two-sided p-value.
    pub p_value: f64,
}

/// Test `observed` against a Poisson mean of `expected`.
pub fn exact_poisson_test(observed: u64, expected: f64) -> Result<PoissonTestResult> {
    if !expected.is_finite() || expected < 0.0 {
        return Err(PrevalenceError::InvalidParameter(format!(
            "expected count must be finite and non-negative, got {}",
            expected
        )));
    }

    let p_value = if expected == 0.0 {
        if observed == 0 {
            1.0
        } else {
            0.0
        }
    } else if observed as f64 == expected {
        1.0
    } else {
        two_sided(observed, expected)?
    };

    Ok(PoissonTestResult {
        observed,
        expected,
        p_value: p_value.min(1.0),
    })
}

fn two_sided(x: u64, m: f64) -> Result<f64> {
    let dist = Poisson::new(m).map_err(|e| PrevalenceError::Numerical(e.to_string()))?;
    let d = dist.pmf(x) * REL_ERR;

    if (x as f64) < m {
        // Upper tail: outcomes above the mean at least as extreme as x
        let mut n = (2.0 * m - x as f64).ceil() as u64;
        while dist.pmf(n) > d {
            n *= 2;
        }
        let y = (m.ceil() as u64..=n).filter(|&i| dist.pmf(i) <= d).count() as u64;
        Ok(dist.cdf(x) + dist.sf(n - y))
    } else {
        // Lower tail: outcomes below the mean at least as extreme as x
        let y = (0..=m.floor() as u64).filter(|&i| dist.pmf(i) <= d).count() as u64;
        let lower = if y == 0 { 0.0 } else { dist.cdf(y - 1) };
        Ok(lower + dist.sf(x - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_equal_counts() {
        let result = exact_poisson_test(250, 250.0).unwrap();
        assert_eq!(result.p_value, 1.0);
    }

    #[test]
    fn test_excess_observed() {
        let result = exact_poisson_test(10, 3.0).unwrap();
        assert_relative_eq!(result.p_value, 0.0011024881, epsilon = 1e-8);
    }

    #[test]
    fn test_deficit_observed() {
        assert_relative_eq!(
            exact_poisson_test(2, 8.0).unwrap().p_value,
            0.0310109581,
            epsilon = 1e-8
        );
        assert_relative_eq!(
            exact_poisson_test(0, 2.0).unwrap().p_value,
            0.2782118227,
            epsilon = 1e-8
        );
    }

    #[test]
    fn test_close_to_mean_is_not_significant() {
        let result = exact_poisson_test(100, 100.5).unwrap();
        assert!(result.p_value > 0.9);
    }

    #[test]
    fn test_zero_expected() {
        assert_eq!(exact_poisson_test(0, 0.0).unwrap().p_value, 1.0);
        assert_eq!(exact_poisson_test(3, 0.0).unwrap().p_value, 0.0);
        assert!(exact_poisson_test(3, -1.0).is_err());
    }
}
