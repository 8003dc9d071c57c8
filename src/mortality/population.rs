//! Population survival from life-table rates.

use crate::data::LifeTable;
use crate::error::{PrevalenceError, Result};
use crate::simulate::DAYS_PER_YEAR;
use log::debug;
use serde::{Deserialize, Serialize};

/// Piecewise-linear cumulative hazard over age.
///
/// Rates are constant within each table interval `[age_i, age_{i+1})`; ages
/// beyond the last row keep the last rate, ages below the first row are
/// clamped to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardCurve {
    ages: Vec<f64>,
    rates: Vec<f64>,
    cumulative: Vec<f64>,
}

impl HazardCurve {
    /// Build from `(age, annual rate)` pairs sorted by age.
    pub fn from_rates(rates: &[(u32, f64)]) -> Result<Self> {
        if rates.is_empty() {
            return Err(PrevalenceError::EmptyData(
                "No life-table rates for hazard curve".to_string(),
            ));
        }
        if let Some(w) = rates.windows(2).find(|w| w[1].0 <= w[0].0) {
            return Err(PrevalenceError::InvalidParameter(format!(
                "age: life-table ages must be strictly increasing, got {} after {}",
                w[1].0, w[0].0
            )));
        }
        let ages: Vec<f64> = rates.iter().map(|&(a, _)| a as f64).collect();
        let values: Vec<f64> = rates.iter().map(|&(_, r)| r).collect();

        let mut cumulative = Vec::with_capacity(ages.len());
        let mut total = 0.0;
        cumulative.push(0.0);
        for i in 1..ages.len() {
            total += values[i - 1] * (ages[i] - ages[i - 1]);
            cumulative.push(total);
        }

        Ok(Self {
            ages,
            rates: values,
            cumulative,
        })
    }

    /// Cumulative hazard from the first table age up to `age` (years).
    pub fn cumulative_hazard(&self, age: f64) -> f64 {
        let first = self.ages[0];
        if age <= first {
            return 0.0;
        }
        // Last interval start not greater than `age`
        let idx = match self
            .ages
            .binary_search_by(|a| a.partial_cmp(&age).unwrap_or(std::cmp::Ordering::Less))
        {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        self.cumulative[idx] + self.rates[idx] * (age - self.ages[idx])
    }

    /// Oldest age explicitly covered.
    pub fn max_age(&self) -> f64 {
        self.ages[self.ages.len() - 1]
    }
}

/// Population survival curves, one per registry sex level plus a pooled curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationSurvival {
    by_sex: Vec<HazardCurve>,
    pooled: HazardCurve,
}

impl PopulationSurvival {
    /// Build curves for each registry sex level.
    ///
    /// Fails when a registry level is missing from the table. The pooled
    /// curve averages rates over every sex in the table and serves
    /// unstratified registries.
    pub fn from_life_table(table: &LifeTable, sex_levels: &[String]) -> Result<Self> {
        table.validate_sexes(sex_levels)?;

        let by_sex = sex_levels
            .iter()
            .map(|sex| HazardCurve::from_rates(&table.rates_for(sex)))
            .collect::<Result<Vec<_>>>()?;
        let pooled = HazardCurve::from_rates(&table.averaged_rates())?;

        debug!(
            "Built population survival for {} sex level(s), table ages up to {}",
            by_sex.len(),
            pooled.max_age()
        );

        Ok(Self { by_sex, pooled })
    }

    fn curve(&self, sex: Option<usize>) -> &HazardCurve {
        sex.and_then(|s| self.by_sex.get(s)).unwrap_or(&self.pooled)
    }

    /// Probability of surviving `days_elapsed` days from `age_start` years of age.
    pub fn daily_survival_probability(
        &self,
        age_start: f64,
        days_elapsed: f64,
        sex: Option<usize>,
    ) -> f64 {
        if days_elapsed <= 0.0 {
            return 1.0;
        }
        let curve = self.curve(sex);
        let age_end = age_start + days_elapsed / DAYS_PER_YEAR;
        let hazard = curve.cumulative_hazard(age_end) - curve.cumulative_hazard(age_start);
        (-hazard.max(0.0)).exp()
    }
}
