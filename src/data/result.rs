//! Result types for prevalence estimation.

use crate::error::Result;
use crate::estimate::PrevalenceEstimate;
use crate::model::SurvivalFit;
use crate::simulate::{BootstrapDraws, YearlyContribution};
use crate::test::PoissonTestResult;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Everything produced by one prevalence run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrevalenceResult {
    /// One estimate per requested number of years.
    pub estimates: Vec<PrevalenceEstimate>,
    /// Simulated contributions merged across sex, offset 0 first.
    /// `None` when every request was answered from the registry alone.
    pub simulated: Option<Vec<YearlyContribution>>,
    /// Counted prevalence per registry year, offset 0 first.
    pub counted: Vec<usize>,
    pub start_date: NaiveDate,
    pub index_date: NaiveDate,
    pub num_registry_years: usize,
    /// Diagnoses per registry year, chronological.
    pub incidence_counts: Vec<usize>,
    /// Diagnoses per registry year per `proportion` people.
    pub known_incidence_rate: Option<Vec<f64>>,
    /// Population size used for rates.
    pub population_size: Option<f64>,
    pub proportion: f64,
    /// Bootstrap coefficient draws, when simulation ran.
    pub bootstrap: Option<BootstrapDraws>,
    /// Survival model fitted on the whole registry, when simulation ran.
    pub full_fit: Option<SurvivalFit>,
    /// Counted against simulated prevalence over the registry years.
    pub goodness_of_fit: PoissonTestResult,
    pub survival_model: String,
    pub incidence_model: String,
}

impl PrevalenceResult {
    /// Estimate for a given number of years.
    pub fn estimate(&self, years: usize) -> Option<&PrevalenceEstimate> {
        self.estimates.iter().find(|e| e.years == years)
    }

    /// Goodness-of-fit p-value.
    pub fn p_value(&self) -> f64 {
        self.goodness_of_fit.p_value
    }

    /// Whether the result came from counting alone.
    pub fn is_counted_only(&self) -> bool {
        self.simulated.is_none()
    }

    /// Total counted prevalence over all registry years.
    pub fn counted_total(&self) -> usize {
        self.counted.iter().sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the estimates table to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_tsv(BufWriter::new(file))
    }

    /// Write the estimates table as TSV to any writer.
    pub fn write_tsv<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "years\tabsolute_prevalence\tper_unit\tci_lower\tci_upper")?;
        let fmt_opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_else(|| "NA".to_string());
        for e in &self.estimates {
            writeln!(
                writer,
                "{}\t{:.4}\t{}\t{}\t{}",
                e.years,
                e.absolute_prevalence,
                fmt_opt(e.per_unit),
                fmt_opt(e.ci_lower),
                fmt_opt(e.ci_upper)
            )?;
        }
        writer.flush()?;

        Ok(())
    }
}

impl std::fmt::Display for PrevalenceResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Registry: {} to {} ({} years)",
            self.start_date, self.index_date, self.num_registry_years
        )?;
        writeln!(
            f,
            "Models: {} incidence, {} survival",
            self.incidence_model, self.survival_model
        )?;
        writeln!(f, "Counted prevalence: {}", self.counted_total())?;
        for e in &self.estimates {
            write!(f, "  {}-year prevalence: {:.1}", e.years, e.absolute_prevalence)?;
            if let (Some(rate), Some(lo), Some(hi)) = (e.per_unit, e.ci_lower, e.ci_upper) {
                write!(f, " ({} per {} [{}, {}])", rate, self.proportion, lo, hi)?;
            }
            writeln!(f)?;
        }
        if let Some(draws) = &self.bootstrap {
            writeln!(
                f,
                "Bootstrap draws: {} of {} ({} failed)",
                draws.len(),
                draws.n_requested,
                draws.n_failed
            )?;
        }
        writeln!(
            f,
            "Goodness of fit: observed {} vs simulated {:.1}, p = {:.4}",
            self.goodness_of_fit.observed, self.goodness_of_fit.expected, self.goodness_of_fit.p_value
        )?;
        Ok(())
    }
}
