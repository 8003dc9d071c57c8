//! General-population life tables.

use crate::error::{PrevalenceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Oldest age in the bundled table.
pub const DEFAULT_MAX_AGE: u32 = 100;

/// Gompertz-Makeham parameters `(makeham, gompertz_scale, gompertz_rate)` per sex
/// used to build the bundled table.
const DEFAULT_PARAMETERS: [(&str, f64, f64, f64); 2] = [
    ("F", 2.0e-4, 1.7e-5, 0.097),
    ("M", 3.0e-4, 3.0e-5, 0.095),
];

/// One life-table row: annual mortality rate for an age and sex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifeTableRow {
    /// Age in whole years.
    pub age: u32,
    /// Sex level, matching the registry's levels.
    pub sex: String,
    /// Annual mortality rate (hazard per year).
    pub rate: f64,
}

/// Annual mortality rates by age and sex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifeTable {
    rows: Vec<LifeTableRow>,
}

impl LifeTable {
    /// Build a table from rows, validating rates.
    pub fn new(rows: Vec<LifeTableRow>) -> Result<Self> {
        if rows.is_empty() {
            return Err(PrevalenceError::EmptyData("Life table has no rows".to_string()));
        }
        if let Some(bad) = rows.iter().find(|r| !r.rate.is_finite() || r.rate < 0.0) {
            return Err(PrevalenceError::InvalidParameter(format!(
                "rate: must be finite and non-negative, got {} for age {} sex '{}'",
                bad.rate, bad.age, bad.sex
            )));
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = rows.iter().find(|r| !seen.insert((r.age, r.sex.as_str()))) {
            return Err(PrevalenceError::InvalidParameter(format!(
                "age: duplicate life-table row for age {} sex '{}'",
                dup.age, dup.sex
            )));
        }
        Ok(Self { rows })
    }

    /// The bundled table: Gompertz-Makeham rates for ages 0-100, sexes `F` and `M`.
    pub fn default_table() -> Self {
        let rows = DEFAULT_PARAMETERS
            .iter()
            .flat_map(|&(sex, makeham, scale, rate)| {
                (0..=DEFAULT_MAX_AGE).map(move |age| LifeTableRow {
                    age,
                    sex: sex.to_string(),
                    rate: makeham + scale * (rate * age as f64).exp(),
                })
            })
            .collect();
        Self { rows }
    }

    /// Load a table from CSV with columns `age`, `sex` and `rate`.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Load a table from any CSV source.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        for required in ["age", "sex", "rate"] {
            if !headers.iter().any(|h| h == required) {
                return Err(PrevalenceError::MissingColumn(required.to_string()));
            }
        }

        let rows = csv_reader
            .deserialize::<LifeTableRow>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::new(rows)
    }

    /// Write the table as CSV.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "age,sex,rate")?;
        for r in &self.rows {
            writeln!(writer, "{},{},{:.8}", r.age, r.sex, r.rate)?;
        }
        Ok(())
    }

    /// All rows.
    pub fn rows(&self) -> &[LifeTableRow] {
        &self.rows
    }

    /// Sex levels present in the table.
    pub fn sexes(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.rows.iter().map(|r| r.sex.as_str()).collect();
        set.into_iter().map(String::from).collect()
    }

    /// Check the table covers every registry sex level.
    pub fn validate_sexes(&self, levels: &[String]) -> Result<()> {
        let sexes = self.sexes();
        match levels.iter().find(|l| !sexes.contains(l)) {
            Some(missing) => Err(PrevalenceError::MissingSexLevel(missing.clone())),
            None => Ok(()),
        }
    }

    /// `(age, rate)` pairs for one sex, sorted by age.
    pub fn rates_for(&self, sex: &str) -> Vec<(u32, f64)> {
        let mut rates: Vec<(u32, f64)> = self
            .rows
            .iter()
            .filter(|r| r.sex == sex)
            .map(|r| (r.age, r.rate))
            .collect();
        rates.sort_by_key(|&(age, _)| age);
        rates
    }

    /// `(age, rate)` pairs averaged over all sexes in the table.
    pub fn averaged_rates(&self) -> Vec<(u32, f64)> {
        let mut by_age: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
        for r in &self.rows {
            let entry = by_age.entry(r.age).or_insert((0.0, 0));
            entry.0 += r.rate;
            entry.1 += 1;
        }
        by_age
            .into_iter()
            .map(|(age, (sum, n))| (age, sum / n as f64))
            .collect()
    }
}

impl Default for LifeTable {
    fn default() -> Self {
        Self::default_table()
    }
}
