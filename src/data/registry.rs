//! Disease registry data.

use crate::data::RoleSpec;
use crate::error::{PrevalenceError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Date format accepted by the CSV loader.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One registry subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Age at diagnosis, in years.
    pub age: f64,
    /// Sex level, if the registry is stratified by sex.
    pub sex: Option<String>,
    /// Date of diagnosis.
    pub entry_date: NaiveDate,
    /// Date of death or censoring.
    pub event_date: NaiveDate,
    /// Days from diagnosis to event/censoring.
    pub survival_time: f64,
    /// Whether the event (death) was observed.
    pub event_status: bool,
}

/// Registry of incident cases with follow-up.
#[derive(Debug, Clone)]
pub struct Registry {
    records: Vec<RegistryRecord>,
    sex_levels: Vec<String>,
}

impl Registry {
    /// Build a registry from records.
    ///
    /// Fails if the records are empty, have inconsistent dates, or carry
    /// more than two sex levels. Either every record has a sex or none does.
    pub fn new(records: Vec<RegistryRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(PrevalenceError::EmptyData(
                "Registry has no records".to_string(),
            ));
        }

        let n_with_sex = records.iter().filter(|r| r.sex.is_some()).count();
        if n_with_sex != 0 && n_with_sex != records.len() {
            return Err(PrevalenceError::InvalidParameter(format!(
                "sex: {} of {} records have a missing sex value",
                records.len() - n_with_sex,
                records.len()
            )));
        }

        for (i, r) in records.iter().enumerate() {
            if !r.age.is_finite() || r.age < 0.0 {
                return Err(PrevalenceError::InvalidParameter(format!(
                    "age: must be finite and non-negative, got {} at row {}",
                    r.age, i
                )));
            }
            if !r.survival_time.is_finite() || r.survival_time < 0.0 {
                return Err(PrevalenceError::InvalidParameter(format!(
                    "survival_time: must be finite and non-negative, got {} at row {}",
                    r.survival_time, i
                )));
            }
            if r.event_date < r.entry_date {
                return Err(PrevalenceError::InvalidParameter(format!(
                    "event_date: {} precedes entry_date {} at row {}",
                    r.event_date, r.entry_date, i
                )));
            }
        }

        let levels: BTreeSet<&str> = records.iter().filter_map(|r| r.sex.as_deref()).collect();
        let sex_levels: Vec<String> = levels.into_iter().map(String::from).collect();
        if sex_levels.len() > 2 {
            return Err(PrevalenceError::TooManySexLevels(
                sex_levels.len(),
                sex_levels,
            ));
        }

        Ok(Self {
            records,
            sex_levels,
        })
    }

    /// Build a registry from parallel columns.
    ///
    /// Survival time is derived as the number of days between entry and event.
    pub fn from_columns(
        age: Vec<f64>,
        sex: Option<Vec<String>>,
        entry_dates: Vec<NaiveDate>,
        event_dates: Vec<NaiveDate>,
        event_status: Vec<bool>,
    ) -> Result<Self> {
        let n = age.len();
        let mut lengths = vec![entry_dates.len(), event_dates.len(), event_status.len()];
        if let Some(s) = &sex {
            lengths.push(s.len());
        }
        if let Some(&bad) = lengths.iter().find(|&&l| l != n) {
            return Err(PrevalenceError::DimensionMismatch {
                expected: n,
                actual: bad,
            });
        }

        let mut sex_iter = sex.map(|s| s.into_iter());
        let records = (0..n)
            .map(|i| RegistryRecord {
                age: age[i],
                sex: sex_iter.as_mut().and_then(|it| it.next()),
                entry_date: entry_dates[i],
                event_date: event_dates[i],
                survival_time: (event_dates[i] - entry_dates[i]).num_days() as f64,
                event_status: event_status[i],
            })
            .collect();

        Self::new(records)
    }

    /// Load a registry from a comma-separated file with a header row.
    pub fn from_csv<P: AsRef<Path>>(path: P, roles: &RoleSpec) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file, roles)
    }

    /// Load a registry from any CSV source.
    pub fn from_reader<R: Read>(reader: R, roles: &RoleSpec) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let index: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();

        let column = |name: &str| -> Result<usize> {
            index
                .get(name)
                .copied()
                .ok_or_else(|| PrevalenceError::MissingColumn(name.to_string()))
        };

        let time_col = column(&roles.time)?;
        let status_col = column(&roles.status)?;
        let age_col = column(&roles.age)?;
        let entry_col = column(&roles.entry)?;
        let event_col = column(&roles.event)?;
        let sex_col = roles.sex.as_deref().map(|s| column(s)).transpose()?;

        let mut records = Vec::new();
        for (row, result) in csv_reader.records().enumerate() {
            let rec = result?;
            let field = |col: usize| rec.get(col).unwrap_or("");

            records.push(RegistryRecord {
                age: parse_number(field(age_col), &roles.age, row)?,
                sex: sex_col.map(|c| field(c).to_string()),
                entry_date: parse_date(field(entry_col), &roles.entry, row)?,
                event_date: parse_date(field(event_col), &roles.event, row)?,
                survival_time: parse_number(field(time_col), &roles.time, row)?,
                event_status: parse_status(field(status_col), &roles.status, row)?,
            });
        }

        Self::new(records)
    }

    /// All records.
    pub fn records(&self) -> &[RegistryRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorted sex levels (empty when unstratified).
    pub fn sex_levels(&self) -> &[String] {
        &self.sex_levels
    }

    /// Whether the registry carries a sex column.
    pub fn is_stratified(&self) -> bool {
        !self.sex_levels.is_empty()
    }

    /// Index of a record's sex level.
    pub fn sex_index(&self, record: &RegistryRecord) -> Option<usize> {
        let sex = record.sex.as_deref()?;
        self.sex_levels.iter().position(|l| l == sex)
    }

    /// Records belonging to a stratum; `None` selects every record.
    pub fn stratum(&self, sex: Option<usize>) -> Vec<&RegistryRecord> {
        match sex {
            None => self.records.iter().collect(),
            Some(s) => self
                .records
                .iter()
                .filter(|r| self.sex_index(r) == Some(s))
                .collect(),
        }
    }

    /// Diagnosis dates for all records.
    pub fn entry_dates(&self) -> Vec<NaiveDate> {
        self.records.iter().map(|r| r.entry_date).collect()
    }

    /// Earliest diagnosis date.
    pub fn earliest_entry(&self) -> NaiveDate {
        self.records
            .iter()
            .map(|r| r.entry_date)
            .min()
            .unwrap_or(NaiveDate::MIN)
    }

    /// Latest diagnosis date.
    pub fn latest_entry(&self) -> NaiveDate {
        self.records
            .iter()
            .map(|r| r.entry_date)
            .max()
            .unwrap_or(NaiveDate::MIN)
    }

    /// Drop the sex column, producing an unstratified registry.
    pub fn without_sex(&self) -> Self {
        Self {
            records: self
                .records
                .iter()
                .cloned()
                .map(|mut r| {
                    r.sex = None;
                    r
                })
                .collect(),
            sex_levels: Vec::new(),
        }
    }
}

fn parse_number(value: &str, column: &str, row: usize) -> Result<f64> {
    value.parse::<f64>().map_err(|_| PrevalenceError::InvalidValue {
        value: value.to_string(),
        column: column.to_string(),
        row,
    })
}

fn parse_date(value: &str, column: &str, row: usize) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| PrevalenceError::InvalidDate {
        value: value.to_string(),
        column: column.to_string(),
        row,
    })
}

fn parse_status(value: &str, column: &str, row: usize) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" => Ok(true),
        "0" | "false" | "f" | "no" => Ok(false),
        _ => Err(PrevalenceError::InvalidValue {
            value: value.to_string(),
            column: column.to_string(),
            row,
        }),
    }
}
