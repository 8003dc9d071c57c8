//! Registry calendar arithmetic and direct counting.

use crate::data::Registry;
use crate::error::{PrevalenceError, Result};
use chrono::{Days, Months, NaiveDate};
use log::warn;

/// Boundaries of `n` consecutive registry years starting at `start`.
///
/// Returns `n + 1` dates; the last one is the index date.
pub fn determine_registry_years(start: NaiveDate, n: usize) -> Result<Vec<NaiveDate>> {
    if n == 0 {
        return Err(PrevalenceError::InvalidParameter(
            "num_registry_years must be at least 1".to_string(),
        ));
    }
    (0..=n)
        .map(|i| {
            let months = u32::try_from(12 * i).ok().map(Months::new);
            months
                .and_then(|m| start.checked_add_months(m))
                .ok_or_else(|| {
                    PrevalenceError::InvalidParameter(format!(
                        "num_registry_years: {} years after {} is out of range",
                        i, start
                    ))
                })
        })
        .collect()
}

/// Largest number of whole registry years from `start` covered by the data.
///
/// A year counts when its end falls on or before the day after the latest
/// diagnosis.
pub fn default_num_registry_years(start: NaiveDate, latest_entry: NaiveDate) -> usize {
    let limit = latest_entry
        .checked_add_days(Days::new(1))
        .unwrap_or(latest_entry);
    let mut n = 0;
    while let Some(end) = start.checked_add_months(Months::new(12 * (n as u32 + 1))) {
        if end > limit {
            break;
        }
        n += 1;
    }
    n
}

/// Index of the registry year `date` falls in, or `None` outside the registry.
fn year_of(date: NaiveDate, boundaries: &[NaiveDate]) -> Option<usize> {
    let first = *boundaries.first()?;
    let last = *boundaries.last()?;
    if date < first || date >= last {
        return None;
    }
    Some(boundaries.partition_point(|b| *b <= date) - 1)
}

/// Diagnoses per registry year, in chronological order.
pub fn raw_incidence(entry_dates: &[NaiveDate], start: NaiveDate, n: usize) -> Result<Vec<usize>> {
    let boundaries = determine_registry_years(start, n)?;
    let mut counts = vec![0; n];
    for &date in entry_dates {
        if let Some(y) = year_of(date, &boundaries) {
            counts[y] += 1;
        }
    }
    Ok(counts)
}

/// People diagnosed in each registry year who are alive at the index date.
///
/// Offset 0 is the most recent year. A subject is alive at the index date if
/// their event falls after it, or if they were censored on or after it.
/// Subjects censored before the index date have unknown status and are not
/// counted.
pub fn counted_prevalence(registry: &Registry, start: NaiveDate, n: usize) -> Result<Vec<usize>> {
    let boundaries = determine_registry_years(start, n)?;
    let index = boundaries[n];

    let mut counts = vec![0; n];
    let mut censored_early = 0;
    for record in registry.records() {
        let Some(y) = year_of(record.entry_date, &boundaries) else {
            continue;
        };
        let alive = if record.event_status {
            record.event_date > index
        } else {
            record.event_date >= index
        };
        if alive {
            counts[n - 1 - y] += 1;
        } else if !record.event_status {
            censored_early += 1;
        }
    }

    if censored_early > 0 {
        warn!(
            "{} subjects were censored before the index date {} and are not counted as prevalent",
            censored_early, index
        );
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RegistryRecord;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(entry: &str, event: &str, status: bool) -> RegistryRecord {
        let entry_date = date(entry);
        let event_date = date(event);
        RegistryRecord {
            age: 60.0,
            sex: None,
            entry_date,
            event_date,
            survival_time: (event_date - entry_date).num_days() as f64,
            event_status: status,
        }
    }

    #[test]
    fn test_determine_registry_years() {
        let years = determine_registry_years(date("2004-01-30"), 3).unwrap();
        assert_eq!(
            years,
            vec![
                date("2004-01-30"),
                date("2005-01-30"),
                date("2006-01-30"),
                date("2007-01-30")
            ]
        );
        // Leap day rolls back to the end of February
        let leap = determine_registry_years(date("2004-02-29"), 1).unwrap();
        assert_eq!(leap[1], date("2005-02-28"));
        assert!(determine_registry_years(date("2004-01-01"), 0).is_err());
    }

    #[test]
    fn test_default_num_registry_years() {
        let start = date("2005-01-01");
        assert_eq!(default_num_registry_years(start, date("2009-12-31")), 5);
        assert_eq!(default_num_registry_years(start, date("2009-12-30")), 4);
        assert_eq!(default_num_registry_years(start, date("2005-06-01")), 0);
    }

    #[test]
    fn test_raw_incidence() {
        let dates = vec![
            date("2003-12-31"),
            date("2004-01-01"),
            date("2004-06-01"),
            date("2005-01-01"),
            date("2006-12-31"),
            date("2007-01-01"),
        ];
        let counts = raw_incidence(&dates, date("2004-01-01"), 3).unwrap();
        assert_eq!(counts, vec![2, 1, 1]);
    }

    #[test]
    fn test_counted_prevalence() {
        let registry = Registry::new(vec![
            // Year 0 of the registry, dies after index: prevalent
            record("2004-03-01", "2008-01-01", true),
            // Dies before index
            record("2004-05-01", "2005-01-01", true),
            // Censored exactly at index: prevalent
            record("2005-02-01", "2007-01-01", false),
            // Censored before index: unknown, not counted
            record("2005-03-01", "2006-06-01", false),
            // Most recent year, dies on index date: not prevalent
            record("2006-07-01", "2007-01-01", true),
            record("2006-08-01", "2009-01-01", false),
        ])
        .unwrap();

        let counts = counted_prevalence(&registry, date("2004-01-01"), 3).unwrap();
        // Offset 0 is 2006, offset 2 is 2004
        assert_eq!(counts, vec![1, 1, 1]);
    }
}
