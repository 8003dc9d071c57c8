//! Basic example of a prevalence estimate.
//!
//! This example shows how to:
//! 1. Build a synthetic registry
//! 2. Inspect incidence and counted prevalence
//! 3. Estimate prevalence beyond the registry window
//! 4. Examine the results

use chrono::{Duration, NaiveDate};
use composable_prevalence::incidence::{counted_prevalence, raw_incidence};
use composable_prevalence::prelude::*;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use rand_xoshiro::Xoshiro256PlusPlus;

fn main() -> Result<()> {
    println!("=== Composable Prevalence Example ===\n");

    let registry = create_example_registry(8, 250)?;
    let start = registry.earliest_entry();

    println!("Registry:");
    println!("  Records:    {}", registry.len());
    println!("  Sex levels: {:?}", registry.sex_levels());
    println!("  Entries:    {} to {}", start, registry.latest_entry());
    println!();

    // Incidence and counted prevalence from the registry alone
    println!("=== Registry Counts ===\n");

    let incidence = raw_incidence(&registry.entry_dates(), start, 8)?;
    println!("Diagnoses per year: {:?}", incidence);
    let counted = counted_prevalence(&registry, start, 8)?;
    println!("Alive at index, most recent year first: {:?}", counted);
    println!();

    // Estimate 5, 10 and 20-year prevalence
    println!("=== Estimating Prevalence ===\n");

    let result = Prevalence::new()
        .years(&[5, 10, 20])
        .population_size(1_000_000.0)
        .n_bootstrap(200)
        .seed(7)
        .run(&registry)?;

    println!("{}", result);

    if let Some(fit) = &result.full_fit {
        println!("Survival coefficients ({}):", fit.model);
        for (name, value) in fit.coefficient_names.iter().zip(&fit.coefficients) {
            println!("  {:>12}: {:.4}", name, value);
        }
        println!();
    }

    if let Some(simulated) = &result.simulated {
        println!("Simulated survivors by year before index:");
        for year in simulated.iter().take(20) {
            let ages = year
                .posterior_age_summary()
                .map(|s| format!("median age {:.1}", s.median))
                .unwrap_or_else(|| "no survivors".to_string());
            println!(
                "  {:>2}: {:6.1} ± {:4.1} ({})",
                year.year,
                year.mean_cases(),
                year.case_variance().sqrt(),
                ages
            );
        }
    }

    Ok(())
}

/// A registry with constant incidence and exponential survival, censored at
/// the end of follow-up.
fn create_example_registry(years: i64, per_year: usize) -> Result<Registry> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2024);
    let survival = Exp::new(1.0 / 2500.0).map_err(|e| PrevalenceError::Numerical(e.to_string()))?;

    let start = NaiveDate::from_ymd_opt(2010, 1, 1)
        .ok_or_else(|| PrevalenceError::InvalidParameter("start date out of range".to_string()))?;
    let end = start + Duration::days(365 * years + 2);

    let n = years as usize * per_year;
    let records = (0..n)
        .map(|i| {
            let entry = start + Duration::days(rng.random_range(0..(365 * years)));
            let death = entry + Duration::days(survival.sample(&mut rng) as i64);
            let (event_date, event_status) = if death < end {
                (death, true)
            } else {
                (end, false)
            };
            RegistryRecord {
                age: rng.random_range(30.0..85.0),
                sex: Some(if i % 2 == 0 { "F" } else { "M" }.to_string()),
                entry_date: entry,
                event_date,
                survival_time: (event_date - entry).num_days() as f64,
                event_status,
            }
        })
        .collect();

    Registry::new(records)
}
