//! Integration tests for the prevalence pipeline.

use chrono::{Duration, NaiveDate};
use composable_prevalence::prelude::*;
use composable_prevalence::simulate::SimRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2005, 1, 1).unwrap()
}

/// Registry with evenly spread diagnoses and exponential survival,
/// followed up to `years` after the start.
fn synthetic_registry(n: usize, years: i64, mean_survival: f64, sexes: &[&str], seed: u64) -> Registry {
    let mut rng = SimRng::seed_from_u64(seed);
    let end = start() + Duration::days(366 * years);
    let records = (0..n)
        .map(|i| {
            let entry = start() + Duration::days((i as i64 * 365 * years) / n as i64);
            let u: f64 = rng.random::<f64>().max(1e-12);
            let death = entry + Duration::days((-u.ln() * mean_survival) as i64);
            let (event_date, event_status) = if death < end {
                (death, true)
            } else {
                (end, false)
            };
            RegistryRecord {
                age: 45.0 + 30.0 * rng.random::<f64>(),
                sex: if sexes.is_empty() {
                    None
                } else {
                    Some(sexes[i % sexes.len()].to_string())
                },
                entry_date: entry,
                event_date,
                survival_time: (event_date - entry).num_days() as f64,
                event_status,
            }
        })
        .collect();
    Registry::new(records).unwrap()
}

/// Survival model that counts how often it is used.
#[derive(Debug, Default)]
struct CountingSurvival {
    inner: WeibullModel,
    calls: Arc<AtomicUsize>,
}

impl SurvivalModel for CountingSurvival {
    fn name(&self) -> &str {
        "counting"
    }

    fn fit(&self, data: &SurvivalData) -> Result<SurvivalFit> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fit(data)
    }

    fn predict_survival(
        &self,
        fit: &SurvivalFit,
        rows: &[CovariateRow],
        times: &[f64],
    ) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.predict_survival(fit, rows, times)
    }
}

/// Incidence model that counts how often it is used.
#[derive(Debug, Default)]
struct CountingIncidence {
    calls: Arc<AtomicUsize>,
}

impl IncidenceModel for CountingIncidence {
    fn name(&self) -> &str {
        "counting"
    }

    fn fit(&self, data: &IncidenceData) -> Result<IncidenceFit> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        HomogeneousPoisson.fit(data)
    }

    fn draw_incident_population(
        &self,
        fit: &IncidenceFit,
        timeframe_days: f64,
        required_covariates: &[String],
        pool: &CovariatePool,
        rng: &mut SimRng,
    ) -> Result<Vec<IncidentCase>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        HomogeneousPoisson.draw_incident_population(fit, timeframe_days, required_covariates, pool, rng)
    }
}

#[test]
fn test_registry_years_skip_models() {
    let registry = synthetic_registry(200, 5, 1500.0, &["F", "M"], 1);
    let survival = Arc::new(CountingSurvival::default());
    let incidence = Arc::new(CountingIncidence::default());
    let survival_calls = survival.calls.clone();
    let incidence_calls = incidence.calls.clone();

    let config = PrevalenceConfig::default()
        .with_years(vec![1, 3, 5])
        .with_population_size(1e6)
        .with_start_date(start())
        .with_registry_years(5);
    let result = Prevalence::from_config(&config)
        .survival_model(survival)
        .incidence_model(incidence)
        .run(&registry)
        .unwrap();

    assert_eq!(survival_calls.load(Ordering::SeqCst), 0);
    assert_eq!(incidence_calls.load(Ordering::SeqCst), 0);
    assert!(result.is_counted_only());
    assert!(result.bootstrap.is_none());

    assert_eq!(result.counted.len(), 5);
    for n in [1, 3, 5] {
        let expected: usize = result.counted[..n].iter().sum();
        assert_eq!(result.estimate(n).unwrap().absolute_prevalence, expected as f64);
    }
    assert!(result.p_value() > 0.05);
    assert_eq!(result.incidence_counts.iter().sum::<usize>(), 200);
    assert_eq!(result.known_incidence_rate.as_ref().unwrap()[0], 40.0 / 1e6 * 1e5);
}

#[test]
fn test_simulated_years_extend_counted() {
    let registry = synthetic_registry(500, 5, 2000.0, &["F", "M"], 2);
    let config = PrevalenceConfig::default()
        .with_years(vec![5, 10])
        .with_population_size(1e6)
        .with_start_date(start())
        .with_registry_years(5)
        .with_bootstrap(40)
        .with_seed(11);
    let result = estimate_prevalence(&registry, &config).unwrap();

    let counted_total = result.counted_total() as f64;
    assert_eq!(result.estimate(5).unwrap().absolute_prevalence, counted_total);

    let simulated = result.simulated.as_ref().unwrap();
    assert_eq!(simulated.len(), 10);
    for year in &simulated[5..10] {
        assert_eq!(year.n_draws(), 40);
        assert!(year.case_variance() > 0.0, "year {} has no spread", year.year);
    }
    let extra: f64 = simulated[5..10].iter().map(|y| y.mean_cases()).sum();
    let ten = result.estimate(10).unwrap();
    assert!((ten.absolute_prevalence - (counted_total + extra)).abs() < 1e-6);
    assert!(ten.ci_upper.unwrap() > ten.per_unit.unwrap());

    // Well-specified models reproduce the counted registry years
    assert!(result.p_value() > 0.01, "p = {}", result.p_value());
}

#[test]
fn test_more_draws_stabilise_simulated_years() {
    let registry = synthetic_registry(300, 5, 2000.0, &["F", "M"], 12);
    let spread = |n_bootstrap: usize| -> f64 {
        let estimates: Vec<f64> = (0..8u64)
            .map(|seed| {
                let config = PrevalenceConfig::default()
                    .with_years(vec![10])
                    .with_start_date(start())
                    .with_registry_years(5)
                    .with_bootstrap(n_bootstrap)
                    .with_seed(100 + seed);
                estimate_prevalence(&registry, &config)
                    .unwrap()
                    .estimate(10)
                    .unwrap()
                    .absolute_prevalence
            })
            .collect();
        let mean = estimates.iter().sum::<f64>() / estimates.len() as f64;
        let var = estimates.iter().map(|e| (e - mean).powi(2)).sum::<f64>()
            / (estimates.len() - 1) as f64;
        var.sqrt()
    };

    let few = spread(20);
    let many = spread(200);
    assert!(many < few, "spread with 200 draws {} vs 20 draws {}", many, few);
}

#[test]
fn test_single_sex_matches_unstratified() {
    let stratified = synthetic_registry(300, 4, 1800.0, &["F"], 3);
    let unstratified = stratified.without_sex();
    let config = PrevalenceConfig::default()
        .with_years(vec![4, 8])
        .with_population_size(5e5)
        .with_bootstrap(20)
        .with_seed(5);

    let a = estimate_prevalence(&stratified, &config).unwrap();
    let b = estimate_prevalence(&unstratified, &config).unwrap();
    assert_eq!(a.counted, b.counted);
    let counts = |r: &PrevalenceResult| -> Vec<Vec<usize>> {
        r.simulated
            .as_ref()
            .unwrap()
            .iter()
            .map(|y| y.case_counts.clone())
            .collect()
    };
    assert_eq!(counts(&a), counts(&b));
    assert_eq!(a.estimates, b.estimates);
}

#[test]
fn test_cure_time_increases_survivors() {
    let registry = synthetic_registry(400, 5, 500.0, &["F", "M"], 4);
    let config = PrevalenceConfig::default()
        .with_years(vec![20])
        .with_start_date(start())
        .with_registry_years(5)
        .with_bootstrap(20)
        .with_seed(9);

    let plain = estimate_prevalence(&registry, &config).unwrap();
    let cured = estimate_prevalence(&registry, &config.clone().with_cure_time(730.0)).unwrap();

    let older = |r: &PrevalenceResult| -> f64 {
        r.simulated.as_ref().unwrap()[5..20].iter().map(|y| y.mean_cases()).sum()
    };
    assert!(
        older(&cured) > older(&plain),
        "cured {} vs plain {}",
        older(&cured),
        older(&plain)
    );
    assert!(
        cured.estimate(20).unwrap().absolute_prevalence
            > plain.estimate(20).unwrap().absolute_prevalence
    );
}

#[test]
fn test_mixture_cure_runs() {
    let registry = synthetic_registry(300, 4, 1200.0, &["F", "M"], 6);
    let config = PrevalenceConfig::default()
        .with_years(vec![8])
        .with_registry_years(4)
        .with_start_date(start())
        .with_bootstrap(10)
        .with_survival_model(SurvivalModelKind::MixtureCure);
    let result = estimate_prevalence(&registry, &config).unwrap();
    assert_eq!(result.survival_model, "mixture_cure");
    let fit = result.full_fit.as_ref().unwrap();
    assert!(fit.coefficient("logit(cure)").is_some());
}

#[test]
fn test_missing_life_table_sex_fails_before_simulation() {
    let registry = synthetic_registry(100, 3, 1000.0, &["female", "male"], 7);
    let config = PrevalenceConfig::default()
        .with_years(vec![6])
        .with_cure_time(365.0)
        .with_bootstrap(5);
    let result = estimate_prevalence(&registry, &config);
    assert!(matches!(result, Err(PrevalenceError::MissingSexLevel(_))));
}

#[test]
fn test_config_and_registry_from_files() {
    let mut csv = NamedTempFile::new().unwrap();
    writeln!(csv, "id,age,sex,diagnosis,death,time,status").unwrap();
    let registry = synthetic_registry(150, 3, 1500.0, &["F", "M"], 8);
    for (i, r) in registry.records().iter().enumerate() {
        writeln!(
            csv,
            "{},{},{},{},{},{},{}",
            i,
            r.age,
            r.sex.as_deref().unwrap_or(""),
            r.entry_date,
            r.event_date,
            r.survival_time,
            if r.event_status { 1 } else { 0 }
        )
        .unwrap();
    }
    csv.flush().unwrap();

    let roles = RoleSpec::parse(
        "Surv(time, status) ~ age(age) + sex(sex) + entry(diagnosis) + event(death)",
    )
    .unwrap();
    let loaded = Registry::from_csv(csv.path(), &roles).unwrap();
    assert_eq!(loaded.len(), 150);
    assert_eq!(loaded.sex_levels(), &["F".to_string(), "M".to_string()]);

    let yaml = "num_years_to_estimate: [2, 3]\npopulation_size: 250000\nstart_date: 2005-01-01\nnum_registry_years: 3\n";
    let config = PrevalenceConfig::from_yaml(yaml).unwrap();
    let result = estimate_prevalence(&loaded, &config).unwrap();
    assert!(result.is_counted_only());
    assert_eq!(result.index_date, NaiveDate::from_ymd_opt(2008, 1, 1).unwrap());
    assert_eq!(result.counted, counted_prevalence(&registry, start(), 3).unwrap());

    let out = NamedTempFile::new().unwrap();
    result.to_tsv(out.path()).unwrap();
    let contents = std::fs::read_to_string(out.path()).unwrap();
    assert_eq!(contents.lines().count(), 3);
}
