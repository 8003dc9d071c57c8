//! prev - Registry Prevalence CLI
//!
//! Command-line interface for registry-based prevalence estimation.

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use composable_prevalence::data::{LifeTable, Registry, RoleSpec};
use composable_prevalence::error::Result;
use composable_prevalence::incidence::{
    counted_prevalence, default_num_registry_years, determine_registry_years, raw_incidence,
};
use composable_prevalence::model::SurvivalModelKind;
use composable_prevalence::pipeline::{Prevalence, PrevalenceConfig};
use std::path::PathBuf;

const DEFAULT_FORMULA: &str =
    "Surv(time, status) ~ age(age) + sex(sex) + entry(entry_date) + event(event_date)";

/// CLI-friendly survival model enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSurvivalModel {
    /// Proportional-hazards Weibull regression
    Weibull,
    /// Log-logistic accelerated failure time regression
    LogLogistic,
    /// Weibull mixture cure model with population mortality
    MixtureCure,
}

impl From<CliSurvivalModel> for SurvivalModelKind {
    fn from(model: CliSurvivalModel) -> Self {
        match model {
            CliSurvivalModel::Weibull => SurvivalModelKind::Weibull,
            CliSurvivalModel::LogLogistic => SurvivalModelKind::LogLogistic,
            CliSurvivalModel::MixtureCure => SurvivalModelKind::MixtureCure,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
    Tsv,
}

/// Registry-based point prevalence estimation
#[derive(Parser)]
#[command(name = "prev")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate prevalence from a registry CSV
    Estimate {
        /// Path to registry CSV
        #[arg(short, long)]
        registry: PathBuf,

        /// Role formula mapping registry columns
        #[arg(short, long, default_value = DEFAULT_FORMULA)]
        formula: String,

        /// YAML configuration; command-line options override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Numbers of years to estimate (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        years: Option<Vec<usize>>,

        /// Size of the population the registry covers
        #[arg(short = 'n', long)]
        population_size: Option<f64>,

        /// Days after which survivors follow population mortality
        #[arg(long)]
        cure_time: Option<f64>,

        /// Number of bootstrap fits
        #[arg(short, long)]
        bootstrap: Option<usize>,

        /// Survival model
        #[arg(short = 'm', long, value_enum)]
        survival_model: Option<CliSurvivalModel>,

        /// Life table CSV (age, sex, rate); defaults to the bundled table
        #[arg(short, long)]
        life_table: Option<PathBuf>,

        /// Random seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Worker threads
        #[arg(short, long)]
        threads: Option<usize>,

        /// Output path; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print diagnoses per registry year
    Incidence {
        /// Path to registry CSV
        #[arg(short, long)]
        registry: PathBuf,

        /// Role formula mapping registry columns
        #[arg(short, long, default_value = DEFAULT_FORMULA)]
        formula: String,

        /// First day of the registry (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Number of registry years
        #[arg(long)]
        registry_years: Option<usize>,

        /// Population size, to report rates per 100,000
        #[arg(short = 'n', long)]
        population_size: Option<f64>,
    },

    /// Print counted prevalence per registry year
    Counted {
        /// Path to registry CSV
        #[arg(short, long)]
        registry: PathBuf,

        /// Role formula mapping registry columns
        #[arg(short, long, default_value = DEFAULT_FORMULA)]
        formula: String,

        /// First day of the registry (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Number of registry years
        #[arg(long)]
        registry_years: Option<usize>,
    },

    /// Print or export the bundled life table
    LifeTable {
        /// Output CSV path; prints a summary when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate an example configuration file
    Example {
        /// Output path for example config
        #[arg(short, long, default_value = "prevalence.yaml")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Estimate {
            registry,
            formula,
            config,
            years,
            population_size,
            cure_time,
            bootstrap,
            survival_model,
            life_table,
            seed,
            threads,
            output,
            format,
        } => {
            let overrides = Overrides {
                years,
                population_size,
                cure_time,
                bootstrap,
                survival_model,
                seed,
                threads,
            };
            cmd_estimate(
                &registry,
                &formula,
                config.as_ref(),
                overrides,
                life_table.as_ref(),
                output.as_ref(),
                format,
            )
        }

        Commands::Incidence {
            registry,
            formula,
            start_date,
            registry_years,
            population_size,
        } => cmd_incidence(&registry, &formula, start_date, registry_years, population_size),

        Commands::Counted {
            registry,
            formula,
            start_date,
            registry_years,
        } => cmd_counted(&registry, &formula, start_date, registry_years),

        Commands::LifeTable { output } => cmd_life_table(output.as_ref()),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Command-line values that take precedence over the config file.
struct Overrides {
    years: Option<Vec<usize>>,
    population_size: Option<f64>,
    cure_time: Option<f64>,
    bootstrap: Option<usize>,
    survival_model: Option<CliSurvivalModel>,
    seed: Option<u64>,
    threads: Option<usize>,
}

impl Overrides {
    fn apply(self, mut config: PrevalenceConfig) -> PrevalenceConfig {
        if let Some(years) = self.years {
            config = config.with_years(years);
        }
        if let Some(n) = self.population_size {
            config = config.with_population_size(n);
        }
        if let Some(days) = self.cure_time {
            config = config.with_cure_time(days);
        }
        if let Some(n) = self.bootstrap {
            config = config.with_bootstrap(n);
        }
        if let Some(model) = self.survival_model {
            config = config.with_survival_model(model.into());
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(n) = self.threads {
            config = config.with_threads(n);
        }
        config
    }
}

fn load_registry(path: &PathBuf, formula: &str) -> Result<Registry> {
    eprintln!("Loading registry from {:?}...", path);
    let roles = RoleSpec::parse(formula)?;
    let registry = Registry::from_csv(path, &roles)?;
    eprintln!(
        "Loaded {} records ({} to {})",
        registry.len(),
        registry.earliest_entry(),
        registry.latest_entry()
    );
    Ok(registry)
}

/// Start date and number of whole registry years.
fn registry_window(
    registry: &Registry,
    start_date: Option<NaiveDate>,
    registry_years: Option<usize>,
) -> (NaiveDate, usize) {
    let start = start_date.unwrap_or_else(|| registry.earliest_entry());
    let years = registry_years
        .unwrap_or_else(|| default_num_registry_years(start, registry.latest_entry()));
    (start, years)
}

/// Estimate prevalence
fn cmd_estimate(
    registry_path: &PathBuf,
    formula: &str,
    config_path: Option<&PathBuf>,
    overrides: Overrides,
    life_table_path: Option<&PathBuf>,
    output_path: Option<&PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            eprintln!("Loading configuration from {:?}...", path);
            PrevalenceConfig::from_yaml(&std::fs::read_to_string(path)?)?
        }
        None => PrevalenceConfig::default(),
    };
    let config = overrides.apply(config);
    config.validate()?;

    let registry = load_registry(registry_path, formula)?;

    let mut prevalence = Prevalence::from_config(&config);
    if let Some(path) = life_table_path {
        eprintln!("Loading life table from {:?}...", path);
        prevalence = prevalence.life_table(LifeTable::from_csv(path)?);
    }

    eprintln!(
        "Estimating {:?}-year prevalence with {} bootstrap fits...",
        config.num_years_to_estimate, config.n_bootstrap
    );
    let result = prevalence.run(&registry)?;

    let text = match format {
        OutputFormat::Text => result.to_string(),
        OutputFormat::Json => result.to_json()?,
        OutputFormat::Yaml => result.to_yaml()?,
        OutputFormat::Tsv => {
            let mut buf = Vec::new();
            result.write_tsv(&mut buf)?;
            String::from_utf8_lossy(&buf).into_owned()
        }
    };

    match output_path {
        Some(path) => {
            std::fs::write(path, &text)?;
            eprintln!("Wrote results to {:?}", path);
        }
        None => println!("{}", text),
    }

    if result.p_value() < 0.05 {
        eprintln!(
            "Warning: simulated prevalence over the registry years differs from the counted value (p = {:.4})",
            result.p_value()
        );
    }

    Ok(())
}

/// Print diagnoses per registry year
fn cmd_incidence(
    registry_path: &PathBuf,
    formula: &str,
    start_date: Option<NaiveDate>,
    registry_years: Option<usize>,
    population_size: Option<f64>,
) -> Result<()> {
    let registry = load_registry(registry_path, formula)?;
    let (start, years) = registry_window(&registry, start_date, registry_years);
    let boundaries = determine_registry_years(start, years)?;
    let counts = raw_incidence(&registry.entry_dates(), start, years)?;

    println!("year_start\tyear_end\tdiagnoses\trate_per_100k");
    for (i, count) in counts.iter().enumerate() {
        let rate = population_size
            .map(|n| format!("{:.2}", *count as f64 / n * 1e5))
            .unwrap_or_else(|| "NA".to_string());
        println!("{}\t{}\t{}\t{}", boundaries[i], boundaries[i + 1], count, rate);
    }

    let total: usize = counts.iter().sum();
    eprintln!(
        "{} diagnoses over {} years ({:.1} per year)",
        total,
        years,
        total as f64 / years as f64
    );

    Ok(())
}

/// Print counted prevalence per registry year
fn cmd_counted(
    registry_path: &PathBuf,
    formula: &str,
    start_date: Option<NaiveDate>,
    registry_years: Option<usize>,
) -> Result<()> {
    let registry = load_registry(registry_path, formula)?;
    let (start, years) = registry_window(&registry, start_date, registry_years);
    let boundaries = determine_registry_years(start, years)?;
    let counted = counted_prevalence(&registry, start, years)?;

    eprintln!("Index date: {}", boundaries[years]);
    println!("years_before_index\tdiagnosed_from\talive_at_index");
    for (offset, count) in counted.iter().enumerate() {
        println!("{}\t{}\t{}", offset, boundaries[years - 1 - offset], count);
    }
    eprintln!("Total alive at index: {}", counted.iter().sum::<usize>());

    Ok(())
}

/// Print or export the bundled life table
fn cmd_life_table(output_path: Option<&PathBuf>) -> Result<()> {
    let table = LifeTable::default_table();

    if let Some(path) = output_path {
        table.to_csv(path)?;
        eprintln!("Wrote {} rows to {:?}", table.rows().len(), path);
        return Ok(());
    }

    println!("age\tsex\trate");
    for row in table.rows() {
        println!("{}\t{}\t{}", row.age, row.sex, row.rate);
    }

    Ok(())
}

/// Generate example configuration
fn cmd_example(output_path: &PathBuf) -> Result<()> {
    let config = PrevalenceConfig::default()
        .with_years(vec![5, 10, 20])
        .with_population_size(3_500_000.0)
        .with_bootstrap(500);
    let yaml = config.to_yaml()?;

    std::fs::write(output_path, &yaml)?;
    eprintln!("Wrote example configuration to {:?}", output_path);
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);

    Ok(())
}
