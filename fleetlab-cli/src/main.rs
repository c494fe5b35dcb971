//! FleetLab CLI — enrich, validate and config commands.
//!
//! Commands:
//! - `enrich`: decode VINs from a CSV and attach fuel-economy data
//! - `validate`: check the VIN column of a CSV without any network access
//! - `config`: print the effective configuration as TOML

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fleetlab_core::data::{EnrichProgress, StdoutProgress};
use fleetlab_core::domain::Vin;
use fleetlab_runner::{
    available_fields, check_selection, read_rows, save_csv, save_json, BatchSummary, EnrichConfig,
    Enricher, ProcessOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fleetlab",
    version,
    about = "FleetLab CLI — VIN decoding and fuel-economy enrichment for fleet lists"
)]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich every row of a CSV file.
    Enrich {
        /// Input CSV with a VIN column.
        input: PathBuf,

        /// Output CSV path. Defaults to `<input>_enriched.csv`.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Also write the records as JSON to this path.
        #[arg(long)]
        json: Option<PathBuf>,

        /// TOML config file. Defaults are used for anything it omits.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Maximum number of rows enriched at once.
        #[arg(long)]
        max_parallelism: Option<usize>,

        /// Whole-batch deadline in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Disable the response cache.
        #[arg(long, default_value_t = false)]
        no_cache: bool,

        /// Comma-separated output columns (see --list-fields).
        #[arg(long, value_delimiter = ',')]
        fields: Option<Vec<String>>,

        /// Print every exportable column after enrichment.
        #[arg(long, default_value_t = false)]
        list_fields: bool,
    },
    /// Check VINs in a CSV file without calling any provider.
    Validate {
        /// Input CSV with a VIN column.
        input: PathBuf,
    },
    /// Print the configuration as TOML.
    Config {
        /// Show this file merged over the defaults instead of the defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Enrich {
            input,
            output,
            json,
            config,
            max_parallelism,
            timeout,
            no_cache,
            fields,
            list_fields,
        } => run_enrich(EnrichArgs {
            input,
            output,
            json,
            config,
            max_parallelism,
            timeout,
            no_cache,
            fields,
            list_fields,
        }),
        Commands::Validate { input } => run_validate(&input),
        Commands::Config { config } => run_config(config.as_deref()),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

struct EnrichArgs {
    input: PathBuf,
    output: Option<PathBuf>,
    json: Option<PathBuf>,
    config: Option<PathBuf>,
    max_parallelism: Option<usize>,
    timeout: Option<u64>,
    no_cache: bool,
    fields: Option<Vec<String>>,
    list_fields: bool,
}

fn load_config(path: Option<&Path>) -> Result<EnrichConfig> {
    match path {
        Some(p) => EnrichConfig::from_file(p)
            .with_context(|| format!("loading config {}", p.display())),
        None => Ok(EnrichConfig::default()),
    }
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vehicles".to_string());
    input.with_file_name(format!("{stem}_enriched.csv"))
}

fn run_enrich(args: EnrichArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(n) = args.max_parallelism {
        config.pipeline.max_parallelism = n;
    }
    if let Some(secs) = args.timeout {
        config.pipeline.deadline_secs = Some(secs);
    }
    if args.no_cache {
        config.cache.enabled = false;
    }
    config.validate()?;
    tracing::debug!(config = ?config, "effective configuration");

    let rows = read_rows(&args.input)?;
    if rows.is_empty() {
        bail!("{} has no data rows", args.input.display());
    }
    if let Some(fields) = &args.fields {
        check_selection(&rows, fields)?;
    }

    let enricher = Enricher::from_config(&config)?;
    let progress: Arc<dyn EnrichProgress> = Arc::new(StdoutProgress);
    let records = enricher.process(&rows, &ProcessOptions::from_config(&config), Some(progress))?;

    let output = args.output.unwrap_or_else(|| default_output(&args.input));
    save_csv(&records, args.fields.as_deref(), &output)?;
    println!("Enriched CSV saved to: {}", output.display());
    if let Some(json_path) = &args.json {
        save_json(&records, json_path)?;
        println!("JSON saved to: {}", json_path.display());
    }

    if args.list_fields {
        println!("\nAvailable fields:");
        for field in available_fields(&records) {
            println!("  {field}");
        }
    }

    let summary = BatchSummary::from_records(&records).with_analysis(&records, &config.analysis);
    println!("\n{summary}");
    let stats = enricher.cache().stats();
    if enricher.cache().is_enabled() {
        println!(
            "Cache:    {} hits, {} misses ({:.1}% hit rate), {} shared in flight",
            stats.hits,
            stats.misses,
            stats.hit_rate() * 100.0,
            stats.coalesced
        );
    }

    if summary.has_failures() {
        for record in records.iter().filter(|r| !r.errors().is_empty()) {
            eprintln!(
                "{} ({}): {}",
                record.vin(),
                record.display_name(),
                record.error_summary()
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_validate(input: &Path) -> Result<()> {
    let rows = read_rows(input)?;
    let mut invalid = 0usize;

    for (i, row) in rows.iter().enumerate() {
        if let Err(e) = Vin::parse(&row.vin) {
            invalid += 1;
            // +2: header line and 1-based numbering
            println!("row {}: '{}': {e}", i + 2, row.vin);
        }
    }

    println!(
        "{} rows, {} valid VINs, {} invalid",
        rows.len(),
        rows.len() - invalid,
        invalid
    );
    if invalid > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn run_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}
