use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use phl_taxitrips::app::anonymize_use_case::AnonymizeUseCase;
use phl_taxitrips::app::fuzz_use_case::FuzzUseCase;
use phl_taxitrips::app::normalize_use_case::{NormalizeUseCase, VendorInput};
use phl_taxitrips::app::ports::FindingSink;
use phl_taxitrips::app::run_use_case::RunUseCase;
use phl_taxitrips::app::upload_use_case::UploadUseCase;
use phl_taxitrips::app::validate_use_case::ValidateUseCase;
use phl_taxitrips::config::Config;
use phl_taxitrips::domain::{AnonymizedTripRecord, DataSource, FuzziedTripRecord, TripRecord};
use phl_taxitrips::infra::csv_io::read_records;
use phl_taxitrips::infra::{CsvSink, DiscardFindings, NdjsonFindingSink, RawRowReader, SqliteIdentifierStore, SqliteTripStore};
use phl_taxitrips::logging;
use phl_taxitrips::observability;
use phl_taxitrips::pipeline::processing::fuzz::Fuzzer;
use phl_taxitrips::pipeline::processing::validate::Validator;

#[derive(Parser)]
#[command(name = "phl_taxitrips")]
#[command(about = "Philadelphia taxi trip normalization, anonymization and public release")]
#[command(version = "0.1.0")]
struct Cli {
    /// TOML config file (defaults to phl_taxitrips.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Write a Prometheus metrics snapshot here on exit
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, normalize and merge vendor exports into one canonical file
    Normalize {
        /// Headerless Verifone exports
        #[arg(long, num_args = 1..)]
        verifone: Vec<PathBuf>,
        /// CMT exports with a header row
        #[arg(long, num_args = 1..)]
        cmt: Vec<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a normalized file and report findings
    Validate {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// NDJSON findings report
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Upsert a normalized file into the raw trips table
    UploadRaw {
        input: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Replace medallion and chauffeur numbers with surrogate ids
    Anonymize {
        input: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generalize time and location for public release
    Fuzzy {
        input: PathBuf,
        /// CSV of anchor points (anchor_id,lat,lon)
        #[arg(long)]
        anchors: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upsert a fuzzed file into the public trips table
    UploadPublic {
        input: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Run every stage in sequence
    Run {
        #[arg(long, num_args = 1..)]
        verifone: Vec<PathBuf>,
        #[arg(long, num_args = 1..)]
        cmt: Vec<PathBuf>,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn vendor_inputs(verifone: &[PathBuf], cmt: &[PathBuf]) -> Result<Vec<VendorInput>> {
    let mut inputs = Vec::with_capacity(verifone.len() + cmt.len());
    for (source, paths) in [(DataSource::Verifone, verifone), (DataSource::Cmt, cmt)] {
        for path in paths {
            let rows = RawRowReader::open(path).with_context(|| format!("opening {} export", source))?;
            inputs.push(VendorInput::new(source, path.display().to_string(), rows));
        }
    }
    if inputs.is_empty() {
        anyhow::bail!("no input files: pass --verifone and/or --cmt");
    }
    Ok(inputs)
}

fn findings_sink(report: Option<&Path>) -> Result<Box<dyn FindingSink>> {
    Ok(match report {
        Some(path) => Box::new(NdjsonFindingSink::create(path)?),
        None => Box::new(DiscardFindings),
    })
}

fn write_metrics(path: &Path) -> Result<()> {
    if let Some(snapshot) = observability::render() {
        std::fs::write(path, snapshot).with_context(|| format!("writing metrics to {}", path.display()))?;
        info!(path = %path.display(), "Metrics snapshot written");
    }
    Ok(())
}

async fn execute(command: Commands, mut config: Config) -> Result<()> {
    match command {
        Commands::Normalize { verifone, cmt, output } => {
            let inputs = vendor_inputs(&verifone, &cmt)?;
            let mut sink = CsvSink::create(output.as_deref())?;
            let report = NormalizeUseCase::new().run(inputs, &mut sink)?;
            eprintln!("{}", report);
        }
        Commands::Validate { input, output, report } => {
            let trips = read_records::<TripRecord>(&input)?;
            let mut sink = CsvSink::create(output.as_deref())?;
            let mut findings = findings_sink(report.as_deref())?;
            let summary = ValidateUseCase::new(Validator::with_config(config.validate))
                .run(trips, &mut sink, findings.as_mut())?;
            eprintln!("{}", summary);
        }
        Commands::UploadRaw { input, db } => {
            let db = db.unwrap_or(config.storage.database);
            let store = SqliteTripStore::open(&db, config.storage.upsert_group_size)?;
            let report = UploadUseCase::new(Arc::new(store))
                .upload_raw(read_records::<TripRecord>(&input)?)
                .await?;
            eprintln!("{}", report);
        }
        Commands::Anonymize { input, db, output } => {
            let db = db.unwrap_or(config.storage.database);
            let store = SqliteIdentifierStore::open(&db)?;
            let mut sink = CsvSink::create(output.as_deref())?;
            let report = AnonymizeUseCase::new(Arc::new(store)).run(read_records::<TripRecord>(&input)?, &mut sink)?;
            eprintln!("{}", report);
        }
        Commands::Fuzzy { input, anchors, output } => {
            if anchors.is_some() {
                config.fuzz.anchors_file = anchors;
            }
            let fuzzer = Fuzzer::from_config(config.fuzz, config.validate.service_area)?;
            let mut sink = CsvSink::create(output.as_deref())?;
            let report = FuzzUseCase::new(fuzzer).run(read_records::<AnonymizedTripRecord>(&input)?, &mut sink)?;
            eprintln!("{}", report);
        }
        Commands::UploadPublic { input, db } => {
            let db = db.unwrap_or(config.storage.database);
            let store = SqliteTripStore::open(&db, config.storage.upsert_group_size)?;
            let report = UploadUseCase::new(Arc::new(store))
                .upload_public(read_records::<FuzziedTripRecord>(&input)?)
                .await?;
            eprintln!("{}", report);
        }
        Commands::Run {
            verifone,
            cmt,
            db,
            output,
            report,
        } => {
            let inputs = vendor_inputs(&verifone, &cmt)?;
            let db = db.unwrap_or(config.storage.database);
            let identifiers = SqliteIdentifierStore::open(&db)?;
            let trips = SqliteTripStore::open(&db, config.storage.upsert_group_size)?;
            let fuzzer = Fuzzer::from_config(config.fuzz, config.validate.service_area)?;

            let mut sink = CsvSink::create(output.as_deref())?;
            let mut findings = findings_sink(report.as_deref())?;
            let summary = RunUseCase::new(
                Validator::with_config(config.validate),
                fuzzer,
                Arc::new(identifiers),
                Arc::new(trips),
            )
            .run(inputs, &mut sink, findings.as_mut())
            .await?;
            eprintln!("{}", summary);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging("logs");

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    observability::init()?;

    let result = execute(cli.command, config).await;
    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    if let Some(path) = &cli.metrics_out {
        write_metrics(path)?;
    }
    result
}
