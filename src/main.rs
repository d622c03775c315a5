// 🧾 registry-recon - Command line front end
//
// Import dataset versions, fill the score cache, reconcile and check
// overrides against one SQLite database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::Connection;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use registry_recon::export::{write_rows, write_warnings};
use registry_recon::import::{load_entities_csv, load_overrides_csv, load_results_csv};
use registry_recon::{
    check_consistency, compute_scores, find_missing, import_entities, import_overrides, import_results,
    list_datasets, open_database, reconcile, resolve_dataset, DatasetKind, OutputFormat, ReconConfig,
    ReconSummary, Severity,
};

#[derive(Parser, Debug)]
#[command(name = "registry-recon", version, about = "Reconcile entities against public license registries")]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// SQLite database file
    #[arg(long, env = "RECON_DB", default_value = "recon.db", global = true)]
    db: PathBuf,

    /// TOML file with scoring, threshold and scheduler settings
    #[arg(long, env = "RECON_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a CSV file as a new immutable dataset version
    Import {
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(long)]
        tag: String,
        #[arg(long)]
        file: PathBuf,
    },

    /// List imported dataset versions
    Datasets {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },

    /// List (entity, result) pairs that have no score yet
    Missing(PairArgs),

    /// Score every missing pair
    Score {
        #[command(flatten)]
        pair: PairArgs,
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Reconciled status per (entity, jurisdiction)
    Reconcile {
        #[command(flatten)]
        pair: PairArgs,
        #[arg(long)]
        overrides: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Consistency warnings for an override dataset
    Check {
        #[command(flatten)]
        pair: PairArgs,
        #[arg(long)]
        overrides: String,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(clap::Args, Debug)]
struct PairArgs {
    /// Entity dataset tag
    #[arg(long)]
    entities: String,
    /// Result dataset tag
    #[arg(long)]
    results: String,
}

#[derive(clap::Args, Debug)]
struct OutputArgs {
    #[arg(long, value_enum, default_value_t = FormatArg::Table)]
    format: FormatArg,
    /// Write to a file instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Entities,
    Results,
    Overrides,
}

impl From<KindArg> for DatasetKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Entities => DatasetKind::Entities,
            KindArg::Results => DatasetKind::Results,
            KindArg::Overrides => DatasetKind::Overrides,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Table,
    Json,
    Csv,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Table => OutputFormat::Table,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Csv => OutputFormat::Csv,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("❌ {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let config = load_config(cli.config.as_deref())?;
    let conn = open_database(&cli.db).with_context(|| format!("Failed to open database: {}", cli.db.display()))?;
    tracing::debug!(db = %cli.db.display(), "database ready");

    match cli.command {
        Commands::Import { kind, tag, file } => run_import(&conn, kind.into(), &tag, &file),
        Commands::Datasets { kind } => run_datasets(&conn, kind.map(Into::into)),
        Commands::Missing(pair) => run_missing(&conn, &pair),
        Commands::Score { pair, batch_size } => run_score(&conn, &pair, batch_size, &config),
        Commands::Reconcile { pair, overrides, output } => {
            run_reconcile(&conn, &pair, overrides.as_deref(), &output, &config)
        }
        Commands::Check { pair, overrides, output } => run_check(&conn, &pair, &overrides, &output),
    }
}

fn load_config(path: Option<&Path>) -> Result<ReconConfig> {
    match path {
        Some(path) => ReconConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(ReconConfig::default()),
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run_import(conn: &Connection, kind: DatasetKind, tag: &str, file: &Path) -> Result<u8> {
    let version = match kind {
        DatasetKind::Entities => import_entities(conn, tag, &load_entities_csv(file)?)?,
        DatasetKind::Results => import_results(conn, tag, &load_results_csv(file)?)?,
        DatasetKind::Overrides => import_overrides(conn, tag, &load_overrides_csv(file)?)?,
    };

    println!(
        "✓ Imported {} {} as {} (tag {}, sha256 {})",
        version.row_count,
        kind,
        version.id,
        version.tag,
        &version.content_hash[..12.min(version.content_hash.len())]
    );
    Ok(0)
}

fn run_datasets(conn: &Connection, kind: Option<DatasetKind>) -> Result<u8> {
    let versions = list_datasets(conn, kind)?;
    if versions.is_empty() {
        println!("No datasets imported yet");
        return Ok(0);
    }

    println!("{:<6} {:<10} {:<24} {:>8}  {}", "ID", "KIND", "TAG", "ROWS", "CREATED");
    for v in versions {
        println!(
            "{:<6} {:<10} {:<24} {:>8}  {}",
            v.id.0,
            v.kind,
            v.tag,
            v.row_count,
            v.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(0)
}

fn run_missing(conn: &Connection, pair: &PairArgs) -> Result<u8> {
    let entities = resolve_dataset(conn, DatasetKind::Entities, &pair.entities)?;
    let results = resolve_dataset(conn, DatasetKind::Results, &pair.results)?;

    let missing = find_missing(conn, entities.id, results.id)?;
    for (entity_id, result_id) in &missing {
        println!("{}\t{}", entity_id, result_id);
    }
    eprintln!("{} unscored pair(s)", missing.len());
    Ok(0)
}

fn run_score(conn: &Connection, pair: &PairArgs, batch_size: Option<usize>, config: &ReconConfig) -> Result<u8> {
    let entities = resolve_dataset(conn, DatasetKind::Entities, &pair.entities)?;
    let results = resolve_dataset(conn, DatasetKind::Results, &pair.results)?;
    let batch_size = batch_size.unwrap_or(config.scheduler.batch_size);

    let stats = compute_scores(conn, entities.id, results.id, batch_size, config)?;
    println!(
        "✓ Scored {} pair(s) in {} batch(es), {} failed",
        stats.scored, stats.batches, stats.failed
    );
    Ok(if stats.failed > 0 { 2 } else { 0 })
}

fn run_reconcile(
    conn: &Connection,
    pair: &PairArgs,
    overrides: Option<&str>,
    output: &OutputArgs,
    config: &ReconConfig,
) -> Result<u8> {
    let entities = resolve_dataset(conn, DatasetKind::Entities, &pair.entities)?;
    let results = resolve_dataset(conn, DatasetKind::Results, &pair.results)?;
    let overrides = overrides
        .map(|tag| resolve_dataset(conn, DatasetKind::Overrides, tag))
        .transpose()?;

    let rows = reconcile(conn, entities.id, results.id, overrides.map(|o| o.id), config)?;

    let mut out = open_output(output.out.as_deref())?;
    write_rows(&rows, output.format.into(), &mut out)?;
    out.flush()?;

    if output.out.is_some() || output.format != FormatArg::Table {
        eprintln!("{}", ReconSummary::of(&rows).line());
    }
    Ok(0)
}

fn run_check(conn: &Connection, pair: &PairArgs, overrides: &str, output: &OutputArgs) -> Result<u8> {
    let entities = resolve_dataset(conn, DatasetKind::Entities, &pair.entities)?;
    let results = resolve_dataset(conn, DatasetKind::Results, &pair.results)?;
    let overrides = resolve_dataset(conn, DatasetKind::Overrides, overrides)?;

    let warnings = check_consistency(conn, entities.id, results.id, overrides.id)?;

    let mut out = open_output(output.out.as_deref())?;
    write_warnings(&warnings, output.format.into(), &mut out)?;
    out.flush()?;

    let errors = warnings.iter().filter(|w| w.severity == Severity::Error).count();
    Ok(if errors > 0 { 1 } else { 0 })
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}
