//! CLI entry point for the stock reconciliation pipeline.

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use serde_json::json;
use std::path::{Path, PathBuf};
use stock_recon::storage::{read_parquet, write_csv};
use stock_recon::types::{ITEM_CODE, WHS_CODE};
use stock_recon::{
    BatchResult, Pipeline, PipelineConfig, PipelineResult, PostgresSink, ReportGenerator,
    SinkConfig, StockRecord,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Warehouse stock snapshot reconciliation",
    long_about = "Reconciles wide daily stock snapshots into a curated long time series.\n\n\
                  ENVIRONMENT VARIABLES (load):\n  \
                  STOCK_SINK_URL         PostgreSQL connection URL\n  \
                  STOCK_SINK_USER        Database user\n  \
                  STOCK_SINK_PASSWORD    Database password\n  \
                  STOCK_SINK_TABLE       Target table (default: stock_history)\n\n\
                  EXAMPLES:\n  \
                  # Clean one period\n  \
                  stock-recon clean -i data/2024.csv\n\n  \
                  # Clean every yyyy.csv in a directory, then merge\n  \
                  stock-recon clean -i data/ && stock-recon merge\n\n  \
                  # Append the merged history to PostgreSQL\n  \
                  stock-recon load"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Suppress progress output (only show warnings and errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output JSON to stdout instead of human-readable text
    ///
    /// Disables all logs; only the final JSON is written.
    #[arg(long, global = true)]
    json: bool,

    /// Output directory for curated tables and reports
    #[arg(short, long, default_value = "output", global = true)]
    output_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean one period file or every yyyy.csv in a directory
    Clean(CleanArgs),
    /// Merge every cleaned_stock_<year>.parquet into final_cleaned_stock.parquet
    Merge {
        /// Also write a CSV export next to the merged table
        #[arg(long)]
        csv: bool,
    },
    /// Show row count, schema and a sample of a curated table
    Inspect {
        /// Curated Parquet file
        file: PathBuf,
    },
    /// Append a curated table to the PostgreSQL sink
    Load {
        /// Curated Parquet file (default: the merged history)
        file: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct CleanArgs {
    /// Wide CSV export (yyyy.csv) or a directory of them
    #[arg(short, long)]
    input: PathBuf,

    /// Period label; inferred from a yyyy.csv file name when omitted
    #[arg(short, long)]
    year: Option<String>,

    /// Absolute day-over-day jump that flags an outlier
    #[arg(long, default_value = "500.0")]
    abs_jump: f64,

    /// Relative day-over-day jump (multiple of the previous value)
    #[arg(long, default_value = "5.0")]
    rel_jump: f64,

    /// Literal quantity cell marking a discontinued item
    #[arg(long, default_value = "DC")]
    sentinel: String,

    /// Worker threads for the repair pass (0 = one per core)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Also write a CSV export next to each curated table
    #[arg(long)]
    csv: bool,

    /// Skip the JSON run report
    #[arg(long)]
    no_report: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is disabled so stdout carries only JSON.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.quiet, cli.json);

    // Load environment variables from .env file
    dotenv().ok();

    match &cli.command {
        Command::Clean(args) => run_clean(&cli, args),
        Command::Merge { csv } => run_merge(&cli, *csv),
        Command::Inspect { file } => run_inspect(&cli, file),
        Command::Load { file } => run_load(&cli, file.as_deref()),
    }
}

fn build_pipeline(cli: &Cli, config: PipelineConfig) -> Result<Pipeline> {
    let mut builder = Pipeline::builder().config(config);
    if !cli.quiet && !cli.json {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.display_name(),
                update.message
            );
        });
    }
    Ok(builder.build()?)
}

fn run_clean(cli: &Cli, args: &CleanArgs) -> Result<()> {
    if !args.input.exists() {
        return Err(anyhow!("Input not found: {}", args.input.display()));
    }

    let config = PipelineConfig::builder()
        .abs_jump(args.abs_jump)
        .rel_jump(args.rel_jump)
        .discontinued_sentinel(&args.sentinel)
        .num_threads(args.threads)
        .output_dir(&cli.output_dir)
        .write_report(!args.no_report)
        .build()?;
    let pipeline = build_pipeline(cli, config)?;

    if args.input.is_dir() {
        if args.year.is_some() {
            warn!("--year is ignored in directory mode; periods come from file names");
        }
        let batch = pipeline.process_dir(&args.input)?;
        for result in &batch.results {
            export_csv(args.csv, result)?;
        }
        print_batch(cli, pipeline.config(), &batch)?;
        if !batch.failures.is_empty() {
            return Err(anyhow!(
                "{} of {} periods failed",
                batch.failures.len(),
                batch.results.len() + batch.failures.len()
            ));
        }
        return Ok(());
    }

    let result = pipeline
        .process_file(&args.input, args.year.as_deref())
        .with_context(|| format!("Processing {}", args.input.display()))?;
    export_csv(args.csv, &result)?;

    if cli.json {
        let report = ReportGenerator::build_run_report(
            pipeline.config(),
            Some(&args.input),
            result.output_path.as_deref(),
            &result.blocks,
            &result.summary,
        );
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_summary(&result);
    }
    Ok(())
}

fn export_csv(enabled: bool, result: &PipelineResult) -> Result<()> {
    if let (true, Some(path)) = (enabled, &result.output_path) {
        let mut curated = result.curated.clone();
        write_csv(&mut curated, &path.with_extension("csv"))?;
    }
    Ok(())
}

fn run_merge(cli: &Cli, csv: bool) -> Result<()> {
    let config = PipelineConfig::builder()
        .output_dir(&cli.output_dir)
        .build()?;
    let pipeline = build_pipeline(cli, config)?;

    let Some(merged) = pipeline.merge_outputs()? else {
        info!("Nothing to merge in {}", cli.output_dir.display());
        if cli.json {
            println!("{}", json!({ "merged": false, "sources": [] }));
        }
        return Ok(());
    };

    if let (true, Some(path)) = (csv, &merged.output_path) {
        let mut table = merged.table.clone();
        write_csv(&mut table, &path.with_extension("csv"))?;
    }

    if cli.json {
        let report = ReportGenerator::build_merge_report(
            &merged.sources,
            merged.output_path.as_deref(),
            &merged.stats,
        );
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("{}", "=".repeat(80));
        println!("MERGE COMPLETE");
        println!("{}", "=".repeat(80));
        for source in &merged.sources {
            println!("  + {}", source.display());
        }
        println!(
            "Rows: {} in, {} duplicates removed, {} out",
            merged.stats.rows_in, merged.stats.duplicates_removed, merged.stats.rows_out
        );
        if let Some(path) = &merged.output_path {
            println!("Output: {}", path.display());
        }
    }
    Ok(())
}

fn run_inspect(cli: &Cli, file: &Path) -> Result<()> {
    let df = read_parquet(file)?;
    let items = df.column(ITEM_CODE)?.n_unique()?;
    let warehouses = df.column(WHS_CODE)?.n_unique()?;

    if cli.json {
        let schema: Vec<_> = df
            .schema()
            .iter()
            .map(|(name, dtype)| json!({ "name": name.as_str(), "dtype": dtype.to_string() }))
            .collect();
        let out = json!({
            "file": file.display().to_string(),
            "rows": df.height(),
            "schema": schema,
            "distinct_items": items,
            "distinct_warehouses": warehouses,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Rows: {}", df.height());
    println!();
    println!("Schema:");
    for (name, dtype) in df.schema().iter() {
        println!("  {:<14} {}", name.as_str(), dtype);
    }
    println!();
    println!("Distinct ItemCode: {}", items);
    println!("Distinct WhsCode:  {}", warehouses);
    println!();
    println!("{}", df.head(Some(10)));
    Ok(())
}

fn run_load(cli: &Cli, file: Option<&Path>) -> Result<()> {
    // Fail on missing connection settings before touching any data
    let sink_config = SinkConfig::from_env()?;

    let path = match file {
        Some(p) => p.to_path_buf(),
        None => PipelineConfig::builder()
            .output_dir(&cli.output_dir)
            .build()?
            .merged_output_path(),
    };
    let df = read_parquet(&path)?;
    let records = StockRecord::from_frame(&df)?;
    info!("Loading {} rows from {}", records.len(), path.display());

    let mut sink = PostgresSink::connect(&sink_config)?;
    sink.ensure_table()?;
    let written = sink.append(&records).inspect_err(|e| error!("Load failed: {}", e))?;

    if cli.json {
        let out = json!({
            "file": path.display().to_string(),
            "table": sink_config.table,
            "rows": written,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "Appended {} rows from {} to {}",
            written,
            path.display(),
            sink_config.table
        );
    }
    Ok(())
}

fn print_batch(cli: &Cli, config: &PipelineConfig, batch: &BatchResult) -> Result<()> {
    if cli.json {
        let runs: Vec<_> = batch
            .results
            .iter()
            .map(|r| {
                ReportGenerator::build_run_report(
                    config,
                    None,
                    r.output_path.as_deref(),
                    &r.blocks,
                    &r.summary,
                )
            })
            .collect();
        let failures: Vec<_> = batch
            .failures
            .iter()
            .map(|f| json!({ "period": f.period, "path": f.path.display().to_string(), "error": f.error }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "runs": runs, "failures": failures }))?
        );
        return Ok(());
    }

    for result in &batch.results {
        print_run_summary(result);
    }
    for failure in &batch.failures {
        println!("FAILED {} ({}): {}", failure.period, failure.path.display(), failure.error);
    }
    Ok(())
}

/// Print a human-readable summary of one period run.
fn print_run_summary(result: &PipelineResult) {
    let s = &result.summary;

    println!();
    println!("{}", "=".repeat(80));
    println!("PERIOD {} COMPLETE", s.period);
    println!("{}", "=".repeat(80));
    println!();

    println!("Items: {}  Blocks: {}  Rows reshaped: {}", s.items, s.blocks, s.rows_reshaped);
    println!("Cleaning:");
    println!("  Null keys dropped:     {}", s.clean.null_key_dropped);
    println!("  Discontinued markers:  {}", s.clean.discontinued);
    println!("  Non-numeric nulled:    {}", s.clean.non_numeric_nulled);
    println!("  Zero quantities:       {}", s.clean.zero_dropped);
    println!("  Unparseable dates:     {}", s.clean.unparseable_dates);
    println!("  Duplicates removed:    {}", s.clean.duplicates_removed);
    println!("Repair ({} series):", s.repair.series);
    println!(
        "  Outliers flagged:      {} (abs {}, rel {}, both {})",
        s.repair.outliers_flagged(),
        s.repair.outliers_abs_only,
        s.repair.outliers_rel_only,
        s.repair.outliers_both
    );
    println!(
        "  Replaced from prev/next: {}/{}",
        s.repair.replaced_from_prev, s.repair.replaced_from_next
    );
    println!("  Nulls filled:          {}", s.repair.nulls_filled);
    println!("  Nulls remaining:       {}", s.repair.nulls_remaining);
    println!("  Duplicates removed:    {}", s.repair.duplicates_removed);
    println!();
    println!("Rows out: {}  ({}ms)", s.rows_out, s.duration_ms);
    if let Some(path) = &result.output_path {
        println!("Output: {}", path.display());
    }

    if !s.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &s.warnings {
            println!("  ! {}", warning);
        }
    }
    println!("{}", "=".repeat(80));
}
