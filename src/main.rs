use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{ArgGroup, Parser};
use logtally::{
    pipeline, HeuristicUaParser, LogLocation, RunConfig, StorageLocation, DEFAULT_LANES,
    DEFAULT_PREFIX,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "logtally")]
#[command(about = "Incremental daily human/bot page-view metrics from extended-format access logs")]
#[command(version)]
#[command(group(ArgGroup::new("source").required(true).args(["log_dir", "bucket"])))]
struct Args {
    /// Local directory holding the log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Bucket holding the log objects (requires the `s3` feature)
    #[arg(long)]
    bucket: Option<String>,

    /// File-name or key prefix of the log files
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Directory the new snapshot is written to
    #[arg(long)]
    output_dir: PathBuf,

    /// Prior snapshot, local path or s3://bucket/key [default: <output-dir>/daily_metrics.feather]
    #[arg(long)]
    snapshot: Option<String>,

    /// Extra location the new snapshot is copied to, local path or s3://bucket/key
    #[arg(long)]
    cache: Option<String>,

    /// Number of parallel lanes
    #[arg(long, default_value_t = DEFAULT_LANES)]
    lanes: usize,

    /// First day to process when there is no prior snapshot (YYYY-MM-DD)
    #[arg(long)]
    since: Option<NaiveDate>,

    /// Suppress console progress bars
    #[arg(long)]
    no_progress: bool,

    /// Stats output file path [default: <output-dir>/run_stats.json]
    #[arg(long)]
    stats_out: Option<PathBuf>,
}

impl Args {
    fn run_config(&self) -> Result<RunConfig> {
        let source = match (&self.log_dir, &self.bucket) {
            (Some(dir), _) => LogLocation::directory(dir, self.prefix.as_str()),
            (None, Some(bucket)) => LogLocation::bucket(bucket.as_str(), self.prefix.as_str()),
            (None, None) => anyhow::bail!("one of --log-dir or --bucket is required"),
        };
        let snapshot = self.snapshot.as_deref().map(StorageLocation::parse).transpose()?;
        let cache = self.cache.as_deref().map(StorageLocation::parse).transpose()?;

        Ok(RunConfig {
            source,
            snapshot,
            output_dir: self.output_dir.clone(),
            cache,
            lanes: self.lanes,
            since: self.since,
            show_progress: !self.no_progress,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();

    info!("Starting logtally");
    info!(?args, "Parsed CLI arguments");

    let config = args.run_config()?;
    let parser = HeuristicUaParser::new().context("failed to build user-agent rules")?;
    let summary = pipeline::run(config, Arc::new(parser)).await?;

    if summary.files_new == 0 {
        println!("No new log data; snapshot unchanged");
        return Ok(());
    }

    let stats_out = args
        .stats_out
        .clone()
        .unwrap_or_else(|| args.output_dir.join("run_stats.json"));
    let stats_json = serde_json::to_string_pretty(&summary)?;
    // Nothing may have been persisted yet, so the output directory can be missing
    if let Some(parent) = stats_out.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&stats_out, stats_json)
        .await
        .with_context(|| format!("failed to write stats to {}", stats_out.display()))?;
    info!("Run statistics written to {}", stats_out.display());

    println!("logtally v{} - run complete", env!("CARGO_PKG_VERSION"));
    println!("  Files processed: {} ({} failed)", summary.files_processed, summary.files_failed);
    println!("  Days processed: {}", summary.days_processed);
    if !summary.day_gaps.is_empty() {
        println!("  Day gaps: {}", summary.day_gaps.len());
    }
    if let Some(day) = summary.incomplete_day {
        println!("  Held back as incomplete: {day}");
    }
    if summary.snapshot_written {
        println!("  Rows persisted: {}", summary.rows_persisted);
    } else {
        println!("  No metrics produced; snapshot unchanged");
    }

    Ok(())
}
