use chrono::{DateTime, NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::classifier::{RequestClassifier, UserAgentParser};
use crate::discovery::{LogLocation, DEFAULT_PREFIX};
use crate::error::Result;
use crate::incremental::{self, StartPoint, DEFAULT_SNAPSHOT_FILE};
use crate::parallel_processing::{process_lanes, LaneStats};
use crate::partition::{assign_lanes, DayGap, DEFAULT_LANES};
use crate::storage::StorageLocation;

/// Configuration for one incremental run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source: LogLocation,
    /// Prior snapshot; `None` means `<output_dir>/daily_metrics.feather`.
    pub snapshot: Option<StorageLocation>,
    pub output_dir: PathBuf,
    /// Optional second location the new snapshot is copied to.
    pub cache: Option<StorageLocation>,
    pub lanes: usize,
    /// First day to process when there is no prior snapshot.
    pub since: Option<NaiveDate>,
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            source: LogLocation::directory(".", DEFAULT_PREFIX),
            snapshot: None,
            output_dir: PathBuf::from("."),
            cache: None,
            lanes: DEFAULT_LANES,
            since: None,
            show_progress: true,
        }
    }
}

impl RunConfig {
    pub fn snapshot_location(&self) -> StorageLocation {
        self.snapshot
            .clone()
            .unwrap_or_else(|| StorageLocation::local(self.output_dir.join(DEFAULT_SNAPSHOT_FILE)))
    }

    pub fn output_location(&self) -> StorageLocation {
        StorageLocation::local(self.output_dir.join(DEFAULT_SNAPSHOT_FILE))
    }
}

/// Gap between processed days, as reported in run statistics.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GapReport {
    pub after: NaiveDate,
    pub before: NaiveDate,
    pub missing_days: i64,
}

impl From<&DayGap> for GapReport {
    fn from(gap: &DayGap) -> Self {
        Self {
            after: gap.after,
            before: gap.before,
            missing_days: gap.missing_days(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FileErrorReport {
    pub file: String,
    pub error: String,
}

/// Statistics for a complete run
#[derive(Serialize, Debug, Clone)]
pub struct RunSummary {
    pub run_start: DateTime<Utc>,
    pub total_processing_time_ms: u64,
    pub files_discovered: usize,
    /// New files selected for this run.
    pub files_new: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub days_processed: usize,
    pub day_gaps: Vec<GapReport>,
    pub rows_new: usize,
    pub rows_dropped_incomplete: usize,
    pub incomplete_day: Option<NaiveDate>,
    pub rows_persisted: usize,
    /// False when the run ended without writing anything.
    pub snapshot_written: bool,
    pub lanes: Vec<LaneStats>,
    pub file_errors: Vec<FileErrorReport>,
}

impl RunSummary {
    fn new(run_start: DateTime<Utc>) -> Self {
        Self {
            run_start,
            total_processing_time_ms: 0,
            files_discovered: 0,
            files_new: 0,
            files_processed: 0,
            files_failed: 0,
            days_processed: 0,
            day_gaps: Vec::new(),
            rows_new: 0,
            rows_dropped_incomplete: 0,
            incomplete_day: None,
            rows_persisted: 0,
            snapshot_written: false,
            lanes: Vec::new(),
            file_errors: Vec::new(),
        }
    }
}

fn progress_bar(days: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(days as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} days {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

/// Run one incremental aggregation.
///
/// Listing failures, a corrupt prior snapshot and persist failures abort the
/// run. Files that cannot be read or parsed are skipped and reported in the
/// summary. When there are no new files nothing is written.
pub async fn run(config: RunConfig, parser: Arc<dyn UserAgentParser>) -> Result<RunSummary> {
    let run_start = Utc::now();
    let start_time = Instant::now();
    let mut summary = RunSummary::new(run_start);
    info!("Starting incremental run from {}", config.source);

    let snapshot_location = config.snapshot_location();
    let prior = incremental::load_snapshot(&snapshot_location).await?;
    let start = StartPoint::resolve(prior.as_ref(), config.since);

    let discovery = config.source.list().await?;
    summary.files_discovered = discovery.logs.len();
    summary.file_errors.extend(discovery.rejected.iter().map(|e| FileErrorReport {
        file: e.id().to_string(),
        error: e.to_string(),
    }));

    let fresh = incremental::new_files(discovery.logs, start);
    summary.files_new = fresh.len();
    if fresh.is_empty() {
        info!("No new log files after {:?}; nothing to do", start);
        summary.total_processing_time_ms = start_time.elapsed().as_millis() as u64;
        return Ok(summary);
    }

    let plan = assign_lanes(fresh, config.lanes)?;
    summary.day_gaps = plan.gaps.iter().map(GapReport::from).collect();

    let progress = progress_bar(plan.day_count(), config.show_progress);
    let outcome = process_lanes(
        plan,
        Arc::new(config.source.clone()),
        RequestClassifier::new(parser),
        progress,
    )
    .await?;

    summary.files_processed = outcome.files_processed();
    summary.files_failed = outcome.files_failed();
    summary.days_processed = outcome.days_processed();
    summary.rows_new = outcome.metrics.len();
    summary.lanes = outcome.lanes;
    summary.file_errors.extend(outcome.file_errors.iter().map(|e| FileErrorReport {
        file: e.id().to_string(),
        error: e.to_string(),
    }));

    if outcome.metrics.is_empty() {
        warn!(
            "{} new files produced no metrics ({} failed); snapshot left untouched",
            summary.files_new, summary.files_failed
        );
        summary.total_processing_time_ms = start_time.elapsed().as_millis() as u64;
        return Ok(summary);
    }

    let merged = incremental::merge(prior, outcome.metrics);
    summary.rows_dropped_incomplete = merged.rows_dropped;
    summary.incomplete_day = merged.incomplete_day;
    summary.rows_persisted = merged.snapshot.len();

    let output = config.output_location();
    let mut targets = vec![&output];
    if snapshot_location != output {
        targets.push(&snapshot_location);
    }
    if let Some(cache) = config.cache.as_ref() {
        if !targets.contains(&cache) {
            targets.push(cache);
        }
    }
    incremental::persist(&merged.snapshot, &targets).await?;
    summary.snapshot_written = true;

    summary.total_processing_time_ms = start_time.elapsed().as_millis() as u64;
    info!(
        "Run complete: {} files processed, {} failed, {} rows persisted in {}ms",
        summary.files_processed,
        summary.files_failed,
        summary.rows_persisted,
        summary.total_processing_time_ms
    );
    Ok(summary)
}
