// Fork-join over lanes: each lane owns whole days, fetches their log objects
// asynchronously and runs parse + aggregate on the blocking pool.

use futures::future::join_all;
use indicatif::ProgressBar;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::aggregator::{aggregate_day, DailyPageMetric};
use crate::classifier::RequestClassifier;
use crate::discovery::LogLocation;
use crate::error::{FileError, PipelineError, Result};
use crate::partition::{DayPartition, LanePlan};
use crate::reader::parse_blobs;

/// Per-lane processing statistics
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneStats {
    pub lane: usize,
    pub days_processed: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub processing_time_ms: u64,
}

/// What one day produced.
#[derive(Debug, Default)]
pub struct DayOutput {
    pub metrics: Vec<DailyPageMetric>,
    pub files_processed: usize,
    pub failures: Vec<FileError>,
}

/// Joined result of all lanes, in lane order.
#[derive(Debug, Default)]
pub struct LaneOutcome {
    /// New metrics sorted by `(date, page)`.
    pub metrics: Vec<DailyPageMetric>,
    pub lanes: Vec<LaneStats>,
    pub file_errors: Vec<FileError>,
}

impl LaneOutcome {
    pub fn files_processed(&self) -> usize {
        self.lanes.iter().map(|l| l.files_processed).sum()
    }

    pub fn files_failed(&self) -> usize {
        self.lanes.iter().map(|l| l.files_failed).sum()
    }

    pub fn days_processed(&self) -> usize {
        self.lanes.iter().map(|l| l.days_processed).sum()
    }
}

/// Fetch, parse and aggregate every file of one day.
///
/// Unreadable or unparseable files are skipped. A day where no file could be
/// parsed yields no metrics.
pub async fn process_day(
    lane: usize,
    location: &LogLocation,
    partition: DayPartition,
    classifier: &RequestClassifier,
) -> Result<DayOutput> {
    let DayPartition { date, files } = partition;

    let fetched = join_all(files.iter().map(|id| async move {
        location.fetch(id).await.map(|bytes| (id.key.clone(), bytes))
    }))
    .await;

    let mut blobs = Vec::with_capacity(fetched.len());
    let mut failures = Vec::new();
    for result in fetched {
        match result {
            Ok(blob) => blobs.push(blob),
            Err(e) => {
                warn!("Couldn't fetch log file: {}", e);
                failures.push(e);
            }
        }
    }

    let classifier = classifier.clone();
    let (metrics, files_processed, parse_failures) = tokio::task::spawn_blocking(move || {
        let table = parse_blobs(blobs);
        let metrics: Vec<DailyPageMetric> = match &table.records {
            Some(records) => aggregate_day(date, records, &classifier).into_values().collect(),
            None => {
                warn!("No data for {}", date);
                Vec::new()
            }
        };
        (metrics, table.files_parsed, table.failures)
    })
    .await
    .map_err(|e| PipelineError::LaneFailed {
        lane,
        reason: e.to_string(),
    })?;

    failures.extend(parse_failures);
    debug!(
        "Lane {} finished {}: {} pages from {} files ({} failed)",
        lane,
        date,
        metrics.len(),
        files_processed,
        failures.len()
    );

    Ok(DayOutput {
        metrics,
        files_processed,
        failures,
    })
}

async fn process_lane(
    lane: usize,
    partitions: Vec<DayPartition>,
    location: Arc<LogLocation>,
    classifier: RequestClassifier,
    progress: ProgressBar,
) -> Result<(Vec<DailyPageMetric>, LaneStats, Vec<FileError>)> {
    let start_time = Instant::now();
    let mut stats = LaneStats {
        lane,
        ..LaneStats::default()
    };
    let mut metrics = Vec::new();
    let mut file_errors = Vec::new();

    for partition in partitions {
        let date = partition.date;
        let output = process_day(lane, &location, partition, &classifier).await?;

        stats.days_processed += 1;
        stats.files_processed += output.files_processed;
        stats.files_failed += output.failures.len();
        metrics.extend(output.metrics);
        file_errors.extend(output.failures);

        progress.set_message(date.to_string());
        progress.inc(1);
    }

    stats.processing_time_ms = start_time.elapsed().as_millis() as u64;
    info!(
        "Lane {} complete: {} days, {} files processed, {} failed in {}ms",
        lane,
        stats.days_processed,
        stats.files_processed,
        stats.files_failed,
        stats.processing_time_ms
    );
    Ok((metrics, stats, file_errors))
}

/// Run every lane of `plan` concurrently and join the results.
///
/// Lanes share nothing but the read-only location and classifier. Any lane
/// failure aborts the run; per-file failures are collected instead.
pub async fn process_lanes(
    plan: LanePlan,
    location: Arc<LogLocation>,
    classifier: RequestClassifier,
    progress: ProgressBar,
) -> Result<LaneOutcome> {
    info!(
        "Processing {} days ({} files) across {} lanes",
        plan.day_count(),
        plan.file_count(),
        plan.lanes.len()
    );

    let handles: Vec<_> = plan
        .lanes
        .into_iter()
        .enumerate()
        .map(|(lane, partitions)| {
            tokio::spawn(process_lane(
                lane,
                partitions,
                Arc::clone(&location),
                classifier.clone(),
                progress.clone(),
            ))
        })
        .collect();

    let mut outcome = LaneOutcome::default();
    for (lane, joined) in join_all(handles).await.into_iter().enumerate() {
        let (metrics, stats, file_errors) = joined.map_err(|e| PipelineError::LaneFailed {
            lane,
            reason: e.to_string(),
        })??;
        outcome.metrics.extend(metrics);
        outcome.lanes.push(stats);
        outcome.file_errors.extend(file_errors);
    }

    outcome
        .metrics
        .sort_by(|a, b| (a.date, &a.page).cmp(&(b.date, &b.page)));
    progress.finish_and_clear();
    Ok(outcome)
}
