// Incremental snapshot handling: load the prior aggregate, decide which log
// files are new, merge and persist.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Date32Array, DictionaryArray, StringArray, UInt16Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Int32Type, Schema, SchemaRef};
use arrow::error::{ArrowError, Result as ArrowResult};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::aggregator::DailyPageMetric;
use crate::discovery::LogFileId;
use crate::error::{PipelineError, Result};
use crate::storage::StorageLocation;

/// File name of the snapshot inside the output directory.
pub const DEFAULT_SNAPSHOT_FILE: &str = "daily_metrics.feather";

const COUNT_COLUMNS: [&str; 4] = [
    "human_total_requests",
    "human_unique_requests",
    "bot_total_requests",
    "bot_unique_requests",
];

/// Column layout of the persisted table: day dates, a dictionary-encoded
/// page and `u16` counts.
pub fn snapshot_schema() -> SchemaRef {
    let page_type = DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8));
    let mut fields = vec![
        Field::new("date", DataType::Date32, false),
        Field::new("page", page_type, false),
    ];
    fields.extend(COUNT_COLUMNS.iter().map(|name| Field::new(*name, DataType::UInt16, false)));
    Arc::new(Schema::new(fields))
}

fn unix_epoch() -> NaiveDate {
    NaiveDate::default()
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    // NaiveDate spans about 262,000 years either side of the epoch, inside i32 days
    date.signed_duration_since(unix_epoch()).num_days() as i32
}

/// The persisted per-day, per-page aggregate.
///
/// Rows are kept sorted by `(date, page)`, which also makes the serialized
/// form deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateSnapshot {
    rows: Vec<DailyPageMetric>,
}

fn sort_rows(rows: &mut [DailyPageMetric]) {
    rows.sort_by(|a, b| (a.date, &a.page).cmp(&(b.date, &b.page)));
}

impl AggregateSnapshot {
    pub fn new(mut rows: Vec<DailyPageMetric>) -> Self {
        sort_rows(&mut rows);
        Self { rows }
    }

    pub fn rows(&self) -> &[DailyPageMetric] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|row| row.date).max()
    }

    /// Build the single record batch written to disk.
    pub fn to_record_batch(&self) -> ArrowResult<RecordBatch> {
        let dates = Date32Array::from(
            self.rows.iter().map(|row| days_since_epoch(row.date)).collect::<Vec<_>>(),
        );
        let pages: DictionaryArray<Int32Type> = self.rows.iter().map(|row| row.page.as_str()).collect();
        let count = |get: fn(&DailyPageMetric) -> u16| -> ArrayRef {
            Arc::new(UInt16Array::from(self.rows.iter().map(get).collect::<Vec<_>>()))
        };

        RecordBatch::try_new(
            snapshot_schema(),
            vec![
                Arc::new(dates) as ArrayRef,
                Arc::new(pages),
                count(|row| row.human_total),
                count(|row| row.human_unique),
                count(|row| row.bot_total),
                count(|row| row.bot_unique),
            ],
        )
    }

    /// Encode as an Arrow IPC file (Feather v2), readable with `pandas.read_feather`.
    pub fn to_feather(&self) -> ArrowResult<Vec<u8>> {
        let batch = self.to_record_batch()?;
        let mut writer = FileWriter::try_new(Vec::new(), &batch.schema())?;
        writer.write(&batch)?;
        writer.finish()?;
        writer.into_inner()
    }

    /// Decode an Arrow IPC file.
    ///
    /// Columns are cast to the snapshot types, so tables written by other
    /// tools (timestamp dates, narrower dictionary keys, wider integers) load
    /// too. Counts that do not fit `u16` are an error.
    pub fn from_feather(bytes: &[u8]) -> ArrowResult<Self> {
        let reader = FileReader::try_new(Cursor::new(bytes), None)?;
        let mut rows = Vec::new();
        for batch in reader {
            rows.extend(rows_from_batch(&batch?)?);
        }
        Ok(Self::new(rows))
    }
}

fn column_as(batch: &RecordBatch, name: &str, to: &DataType) -> ArrowResult<ArrayRef> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| ArrowError::SchemaError(format!("missing column '{name}'")))?;
    if column.null_count() > 0 {
        return Err(ArrowError::InvalidArgumentError(format!("column '{name}' has nulls")));
    }
    let converted = cast(column.as_ref(), to)?;
    // Safe casts turn out-of-range values into nulls
    if converted.null_count() > 0 {
        return Err(ArrowError::CastError(format!("column '{name}' does not fit {to}")));
    }
    Ok(converted)
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> ArrowResult<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| ArrowError::SchemaError(format!("unexpected type for column '{name}'")))
}

fn rows_from_batch(batch: &RecordBatch) -> ArrowResult<Vec<DailyPageMetric>> {
    let dates = column_as(batch, "date", &DataType::Date32)?;
    let dates = downcast::<Date32Array>(&dates, "date")?;
    let pages = column_as(batch, "page", &DataType::Utf8)?;
    let pages = downcast::<StringArray>(&pages, "page")?;

    let mut counts = Vec::with_capacity(COUNT_COLUMNS.len());
    for name in COUNT_COLUMNS {
        counts.push(column_as(batch, name, &DataType::UInt16)?);
    }
    let counts = counts
        .iter()
        .zip(COUNT_COLUMNS)
        .map(|(array, name)| downcast::<UInt16Array>(array, name))
        .collect::<ArrowResult<Vec<_>>>()?;

    (0..batch.num_rows())
        .map(|i| -> ArrowResult<DailyPageMetric> {
            let date = unix_epoch()
                .checked_add_signed(Duration::days(i64::from(dates.value(i))))
                .ok_or_else(|| ArrowError::ComputeError(format!("date out of range in row {i}")))?;
            Ok(DailyPageMetric {
                human_total: counts[0].value(i),
                human_unique: counts[1].value(i),
                bot_total: counts[2].value(i),
                bot_unique: counts[3].value(i),
                ..DailyPageMetric::new(date, pages.value(i))
            })
        })
        .collect()
}

/// Load the prior snapshot. `Ok(None)` on a first run.
pub async fn load_snapshot(location: &StorageLocation) -> Result<Option<AggregateSnapshot>> {
    let Some(bytes) = location.read().await? else {
        info!("No prior snapshot at {}, starting fresh", location);
        return Ok(None);
    };

    let snapshot = AggregateSnapshot::from_feather(&bytes).map_err(|e| PipelineError::Snapshot {
        location: location.to_string(),
        reason: e.to_string(),
    })?;

    info!(
        "Loaded snapshot from {}: {} rows, last date {:?}",
        location,
        snapshot.len(),
        snapshot.max_date()
    );
    Ok(Some(snapshot))
}

/// First day of logs a run should look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPoint {
    /// Strictly after the last day already in the snapshot.
    After(NaiveDate),
    /// From the configured fallback date, inclusive.
    From(NaiveDate),
    Beginning,
}

impl StartPoint {
    /// The prior snapshot's last date wins over the fallback.
    pub fn resolve(prior: Option<&AggregateSnapshot>, since: Option<NaiveDate>) -> Self {
        match (prior.and_then(AggregateSnapshot::max_date), since) {
            (Some(last), _) => StartPoint::After(last),
            (None, Some(since)) => StartPoint::From(since),
            (None, None) => StartPoint::Beginning,
        }
    }

    pub fn includes(&self, date: NaiveDate) -> bool {
        match self {
            StartPoint::After(last) => date > *last,
            StartPoint::From(first) => date >= *first,
            StartPoint::Beginning => true,
        }
    }
}

/// Keep only the files a run has not processed yet.
pub fn new_files(logs: Vec<LogFileId>, start: StartPoint) -> Vec<LogFileId> {
    let total = logs.len();
    let fresh: Vec<_> = logs.into_iter().filter(|id| start.includes(id.date)).collect();
    debug!("{} of {} log files are new ({:?})", fresh.len(), total, start);
    fresh
}

/// Result of folding a batch of new metrics into the prior snapshot.
#[derive(Debug)]
pub struct MergeOutcome {
    pub snapshot: AggregateSnapshot,
    /// Most recent day seen; its rows were dropped as possibly incomplete.
    pub incomplete_day: Option<NaiveDate>,
    pub rows_dropped: usize,
}

/// Append `new_rows` to `prior` and drop every row of the most recent day.
pub fn merge(prior: Option<AggregateSnapshot>, new_rows: Vec<DailyPageMetric>) -> MergeOutcome {
    let mut rows = prior.map(|snapshot| snapshot.rows).unwrap_or_default();
    rows.extend(new_rows);
    sort_rows(&mut rows);

    let incomplete_day = rows.last().map(|row| row.date);
    let before = rows.len();
    if let Some(day) = incomplete_day {
        rows.retain(|row| row.date != day);
    }
    let rows_dropped = before - rows.len();

    if let Some(day) = incomplete_day {
        info!("Dropped {} rows for {} (day may be incomplete)", rows_dropped, day);
    }
    MergeOutcome {
        snapshot: AggregateSnapshot { rows },
        incomplete_day,
        rows_dropped,
    }
}

/// Overwrite every target with the full snapshot.
pub async fn persist(snapshot: &AggregateSnapshot, targets: &[&StorageLocation]) -> Result<()> {
    let bytes = snapshot.to_feather()?;
    for target in targets {
        target.write(bytes.clone()).await?;
        info!("Persisted {} rows to {}", snapshot.len(), target);
    }
    Ok(())
}
