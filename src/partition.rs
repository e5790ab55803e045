use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::discovery::LogFileId;
use crate::error::{PipelineError, Result};

/// Number of parallel lanes when none is configured.
pub const DEFAULT_LANES: usize = 8;

/// All log files of one calendar day. A partition is never split across lanes,
/// because per-day uniqueness needs every request of the day in one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayPartition {
    pub date: NaiveDate,
    pub files: Vec<LogFileId>,
}

/// Consecutive processed days that are more than one calendar day apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayGap {
    pub after: NaiveDate,
    pub before: NaiveDate,
}

impl DayGap {
    pub fn missing_days(&self) -> i64 {
        (self.before - self.after).num_days() - 1
    }
}

/// Work for each lane, in lane order, plus any gaps seen while scheduling.
#[derive(Debug, Default)]
pub struct LanePlan {
    pub lanes: Vec<Vec<DayPartition>>,
    pub gaps: Vec<DayGap>,
}

impl LanePlan {
    pub fn day_count(&self) -> usize {
        self.lanes.iter().map(Vec::len).sum()
    }

    pub fn file_count(&self) -> usize {
        self.lanes
            .iter()
            .flatten()
            .map(|partition| partition.files.len())
            .sum()
    }
}

/// Group files into per-day partitions in chronological order.
pub fn group_by_day(mut files: Vec<LogFileId>) -> Vec<DayPartition> {
    files.sort();

    let mut partitions: Vec<DayPartition> = Vec::new();
    for file in files {
        match partitions.last_mut() {
            Some(current) if current.date == file.date => current.files.push(file),
            _ => partitions.push(DayPartition {
                date: file.date,
                files: vec![file],
            }),
        }
    }
    partitions
}

/// Assign whole days to `lanes` lanes round-robin by day index.
///
/// The day index counts calendar days from the first date being processed,
/// so a day lands in lane `index % lanes` regardless of gaps before it.
pub fn assign_lanes(files: Vec<LogFileId>, lanes: usize) -> Result<LanePlan> {
    if lanes == 0 {
        return Err(PipelineError::Configuration(
            "lane count must be at least 1".to_string(),
        ));
    }

    let mut plan = LanePlan {
        lanes: vec![Vec::new(); lanes],
        gaps: Vec::new(),
    };
    let partitions = group_by_day(files);
    let Some(start) = partitions.first().map(|p| p.date) else {
        return Ok(plan);
    };

    let mut previous: Option<NaiveDate> = None;
    for partition in partitions {
        let index = (partition.date - start).num_days();
        if let Some(after) = previous {
            if (partition.date - after).num_days() > 1 {
                let gap = DayGap {
                    after,
                    before: partition.date,
                };
                warn!(
                    "Missing {} day(s) of logs between {} and {}",
                    gap.missing_days(),
                    gap.after,
                    gap.before
                );
                plan.gaps.push(gap);
            }
        }
        previous = Some(partition.date);

        // index is non-negative: partitions are sorted and start is the first date
        let lane = (index as usize) % lanes;
        debug!(
            "Assigning {} ({} files) to lane {}",
            partition.date,
            partition.files.len(),
            lane
        );
        plan.lanes[lane].push(partition);
    }
    Ok(plan)
}
