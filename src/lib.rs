pub mod aggregator;
pub mod classifier;
pub mod discovery;
pub mod error;
pub mod incremental;
pub mod parallel_processing;
pub mod partition;
pub mod pipeline;
pub mod reader;
#[cfg(feature = "s3")]
pub mod s3;
pub mod storage;

// Re-export main types for convenient access
pub use aggregator::{aggregate_day, DailyPageMetric, DayAggregator};
pub use classifier::{
    HeuristicUaParser, RequestClassifier, TrafficClass, UaFamilies, UserAgentParser,
};
pub use discovery::{LogFileId, LogLocation, DEFAULT_PREFIX};
pub use error::{FileError, PipelineError};
pub use reader::LogRecord;
pub use storage::StorageLocation;

// Re-export incremental processing utilities
pub use incremental::{AggregateSnapshot, StartPoint, DEFAULT_SNAPSHOT_FILE};

// Re-export run orchestration
pub use partition::{assign_lanes, DayGap, DayPartition, LanePlan, DEFAULT_LANES};
pub use pipeline::{run, RunConfig, RunSummary};
