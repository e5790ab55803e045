// Integration test utilities and common code
#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use logtally::{AggregateSnapshot, LogLocation, RunConfig, DEFAULT_SNAPSHOT_FILE};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

/// Prefix of every fixture log file name.
pub const PREFIX: &str = "EDFDVBD6EXAMPLE.";

/// Temporary log directory and output directory for one test.
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub root_path: PathBuf,
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with an empty log directory
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root_path = temp_dir.path().to_path_buf();
        let log_dir = root_path.join("logs");
        let output_dir = root_path.join("out");
        fs::create_dir_all(&log_dir).expect("Failed to create log directory");

        Self {
            temp_dir,
            root_path,
            log_dir,
            output_dir,
        }
    }

    fn log_name(day: &str, hour: u32, suffix: &str) -> String {
        format!("{PREFIX}{day}-{hour:02}.{suffix}")
    }

    /// Write an uncompressed log for the given day and hour
    pub fn create_log_file(&self, day: &str, hour: u32, suffix: &str, content: &str) -> PathBuf {
        let file_path = self.log_dir.join(Self::log_name(day, hour, suffix));
        fs::write(&file_path, content).expect("Failed to write test log");
        file_path
    }

    /// Write a gzip-compressed log for the given day and hour
    pub fn create_gzip_log_file(&self, day: &str, hour: u32, suffix: &str, content: &str) -> PathBuf {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(content.as_bytes())
            .expect("Failed to compress test log");
        let bytes = encoder.finish().expect("Failed to finish gzip stream");

        let file_path = self
            .log_dir
            .join(format!("{}.gz", Self::log_name(day, hour, suffix)));
        fs::write(&file_path, bytes).expect("Failed to write test log");
        file_path
    }

    /// Write arbitrary bytes under a log-style name
    pub fn create_raw_log_file(&self, day: &str, hour: u32, suffix: &str, bytes: &[u8]) -> PathBuf {
        let file_path = self.log_dir.join(Self::log_name(day, hour, suffix));
        fs::write(&file_path, bytes).expect("Failed to write test log");
        file_path
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.output_dir.join(DEFAULT_SNAPSHOT_FILE)
    }

    pub fn read_snapshot_bytes(&self) -> Vec<u8> {
        fs::read(self.snapshot_path()).expect("Failed to read snapshot")
    }

    pub fn read_snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot::from_feather(&self.read_snapshot_bytes())
            .expect("Snapshot should be a valid Arrow IPC file")
    }

    /// Library configuration pointing at this fixture
    pub fn run_config(&self, lanes: usize) -> RunConfig {
        RunConfig {
            source: LogLocation::directory(&self.log_dir, PREFIX),
            output_dir: self.output_dir.clone(),
            lanes,
            show_progress: false,
            ..RunConfig::default()
        }
    }
}
