use chrono::NaiveDate;
use glob::Pattern;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{FileError, PipelineError, Result};

/// Key prefix of the CloudFront distribution the logs come from.
pub const DEFAULT_PREFIX: &str = "E3SR3H7C34DQ6Z.";

/// Where log objects are listed from. Callers treat both backends the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLocation {
    /// Files directly inside `dir` whose names start with `prefix`.
    Directory { dir: PathBuf, prefix: String },
    /// Objects in `bucket` whose keys start with `prefix`.
    Bucket { bucket: String, prefix: String },
}

/// One log object, resolved to the day and hour it covers.
///
/// Ordering is chronological, with the key breaking ties, so a sorted list
/// keeps each day's files contiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogFileId {
    pub date: NaiveDate,
    pub hour: u32,
    /// Full path for local files, object key for remote ones.
    pub key: String,
}

impl LogFileId {
    /// Build an identifier from a path or key, parsing the date-hour token
    /// out of its final component.
    pub fn from_key(key: impl Into<String>) -> Result<Self, FileError> {
        let key = key.into();
        match parse_log_timestamp(file_name(&key)) {
            Some((date, hour)) => Ok(Self { date, hour, key }),
            None => Err(FileError::BadName { id: key }),
        }
    }

    pub fn name(&self) -> &str {
        file_name(&self.key)
    }
}

impl fmt::Display for LogFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn file_name(key: &str) -> &str {
    key.rsplit(|c: char| c == '/' || c == std::path::MAIN_SEPARATOR)
        .next()
        .unwrap_or(key)
}

/// Parse `<prefix>.<YYYY-MM-DD-HH>.<suffix>` into its date and hour.
pub fn parse_log_timestamp(name: &str) -> Option<(NaiveDate, u32)> {
    let token = name.split('.').nth(1)?;
    let (day, hour) = token.rsplit_once('-')?;
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    let hour = hour.parse::<u32>().ok().filter(|h| *h < 24)?;
    Some((date, hour))
}

/// Result of listing a location: usable logs in chronological order, plus
/// the objects that were seen but could not be used.
#[derive(Debug, Default)]
pub struct Discovery {
    pub logs: Vec<LogFileId>,
    pub rejected: Vec<FileError>,
}

impl Discovery {
    fn push(&mut self, candidate: Result<LogFileId, FileError>) {
        match candidate {
            Ok(id) => {
                debug!("Found log file: {}", id);
                self.logs.push(id);
            }
            Err(e) => {
                warn!("Skipping log object: {}", e);
                self.rejected.push(e);
            }
        }
    }
}

impl LogLocation {
    pub fn directory(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        LogLocation::Directory {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn bucket(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        LogLocation::Bucket {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// List every log object under the location.
    ///
    /// An unreachable location is fatal. Individual objects that cannot be
    /// used are reported in [`Discovery::rejected`] and listing continues.
    pub async fn list(&self) -> Result<Discovery> {
        info!("Listing log files in {}", self);
        let mut discovery = match self {
            LogLocation::Directory { dir, prefix } => list_directory(dir, prefix).await?,
            LogLocation::Bucket { bucket, prefix } => list_bucket(bucket, prefix).await?,
        };
        discovery.logs.sort();

        info!(
            "Log listing summary: {} usable, {} rejected",
            discovery.logs.len(),
            discovery.rejected.len()
        );
        Ok(discovery)
    }

    /// Fetch the raw (possibly compressed) bytes of one log object.
    pub async fn fetch(&self, id: &LogFileId) -> Result<Vec<u8>, FileError> {
        match self {
            LogLocation::Directory { .. } => fs::read(&id.key).await.map_err(|e| FileError::Read {
                id: id.key.clone(),
                reason: e.to_string(),
            }),
            LogLocation::Bucket { bucket, .. } => fetch_object(bucket, &id.key).await,
        }
    }
}

impl fmt::Display for LogLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLocation::Directory { dir, prefix } => write!(f, "{}/{}*", dir.display(), prefix),
            LogLocation::Bucket { bucket, prefix } => write!(f, "s3://{bucket}/{prefix}*"),
        }
    }
}

async fn list_directory(dir: &Path, prefix: &str) -> Result<Discovery> {
    let unavailable = |reason: String| PipelineError::LocationUnavailable {
        location: dir.display().to_string(),
        reason,
    };

    let metadata = fs::metadata(dir).await.map_err(|e| unavailable(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(unavailable("not a directory".to_string()));
    }

    let matcher = Pattern::new(&format!("{}*", Pattern::escape(prefix)))
        .map_err(|e| PipelineError::Configuration(format!("bad prefix '{prefix}': {e}")))?;
    debug!("Starting log discovery in {} for names matching {}", dir.display(), matcher);
    let mut entries = fs::read_dir(dir).await.map_err(|e| unavailable(e.to_string()))?;

    let mut discovery = Discovery::default();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| unavailable(e.to_string()))?
    {
        if matcher.matches(&entry.file_name().to_string_lossy()) {
            discovery.push(local_candidate(entry.path()).await);
        }
    }
    Ok(discovery)
}

/// Keys are later used to re-open the file, so they must be exact.
async fn local_candidate(path: PathBuf) -> Result<LogFileId, FileError> {
    let Some(key) = path.to_str() else {
        return Err(FileError::BadName {
            id: path.to_string_lossy().into_owned(),
        });
    };
    match fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => LogFileId::from_key(key),
        Ok(_) => Err(FileError::Read {
            id: key.to_string(),
            reason: "not a regular file".to_string(),
        }),
        Err(e) => Err(FileError::Read {
            id: key.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(feature = "s3")]
async fn list_bucket(bucket: &str, prefix: &str) -> Result<Discovery> {
    let keys = crate::s3::list_keys(bucket, prefix)
        .await
        .map_err(|reason| PipelineError::LocationUnavailable {
            location: format!("s3://{bucket}/{prefix}"),
            reason,
        })?;

    let mut discovery = Discovery::default();
    for key in keys {
        discovery.push(LogFileId::from_key(key));
    }
    Ok(discovery)
}

#[cfg(not(feature = "s3"))]
async fn list_bucket(bucket: &str, prefix: &str) -> Result<Discovery> {
    Err(PipelineError::Configuration(format!(
        "cannot list s3://{bucket}/{prefix}: built without the `s3` feature"
    )))
}

#[cfg(feature = "s3")]
async fn fetch_object(bucket: &str, key: &str) -> Result<Vec<u8>, FileError> {
    match crate::s3::get_object(bucket, key).await {
        Ok(Some(bytes)) => Ok(bytes),
        Ok(None) => Err(FileError::Read {
            id: key.to_string(),
            reason: "object no longer exists".to_string(),
        }),
        Err(reason) => Err(FileError::Read {
            id: key.to_string(),
            reason,
        }),
    }
}

#[cfg(not(feature = "s3"))]
async fn fetch_object(_bucket: &str, key: &str) -> Result<Vec<u8>, FileError> {
    Err(FileError::Read {
        id: key.to_string(),
        reason: "built without the `s3` feature".to_string(),
    })
}
