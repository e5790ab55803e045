use std::fmt;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{PipelineError, Result};

const S3_SCHEME: &str = "s3://";

/// Where a snapshot (or a copy of it) lives: a local file or a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Local(PathBuf),
    Remote { bucket: String, key: String },
}

/// Split an `s3://bucket/key` URI. Returns `None` when the scheme does not match;
/// the key is `None` for a bucket-only URI.
pub fn split_s3_uri(uri: &str) -> Option<(String, Option<String>)> {
    let scheme = uri.get(..S3_SCHEME.len())?;
    if !scheme.eq_ignore_ascii_case(S3_SCHEME) {
        return None;
    }
    let rest = &uri[S3_SCHEME.len()..];
    match rest.split_once('/') {
        Some((bucket, key)) if !key.is_empty() => Some((bucket.to_string(), Some(key.to_string()))),
        Some((bucket, _)) => Some((bucket.to_string(), None)),
        None => Some((rest.to_string(), None)),
    }
}

impl StorageLocation {
    /// Parse a CLI location: `s3://bucket/key` or a filesystem path.
    pub fn parse(raw: &str) -> Result<Self> {
        match split_s3_uri(raw) {
            Some((bucket, Some(key))) if !bucket.is_empty() => {
                Ok(StorageLocation::Remote { bucket, key })
            }
            Some(_) => Err(PipelineError::Configuration(format!(
                "remote location '{raw}' must name both a bucket and a key"
            ))),
            None => Ok(StorageLocation::Local(PathBuf::from(raw))),
        }
    }

    pub fn local(path: impl AsRef<Path>) -> Self {
        StorageLocation::Local(path.as_ref().to_path_buf())
    }

    /// Read the whole object. `Ok(None)` when nothing exists at the location yet.
    pub async fn read(&self) -> Result<Option<Vec<u8>>> {
        match self {
            StorageLocation::Local(path) => match fs::read(path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(PipelineError::Snapshot {
                    location: self.to_string(),
                    reason: e.to_string(),
                }),
            },
            StorageLocation::Remote { bucket, key } => read_remote(bucket, key)
                .await
                .map_err(|reason| PipelineError::Snapshot {
                    location: self.to_string(),
                    reason,
                }),
        }
    }

    /// Replace the object with `bytes` in full.
    pub async fn write(&self, bytes: Vec<u8>) -> Result<()> {
        debug!("Writing {} bytes to {}", bytes.len(), self);
        let written = match self {
            StorageLocation::Local(path) => write_local(path, &bytes).await.map_err(|e| e.to_string()),
            StorageLocation::Remote { bucket, key } => write_remote(bucket, key, bytes).await,
        };
        written.map_err(|reason| PipelineError::Persist {
            location: self.to_string(),
            reason,
        })
    }
}

async fn write_local(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    // Replace by rename; readers never see a partial file.
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local(path) => write!(f, "{}", path.display()),
            StorageLocation::Remote { bucket, key } => write!(f, "{S3_SCHEME}{bucket}/{key}"),
        }
    }
}

#[cfg(feature = "s3")]
async fn read_remote(bucket: &str, key: &str) -> Result<Option<Vec<u8>>, String> {
    crate::s3::get_object(bucket, key).await
}

#[cfg(not(feature = "s3"))]
async fn read_remote(_bucket: &str, _key: &str) -> Result<Option<Vec<u8>>, String> {
    Err("built without the `s3` feature".to_string())
}

#[cfg(feature = "s3")]
async fn write_remote(bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), String> {
    crate::s3::put_object(bucket, key, bytes).await
}

#[cfg(not(feature = "s3"))]
async fn write_remote(_bucket: &str, _key: &str, _bytes: Vec<u8>) -> Result<(), String> {
    Err("built without the `s3` feature".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_s3_uri() {
        assert_eq!(
            split_s3_uri("s3://logs/out/daily.feather"),
            Some(("logs".to_string(), Some("out/daily.feather".to_string())))
        );
        assert_eq!(split_s3_uri("S3://logs"), Some(("logs".to_string(), None)));
        assert_eq!(split_s3_uri("s3://logs/"), Some(("logs".to_string(), None)));
        assert_eq!(split_s3_uri("/tmp/daily.feather"), None);
        assert_eq!(split_s3_uri("s3:"), None);
    }

    #[test]
    fn test_parse_locations() {
        assert_eq!(
            StorageLocation::parse("out/daily.feather").unwrap(),
            StorageLocation::Local(PathBuf::from("out/daily.feather"))
        );
        let remote = StorageLocation::parse("s3://bucket/cache/daily.feather").unwrap();
        assert_eq!(
            remote,
            StorageLocation::Remote {
                bucket: "bucket".to_string(),
                key: "cache/daily.feather".to_string()
            }
        );
        assert_eq!(remote.to_string(), "s3://bucket/cache/daily.feather");
        assert!(StorageLocation::parse("s3://bucket").is_err());
    }

    #[tokio::test]
    async fn test_local_read_missing_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let location = StorageLocation::local(temp_dir.path().join("absent.feather"));
        assert!(location.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_write_creates_parents_and_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let location = StorageLocation::local(temp_dir.path().join("nested/dir/snap.feather"));

        location.write(b"first".to_vec()).await.unwrap();
        location.write(b"second".to_vec()).await.unwrap();

        assert_eq!(location.read().await.unwrap().unwrap(), b"second");
    }

    #[cfg(not(feature = "s3"))]
    #[tokio::test]
    async fn test_remote_without_feature_is_fatal() {
        let location = StorageLocation::parse("s3://bucket/key.feather").unwrap();
        assert!(matches!(location.read().await, Err(PipelineError::Snapshot { .. })));
    }
}
