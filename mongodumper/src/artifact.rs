use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::config::DumpFormat;
use crate::error::{DumperError, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Local output of one dump, either an archive file or a dump directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DumpArtifact {
    pub path: PathBuf,
    pub format: DumpFormat,
    pub created_at: DateTime<Utc>,
}

impl DumpArtifact {
    /// Choose where the dump for `label` taken at `created_at` is written.
    pub fn planned(
        work_dir: &Path,
        label: &str,
        format: DumpFormat,
        created_at: DateTime<Utc>,
    ) -> Self {
        let stem = format!("{}-{}", sanitize(label), created_at.format(TIMESTAMP_FORMAT));
        let name = match format {
            DumpFormat::Archive => format!("{stem}.archive.gz"),
            DumpFormat::Directory => stem,
        };
        Self {
            path: work_dir.join(name),
            format,
            created_at,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Total bytes on disk; fails when the artifact is absent or holds no data.
    pub fn validate(&self) -> Result<u64> {
        let size = match fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(meta) if meta.is_dir() => dir_size(&self.path),
            _ => 0,
        };
        if size == 0 {
            return Err(DumperError::EmptyArtifact(self.path.clone()));
        }
        Ok(size)
    }

    /// Remove the artifact from disk. Missing artifacts are not an error.
    pub fn remove(&self) -> std::io::Result<()> {
        let result = match fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&self.path),
            Ok(_) => fs::remove_file(&self.path),
            Err(err) => Err(err),
        };
        match result {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

fn sanitize(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "all".to_string()
    } else {
        cleaned
    }
}

/// Object storage location an artifact is uploaded to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadTarget {
    pub bucket: String,
    pub key: String,
}

impl UploadTarget {
    pub fn new(bucket: impl Into<String>, prefix: Option<&str>, file_name: &str) -> Self {
        let prefix = prefix
            .map(|p| {
                p.split('/')
                    .filter(|segment| !segment.is_empty())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();
        let key = if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{prefix}/{file_name}")
        };
        Self {
            bucket: bucket.into(),
            key,
        }
    }

    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

impl fmt::Display for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 4, 5, 6).unwrap()
    }

    #[test]
    fn test_planned_names() {
        let archive = DumpArtifact::planned(Path::new("/tmp"), "shop", DumpFormat::Archive, at());
        assert_eq!(archive.path, PathBuf::from("/tmp/shop-20240309T040506Z.archive.gz"));

        let dir = DumpArtifact::planned(Path::new("/tmp"), "all", DumpFormat::Directory, at());
        assert_eq!(dir.file_name(), "all-20240309T040506Z");
    }

    #[test]
    fn test_label_is_sanitized() {
        let artifact = DumpArtifact::planned(Path::new("/w"), "a/b c", DumpFormat::Archive, at());
        assert_eq!(artifact.file_name(), "a_b_c-20240309T040506Z.archive.gz");
    }

    #[test]
    fn test_validate_rejects_missing_and_empty() {
        let tmp = tempdir().unwrap();
        let artifact = DumpArtifact::planned(tmp.path(), "db", DumpFormat::Archive, at());
        assert!(matches!(artifact.validate(), Err(DumperError::EmptyArtifact(_))));

        fs::write(&artifact.path, b"").unwrap();
        assert!(matches!(artifact.validate(), Err(DumperError::EmptyArtifact(_))));

        fs::write(&artifact.path, b"data").unwrap();
        assert_eq!(artifact.validate().unwrap(), 4);
    }

    #[test]
    fn test_validate_directory_needs_data() {
        let tmp = tempdir().unwrap();
        let artifact = DumpArtifact::planned(tmp.path(), "db", DumpFormat::Directory, at());
        fs::create_dir_all(artifact.path.join("db")).unwrap();
        assert!(artifact.validate().is_err());

        fs::write(artifact.path.join("db/users.bson.gz"), b"12345").unwrap();
        assert_eq!(artifact.validate().unwrap(), 5);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let tmp = tempdir().unwrap();
        let artifact = DumpArtifact::planned(tmp.path(), "db", DumpFormat::Directory, at());
        fs::create_dir_all(artifact.path.join("db")).unwrap();
        artifact.remove().unwrap();
        assert!(!artifact.path.exists());
        artifact.remove().unwrap();
    }

    #[test]
    fn test_upload_target_key() {
        let target = UploadTarget::new("backups", Some("/mongo//prod/"), "x.archive.gz");
        assert_eq!(target.key, "mongo/prod/x.archive.gz");
        assert_eq!(target.uri(), "s3://backups/mongo/prod/x.archive.gz");

        let target = UploadTarget::new("backups", None, "x.archive.gz");
        assert_eq!(target.to_string(), "s3://backups/x.archive.gz");
    }
}
