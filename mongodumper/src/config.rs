use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::Serialize;

use crate::cli::BackupArgs;
use crate::error::{DumperError, Result};

#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DumpFormat {
    /// Single gzip archive written by `mongodump --archive --gzip`
    Archive,
    /// Per-collection files written by `mongodump --out`, packed into a tarball
    Directory,
}

#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UploadBackend {
    /// Shell out to `aws s3 cp`
    AwsCli,
    /// Upload in-process with the AWS SDK
    Sdk,
}

#[derive(Clone, Debug)]
pub struct MongoConfig {
    pub uri: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_db: Option<String>,
    pub database: Option<String>,
    pub collection: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DumpConfig {
    pub bin: String,
    pub extra_args: Vec<String>,
    pub format: DumpFormat,
    pub work_dir: PathBuf,
    pub keep_artifact: bool,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: UploadBackend,
    pub aws_bin: String,
    pub bucket: String,
    pub prefix: Option<String>,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub storage_class: Option<String>,
    pub verify: bool,
    pub retry: RetryPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

/// External executables a run needs. Resolvable without the rest of the
/// configuration, so `check` works before storage is set up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolConfig {
    pub mongodump_bin: String,
    /// Only set for the aws-cli backend.
    pub aws_bin: Option<String>,
}

impl ToolConfig {
    pub fn from_args(args: &BackupArgs) -> Self {
        Self {
            mongodump_bin: args.mongodump_bin.clone(),
            aws_bin: (args.backend == UploadBackend::AwsCli).then(|| args.aws_bin.clone()),
        }
    }

    pub fn programs(&self) -> Vec<&str> {
        std::iter::once(self.mongodump_bin.as_str())
            .chain(self.aws_bin.as_deref())
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mongo: MongoConfig,
    pub dump: DumpConfig,
    pub storage: StorageConfig,
    pub notify_url: Option<reqwest::Url>,
}

impl Config {
    /// Validate parsed arguments, reporting every problem at once.
    pub fn from_args(args: &BackupArgs) -> Result<Self> {
        let mut validation_errors = Vec::new();

        let bucket = match args.bucket.as_deref().map(str::trim) {
            Some(bucket) if !bucket.is_empty() => bucket.to_string(),
            _ => {
                validation_errors.push("S3_BUCKET (--bucket) is required".to_string());
                String::new()
            }
        };

        if args.upload_attempts == 0 {
            validation_errors.push("UPLOAD_ATTEMPTS must be at least 1".to_string());
        }

        if args.mongo_collection.is_some() && args.mongo_db.is_none() {
            validation_errors
                .push("MONGO_COLLECTION requires MONGO_DB to be set as well".to_string());
        }

        if args.mongo_uri.is_some() && args.mongo_username.is_some() {
            validation_errors.push(
                "MONGO_URI and MONGO_USERNAME are mutually exclusive, put the credentials in the URI"
                    .to_string(),
            );
        }

        if args.mongo_password.is_some() && args.mongo_username.is_none() {
            validation_errors.push("MONGO_PASSWORD is set but MONGO_USERNAME is not".to_string());
        }

        let work_dir = args.work_dir.clone().unwrap_or_else(std::env::temp_dir);
        match std::fs::metadata(&work_dir) {
            Ok(meta) if !meta.is_dir() => validation_errors.push(format!(
                "DUMP_WORK_DIR `{}` exists but is not a directory",
                work_dir.display()
            )),
            Ok(_) => {}
            Err(_) => validation_errors.push(format!(
                "DUMP_WORK_DIR `{}` does not exist",
                work_dir.display()
            )),
        }

        let notify_url = match args.notify_url.as_deref() {
            Some(raw) => match reqwest::Url::parse(raw) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
                Ok(url) => {
                    validation_errors.push(format!(
                        "NOTIFY_URL scheme `{}` is not http or https",
                        url.scheme()
                    ));
                    None
                }
                Err(err) => {
                    validation_errors.push(format!("NOTIFY_URL `{raw}` is invalid: {err}"));
                    None
                }
            },
            None => None,
        };

        if !validation_errors.is_empty() {
            return Err(DumperError::Config(validation_errors));
        }

        Ok(Self {
            mongo: MongoConfig {
                uri: args.mongo_uri.clone(),
                host: args.mongo_host.clone(),
                port: args.mongo_port,
                username: args.mongo_username.clone(),
                password: args.mongo_password.clone(),
                auth_db: args.mongo_auth_db.clone(),
                database: args.mongo_db.clone(),
                collection: args.mongo_collection.clone(),
            },
            dump: DumpConfig {
                bin: args.mongodump_bin.clone(),
                extra_args: extra_args(args),
                format: args.format,
                work_dir,
                keep_artifact: args.keep_artifact,
            },
            storage: StorageConfig {
                backend: args.backend,
                aws_bin: args.aws_bin.clone(),
                bucket,
                prefix: args.prefix.clone(),
                endpoint_url: args.endpoint_url.clone(),
                region: args.region.clone(),
                storage_class: args.storage_class.clone(),
                verify: args.verify,
                retry: RetryPolicy {
                    max_attempts: args.upload_attempts,
                    initial_delay: Duration::from_millis(args.retry_delay_ms),
                },
            },
            notify_url,
        })
    }

    pub fn tools(&self) -> ToolConfig {
        ToolConfig {
            mongodump_bin: self.dump.bin.clone(),
            aws_bin: (self.storage.backend == UploadBackend::AwsCli)
                .then(|| self.storage.aws_bin.clone()),
        }
    }

    /// Label used in artifact names: the database, or `all`.
    pub fn dump_label(&self) -> &str {
        self.mongo.database.as_deref().unwrap_or("all")
    }
}

/// `--mongodump-arg` values as given, then `MONGODUMP_EXTRA_ARGS` split on whitespace.
fn extra_args(args: &BackupArgs) -> Vec<String> {
    let split = args
        .mongodump_extra_args
        .as_deref()
        .into_iter()
        .flat_map(str::split_whitespace);
    args.mongodump_args
        .iter()
        .map(String::as_str)
        .filter(|arg| !arg.is_empty())
        .chain(split)
        .map(str::to_string)
        .collect()
}
