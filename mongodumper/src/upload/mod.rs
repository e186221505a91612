//! Upload backends.
//!
//! - `aws_cli`: shells out to `aws s3 cp`, the storage CLI shipped in the image
//! - `s3`: in-process upload through `aws-sdk-s3`
//!
//! Both sit behind [`Uploader`]; [`upload_with_retry`] adds the backoff loop.

pub mod aws_cli;
pub mod s3;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::artifact::UploadTarget;
use crate::config::{RetryPolicy, StorageConfig, UploadBackend};
use crate::error::{DumperError, Result};
use crate::process::CommandRunner;

pub use aws_cli::AwsCliUploader;
pub use s3::S3Uploader;

#[async_trait]
pub trait Uploader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Human readable description of the upload, safe to log.
    fn describe(&self, file: &Path, target: &UploadTarget) -> String;

    /// One upload attempt.
    async fn upload(&self, file: &Path, target: &UploadTarget) -> anyhow::Result<()>;

    /// Confirm the object landed. `size` is the local artifact size.
    async fn verify(&self, target: &UploadTarget, size: u64) -> anyhow::Result<()>;
}

/// Build the uploader selected by the configuration.
pub async fn from_config(
    config: &StorageConfig,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn Uploader> {
    match config.backend {
        UploadBackend::AwsCli => Arc::new(AwsCliUploader::new(runner, config)),
        UploadBackend::Sdk => Arc::new(S3Uploader::new(config).await),
    }
}

/// Upload `file`, retrying with exponential backoff. Returns the number of
/// attempts used.
pub async fn upload_with_retry(
    uploader: &dyn Uploader,
    file: &Path,
    target: &UploadTarget,
    policy: RetryPolicy,
    verify_size: Option<u64>,
) -> Result<u32> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match uploader.upload(file, target).await {
            Ok(()) => match verify_size {
                Some(size) => uploader.verify(target, size).await,
                None => Ok(()),
            },
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => return Ok(attempt),
            Err(err) if attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    "Upload attempt {attempt}/{} to {target} failed: {err:#}, retrying in {delay:?}",
                    policy.max_attempts
                );
                sleep(delay).await;
            }
            Err(err) => {
                return Err(DumperError::UploadFailed {
                    target: target.uri(),
                    attempts: attempt,
                    reason: format!("{err:#}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    struct FlakyUploader {
        failures: Mutex<u32>,
        verified: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Uploader for FlakyUploader {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn describe(&self, file: &Path, target: &UploadTarget) -> String {
            format!("{} -> {target}", file.display())
        }

        async fn upload(&self, _file: &Path, _target: &UploadTarget) -> anyhow::Result<()> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("connection reset");
            }
            Ok(())
        }

        async fn verify(&self, _target: &UploadTarget, size: u64) -> anyhow::Result<()> {
            self.verified.lock().unwrap().push(size);
            Ok(())
        }
    }

    fn flaky(failures: u32) -> FlakyUploader {
        FlakyUploader {
            failures: Mutex::new(failures),
            verified: Mutex::new(Vec::new()),
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let uploader = flaky(2);
        let target = UploadTarget::new("b", None, "k");
        let attempts = upload_with_retry(&uploader, Path::new("/f"), &target, policy(3), Some(7))
            .await
            .unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(*uploader.verified.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let uploader = flaky(5);
        let target = UploadTarget::new("b", Some("p"), "k");
        let err = upload_with_retry(&uploader, Path::new("/f"), &target, policy(2), None)
            .await
            .unwrap_err();
        match err {
            DumperError::UploadFailed {
                target,
                attempts,
                reason,
            } => {
                assert_eq!(target, "s3://b/p/k");
                assert_eq!(attempts, 2);
                assert_eq!(reason, "connection reset");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*uploader.failures.lock().unwrap(), 3);
    }
}
