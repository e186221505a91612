use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::artifact::UploadTarget;
use crate::config::StorageConfig;
use crate::process::{CommandRunner, CommandSpec};

use super::Uploader;

/// Uploads with `aws s3 cp`, credentials come from the usual AWS environment.
pub struct AwsCliUploader {
    runner: Arc<dyn CommandRunner>,
    bin: String,
    endpoint_url: Option<String>,
    region: Option<String>,
    storage_class: Option<String>,
}

impl AwsCliUploader {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &StorageConfig) -> Self {
        Self {
            runner,
            bin: config.aws_bin.clone(),
            endpoint_url: config.endpoint_url.clone(),
            region: config.region.clone(),
            storage_class: config.storage_class.clone(),
        }
    }

    fn with_common_args(&self, mut spec: CommandSpec) -> CommandSpec {
        if let Some(endpoint) = &self.endpoint_url {
            spec = spec.arg("--endpoint-url").arg(endpoint);
        }
        if let Some(region) = &self.region {
            spec = spec.arg("--region").arg(region);
        }
        spec
    }

    pub fn copy_command(&self, file: &Path, target: &UploadTarget) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.bin)
            .args(["s3", "cp", "--only-show-errors"])
            .arg(file.display().to_string())
            .arg(target.uri());
        if let Some(class) = &self.storage_class {
            spec = spec.arg("--storage-class").arg(class);
        }
        self.with_common_args(spec)
    }

    pub fn head_command(&self, target: &UploadTarget) -> CommandSpec {
        let spec = CommandSpec::new(&self.bin)
            .args(["s3api", "head-object", "--bucket"])
            .arg(&target.bucket)
            .arg("--key")
            .arg(&target.key);
        self.with_common_args(spec)
    }

    async fn run(&self, spec: CommandSpec) -> anyhow::Result<()> {
        let output = self.runner.run(&spec).await?;
        if !output.success {
            let detail = output.stderr_tail.join(" | ");
            anyhow::bail!("`{spec}` exited with {}: {detail}", output.status);
        }
        Ok(())
    }
}

#[async_trait]
impl Uploader for AwsCliUploader {
    fn name(&self) -> &'static str {
        "aws-cli"
    }

    fn describe(&self, file: &Path, target: &UploadTarget) -> String {
        self.copy_command(file, target).redacted()
    }

    async fn upload(&self, file: &Path, target: &UploadTarget) -> anyhow::Result<()> {
        self.run(self.copy_command(file, target)).await
    }

    /// The CLI backend only checks existence, stdout is not parsed.
    async fn verify(&self, target: &UploadTarget, _size: u64) -> anyhow::Result<()> {
        self.run(self.head_command(target)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::{RetryPolicy, UploadBackend};
    use crate::error::Result;
    use crate::process::CommandOutput;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<CommandSpec>>,
        fail: bool,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            if self.fail {
                Ok(CommandOutput::failed(
                    "exit status: 1",
                    vec!["An error occurred (AccessDenied)".into()],
                ))
            } else {
                Ok(CommandOutput::ok())
            }
        }
    }

    fn storage() -> StorageConfig {
        StorageConfig {
            backend: UploadBackend::AwsCli,
            aws_bin: "aws".into(),
            bucket: "backups".into(),
            prefix: None,
            endpoint_url: Some("http://minio:9000".into()),
            region: Some("eu-west-1".into()),
            storage_class: Some("STANDARD_IA".into()),
            verify: false,
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn test_copy_command() {
        let uploader = AwsCliUploader::new(Arc::new(RecordingRunner::default()), &storage());
        let target = UploadTarget::new("backups", Some("mongo"), "db.archive.gz");
        let spec = uploader.copy_command(Path::new("/tmp/db.archive.gz"), &target);
        assert_eq!(
            spec.redacted(),
            "aws s3 cp --only-show-errors /tmp/db.archive.gz s3://backups/mongo/db.archive.gz \
             --storage-class STANDARD_IA --endpoint-url http://minio:9000 --region eu-west-1"
        );
    }

    #[test]
    fn test_head_command() {
        let mut config = storage();
        config.endpoint_url = None;
        config.region = None;
        let uploader = AwsCliUploader::new(Arc::new(RecordingRunner::default()), &config);
        let target = UploadTarget::new("backups", None, "db.archive.gz");
        assert_eq!(
            uploader.head_command(&target).redacted(),
            "aws s3api head-object --bucket backups --key db.archive.gz"
        );
    }

    #[tokio::test]
    async fn test_failed_copy_surfaces_stderr() {
        let runner = Arc::new(RecordingRunner {
            fail: true,
            ..Default::default()
        });
        let uploader = AwsCliUploader::new(runner.clone(), &storage());
        let target = UploadTarget::new("backups", None, "db.archive.gz");
        let err = uploader
            .upload(Path::new("/tmp/db.archive.gz"), &target)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("AccessDenied"));
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }
}
