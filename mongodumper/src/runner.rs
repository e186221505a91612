use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::archive;
use crate::artifact::{DumpArtifact, UploadTarget};
use crate::config::{Config, DumpFormat, ToolConfig};
use crate::dump::MongoDump;
use crate::error::{DumperError, Result};
use crate::notify;
use crate::process::CommandRunner;
use crate::report::BackupReport;
use crate::upload::{self, Uploader};

/// Dump, package, upload, clean up. Strictly sequential.
pub struct BackupRunner {
    config: Config,
    runner: Arc<dyn CommandRunner>,
    uploader: Arc<dyn Uploader>,
    mongodump: MongoDump,
}

impl BackupRunner {
    pub fn new(
        config: Config,
        runner: Arc<dyn CommandRunner>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        let mongodump = MongoDump::new(config.mongo.clone(), config.dump.clone());
        Self {
            config,
            runner,
            uploader,
            mongodump,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Where a run started at `started_at` writes its dump.
    pub fn planned_artifact(&self, started_at: DateTime<Utc>) -> DumpArtifact {
        DumpArtifact::planned(
            &self.config.dump.work_dir,
            self.config.dump_label(),
            self.config.dump.format,
            started_at,
        )
    }

    /// Commands a run started at `started_at` would execute, secrets redacted.
    pub fn plan(&self, started_at: DateTime<Utc>) -> Vec<String> {
        let artifact = self.planned_artifact(started_at);
        let upload_path = match artifact.format {
            DumpFormat::Archive => artifact.path.clone(),
            DumpFormat::Directory => archive::tarball_path(&artifact.path),
        };
        let file_name = upload_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = self.target_for(&file_name);

        let mut steps = vec![self.mongodump.planned_command(&artifact).redacted()];
        if artifact.format == DumpFormat::Directory {
            steps.push(format!(
                "pack {} -> {}",
                artifact.path.display(),
                upload_path.display()
            ));
        }
        steps.push(self.uploader.describe(&upload_path, &target));
        steps
    }

    /// Run the pipeline now, aborting when `shutdown` resolves.
    pub async fn run<S>(&self, shutdown: S) -> Result<BackupReport>
    where
        S: Future<Output = ()>,
    {
        self.run_at(Utc::now(), shutdown).await
    }

    pub async fn run_at<S>(&self, started_at: DateTime<Utc>, shutdown: S) -> Result<BackupReport>
    where
        S: Future<Output = ()>,
    {
        let mut report = BackupReport::start(
            self.config.dump_label(),
            self.config.dump.format,
            self.config.storage.backend,
            started_at,
        );
        let artifact = self.planned_artifact(started_at);
        tracing::info!(
            "Starting backup of `{}` into {}",
            report.database,
            artifact.path.display()
        );

        let mut packing = None;
        let result = tokio::select! {
            biased;
            _ = shutdown => Err(DumperError::Interrupted),
            result = self.execute(&artifact, &mut report, &mut packing) => result,
        };

        // A blocking pack task outlives the cancelled pipeline; let it finish
        // so cleanup sees the tarball.
        if let Some(handle) = packing.take() {
            tracing::debug!("Waiting for packing to stop before cleanup");
            let _ = handle.await;
        }
        self.cleanup(&artifact);

        match &result {
            Ok(()) => {
                report.succeed();
                tracing::info!(
                    "Backup uploaded to {} ({} bytes, {} attempt(s))",
                    report.target.as_deref().unwrap_or_default(),
                    report.size_bytes.unwrap_or_default(),
                    report.upload_attempts
                );
            }
            Err(err) => report.fail(err),
        }

        if let Some(url) = &self.config.notify_url {
            if let Err(err) = notify::send_report(url, &report).await {
                tracing::warn!("Failed to send report: {err:#}");
            }
        }

        result.map(|()| report)
    }

    async fn execute(
        &self,
        artifact: &DumpArtifact,
        report: &mut BackupReport,
        packing: &mut Option<Packing>,
    ) -> Result<()> {
        let artifact = self.dump_into(artifact, packing).await?;
        report.artifact = Some(artifact.file_name());
        report.size_bytes = Some(artifact.validate()?);

        let target = self.upload(&artifact, report).await?;
        report.target = Some(target.uri());
        Ok(())
    }

    /// Run mongodump and return the artifact ready for upload.
    pub async fn dump(&self, planned: &DumpArtifact) -> Result<DumpArtifact> {
        self.dump_into(planned, &mut None).await
    }

    /// Like [`Self::dump`], parking the pack task in `packing` while it runs.
    async fn dump_into(
        &self,
        planned: &DumpArtifact,
        packing: &mut Option<Packing>,
    ) -> Result<DumpArtifact> {
        self.mongodump.run(self.runner.as_ref(), planned).await?;
        let size = planned.validate()?;
        tracing::info!("Dump finished: {} ({size} bytes)", planned.path.display());

        match planned.format {
            DumpFormat::Archive => Ok(planned.clone()),
            DumpFormat::Directory => {
                let planned = planned.clone();
                let handle = packing.insert(tokio::task::spawn_blocking(move || {
                    archive::pack_directory(&planned)
                }));
                let packed = handle
                    .await
                    .map_err(|err| DumperError::Io(std::io::Error::other(err)));
                *packing = None;
                packed?
            }
        }
    }

    /// Upload a validated artifact, retrying per the configured policy.
    pub async fn upload(
        &self,
        artifact: &DumpArtifact,
        report: &mut BackupReport,
    ) -> Result<UploadTarget> {
        let size = artifact.validate()?;
        let target = self.target_for(&artifact.file_name());
        let storage = &self.config.storage;
        tracing::info!(
            "Uploading {} to {target} via {}",
            artifact.path.display(),
            self.uploader.name()
        );

        report.upload_attempts = upload::upload_with_retry(
            self.uploader.as_ref(),
            &artifact.path,
            &target,
            storage.retry,
            storage.verify.then_some(size),
        )
        .await?;
        Ok(target)
    }

    fn target_for(&self, file_name: &str) -> UploadTarget {
        let storage = &self.config.storage;
        UploadTarget::new(&storage.bucket, storage.prefix.as_deref(), file_name)
    }

    fn cleanup(&self, artifact: &DumpArtifact) {
        if self.config.dump.keep_artifact {
            tracing::info!(
                "Keeping local artifact under {}",
                self.config.dump.work_dir.display()
            );
            return;
        }
        let mut leftovers = vec![artifact.clone()];
        if artifact.format == DumpFormat::Directory {
            leftovers.push(DumpArtifact {
                path: archive::tarball_path(&artifact.path),
                ..artifact.clone()
            });
        }
        for leftover in leftovers {
            if let Err(err) = leftover.remove() {
                tracing::warn!("Failed to remove {}: {err}", leftover.path.display());
            }
        }
    }
}

type Packing = JoinHandle<Result<DumpArtifact>>;

/// Resolve the external tools a run needs, failing on the first missing one.
pub fn preflight(tools: &ToolConfig) -> Result<Vec<PathBuf>> {
    tools
        .programs()
        .into_iter()
        .map(|tool| {
            let path = which::which(tool).map_err(|err| DumperError::ToolMissing {
                tool: tool.to_string(),
                reason: err.to_string(),
            })?;
            tracing::debug!("Found {tool} at {}", path.display());
            Ok(path)
        })
        .collect()
}
