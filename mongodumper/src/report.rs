use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{DumpFormat, UploadBackend};
use crate::error::DumperError;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Summary of one backup run, logged at the end and sent to the webhook.
#[derive(Serialize, Debug, Clone)]
pub struct BackupReport {
    pub status: RunStatus,
    pub database: String,
    pub format: DumpFormat,
    pub backend: UploadBackend,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifact: Option<String>,
    pub size_bytes: Option<u64>,
    pub target: Option<String>,
    pub upload_attempts: u32,
    pub stage: Option<&'static str>,
    pub error: Option<String>,
    pub exit_code: i32,
}

impl BackupReport {
    pub fn start(
        database: impl Into<String>,
        format: DumpFormat,
        backend: UploadBackend,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: RunStatus::Running,
            database: database.into(),
            format,
            backend,
            started_at,
            finished_at: None,
            artifact: None,
            size_bytes: None,
            target: None,
            upload_attempts: 0,
            stage: None,
            error: None,
            exit_code: 0,
        }
    }

    pub fn succeed(&mut self) {
        self.status = RunStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, err: &DumperError) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.stage = Some(err.stage());
        self.error = Some(err.to_string());
        self.exit_code = err.exit_code();
    }

    pub fn title(&self) -> String {
        match self.status {
            RunStatus::Succeeded => format!("mongodumper: backup of `{}` succeeded", self.database),
            RunStatus::Failed => format!(
                "mongodumper: backup of `{}` failed at {}",
                self.database,
                self.stage.unwrap_or("unknown stage")
            ),
            RunStatus::Running => format!("mongodumper: backup of `{}` running", self.database),
        }
    }
}
