use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DumperError>;

#[derive(Error, Debug)]
pub enum DumperError {
    #[error("invalid configuration:\n{}", .0.join("\n"))]
    Config(Vec<String>),

    #[error("required tool `{tool}` is not available: {reason}")]
    ToolMissing { tool: String, reason: String },

    #[error("{tool} exited with {status}{}", stderr_suffix(.stderr))]
    DumpFailed {
        tool: String,
        status: String,
        stderr: Vec<String>,
    },

    #[error("dump artifact {} is missing or empty", .0.display())]
    EmptyArtifact(PathBuf),

    #[error("failed to package {}: {reason}", .path.display())]
    Package { path: PathBuf, reason: String },

    #[error("upload to {target} failed after {attempts} attempt(s): {reason}")]
    UploadFailed {
        target: String,
        attempts: u32,
        reason: String,
    },

    #[error("interrupted by signal")]
    Interrupted,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DumperError {
    /// Process exit code reported by the container.
    pub fn exit_code(&self) -> i32 {
        match self {
            DumperError::Config(_) => 2,
            DumperError::ToolMissing { .. } => 3,
            DumperError::DumpFailed { .. } | DumperError::Spawn { .. } => 4,
            DumperError::EmptyArtifact(_) | DumperError::Package { .. } => 5,
            DumperError::UploadFailed { .. } => 6,
            DumperError::Interrupted => 130,
            DumperError::Io(_) => 1,
        }
    }

    /// Short name of the pipeline step that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            DumperError::Config(_) => "config",
            DumperError::ToolMissing { .. } => "preflight",
            DumperError::DumpFailed { .. } | DumperError::Spawn { .. } => "dump",
            DumperError::EmptyArtifact(_) => "validate",
            DumperError::Package { .. } => "package",
            DumperError::UploadFailed { .. } => "upload",
            DumperError::Interrupted => "interrupted",
            DumperError::Io(_) => "io",
        }
    }
}

fn stderr_suffix(stderr: &[String]) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr.join(" | "))
    }
}
