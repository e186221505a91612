//! Backup runner for MongoDB: dump with `mongodump`, upload to S3-compatible
//! storage, exit with a code describing the first failing step.

pub mod archive;
pub mod artifact;
pub mod cli;
pub mod config;
pub mod dump;
pub mod error;
pub mod logging;
pub mod notify;
pub mod process;
pub mod report;
pub mod runner;
pub mod upload;

pub use config::{Config, ToolConfig};
pub use error::{DumperError, Result};
pub use runner::{BackupRunner, preflight};
