use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use clap::Parser;
use mongodumper::Config;
use mongodumper::artifact::UploadTarget;
use mongodumper::cli::Cli;
use mongodumper::error::Result;
use mongodumper::process::{CommandOutput, CommandRunner, CommandSpec};
use mongodumper::upload::Uploader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(dead_code)]
pub enum DumpBehaviour {
    /// Write a small dump where mongodump was told to
    Write,
    /// Exit successfully without writing anything
    WriteNothing,
    /// Exit with status 1
    Fail,
    /// Never finish
    Hang,
    /// Write the dump, signal `written`, then never finish
    WriteThenHang,
    /// Write the dump, signal `written`, then exit successfully
    WriteAndSignal,
}

/// Stands in for mongodump, honouring `--archive=` and `--out=`.
pub struct FakeMongodump {
    pub behaviour: DumpBehaviour,
    pub calls: Mutex<Vec<CommandSpec>>,
    /// Notified once the dump is on disk.
    pub written: Notify,
}

impl FakeMongodump {
    pub fn new(behaviour: DumpBehaviour) -> Self {
        Self {
            behaviour,
            calls: Mutex::new(Vec::new()),
            written: Notify::new(),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeMongodump {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        match self.behaviour {
            DumpBehaviour::Fail => {
                return Ok(CommandOutput::failed(
                    "exit status: 1",
                    vec!["Failed: can't create session: server selection timeout".into()],
                ));
            }
            DumpBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            DumpBehaviour::WriteNothing => {}
            DumpBehaviour::Write => write_dump(spec)?,
            DumpBehaviour::WriteThenHang => {
                write_dump(spec)?;
                self.written.notify_one();
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            DumpBehaviour::WriteAndSignal => {
                write_dump(spec)?;
                self.written.notify_one();
            }
        }
        Ok(CommandOutput::ok())
    }
}

fn write_dump(spec: &CommandSpec) -> std::io::Result<()> {
    for arg in &spec.args {
        if let Some(path) = arg.strip_prefix("--archive=") {
            std::fs::write(path, b"fake archive bytes")?;
        } else if let Some(path) = arg.strip_prefix("--out=") {
            let db = Path::new(path).join("shop");
            std::fs::create_dir_all(&db)?;
            std::fs::write(db.join("orders.bson.gz"), b"orders")?;
        }
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct Uploaded {
    pub file: PathBuf,
    pub target: UploadTarget,
    pub size: u64,
}

/// Records uploads, failing the first `failures` attempts.
#[derive(Default)]
pub struct FakeUploader {
    pub failures: Mutex<u32>,
    pub attempts: Mutex<u32>,
    pub uploaded: Mutex<Vec<Uploaded>>,
}

impl FakeUploader {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: Mutex::new(failures),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn describe(&self, file: &Path, target: &UploadTarget) -> String {
        format!("upload {} -> {target}", file.display())
    }

    async fn upload(&self, file: &Path, target: &UploadTarget) -> anyhow::Result<()> {
        *self.attempts.lock().unwrap() += 1;
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("SlowDown: please reduce your request rate");
            }
        }
        let size = std::fs::metadata(file)?.len();
        self.uploaded.lock().unwrap().push(Uploaded {
            file: file.to_path_buf(),
            target: target.clone(),
            size,
        });
        Ok(())
    }

    async fn verify(&self, target: &UploadTarget, size: u64) -> anyhow::Result<()> {
        let uploaded = self.uploaded.lock().unwrap();
        match uploaded.iter().find(|u| &u.target == target) {
            Some(u) if u.size == size => Ok(()),
            _ => anyhow::bail!("object {target} missing"),
        }
    }
}

/// Configuration pointing at `work_dir`, with millisecond retry delays.
pub fn config(work_dir: &Path, extra: &[&str]) -> Config {
    let work_dir = work_dir.to_string_lossy().into_owned();
    let mut argv = vec![
        "mongodumper",
        "--bucket",
        "backups",
        "--prefix",
        "mongo/prod",
        "--mongo-db",
        "shop",
        "--retry-delay-ms",
        "1",
        "--work-dir",
        work_dir.as_str(),
    ];
    argv.extend_from_slice(extra);
    Config::from_args(&Cli::parse_from(argv).args).unwrap()
}
