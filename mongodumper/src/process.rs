//! Subprocess plumbing shared by the dump and upload steps.
//!
//! Every external tool is described by a [`CommandSpec`] and executed through a
//! [`CommandRunner`], so the pipeline can be driven by a fake runner in tests.

use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::error::{DumperError, Result};

const REDACTED: &str = "****";
const STDERR_TAIL: usize = 20;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Mark a value that must never show up in logs.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// Command line as it is safe to log.
    pub fn redacted(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&self.redact(arg));
        }
        line
    }

    fn redact(&self, value: &str) -> String {
        self.secrets
            .iter()
            .fold(value.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stderr_tail: Vec<String>,
}

impl CommandOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            status: "exit status: 0".to_string(),
            stderr_tail: Vec::new(),
        }
    }

    pub fn failed(status: impl Into<String>, stderr_tail: Vec<String>) -> Self {
        Self {
            success: false,
            status: status.into(),
            stderr_tail,
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::info!("Running {spec}");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| DumperError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tool = tool_name(&spec.program);

        let (status, _, stderr_tail) = tokio::try_join!(
            child.wait(),
            drain(stdout, spec, &tool, false),
            drain(stderr, spec, &tool, true),
        )?;

        let output = if status.success() {
            CommandOutput::ok()
        } else {
            CommandOutput::failed(status.to_string(), stderr_tail)
        };
        tracing::debug!("{tool} finished with {}", output.status);
        Ok(output)
    }
}

/// Forward a child stream to the log, keeping the last lines of stderr.
async fn drain<R>(
    stream: Option<R>,
    spec: &CommandSpec,
    tool: &str,
    keep: bool,
) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return Ok(Vec::new());
    };
    // Tools may print non-UTF-8 bytes; decode lossily instead of failing the run.
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let raw = String::from_utf8_lossy(&buf);
        let line = spec.redact(raw.trim_end_matches(['\n', '\r']));
        tracing::debug!("[{tool}] {line}");
        if keep {
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
    Ok(tail.into())
}

fn tool_name(program: &str) -> String {
    std::path::Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}
