//! Step that runs an external program and captures its output.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use quarry_types::{ExecStepSpec, StepResult};

use crate::core::Step;
use crate::errors::Interrupted;

pub const EXEC_STEP_KIND: &str = "exec";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FORMAT: &str = "json";

#[derive(Debug, Clone, Default)]
pub struct ExecStepConfig {
    pub program: Vec<String>,
    pub input: Option<serde_json::Value>,
    pub working_dir: Option<String>,
    pub timeout: Option<String>,
    pub format: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl ExecStepConfig {
    pub fn from_spec(spec: &ExecStepSpec) -> Self {
        Self {
            program: spec.program.clone(),
            input: spec.input.clone(),
            working_dir: spec.working_dir.clone(),
            timeout: spec.timeout.clone(),
            format: spec.format.clone(),
            env: spec.env.clone(),
        }
    }
}

/// Runs `program` with a deadline-bounded context. The child inherits the
/// full parent environment with the declared additions appended (additions
/// override duplicates); `input`, when set, is serialized to JSON and fed to
/// the child's standard input.
#[derive(Debug)]
pub struct ExecStep {
    id: String,
    program: Vec<String>,
    input: Option<serde_json::Value>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    format: String,
    env: BTreeMap<String, String>,
}

impl ExecStep {
    /// # Errors
    ///
    /// Returns an error when `program` is empty, the timeout does not parse
    /// as a duration, or the working directory cannot be resolved.
    pub fn new(id: impl Into<String>, cfg: ExecStepConfig) -> Result<Self> {
        if cfg.program.is_empty() {
            bail!("program is required");
        }

        let timeout = match &cfg.timeout {
            Some(timeout) => humantime::parse_duration(timeout)
                .with_context(|| format!("invalid timeout {timeout:?}"))?,
            None => DEFAULT_TIMEOUT,
        };

        let working_dir = match cfg.working_dir {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                if dir.is_absolute() {
                    Some(dir)
                } else {
                    let cwd = std::env::current_dir()
                        .context("failed to get working directory")?;
                    Some(cwd.join(dir))
                }
            }
            None => None,
        };

        Ok(Self {
            id: id.into(),
            program: cfg.program,
            input: cfg.input,
            working_dir,
            timeout,
            format: cfg.format.unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
            env: cfg.env,
        })
    }
}

#[async_trait]
impl Step for ExecStep {
    fn name(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> &'static str {
        EXEC_STEP_KIND
    }

    async fn resolve(&self, cancel: &CancellationToken) -> Result<StepResult> {
        let mut command = tokio::process::Command::new(&self.program[0]);
        command
            .args(&self.program[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }

        tracing::debug!(
            step_id = %self.id,
            program = ?self.program,
            timeout = %humantime::format_duration(self.timeout),
            "invoking exec step"
        );

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn program {:?}", self.program[0]))?;

        if let Some(input) = &self.input {
            let payload = serde_json::to_vec(input).context("failed to marshal input")?;
            let mut stdin = child.stdin.take().context("child stdin unavailable")?;
            stdin
                .write_all(&payload)
                .await
                .context("failed to write input to stdin")?;
            // Dropping stdin closes the pipe so the child sees EOF.
        }

        let started = Instant::now();
        let output = tokio::select! {
            () = cancel.cancelled() => return Err(Interrupted::Cancelled.into()),
            output = tokio::time::timeout(self.timeout, child.wait_with_output()) => match output {
                Ok(output) => output
                    .with_context(|| format!("failed to run program {:?}", self.program[0]))?,
                // The child future is dropped here; kill_on_drop terminates it.
                Err(_elapsed) => return Err(Interrupted::DeadlineExceeded(self.timeout).into()),
            },
        };

        tracing::debug!(
            step_id = %self.id,
            exit_code = output.status.code().unwrap_or(-1),
            duration = ?started.elapsed(),
            "exec step finished"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                bail!("command failed: {}", output.status);
            }
            bail!("command failed: {}: {stderr}", output.status);
        }

        let meta = BTreeMap::from([
            ("exec_program".to_string(), self.program.join(" ")),
            ("exec_format".to_string(), self.format.clone()),
        ]);

        if self.format == "json" {
            let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
                .context("failed to parse output as JSON")?;
            return Ok(StepResult::with_meta(parsed, meta));
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&output.stdout);
        Ok(StepResult::with_meta(
            serde_json::json!({ "output": encoded }),
            meta,
        ))
    }
}
