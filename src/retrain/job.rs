//! External jobs driven by the orchestrator.
//!
//! A `Job` is started once per retrain and yields a `JobHandle`; waiting on the
//! handle produces the exit status and captured output. Dropping a handle
//! before it finishes stops the underlying work.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::GATEWAY_TOKEN_HEADER;
use crate::error::{OcrError, Result};

/// Result of a finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl JobOutcome {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Human-readable reason for a failed outcome
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        let code = match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        if stderr.is_empty() {
            code
        } else {
            format!("{}: {}", code, stderr)
        }
    }
}

/// Something the orchestrator can start
#[async_trait]
pub trait Job: Send + Sync {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Launch the job. Failing to launch is reported as an error, not an outcome.
    async fn start(&self) -> Result<Box<dyn JobHandle>>;
}

/// A running job
#[async_trait]
pub trait JobHandle: Send {
    /// Wait for completion
    async fn wait(&mut self) -> Result<JobOutcome>;
}

/// Runs a shell command through `sh -c`
#[derive(Debug, Clone)]
pub struct CommandJob {
    command: String,
}

impl CommandJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Job for CommandJob {
    fn describe(&self) -> String {
        format!("command '{}'", self.command)
    }

    async fn start(&self) -> Result<Box<dyn JobHandle>> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        debug!("Spawned '{}' (pid {:?})", self.command, child.id());
        Ok(Box::new(CommandHandle { child: Some(child) }))
    }
}

struct CommandHandle {
    child: Option<Child>,
}

#[async_trait]
impl JobHandle for CommandHandle {
    async fn wait(&mut self) -> Result<JobOutcome> {
        let child = self
            .child
            .take()
            .ok_or_else(|| OcrError::InvalidState("command already waited on".to_string()))?;
        let output = child.wait_with_output().await?;
        Ok(JobOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Body returned by a stage service
#[derive(Debug, Deserialize)]
struct StageResponse {
    status: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Triggers a stage service endpoint with `GET <url>`
#[derive(Debug, Clone)]
pub struct HttpJob {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpJob {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcrError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            token,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(client: reqwest::Client, url: String, token: Option<String>) -> Result<JobOutcome> {
        let mut request = client.get(&url);
        if let Some(token) = token {
            request = request.header(GATEWAY_TOKEN_HEADER, token);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<StageResponse>(&body) {
            Ok(parsed) if status.is_success() && parsed.status == "success" => {
                Ok(JobOutcome::success(parsed.output.unwrap_or_default()))
            }
            Ok(parsed) => Ok(JobOutcome::failure(
                Some(1),
                parsed
                    .error
                    .unwrap_or_else(|| format!("stage service returned {}", status)),
            )),
            Err(_) => Ok(JobOutcome::failure(
                Some(1),
                format!("stage service returned {}: {}", status, body),
            )),
        }
    }
}

#[async_trait]
impl Job for HttpJob {
    fn describe(&self) -> String {
        format!("GET {}", self.url)
    }

    async fn start(&self) -> Result<Box<dyn JobHandle>> {
        let task = tokio::spawn(Self::call(
            self.client.clone(),
            self.url.clone(),
            self.token.clone(),
        ));
        Ok(Box::new(HttpHandle { task }))
    }
}

struct HttpHandle {
    task: JoinHandle<Result<JobOutcome>>,
}

#[async_trait]
impl JobHandle for HttpHandle {
    async fn wait(&mut self) -> Result<JobOutcome> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(OcrError::UpstreamUnavailable(format!("stage request aborted: {}", e))),
        }
    }
}

impl Drop for HttpHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
