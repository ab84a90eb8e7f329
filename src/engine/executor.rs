//! Hands a [`RunSpec`] to the external load generator and waits for it.
//!
//! The executor only marshals parameters and reports how the process ended.
//! It never looks at the metrics the tool produces.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::engine::plan::RunSpec;
use crate::error::{Error, Result};

/// Exit code k6 uses when the run finished but thresholds were crossed.
pub const K6_THRESHOLDS_FAILED: i32 = 99;

/// Directory the compose service mounts the results volume on.
pub const CONTAINER_RESULTS_DIR: &str = "/results";

/// How the load-generation process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// `None` when the process was killed or terminated by a signal
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl RunOutcome {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            timed_out: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            exit_code: None,
            timed_out: true,
        }
    }

    pub fn classify(&self, threshold_exit_code: i32) -> OutcomeKind {
        if self.timed_out {
            return OutcomeKind::FailedHard("timed out and was terminated".to_string());
        }
        match self.exit_code {
            Some(0) => OutcomeKind::Completed,
            Some(code) if code == threshold_exit_code => OutcomeKind::CompletedWithViolations,
            Some(code) => OutcomeKind::FailedHard(format!("exited with status {}", code)),
            None => OutcomeKind::FailedHard("terminated by signal".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    Completed,
    CompletedWithViolations,
    FailedHard(String),
}

#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Run one spec to completion. `Err` means the tool could not be started
    /// at all ([`Error::ExecutionUnavailable`]).
    async fn execute(&self, spec: &RunSpec) -> Result<RunOutcome>;
}

/// The flat parameter mapping the load-test script reads from its environment.
pub fn tool_env(spec: &RunSpec, results_dir: &str) -> Vec<(&'static str, String)> {
    vec![
        ("BASE_URL", spec.base_url.clone()),
        ("ENDPOINT", spec.endpoint.clone()),
        ("REQUEST_METHOD", spec.method.as_str().to_string()),
        ("REQUEST_NAME", spec.request_name.clone()),
        ("AUTH_TOKEN", spec.resolved_auth_token.clone()),
        ("THRESHOLDS", to_json(&spec.thresholds)),
        ("TEST_TYPE", spec.test_type.as_str().to_string()),
        ("PEAK_VUS", spec.peak_users.to_string()),
        ("REQUEST_PAYLOAD", to_json(&spec.payload)),
        ("CONTENT_TYPE", spec.content_type.clone()),
        ("REQUEST_HEADERS", to_json(&spec.headers)),
        ("QUERY_PARAMS", to_json(&spec.query_params)),
        ("EXPECTED_STATUS", spec.expected_status.to_string()),
        ("DATA_FILE", spec.data_file.clone()),
        ("RESULTS_DIR", results_dir.to_string()),
        ("RESULTS_BASENAME", spec.base_name.clone()),
    ]
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// Where the load generator runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// `docker compose run --rm <service>`; parameters are forwarded with `-e NAME`
    DockerCompose {
        compose_file: Option<PathBuf>,
        service: String,
        user: Option<String>,
    },
    /// A program on this machine, e.g. `k6 run scripts/load-test.js`
    Local { program: PathBuf, args: Vec<String> },
}

impl Default for Launcher {
    fn default() -> Self {
        Launcher::DockerCompose {
            compose_file: None,
            service: "k6".to_string(),
            user: None,
        }
    }
}

/// Fully resolved process invocation for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(&'static str, String)>,
}

#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    launcher: Launcher,
    results_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new(launcher: Launcher, results_dir: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            launcher,
            results_dir: results_dir.into(),
            timeout,
        }
    }

    fn container_name(spec: &RunSpec) -> String {
        format!("broadside-{}", spec.base_name)
    }

    pub fn invocation(&self, spec: &RunSpec) -> Invocation {
        match &self.launcher {
            Launcher::DockerCompose {
                compose_file,
                service,
                user,
            } => {
                let envs = tool_env(spec, CONTAINER_RESULTS_DIR);
                let mut args = vec!["compose".to_string()];
                if let Some(file) = compose_file {
                    args.push("-f".to_string());
                    args.push(file.display().to_string());
                }
                args.extend(["run".to_string(), "--rm".to_string()]);
                args.push("--name".to_string());
                args.push(Self::container_name(spec));
                if let Some(user) = user {
                    args.push("--user".to_string());
                    args.push(user.clone());
                }
                // Values travel through our own environment so tokens stay out of argv.
                for (key, _) in &envs {
                    args.push("-e".to_string());
                    args.push(key.to_string());
                }
                args.push(service.clone());
                Invocation {
                    program: PathBuf::from("docker"),
                    args,
                    envs,
                }
            }
            Launcher::Local { program, args } => Invocation {
                program: program.clone(),
                args: args.clone(),
                envs: tool_env(spec, &absolute(&self.results_dir).display().to_string()),
            },
        }
    }

    async fn force_cleanup(&self, spec: &RunSpec) {
        if let Launcher::DockerCompose { .. } = self.launcher {
            let name = Self::container_name(spec);
            let result = Command::new("docker")
                .args(["rm", "-f", &name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if let Err(e) = result {
                tracing::warn!(run = %spec.base_name, error = %e, "could not remove container {}", name);
            }
        }
    }
}

/// `uid:gid` owning `dir`. The docker launcher runs the container as this
/// user so the load generator can write into the bind-mounted results dir.
#[cfg(unix)]
pub fn host_user(dir: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    let metadata = std::fs::metadata(dir).ok()?;
    Some(format!("{}:{}", metadata.uid(), metadata.gid()))
}

#[cfg(not(unix))]
pub fn host_user(_dir: &Path) -> Option<String> {
    None
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[async_trait]
impl RunExecutor for ProcessExecutor {
    async fn execute(&self, spec: &RunSpec) -> Result<RunOutcome> {
        let invocation = self.invocation(spec);
        tracing::debug!(
            run = %spec.base_name,
            program = %invocation.program.display(),
            args = ?invocation.args,
            "starting load generator"
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.envs.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| Error::ExecutionUnavailable {
            run: spec.base_name.clone(),
            reason: format!("failed to start {}: {}", invocation.program.display(), e),
        })?;

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::error!(
                        run = %spec.base_name,
                        timeout_secs = limit.as_secs(),
                        "run exceeded its timeout, terminating"
                    );
                    if let Err(e) = child.kill().await {
                        tracing::warn!(run = %spec.base_name, error = %e, "failed to kill load generator");
                    }
                    self.force_cleanup(spec).await;
                    return Ok(RunOutcome::timed_out());
                }
            },
            None => child.wait().await,
        }
        .map_err(|e| Error::ExecutionUnavailable {
            run: spec.base_name.clone(),
            reason: format!("failed waiting for {}: {}", invocation.program.display(), e),
        })?;

        Ok(RunOutcome {
            exit_code: status.code(),
            timed_out: false,
        })
    }
}
