use crate::cancellation::with_cancellation;
use crate::errors::{EnvToolError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Captured output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands for the tools
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &Path, args: &[String], cancel: &CancellationToken) -> Result<ProcessOutput>;

    /// `<python> -m <module> <args...>`
    async fn run_module(
        &self,
        python: &Path,
        module: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push("-m".to_string());
        full.push(module.to_string());
        full.extend(args.iter().cloned());
        self.run(python, &full, cancel).await
    }
}

/// Runs commands with `tokio::process`; the child is killed if the call is cancelled
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &Path, args: &[String], cancel: &CancellationToken) -> Result<ProcessOutput> {
        debug!("[RUNNER] {:?} {}", program, args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PYTHONIOENCODING", "utf-8")
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| EnvToolError::CommandFailed {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;

        let output = with_cancellation(cancel, async {
            child.wait_with_output().await.map_err(EnvToolError::from)
        })
        .await?;

        let result = ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        if !result.success() {
            warn!(
                "[RUNNER] {:?} exited with {:?}: {}",
                program,
                result.exit_code,
                result.stderr.trim()
            );
        }
        Ok(result)
    }
}

/// Locate a Python interpreter on PATH
pub fn find_python() -> Result<PathBuf> {
    which::which("python3")
        .or_else(|_| which::which("python"))
        .map_err(|_| EnvToolError::PythonNotFound)
}

/// Turn a non-zero exit into an error
pub fn require_success(program: &Path, output: ProcessOutput) -> Result<ProcessOutput> {
    if output.success() {
        return Ok(output);
    }
    match output.exit_code {
        Some(code) if output.stderr.trim().is_empty() => Err(EnvToolError::ProcessExitCode(code)),
        _ => Err(EnvToolError::CommandFailed {
            program: program.display().to_string(),
            message: output.stderr.trim().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_success() {
        let ok = ProcessOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(require_success(Path::new("pip"), ok).is_ok());

        let bare = ProcessOutput {
            exit_code: Some(2),
            ..Default::default()
        };
        assert!(matches!(
            require_success(Path::new("pip"), bare),
            Err(EnvToolError::ProcessExitCode(2))
        ));

        let noisy = ProcessOutput {
            stderr: "No module named pip\n".into(),
            exit_code: Some(1),
            ..Default::default()
        };
        match require_success(Path::new("python"), noisy) {
            Err(EnvToolError::CommandFailed { message, .. }) => assert_eq!(message, "No module named pip"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_command_failure() {
        let runner = TokioProcessRunner::new();
        let res = runner
            .run(
                Path::new("/definitely/not/a/real/binary"),
                &[],
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(res, Err(EnvToolError::CommandFailed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_run_kills_child() {
        let runner = TokioProcessRunner::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = runner
            .run(Path::new("sleep"), &["30".to_string()], &cancel)
            .await;
        assert!(matches!(res, Err(EnvToolError::Cancelled)));
    }
}
