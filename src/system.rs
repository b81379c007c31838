use crate::conda::{is_conda_prefix, prefix_for_executable};
use crate::environment::{EnvironmentApi, EnvironmentKind, EnvironmentPath, ResolvedEnvironment, Resource};
use crate::errors::{EnvToolError, Result};
use crate::runner::{find_python, ProcessRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Environment API backed by the local machine.
///
/// The active environment is the first of `VIRTUAL_ENV`, `CONDA_PREFIX` or
/// the interpreter on PATH. Resolution inspects `pyvenv.cfg` / `conda-meta`
/// and asks the interpreter for its version.
pub struct SystemEnvironmentApi {
    runner: Arc<dyn ProcessRunner>,
}

impl SystemEnvironmentApi {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

/// Interpreter inside an environment prefix
pub fn interpreter_in(prefix: &Path) -> PathBuf {
    if cfg!(windows) {
        prefix.join("python.exe")
    } else {
        let python3 = prefix.join("bin").join("python3");
        if python3.exists() {
            python3
        } else {
            prefix.join("bin").join("python")
        }
    }
}

/// Classify an environment by the markers in its prefix
pub fn classify_prefix(prefix: &Path) -> EnvironmentKind {
    if is_conda_prefix(prefix) {
        return EnvironmentKind::Conda;
    }
    let cfg = prefix.join("pyvenv.cfg");
    if let Ok(contents) = std::fs::read_to_string(&cfg) {
        if contents.lines().any(|l| l.trim_start().starts_with("virtualenv")) {
            return EnvironmentKind::VirtualEnv;
        }
        return EnvironmentKind::Venv;
    }
    EnvironmentKind::System
}

/// Version number out of `python --version` output (`Python 3.11.4`)
pub fn parse_python_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .skip_while(|w| !w.eq_ignore_ascii_case("python"))
        .nth(1)
        .map(str::to_string)
}

#[async_trait]
impl EnvironmentApi for SystemEnvironmentApi {
    async fn active_environment_path(&self, _resource: Option<&Resource>) -> Result<EnvironmentPath> {
        for var in ["VIRTUAL_ENV", "CONDA_PREFIX"] {
            if let Ok(prefix) = std::env::var(var) {
                let exe = interpreter_in(Path::new(&prefix));
                if exe.exists() {
                    debug!("[SYSTEM] Active environment from {}: {:?}", var, exe);
                    return Ok(EnvironmentPath::new(exe));
                }
            }
        }
        find_python().map(EnvironmentPath::new)
    }

    async fn resolve_environment(&self, path: &Path) -> Result<Option<ResolvedEnvironment>> {
        // Accept either an interpreter or an environment directory.
        let executable = if path.is_dir() {
            interpreter_in(path)
        } else {
            path.to_path_buf()
        };
        if !executable.exists() {
            debug!("[SYSTEM] Interpreter {:?} does not exist", executable);
            return Ok(None);
        }

        let prefix = prefix_for_executable(&executable);
        let kind = prefix
            .as_deref()
            .map(classify_prefix)
            .unwrap_or(EnvironmentKind::Other);
        let name = match kind {
            EnvironmentKind::System => None,
            _ => prefix
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
        };

        let version = match self
            .runner
            .run(&executable, &["--version".to_string()], &CancellationToken::new())
            .await
        {
            Ok(out) => parse_python_version(&out.stdout).or_else(|| parse_python_version(&out.stderr)),
            Err(EnvToolError::Cancelled) => return Err(EnvToolError::Cancelled),
            Err(e) => {
                warn!("[SYSTEM] Could not query version of {:?}: {}", executable, e);
                None
            }
        };

        Ok(Some(ResolvedEnvironment {
            id: executable.to_string_lossy().into_owned(),
            kind,
            executable,
            prefix,
            version,
            name,
        }))
    }
}
