//! Installed-package listing for a resolved environment.
//!
//! Conda environments are listed with `conda list`. Degradable failures on
//! that path (no conda, interpreter not in a conda env, command failure, empty
//! output) fall back to `python -m pip list` with a warning; anything else,
//! cancellation included, propagates.

use crate::conda::CondaService;
use crate::environment::{ResolvedEnvironment, Resource};
use crate::errors::{EnvToolError, Result};
use crate::runner::{require_success, ProcessRunner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: Option<String>,
}

impl Package {
    pub fn new(name: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            version: version.map(str::to_string),
        }
    }

    /// `name` or `name (version)`
    pub fn display_line(&self) -> String {
        match &self.version {
            Some(v) => format!("{} ({})", self.name, v),
            None => self.name.clone(),
        }
    }
}

/// Parse `pip list` tabular output
pub fn parse_pip_list(output: &str) -> Vec<Package> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('-'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let version = fields.next();
            if name == "Package" && version == Some("Version") {
                return None;
            }
            Some(Package::new(name, version))
        })
        .collect()
}

/// Parse `conda list` output: `#` comments skipped, lines need at least
/// name, version and build fields.
pub fn parse_conda_list(output: &str) -> Vec<Package> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return None;
            }
            Some(Package::new(fields[0], Some(fields[1])))
        })
        .collect()
}

/// One package per line
pub fn format_packages(packages: &[Package]) -> String {
    packages
        .iter()
        .map(Package::display_line)
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct PackageLister {
    runner: Arc<dyn ProcessRunner>,
    conda: Arc<dyn CondaService>,
}

impl PackageLister {
    pub fn new(runner: Arc<dyn ProcessRunner>, conda: Arc<dyn CondaService>) -> Self {
        Self { runner, conda }
    }

    pub async fn list_packages(
        &self,
        environment: &ResolvedEnvironment,
        resource: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Package>> {
        if environment.is_conda() {
            match self.list_conda(environment, cancel).await {
                Ok(packages) => return Ok(packages),
                Err(e) if e.is_degradable() => warn!(
                    "[PACKAGES] Conda listing unavailable for {:?} ({}), falling back to pip",
                    environment.executable, e
                ),
                Err(e) => return Err(e),
            }
        }
        debug!("[PACKAGES] Listing with pip for {:?}", resource);
        self.list_pip(environment, cancel).await
    }

    async fn list_conda(
        &self,
        environment: &ResolvedEnvironment,
        cancel: &CancellationToken,
    ) -> Result<Vec<Package>> {
        if self.conda.conda_executable().await.is_none() {
            return Err(EnvToolError::CondaNotFound);
        }
        let conda_env = self
            .conda
            .environment_for(&environment.executable)
            .await?
            .ok_or_else(|| EnvToolError::CondaEnvironmentNotFound(environment.executable.clone()))?;
        let command = self
            .conda
            .list_command(&conda_env)
            .await
            .ok_or(EnvToolError::CondaNotFound)?;

        let output = self.runner.run(&command.program, &command.args, cancel).await?;
        let output = require_success(&command.program, output)?;
        let packages = parse_conda_list(&output.stdout);
        if packages.is_empty() {
            return Err(EnvToolError::CommandFailed {
                program: command.program.display().to_string(),
                message: "empty package list".to_string(),
            });
        }
        Ok(packages)
    }

    async fn list_pip(
        &self,
        environment: &ResolvedEnvironment,
        cancel: &CancellationToken,
    ) -> Result<Vec<Package>> {
        let output = self
            .runner
            .run_module(&environment.executable, "pip", &["list".to_string()], cancel)
            .await?;
        let output = require_success(&environment.executable, output)?;
        Ok(parse_pip_list(&output.stdout))
    }
}
