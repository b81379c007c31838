use super::{into_tool_output, parse_input, parse_resource, EnvironmentTool, ToolContext, ToolOutput};
use crate::errors::{EnvToolError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
struct InstallInput {
    #[serde(default)]
    packages: Vec<String>,
    #[serde(default, alias = "resourcePath")]
    resource: Option<String>,
}

/// Installs packages into the resolved environment
pub struct InstallPackagesTool {
    context: Arc<ToolContext>,
}

impl InstallPackagesTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn install(&self, input: Value, cancel: &CancellationToken) -> Result<String> {
        let input: InstallInput = parse_input(input)?;
        let packages: Vec<String> = input
            .packages
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if packages.is_empty() {
            return Err(EnvToolError::InvalidInput("no packages to install".into()));
        }

        let resource = parse_resource(input.resource.as_deref());
        let env = self.context.environment_for(resource.as_ref(), cancel).await?;
        let installer = self
            .context
            .installers
            .installer_for(&env, resource.as_ref())
            .await?;

        let mut installed = Vec::new();
        let mut failed = Vec::new();
        for package in &packages {
            match installer
                .install_module(package, &env, resource.as_ref(), cancel)
                .await
            {
                Ok(()) => installed.push(package.as_str()),
                Err(EnvToolError::Cancelled) => return Err(EnvToolError::Cancelled),
                Err(e) => {
                    warn!("[INSTALL] Failed to install {}: {}", package, e);
                    failed.push(format!("{}: {}", package, e));
                }
            }
        }

        if installed.is_empty() {
            return Err(EnvToolError::CommandFailed {
                program: format!("{:?} installer", installer.installer_type()).to_lowercase(),
                message: failed.join("; "),
            });
        }

        let mut out = format!(
            "Successfully installed packages into {}: {}\n",
            env.executable.display(),
            installed.join(", ")
        );
        if !failed.is_empty() {
            out.push_str(&format!("Failed to install: {}\n", failed.join("; ")));
        }
        Ok(out)
    }
}

#[async_trait]
impl EnvironmentTool for InstallPackagesTool {
    fn name(&self) -> &'static str {
        "install_python_packages"
    }

    fn description(&self) -> &'static str {
        "Install Python packages into the environment used for a file or the workspace."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "packages": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Package names (optionally with version specifiers) to install."
                },
                "resource": {
                    "type": "string",
                    "description": "File or folder whose environment receives the packages."
                }
            },
            "required": ["packages"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, input: Value, cancel: &CancellationToken) -> Result<ToolOutput> {
        into_tool_output(self.install(input, cancel).await)
    }
}
