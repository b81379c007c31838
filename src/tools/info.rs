use super::{into_tool_output, parse_input, parse_resource, EnvironmentTool, ResourceInput, ToolContext, ToolOutput};
use crate::environment::{ResolvedEnvironment, Resource};
use crate::errors::Result;
use crate::packages::format_packages;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) fn resource_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "resource": {
                "type": "string",
                "description": "File or folder (path or file:// URI) whose Python environment should be used. Defaults to the workspace."
            }
        },
        "additionalProperties": false
    })
}

fn describe_target(resource: Option<&Resource>) -> String {
    match resource {
        Some(r) => r.to_string(),
        None => "the workspace".to_string(),
    }
}

/// Quote a path for a shell command line when it contains spaces
fn quote(path: &Path) -> String {
    let s = path.display().to_string();
    if s.contains(' ') {
        format!("\"{}\"", s)
    } else {
        s
    }
}

/// Reports environment type, version, executable and installed packages
pub struct EnvironmentInfoTool {
    context: Arc<ToolContext>,
}

impl EnvironmentInfoTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn describe(&self, input: Value, cancel: &CancellationToken) -> Result<String> {
        let input: ResourceInput = parse_input(input)?;
        let resource = parse_resource(input.resource.as_deref());
        let env = self.context.environment_for(resource.as_ref(), cancel).await?;
        let packages = self
            .context
            .packages
            .list_packages(&env, resource.as_ref(), cancel)
            .await?;

        let mut out = format!("Python environment for {}:\n", describe_target(resource.as_ref()));
        out.push_str(&environment_summary(&env));
        out.push_str("Installed packages:\n");
        if packages.is_empty() {
            out.push_str("(none found)\n");
        } else {
            out.push_str(&format_packages(&packages));
            out.push('\n');
        }
        Ok(out)
    }
}

pub(crate) fn environment_summary(env: &ResolvedEnvironment) -> String {
    let mut out = String::new();
    match &env.name {
        Some(name) => out.push_str(&format!("Type: {} ({})\n", env.kind.description(), name)),
        None => out.push_str(&format!("Type: {}\n", env.kind.description())),
    }
    out.push_str(&format!(
        "Python version: {}\n",
        env.version.as_deref().unwrap_or("unknown")
    ));
    out.push_str(&format!("Executable: {}\n", env.executable.display()));
    out
}

#[async_trait]
impl EnvironmentTool for EnvironmentInfoTool {
    fn name(&self) -> &'static str {
        "get_python_environment_info"
    }

    fn description(&self) -> &'static str {
        "Describe the Python environment used for a file or the workspace, including installed packages."
    }

    fn input_schema(&self) -> Value {
        resource_schema()
    }

    async fn invoke(&self, input: Value, cancel: &CancellationToken) -> Result<ToolOutput> {
        into_tool_output(self.describe(input, cancel).await)
    }
}

/// Reports the command line that runs Python in the resolved environment
pub struct ExecutableTool {
    context: Arc<ToolContext>,
}

impl ExecutableTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn command_for(&self, env: &ResolvedEnvironment) -> String {
        if env.is_conda() {
            if let (Some(conda), Some(conda_env)) = (
                self.context.conda.conda_executable().await,
                self.context.conda.environment_for(&env.executable).await.ok().flatten(),
            ) {
                return format!(
                    "{} run -p {} --no-capture-output python",
                    quote(&conda),
                    quote(&conda_env.prefix)
                );
            }
        }
        quote(&env.executable)
    }

    async fn describe(&self, input: Value, cancel: &CancellationToken) -> Result<String> {
        let input: ResourceInput = parse_input(input)?;
        let resource = parse_resource(input.resource.as_deref());
        let env = self.context.environment_for(resource.as_ref(), cancel).await?;
        let command = self.command_for(&env).await;
        Ok(format!(
            "Run Python for {} with:\n{}\n",
            describe_target(resource.as_ref()),
            command
        ))
    }
}

#[async_trait]
impl EnvironmentTool for ExecutableTool {
    fn name(&self) -> &'static str {
        "get_python_executable"
    }

    fn description(&self) -> &'static str {
        "Return the command to use when running Python in the environment for a file or the workspace."
    }

    fn input_schema(&self) -> Value {
        resource_schema()
    }

    async fn invoke(&self, input: Value, cancel: &CancellationToken) -> Result<ToolOutput> {
        into_tool_output(self.describe(input, cancel).await)
    }
}
