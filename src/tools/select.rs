use super::info::environment_summary;
use super::{into_tool_output, parse_input, parse_resource, EnvironmentTool, ToolContext, ToolOutput};
use crate::cancellation::with_cancellation;
use crate::errors::{EnvToolError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Deserialize)]
struct SelectInput {
    #[serde(default, alias = "environmentPath")]
    environment_path: Option<String>,
    #[serde(default, alias = "resourcePath")]
    resource: Option<String>,
}

/// Records an explicit environment choice for a file's workspace folder
/// (or globally with no workspace open). An empty path clears it.
pub struct SelectEnvironmentTool {
    context: Arc<ToolContext>,
}

impl SelectEnvironmentTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn select(&self, input: Value, cancel: &CancellationToken) -> Result<String> {
        let input: SelectInput = parse_input(input)?;
        let resource = parse_resource(input.resource.as_deref());
        let path = input
            .environment_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let Some(path) = path else {
            self.context
                .preferences
                .record_selection(None, resource.as_ref())
                .await;
            return Ok("Cleared the selected Python environment.\n".to_string());
        };

        let env = match &self.context.api {
            Some(api) => with_cancellation(cancel, api.resolve_environment(Path::new(path)))
                .await?
                .ok_or_else(|| {
                    EnvToolError::NoEnvironment(format!("{} is not a usable Python environment", path))
                })?,
            None => {
                return Err(EnvToolError::NoEnvironment(
                    "the Python environment API is not available".into(),
                ))
            }
        };

        let stored = env.executable.to_string_lossy().into_owned();
        self.context
            .preferences
            .record_selection(Some(&stored), resource.as_ref())
            .await;
        self.context.recency.record(resource.as_ref(), env.reference());
        self.context.notify_active_changed(env.reference());

        Ok(format!("Selected Python environment:\n{}", environment_summary(&env)))
    }
}

#[async_trait]
impl EnvironmentTool for SelectEnvironmentTool {
    fn name(&self) -> &'static str {
        "select_python_environment"
    }

    fn description(&self) -> &'static str {
        "Select the Python environment to use for a file's workspace folder. Pass an empty path to clear the selection."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "environment_path": {
                    "type": "string",
                    "description": "Interpreter or environment directory to select. Empty clears the selection."
                },
                "resource": {
                    "type": "string",
                    "description": "File or folder the selection applies to."
                }
            },
            "additionalProperties": false
        })
    }

    async fn invoke(&self, input: Value, cancel: &CancellationToken) -> Result<ToolOutput> {
        into_tool_output(self.select(input, cancel).await)
    }
}
