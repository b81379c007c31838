use super::info::environment_summary;
use super::{into_tool_output, parse_input, parse_resource, EnvironmentTool, ResourceInput, ToolContext, ToolOutput};
use crate::cancellation::with_cancellation;
use crate::environment::{Resource, Workspace};
use crate::errors::{EnvToolError, Result};
use crate::runner::{find_python, require_success, ProcessRunner};
use crate::system::interpreter_in;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Creates a new environment; `None` means the user backed out
#[async_trait]
pub trait EnvironmentCreator: Send + Sync {
    async fn create(&self, resource: Option<&Resource>, cancel: &CancellationToken) -> Result<Option<PathBuf>>;
}

/// Creates `<workspace folder>/.venv` with the interpreter found on PATH
pub struct VenvCreator {
    runner: Arc<dyn ProcessRunner>,
    workspace: Arc<dyn Workspace>,
}

impl VenvCreator {
    pub fn new(runner: Arc<dyn ProcessRunner>, workspace: Arc<dyn Workspace>) -> Self {
        Self { runner, workspace }
    }
}

#[async_trait]
impl EnvironmentCreator for VenvCreator {
    async fn create(&self, resource: Option<&Resource>, cancel: &CancellationToken) -> Result<Option<PathBuf>> {
        let folder = self
            .workspace
            .folder_for(resource)
            .ok_or_else(|| EnvToolError::InvalidInput("open a workspace folder to create an environment in".into()))?;
        let root = folder
            .uri
            .to_file_path()
            .ok_or_else(|| EnvToolError::InvalidInput(format!("{} is not a local folder", folder.uri)))?;
        let target = root.join(".venv");
        let python = find_python()?;

        info!("[CREATE] Creating virtual environment at {:?}", target);
        let output = self
            .runner
            .run_module(&python, "venv", &[target.display().to_string()], cancel)
            .await?;
        require_success(&python, output)?;
        Ok(Some(interpreter_in(&target)))
    }
}

/// Wait up to `wait` for the next change on `rx`. Returns whether one arrived.
pub(crate) async fn wait_for_change<T>(
    rx: &mut watch::Receiver<T>,
    wait: Duration,
    cancel: &CancellationToken,
) -> Result<bool> {
    with_cancellation(cancel, async {
        Ok(matches!(tokio::time::timeout(wait, rx.changed()).await, Ok(Ok(()))))
    })
    .await
}

/// Creates an environment, waits briefly for the host to switch to it, then
/// records it as the selection for the resource.
pub struct CreateEnvironmentTool {
    context: Arc<ToolContext>,
    creator: Arc<dyn EnvironmentCreator>,
}

impl CreateEnvironmentTool {
    pub fn new(context: Arc<ToolContext>, creator: Arc<dyn EnvironmentCreator>) -> Self {
        Self { context, creator }
    }

    async fn create(&self, input: Value, cancel: &CancellationToken) -> Result<String> {
        let input: ResourceInput = parse_input(input)?;
        let resource = parse_resource(input.resource.as_deref());

        let mut changes = self.context.subscribe_active_changes();
        changes.borrow_and_update();

        let Some(created) = self.creator.create(resource.as_ref(), cancel).await? else {
            return Ok("No Python environment was created.\n".to_string());
        };

        if !wait_for_change(&mut changes, self.context.config.creation_wait, cancel).await? {
            debug!(
                "[CREATE] No active environment change within {:?}, continuing",
                self.context.config.creation_wait
            );
        }

        let api = self
            .context
            .api
            .as_ref()
            .ok_or_else(|| EnvToolError::NoEnvironment("the Python environment API is not available".into()))?;
        let env = with_cancellation(cancel, api.resolve_environment(&created))
            .await?
            .ok_or_else(|| {
                EnvToolError::NoEnvironment(format!("created environment {:?} could not be resolved", created))
            })?;

        let stored = env.executable.to_string_lossy().into_owned();
        self.context
            .preferences
            .record_selection(Some(&stored), resource.as_ref())
            .await;
        self.context.recency.record(resource.as_ref(), env.reference());

        Ok(format!("Created Python environment:\n{}", environment_summary(&env)))
    }
}

#[async_trait]
impl EnvironmentTool for CreateEnvironmentTool {
    fn name(&self) -> &'static str {
        "create_python_environment"
    }

    fn description(&self) -> &'static str {
        "Create a new Python environment for the workspace folder of a file and select it."
    }

    fn input_schema(&self) -> Value {
        super::info::resource_schema()
    }

    async fn invoke(&self, input: Value, cancel: &CancellationToken) -> Result<ToolOutput> {
        into_tool_output(self.create(input, cancel).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_change_times_out() {
        let (_tx, mut rx) = watch::channel(0u32);
        let start = tokio::time::Instant::now();
        let changed = wait_for_change(&mut rx, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!changed);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_change_sees_notification() {
        let (tx, mut rx) = watch::channel(0u32);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send_replace(1);
        });
        let changed = wait_for_change(&mut rx, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn test_wait_for_change_cancelled() {
        let (_tx, mut rx) = watch::channel(0u32);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = wait_for_change(&mut rx, Duration::from_secs(5), &cancel).await;
        assert!(matches!(res, Err(EnvToolError::Cancelled)));
    }
}
