//! Tools exposed to the assistant.
//!
//! Every tool returns plain text. Failures other than cancellation become
//! an error message in the output; cancellation always propagates.

mod create;
mod info;
mod install;
mod select;

pub use create::{CreateEnvironmentTool, EnvironmentCreator, VenvCreator};
pub use info::{EnvironmentInfoTool, ExecutableTool};
pub use install::InstallPackagesTool;
pub use select::SelectEnvironmentTool;

use crate::cancellation::{raise_if_cancelled, with_cancellation};
use crate::conda::CondaService;
use crate::config::ToolsConfig;
use crate::environment::{EnvironmentApi, EnvironmentRef, ResolvedEnvironment, Resource, Workspace};
use crate::errors::{EnvToolError, Result};
use crate::installer::InstallerRegistry;
use crate::packages::PackageLister;
use crate::preferences::PreferenceStore;
use crate::recency::RecencyCache;
use crate::resolver::PreferenceResolver;
use crate::runner::ProcessRunner;
use crate::storage::StateStore;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Text handed back to the language model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Convert a tool body's result into output; only cancellation stays an error.
pub fn into_tool_output(result: Result<String>) -> Result<ToolOutput> {
    match result {
        Ok(text) => Ok(ToolOutput::text(text)),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            warn!("[TOOLS] Tool failed: {}", e);
            Ok(ToolOutput::error(e.to_string()))
        }
    }
}

#[async_trait]
pub trait EnvironmentTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the tool input
    fn input_schema(&self) -> Value;

    async fn invoke(&self, input: Value, cancel: &CancellationToken) -> Result<ToolOutput>;
}

/// Input shared by tools that take an optional resource
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResourceInput {
    #[serde(default, alias = "resourcePath")]
    pub resource: Option<String>,
}

pub(crate) fn parse_input<T: for<'de> Deserialize<'de> + Default>(input: Value) -> Result<T> {
    if input.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(input).map_err(|e| EnvToolError::InvalidInput(e.to_string()))
}

/// A resource given either as a URI or as a filesystem path
pub fn parse_resource(raw: Option<&str>) -> Option<Resource> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    if raw.contains("://") {
        Some(Resource::new(raw))
    } else {
        Some(Resource::from_path(raw))
    }
}

/// External collaborators the tools are built from
pub struct ToolServices {
    pub config: ToolsConfig,
    pub workspace: Arc<dyn Workspace>,
    pub workspace_state: Arc<dyn StateStore>,
    pub global_state: Arc<dyn StateStore>,
    pub api: Option<Arc<dyn EnvironmentApi>>,
    pub runner: Arc<dyn ProcessRunner>,
    pub conda: Arc<dyn CondaService>,
    pub installers: InstallerRegistry,
}

/// Shared state behind all tools
pub struct ToolContext {
    pub config: ToolsConfig,
    pub workspace: Arc<dyn Workspace>,
    pub api: Option<Arc<dyn EnvironmentApi>>,
    pub runner: Arc<dyn ProcessRunner>,
    pub conda: Arc<dyn CondaService>,
    pub preferences: Arc<PreferenceStore>,
    pub resolver: PreferenceResolver,
    pub recency: RecencyCache,
    pub packages: PackageLister,
    pub installers: InstallerRegistry,
    active_changes: watch::Sender<Option<EnvironmentRef>>,
}

impl ToolContext {
    pub fn new(services: ToolServices) -> Self {
        let preferences = Arc::new(PreferenceStore::new(
            services.workspace.clone(),
            services.workspace_state,
            services.global_state,
        ));
        let resolver = PreferenceResolver::new(
            preferences.clone(),
            services.workspace.clone(),
            services.api.clone(),
        );
        let (active_changes, _) = watch::channel(None);

        Self {
            recency: RecencyCache::new(services.config.recency),
            packages: PackageLister::new(services.runner.clone(), services.conda.clone()),
            config: services.config,
            workspace: services.workspace,
            api: services.api,
            runner: services.runner,
            conda: services.conda,
            preferences,
            resolver,
            installers: services.installers,
            active_changes,
        }
    }

    /// Receiver for active-environment change notifications
    pub fn subscribe_active_changes(&self) -> watch::Receiver<Option<EnvironmentRef>> {
        self.active_changes.subscribe()
    }

    pub fn notify_active_changed(&self, environment: EnvironmentRef) {
        debug!("[TOOLS] Active environment changed -> {}", environment.id);
        self.active_changes.send_replace(Some(environment));
    }

    fn api(&self) -> Result<&Arc<dyn EnvironmentApi>> {
        self.api
            .as_ref()
            .ok_or_else(|| EnvToolError::NoEnvironment("the Python environment API is not available".into()))
    }

    /// Environment a tool should operate on for `resource`.
    ///
    /// Order: the user's explicit selection, then the environment a tool last
    /// used for the resource, then the resolver's default recommendation.
    /// The result is recorded as recently used.
    pub async fn environment_for(
        &self,
        resource: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<ResolvedEnvironment> {
        let api = self.api()?.clone();
        let mut resolved = None;

        if let Some(selection) = self.preferences.get_selection(resource).await {
            let path = PathBuf::from(&selection.environment_path);
            resolved = with_cancellation(cancel, api.resolve_environment(&path)).await?;
            if resolved.is_none() {
                warn!(
                    "[TOOLS] Selected environment {} ({:?}) no longer resolves",
                    selection.environment_path, selection.reason
                );
            }
        }

        if resolved.is_none() {
            let fallback_api = api.clone();
            let recent = self
                .recency
                .lookup(resource, || async move {
                    with_cancellation(cancel, fallback_api.active_environment_path(resource))
                        .await
                        .ok()
                        .map(EnvironmentRef::from)
                })
                .await;
            raise_if_cancelled(cancel)?;

            if let Some(recent) = recent {
                resolved = with_cancellation(cancel, api.resolve_environment(&recent.path)).await?;
                if resolved.is_none() {
                    debug!("[TOOLS] Recently used {} no longer resolves", recent.id);
                }
            }
        }

        if resolved.is_none() {
            if let Some(preference) = self.resolver.resolve(resource, cancel).await? {
                let path = PathBuf::from(&preference.environment_path);
                resolved = with_cancellation(cancel, api.resolve_environment(&path)).await?;
            }
        }

        let environment = resolved.ok_or_else(|| {
            EnvToolError::NoEnvironment(match resource {
                Some(r) => format!("no Python environment could be resolved for {}", r),
                None => "no Python environment could be resolved for the workspace".to_string(),
            })
        })?;

        self.recency.record(resource, environment.reference());
        Ok(environment)
    }
}

/// Tools looked up by name
pub struct ToolRegistry {
    tools: Vec<Arc<dyn EnvironmentTool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn EnvironmentTool>>) -> Self {
        Self { tools }
    }

    /// All built-in tools over one context
    pub fn with_default_tools(context: Arc<ToolContext>, creator: Arc<dyn EnvironmentCreator>) -> Self {
        let tools: Vec<Arc<dyn EnvironmentTool>> = vec![
            Arc::new(EnvironmentInfoTool::new(context.clone())),
            Arc::new(ExecutableTool::new(context.clone())),
            Arc::new(InstallPackagesTool::new(context.clone())),
            Arc::new(SelectEnvironmentTool::new(context.clone())),
            Arc::new(CreateEnvironmentTool::new(context, creator)),
        ];
        Self::new(tools)
    }

    /// Accepts `get_python_executable`, `get.python.executable` and `get/python/executable`
    pub fn get(&self, name: &str) -> Option<Arc<dyn EnvironmentTool>> {
        let wanted = normalize_tool_name(name);
        self.tools
            .iter()
            .find(|t| normalize_tool_name(t.name()) == wanted)
            .cloned()
    }

    pub fn tools(&self) -> &[Arc<dyn EnvironmentTool>] {
        &self.tools
    }
}

fn normalize_tool_name(name: &str) -> String {
    name.replace(['.', '/'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_tool_output_keeps_cancellation() {
        assert!(matches!(
            into_tool_output(Err(EnvToolError::Cancelled)),
            Err(EnvToolError::Cancelled)
        ));

        let out = into_tool_output(Err(EnvToolError::NoEnvironment("nothing".into()))).unwrap();
        assert!(out.is_error);
        assert!(out.text.contains("nothing"));

        let ok = into_tool_output(Ok("fine".into())).unwrap();
        assert_eq!(ok, ToolOutput::text("fine"));
    }

    #[test]
    fn test_parse_resource() {
        assert_eq!(parse_resource(None), None);
        assert_eq!(parse_resource(Some("  ")), None);
        assert_eq!(
            parse_resource(Some("file:///work/a.py")),
            Some(Resource::new("file:///work/a.py"))
        );
        assert_eq!(
            parse_resource(Some("/work/a.py")),
            Some(Resource::new("file:///work/a.py"))
        );
    }

    #[test]
    fn test_normalize_tool_name() {
        assert_eq!(normalize_tool_name("get.python/executable"), "get_python_executable");
    }
}
