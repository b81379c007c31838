use crate::cancellation::with_cancellation;
use crate::environment::{EnvironmentApi, Resource, Workspace};
use crate::errors::Result;
use crate::preferences::{PreferenceReason, PreferenceStore, ResolvedPreference};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Decides which environment counts as current for a resource.
///
/// Precedence: workspace selection, then global selection, then the
/// environment API's active environment (trusted workspaces only). The global
/// selection still applies inside a workspace with no folder-level entry.
pub struct PreferenceResolver {
    store: Arc<PreferenceStore>,
    workspace: Arc<dyn Workspace>,
    api: Option<Arc<dyn EnvironmentApi>>,
}

impl PreferenceResolver {
    pub fn new(
        store: Arc<PreferenceStore>,
        workspace: Arc<dyn Workspace>,
        api: Option<Arc<dyn EnvironmentApi>>,
    ) -> Self {
        Self {
            store,
            workspace,
            api,
        }
    }

    pub async fn resolve(
        &self,
        resource: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<Option<ResolvedPreference>> {
        if let Some(selection) = self.store.get_selection(resource).await {
            debug!(
                "[RESOLVER] {:?} -> {} ({:?})",
                resource, selection.environment_path, selection.reason
            );
            return Ok(Some(selection));
        }

        let Some(api) = &self.api else {
            debug!("[RESOLVER] No environment API registered");
            return Ok(None);
        };
        if !self.workspace.is_trusted() {
            debug!("[RESOLVER] Workspace untrusted, withholding default recommendation");
            return Ok(None);
        }

        let active = with_cancellation(cancel, api.active_environment_path(resource)).await?;
        Ok(Some(ResolvedPreference {
            environment_path: active.path.to_string_lossy().into_owned(),
            reason: PreferenceReason::DefaultRecommended,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvironmentPath, ResolvedEnvironment, StaticWorkspace};
    use crate::errors::EnvToolError;
    use crate::storage::MemoryStateStore;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;

    struct FixedApi {
        active: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl EnvironmentApi for FixedApi {
        async fn active_environment_path(&self, _resource: Option<&Resource>) -> Result<EnvironmentPath> {
            tokio::time::sleep(self.delay).await;
            Ok(EnvironmentPath::new(self.active))
        }

        async fn resolve_environment(&self, _path: &Path) -> Result<Option<ResolvedEnvironment>> {
            Ok(None)
        }
    }

    fn build_resolver(workspace: StaticWorkspace, api: Option<FixedApi>) -> (PreferenceResolver, Arc<PreferenceStore>) {
        let workspace: Arc<dyn Workspace> = Arc::new(workspace);
        let store = Arc::new(PreferenceStore::new(
            workspace.clone(),
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemoryStateStore::new()),
        ));
        let api = api.map(|a| Arc::new(a) as Arc<dyn EnvironmentApi>);
        (PreferenceResolver::new(store.clone(), workspace, api), store)
    }

    fn api() -> FixedApi {
        FixedApi {
            active: "/active/bin/python",
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_precedence_order() {
        let (resolver, store) = build_resolver(StaticWorkspace::from_paths(&["/work"], true), Some(api()));
        let file = Resource::new("file:///work/main.py");
        let cancel = CancellationToken::new();

        let default = resolver.resolve(Some(&file), &cancel).await.unwrap().unwrap();
        assert_eq!(default.reason, PreferenceReason::DefaultRecommended);
        assert_eq!(default.environment_path, "/active/bin/python");

        // A global selection made before the workspace was opened.
        let (resolver_global, store_global) =
            build_resolver(StaticWorkspace::empty(true), Some(api()));
        store_global.record_selection(Some("/global/python"), None).await;
        let global = resolver_global.resolve(Some(&file), &cancel).await.unwrap().unwrap();
        assert_eq!(global.reason, PreferenceReason::GlobalUserSelected);

        store.record_selection(Some("/ws/python"), Some(&file)).await;
        let ws = resolver.resolve(Some(&file), &cancel).await.unwrap().unwrap();
        assert_eq!(ws.reason, PreferenceReason::WorkspaceUserSelected);
        assert_eq!(ws.environment_path, "/ws/python");
    }

    #[tokio::test]
    async fn test_untrusted_or_unregistered_withholds_default() {
        let cancel = CancellationToken::new();
        let (untrusted, _) = build_resolver(StaticWorkspace::from_paths(&["/work"], false), Some(api()));
        assert!(untrusted.resolve(None, &cancel).await.unwrap().is_none());

        let (no_api, _) = build_resolver(StaticWorkspace::from_paths(&["/work"], true), None);
        assert!(no_api.resolve(None, &cancel).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_beats_slow_api() {
        let slow = FixedApi {
            active: "/active/bin/python",
            delay: Duration::from_secs(30),
        };
        let (resolver, _) = build_resolver(StaticWorkspace::from_paths(&["/work"], true), Some(slow));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let res = resolver.resolve(None, &cancel).await;
        assert!(matches!(res, Err(EnvToolError::Cancelled)));
    }
}
