//! User-selected environment preferences.
//!
//! With workspace folders open, selections live in one JSON map keyed by
//! folder URI. With no folders open they go to a single global value.

use crate::config::{GLOBAL_SELECTION_KEY, WORKSPACE_SELECTION_KEY};
use crate::environment::{Resource, Workspace};
use crate::errors::Result;
use crate::storage::StateStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Why an environment was chosen
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceReason {
    GlobalUserSelected,
    WorkspaceUserSelected,
    DefaultRecommended,
}

impl PreferenceReason {
    pub fn description(&self) -> &'static str {
        match self {
            PreferenceReason::GlobalUserSelected => "selected by the user (global)",
            PreferenceReason::WorkspaceUserSelected => "selected by the user for this workspace",
            PreferenceReason::DefaultRecommended => "default recommendation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPreference {
    pub environment_path: String,
    pub reason: PreferenceReason,
}

type WorkspacePreferenceMap = BTreeMap<String, String>;

pub struct PreferenceStore {
    workspace: Arc<dyn Workspace>,
    workspace_state: Arc<dyn StateStore>,
    global_state: Arc<dyn StateStore>,
}

impl PreferenceStore {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        workspace_state: Arc<dyn StateStore>,
        global_state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            workspace,
            workspace_state,
            global_state,
        }
    }

    /// Record (or clear, when the path is empty/absent) an explicit selection.
    ///
    /// Storage failures are logged and swallowed.
    pub async fn record_selection(&self, environment_path: Option<&str>, resource: Option<&Resource>) {
        let path = environment_path
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        let outcome = match self.workspace.folder_for(resource) {
            Some(folder) => self.write_workspace_entry(folder.uri.as_str(), path).await,
            None => {
                info!("[PREFS] Global selection -> {:?}", path);
                self.global_state.update(GLOBAL_SELECTION_KEY, path).await
            }
        };

        if let Err(e) = outcome {
            warn!("[PREFS] Failed to persist environment selection: {}", e);
        }
    }

    /// The user's explicit selection for a resource, if any
    pub async fn get_selection(&self, resource: Option<&Resource>) -> Option<ResolvedPreference> {
        if let Some(folder) = self.workspace.folder_for(resource) {
            let map = self.read_workspace_map().await;
            if let Some(path) = map.get(folder.uri.as_str()).filter(|p| !p.is_empty()) {
                return Some(ResolvedPreference {
                    environment_path: path.clone(),
                    reason: PreferenceReason::WorkspaceUserSelected,
                });
            }
        }

        match self.global_state.get(GLOBAL_SELECTION_KEY).await {
            Ok(Some(path)) if !path.trim().is_empty() => Some(ResolvedPreference {
                environment_path: path,
                reason: PreferenceReason::GlobalUserSelected,
            }),
            Ok(_) => None,
            Err(e) => {
                warn!("[PREFS] Failed to read global selection: {}", e);
                None
            }
        }
    }

    async fn write_workspace_entry(&self, folder_uri: &str, path: Option<String>) -> Result<()> {
        // An unreadable record is overwritten, never allowed to block the write.
        let mut map = match self.workspace_state.get(WORKSPACE_SELECTION_KEY).await {
            Ok(None) => WorkspacePreferenceMap::new(),
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("[PREFS] Replacing corrupt workspace selections: {}", e);
                WorkspacePreferenceMap::new()
            }),
            Err(e) => {
                warn!("[PREFS] Replacing unreadable workspace selections: {}", e);
                WorkspacePreferenceMap::new()
            }
        };

        match path {
            Some(p) => {
                info!("[PREFS] Workspace selection {} -> {}", folder_uri, p);
                map.insert(folder_uri.to_string(), p);
            }
            None => {
                info!("[PREFS] Cleared workspace selection for {}", folder_uri);
                map.remove(folder_uri);
            }
        }

        let serialized = serde_json::to_string(&map)?;
        self.workspace_state
            .update(WORKSPACE_SELECTION_KEY, Some(serialized))
            .await
    }

    async fn read_workspace_map(&self) -> WorkspacePreferenceMap {
        let raw = match self.workspace_state.get(WORKSPACE_SELECTION_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return WorkspacePreferenceMap::new(),
            Err(e) => {
                warn!("[PREFS] Failed to read workspace selections: {}", e);
                return WorkspacePreferenceMap::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("[PREFS] Ignoring unparseable workspace selections: {}", e);
            WorkspacePreferenceMap::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::StaticWorkspace;
    use crate::storage::{JsonFileStateStore, MemoryStateStore};

    struct Fixture {
        store: PreferenceStore,
        workspace_state: Arc<MemoryStateStore>,
        global_state: Arc<MemoryStateStore>,
    }

    fn fixture(workspace: StaticWorkspace) -> Fixture {
        let workspace_state = Arc::new(MemoryStateStore::new());
        let global_state = Arc::new(MemoryStateStore::new());
        let store = PreferenceStore::new(
            Arc::new(workspace),
            workspace_state.clone(),
            global_state.clone(),
        );
        Fixture {
            store,
            workspace_state,
            global_state,
        }
    }

    fn res(s: &str) -> Resource {
        Resource::new(s)
    }

    #[tokio::test]
    async fn test_last_selection_wins_per_folder() {
        let f = fixture(StaticWorkspace::from_paths(&["/work/a", "/work/b"], true));
        let file = res("file:///work/b/main.py");

        f.store.record_selection(Some("/envs/one/bin/python"), Some(&file)).await;
        f.store.record_selection(Some("/envs/two/bin/python"), Some(&file)).await;

        let sel = f.store.get_selection(Some(&file)).await.unwrap();
        assert_eq!(sel.environment_path, "/envs/two/bin/python");
        assert_eq!(sel.reason, PreferenceReason::WorkspaceUserSelected);

        // Folder a is untouched.
        assert!(f.store.get_selection(Some(&res("file:///work/a/x.py"))).await.is_none());

        f.store.record_selection(Some(""), Some(&file)).await;
        assert!(f.store.get_selection(Some(&file)).await.is_none());

        let raw = f.workspace_state.get(WORKSPACE_SELECTION_KEY).await.unwrap().unwrap();
        assert_eq!(raw, "{}");
    }

    #[tokio::test]
    async fn test_unmatched_resource_uses_first_folder() {
        let f = fixture(StaticWorkspace::from_paths(&["/work/a", "/work/b"], true));
        f.store.record_selection(Some("/py"), Some(&res("file:///other/x.py"))).await;

        let sel = f.store.get_selection(Some(&res("file:///work/a/y.py"))).await.unwrap();
        assert_eq!(sel.environment_path, "/py");
        let none_sel = f.store.get_selection(None).await.unwrap();
        assert_eq!(none_sel.environment_path, "/py");
    }

    #[tokio::test]
    async fn test_no_folders_never_reports_workspace_selection() {
        let f = fixture(StaticWorkspace::empty(true));
        // Stale workspace data from an earlier session.
        f.workspace_state
            .update(
                WORKSPACE_SELECTION_KEY,
                Some(r#"{"file:///work/a":"/stale/python"}"#.into()),
            )
            .await
            .unwrap();

        assert!(f.store.get_selection(Some(&res("file:///work/a/x.py"))).await.is_none());

        f.store.record_selection(Some("/global/python"), None).await;
        let sel = f.store.get_selection(Some(&res("file:///work/a/x.py"))).await.unwrap();
        assert_eq!(sel.reason, PreferenceReason::GlobalUserSelected);
        assert_eq!(sel.environment_path, "/global/python");
        assert_eq!(
            f.global_state.get(GLOBAL_SELECTION_KEY).await.unwrap().as_deref(),
            Some("/global/python")
        );

        f.store.record_selection(None, None).await;
        assert!(f.store.get_selection(None).await.is_none());
    }

    #[tokio::test]
    async fn test_global_is_fallback_inside_workspace() {
        let f = fixture(StaticWorkspace::from_paths(&["/work/a"], true));
        f.global_state
            .update(GLOBAL_SELECTION_KEY, Some("/global/python".into()))
            .await
            .unwrap();

        let sel = f.store.get_selection(Some(&res("file:///work/a/x.py"))).await.unwrap();
        assert_eq!(sel.reason, PreferenceReason::GlobalUserSelected);

        f.store.record_selection(Some("/ws/python"), None).await;
        let sel = f.store.get_selection(Some(&res("file:///work/a/x.py"))).await.unwrap();
        assert_eq!(sel.reason, PreferenceReason::WorkspaceUserSelected);
    }

    #[tokio::test]
    async fn test_corrupt_map_is_replaced_on_write() {
        let f = fixture(StaticWorkspace::from_paths(&["/work/a"], true));
        f.workspace_state
            .update(WORKSPACE_SELECTION_KEY, Some("{broken".into()))
            .await
            .unwrap();

        assert!(f.store.get_selection(None).await.is_none());

        f.store.record_selection(Some("/py"), None).await;
        let raw = f.workspace_state.get(WORKSPACE_SELECTION_KEY).await.unwrap().unwrap();
        let map: WorkspacePreferenceMap = serde_json::from_str(&raw).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("file:///work/a").map(String::as_str), Some("/py"));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unparseable_map_is_warned_on_read() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let f = fixture(StaticWorkspace::from_paths(&["/work/a"], true));
        f.workspace_state
            .update(WORKSPACE_SELECTION_KEY, Some("[1, 2".into()))
            .await
            .unwrap();
        assert!(f.store.get_selection(Some(&res("file:///work/a/x.py"))).await.is_none());

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("WARN"), "{}", output);
        assert!(output.contains("[PREFS] Ignoring unparseable workspace selections"), "{}", output);
    }

    #[tokio::test]
    async fn test_corrupt_state_file_does_not_block_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace-state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = PreferenceStore::new(
            Arc::new(StaticWorkspace::from_paths(&["/work"], true)),
            Arc::new(JsonFileStateStore::new(&path)),
            Arc::new(MemoryStateStore::new()),
        );
        let file = res("file:///work/a.py");
        assert!(store.get_selection(Some(&file)).await.is_none());

        store.record_selection(Some("/envs/b/bin/python"), Some(&file)).await;
        let sel = store.get_selection(Some(&file)).await.unwrap();
        assert_eq!(sel.environment_path, "/envs/b/bin/python");
        assert_eq!(sel.reason, PreferenceReason::WorkspaceUserSelected);

        let on_disk: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let map: WorkspacePreferenceMap =
            serde_json::from_str(&on_disk[WORKSPACE_SELECTION_KEY]).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["file:///work"], "/envs/b/bin/python");
    }
}
