use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A file or folder location used to scope an environment decision.
///
/// Stored as a URI string (`file:///...`) with any trailing `/` removed so
/// that two spellings of the same folder compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(String);

impl Resource {
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let trimmed = uri.trim_end_matches('/');
        if trimmed.is_empty() || trimmed.ends_with(':') {
            Self(uri)
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Build a `file://` resource from a filesystem path.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let raw = path.as_ref().to_string_lossy().replace('\\', "/");
        if raw.starts_with('/') {
            Self::new(format!("file://{}", raw))
        } else {
            Self::new(format!("file:///{}", raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `self` is `other` or lives underneath it.
    pub fn is_within(&self, other: &Resource) -> bool {
        self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0.as_bytes().get(other.0.len()) == Some(&b'/'))
    }

    /// Filesystem path for `file://` resources.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        let rest = self.0.strip_prefix("file://")?;
        #[cfg(windows)]
        {
            Some(PathBuf::from(rest.trim_start_matches('/')))
        }
        #[cfg(not(windows))]
        {
            Some(PathBuf::from(rest))
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Resource {
    fn from(s: &str) -> Self {
        Resource::new(s)
    }
}

/// Root directory the host treats as part of the open project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFolder {
    pub uri: Resource,
    pub name: String,
    pub index: usize,
}

impl WorkspaceFolder {
    pub fn new(uri: Resource, name: impl Into<String>, index: usize) -> Self {
        Self {
            uri,
            name: name.into(),
            index,
        }
    }
}

/// How a Python environment is managed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    Conda,
    Venv,
    VirtualEnv,
    System,
    #[default]
    Other,
}

impl EnvironmentKind {
    pub fn description(&self) -> &'static str {
        match self {
            EnvironmentKind::Conda => "conda",
            EnvironmentKind::Venv => "venv",
            EnvironmentKind::VirtualEnv => "virtualenv",
            EnvironmentKind::System => "system",
            EnvironmentKind::Other => "unknown",
        }
    }
}

/// Identity of an environment as tracked by the recency cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentRef {
    /// Stable identifier (the executable path as a string)
    pub id: String,
    pub path: PathBuf,
}

impl EnvironmentRef {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.to_string_lossy().into_owned(),
            path,
        }
    }
}

/// Path reported by the environment API as active for a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentPath {
    pub id: String,
    pub path: PathBuf,
}

impl EnvironmentPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.to_string_lossy().into_owned(),
            path,
        }
    }
}

impl From<EnvironmentPath> for EnvironmentRef {
    fn from(p: EnvironmentPath) -> Self {
        EnvironmentRef {
            id: p.id,
            path: p.path,
        }
    }
}

/// A concrete interpreter installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEnvironment {
    pub id: String,
    pub kind: EnvironmentKind,
    /// Interpreter executable
    pub executable: PathBuf,
    /// Environment root (`sys.prefix`)
    pub prefix: Option<PathBuf>,
    pub version: Option<String>,
    pub name: Option<String>,
}

impl ResolvedEnvironment {
    pub fn reference(&self) -> EnvironmentRef {
        EnvironmentRef {
            id: self.id.clone(),
            path: self.executable.clone(),
        }
    }

    pub fn is_conda(&self) -> bool {
        self.kind == EnvironmentKind::Conda
    }
}

/// Maps resources to concrete Python installations
#[async_trait]
pub trait EnvironmentApi: Send + Sync {
    /// Environment currently active for the resource
    async fn active_environment_path(&self, resource: Option<&Resource>) -> Result<EnvironmentPath>;

    /// Resolve a path (executable or prefix) into full details
    async fn resolve_environment(&self, path: &Path) -> Result<Option<ResolvedEnvironment>>;
}

/// Host workspace state
pub trait Workspace: Send + Sync {
    fn folders(&self) -> Vec<WorkspaceFolder>;

    /// Whether the user allowed code-affecting actions in this workspace
    fn is_trusted(&self) -> bool;

    /// Folder containing the resource, or the first folder when there is no
    /// resource or nothing matches. Nested folders resolve to the innermost.
    fn folder_for(&self, resource: Option<&Resource>) -> Option<WorkspaceFolder> {
        let folders = self.folders();
        let matched = resource.and_then(|r| {
            folders
                .iter()
                .filter(|f| r.is_within(&f.uri))
                .max_by_key(|f| f.uri.as_str().len())
                .cloned()
        });
        matched.or_else(|| folders.into_iter().next())
    }
}

/// Fixed set of folders, used by the worker and in tests
#[derive(Debug, Clone, Default)]
pub struct StaticWorkspace {
    folders: Vec<WorkspaceFolder>,
    trusted: bool,
}

impl StaticWorkspace {
    pub fn new(folders: Vec<WorkspaceFolder>, trusted: bool) -> Self {
        Self { folders, trusted }
    }

    /// No folders open
    pub fn empty(trusted: bool) -> Self {
        Self {
            folders: Vec::new(),
            trusted,
        }
    }

    pub fn from_paths<P: AsRef<Path>>(paths: &[P], trusted: bool) -> Self {
        let folders = paths
            .iter()
            .enumerate()
            .map(|(index, p)| {
                let p = p.as_ref();
                let name = p
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.to_string_lossy().into_owned());
                WorkspaceFolder::new(Resource::from_path(p), name, index)
            })
            .collect();
        Self { folders, trusted }
    }
}

impl Workspace for StaticWorkspace {
    fn folders(&self) -> Vec<WorkspaceFolder> {
        self.folders.clone()
    }

    fn is_trusted(&self) -> bool {
        self.trusted
    }
}
