//! Python environment tools for an AI assistant.
//!
//! Resolves which interpreter to use for a file, lists and installs its
//! packages, and records the user's environment choices per workspace folder.

pub mod cancellation;
pub mod conda;
pub mod config;
pub mod environment;
pub mod errors;
pub mod installer;
pub mod packages;
pub mod preferences;
pub mod recency;
pub mod resolver;
pub mod runner;
pub mod storage;
pub mod system;
pub mod tools;

pub use cancellation::{raise_if_cancelled, with_cancellation};
pub use conda::{CondaEnvironment, CondaService, SystemConda};
pub use config::{RecencyLimits, ToolsConfig};
pub use environment::{
    EnvironmentApi, EnvironmentKind, EnvironmentPath, EnvironmentRef, ResolvedEnvironment, Resource,
    StaticWorkspace, Workspace, WorkspaceFolder,
};
pub use errors::{EnvToolError, Result};
pub use installer::{CondaInstaller, InstallerRegistry, InstallerType, ModuleInstaller, PipInstaller};
pub use packages::{Package, PackageLister};
pub use preferences::{PreferenceReason, PreferenceStore, ResolvedPreference};
pub use recency::RecencyCache;
pub use resolver::PreferenceResolver;
pub use runner::{ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use storage::{JsonFileStateStore, MemoryStateStore, StateStore};
pub use system::SystemEnvironmentApi;
pub use tools::{EnvironmentTool, ToolContext, ToolOutput, ToolRegistry, ToolServices};

pub use tokio_util::sync::CancellationToken;
