use crate::errors::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A conda environment an interpreter belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondaEnvironment {
    pub name: Option<String>,
    pub prefix: PathBuf,
}

/// A ready-to-run conda invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondaCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Conda discovery and command construction
#[async_trait]
pub trait CondaService: Send + Sync {
    async fn conda_executable(&self) -> Option<PathBuf>;

    /// Conda environment that owns the given interpreter, if any
    async fn environment_for(&self, executable: &Path) -> Result<Option<CondaEnvironment>>;

    /// Command that lists the packages of `env`
    async fn list_command(&self, env: &CondaEnvironment) -> Option<CondaCommand> {
        let program = self.conda_executable().await?;
        Some(CondaCommand {
            program,
            args: vec![
                "list".to_string(),
                "-p".to_string(),
                env.prefix.display().to_string(),
            ],
        })
    }

    /// Command that installs `package` into `env`
    async fn install_command(&self, env: &CondaEnvironment, package: &str) -> Option<CondaCommand> {
        let program = self.conda_executable().await?;
        Some(CondaCommand {
            program,
            args: vec![
                "install".to_string(),
                "-p".to_string(),
                env.prefix.display().to_string(),
                "-y".to_string(),
                package.to_string(),
            ],
        })
    }
}

/// Finds conda on PATH (or via `CONDA_EXE`) and maps interpreters by
/// looking for a `conda-meta` directory in their prefix.
#[derive(Debug, Clone, Default)]
pub struct SystemConda {
    executable_override: Option<PathBuf>,
}

impl SystemConda {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executable(path: PathBuf) -> Self {
        Self {
            executable_override: Some(path),
        }
    }
}

/// Environment root for an interpreter path (`<prefix>/bin/python` or `<prefix>\python.exe`)
pub fn prefix_for_executable(executable: &Path) -> Option<PathBuf> {
    let parent = executable.parent()?;
    let is_bin_dir = parent
        .file_name()
        .map(|n| n == "bin" || n == "Scripts")
        .unwrap_or(false);
    if is_bin_dir {
        parent.parent().map(Path::to_path_buf)
    } else {
        Some(parent.to_path_buf())
    }
}

/// Whether `prefix` is the root of a conda environment
pub fn is_conda_prefix(prefix: &Path) -> bool {
    prefix.join("conda-meta").is_dir()
}

#[async_trait]
impl CondaService for SystemConda {
    async fn conda_executable(&self) -> Option<PathBuf> {
        if let Some(path) = &self.executable_override {
            return path.exists().then(|| path.clone());
        }
        if let Ok(exe) = std::env::var("CONDA_EXE") {
            let exe = PathBuf::from(exe);
            if exe.exists() {
                return Some(exe);
            }
        }
        which::which("conda").ok()
    }

    async fn environment_for(&self, executable: &Path) -> Result<Option<CondaEnvironment>> {
        let Some(prefix) = prefix_for_executable(executable) else {
            return Ok(None);
        };
        if !is_conda_prefix(&prefix) {
            debug!("[CONDA] {:?} has no conda-meta", prefix);
            return Ok(None);
        }
        // Named environments live under `<root>/envs/<name>`; the root itself is `base`.
        let name = match prefix.parent().and_then(|p| p.file_name()) {
            Some(dir) if dir == "envs" => prefix.file_name().map(|n| n.to_string_lossy().into_owned()),
            _ => Some("base".to_string()),
        };
        Ok(Some(CondaEnvironment { name, prefix }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_for_executable() {
        assert_eq!(
            prefix_for_executable(Path::new("/opt/conda/envs/ml/bin/python")),
            Some(PathBuf::from("/opt/conda/envs/ml"))
        );
        assert_eq!(
            prefix_for_executable(Path::new("/opt/py/python.exe")),
            Some(PathBuf::from("/opt/py"))
        );
    }

    #[tokio::test]
    async fn test_environment_for_detects_conda_meta() {
        let root = tempfile::tempdir().unwrap();
        let prefix = root.path().join("envs").join("ml");
        std::fs::create_dir_all(prefix.join("conda-meta")).unwrap();
        std::fs::create_dir_all(prefix.join("bin")).unwrap();
        let plain = root.path().join("venv");
        std::fs::create_dir_all(plain.join("bin")).unwrap();

        let conda = SystemConda::with_executable(root.path().join("missing-conda"));
        let env = conda
            .environment_for(&prefix.join("bin").join("python"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.name.as_deref(), Some("ml"));
        assert_eq!(env.prefix, prefix);

        assert!(conda
            .environment_for(&plain.join("bin").join("python"))
            .await
            .unwrap()
            .is_none());

        // Missing executable means no commands can be built.
        assert!(conda.conda_executable().await.is_none());
        assert!(conda.list_command(&env).await.is_none());
    }
}
