use crate::conda::CondaService;
use crate::environment::{ResolvedEnvironment, Resource};
use crate::errors::{EnvToolError, Result};
use crate::runner::{require_success, ProcessRunner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstallerType {
    Pip,
    Conda,
}

/// Installs packages into a specific environment
#[async_trait]
pub trait ModuleInstaller: Send + Sync {
    fn installer_type(&self) -> InstallerType;

    async fn is_supported(&self, environment: &ResolvedEnvironment, resource: Option<&Resource>) -> bool;

    async fn install_module(
        &self,
        name: &str,
        environment: &ResolvedEnvironment,
        resource: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// `python -m pip install <name>`
pub struct PipInstaller {
    runner: Arc<dyn ProcessRunner>,
}

impl PipInstaller {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ModuleInstaller for PipInstaller {
    fn installer_type(&self) -> InstallerType {
        InstallerType::Pip
    }

    async fn is_supported(&self, _environment: &ResolvedEnvironment, _resource: Option<&Resource>) -> bool {
        true
    }

    async fn install_module(
        &self,
        name: &str,
        environment: &ResolvedEnvironment,
        _resource: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("[INSTALL] pip install {} into {:?}", name, environment.executable);
        let output = self
            .runner
            .run_module(
                &environment.executable,
                "pip",
                &["install".to_string(), name.to_string()],
                cancel,
            )
            .await?;
        require_success(&environment.executable, output)?;
        Ok(())
    }
}

/// `conda install -p <prefix> -y <name>`
pub struct CondaInstaller {
    runner: Arc<dyn ProcessRunner>,
    conda: Arc<dyn CondaService>,
}

impl CondaInstaller {
    pub fn new(runner: Arc<dyn ProcessRunner>, conda: Arc<dyn CondaService>) -> Self {
        Self { runner, conda }
    }
}

#[async_trait]
impl ModuleInstaller for CondaInstaller {
    fn installer_type(&self) -> InstallerType {
        InstallerType::Conda
    }

    async fn is_supported(&self, environment: &ResolvedEnvironment, _resource: Option<&Resource>) -> bool {
        if !environment.is_conda() || self.conda.conda_executable().await.is_none() {
            return false;
        }
        matches!(self.conda.environment_for(&environment.executable).await, Ok(Some(_)))
    }

    async fn install_module(
        &self,
        name: &str,
        environment: &ResolvedEnvironment,
        _resource: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let conda_env = self
            .conda
            .environment_for(&environment.executable)
            .await?
            .ok_or_else(|| EnvToolError::CondaEnvironmentNotFound(environment.executable.clone()))?;
        let command = self
            .conda
            .install_command(&conda_env, name)
            .await
            .ok_or(EnvToolError::CondaNotFound)?;

        info!("[INSTALL] conda install {} into {:?}", name, conda_env.prefix);
        let output = self.runner.run(&command.program, &command.args, cancel).await?;
        require_success(&command.program, output)?;
        Ok(())
    }
}

/// Installers keyed by type
#[derive(Default)]
pub struct InstallerRegistry {
    installers: Vec<Arc<dyn ModuleInstaller>>,
}

impl InstallerRegistry {
    pub fn new(installers: Vec<Arc<dyn ModuleInstaller>>) -> Self {
        Self { installers }
    }

    pub fn get(&self, kind: InstallerType) -> Option<Arc<dyn ModuleInstaller>> {
        self.installers
            .iter()
            .find(|i| i.installer_type() == kind)
            .cloned()
    }

    /// Conda for conda environments when it can handle them, pip otherwise
    pub async fn installer_for(
        &self,
        environment: &ResolvedEnvironment,
        resource: Option<&Resource>,
    ) -> Result<Arc<dyn ModuleInstaller>> {
        if environment.is_conda() {
            if let Some(conda) = self.get(InstallerType::Conda) {
                if conda.is_supported(environment, resource).await {
                    return Ok(conda);
                }
            }
            warn!(
                "[INSTALL] Conda installer unavailable for {:?}, using pip",
                environment.executable
            );
        }
        match self.get(InstallerType::Pip) {
            Some(pip) if pip.is_supported(environment, resource).await => Ok(pip),
            _ => Err(EnvToolError::NoInstaller(environment.executable.display().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conda::CondaEnvironment;
    use crate::environment::EnvironmentKind;
    use crate::runner::ProcessOutput;
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn run(&self, _program: &Path, args: &[String], _cancel: &CancellationToken) -> Result<ProcessOutput> {
            self.calls.lock().push(args.to_vec());
            Ok(ProcessOutput {
                exit_code: Some(0),
                ..Default::default()
            })
        }
    }

    struct FakeConda(bool);

    #[async_trait]
    impl CondaService for FakeConda {
        async fn conda_executable(&self) -> Option<PathBuf> {
            self.0.then(|| PathBuf::from("/opt/conda/bin/conda"))
        }

        async fn environment_for(&self, _executable: &Path) -> Result<Option<CondaEnvironment>> {
            Ok(Some(CondaEnvironment {
                name: Some("ml".into()),
                prefix: PathBuf::from("/opt/conda/envs/ml"),
            }))
        }
    }

    fn env(kind: EnvironmentKind) -> ResolvedEnvironment {
        ResolvedEnvironment {
            id: "/opt/conda/envs/ml/bin/python".into(),
            kind,
            executable: PathBuf::from("/opt/conda/envs/ml/bin/python"),
            prefix: None,
            version: None,
            name: None,
        }
    }

    fn registry(runner: Arc<RecordingRunner>, conda_available: bool) -> InstallerRegistry {
        let conda: Arc<dyn CondaService> = Arc::new(FakeConda(conda_available));
        let installers: Vec<Arc<dyn ModuleInstaller>> = vec![
            Arc::new(PipInstaller::new(runner.clone())),
            Arc::new(CondaInstaller::new(runner, conda)),
        ];
        InstallerRegistry::new(installers)
    }

    #[tokio::test]
    async fn test_conda_env_prefers_conda_installer() {
        let runner = Arc::new(RecordingRunner::default());
        let registry = registry(runner.clone(), true);
        let environment = env(EnvironmentKind::Conda);

        let installer = registry.installer_for(&environment, None).await.unwrap();
        assert_eq!(installer.installer_type(), InstallerType::Conda);
        installer
            .install_module("numpy", &environment, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            runner.calls.lock()[0],
            vec!["install", "-p", "/opt/conda/envs/ml", "-y", "numpy"]
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_pip() {
        let runner = Arc::new(RecordingRunner::default());
        let no_conda = registry(runner.clone(), false);
        let installer = no_conda
            .installer_for(&env(EnvironmentKind::Conda), None)
            .await
            .unwrap();
        assert_eq!(installer.installer_type(), InstallerType::Pip);

        let venv = registry(runner.clone(), true)
            .installer_for(&env(EnvironmentKind::Venv), None)
            .await
            .unwrap();
        assert_eq!(venv.installer_type(), InstallerType::Pip);

        venv.install_module("requests", &env(EnvironmentKind::Venv), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(runner.calls.lock()[0], vec!["-m", "pip", "install", "requests"]);
    }

    #[tokio::test]
    async fn test_empty_registry_has_no_installer() {
        let res = InstallerRegistry::default()
            .installer_for(&env(EnvironmentKind::Venv), None)
            .await;
        assert!(matches!(res, Err(EnvToolError::NoInstaller(_))));
    }
}
