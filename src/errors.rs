use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnvToolError>;

#[derive(Error, Debug)]
pub enum EnvToolError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("No Python environment found: {0}")]
    NoEnvironment(String),

    #[error("Python not installed or not found in PATH")]
    PythonNotFound,

    #[error("Conda executable not found")]
    CondaNotFound,

    #[error("Environment is not a conda environment: {0}")]
    CondaEnvironmentNotFound(PathBuf),

    #[error("Command `{program}` failed: {message}")]
    CommandFailed { program: String, message: String },

    #[error("Process exited with code {0}")]
    ProcessExitCode(i32),

    #[error("No installer available for {0}")]
    NoInstaller(String),

    #[error("Invalid tool input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl EnvToolError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EnvToolError::Cancelled)
    }

    /// Conda-path failures that package listing recovers from by falling back to pip.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            EnvToolError::CondaNotFound
                | EnvToolError::CondaEnvironmentNotFound(_)
                | EnvToolError::CommandFailed { .. }
                | EnvToolError::ProcessExitCode(_)
                | EnvToolError::IoError(_)
        )
    }
}
