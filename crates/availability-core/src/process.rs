use async_trait::async_trait;

/// Unique identifier for a process
pub type ProcessId = u32;

/// Error types for process introspection
///
/// A confirmed "no such process" is never an error: [`ProcessInspector::is_alive`]
/// answers `Ok(false)` for it. Everything here means the answer is unknown.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InspectError {
    #[error("Invalid process id: {0}")]
    InvalidPid(ProcessId),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },
    #[error("OS error: {0}")]
    Os(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for InspectError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => InspectError::PermissionDenied(err.to_string()),
            _ => InspectError::Os(err.to_string()),
        }
    }
}

impl InspectError {
    /// Classify a failure to launch an external introspection command
    ///
    /// Permission problems keep their own kind; anything else is reported
    /// against the command that could not run.
    pub fn spawn_failure(command: impl Into<String>, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => InspectError::from(err),
            _ => InspectError::CommandFailed {
                command: command.into(),
                message: err.to_string(),
            },
        }
    }
}

/// OS-level process introspection consumed by the checker
#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// Check whether `pid` refers to a live process
    ///
    /// `Ok(false)` only when the process is confirmed gone.
    async fn is_alive(&self, pid: ProcessId) -> Result<bool, InspectError>;

    /// List the processes holding a TCP socket on `port` in LISTEN state
    async fn listening_pids(&self, port: u16) -> Result<Vec<ProcessId>, InspectError>;
}

#[async_trait]
impl<I: ProcessInspector + ?Sized> ProcessInspector for std::sync::Arc<I> {
    async fn is_alive(&self, pid: ProcessId) -> Result<bool, InspectError> {
        (**self).is_alive(pid).await
    }

    async fn listening_pids(&self, port: u16) -> Result<Vec<ProcessId>, InspectError> {
        (**self).listening_pids(port).await
    }
}

/// Factory trait for creating platform-specific inspectors
pub trait InspectorFactory {
    /// The type of inspector this factory creates
    type Inspector: ProcessInspector + 'static;

    /// Create an inspector for the current platform
    fn create_inspector() -> Self::Inspector;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
