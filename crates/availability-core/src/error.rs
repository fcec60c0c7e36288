use crate::process::{InspectError, ProcessId};
use thiserror::Error;

/// Core error types for availability checking
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum AvailabilityError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Checker already running")]
    AlreadyRunning,

    #[error("Checker already terminated")]
    AlreadyTerminated,

    #[error("Checker terminated")]
    Terminated,

    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("Control plane sync already called")]
    AlreadyCalled,

    #[error("Control plane has not been synced yet")]
    NotReady,

    #[error("Future result already consumed")]
    FutureConsumed,

    #[error("Task aborted before producing a result")]
    TaskAborted,

    #[error("Port {port} is bound by more than one process: {pids:?}")]
    AmbiguousPortBinding { port: u16, pids: Vec<ProcessId> },

    #[error("Introspection of {target} failed: {source}")]
    IntrospectionFailure {
        target: String,
        #[source]
        source: InspectError,
    },
}

impl AvailabilityError {
    pub(crate) fn introspection(target: impl Into<String>, source: InspectError) -> Self {
        AvailabilityError::IntrospectionFailure {
            target: target.into(),
            source,
        }
    }

    /// Short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            AvailabilityError::InvalidArgument(_) => "invalid_argument",
            AvailabilityError::AlreadyRunning => "already_running",
            AvailabilityError::AlreadyTerminated => "already_terminated",
            AvailabilityError::Terminated => "terminated",
            AvailabilityError::NoRuntime(_) => "no_runtime",
            AvailabilityError::AlreadyCalled => "already_called",
            AvailabilityError::NotReady => "not_ready",
            AvailabilityError::FutureConsumed => "future_consumed",
            AvailabilityError::TaskAborted => "task_aborted",
            AvailabilityError::AmbiguousPortBinding { .. } => "ambiguous_port_binding",
            AvailabilityError::IntrospectionFailure { .. } => "introspection_failure",
        }
    }

    /// Check if this error was raised by a poll cycle rather than by the caller
    pub fn is_cycle_error(&self) -> bool {
        matches!(
            self,
            AvailabilityError::AmbiguousPortBinding { .. }
                | AvailabilityError::IntrospectionFailure { .. }
        )
    }
}
