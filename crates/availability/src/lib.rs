//! Process and port availability checking
//!
//! Re-exports the platform-independent checker and control plane from
//! `availability-core` and wires in the inspector of the current platform.
//!
//! ```no_run
//! use availability::{CheckerConfig, ProcessCheckEvent, port_checker};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), availability::AvailabilityError> {
//! let config = CheckerConfig::builder()
//!     .on_down(|_ctx: CancellationToken, event: ProcessCheckEvent| async move {
//!         tracing::warn!(port = event.port, "Nothing listening");
//!     })
//!     .build()
//!     .map_err(|e| availability::AvailabilityError::InvalidArgument(e.to_string()))?;
//!
//! let checker = Arc::new(port_checker(8080, config)?);
//! let handle = checker.start()?;
//! // ...
//! checker.terminate();
//! let _ = handle.await;
//! # Ok(())
//! # }
//! ```

mod factory;

pub use availability_core::*;
pub use factory::{PlatformInspectorFactory, create_inspector};

/// Create a checker following whichever process listens on `port`, using the platform inspector
pub fn port_checker(port: u16, config: CheckerConfig) -> Result<ProcessChecker, AvailabilityError> {
    ProcessChecker::for_port(port, create_inspector(), config)
}

/// Create a checker watching `pid`, using the platform inspector
pub fn pid_checker(
    pid: ProcessId,
    config: CheckerConfig,
) -> Result<ProcessChecker, AvailabilityError> {
    ProcessChecker::for_pid(pid, create_inspector(), config)
}
