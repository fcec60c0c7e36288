use availability_core::{InspectorFactory, ProcessInspector};
use std::sync::Arc;

/// Platform-independent factory that selects the inspector at compile time
pub struct PlatformInspectorFactory;

impl InspectorFactory for PlatformInspectorFactory {
    #[cfg(unix)]
    type Inspector = availability_unix::UnixProcessInspector;

    #[cfg(windows)]
    type Inspector = availability_windows::WindowsProcessInspector;

    fn create_inspector() -> Self::Inspector {
        #[cfg(unix)]
        return availability_unix::UnixInspectorFactory::create_inspector();

        #[cfg(windows)]
        return availability_windows::WindowsInspectorFactory::create_inspector();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return availability_unix::UnixInspectorFactory::platform_name();

        #[cfg(windows)]
        return availability_windows::WindowsInspectorFactory::platform_name();
    }
}

/// Create the inspector for the current platform behind a shared handle
pub fn create_inspector() -> Arc<dyn ProcessInspector> {
    tracing::debug!(
        platform = PlatformInspectorFactory::platform_name(),
        "Creating process inspector"
    );
    Arc::new(PlatformInspectorFactory::create_inspector())
}
