//! Windows process introspection

mod windows_inspector;

pub use windows_inspector::{WindowsProcessInspector, parse_netstat_listeners};

/// Windows inspector factory
pub struct WindowsInspectorFactory;

impl availability_core::InspectorFactory for WindowsInspectorFactory {
    type Inspector = WindowsProcessInspector;

    fn create_inspector() -> Self::Inspector {
        WindowsProcessInspector::new()
    }

    fn platform_name() -> &'static str {
        "Windows"
    }
}
