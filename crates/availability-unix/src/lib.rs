//! Unix process introspection: signal-0 probing and `lsof` port lookups

mod unix_inspector;

pub use unix_inspector::{UnixProcessInspector, classify_lsof_output, parse_pid_list};

use availability_core::InspectorFactory;

/// Unix inspector factory
pub struct UnixInspectorFactory;

impl InspectorFactory for UnixInspectorFactory {
    type Inspector = UnixProcessInspector;

    fn create_inspector() -> Self::Inspector {
        UnixProcessInspector::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
