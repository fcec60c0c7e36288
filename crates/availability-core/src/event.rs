use crate::process::ProcessId;
use serde::{Deserialize, Serialize};

/// Kind of liveness transition observed by a poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i8)]
pub enum EventType {
    ProcessDown = 1,
    ProcessAlive = 2,
    PortDown = 3,
    PortAlive = 4,
    PortPidChanged = 5,
}

impl EventType {
    pub fn is_down(self) -> bool {
        matches!(self, EventType::ProcessDown | EventType::PortDown)
    }

    pub fn is_alive(self) -> bool {
        matches!(self, EventType::ProcessAlive | EventType::PortAlive)
    }
}

/// Immutable result of one poll cycle, delivered by value to listeners
///
/// `old_pid` is only meaningful for [`EventType::PortPidChanged`], where it holds the
/// pid that was in effect during the previous cycle (0 if none).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessCheckEvent {
    pub event_type: EventType,
    #[serde(default)]
    pub old_pid: ProcessId,
    pub pid: ProcessId,
    pub port: u16,
}

impl ProcessCheckEvent {
    pub fn process_alive(pid: ProcessId, port: u16) -> Self {
        Self {
            event_type: EventType::ProcessAlive,
            old_pid: 0,
            pid,
            port,
        }
    }

    pub fn process_down(pid: ProcessId, port: u16) -> Self {
        Self {
            event_type: EventType::ProcessDown,
            old_pid: 0,
            pid,
            port,
        }
    }

    pub fn port_down(port: u16) -> Self {
        Self {
            event_type: EventType::PortDown,
            old_pid: 0,
            pid: 0,
            port,
        }
    }

    pub fn port_pid_changed(old_pid: ProcessId, pid: ProcessId, port: u16) -> Self {
        Self {
            event_type: EventType::PortPidChanged,
            old_pid,
            pid,
            port,
        }
    }
}
