use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use availability_core::{InspectError, ProcessId, ProcessInspector};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::Command;
use tracing::{debug, trace};

const NETSTAT: &str = "netstat";

/// Collect the pids of TCP sockets in LISTENING state on `port` from `netstat -ano` output
///
/// Rows look like `TCP  0.0.0.0:8080  0.0.0.0:0  LISTENING  1234`; IPv6 rows carry a
/// bracketed local address such as `[::]:8080`. Headers and other protocols are skipped.
pub fn parse_netstat_listeners(output: &str, port: u16) -> Result<Vec<ProcessId>> {
    let mut pids = BTreeSet::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [proto, local, _remote, state, pid] = fields.as_slice() else {
            continue;
        };
        if !proto.eq_ignore_ascii_case("TCP") || *state != "LISTENING" {
            continue;
        }

        let Some((_, local_port)) = local.rsplit_once(':') else {
            bail!("Malformed local address {local:?} in netstat row");
        };
        if local_port.parse::<u16>().ok() != Some(port) {
            continue;
        }

        let pid = pid
            .parse::<ProcessId>()
            .with_context(|| format!("Malformed pid in netstat row: {line:?}"))?;
        pids.insert(pid);
    }
    Ok(pids.into_iter().collect())
}

/// Inspector backed by the sysinfo process table and `netstat`
pub struct WindowsProcessInspector {
    system: Mutex<System>,
}

impl Default for WindowsProcessInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsProcessInspector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

#[async_trait]
impl ProcessInspector for WindowsProcessInspector {
    async fn is_alive(&self, pid: ProcessId) -> Result<bool, InspectError> {
        let target = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::nothing(),
        );
        let alive = system.process(target).is_some();
        trace!(pid, alive, "Process table lookup");
        Ok(alive)
    }

    async fn listening_pids(&self, port: u16) -> Result<Vec<ProcessId>, InspectError> {
        let command = format!("{NETSTAT} -ano");
        let output = Command::new(NETSTAT)
            .arg("-ano")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| InspectError::spawn_failure(command.clone(), e))?;

        if !output.status.success() {
            return Err(InspectError::CommandFailed {
                command,
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let pids = parse_netstat_listeners(&String::from_utf8_lossy(&output.stdout), port)
            .map_err(|e| InspectError::CommandFailed {
                command,
                message: format!("{e:#}"),
            })?;
        debug!(port, ?pids, "Resolved listeners");
        Ok(pids)
    }
}
