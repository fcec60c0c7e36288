use anyhow::{Context, Result};
use availability_core::{InspectError, ProcessId};
use std::collections::BTreeSet;

/// Parse the terse `lsof -t` output: one pid per line, sorted and deduplicated
pub fn parse_pid_list(output: &str) -> Result<Vec<ProcessId>> {
    let mut pids = BTreeSet::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let pid = line
            .parse::<ProcessId>()
            .with_context(|| format!("Unexpected lsof output line: {line:?}"))?;
        pids.insert(pid);
    }
    Ok(pids.into_iter().collect())
}

/// Turn the outcome of an `lsof -w -t` run into the listening pids
///
/// lsof exits 1 both when nothing matches and on real failures; only an exit 1
/// with nothing on either stream means "nobody listens".
pub fn classify_lsof_output(
    command: &str,
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> Result<Vec<ProcessId>, InspectError> {
    let failed = |message: String| InspectError::CommandFailed {
        command: command.to_string(),
        message,
    };

    match code {
        Some(0) => parse_pid_list(stdout).map_err(|e| failed(format!("{e:#}"))),
        Some(1) if stdout.trim().is_empty() && stderr.trim().is_empty() => Ok(Vec::new()),
        Some(code) => Err(failed(format!("exit status {code}: {}", stderr.trim()))),
        None => Err(failed("terminated by signal".to_string())),
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::classify_lsof_output;
    use async_trait::async_trait;
    use availability_core::{InspectError, ProcessId, ProcessInspector};
    use nix::errno::Errno;
    use nix::sys::signal;
    use nix::unistd::Pid as NixPid;
    use tokio::process::Command;
    use tracing::{debug, trace};

    const LSOF: &str = "lsof";

    /// Inspector backed by `kill(pid, 0)` and `lsof`
    #[derive(Debug, Clone, Default)]
    pub struct UnixProcessInspector {
        _private: (),
    }

    impl UnixProcessInspector {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ProcessInspector for UnixProcessInspector {
        async fn is_alive(&self, pid: ProcessId) -> Result<bool, InspectError> {
            let raw = i32::try_from(pid).map_err(|_| InspectError::InvalidPid(pid))?;
            if raw <= 0 {
                // 0 and negatives address process groups, not a single process
                return Err(InspectError::InvalidPid(pid));
            }

            // Signal 0 performs the permission and existence checks without delivering anything
            match signal::kill(NixPid::from_raw(raw), None) {
                Ok(()) => Ok(true),
                Err(Errno::ESRCH) => {
                    trace!(pid, "Process not found");
                    Ok(false)
                }
                // The process exists but belongs to someone else
                Err(Errno::EPERM) => Ok(true),
                Err(e) => Err(InspectError::Os(format!("kill({pid}, 0) failed: {e}"))),
            }
        }

        async fn listening_pids(&self, port: u16) -> Result<Vec<ProcessId>, InspectError> {
            let args = [
                "-w".to_string(),
                "-nP".to_string(),
                "-t".to_string(),
                format!("-iTCP:{port}"),
                "-sTCP:LISTEN".to_string(),
            ];
            let command = format!("{LSOF} {}", args.join(" "));

            let output = Command::new(LSOF)
                .args(&args)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| InspectError::spawn_failure(command.clone(), e))?;

            let pids = classify_lsof_output(
                &command,
                output.status.code(),
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            )?;
            if pids.is_empty() {
                debug!(port, "No process listening");
            }
            Ok(pids)
        }
    }
}

#[cfg(unix)]
pub use unix_impl::UnixProcessInspector;

#[cfg(not(unix))]
mod stub_impl {
    use async_trait::async_trait;
    use availability_core::{InspectError, ProcessId, ProcessInspector};

    /// Placeholder so the crate builds on non-Unix hosts; every query is unsupported
    #[derive(Debug, Clone, Default)]
    pub struct UnixProcessInspector;

    impl UnixProcessInspector {
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl ProcessInspector for UnixProcessInspector {
        async fn is_alive(&self, _pid: ProcessId) -> Result<bool, InspectError> {
            Err(InspectError::Unsupported("signal probing requires Unix".into()))
        }

        async fn listening_pids(&self, _port: u16) -> Result<Vec<ProcessId>, InspectError> {
            Err(InspectError::Unsupported("lsof requires Unix".into()))
        }
    }
}

#[cfg(not(unix))]
pub use stub_impl::UnixProcessInspector;
