//! Polling liveness checker.
//!
//! A [`ProcessChecker`] watches either a PID or the PID bound to a TCP port. Each tick
//! classifies the target, builds one [`ProcessCheckEvent`] per detected transition and
//! fans it out to the registered listeners on a fresh [`AsyncControlPlane`].
//!
//! ```text
//!  Idle ──run()/start()──► Running ──terminate()──► Terminated
//!    └─────────────────terminate()──────────────────────┘
//! ```

use crate::config::CheckerConfig;
use crate::error::AvailabilityError;
use crate::event::ProcessCheckEvent;
use crate::listener::{ListenerSet, notify};
use crate::plane::AsyncControlPlane;
use crate::process::{ProcessId, ProcessInspector};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

/// What a checker watches, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerType {
    /// Resolve the PID listening on a port every cycle
    PortChecker,
    /// Watch one PID
    PidChecker,
}

/// Lifecycle of a checker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerPhase {
    Idle,
    Running,
    Terminated,
}

#[derive(Debug)]
struct CheckerState {
    /// Watched pid, or the pid seen on the port by the last cycle (0 if none)
    pid: ProcessId,
    is_running: bool,
    is_terminated: bool,
}

/// Periodic liveness checker for a process or a listening port
pub struct ProcessChecker {
    checker_type: CheckerType,
    port: u16,
    check_interval: Duration,
    failure_threshold: u32,
    listeners: ListenerSet,
    inspector: Arc<dyn ProcessInspector>,
    state: RwLock<CheckerState>,
    consecutive_failures: AtomicU32,
    /// Held for the whole of a check cycle so cycles never overlap
    cycle: Mutex<()>,
    shutdown: CancellationToken,
    span: Span,
}

impl std::fmt::Debug for ProcessChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessChecker")
            .field("checker_type", &self.checker_type)
            .field("port", &self.port)
            .field("check_interval", &self.check_interval)
            .field("listeners", &self.listeners)
            .field("state", &*self.read_state())
            .finish()
    }
}

impl ProcessChecker {
    /// Create a checker following whichever process listens on `port`
    pub fn for_port(
        port: u16,
        inspector: Arc<dyn ProcessInspector>,
        config: CheckerConfig,
    ) -> Result<Self, AvailabilityError> {
        if port == 0 {
            return Err(AvailabilityError::InvalidArgument(
                "port must be greater than zero".to_string(),
            ));
        }
        Self::new(CheckerType::PortChecker, 0, port, inspector, config)
    }

    /// Create a checker watching `pid`
    pub fn for_pid(
        pid: ProcessId,
        inspector: Arc<dyn ProcessInspector>,
        config: CheckerConfig,
    ) -> Result<Self, AvailabilityError> {
        if pid == 0 {
            return Err(AvailabilityError::InvalidArgument(
                "pid must be greater than zero".to_string(),
            ));
        }
        Self::new(CheckerType::PidChecker, pid, 0, inspector, config)
    }

    fn new(
        checker_type: CheckerType,
        pid: ProcessId,
        port: u16,
        inspector: Arc<dyn ProcessInspector>,
        config: CheckerConfig,
    ) -> Result<Self, AvailabilityError> {
        config.validate()?;

        let CheckerConfig {
            check_interval,
            failure_threshold,
            listeners,
            span,
        } = config;

        Ok(Self {
            checker_type,
            port,
            check_interval,
            failure_threshold,
            listeners,
            inspector,
            state: RwLock::new(CheckerState {
                pid,
                is_running: false,
                is_terminated: false,
            }),
            consecutive_failures: AtomicU32::new(0),
            cycle: Mutex::new(()),
            shutdown: CancellationToken::new(),
            span,
        })
    }

    pub fn checker_type(&self) -> CheckerType {
        self.checker_type
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Watched pid, or the pid last seen on the port (0 if none)
    pub fn pid(&self) -> ProcessId {
        self.read_state().pid
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn phase(&self) -> CheckerPhase {
        let state = self.read_state();
        if state.is_terminated {
            CheckerPhase::Terminated
        } else if state.is_running {
            CheckerPhase::Running
        } else {
            CheckerPhase::Idle
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CheckerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CheckerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Idle -> Running, checked and set under one exclusive lock
    fn begin(&self) -> Result<(), AvailabilityError> {
        let mut state = self.write_state();
        if state.is_terminated {
            return Err(AvailabilityError::AlreadyTerminated);
        }
        if state.is_running {
            return Err(AvailabilityError::AlreadyRunning);
        }
        state.is_running = true;
        Ok(())
    }

    fn is_terminated(&self) -> bool {
        self.read_state().is_terminated
    }

    /// Run the poll loop until [`ProcessChecker::terminate`] is called
    ///
    /// Returns [`AvailabilityError::Terminated`] once termination is observed, or a
    /// precondition error if the checker is not idle.
    pub async fn run(&self) -> Result<(), AvailabilityError> {
        self.begin()?;
        self.poll_loop().instrument(self.span.clone()).await
    }

    /// Spawn the poll loop on the tokio runtime and return immediately
    ///
    /// Precondition failures, including a missing runtime, are returned here
    /// before any state changes.
    pub fn start(
        self: &Arc<Self>,
    ) -> Result<JoinHandle<Result<(), AvailabilityError>>, AvailabilityError> {
        let runtime =
            Handle::try_current().map_err(|e| AvailabilityError::NoRuntime(e.to_string()))?;
        self.begin()?;
        let checker = Arc::clone(self);
        let span = self.span.clone();
        Ok(runtime.spawn(
            async move { checker.poll_loop().await }.instrument(span),
        ))
    }

    /// Stop the checker; the loop notices at its next iteration boundary
    ///
    /// A cycle already dispatching is not interrupted, but listeners see their
    /// context cancelled and a sleeping loop wakes up immediately.
    pub fn terminate(&self) {
        {
            let mut state = self.write_state();
            state.is_terminated = true;
            state.is_running = false;
        }
        self.shutdown.cancel();
    }

    async fn poll_loop(&self) -> Result<(), AvailabilityError> {
        info!(
            checker_type = ?self.checker_type,
            port = self.port,
            pid = self.pid(),
            interval = ?self.check_interval,
            "Process checker started"
        );

        loop {
            if self.is_terminated() {
                info!("Process checker terminated");
                return Err(AvailabilityError::Terminated);
            }

            self.poll_once().await;

            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.check_interval) => {}
            }
        }
    }

    /// Perform one check cycle and report any failure it produced
    ///
    /// Concurrent calls, including one racing the running loop, are serialized.
    pub async fn poll_once(&self) {
        let _cycle = self.cycle.lock().await;
        match self.check_cycle().await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            Err(err @ AvailabilityError::AmbiguousPortBinding { .. }) => {
                warn!(error = %err, "Skipping dispatch for ambiguous port binding");
                self.report(err).await;
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %err, failures, "Process check failed");
                if failures % self.failure_threshold == 0 {
                    self.report(err).await;
                }
            }
        }
    }

    async fn check_cycle(&self) -> Result<(), AvailabilityError> {
        match self.checker_type {
            CheckerType::PidChecker => self.check_pid_alive().await,
            CheckerType::PortChecker => self.check_port_listening().await,
        }
    }

    async fn check_pid_alive(&self) -> Result<(), AvailabilityError> {
        let pid = self.pid();
        let alive = self
            .inspector
            .is_alive(pid)
            .await
            .map_err(|e| AvailabilityError::introspection(format!("pid {pid}"), e))?;

        let event = if alive {
            ProcessCheckEvent::process_alive(pid, self.port)
        } else {
            ProcessCheckEvent::process_down(pid, self.port)
        };
        self.dispatch(event).await;
        Ok(())
    }

    async fn check_port_listening(&self) -> Result<(), AvailabilityError> {
        let port = self.port;
        let pids: Vec<ProcessId> = self
            .inspector
            .listening_pids(port)
            .await
            .map_err(|e| AvailabilityError::introspection(format!("port {port}"), e))?
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let old_pid = self.pid();
        let new_pid = match pids.as_slice() {
            [] => {
                if old_pid != 0 {
                    self.dispatch(ProcessCheckEvent::port_pid_changed(old_pid, 0, port))
                        .await;
                }
                self.dispatch(ProcessCheckEvent::port_down(port)).await;
                0
            }
            [pid] => {
                let pid = *pid;
                if pid != old_pid {
                    self.dispatch(ProcessCheckEvent::port_pid_changed(old_pid, pid, port))
                        .await;
                }
                self.dispatch(ProcessCheckEvent::process_alive(pid, port))
                    .await;
                pid
            }
            _ => return Err(AvailabilityError::AmbiguousPortBinding { port, pids }),
        };

        if new_pid != old_pid {
            debug!(old_pid, new_pid, port, "Port pid committed");
        }
        self.write_state().pid = new_pid;
        Ok(())
    }

    /// Deliver `event` to its listeners and wait for all of them
    async fn dispatch(&self, event: ProcessCheckEvent) {
        let listeners = self.listeners.for_event(event.event_type);
        debug!(?event, listeners = listeners.len(), "Dispatching event");

        let plane = AsyncControlPlane::new();
        for listener in listeners {
            let listener = Arc::clone(listener);
            let registered = plane.task_fn(move |ctx| async move {
                notify(listener.as_ref(), ctx, event).await;
            });
            if let Err(e) = registered {
                warn!(error = %e, "Failed to register listener task");
            }
        }

        if let Err(e) = plane.sync(self.shutdown.child_token()).await {
            warn!(error = %e, "Event dispatch failed");
        }
    }

    /// Deliver a cycle error to error listeners
    async fn report(&self, error: AvailabilityError) {
        let plane = AsyncControlPlane::new();
        for listener in &self.listeners.error {
            let listener = Arc::clone(listener);
            let error = error.clone();
            let registered = plane.task_fn(move |ctx| async move {
                listener.on_check_error(ctx, error).await;
            });
            if let Err(e) = registered {
                warn!(error = %e, "Failed to register error listener task");
            }
        }

        if let Err(e) = plane.sync(self.shutdown.child_token()).await {
            warn!(error = %e, "Error report failed");
        }
    }
}
