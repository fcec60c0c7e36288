use crate::error::AvailabilityError;
use crate::event::ProcessCheckEvent;
use crate::listener::{ErrorFn, EventFn, ListenerSet, ProcessCheckListener};
use derive_builder::Builder;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Default poll period of a checker
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of consecutive introspection failures before listeners hear about it
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Checker configuration, validated and applied at construction
#[derive(Debug, Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct CheckerConfig {
    /// Time slept between two poll cycles
    #[builder(default = "DEFAULT_CHECK_INTERVAL")]
    pub check_interval: Duration,

    /// Consecutive introspection failures before an error is reported; reported
    /// again every further `failure_threshold` failures
    #[builder(default = "DEFAULT_FAILURE_THRESHOLD")]
    pub failure_threshold: u32,

    #[builder(default)]
    #[builder(setter(custom))]
    pub listeners: ListenerSet,

    /// Span every checker log record is emitted in; disabled by default
    #[builder(default = "Span::none()")]
    pub span: Span,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            listeners: ListenerSet::default(),
            span: Span::none(),
        }
    }
}

impl CheckerConfig {
    pub fn builder() -> CheckerConfigBuilder {
        CheckerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AvailabilityError> {
        check_interval(self.check_interval)
            .and_then(|_| check_threshold(self.failure_threshold))
            .map_err(AvailabilityError::InvalidArgument)
    }
}

fn check_interval(interval: Duration) -> Result<(), String> {
    if interval.is_zero() {
        return Err("check_interval must be greater than zero".to_string());
    }
    Ok(())
}

fn check_threshold(threshold: u32) -> Result<(), String> {
    if threshold == 0 {
        return Err("failure_threshold must be greater than zero".to_string());
    }
    Ok(())
}

impl CheckerConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(interval) = self.check_interval {
            check_interval(interval)?;
        }
        if let Some(threshold) = self.failure_threshold {
            check_threshold(threshold)?;
        }
        Ok(())
    }

    fn listener_set(&mut self) -> &mut ListenerSet {
        self.listeners.get_or_insert_with(ListenerSet::default)
    }

    /// Register a listener object for alive, down, port-pid-changed and error reports
    pub fn listener(&mut self, listener: Arc<dyn ProcessCheckListener>) -> &mut Self {
        self.listener_set().add(listener);
        self
    }

    pub fn alive_listener(&mut self, listener: Arc<dyn ProcessCheckListener>) -> &mut Self {
        self.listener_set().alive.push(listener);
        self
    }

    pub fn down_listener(&mut self, listener: Arc<dyn ProcessCheckListener>) -> &mut Self {
        self.listener_set().down.push(listener);
        self
    }

    pub fn port_pid_changed_listener(
        &mut self,
        listener: Arc<dyn ProcessCheckListener>,
    ) -> &mut Self {
        self.listener_set().port_pid_changed.push(listener);
        self
    }

    pub fn error_listener(&mut self, listener: Arc<dyn ProcessCheckListener>) -> &mut Self {
        self.listener_set().error.push(listener);
        self
    }

    pub fn on_alive<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(CancellationToken, ProcessCheckEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.alive_listener(EventFn::arc(f))
    }

    pub fn on_down<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(CancellationToken, ProcessCheckEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.down_listener(EventFn::arc(f))
    }

    pub fn on_port_pid_changed<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(CancellationToken, ProcessCheckEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.port_pid_changed_listener(EventFn::arc(f))
    }

    pub fn on_error<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(CancellationToken, AvailabilityError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error_listener(ErrorFn::arc(f))
    }
}
