//! Listener capability set through which checkers publish events.

use crate::error::AvailabilityError;
use crate::event::{EventType, ProcessCheckEvent};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Receiver of liveness events
///
/// Callbacks run on control plane workers, concurrently with each other. `ctx` is
/// cancelled when the checker that produced the event is terminated.
#[async_trait]
pub trait ProcessCheckListener: Send + Sync + 'static {
    async fn on_process_alive(&self, ctx: CancellationToken, event: ProcessCheckEvent);

    async fn on_process_down(&self, ctx: CancellationToken, event: ProcessCheckEvent);

    async fn on_port_pid_changed(&self, ctx: CancellationToken, event: ProcessCheckEvent);

    /// Called when a poll cycle could not reach a definite answer
    async fn on_check_error(&self, _ctx: CancellationToken, _error: AvailabilityError) {}
}

/// Route one event to the matching callback of `listener`
pub(crate) async fn notify(
    listener: &dyn ProcessCheckListener,
    ctx: CancellationToken,
    event: ProcessCheckEvent,
) {
    match event.event_type {
        EventType::ProcessAlive | EventType::PortAlive => {
            listener.on_process_alive(ctx, event).await
        }
        EventType::ProcessDown | EventType::PortDown => listener.on_process_down(ctx, event).await,
        EventType::PortPidChanged => listener.on_port_pid_changed(ctx, event).await,
    }
}

/// Adapter turning a bare event callback into a listener
///
/// Registered into a single category, so only one of its methods is ever invoked.
pub struct EventFn<F> {
    f: F,
}

impl<F, Fut> EventFn<F>
where
    F: Fn(CancellationToken, ProcessCheckEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> ProcessCheckListener for EventFn<F>
where
    F: Fn(CancellationToken, ProcessCheckEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_process_alive(&self, ctx: CancellationToken, event: ProcessCheckEvent) {
        (self.f)(ctx, event).await
    }

    async fn on_process_down(&self, ctx: CancellationToken, event: ProcessCheckEvent) {
        (self.f)(ctx, event).await
    }

    async fn on_port_pid_changed(&self, ctx: CancellationToken, event: ProcessCheckEvent) {
        (self.f)(ctx, event).await
    }
}

/// Adapter turning a bare error callback into a listener
pub struct ErrorFn<F> {
    f: F,
}

impl<F, Fut> ErrorFn<F>
where
    F: Fn(CancellationToken, AvailabilityError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> ProcessCheckListener for ErrorFn<F>
where
    F: Fn(CancellationToken, AvailabilityError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_process_alive(&self, _ctx: CancellationToken, _event: ProcessCheckEvent) {}

    async fn on_process_down(&self, _ctx: CancellationToken, _event: ProcessCheckEvent) {}

    async fn on_port_pid_changed(&self, _ctx: CancellationToken, _event: ProcessCheckEvent) {}

    async fn on_check_error(&self, ctx: CancellationToken, error: AvailabilityError) {
        (self.f)(ctx, error).await
    }
}

/// Listeners grouped by the events they receive
#[derive(Clone, Default)]
pub struct ListenerSet {
    pub alive: Vec<Arc<dyn ProcessCheckListener>>,
    pub down: Vec<Arc<dyn ProcessCheckListener>>,
    pub port_pid_changed: Vec<Arc<dyn ProcessCheckListener>>,
    pub error: Vec<Arc<dyn ProcessCheckListener>>,
}

impl ListenerSet {
    /// Register a listener object for every category
    pub fn add(&mut self, listener: Arc<dyn ProcessCheckListener>) {
        self.alive.push(Arc::clone(&listener));
        self.down.push(Arc::clone(&listener));
        self.port_pid_changed.push(Arc::clone(&listener));
        self.error.push(listener);
    }

    /// Listeners that should receive an event of `event_type`
    pub fn for_event(&self, event_type: EventType) -> &[Arc<dyn ProcessCheckListener>] {
        match event_type {
            EventType::ProcessAlive | EventType::PortAlive => &self.alive,
            EventType::ProcessDown | EventType::PortDown => &self.down,
            EventType::PortPidChanged => &self.port_pid_changed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
            && self.down.is_empty()
            && self.port_pid_changed.is_empty()
            && self.error.is_empty()
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("alive", &self.alive.len())
            .field("down", &self.down.len())
            .field("port_pid_changed", &self.port_pid_changed.len())
            .field("error", &self.error.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(&'static str, ProcessCheckEvent)>>,
    }

    #[async_trait]
    impl ProcessCheckListener for Recorder {
        async fn on_process_alive(&self, _ctx: CancellationToken, event: ProcessCheckEvent) {
            self.seen.lock().unwrap().push(("alive", event));
        }

        async fn on_process_down(&self, _ctx: CancellationToken, event: ProcessCheckEvent) {
            self.seen.lock().unwrap().push(("down", event));
        }

        async fn on_port_pid_changed(&self, _ctx: CancellationToken, event: ProcessCheckEvent) {
            self.seen.lock().unwrap().push(("changed", event));
        }
    }

    #[tokio::test]
    async fn test_notify_routes_by_event_type() {
        let recorder = Recorder::default();
        let ctx = CancellationToken::new();

        notify(&recorder, ctx.clone(), ProcessCheckEvent::process_alive(1, 0)).await;
        notify(&recorder, ctx.clone(), ProcessCheckEvent::port_down(80)).await;
        notify(&recorder, ctx.clone(), ProcessCheckEvent::port_pid_changed(1, 2, 80)).await;
        notify(
            &recorder,
            ctx,
            ProcessCheckEvent {
                event_type: EventType::PortAlive,
                old_pid: 0,
                pid: 3,
                port: 80,
            },
        )
        .await;

        let seen = recorder.seen.lock().unwrap();
        let kinds: Vec<_> = seen.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, vec!["alive", "down", "changed", "alive"]);
    }

    #[tokio::test]
    async fn test_event_fn_adapter() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        let listener = EventFn::new(move |_ctx: CancellationToken, event: ProcessCheckEvent| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().unwrap().push(event.pid) }
        });

        listener
            .on_process_down(CancellationToken::new(), ProcessCheckEvent::process_down(9, 0))
            .await;
        // Error callbacks are not part of an event adapter.
        listener
            .on_check_error(CancellationToken::new(), AvailabilityError::NotReady)
            .await;

        assert_eq!(*hits.lock().unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn test_error_fn_adapter_ignores_events() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        let listener = ErrorFn::new(move |_ctx: CancellationToken, error: AvailabilityError| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().unwrap().push(error.as_label()) }
        });

        listener
            .on_process_alive(CancellationToken::new(), ProcessCheckEvent::process_alive(1, 0))
            .await;
        listener
            .on_check_error(
                CancellationToken::new(),
                AvailabilityError::AmbiguousPortBinding {
                    port: 80,
                    pids: vec![1, 2],
                },
            )
            .await;

        assert_eq!(*hits.lock().unwrap(), vec!["ambiguous_port_binding"]);
    }

    #[test]
    fn test_listener_set_routing() {
        let mut set = ListenerSet::default();
        assert!(set.is_empty());

        set.add(Arc::new(Recorder::default()));
        set.down.push(Arc::new(Recorder::default()));

        assert_eq!(set.for_event(EventType::ProcessAlive).len(), 1);
        assert_eq!(set.for_event(EventType::PortAlive).len(), 1);
        assert_eq!(set.for_event(EventType::PortDown).len(), 2);
        assert_eq!(set.for_event(EventType::PortPidChanged).len(), 1);
        assert_eq!(set.error.len(), 1);
        assert!(format!("{set:?}").contains("down: 2"));
    }
}
