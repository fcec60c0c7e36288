//! One-shot fan-out executor.
//!
//! An [`AsyncControlPlane`] collects fire-and-forget tasks and result-producing tasks,
//! then [`AsyncControlPlane::sync`] runs all of them concurrently (one tokio task per
//! registration) and waits for every one of them exactly once. Each result-producing
//! task hands back a [`TaskFuture`] bound to a single-slot channel.
//!
//! ```text
//!  task_fn(a) ─┐                         ┌─► worker a
//!  task_fn(b) ─┼─► sync(ctx) ─► JoinSet ─┼─► worker b
//!  future(c)  ─┘                         └─► worker c ─► oneshot ─► TaskFuture::get()
//! ```
//!
//! A plane is single use: `sync` may be called once, and registration after that
//! call is rejected.

use crate::error::AvailabilityError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Identifier assigned to each registered task
pub type TaskId = u32;

type BoxTaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type BoxTask = Box<dyn FnOnce(CancellationToken) -> BoxTaskFuture + Send + 'static>;

/// Fire-and-forget unit of work, the object form of [`AsyncControlPlane::task_fn`]
#[async_trait]
pub trait AsyncTask: Send + 'static {
    async fn run(self: Box<Self>, ctx: CancellationToken);
}

/// Result-producing unit of work, the object form of [`AsyncControlPlane::future_task_fn`]
#[async_trait]
pub trait AsyncFutureTask: Send + 'static {
    type Output: Send + 'static;
    type Error: Send + 'static;

    async fn run(self: Box<Self>, ctx: CancellationToken) -> Result<Self::Output, Self::Error>;
}

/// Lifecycle of a control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanePhase {
    /// Accepting registrations, `sync` not started
    Idle,
    /// Workers spawned, `sync` waiting on them
    Running,
    /// Every worker has finished
    Terminated,
}

impl PlanePhase {
    const IDLE: u8 = 0;
    const RUNNING: u8 = 1;
    const TERMINATED: u8 = 2;

    fn from_u8(raw: u8) -> Self {
        match raw {
            Self::RUNNING => PlanePhase::Running,
            Self::TERMINATED => PlanePhase::Terminated,
            _ => PlanePhase::Idle,
        }
    }
}

/// State shared between a plane and the futures it handed out
#[derive(Debug)]
struct PlaneState {
    phase: AtomicU8,
    called: AtomicBool,
}

impl PlaneState {
    fn phase(&self) -> PlanePhase {
        PlanePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: u8) {
        self.phase.store(phase, Ordering::Release);
    }
}

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<TaskId, BoxTask>,
    future_tasks: HashMap<TaskId, BoxTask>,
}

impl TaskTable {
    fn len(&self) -> usize {
        self.tasks.len() + self.future_tasks.len()
    }
}

/// Single-use concurrent executor
pub struct AsyncControlPlane {
    state: Arc<PlaneState>,
    table: Mutex<TaskTable>,
    task_id_gen: AtomicU32,
}

impl Default for AsyncControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncControlPlane {
    pub fn new() -> Self {
        Self {
            state: Arc::new(PlaneState {
                phase: AtomicU8::new(PlanePhase::IDLE),
                called: AtomicBool::new(false),
            }),
            table: Mutex::new(TaskTable::default()),
            task_id_gen: AtomicU32::new(0),
        }
    }

    pub fn phase(&self) -> PlanePhase {
        self.state.phase()
    }

    /// Number of tasks registered and not yet handed to workers
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a fire-and-forget task
    ///
    /// Returns the plane again so registrations can be chained:
    /// `plane.task_fn(a)?.task_fn(b)?`.
    pub fn task_fn<F, Fut>(&self, f: F) -> Result<&Self, AvailabilityError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task: BoxTask = Box::new(move |ctx| Box::pin(f(ctx)));
        self.register(task, false)?;
        Ok(self)
    }

    /// Register a task object
    pub fn task<T: AsyncTask>(&self, task: T) -> Result<&Self, AvailabilityError> {
        let task = Box::new(task);
        self.task_fn(move |ctx| async move { task.run(ctx).await })
    }

    /// Register a result-producing task object
    pub fn future_task<T: AsyncFutureTask>(
        &self,
        task: T,
    ) -> Result<TaskFuture<T::Output, T::Error>, AvailabilityError> {
        let task = Box::new(task);
        self.future_task_fn(move |ctx| async move { task.run(ctx).await })
    }

    /// Register a task producing a result, retrievable through the returned future
    /// once the plane has been synced
    pub fn future_task_fn<T, E, F, Fut>(&self, f: F) -> Result<TaskFuture<T, E>, AvailabilityError>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: BoxTask = Box::new(move |ctx| {
            Box::pin(async move {
                let output = f(ctx).await;
                // The future may already be dropped; nobody is left to read the result.
                let _ = tx.send(output);
            })
        });
        let id = self.register(task, true)?;

        Ok(TaskFuture {
            id,
            state: Arc::clone(&self.state),
            rx: Some(rx),
        })
    }

    fn register(&self, task: BoxTask, is_future: bool) -> Result<TaskId, AvailabilityError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state.called.load(Ordering::Acquire) {
            return Err(AvailabilityError::AlreadyCalled);
        }

        let id = self.task_id_gen.fetch_add(1, Ordering::Relaxed) + 1;
        if is_future {
            table.future_tasks.insert(id, task);
        } else {
            table.tasks.insert(id, task);
        }
        Ok(id)
    }

    /// Run every registered task concurrently and wait for all of them
    ///
    /// `ctx` is handed to each task; tasks that want to be cancellable observe it.
    /// A worker that panics is logged and counted, it does not fail the sync.
    pub async fn sync(&self, ctx: CancellationToken) -> Result<(), AvailabilityError> {
        if self.state.called.swap(true, Ordering::AcqRel) {
            return Err(AvailabilityError::AlreadyCalled);
        }
        if self.state.phase() != PlanePhase::Idle {
            return Err(AvailabilityError::AlreadyRunning);
        }

        let table = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *table)
        };
        if table.len() == 0 {
            self.state.set_phase(PlanePhase::TERMINATED);
            return Ok(());
        }

        self.state.set_phase(PlanePhase::RUNNING);

        let mut workers = JoinSet::new();
        for (_, task) in table.tasks.into_iter().chain(table.future_tasks) {
            let ctx = ctx.clone();
            workers.spawn(async move { task(ctx).await });
        }

        let total = workers.len();
        let mut aborted = 0usize;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                aborted += 1;
                warn!(error = %e, "Control plane worker aborted");
            }
        }

        self.state.set_phase(PlanePhase::TERMINATED);
        debug!(total, aborted, "Control plane synced");
        Ok(())
    }
}

/// Handle to the result of one task registered with [`AsyncControlPlane::future_task_fn`]
///
/// The plane keeps no control through this handle; it only reads the plane phase to
/// refuse waiting on a plane that was never synced.
#[derive(Debug)]
pub struct TaskFuture<T, E> {
    id: TaskId,
    state: Arc<PlaneState>,
    rx: Option<oneshot::Receiver<Result<T, E>>>,
}

impl<T, E> TaskFuture<T, E> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the result has already been taken by [`TaskFuture::get`]
    pub fn is_consumed(&self) -> bool {
        self.rx.is_none()
    }

    /// Wait for the task's result
    ///
    /// Fails fast with [`AvailabilityError::NotReady`] while the owning plane has not
    /// started syncing, which can be retried after `sync`. The first successful call
    /// returns exactly what the task produced; later calls return
    /// [`AvailabilityError::FutureConsumed`] without waiting.
    pub async fn get(&mut self) -> Result<Result<T, E>, AvailabilityError> {
        if self.state.phase() == PlanePhase::Idle {
            return Err(AvailabilityError::NotReady);
        }

        let rx = self.rx.take().ok_or(AvailabilityError::FutureConsumed)?;
        rx.await.map_err(|_| AvailabilityError::TaskAborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sync_runs_every_task_once() {
        let plane = AsyncControlPlane::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            plane
                .task_fn(move |_| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert_eq!(plane.len(), 3);

        plane.sync(CancellationToken::new()).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(plane.phase(), PlanePhase::Terminated);
        assert!(plane.is_empty());
    }

    #[tokio::test]
    async fn test_task_fn_chaining() {
        let plane = AsyncControlPlane::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let (a, b) = (Arc::clone(&counter), Arc::clone(&counter));

        plane
            .task_fn(move |_| async move {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .and_then(|p| {
                p.task_fn(move |_| async move {
                    b.fetch_add(10, Ordering::SeqCst);
                })
            })
            .unwrap();

        plane.sync(CancellationToken::new()).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_sync_without_tasks() {
        let plane = AsyncControlPlane::new();
        assert!(plane.sync(CancellationToken::new()).await.is_ok());
        assert_eq!(plane.phase(), PlanePhase::Terminated);
    }

    #[tokio::test]
    async fn test_repeated_sync_rejected() {
        let plane = AsyncControlPlane::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        plane
            .task_fn(move |_| async move {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        plane.sync(CancellationToken::new()).await.unwrap();
        let second = plane.sync(CancellationToken::new()).await;
        assert!(matches!(second, Err(AvailabilityError::AlreadyCalled)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_register_after_sync_rejected() {
        let plane = AsyncControlPlane::new();
        plane.sync(CancellationToken::new()).await.unwrap();

        assert!(matches!(
            plane.task_fn(|_| async {}),
            Err(AvailabilityError::AlreadyCalled)
        ));
        let future = plane.future_task_fn(|_| async { Ok::<_, String>(1) });
        assert!(matches!(future, Err(AvailabilityError::AlreadyCalled)));
    }

    #[tokio::test]
    async fn test_future_results() {
        let plane = AsyncControlPlane::new();
        let mut ok = plane
            .future_task_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<u32, String>(42)
            })
            .unwrap();
        let mut failed = plane
            .future_task_fn(|_| async { Err::<u32, String>("boom".to_string()) })
            .unwrap();
        assert_ne!(ok.id(), failed.id());

        plane.sync(CancellationToken::new()).await.unwrap();

        // Queried out of registration order on purpose.
        assert_eq!(failed.get().await.unwrap(), Err("boom".to_string()));
        assert_eq!(ok.get().await.unwrap(), Ok(42));
    }

    #[tokio::test]
    async fn test_future_second_get_does_not_hang() {
        let plane = AsyncControlPlane::new();
        let mut future = plane
            .future_task_fn(|_| async { Ok::<_, String>("done") })
            .unwrap();
        plane.sync(CancellationToken::new()).await.unwrap();

        assert_eq!(future.get().await.unwrap(), Ok("done"));
        assert!(future.is_consumed());

        let second = tokio::time::timeout(Duration::from_secs(1), future.get())
            .await
            .expect("second get must not block");
        assert!(matches!(second, Err(AvailabilityError::FutureConsumed)));
    }

    #[tokio::test]
    async fn test_future_get_before_sync_fails_fast() {
        let plane = AsyncControlPlane::new();
        let mut future = plane
            .future_task_fn(|_| async { Ok::<_, String>(7) })
            .unwrap();

        let early = tokio::time::timeout(Duration::from_secs(1), future.get())
            .await
            .expect("get before sync must not block");
        assert!(matches!(early, Err(AvailabilityError::NotReady)));
        assert!(!future.is_consumed());

        plane.sync(CancellationToken::new()).await.unwrap();
        assert_eq!(future.get().await.unwrap(), Ok(7));
    }

    #[tokio::test]
    async fn test_get_while_sync_in_progress() {
        let plane = Arc::new(AsyncControlPlane::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let mut future = plane
            .future_task_fn(move |_| async move {
                let _ = release_rx.await;
                Ok::<_, String>(5)
            })
            .unwrap();

        let syncing = {
            let plane = Arc::clone(&plane);
            tokio::spawn(async move { plane.sync(CancellationToken::new()).await })
        };
        while plane.phase() == PlanePhase::Idle {
            tokio::task::yield_now().await;
        }

        let waiter = tokio::spawn(async move { future.get().await });
        release_tx.send(()).unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), Ok(5));
        syncing.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let plane = AsyncControlPlane::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        plane
            .task_fn(|_| async { panic!("listener blew up") })
            .unwrap();
        plane
            .task_fn(move |_| async move {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let mut future = plane
            .future_task_fn(|_| async {
                if true {
                    panic!("future blew up");
                }
                Ok::<u8, String>(0)
            })
            .unwrap();

        assert!(plane.sync(CancellationToken::new()).await.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(
            future.get().await,
            Err(AvailabilityError::TaskAborted)
        ));
    }

    #[tokio::test]
    async fn test_context_reaches_tasks() {
        let plane = AsyncControlPlane::new();
        let ctx = CancellationToken::new();
        let mut observed = plane
            .future_task_fn(|ctx: CancellationToken| async move {
                ctx.cancelled().await;
                Ok::<_, String>("cancelled")
            })
            .unwrap();

        ctx.cancel();
        plane.sync(ctx).await.unwrap();
        assert_eq!(observed.get().await.unwrap(), Ok("cancelled"));
    }

    struct Bump(Arc<AtomicUsize>);

    #[async_trait]
    impl AsyncTask for Bump {
        async fn run(self: Box<Self>, _ctx: CancellationToken) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Square(u32);

    #[async_trait]
    impl AsyncFutureTask for Square {
        type Output = u32;
        type Error = String;

        async fn run(self: Box<Self>, ctx: CancellationToken) -> Result<u32, String> {
            if ctx.is_cancelled() {
                return Err("cancelled".to_string());
            }
            Ok(self.0 * self.0)
        }
    }

    #[tokio::test]
    async fn test_task_objects_mix_with_closures() {
        let plane = AsyncControlPlane::new();
        let counter = Arc::new(AtomicUsize::new(0));

        plane
            .task(Bump(Arc::clone(&counter)))
            .unwrap()
            .task(Bump(Arc::clone(&counter)))
            .unwrap();
        let mut squared = plane.future_task(Square(7)).unwrap();
        let mut doubled = plane
            .future_task_fn(|_ctx| async { Ok::<u32, String>(2 * 7) })
            .unwrap();
        assert_eq!(plane.len(), 4);

        plane.sync(CancellationToken::new()).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(squared.get().await.unwrap(), Ok(49));
        assert_eq!(doubled.get().await.unwrap(), Ok(14));
        assert!(matches!(
            plane.task(Bump(counter)),
            Err(AvailabilityError::AlreadyCalled)
        ));
    }
}
