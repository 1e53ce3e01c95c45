//! Local executor of an event loop thread
//!
//! A loop thread drives a current-thread tokio runtime around a [`LocalSet`].
//! Tasks spawned with [`spawn_local`] stay on the thread that spawned them,
//! which is what lets channel I/O and pipeline events of one connection run
//! in a single thread.

use core_affinity::{CoreId, set_for_current};
use scoped_tls::scoped_thread_local;
use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
    thread::{self, JoinHandle},
};
use tokio::runtime::Runtime;
use tokio::task::{JoinError, LocalSet};

scoped_thread_local!(pub(crate) static LOCAL: LocalSet);

/// A task running on a loop thread.
///
/// Resolves to the task's output, or a [`TaskError`] once it was cancelled or
/// panicked. Dropping it does not stop the task.
///
/// ```rust,no_run
/// use rivet_executor::{LocalExecutorBuilder, spawn_local};
///
/// LocalExecutorBuilder::default().run(async {
///     let answer = spawn_local(async { 42 });
///     assert_eq!(answer.await.unwrap(), 42);
/// }).unwrap();
/// ```
pub struct Task<T> {
    handle: tokio::task::JoinHandle<T>,
}

impl<T> Task<T> {
    pub fn detach(self) {}

    /// Stops the task at its next suspension point.
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map_err(TaskError::from)
    }
}

/// Why a [`Task`] produced no output.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task was cancelled")]
    Cancelled,

    /// Carries the panic message as [`rivet::Error::Unknown`].
    #[error("task panicked: {0}")]
    Panicked(rivet::Error),
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

impl From<JoinError> for TaskError {
    fn from(err: JoinError) -> Self {
        match err.try_into_panic() {
            Ok(payload) => Self::Panicked(rivet::Error::from_panic(payload)),
            Err(_) => Self::Cancelled,
        }
    }
}

/// A cancelled task means its channel went away; a panic keeps its message.
impl From<TaskError> for rivet::Error {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Cancelled => rivet::Error::Closed,
            TaskError::Panicked(cause) => cause,
        }
    }
}

/// Starts a local executor on the current thread or on a new one.
#[derive(Debug, Default)]
pub struct LocalExecutorBuilder {
    core_id: Option<CoreId>,
    name: String,
}

impl LocalExecutorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Thread name used by [`spawn`](Self::spawn).
    pub fn name(mut self, name: &str) -> Self {
        self.name = String::from(name);
        self
    }

    /// Pins the executor thread to `core_id`.
    pub fn core_id(mut self, core_id: CoreId) -> Self {
        self.core_id = Some(core_id);
        self
    }

    /// Blocks the current thread on `f`.
    pub fn run<T>(self, f: impl Future<Output = T>) -> io::Result<T> {
        let executor = LocalExecutor::new(self.core_id)?;
        Ok(executor.block_on(f))
    }

    /// Starts a thread that blocks on the future `fut_gen` builds there.
    ///
    /// The future need not be `Send`; only its generator crosses threads.
    pub fn spawn<G, F, T>(self, fut_gen: G) -> io::Result<JoinHandle<io::Result<T>>>
    where
        G: FnOnce() -> F + Send + 'static,
        F: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let core_id = self.core_id;
        thread::Builder::new().name(self.name).spawn(move || {
            let executor = LocalExecutor::new(core_id)?;
            Ok(executor.block_on(fut_gen()))
        })
    }
}

/// The runtime and task set of one thread.
struct LocalExecutor {
    runtime: Runtime,
    tasks: LocalSet,
}

impl LocalExecutor {
    fn new(core_id: Option<CoreId>) -> io::Result<Self> {
        if let Some(core_id) = core_id {
            if !set_for_current(core_id) {
                log::warn!("failed to pin {:?} to core {}", thread::current().name(), core_id.id);
            }
        }
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            tasks: LocalSet::new(),
        })
    }

    fn block_on<T>(&self, f: impl Future<Output = T>) -> T {
        LOCAL.set(&self.tasks, || self.runtime.block_on(self.tasks.run_until(f)))
    }
}

/// Spawns `future` on the local executor of the calling thread.
///
/// # Panics
///
/// Panics outside of a thread run by [`LocalExecutorBuilder`]; every event
/// loop thread is one.
pub fn spawn_local<T: 'static>(future: impl Future<Output = T> + 'static) -> Task<T> {
    assert!(
        in_local_executor(),
        "`spawn_local()` must be called from a tokio `LocalSet`"
    );
    LOCAL.with(|tasks| Task {
        handle: tasks.spawn_local(future),
    })
}

pub fn in_local_executor() -> bool {
    LOCAL.is_set()
}

/// Lets the other tasks of this thread run.
pub async fn yield_local() {
    tokio::task::yield_now().await
}
