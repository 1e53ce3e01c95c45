use std::future::Future;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{JoinHandle, ThreadId};

use core_affinity::CoreId;
use log::{debug, error, trace};
use parking_lot::Mutex;
use rivet::{Error, EventLoop, EventLoopPool, Result, Task};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::runtime::{LocalExecutorBuilder, spawn_local};

/// One thread running a tokio current-thread runtime and a `LocalSet`.
///
/// Posted [`Task`]s run on the loop thread in the order they were posted.
/// Futures handed to [`SingleThreadEventLoop::spawn`] run on the same
/// `LocalSet`, interleaved with the posted tasks.
pub struct SingleThreadEventLoop {
    name: String,
    sender: Mutex<Option<UnboundedSender<Task>>>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<io::Result<()>>>>,
    pool: OnceLock<Weak<dyn EventLoopPool>>,
}

impl SingleThreadEventLoop {
    /// Starts a loop thread named `name`, optionally pinned to `core_id`.
    pub fn start(name: &str, core_id: Option<CoreId>) -> io::Result<Arc<Self>> {
        let (sender, mut receiver) = unbounded_channel::<Task>();
        let loop_name = name.to_owned();

        let mut builder = LocalExecutorBuilder::new().name(name);
        if let Some(core_id) = core_id {
            builder = builder.core_id(core_id);
        }
        let handle = builder.spawn(move || async move {
            debug!("{} started", loop_name);
            while let Some(task) = receiver.recv().await {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                    error!("{}: posted task panicked: {}", loop_name, Error::from_panic(payload));
                }
            }
            debug!("{} stopped", loop_name);
        })?;

        Ok(Arc::new(Self {
            name: name.to_owned(),
            sender: Mutex::new(Some(sender)),
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
            pool: OnceLock::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub(crate) fn set_pool(&self, pool: Weak<dyn EventLoopPool>) {
        let _ = self.pool.set(pool);
    }

    /// Runs the future built by `fut_gen` as a local task on the loop thread.
    pub fn spawn<G, F>(&self, fut_gen: G) -> Result<()>
    where
        G: FnOnce() -> F + Send + 'static,
        F: Future<Output = ()> + 'static,
    {
        self.post(Box::new(move || spawn_local(fut_gen()).detach()))
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stops accepting tasks and waits for the queued ones to finish.
    ///
    /// Called on the loop thread itself, it only stops accepting tasks.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }
        trace!("{} shutting down", self.name);
        if self.in_loop_thread() {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("{} failed to run: {}", self.name, err),
                Err(_) => error!("{} panicked", self.name),
            }
        }
    }
}

impl EventLoop for SingleThreadEventLoop {
    fn in_loop_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    fn post(&self, task: Task) -> Result<()> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(Error::Closed)?;
        sender.send(task).map_err(|_| Error::Closed)
    }

    fn pool(&self) -> Option<Arc<dyn EventLoopPool>> {
        self.pool.get()?.upgrade()
    }
}

impl Drop for SingleThreadEventLoop {
    fn drop(&mut self) {
        self.sender.get_mut().take();
    }
}

impl std::fmt::Debug for SingleThreadEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadEventLoop")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_tasks_run_in_order_on_loop_thread() {
        let event_loop = SingleThreadEventLoop::start("rivet-loop-test", None).unwrap();
        assert!(!event_loop.in_loop_thread());

        let (tx, rx) = mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            let this = event_loop.clone();
            event_loop
                .post(Box::new(move || tx.send((i, this.in_loop_thread())).unwrap()))
                .unwrap();
        }
        let seen: Vec<_> = rx.iter().take(3).collect();
        assert_eq!(seen, [(0, true), (1, true), (2, true)]);

        event_loop.shutdown();
        assert!(matches!(event_loop.post(Box::new(|| {})), Err(Error::Closed)));
    }

    #[test]
    fn test_panicking_task_keeps_loop_alive() {
        let event_loop = SingleThreadEventLoop::start("rivet-loop-panic", None).unwrap();
        event_loop.post(Box::new(|| panic!("task failure"))).unwrap();
        let (tx, rx) = mpsc::channel();
        event_loop.post(Box::new(move || tx.send(7).unwrap())).unwrap();
        assert_eq!(rx.recv().unwrap(), 7);
        event_loop.shutdown();
    }

    #[test]
    fn test_spawned_future_runs_locally() {
        let event_loop = SingleThreadEventLoop::start("rivet-loop-spawn", None).unwrap();
        let (tx, rx) = mpsc::channel();
        let expected = event_loop.thread_id();
        event_loop
            .spawn(move || async move {
                crate::yield_local().await;
                tx.send(std::thread::current().id()).unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv().unwrap(), expected);
        event_loop.shutdown();
    }
}
