use std::sync::Arc;

use crate::error::Result;

/// Work posted to an event loop.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A single thread of execution that owns channels and runs their events.
///
/// Pipelines only ever invoke handlers on their channel's loop thread. Anything
/// arriving from another thread is wrapped in a [`Task`] and posted.
pub trait EventLoop: Send + Sync + 'static {
    /// True if the calling thread is this loop's thread.
    fn in_loop_thread(&self) -> bool;

    /// Queues `task` to run on the loop thread. Fails once the loop has shut down.
    fn post(&self, task: Task) -> Result<()>;

    /// The pool this loop belongs to, if any.
    fn pool(&self) -> Option<Arc<dyn EventLoopPool>> {
        None
    }
}

/// A group of event loops sharing channels between them.
pub trait EventLoopPool: Send + Sync + 'static {
    /// The loop to hand the next channel to.
    fn next_loop(&self) -> Arc<dyn EventLoop>;

    /// True if the calling thread is the one that started the pool.
    fn is_main_thread(&self) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs every task immediately on the calling thread.
///
/// Pipelines use it until they are attached to a channel with a real loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineEventLoop;

impl EventLoop for InlineEventLoop {
    fn in_loop_thread(&self) -> bool {
        true
    }

    fn post(&self, task: Task) -> Result<()> {
        task();
        Ok(())
    }
}
