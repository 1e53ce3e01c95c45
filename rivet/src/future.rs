//! Completion handles for outbound operations.

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::channel::Channel;
use crate::error::{Error, Result};

type Listener = Box<dyn FnOnce(&ChannelFuture) + Send>;

#[derive(Default)]
struct State {
    outcome: Option<Result<()>>,
    listeners: Vec<Listener>,
    wakers: Vec<Waker>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    done: Condvar,
}

/// The outcome of an outbound operation such as `close` or `flush`.
///
/// Every outbound request gets its future before dispatch starts, so it is the
/// one place to learn about success or failure, whether the request completed
/// synchronously or on another thread. A future completes at most once;
/// later attempts are ignored.
///
/// Completion can be observed by polling ([`is_done`](Self::is_done)), blocking
/// ([`wait`](Self::wait)), callbacks ([`add_listener`](Self::add_listener)) or
/// `.await`.
#[derive(Clone, Default)]
pub struct ChannelFuture {
    inner: Arc<Inner>,
}

impl ChannelFuture {
    pub fn new() -> Self {
        Self::default()
    }

    /// An already successful future.
    pub fn succeeded() -> Self {
        let future = Self::new();
        future.set_success();
        future
    }

    /// An already failed future.
    pub fn failed(cause: Error) -> Self {
        let future = Self::new();
        future.set_failure(cause);
        future
    }

    /// Returns false if the future had already completed.
    pub fn set_success(&self) -> bool {
        self.complete(Ok(()))
    }

    /// Returns false if the future had already completed.
    pub fn set_failure(&self, cause: Error) -> bool {
        self.complete(Err(cause))
    }

    fn complete(&self, outcome: Result<()>) -> bool {
        let (listeners, wakers) = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            (
                std::mem::take(&mut state.listeners),
                std::mem::take(&mut state.wakers),
            )
        };
        self.inner.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for listener in listeners {
            self.notify(listener);
        }
        true
    }

    fn notify(&self, listener: Listener) {
        if catch_unwind(AssertUnwindSafe(|| listener(self))).is_err() {
            warn!("a ChannelFuture listener panicked");
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Some(Ok(())))
    }

    /// The failure cause, if the future failed.
    pub fn cause(&self) -> Option<Error> {
        match &self.inner.state.lock().outcome {
            Some(Err(cause)) => Some(cause.clone()),
            _ => None,
        }
    }

    /// The outcome, if the future is done.
    pub fn outcome(&self) -> Option<Result<()>> {
        self.inner.state.lock().outcome.clone()
    }

    /// Runs `listener` once the future completes; immediately if it already has.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&ChannelFuture) + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if state.outcome.is_none() {
                state.listeners.push(Box::new(listener));
                return;
            }
        }
        self.notify(Box::new(listener));
    }

    /// Blocks the calling thread until the future completes.
    ///
    /// Never call this on the event loop thread that is supposed to complete it.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.inner.done.wait(&mut state);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let mut state = self.inner.state.lock();
        if state.outcome.is_none() {
            self.inner.done.wait_while_for(&mut state, |s| s.outcome.is_none(), timeout);
        }
        state.outcome.clone()
    }
}

impl Future for ChannelFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl fmt::Debug for ChannelFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ChannelFuture")
            .field("outcome", &state.outcome)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// A listener that closes `channel` once the future completes.
pub fn close_on_complete(channel: &Arc<dyn Channel>) -> impl FnOnce(&ChannelFuture) + Send + 'static {
    let channel: Weak<dyn Channel> = Arc::downgrade(channel);
    move |_| {
        if let Some(channel) = channel.upgrade() {
            channel.close();
        }
    }
}

/// A listener that closes `channel` if the future fails.
pub fn close_on_failure(channel: &Arc<dyn Channel>) -> impl FnOnce(&ChannelFuture) + Send + 'static {
    let channel: Weak<dyn Channel> = Arc::downgrade(channel);
    move |future| {
        if future.cause().is_some() {
            if let Some(channel) = channel.upgrade() {
                channel.close();
            }
        }
    }
}
