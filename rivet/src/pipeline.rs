//! # ChannelPipeline - Ordered Handler Chain
//!
//! A [`ChannelPipeline`] owns the named, ordered sequence of
//! [`ChannelHandlerContext`]s of one channel. It is both the place where the
//! chain is mutated (`add_*`, `remove*`, `replace`) and the entry point through
//! which the transport injects inbound events and the application issues
//! outbound requests.
//!
//! ```text
//!   fire_*  ───►  [decoder] ──► [logic] ──► [encoder]  ───► (end)
//!                                                        ▲
//!   sink    ◄───  [decoder] ◄── [logic] ◄── [encoder]  ◄─┘ bind/connect/close/flush/write
//! ```
//!
//! ## Threading
//!
//! Every handler callback runs on the event loop of the channel the pipeline is
//! attached to (or inline, before attachment). Calls from any other thread are
//! posted to that loop and return immediately; completion of outbound requests
//! is observed through the returned [`ChannelFuture`].
//!
//! Structural mutation is serialised by a reentrant lock, so lifecycle hooks may
//! mutate the pipeline themselves. Event dispatch does not take that lock.
//!
//! ## Failures
//!
//! A handler returning an error (or panicking) never unwinds into the caller.
//! The error is wrapped as [`Error::Handler`] and fired as `exception_caught`
//! starting at the failing context. A failure while handling `exception_caught`
//! is only logged.

use std::any::{Any, type_name};
use std::fmt;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, trace, warn};
use parking_lot::{Mutex, MutexGuard, ReentrantMutex, RwLock};

use crate::attachment::Attachments;
use crate::channel::{Channel, ChannelSink, DiscardingSink, OutboundEvent};
use crate::context::ChannelHandlerContext;
use crate::error::{Error, Result};
use crate::event::{EventKind, EventSet};
use crate::event_loop::{EventLoop, InlineEventLoop};
use crate::future::ChannelFuture;
use crate::handler::{ChannelHandler, UserEvent};
use crate::message::{Message, MessageBuf};
use crate::pipeline_internal::{Chain, ContextId, Cursor, InboundEvent, Position};

struct Attachment {
    channel: Weak<dyn Channel>,
    sink: Arc<dyn ChannelSink>,
    event_loop: Arc<dyn EventLoop>,
}

#[derive(Default)]
struct Activation {
    opened: bool,
    active: bool,
    pending_active: bool,
    fire_message_updated_on_activation: bool,
}

/// The handler chain of one channel.
pub struct ChannelPipeline {
    this: Weak<ChannelPipeline>,
    mutation: ReentrantMutex<()>,
    chain: RwLock<Chain>,
    attachment: RwLock<Option<Attachment>>,
    discarding_sink: Arc<dyn ChannelSink>,
    inline_loop: Arc<dyn EventLoop>,
    activation: Mutex<Activation>,
    tail_buffer: Mutex<MessageBuf>,
    sink_buffer: Mutex<MessageBuf>,
    attachments: Attachments,
    next_id: AtomicU64,
}

impl ChannelPipeline {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            mutation: ReentrantMutex::new(()),
            chain: RwLock::new(Chain::default()),
            attachment: RwLock::new(None),
            discarding_sink: Arc::new(DiscardingSink),
            inline_loop: Arc::new(InlineEventLoop),
            activation: Mutex::new(Activation::default()),
            tail_buffer: Mutex::new(MessageBuf::new()),
            sink_buffer: Mutex::new(MessageBuf::new()),
            attachments: Attachments::default(),
            next_id: AtomicU64::new(0),
        })
    }

    // ---------------------------------------------------------------------
    // Attachment
    // ---------------------------------------------------------------------

    /// Binds the pipeline to `channel` and `sink`. Fails if already attached.
    pub fn attach(&self, channel: &Arc<dyn Channel>, sink: Arc<dyn ChannelSink>) -> Result<()> {
        let mut attachment = self.attachment.write();
        if attachment.is_some() {
            return Err(Error::illegal_state("pipeline is attached already"));
        }
        *attachment = Some(Attachment {
            channel: Arc::downgrade(channel),
            sink,
            event_loop: channel.event_loop(),
        });
        Ok(())
    }

    /// Unbinds the pipeline from its channel, which makes it attachable again.
    pub fn detach(&self) {
        if self.attachment.write().take().is_some() {
            *self.activation.lock() = Activation::default();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.read().is_some()
    }

    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.attachment.read().as_ref()?.channel.upgrade()
    }

    /// The attached sink, or the discarding sink before attachment.
    pub fn sink(&self) -> Arc<dyn ChannelSink> {
        match self.attachment.read().as_ref() {
            Some(attachment) => Arc::clone(&attachment.sink),
            None => Arc::clone(&self.discarding_sink),
        }
    }

    /// The attached channel's loop, or an inline loop before attachment.
    pub fn event_loop(&self) -> Arc<dyn EventLoop> {
        match self.attachment.read().as_ref() {
            Some(attachment) => Arc::clone(&attachment.event_loop),
            None => Arc::clone(&self.inline_loop),
        }
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    /// Data that travelled past the last outbound handler, waiting for the sink.
    pub fn sink_buffer(&self) -> MutexGuard<'_, MessageBuf> {
        self.sink_buffer.lock()
    }

    // ---------------------------------------------------------------------
    // Structural mutation
    // ---------------------------------------------------------------------

    pub fn add_first<H: ChannelHandler>(&self, name: &str, handler: H) -> Result<()> {
        self.add(Position::First, name, handler)
    }

    pub fn add_last<H: ChannelHandler>(&self, name: &str, handler: H) -> Result<()> {
        self.add(Position::Last, name, handler)
    }

    pub fn add_before<H: ChannelHandler>(&self, base: &str, name: &str, handler: H) -> Result<()> {
        self.add(Position::Before(base), name, handler)
    }

    pub fn add_after<H: ChannelHandler>(&self, base: &str, name: &str, handler: H) -> Result<()> {
        self.add(Position::After(base), name, handler)
    }

    fn add<H: ChannelHandler>(&self, position: Position<'_>, name: &str, handler: H) -> Result<()> {
        let _guard = self.mutation.lock();
        check_name(name)?;
        self.chain.read().check_insert(name, position)?;
        let ctx = self.new_context(name, handler)?;
        self.add_context(position, ctx)
    }

    fn new_context<H: ChannelHandler>(&self, name: &str, handler: H) -> Result<Arc<ChannelHandlerContext>> {
        let id = ContextId(self.next_id.fetch_add(1, Ordering::Relaxed));
        ChannelHandlerContext::new(id, name, handler, self.this.clone())
    }

    fn add_context(&self, position: Position<'_>, ctx: Arc<ChannelHandlerContext>) -> Result<()> {
        self.chain.read().check_insert(ctx.name(), position)?;
        call_hook(&ctx, |handler, ctx| handler.before_add(ctx)).map_err(|cause| {
            Error::lifecycle(
                format!("{}.before_add() has thrown an exception; not adding.", ctx.handler_type()),
                cause,
            )
        })?;

        self.chain.write().insert(Arc::clone(&ctx), position)?;
        trace!("added {} as {:?}", ctx.handler_type(), ctx.name());

        if let Err(cause) = call_hook(&ctx, |handler, ctx| handler.after_add(ctx)) {
            let removed = self.remove_context(&ctx);
            let message = match &removed {
                Ok(_) => format!("{}.after_add() has thrown an exception; removed.", ctx.handler_type()),
                Err(remove_err) => {
                    warn!("failed to remove {:?} after its after_add() failed: {}", ctx.name(), remove_err);
                    format!(
                        "{}.after_add() has thrown an exception; also failed to remove.",
                        ctx.handler_type()
                    )
                }
            };
            return Err(Error::lifecycle(message, cause));
        }
        Ok(())
    }

    /// Removes the handler registered under `name`.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn ChannelHandler>> {
        let _guard = self.mutation.lock();
        let ctx = self.context(name).ok_or_else(|| Error::no_such_element(name.to_owned()))?;
        self.remove_context(&ctx)
    }

    /// Removes `handler`, identified by pointer.
    pub fn remove_handler<H: ChannelHandler>(&self, handler: &Arc<H>) -> Result<()> {
        let _guard = self.mutation.lock();
        let ctx = self
            .context_of(handler)
            .ok_or_else(|| Error::no_such_element(type_name::<H>()))?;
        self.remove_context(&ctx).map(|_| ())
    }

    pub fn remove_first(&self) -> Result<Arc<dyn ChannelHandler>> {
        let _guard = self.mutation.lock();
        let ctx = self
            .first_context()
            .ok_or_else(|| Error::no_such_element("pipeline is empty"))?;
        self.remove_context(&ctx)
    }

    pub fn remove_last(&self) -> Result<Arc<dyn ChannelHandler>> {
        let _guard = self.mutation.lock();
        let ctx = self
            .last_context()
            .ok_or_else(|| Error::no_such_element("pipeline is empty"))?;
        self.remove_context(&ctx)
    }

    fn remove_context(&self, ctx: &Arc<ChannelHandlerContext>) -> Result<Arc<dyn ChannelHandler>> {
        call_hook(ctx, |handler, ctx| handler.before_remove(ctx)).map_err(|cause| {
            Error::lifecycle(
                format!("{}.before_remove() has thrown an exception; not removing.", ctx.handler_type()),
                cause,
            )
        })?;

        if self.chain.write().unlink(ctx.id()).is_none() {
            return Err(Error::no_such_element(ctx.name().to_owned()));
        }
        ctx.mark_removed();
        trace!("removed {} ({:?})", ctx.handler_type(), ctx.name());

        call_hook(ctx, |handler, ctx| handler.after_remove(ctx)).map_err(|cause| {
            Error::lifecycle(
                format!("{}.after_remove() has thrown an exception.", ctx.handler_type()),
                cause,
            )
        })?;
        Ok(Arc::clone(ctx.handler()))
    }

    /// Replaces the handler under `old_name` with `handler` named `new_name`,
    /// returning the old handler.
    pub fn replace<H: ChannelHandler>(
        &self,
        old_name: &str,
        new_name: &str,
        handler: H,
    ) -> Result<Arc<dyn ChannelHandler>> {
        let _guard = self.mutation.lock();
        check_name(new_name)?;
        let old = self
            .context(old_name)
            .ok_or_else(|| Error::no_such_element(old_name.to_owned()))?;
        if new_name != old_name && self.chain.read().contains_name(new_name) {
            return Err(Error::argument(format!("Duplicate handler name: {}", new_name)));
        }
        let new = self.new_context(new_name, handler)?;

        let (is_first, is_last) = {
            let chain = self.chain.read();
            (chain.is_first(old.id()), chain.is_last(old.id()))
        };
        if is_first || is_last {
            let removed = self.remove_context(&old)?;
            let position = if is_first { Position::First } else { Position::Last };
            self.add_context(position, new)?;
            return Ok(removed);
        }

        call_hook(&old, |handler, ctx| handler.before_remove(ctx)).map_err(|cause| {
            Error::lifecycle(
                format!("{}.before_remove() has thrown an exception; not replacing.", old.handler_type()),
                cause,
            )
        })?;
        call_hook(&new, |handler, ctx| handler.before_add(ctx)).map_err(|cause| {
            Error::lifecycle(
                format!("{}.before_add() has thrown an exception; not replacing.", new.handler_type()),
                cause,
            )
        })?;

        self.chain.write().replace(old.id(), Arc::clone(&new))?;
        old.mark_removed();

        let removed = call_hook(&old, |handler, ctx| handler.after_remove(ctx));
        let added = call_hook(&new, |handler, ctx| handler.after_add(ctx));
        match (removed, added) {
            (Ok(()), Ok(())) => Ok(Arc::clone(old.handler())),
            (Err(remove_err), Err(add_err)) => {
                warn!("{}.after_remove() failed: {}", old.handler_type(), remove_err);
                warn!("{}.after_add() failed: {}", new.handler_type(), add_err);
                Err(Error::lifecycle(
                    format!(
                        "Both {}.after_remove() and {}.after_add() failed; see logs.",
                        old.handler_type(),
                        new.handler_type()
                    ),
                    add_err,
                ))
            }
            (Err(cause), Ok(())) => Err(Error::lifecycle(
                format!("{}.after_remove() has thrown an exception.", old.handler_type()),
                cause,
            )),
            (Ok(()), Err(cause)) => Err(Error::lifecycle(
                format!("{}.after_add() has thrown an exception.", new.handler_type()),
                cause,
            )),
        }
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    /// The first handler of type `H`.
    pub fn get<H: ChannelHandler>(&self) -> Option<Arc<H>> {
        self.chain.read().iter().find_map(|ctx| ctx.handler_as::<H>())
    }

    pub fn get_handler(&self, name: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.chain.read().get(name).map(|ctx| Arc::clone(ctx.handler()))
    }

    pub fn context(&self, name: &str) -> Option<Arc<ChannelHandlerContext>> {
        self.chain.read().get(name).cloned()
    }

    /// The context holding exactly this handler instance.
    pub fn context_of<H: ChannelHandler>(&self, handler: &Arc<H>) -> Option<Arc<ChannelHandlerContext>> {
        let wanted = Arc::as_ptr(handler) as *const ();
        self.chain
            .read()
            .iter()
            .find(|ctx| Arc::as_ptr(ctx.handler_any()) as *const () == wanted)
            .cloned()
    }

    pub fn first(&self) -> Option<Arc<dyn ChannelHandler>> {
        self.chain.read().first().map(|ctx| Arc::clone(ctx.handler()))
    }

    pub fn last(&self) -> Option<Arc<dyn ChannelHandler>> {
        self.chain.read().last().map(|ctx| Arc::clone(ctx.handler()))
    }

    pub fn first_context(&self) -> Option<Arc<ChannelHandlerContext>> {
        self.chain.read().first().cloned()
    }

    pub fn last_context(&self) -> Option<Arc<ChannelHandlerContext>> {
        self.chain.read().last().cloned()
    }

    /// Handler names from first to last.
    pub fn names(&self) -> Vec<String> {
        self.chain.read().iter().map(|ctx| ctx.name().to_owned()).collect()
    }

    /// `(name, handler)` pairs from first to last.
    pub fn handles(&self) -> Vec<(String, Arc<dyn ChannelHandler>)> {
        self.chain
            .read()
            .iter()
            .map(|ctx| (ctx.name().to_owned(), Arc::clone(ctx.handler())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    // ---------------------------------------------------------------------
    // Inbound injection
    // ---------------------------------------------------------------------

    pub fn fire_channel_open(&self) {
        self.execute(|pipeline| pipeline.channel_open_now());
    }

    /// Fires `channel_active`, deferred until `channel_open` has been fired.
    pub fn fire_channel_active(&self) {
        self.execute(|pipeline| pipeline.channel_active_now());
    }

    pub fn fire_channel_inactive(&self) {
        self.execute(|pipeline| {
            pipeline.activation.lock().active = false;
            pipeline.fire_inbound_now(Cursor::Start, InboundEvent::ChannelInactive);
        });
    }

    pub fn fire_exception_caught(&self, cause: Error) {
        self.fire_inbound(Cursor::Start, InboundEvent::ExceptionCaught(cause));
    }

    pub fn fire_user_event_triggered<E: Any + Send>(&self, event: E) {
        self.fire_user_event_triggered_boxed(Box::new(event));
    }

    pub fn fire_user_event_triggered_boxed(&self, event: UserEvent) {
        self.fire_inbound(Cursor::Start, InboundEvent::UserEventTriggered(event));
    }

    /// Fires `message_updated`, held back until the channel is active.
    pub fn fire_message_updated(&self) {
        self.execute(|pipeline| pipeline.message_updated_now());
    }

    /// Adds `msg` to the first inbound container interested in `message_updated`.
    ///
    /// This does not fire `message_updated`; call [`fire_message_updated`](Self::fire_message_updated).
    pub fn write_inbound<M: Any + Send>(&self, msg: M) {
        self.write_inbound_boxed(Box::new(msg));
    }

    pub fn write_inbound_boxed(&self, msg: Message) {
        self.execute(move |pipeline| {
            pipeline.with_inbound_target(Cursor::Start, |buf| buf.add(msg));
        });
    }

    fn channel_open_now(&self) {
        let pending_active = {
            let mut activation = self.activation.lock();
            activation.opened = true;
            std::mem::take(&mut activation.pending_active)
        };
        self.fire_inbound_now(Cursor::Start, InboundEvent::ChannelOpen);
        if pending_active {
            self.channel_active_now();
        }
    }

    fn channel_active_now(&self) {
        {
            let mut activation = self.activation.lock();
            if !activation.opened {
                debug!("channel_active arrived before channel_open; deferring");
                activation.pending_active = true;
                return;
            }
            activation.active = true;
        }
        self.fire_inbound_now(Cursor::Start, InboundEvent::ChannelActive);

        let replay = std::mem::take(&mut self.activation.lock().fire_message_updated_on_activation);
        if replay {
            self.fire_inbound_now(Cursor::Start, InboundEvent::MessageUpdated);
        }
    }

    fn message_updated_now(&self) {
        {
            let mut activation = self.activation.lock();
            if !activation.active {
                activation.fire_message_updated_on_activation = true;
                return;
            }
        }
        self.fire_inbound_now(Cursor::Start, InboundEvent::MessageUpdated);
    }

    // ---------------------------------------------------------------------
    // Outbound requests
    // ---------------------------------------------------------------------

    pub fn bind(&self, local: SocketAddr) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.send_outbound(Cursor::Start, OutboundEvent::Bind { local, future: future.clone() });
        future
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.send_outbound(
            Cursor::Start,
            OutboundEvent::Connect {
                remote,
                local,
                future: future.clone(),
            },
        );
        future
    }

    pub fn disconnect(&self) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.send_outbound(Cursor::Start, OutboundEvent::Disconnect { future: future.clone() });
        future
    }

    pub fn close(&self) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.send_outbound(Cursor::Start, OutboundEvent::Close { future: future.clone() });
        future
    }

    pub fn flush(&self) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.send_outbound(Cursor::Start, OutboundEvent::Flush { future: future.clone() });
        future
    }

    /// Adds `msg` to the last outbound container and flushes it.
    pub fn write<M: Any + Send>(&self, msg: M) -> ChannelFuture {
        self.write_boxed(Box::new(msg))
    }

    pub fn write_boxed(&self, msg: Message) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.write_from(Cursor::Start, msg, future.clone());
        future
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    /// Runs `f` now if on the loop thread, otherwise posts it to the loop.
    fn execute(&self, f: impl FnOnce(&ChannelPipeline) + Send + 'static) {
        let event_loop = self.event_loop();
        if event_loop.in_loop_thread() {
            f(self);
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        if let Err(cause) = event_loop.post(Box::new(move || f(&this))) {
            warn!("failed to hand an event over to the event loop: {}", cause);
        }
    }

    fn execute_or_fail(&self, future: ChannelFuture, f: impl FnOnce(&ChannelPipeline) + Send + 'static) {
        let event_loop = self.event_loop();
        if event_loop.in_loop_thread() {
            f(self);
            return;
        }
        let Some(this) = self.this.upgrade() else {
            future.set_failure(Error::Closed);
            return;
        };
        if let Err(cause) = event_loop.post(Box::new(move || f(&this))) {
            future.set_failure(cause);
        }
    }

    pub(crate) fn fire_inbound(&self, from: Cursor, event: InboundEvent) {
        self.execute(move |pipeline| pipeline.fire_inbound_now(from, event));
    }

    pub(crate) fn send_outbound(&self, from: Cursor, event: OutboundEvent) {
        let future = event.future().clone();
        self.execute_or_fail(future, move |pipeline| pipeline.send_outbound_now(from, event));
    }

    pub(crate) fn write_from(&self, from: Cursor, msg: Message, future: ChannelFuture) {
        self.execute_or_fail(future.clone(), move |pipeline| {
            pipeline.with_outbound_target(from, |buf| buf.add(msg));
            pipeline.send_outbound_now(from, OutboundEvent::Flush { future });
        });
    }

    pub(crate) fn with_inbound_target<R>(&self, from: Cursor, f: impl FnOnce(&mut MessageBuf) -> R) -> R {
        let target = self.chain.read().find_inbound(from, EventKind::MessageUpdated);
        match target {
            Some(ctx) => f(&mut ctx.inbound()),
            None => f(&mut self.tail_buffer.lock()),
        }
    }

    pub(crate) fn with_outbound_target<R>(&self, from: Cursor, f: impl FnOnce(&mut MessageBuf) -> R) -> R {
        let target = self.chain.read().find_outbound(from, EventKind::Flush);
        match target {
            Some(ctx) => f(&mut ctx.outbound()),
            None => f(&mut self.sink_buffer.lock()),
        }
    }

    fn fire_inbound_now(&self, from: Cursor, event: InboundEvent) {
        let kind = event.kind();
        let target = {
            let chain = self.chain.read();
            if matches!(from, Cursor::Start) && !chain.has_upstream() {
                drop(chain);
                warn!("pipeline contains no upstream handlers; discarding {}", kind);
                if kind == EventKind::MessageUpdated {
                    self.tail_buffer.lock().clear();
                }
                return;
            }
            chain.find_inbound(from, kind)
        };
        match target {
            Some(ctx) => self.invoke_inbound(&ctx, event),
            None => self.inbound_fell_off(event),
        }
    }

    fn inbound_fell_off(&self, event: InboundEvent) {
        match event {
            InboundEvent::ExceptionCaught(cause) => warn!(
                "an exception_caught event was fired, and it reached the end of the pipeline. \
                 It usually means the last handler in the pipeline did not handle the exception: {}",
                cause
            ),
            InboundEvent::MessageUpdated => {
                let mut tail = self.tail_buffer.lock();
                if !tail.is_empty() {
                    debug!(
                        "discarding {} bytes and {} messages that reached the end of the pipeline",
                        tail.bytes().readable_bytes(),
                        tail.len()
                    );
                    tail.clear();
                }
            }
            other => trace!("{} reached the end of the pipeline", other.kind()),
        }
    }

    fn invoke_inbound(&self, ctx: &Arc<ChannelHandlerContext>, event: InboundEvent) {
        let kind = event.kind();
        let handler = Arc::clone(ctx.handler());
        let outcome = guard(|| match event {
            InboundEvent::ChannelOpen => handler.channel_open(ctx),
            InboundEvent::ChannelActive => handler.channel_active(ctx),
            InboundEvent::ChannelInactive => handler.channel_inactive(ctx),
            InboundEvent::ExceptionCaught(cause) => handler.exception_caught(ctx, cause),
            InboundEvent::UserEventTriggered(event) => handler.user_event_triggered(ctx, event),
            InboundEvent::MessageUpdated => handler.message_updated(ctx),
        });
        if let Err(cause) = outcome {
            if kind == EventKind::MessageUpdated {
                ctx.discard_inbound_read_bytes();
            }
            self.notify_handler_failure(ctx, kind, cause);
        }
    }

    fn send_outbound_now(&self, from: Cursor, event: OutboundEvent) {
        let target = self.chain.read().find_outbound(from, event.kind());
        match target {
            Some(ctx) => self.invoke_outbound(&ctx, event),
            None => self.sink_event(event),
        }
    }

    fn invoke_outbound(&self, ctx: &Arc<ChannelHandlerContext>, event: OutboundEvent) {
        let kind = event.kind();
        let future = event.future().clone();
        let handler = Arc::clone(ctx.handler());
        let outcome = guard(|| match event {
            OutboundEvent::Bind { local, future } => handler.bind(ctx, local, future),
            OutboundEvent::Connect { remote, local, future } => handler.connect(ctx, remote, local, future),
            OutboundEvent::Disconnect { future } => handler.disconnect(ctx, future),
            OutboundEvent::Close { future } => handler.close(ctx, future),
            OutboundEvent::Flush { future } => handler.flush(ctx, future),
        });
        if let Err(cause) = outcome {
            if kind == EventKind::Flush {
                ctx.discard_outbound_read_bytes();
            }
            future.set_failure(cause.clone());
            self.notify_handler_failure(ctx, kind, cause);
        }
    }

    fn notify_handler_failure(&self, ctx: &Arc<ChannelHandlerContext>, kind: EventKind, cause: Error) {
        if kind == EventKind::ExceptionCaught {
            error!(
                "{} threw while handling exception_caught; not firing it again: {}",
                ctx.name(),
                cause
            );
            return;
        }
        let notification = Error::handler(kind, ctx.name(), cause);
        self.fire_inbound_now(Cursor::At(ctx.id()), InboundEvent::ExceptionCaught(notification));
    }

    fn sink_event(&self, event: OutboundEvent) {
        let sink = self.sink();
        let kind = event.kind();
        let future = event.future().clone();
        if let Err(cause) = guard(|| sink.event_sunk(self, event)) {
            future.set_failure(cause.clone());
            if let Err(cause) = guard(|| sink.exception_caught(self, cause)) {
                error!("sink failed to handle {}: {}", kind, cause);
                self.fire_inbound_now(Cursor::Start, InboundEvent::ExceptionCaught(cause));
            }
        }
    }
}

impl fmt::Debug for ChannelPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPipeline")
            .field("handlers", &self.names())
            .field("attached", &self.is_attached())
            .finish()
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::argument("handler name must not be empty"));
    }
    Ok(())
}

/// Runs `f`, turning a panic into an error.
fn guard(f: impl FnOnce() -> Result<()>) -> Result<()> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(Error::from_panic(payload)))
}

fn call_hook(
    ctx: &Arc<ChannelHandlerContext>,
    hook: impl FnOnce(&dyn ChannelHandler, &ChannelHandlerContext) -> Result<()>,
) -> Result<()> {
    guard(|| hook(ctx.handler().as_ref(), ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Named(EventSet);

    impl ChannelHandler for Named {
        fn events(&self) -> EventSet {
            self.0
        }
    }

    fn views(pipeline: &ChannelPipeline) -> (Vec<String>, Vec<String>) {
        let chain = pipeline.chain.read();
        (chain.upstream_names(), chain.downstream_names())
    }

    #[test]
    fn test_shortcut_views_follow_mutation() {
        let pipeline = ChannelPipeline::new();
        pipeline.add_last("a", Named(EventSet::INBOUND)).unwrap();
        pipeline.add_last("b", Named(EventSet::all())).unwrap();
        pipeline.add_last("c", Named(EventSet::OUTBOUND)).unwrap();
        pipeline.add_last("d", Named(EventSet::CHANNEL_OPEN)).unwrap();
        assert_eq!(views(&pipeline), (vec!["a".into(), "b".into(), "d".into()], vec!["c".into(), "b".into()]));

        pipeline.remove("b").unwrap();
        assert_eq!(views(&pipeline), (vec!["a".into(), "d".into()], vec!["c".into()]));

        pipeline.add_after("a", "e", Named(EventSet::FLUSH)).unwrap();
        assert_eq!(pipeline.names(), ["a", "e", "c", "d"]);
        assert_eq!(views(&pipeline), (vec!["a".into(), "d".into()], vec!["c".into(), "e".into()]));

        pipeline.replace("e", "f", Named(EventSet::MESSAGE_UPDATED)).unwrap();
        assert_eq!(views(&pipeline), (vec!["a".into(), "f".into(), "d".into()], vec!["c".into()]));

        for _ in 0..4 {
            pipeline.remove_first().unwrap();
        }
        assert!(pipeline.is_empty());
        assert_eq!(views(&pipeline), (vec![], vec![]));
        pipeline.fire_channel_open();
    }

    #[test]
    fn test_name_validation() {
        let pipeline = ChannelPipeline::new();
        assert!(matches!(pipeline.add_last("", Named(EventSet::INBOUND)), Err(Error::Argument(_))));
        pipeline.add_last("a", Named(EventSet::INBOUND)).unwrap();
        assert!(matches!(pipeline.add_first("a", Named(EventSet::INBOUND)), Err(Error::Argument(_))));
        assert!(matches!(
            pipeline.add_before("missing", "b", Named(EventSet::INBOUND)),
            Err(Error::NoSuchElement(_))
        ));
        assert!(matches!(pipeline.add_last("b", Named(EventSet::empty())), Err(Error::Argument(_))));
        assert!(matches!(pipeline.remove("b"), Err(Error::NoSuchElement(_))));
        assert_eq!(pipeline.names(), ["a"]);
    }

    #[test]
    fn test_lookup_by_type_and_instance() {
        let pipeline = ChannelPipeline::new();
        pipeline.add_last("a", Named(EventSet::INBOUND)).unwrap();
        let named = pipeline.get::<Named>().unwrap();
        assert_eq!(pipeline.context_of(&named).unwrap().name(), "a");
        assert!(pipeline.get_handler("a").is_some());
        assert!(pipeline.first().is_some());
        assert_eq!(pipeline.handles().len(), 1);

        pipeline.remove_handler(&named).unwrap();
        assert!(pipeline.get::<Named>().is_none());
        assert!(pipeline.remove_last().is_err());
    }

    #[test]
    fn test_message_updated_waits_for_activation() {
        struct Count(Arc<AtomicUsize>);
        impl ChannelHandler for Count {
            fn events(&self) -> EventSet {
                EventSet::MESSAGE_UPDATED
            }
            fn message_updated(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let pipeline = ChannelPipeline::new();
        pipeline.add_last("count", Count(count.clone())).unwrap();
        pipeline.fire_message_updated();
        pipeline.fire_channel_active();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        pipeline.fire_channel_open();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        pipeline.fire_message_updated();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
