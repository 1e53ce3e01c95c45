use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::attachment::Attachments;
use crate::channel::{Channel, OutboundEvent};
use crate::error::{Error, Result};
use crate::event::EventSet;
use crate::event_loop::{EventLoop, InlineEventLoop};
use crate::future::ChannelFuture;
use crate::handler::{ChannelHandler, UserEvent};
use crate::message::{Message, MessageBuf};
use crate::pipeline::ChannelPipeline;
use crate::pipeline_internal::{ContextId, Cursor, InboundEvent};

/// The binding of one handler into one pipeline.
///
/// A context is what a handler sees of the pipeline: it forwards events to the
/// neighbouring handlers, owns the handler's inbound and outbound containers and
/// reaches the channel the pipeline is attached to. Contexts are created by the
/// pipeline's mutation methods and stay valid (but inert) after removal.
pub struct ChannelHandlerContext {
    id: ContextId,
    name: String,
    handler: Arc<dyn ChannelHandler>,
    handler_any: Arc<dyn Any + Send + Sync>,
    handler_type: &'static str,
    events: EventSet,
    pipeline: Weak<ChannelPipeline>,
    inbound: Mutex<MessageBuf>,
    outbound: Mutex<MessageBuf>,
    attachments: Attachments,
    removed: AtomicBool,
}

impl ChannelHandlerContext {
    pub(crate) fn new<H: ChannelHandler>(
        id: ContextId,
        name: &str,
        handler: H,
        pipeline: Weak<ChannelPipeline>,
    ) -> Result<Arc<Self>> {
        let handler_type = std::any::type_name::<H>();
        let events = handler.events();
        if !events.is_inbound() && !events.is_outbound() {
            return Err(Error::argument(format!(
                "{} handles neither inbound nor outbound events",
                handler_type
            )));
        }

        let handler = Arc::new(handler);
        Ok(Arc::new(Self {
            id,
            name: name.to_owned(),
            handler: Arc::clone(&handler) as Arc<dyn ChannelHandler>,
            handler_any: handler,
            handler_type,
            events,
            pipeline,
            inbound: Mutex::new(MessageBuf::new()),
            outbound: Mutex::new(MessageBuf::new()),
            attachments: Attachments::default(),
            removed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn handler_any(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.handler_any
    }

    pub(crate) fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Arc<dyn ChannelHandler> {
        &self.handler
    }

    /// The handler as its concrete type.
    pub fn handler_as<H: ChannelHandler>(&self) -> Option<Arc<H>> {
        Arc::clone(&self.handler_any).downcast::<H>().ok()
    }

    pub fn events(&self) -> EventSet {
        self.events
    }

    pub fn can_handle_inbound(&self) -> bool {
        self.events.is_inbound()
    }

    pub fn can_handle_outbound(&self) -> bool {
        self.events.is_outbound()
    }

    /// True once the context has been unlinked from its pipeline.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn pipeline(&self) -> Option<Arc<ChannelPipeline>> {
        self.pipeline.upgrade()
    }

    /// The channel the pipeline is attached to.
    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.pipeline()?.channel()
    }

    pub fn event_loop(&self) -> Arc<dyn EventLoop> {
        match self.pipeline() {
            Some(pipeline) => pipeline.event_loop(),
            None => Arc::new(InlineEventLoop),
        }
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    /// This handler's inbound container.
    ///
    /// The guard is not reentrant. Drop it before firing events, issuing
    /// outbound requests or calling [`forward_inbound`](Self::forward_inbound),
    /// since any of them may come back to this context and lock it again.
    pub fn inbound(&self) -> MutexGuard<'_, MessageBuf> {
        self.inbound.lock()
    }

    /// This handler's outbound container.
    ///
    /// Same rule as [`inbound`](Self::inbound): release the guard before
    /// `flush`, `write`, `close` or [`forward_outbound`](Self::forward_outbound).
    pub fn outbound(&self) -> MutexGuard<'_, MessageBuf> {
        self.outbound.lock()
    }

    /// Runs `f` on the inbound container of the next handler interested in
    /// `message_updated`, or on the pipeline's tail buffer if there is none.
    pub fn with_next_inbound<R>(&self, f: impl FnOnce(&mut MessageBuf) -> R) -> R {
        match self.pipeline() {
            Some(pipeline) => pipeline.with_inbound_target(Cursor::After(self.id), f),
            None => f(&mut MessageBuf::new()),
        }
    }

    /// Runs `f` on the outbound container of the next handler interested in
    /// `flush`, or on the pipeline's sink buffer if there is none.
    pub fn with_next_outbound<R>(&self, f: impl FnOnce(&mut MessageBuf) -> R) -> R {
        match self.pipeline() {
            Some(pipeline) => pipeline.with_outbound_target(Cursor::After(self.id), f),
            None => f(&mut MessageBuf::new()),
        }
    }

    /// Moves everything in this context's inbound container to the next one.
    pub fn forward_inbound(&self) {
        let mut own = self.inbound.lock();
        if !own.is_empty() {
            self.with_next_inbound(|next| own.transfer_to(next));
        }
    }

    /// Moves everything in this context's outbound container to the next one.
    pub fn forward_outbound(&self) {
        let mut own = self.outbound.lock();
        if !own.is_empty() {
            self.with_next_outbound(|next| own.transfer_to(next));
        }
    }

    pub(crate) fn discard_inbound_read_bytes(&self) {
        self.inbound.lock().discard_read_bytes();
    }

    pub(crate) fn discard_outbound_read_bytes(&self) {
        self.outbound.lock().discard_read_bytes();
    }

    pub fn fire_channel_open(&self) {
        self.fire(InboundEvent::ChannelOpen);
    }

    pub fn fire_channel_active(&self) {
        self.fire(InboundEvent::ChannelActive);
    }

    pub fn fire_channel_inactive(&self) {
        self.fire(InboundEvent::ChannelInactive);
    }

    pub fn fire_exception_caught(&self, cause: Error) {
        self.fire(InboundEvent::ExceptionCaught(cause));
    }

    pub fn fire_user_event_triggered<E: Any + Send>(&self, event: E) {
        self.fire_user_event_triggered_boxed(Box::new(event));
    }

    pub fn fire_user_event_triggered_boxed(&self, event: UserEvent) {
        self.fire(InboundEvent::UserEventTriggered(event));
    }

    pub fn fire_message_updated(&self) {
        self.fire(InboundEvent::MessageUpdated);
    }

    fn fire(&self, event: InboundEvent) {
        if self.is_removed() {
            debug!("{} was removed from its pipeline; dropping {}", self.name, event.kind());
            return;
        }
        match self.pipeline() {
            Some(pipeline) => pipeline.fire_inbound(Cursor::After(self.id), event),
            None => debug!("{} outlived its pipeline; dropping {}", self.name, event.kind()),
        }
    }

    pub fn bind(&self, local: SocketAddr) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.bind_with(local, future.clone());
        future
    }

    pub fn bind_with(&self, local: SocketAddr, future: ChannelFuture) {
        self.request(OutboundEvent::Bind { local, future });
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.connect_with(remote, local, future.clone());
        future
    }

    pub fn connect_with(&self, remote: SocketAddr, local: Option<SocketAddr>, future: ChannelFuture) {
        self.request(OutboundEvent::Connect {
            remote,
            local,
            future,
        });
    }

    pub fn disconnect(&self) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.disconnect_with(future.clone());
        future
    }

    pub fn disconnect_with(&self, future: ChannelFuture) {
        self.request(OutboundEvent::Disconnect { future });
    }

    pub fn close(&self) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.close_with(future.clone());
        future
    }

    pub fn close_with(&self, future: ChannelFuture) {
        self.request(OutboundEvent::Close { future });
    }

    pub fn flush(&self) -> ChannelFuture {
        let future = ChannelFuture::new();
        self.flush_with(future.clone());
        future
    }

    pub fn flush_with(&self, future: ChannelFuture) {
        self.request(OutboundEvent::Flush { future });
    }

    /// Puts `msg` into the next outbound container and flushes it.
    pub fn write<M: Any + Send>(&self, msg: M) -> ChannelFuture {
        self.write_boxed(Box::new(msg))
    }

    pub fn write_boxed(&self, msg: Message) -> ChannelFuture {
        let future = ChannelFuture::new();
        match self.live_pipeline() {
            Ok(pipeline) => pipeline.write_from(Cursor::After(self.id), msg, future.clone()),
            Err(cause) => {
                future.set_failure(cause);
            }
        }
        future
    }

    fn request(&self, event: OutboundEvent) {
        match self.live_pipeline() {
            Ok(pipeline) => pipeline.send_outbound(Cursor::After(self.id), event),
            Err(cause) => {
                event.future().set_failure(cause);
            }
        }
    }

    fn live_pipeline(&self) -> Result<Arc<ChannelPipeline>> {
        if self.is_removed() {
            return Err(Error::illegal_state(format!(
                "{} was removed from its pipeline",
                self.name
            )));
        }
        self.pipeline()
            .ok_or_else(|| Error::illegal_state(format!("{} outlived its pipeline", self.name)))
    }
}

impl fmt::Debug for ChannelHandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandlerContext")
            .field("name", &self.name)
            .field("handler", &self.handler_type)
            .field("events", &self.events)
            .field("removed", &self.is_removed())
            .finish()
    }
}
