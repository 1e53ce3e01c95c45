//! A channel without a transport, for driving pipelines in tests.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::ChannelBuffer;
use crate::channel::{Channel, ChannelSink, OutboundEvent};
use crate::context::ChannelHandlerContext;
use crate::error::{Error, Result};
use crate::event::{EventKind, EventSet};
use crate::event_loop::{EventLoop, InlineEventLoop};
use crate::future::ChannelFuture;
use crate::handler::{ChannelHandler, UserEvent};
use crate::message::MessageBuf;
use crate::pipeline::ChannelPipeline;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Name of the collecting handler appended to every embedded pipeline.
pub const LAST_INBOUND_HANDLER: &str = "embedded-last-inbound";

#[derive(Default)]
struct State {
    open: AtomicBool,
    active: AtomicBool,
    inbound: Mutex<MessageBuf>,
    outbound: Mutex<MessageBuf>,
    exceptions: Mutex<Vec<Error>>,
    user_events: Mutex<Vec<UserEvent>>,
    sunk: Mutex<Vec<EventKind>>,
    local: Mutex<Option<SocketAddr>>,
    remote: Mutex<Option<SocketAddr>>,
}

/// Collects whatever reaches the end of the inbound chain.
struct LastInbound(Arc<State>);

impl ChannelHandler for LastInbound {
    fn events(&self) -> EventSet {
        EventSet::INBOUND
    }

    fn channel_open(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    fn channel_active(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    fn channel_inactive(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    fn exception_caught(&self, _ctx: &ChannelHandlerContext, cause: Error) -> Result<()> {
        self.0.exceptions.lock().push(cause);
        Ok(())
    }

    fn user_event_triggered(&self, _ctx: &ChannelHandlerContext, event: UserEvent) -> Result<()> {
        self.0.user_events.lock().push(event);
        Ok(())
    }

    fn message_updated(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.inbound().transfer_to(&mut self.0.inbound.lock());
        Ok(())
    }
}

/// Performs every outbound request immediately and keeps flushed data.
struct EmbeddedSink(Arc<State>);

impl ChannelSink for EmbeddedSink {
    fn event_sunk(&self, pipeline: &ChannelPipeline, event: OutboundEvent) -> Result<()> {
        self.0.sunk.lock().push(event.kind());
        match event {
            OutboundEvent::Bind { local, future } => {
                *self.0.local.lock() = Some(local);
                future.set_success();
            }
            OutboundEvent::Connect { remote, local, future } => {
                *self.0.remote.lock() = Some(remote);
                if local.is_some() {
                    *self.0.local.lock() = local;
                }
                future.set_success();
            }
            OutboundEvent::Disconnect { future } | OutboundEvent::Close { future } => {
                let was_active = self.0.active.swap(false, Ordering::AcqRel);
                self.0.open.store(false, Ordering::Release);
                future.set_success();
                if was_active {
                    pipeline.fire_channel_inactive();
                }
            }
            OutboundEvent::Flush { future } => {
                pipeline.sink_buffer().transfer_to(&mut self.0.outbound.lock());
                future.set_success();
            }
        }
        Ok(())
    }
}

/// A [`Channel`] whose transport is the test itself.
///
/// Creating one appends a collecting handler to the pipeline, attaches it and
/// fires `channel_open` and `channel_active`. Inbound data is fed with
/// [`write_inbound`](Self::write_inbound); whatever reaches the end of the
/// pipeline can be read back with the `read_inbound*` methods, and whatever is
/// flushed to the sink with the `read_outbound*` methods.
///
/// ```rust
/// use rivet::{ChannelPipeline, EmbeddedChannel};
///
/// let channel = EmbeddedChannel::new(ChannelPipeline::new()).unwrap();
/// channel.write_outbound(String::from("ping")).wait().unwrap();
/// assert_eq!(channel.read_outbound::<String>().as_deref(), Some("ping"));
/// ```
pub struct EmbeddedChannel {
    id: u64,
    pipeline: Arc<ChannelPipeline>,
    event_loop: Arc<dyn EventLoop>,
    state: Arc<State>,
}

impl EmbeddedChannel {
    pub fn new(pipeline: Arc<ChannelPipeline>) -> Result<Arc<Self>> {
        Self::with_event_loop(pipeline, Arc::new(InlineEventLoop))
    }

    pub fn with_event_loop(pipeline: Arc<ChannelPipeline>, event_loop: Arc<dyn EventLoop>) -> Result<Arc<Self>> {
        let state = Arc::new(State::default());
        state.open.store(true, Ordering::Release);
        state.active.store(true, Ordering::Release);
        pipeline.add_last(LAST_INBOUND_HANDLER, LastInbound(Arc::clone(&state)))?;

        let channel = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            pipeline: Arc::clone(&pipeline),
            event_loop,
            state: Arc::clone(&state),
        });
        let as_channel: Arc<dyn Channel> = channel.clone();
        pipeline.attach(&as_channel, Arc::new(EmbeddedSink(state)))?;
        pipeline.fire_channel_open();
        pipeline.fire_channel_active();
        Ok(channel)
    }

    /// Feeds `msg` into the pipeline and fires `message_updated`.
    pub fn write_inbound<M: Any + Send>(&self, msg: M) {
        self.pipeline.write_inbound(msg);
        self.pipeline.fire_message_updated();
    }

    /// Writes `msg` at the tail of the pipeline.
    pub fn write_outbound<M: Any + Send>(&self, msg: M) -> ChannelFuture {
        self.pipeline.write(msg)
    }

    pub fn read_inbound<M: Any>(&self) -> Option<M> {
        self.state.inbound.lock().pop_as::<M>()
    }

    /// Takes all bytes that reached the end of the inbound chain.
    pub fn read_inbound_bytes(&self) -> ChannelBuffer {
        take_bytes(&mut self.state.inbound.lock())
    }

    pub fn read_outbound<M: Any>(&self) -> Option<M> {
        self.state.outbound.lock().pop_as::<M>()
    }

    /// Takes all bytes flushed to the sink.
    pub fn read_outbound_bytes(&self) -> ChannelBuffer {
        take_bytes(&mut self.state.outbound.lock())
    }

    /// Errors that reached the end of the pipeline, oldest first.
    pub fn take_exceptions(&self) -> Vec<Error> {
        std::mem::take(&mut *self.state.exceptions.lock())
    }

    /// Fails with the first error that reached the end of the pipeline, if any.
    pub fn check_exception(&self) -> Result<()> {
        match self.take_exceptions().into_iter().next() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    pub fn take_user_events(&self) -> Vec<UserEvent> {
        std::mem::take(&mut *self.state.user_events.lock())
    }

    /// Kinds of the outbound requests that reached the sink, oldest first.
    pub fn sunk_events(&self) -> Vec<EventKind> {
        self.state.sunk.lock().clone()
    }

    /// Closes the channel. True if anything is left to read in either direction.
    pub fn finish(&self) -> bool {
        self.pipeline.close();
        !self.state.inbound.lock().is_empty() || !self.state.outbound.lock().is_empty()
    }
}

fn take_bytes(buf: &mut MessageBuf) -> ChannelBuffer {
    let bytes = buf.bytes_mut();
    let taken = bytes.read_bytes(bytes.readable_bytes()).unwrap_or_default();
    bytes.discard_read_bytes();
    taken
}

impl Channel for EmbeddedChannel {
    fn id(&self) -> u64 {
        self.id
    }

    fn pipeline(&self) -> &Arc<ChannelPipeline> {
        &self.pipeline
    }

    fn event_loop(&self) -> Arc<dyn EventLoop> {
        Arc::clone(&self.event_loop)
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }

    fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }

    fn local_address(&self) -> Option<SocketAddr> {
        *self.state.local.lock()
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        *self.state.remote.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ByteOrder, copied_slice};

    #[test]
    fn test_bytes_pass_through_empty_pipeline() {
        let channel = EmbeddedChannel::new(ChannelPipeline::new()).unwrap();
        channel.write_inbound(copied_slice(ByteOrder::BigEndian, b"abc"));
        assert_eq!(channel.read_inbound_bytes().to_vec(), b"abc");

        channel.write_outbound(copied_slice(ByteOrder::BigEndian, b"xyz")).wait().unwrap();
        assert_eq!(channel.read_outbound_bytes().to_vec(), b"xyz");
        assert_eq!(channel.sunk_events(), [EventKind::Flush]);
    }

    #[test]
    fn test_close_fires_inactive_once() {
        let channel = EmbeddedChannel::new(ChannelPipeline::new()).unwrap();
        assert!(channel.is_active());
        assert!(!channel.finish());
        assert!(!channel.is_open());
        channel.close().wait().unwrap();
        assert_eq!(channel.sunk_events(), [EventKind::Close, EventKind::Close]);
    }

    #[test]
    fn test_bind_records_address() {
        let channel = EmbeddedChannel::new(ChannelPipeline::new()).unwrap();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        channel.pipeline().bind(addr).wait().unwrap();
        assert_eq!(channel.local_address(), Some(addr));
    }
}
