//! Channels and the sinks that carry outbound requests to the transport.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use log::error;

use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::event_loop::EventLoop;
use crate::future::ChannelFuture;
use crate::message::Message;
use crate::pipeline::ChannelPipeline;

/// A transport endpoint with a pipeline attached.
///
/// The channel owns its pipeline; the pipeline only keeps a weak reference back.
pub trait Channel: Send + Sync + 'static {
    fn id(&self) -> u64;

    fn pipeline(&self) -> &Arc<ChannelPipeline>;

    /// The loop all of this channel's events run on.
    fn event_loop(&self) -> Arc<dyn EventLoop>;

    fn is_open(&self) -> bool;

    fn is_active(&self) -> bool;

    /// False while the transport wants producers to back off.
    fn is_writable(&self) -> bool {
        self.is_active()
    }

    fn local_address(&self) -> Option<SocketAddr>;

    fn remote_address(&self) -> Option<SocketAddr>;

    /// The channel that accepted this one, if any.
    fn parent(&self) -> Option<Arc<dyn Channel>> {
        None
    }

    fn write(&self, msg: Message) -> ChannelFuture {
        self.pipeline().write_boxed(msg)
    }

    fn flush(&self) -> ChannelFuture {
        self.pipeline().flush()
    }

    fn close(&self) -> ChannelFuture {
        self.pipeline().close()
    }
}

/// An outbound request that travelled past the last handler.
pub enum OutboundEvent {
    Bind {
        local: SocketAddr,
        future: ChannelFuture,
    },
    Connect {
        remote: SocketAddr,
        local: Option<SocketAddr>,
        future: ChannelFuture,
    },
    Disconnect {
        future: ChannelFuture,
    },
    Close {
        future: ChannelFuture,
    },
    /// Move the pipeline's sink buffer to the transport.
    Flush {
        future: ChannelFuture,
    },
}

impl OutboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            OutboundEvent::Bind { .. } => EventKind::Bind,
            OutboundEvent::Connect { .. } => EventKind::Connect,
            OutboundEvent::Disconnect { .. } => EventKind::Disconnect,
            OutboundEvent::Close { .. } => EventKind::Close,
            OutboundEvent::Flush { .. } => EventKind::Flush,
        }
    }

    pub fn future(&self) -> &ChannelFuture {
        match self {
            OutboundEvent::Bind { future, .. }
            | OutboundEvent::Connect { future, .. }
            | OutboundEvent::Disconnect { future }
            | OutboundEvent::Close { future }
            | OutboundEvent::Flush { future } => future,
        }
    }
}

impl fmt::Debug for OutboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundEvent::Bind { local, .. } => write!(f, "bind({})", local),
            OutboundEvent::Connect { remote, local, .. } => match local {
                Some(local) => write!(f, "connect({}, {})", remote, local),
                None => write!(f, "connect({})", remote),
            },
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// The transport end of a pipeline.
pub trait ChannelSink: Send + Sync + 'static {
    /// Performs an outbound request. An error fails the request's future and is
    /// then passed to [`ChannelSink::exception_caught`].
    fn event_sunk(&self, pipeline: &ChannelPipeline, event: OutboundEvent) -> Result<()>;

    /// Handles a failure of [`ChannelSink::event_sunk`].
    ///
    /// The default fires it as `exception_caught` through the pipeline. Returning
    /// an error hands it back to the pipeline, which fires it itself.
    fn exception_caught(&self, pipeline: &ChannelPipeline, cause: Error) -> Result<()> {
        pipeline.fire_exception_caught(cause);
        Ok(())
    }
}

/// The sink of a pipeline that is not attached to a channel.
///
/// Every request fails with [`Error::NoHandler`]; data queued for the sink is
/// dropped along with it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardingSink;

impl ChannelSink for DiscardingSink {
    fn event_sunk(&self, pipeline: &ChannelPipeline, event: OutboundEvent) -> Result<()> {
        let kind = event.kind();
        pipeline.sink_buffer().clear();
        error!("has no handler to handle to {}: the pipeline is not attached to a channel", kind);
        event.future().set_failure(Error::NoHandler(kind.to_string()));
        Ok(())
    }

    fn exception_caught(&self, _pipeline: &ChannelPipeline, cause: Error) -> Result<()> {
        Err(cause)
    }
}
