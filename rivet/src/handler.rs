//! # ChannelHandler - Event Processing Units
//!
//! A [`ChannelHandler`] sits in a [`ChannelPipeline`](crate::ChannelPipeline) and
//! reacts to the events routed through it. Every handler declares up front which
//! event kinds it implements via [`ChannelHandler::events`]; the pipeline derives
//! the context's capabilities from that set once and never asks again, so a
//! handler that leaves an event out of its set is skipped for that event even if
//! it overrides the callback.
//!
//! ## Directions
//!
//! ```text
//!                        ChannelPipeline
//!   +--------------------------------------------------------+
//!   |  inbound:   head ---> [A] ---> [B] ---> ...  ---> end   |
//!   |  outbound:  sink <--- [A] <--- [B] <--- ...  <--- tail  |
//!   +--------------------------------------------------------+
//! ```
//!
//! Inbound events (`channel_open`, `channel_active`, `channel_inactive`,
//! `exception_caught`, `user_event_triggered`, `message_updated`) flow from the
//! head towards the end of the pipeline. Outbound requests (`bind`, `connect`,
//! `disconnect`, `close`, `flush`) flow from the tail to the
//! [`ChannelSink`](crate::ChannelSink) and each carries a
//! [`ChannelFuture`](crate::ChannelFuture).
//!
//! ## Forwarding
//!
//! Every callback has a default body that passes the event along unchanged, so a
//! handler only writes the callbacks it cares about. Returning an error (or
//! panicking) never reaches whoever injected the event: the pipeline turns it
//! into an `exception_caught` event instead, and fails the future of a failed
//! outbound request.
//!
//! ## Example: Upper-Casing Relay
//!
//! ```rust
//! use rivet::{ChannelHandler, ChannelHandlerContext, ChannelPipeline, EventSet, Result};
//!
//! struct UpperCase;
//!
//! impl ChannelHandler for UpperCase {
//!     fn events(&self) -> EventSet {
//!         EventSet::MESSAGE_UPDATED
//!     }
//!
//!     fn message_updated(&self, ctx: &ChannelHandlerContext) -> Result<()> {
//!         let mut inbound = ctx.inbound();
//!         while let Some(line) = inbound.pop_as::<String>() {
//!             ctx.with_next_inbound(|next| next.push(line.to_uppercase()));
//!         }
//!         drop(inbound);
//!         ctx.fire_message_updated();
//!         Ok(())
//!     }
//! }
//!
//! let pipeline = ChannelPipeline::new();
//! pipeline.add_last("upper", UpperCase).unwrap();
//! ```

use std::any::Any;
use std::net::SocketAddr;

use crate::context::ChannelHandlerContext;
use crate::error::{Error, Result};
use crate::event::EventSet;
use crate::future::ChannelFuture;

/// Payload of a `user_event_triggered` event.
pub type UserEvent = Box<dyn Any + Send>;

/// A processor of pipeline events.
///
/// Handlers are shared with the pipeline behind an `Arc` and called through
/// `&self`; keep mutable state behind a lock or atomics.
#[allow(unused_variables)]
pub trait ChannelHandler: Send + Sync + 'static {
    /// The event kinds this handler implements. Must not be empty.
    fn events(&self) -> EventSet;

    /// Called before the handler is linked into a pipeline. An error cancels the add.
    fn before_add(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    /// Called after the handler was linked. An error removes it again.
    fn after_add(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    /// Called before the handler is unlinked. An error cancels the removal.
    fn before_remove(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    /// Called after the handler was unlinked.
    fn after_remove(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    fn channel_open(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_open();
        Ok(())
    }

    fn channel_active(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_active();
        Ok(())
    }

    fn channel_inactive(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_inactive();
        Ok(())
    }

    fn exception_caught(&self, ctx: &ChannelHandlerContext, cause: Error) -> Result<()> {
        ctx.fire_exception_caught(cause);
        Ok(())
    }

    fn user_event_triggered(&self, ctx: &ChannelHandlerContext, event: UserEvent) -> Result<()> {
        ctx.fire_user_event_triggered_boxed(event);
        Ok(())
    }

    /// The context's inbound container changed.
    ///
    /// The default moves everything to the next inbound container and passes the event on.
    fn message_updated(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.forward_inbound();
        ctx.fire_message_updated();
        Ok(())
    }

    fn bind(&self, ctx: &ChannelHandlerContext, local: SocketAddr, future: ChannelFuture) -> Result<()> {
        ctx.bind_with(local, future);
        Ok(())
    }

    fn connect(
        &self,
        ctx: &ChannelHandlerContext,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        future: ChannelFuture,
    ) -> Result<()> {
        ctx.connect_with(remote, local, future);
        Ok(())
    }

    fn disconnect(&self, ctx: &ChannelHandlerContext, future: ChannelFuture) -> Result<()> {
        ctx.disconnect_with(future);
        Ok(())
    }

    fn close(&self, ctx: &ChannelHandlerContext, future: ChannelFuture) -> Result<()> {
        ctx.close_with(future);
        Ok(())
    }

    /// The context's outbound container has data to move towards the sink.
    ///
    /// The default moves everything to the next outbound container and passes the request on.
    fn flush(&self, ctx: &ChannelHandlerContext, future: ChannelFuture) -> Result<()> {
        ctx.forward_outbound();
        ctx.flush_with(future);
        Ok(())
    }
}
