//! # Rivet - Channel Pipelines and Buffers
//!
//! `rivet` is the core of an event-driven networking framework in the style of
//! [Netty](https://netty.io): every connection owns a [`ChannelPipeline`], an
//! ordered chain of [`ChannelHandler`]s that process inbound events and
//! outbound requests, and every byte moving through a pipeline lives in a
//! [`ChannelBuffer`].
//!
//! ## Core Concepts
//!
//! ### ChannelBuffer
//!
//! A growable, index-tracked byte container with separate reader and writer
//! cursors, zero-copy slices and composite views. See the [`buffer`] module.
//!
//! ### Pipeline
//!
//! The [`ChannelPipeline`] owns one [`ChannelHandlerContext`] per handler and
//! keeps two filtered views of that chain, one over the inbound-capable
//! contexts and one over the outbound-capable ones, so dispatch only ever
//! visits contexts that care about the event.
//!
//! ### Handler
//!
//! A [`ChannelHandler`] declares the [`EventSet`] it implements and overrides
//! the matching callbacks. Each context owns an inbound and an outbound
//! [`MessageBuf`]; handlers move data into the next context's container and
//! fire `message_updated` (inbound) or `flush` (outbound).
//!
//! ### Channel, Sink and Event Loop
//!
//! A pipeline is attached to a [`Channel`] and a [`ChannelSink`]. The sink
//! performs the outbound requests that travel past the last handler. All
//! handler callbacks run on the channel's [`EventLoop`]; events injected from
//! other threads are posted there.
//!
//! ## Event Flow
//!
//! ```text
//!                                                   | write() / close() / ...
//!   +-----------------------------------------------+-------------------+
//!   |                      ChannelPipeline          |                   |
//!   |                                              \|/                  |
//!   |    +----------+-----------------------+-------+--------------+    |
//!   |    |               Handler N (context N)                     |    |
//!   |    +----------+-----------------------+-------+--------------+    |
//!   |              /|\                              |                   |
//!   |               |                               | ctx.flush()       |
//!   |  ctx.fire_message_updated()                   |                   |
//!   |               |                              \|/                  |
//!   |    +----------+-----------------------+-------+--------------+    |
//!   |    |               Handler 1 (context 1)                     |    |
//!   |    +----------+-----------------------+-------+--------------+    |
//!   |              /|\                              |                   |
//!   +---------------+-------------------------------+-------------------+
//!                   | fire_message_updated()        | event_sunk()
//!                   |                              \|/
//!   +---------------+-------------------------------+-------------------+
//!   |                 Transport (Channel + ChannelSink)                 |
//!   +-------------------------------------------------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust
//! use rivet::{ChannelHandler, ChannelHandlerContext, ChannelPipeline, EmbeddedChannel, EventSet, Result};
//!
//! struct Echo;
//!
//! impl ChannelHandler for Echo {
//!     fn events(&self) -> EventSet {
//!         EventSet::MESSAGE_UPDATED
//!     }
//!
//!     fn message_updated(&self, ctx: &ChannelHandlerContext) -> Result<()> {
//!         let msgs: Vec<_> = ctx.inbound().drain().collect();
//!         for msg in msgs {
//!             ctx.write_boxed(msg);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let pipeline = ChannelPipeline::new();
//! pipeline.add_last("echo", Echo).unwrap();
//! let channel = EmbeddedChannel::new(pipeline).unwrap();
//! channel.write_inbound(String::from("hello"));
//! assert_eq!(channel.read_outbound::<String>().as_deref(), Some("hello"));
//! ```

#![warn(rust_2018_idioms)]

// ========================================
// Module Declarations
// ========================================

/// Index-tracked byte buffers and their factories
pub mod buffer;

pub(crate) mod attachment;
pub(crate) mod channel;
pub(crate) mod context;
pub(crate) mod embedded;
pub(crate) mod error;
pub(crate) mod event;
pub(crate) mod event_loop;
pub(crate) mod future;
pub(crate) mod handler;
pub(crate) mod message;
pub(crate) mod pipeline;

/// Internal chain bookkeeping (not part of public API)
pub(crate) mod pipeline_internal;

// ========================================
// Public Exports
// ========================================

pub use attachment::Attachments;
pub use buffer::{ByteOrder, ChannelBuffer};
pub use channel::{Channel, ChannelSink, DiscardingSink, OutboundEvent};
pub use context::ChannelHandlerContext;
pub use embedded::{EmbeddedChannel, LAST_INBOUND_HANDLER};
pub use error::{Error, Result};
pub use event::{EventKind, EventSet};
pub use event_loop::{EventLoop, EventLoopPool, InlineEventLoop, Task};
pub use future::{ChannelFuture, close_on_complete, close_on_failure};
pub use handler::{ChannelHandler, UserEvent};
pub use message::{Message, MessageBuf};
pub use pipeline::ChannelPipeline;
