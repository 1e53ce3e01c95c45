//! # Rivet Executor - Event Loops for Rivet Pipelines
//!
//! Concrete [`rivet::EventLoop`] implementations backed by tokio.
//!
//! - [`SingleThreadEventLoop`]: one thread, one current-thread tokio runtime,
//!   one `LocalSet`, and an unbounded queue of posted tasks.
//! - [`EventLoopGroup`]: a fixed set of loops handed out round robin, with an
//!   optional one-loop-per-core pinning.
//! - [`LocalExecutorBuilder`], [`spawn_local`] and [`yield_local`]: the local
//!   executor every loop thread runs, usable on its own.
//!
//! ```rust,no_run
//! use rivet::EventLoop;
//! use rivet_executor::EventLoopGroup;
//!
//! let group = EventLoopGroup::builder().threads(2).build().unwrap();
//! let event_loop = group.next();
//! event_loop.post(Box::new(|| println!("on the loop"))).unwrap();
//! group.shutdown_gracefully();
//! ```

#![warn(rust_2018_idioms)]

mod event_loop;
mod group;
mod runtime;

pub use event_loop::SingleThreadEventLoop;
pub use group::{EventLoopGroup, EventLoopGroupBuilder};
pub use runtime::{LocalExecutorBuilder, Task, TaskError, in_local_executor, spawn_local, yield_local};

/// Re-export of the core id type accepted by [`LocalExecutorBuilder::core_id`].
pub use core_affinity::CoreId;
