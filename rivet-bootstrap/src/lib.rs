//! # Rivet Bootstrap - TCP Servers and Clients
//!
//! Wires [`rivet`] pipelines to tokio TCP sockets running on the loops of a
//! [`rivet_executor::EventLoopGroup`].
//!
//! - [`ServerBootstrap`]: accepts connections on one loop and hands every
//!   accepted socket to the next loop of the group
//! - [`ClientBootstrap`]: connects and returns the resulting channel
//!
//! Every connection gets a fresh pipeline from the configured factory, a
//! [`TcpChannel`] and a sink writing flushed bytes to the socket. The pipeline
//! sees `channel_open` and `channel_active` once the socket is set up,
//! `message_updated` for every read, and `channel_inactive` once the socket is
//! gone.
//!
//! ```rust,no_run
//! use rivet::ChannelPipeline;
//! use rivet_bootstrap::ServerBootstrap;
//! use rivet_codec::{ByteToMessageCodec, LineBasedFrameDecoder, StringCodec, TerminatorType};
//! use rivet_executor::{EventLoopGroup, LocalExecutorBuilder};
//!
//! let group = EventLoopGroup::builder().threads(2).build().unwrap();
//! let mut server = ServerBootstrap::new(group.clone());
//! server.pipeline(|_local, _peer| {
//!     let pipeline = ChannelPipeline::new();
//!     pipeline.add_last(
//!         "framer",
//!         ByteToMessageCodec::new(LineBasedFrameDecoder::new(8192, true, TerminatorType::Both)),
//!     )?;
//!     pipeline.add_last("string", StringCodec::new())?;
//!     Ok(pipeline)
//! });
//!
//! LocalExecutorBuilder::default().run(async move {
//!     let addr = server.bind("127.0.0.1:0").await.unwrap();
//!     println!("listening on {}", addr);
//!     server.graceful_stop().await;
//! }).unwrap();
//! ```

#![warn(rust_2018_idioms)]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use rivet::ChannelPipeline;
use rivet_executor::EventLoopGroup;
use tokio::sync::broadcast;
use wg::AsyncWaitGroup;

mod bootstrap_tcp;

pub use bootstrap_tcp::bootstrap_tcp_client::ClientBootstrap;
pub use bootstrap_tcp::bootstrap_tcp_server::ServerBootstrap;
pub use bootstrap_tcp::{TcpChannel, TcpSink};

/// Creates the pipeline of a new connection from its local and peer address.
///
/// Runs on the event loop that will own the connection.
pub type PipelineFactoryFn =
    Arc<dyn Fn(SocketAddr, SocketAddr) -> rivet::Result<Arc<ChannelPipeline>> + Send + Sync>;

/// Typical internet MTU = 1500, rounded up to a power of 2
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

struct Bootstrap {
    group: Arc<EventLoopGroup>,
    read_buffer_size: usize,
    pipeline_factory_fn: Option<PipelineFactoryFn>,
    lifecycle: Mutex<Lifecycle>,
}

/// Where the listener and connections of a bootstrap are in their life.
///
/// A stop hands the wait group over to `Stopping`; connections started
/// before the waiter collects it still register with the same group.
enum Lifecycle {
    Idle,
    Running {
        close_tx: broadcast::Sender<()>,
        wait_group: AsyncWaitGroup,
    },
    Stopping(AsyncWaitGroup),
}

impl Bootstrap {
    fn new(group: Arc<EventLoopGroup>) -> Self {
        Self {
            group,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            pipeline_factory_fn: None,
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    fn read_buffer_size(&mut self, read_buffer_size: usize) -> &mut Self {
        self.read_buffer_size = read_buffer_size.max(1);
        self
    }

    fn pipeline<F>(&mut self, pipeline_factory_fn: F) -> &mut Self
    where
        F: Fn(SocketAddr, SocketAddr) -> rivet::Result<Arc<ChannelPipeline>> + Send + Sync + 'static,
    {
        self.pipeline_factory_fn = Some(Arc::new(pipeline_factory_fn));
        self
    }

    /// What a new connection needs, registered as a worker of this bootstrap.
    fn connection(&self) -> io::Result<Connection> {
        let pipeline_factory_fn = self
            .pipeline_factory_fn
            .clone()
            .ok_or_else(|| io::Error::other("no pipeline factory configured"))?;
        let (close_rx, wait_group) = self.arm();
        Ok(Connection {
            pipeline_factory_fn,
            read_buffer_size: self.read_buffer_size,
            close_rx,
            worker: Worker(wait_group.add(1)),
        })
    }

    fn arm(&self) -> (broadcast::Receiver<()>, AsyncWaitGroup) {
        let mut lifecycle = self.lifecycle.lock();
        let wait_group = match std::mem::replace(&mut *lifecycle, Lifecycle::Idle) {
            Lifecycle::Running { close_tx, wait_group } => {
                let close_rx = close_tx.subscribe();
                *lifecycle = Lifecycle::Running {
                    close_tx,
                    wait_group: wait_group.clone(),
                };
                return (close_rx, wait_group);
            }
            Lifecycle::Stopping(wait_group) => wait_group,
            Lifecycle::Idle => AsyncWaitGroup::new(),
        };
        let (close_tx, close_rx) = broadcast::channel::<()>(1);
        *lifecycle = Lifecycle::Running {
            close_tx,
            wait_group: wait_group.clone(),
        };
        (close_rx, wait_group)
    }

    async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if let Lifecycle::Running { close_tx, wait_group } = std::mem::replace(&mut *lifecycle, Lifecycle::Idle) {
            let _ = close_tx.send(());
            *lifecycle = Lifecycle::Stopping(wait_group);
        }
    }

    /// Waits for the workers of the last stop; without one, for the running
    /// workers to finish on their own.
    async fn wait_for_stop(&self) {
        let wait_group = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Idle) {
                Lifecycle::Running { close_tx, wait_group } => {
                    let waiter = wait_group.clone();
                    *lifecycle = Lifecycle::Running { close_tx, wait_group };
                    Some(waiter)
                }
                Lifecycle::Stopping(wait_group) => Some(wait_group),
                Lifecycle::Idle => None,
            }
        };
        if let Some(wait_group) = wait_group {
            wait_group.wait().await;
        }
    }

    async fn graceful_stop(&self) {
        self.stop().await;
        self.wait_for_stop().await;
    }
}

/// Everything a connection task takes along to its event loop.
struct Connection {
    pipeline_factory_fn: PipelineFactoryFn,
    read_buffer_size: usize,
    close_rx: broadcast::Receiver<()>,
    worker: Worker,
}

impl Connection {
    /// Another worker of the same bootstrap, as a listener hands out per
    /// accepted socket.
    fn fork(&self) -> Self {
        Self {
            pipeline_factory_fn: Arc::clone(&self.pipeline_factory_fn),
            read_buffer_size: self.read_buffer_size,
            close_rx: self.close_rx.resubscribe(),
            worker: Worker(self.worker.0.add(1)),
        }
    }
}

/// Marks a wait group worker done when dropped, including when the task
/// holding it never gets to run.
struct Worker(AsyncWaitGroup);

impl Drop for Worker {
    fn drop(&mut self) {
        self.0.done();
    }
}

fn to_io(err: rivet::Error) -> io::Error {
    io::Error::other(err)
}
