use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::channel::oneshot;
use rivet::{Channel, ChannelPipeline};
use rivet_executor::EventLoopGroup;
use tokio::net::{TcpStream, ToSocketAddrs};

use super::hand_off;
use crate::Bootstrap;

/// A client that connects TCP sockets and runs each on a loop of its
/// [`EventLoopGroup`].
pub struct ClientBootstrap {
    bootstrap: Bootstrap,
}

impl ClientBootstrap {
    pub fn new(group: Arc<EventLoopGroup>) -> Self {
        Self {
            bootstrap: Bootstrap::new(group),
        }
    }

    /// Size of the buffer every connection reads into.
    pub fn read_buffer_size(&mut self, read_buffer_size: usize) -> &mut Self {
        self.bootstrap.read_buffer_size(read_buffer_size);
        self
    }

    /// Sets the factory building the pipeline of every connection.
    pub fn pipeline<F>(&mut self, pipeline_factory_fn: F) -> &mut Self
    where
        F: Fn(SocketAddr, SocketAddr) -> rivet::Result<Arc<ChannelPipeline>> + Send + Sync + 'static,
    {
        self.bootstrap.pipeline(pipeline_factory_fn);
        self
    }

    /// Connects to `addr` and returns the channel once its pipeline is active.
    pub async fn connect<A: ToSocketAddrs>(&self, addr: A) -> io::Result<Arc<dyn Channel>> {
        let connection = self.bootstrap.connection()?;
        let socket = TcpStream::connect(addr).await?.into_std()?;

        let (ready_tx, ready_rx) = oneshot::channel();
        hand_off(self.bootstrap.group.next(), socket, connection, Some(ready_tx))?;

        ready_rx
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionAborted, "connection setup failed"))
    }

    /// Signals every connection to shut down.
    pub async fn stop(&self) {
        self.bootstrap.stop().await
    }

    /// Waits until every connection is down.
    pub async fn wait_for_stop(&self) {
        self.bootstrap.wait_for_stop().await
    }

    pub async fn graceful_stop(&self) {
        self.bootstrap.graceful_stop().await
    }
}
