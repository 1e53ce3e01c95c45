use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, trace, warn};
use rivet::ChannelPipeline;
use rivet_executor::{EventLoopGroup, spawn_local};
use tokio::net::{TcpListener, ToSocketAddrs};

use super::hand_off;
use crate::Bootstrap;

/// A server that accepts TCP connections and runs each on a loop of its
/// [`EventLoopGroup`].
///
/// `bind` must be awaited inside a local executor, e.g.
/// [`rivet_executor::LocalExecutorBuilder::run`]; the accept loop runs there
/// while connections are spread over the group round-robin.
pub struct ServerBootstrap {
    bootstrap: Bootstrap,
}

impl ServerBootstrap {
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

    /// Sets the factory building the pipeline of every accepted connection.
    pub fn pipeline<F>(&mut self, pipeline_factory_fn: F) -> &mut Self
    where
        F: Fn(SocketAddr, SocketAddr) -> rivet::Result<Arc<ChannelPipeline>> + Send + Sync + 'static,
    {
        self.bootstrap.pipeline(pipeline_factory_fn);
        self
    }

    /// Binds to `addr` and starts accepting; returns the bound address.
    pub async fn bind<A: ToSocketAddrs>(&self, addr: A) -> io::Result<SocketAddr> {
        let mut listener_conn = self.bootstrap.connection()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let group = Arc::clone(&self.bootstrap.group);

        spawn_local(async move {
            loop {
                tokio::select! {
                    _ = listener_conn.close_rx.recv() => {
                        trace!("listener on {} exit loop", local_addr);
                        break;
                    }
                    res = listener.accept() => {
                        let (socket, peer_addr) = match res {
                            Ok(accepted) => accepted,
                            Err(err) => {
                                warn!("listener accept error {}", err);
                                break;
                            }
                        };
                        trace!("accepted {} on {}", peer_addr, local_addr);
                        let socket = match socket.into_std() {
                            Ok(socket) => socket,
                            Err(err) => {
                                warn!("failed to detach accepted socket {}", err);
                                continue;
                            }
                        };
                        let event_loop = group.next();
                        let name = event_loop.name().to_owned();
                        if let Err(err) = hand_off(event_loop, socket, listener_conn.fork(), None) {
                            error!("failed to hand {} to {}: {}", peer_addr, name, err);
                        }
                    }
                }
            }
            drop(listener_conn);
        })
        .detach();

        Ok(local_addr)
    }

    /// Signals the listener and every connection to shut down.
    pub async fn stop(&self) {
        self.bootstrap.stop().await
    }

    /// Waits until the listener and every connection are down.
    pub async fn wait_for_stop(&self) {
        self.bootstrap.wait_for_stop().await
    }

    pub async fn graceful_stop(&self) {
        self.bootstrap.graceful_stop().await
    }
}
