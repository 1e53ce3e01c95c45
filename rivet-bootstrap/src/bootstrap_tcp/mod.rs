use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::channel::oneshot;
use log::{error, trace, warn};
use rivet::buffer::copied_slice;
use rivet::{ByteOrder, Channel, ChannelFuture, ChannelPipeline, ChannelSink, Error, EventLoop, OutboundEvent};
use rivet_executor::{SingleThreadEventLoop, spawn_local};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Notify, broadcast};

use crate::{Connection, PipelineFactoryFn, to_io};

pub(crate) mod bootstrap_tcp_client;
pub(crate) mod bootstrap_tcp_server;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct ConnectionState {
    open: AtomicBool,
    active: AtomicBool,
    closed: Notify,
}

enum WriteCommand {
    Data(Vec<u8>, ChannelFuture),
    Shutdown(ChannelFuture),
}

/// A connected TCP socket owned by one event loop.
pub struct TcpChannel {
    id: u64,
    pipeline: Arc<ChannelPipeline>,
    event_loop: Arc<SingleThreadEventLoop>,
    local: SocketAddr,
    remote: SocketAddr,
    state: Arc<ConnectionState>,
}

impl TcpChannel {
    pub fn loop_name(&self) -> &str {
        self.event_loop.name()
    }
}

impl Channel for TcpChannel {
    fn id(&self) -> u64 {
        self.id
    }

    fn pipeline(&self) -> &Arc<ChannelPipeline> {
        &self.pipeline
    }

    fn event_loop(&self) -> Arc<dyn EventLoop> {
        self.event_loop.clone()
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }

    fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }

    fn local_address(&self) -> Option<SocketAddr> {
        Some(self.local)
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
}

/// Writes flushed bytes to the socket of a [`TcpChannel`].
///
/// Only bytes are written; object messages that reach the sink are dropped
/// with a warning, so pipelines need an encoder in front of it.
pub struct TcpSink {
    writer: UnboundedSender<WriteCommand>,
    state: Arc<ConnectionState>,
}

impl TcpSink {
    fn shutdown(&self, future: ChannelFuture) {
        self.state.open.store(false, Ordering::Release);
        self.state.closed.notify_one();
        if let Err(err) = self.writer.send(WriteCommand::Shutdown(future)) {
            if let WriteCommand::Shutdown(future) = err.0 {
                future.set_success();
            }
        }
    }
}

impl ChannelSink for TcpSink {
    fn event_sunk(&self, pipeline: &ChannelPipeline, event: OutboundEvent) -> rivet::Result<()> {
        match event {
            OutboundEvent::Flush { future } => {
                let data = take_pending(pipeline);
                if data.is_empty() {
                    future.set_success();
                } else if !self.state.open.load(Ordering::Acquire) {
                    future.set_failure(Error::Closed);
                } else {
                    self.writer
                        .send(WriteCommand::Data(data, future))
                        .map_err(|_| Error::Closed)?;
                }
                Ok(())
            }
            OutboundEvent::Close { future } | OutboundEvent::Disconnect { future } => {
                self.shutdown(future);
                Ok(())
            }
            OutboundEvent::Bind { future, .. } | OutboundEvent::Connect { future, .. } => {
                future.set_failure(Error::illegal_state("tcp channel is connected already"));
                Ok(())
            }
        }
    }
}

/// Empties the sink buffer of `pipeline`, returning its bytes.
fn take_pending(pipeline: &ChannelPipeline) -> Vec<u8> {
    let mut pending = pipeline.sink_buffer();
    let dropped = pending.drain().count();
    if dropped > 0 {
        warn!("tcp sink can only write bytes; dropping {} messages", dropped);
    }
    let data = pending.bytes().to_vec();
    pending.clear();
    data
}

async fn write_loop(mut writer: OwnedWriteHalf, mut commands: UnboundedReceiver<WriteCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            WriteCommand::Data(data, future) => match writer.write_all(&data).await {
                Ok(()) => {
                    trace!("stream write {} bytes", data.len());
                    future.set_success();
                }
                Err(err) => {
                    warn!("stream write error {}", err);
                    future.set_failure(err.into());
                }
            },
            WriteCommand::Shutdown(future) => {
                if let Err(err) = writer.shutdown().await {
                    trace!("stream shutdown error {}", err);
                }
                future.set_success();
                break;
            }
        }
    }
    commands.close();
    while let Ok(command) = commands.try_recv() {
        match command {
            WriteCommand::Data(_, future) => future.set_failure(Error::Closed),
            WriteCommand::Shutdown(future) => future.set_success(),
        };
    }
}

/// Moves `socket` over to `event_loop` and serves it there until it closes.
///
/// `ready` receives the channel once its pipeline is attached and active; it
/// is dropped unsent if the connection cannot be set up.
pub(crate) fn hand_off(
    event_loop: Arc<SingleThreadEventLoop>,
    socket: std::net::TcpStream,
    connection: Connection,
    ready: Option<oneshot::Sender<Arc<dyn Channel>>>,
) -> io::Result<()> {
    let owner = Arc::clone(&event_loop);
    event_loop
        .spawn(move || async move {
            let Connection {
                pipeline_factory_fn,
                read_buffer_size,
                close_rx,
                worker,
            } = connection;
            let res = match TcpStream::from_std(socket) {
                Ok(stream) => {
                    serve(stream, owner, pipeline_factory_fn, read_buffer_size, close_rx, ready).await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = res {
                error!("tcp connection failed: {}", err);
            }
            drop(worker);
        })
        .map_err(to_io)
}

/// Wraps `stream` in a [`TcpChannel`] whose pipeline is attached to a
/// [`TcpSink`], then starts the writer task.
fn open_channel(
    stream: TcpStream,
    event_loop: Arc<SingleThreadEventLoop>,
    pipeline_factory_fn: PipelineFactoryFn,
) -> io::Result<(Arc<dyn Channel>, Arc<TcpSink>, OwnedReadHalf)> {
    let local = stream.local_addr()?;
    let remote = stream.peer_addr()?;
    let pipeline = (pipeline_factory_fn)(local, remote).map_err(to_io)?;

    let (reader, writer) = stream.into_split();
    let (write_tx, write_rx) = unbounded_channel::<WriteCommand>();
    let state = Arc::new(ConnectionState {
        open: AtomicBool::new(true),
        active: AtomicBool::new(true),
        closed: Notify::new(),
    });

    let channel: Arc<dyn Channel> = Arc::new(TcpChannel {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        pipeline: Arc::clone(&pipeline),
        event_loop,
        local,
        remote,
        state: Arc::clone(&state),
    });
    let sink = Arc::new(TcpSink { writer: write_tx, state });
    pipeline.attach(&channel, sink.clone()).map_err(to_io)?;
    spawn_local(write_loop(writer, write_rx)).detach();
    Ok((channel, sink, reader))
}

async fn serve(
    stream: TcpStream,
    event_loop: Arc<SingleThreadEventLoop>,
    pipeline_factory_fn: PipelineFactoryFn,
    read_buffer_size: usize,
    mut close_rx: broadcast::Receiver<()>,
    ready: Option<oneshot::Sender<Arc<dyn Channel>>>,
) -> io::Result<()> {
    let (channel, sink, mut reader) = open_channel(stream, event_loop, pipeline_factory_fn)?;
    let pipeline = Arc::clone(channel.pipeline());
    let remote = channel.remote_address();

    pipeline.fire_channel_open();
    pipeline.fire_channel_active();
    if let Some(ready) = ready {
        let _ = ready.send(Arc::clone(&channel));
    }

    let mut buf = vec![0u8; read_buffer_size];
    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                trace!("bootstrap stopped, closing {:?}", remote);
                break;
            }
            _ = sink.state.closed.notified() => {
                trace!("channel {} closed locally", channel.id());
                break;
            }
            res = reader.read(&mut buf) => match res {
                Ok(0) => {
                    trace!("stream eof from {:?}", remote);
                    break;
                }
                Ok(n) => {
                    trace!("stream read {} bytes", n);
                    pipeline.write_inbound(copied_slice(ByteOrder::BigEndian, &buf[..n]));
                    pipeline.fire_message_updated();
                }
                Err(err) => {
                    warn!("stream read error {}", err);
                    pipeline.fire_exception_caught(err.into());
                    break;
                }
            },
        }
    }

    sink.shutdown(ChannelFuture::new());
    sink.state.active.store(false, Ordering::Release);
    pipeline.fire_channel_inactive();
    trace!("tcp channel {} is down", channel.id());
    Ok(())
}
