use clap::Parser;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use demos::helpers::{CommonArgs, ctrl_c};
use rivet::{Channel, ChannelHandler, ChannelHandlerContext, ChannelPipeline, Error, EventSet, Result};
use rivet_bootstrap::ServerBootstrap;
use rivet_codec::{ByteToMessageCodec, LineBasedFrameDecoder, StringCodec, TerminatorType};
use rivet_executor::{EventLoopGroup, LocalExecutorBuilder};

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Peers of all loops; every peer is written from whichever loop received the line.
#[derive(Default)]
struct Shared {
    peers: Mutex<HashMap<SocketAddr, Weak<dyn Channel>>>,
}

impl Shared {
    fn join(&self, peer: SocketAddr, channel: &Arc<dyn Channel>) {
        info!("{} joined", peer);
        self.peers.lock().insert(peer, Arc::downgrade(channel));
    }

    fn leave(&self, peer: &SocketAddr) {
        info!("{} left", peer);
        self.peers.lock().remove(peer);
    }

    /// Sends `msg` to every peer except for the sender.
    fn broadcast(&self, sender: SocketAddr, msg: &str) {
        let targets: Vec<_> = self
            .peers
            .lock()
            .iter()
            .filter(|(peer, _)| **peer != sender)
            .filter_map(|(_, channel)| channel.upgrade())
            .collect();
        for channel in targets {
            if channel.is_writable() {
                channel.write(Box::new(format!("[{}] {}\r\n", sender, msg)));
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
struct ChatHandler {
    state: Arc<Shared>,
    peer_addr: SocketAddr,
}

impl ChannelHandler for ChatHandler {
    fn events(&self) -> EventSet {
        EventSet::CHANNEL_ACTIVE | EventSet::CHANNEL_INACTIVE | EventSet::MESSAGE_UPDATED | EventSet::EXCEPTION_CAUGHT
    }

    fn channel_active(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        if let Some(channel) = ctx.channel() {
            self.state.join(self.peer_addr, &channel);
        }
        ctx.write(String::from("welcome to the chat\r\n"));
        Ok(())
    }

    fn channel_inactive(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        self.state.leave(&self.peer_addr);
        Ok(())
    }

    fn message_updated(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        let lines: Vec<String> = std::iter::from_fn(|| ctx.inbound().pop_as::<String>()).collect();
        for line in lines {
            info!("received: {} from {}", line, self.peer_addr);
            self.state.broadcast(self.peer_addr, &line);
        }
        Ok(())
    }

    fn exception_caught(&self, ctx: &ChannelHandlerContext, cause: Error) -> Result<()> {
        warn!("{} failed: {}", self.peer_addr, cause);
        ctx.close();
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "Chat Server")]
#[command(version = "0.1.0")]
#[command(about = "An example of a chat server spread over several event loops", long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.common.init_log()?;

    let group = EventLoopGroup::builder()
        .name("chat-loop")
        .threads(cli.common.threads)
        .build()?;

    let state = Arc::new(Shared::default());
    let mut bootstrap = ServerBootstrap::new(group.clone());
    bootstrap.pipeline(move |_local_addr, peer_addr| {
        let pipeline = ChannelPipeline::new();
        pipeline.add_last(
            "framer",
            ByteToMessageCodec::new(LineBasedFrameDecoder::new(8192, true, TerminatorType::Both)),
        )?;
        pipeline.add_last("string", StringCodec::new())?;
        pipeline.add_last(
            "chat",
            ChatHandler {
                state: state.clone(),
                peer_addr,
            },
        )?;
        Ok(pipeline)
    });

    let addr = cli.common.addr();
    LocalExecutorBuilder::default().run(async move {
        let local_addr = bootstrap.bind(addr).await?;
        info!("listening {}...", local_addr);
        info!("Press ctrl-c to stop");
        info!("try `nc {} {}` in several shells", local_addr.ip(), local_addr.port());

        ctrl_c().await?;
        bootstrap.graceful_stop().await;
        Ok::<_, anyhow::Error>(())
    })??;

    group.shutdown_gracefully();
    Ok(())
}
