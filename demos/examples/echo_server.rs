use clap::Parser;
use log::info;

use demos::helpers::{CommonArgs, ctrl_c};
use rivet::{ChannelHandler, ChannelHandlerContext, ChannelPipeline, EventSet, Result};
use rivet_bootstrap::ServerBootstrap;
use rivet_codec::{ByteToMessageCodec, LineBasedFrameDecoder, StringCodec, TerminatorType};
use rivet_executor::{EventLoopGroup, LocalExecutorBuilder};

////////////////////////////////////////////////////////////////////////////////////////////////////
struct EchoHandler;

impl ChannelHandler for EchoHandler {
    fn events(&self) -> EventSet {
        EventSet::CHANNEL_ACTIVE | EventSet::MESSAGE_UPDATED | EventSet::EXCEPTION_CAUGHT
    }

    fn channel_active(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        if let Some(channel) = ctx.channel() {
            info!("{:?} connected", channel.remote_address());
        }
        ctx.fire_channel_active();
        Ok(())
    }

    fn message_updated(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        let lines: Vec<String> = std::iter::from_fn(|| ctx.inbound().pop_as::<String>()).collect();
        for line in lines {
            info!("handling {}", line);
            ctx.write(format!("{}\r\n", line));
        }
        Ok(())
    }

    fn exception_caught(&self, ctx: &ChannelHandlerContext, cause: rivet::Error) -> Result<()> {
        info!("closing after error: {}", cause);
        ctx.close();
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "Echo Server")]
#[command(version = "0.1.0")]
#[command(about = "An example of a line echo server", long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.common.init_log()?;

    let group = EventLoopGroup::builder().threads(cli.common.threads).build()?;
    let mut bootstrap = ServerBootstrap::new(group.clone());
    bootstrap.pipeline(|_local_addr, _peer_addr| {
        let pipeline = ChannelPipeline::new();
        pipeline.add_last(
            "framer",
            ByteToMessageCodec::new(LineBasedFrameDecoder::new(8192, true, TerminatorType::Both)),
        )?;
        pipeline.add_last("string", StringCodec::new())?;
        pipeline.add_last("echo", EchoHandler)?;
        Ok(pipeline)
    });

    let addr = cli.common.addr();
    LocalExecutorBuilder::default().run(async move {
        let local_addr = bootstrap.bind(addr).await?;
        info!("listening {}...", local_addr);
        info!("Press ctrl-c to stop");
        info!("try `nc {} {}` in another shell", local_addr.ip(), local_addr.port());

        ctrl_c().await?;
        bootstrap.graceful_stop().await;
        Ok::<_, anyhow::Error>(())
    })??;

    group.shutdown_gracefully();
    Ok(())
}
