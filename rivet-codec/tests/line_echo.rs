use rivet::buffer::copied_str;
use rivet::{ByteOrder, ChannelHandler, ChannelHandlerContext, ChannelPipeline, EmbeddedChannel, Error, EventSet, Result};
use rivet_codec::{ByteToMessageCodec, LineBasedFrameDecoder, StringCodec, TerminatorType};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Writes every line back, terminated by `\r\n`.
struct LineEcho;

impl ChannelHandler for LineEcho {
    fn events(&self) -> EventSet {
        EventSet::MESSAGE_UPDATED
    }

    fn message_updated(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        let lines: Vec<String> = std::iter::from_fn(|| ctx.inbound().pop_as::<String>()).collect();
        for line in lines {
            ctx.write(format!("{}\r\n", line));
        }
        Ok(())
    }
}

fn echo_channel(max_length: usize) -> std::sync::Arc<EmbeddedChannel> {
    let pipeline = ChannelPipeline::new();
    pipeline
        .add_last(
            "framer",
            ByteToMessageCodec::new(LineBasedFrameDecoder::new(max_length, true, TerminatorType::Both)),
        )
        .unwrap();
    pipeline.add_last("string", StringCodec::new()).unwrap();
    pipeline.add_last("echo", LineEcho).unwrap();
    EmbeddedChannel::new(pipeline).unwrap()
}

#[test]
fn test_lines_are_echoed_across_chunks() {
    init_log();
    let channel = echo_channel(64);
    channel.write_inbound(copied_str(ByteOrder::BigEndian, "hel"));
    assert!(!channel.read_outbound_bytes().is_readable());

    channel.write_inbound(copied_str(ByteOrder::BigEndian, "lo\nworld\r\nrest"));
    assert_eq!(channel.read_outbound_bytes().to_string_lossy(), "hello\r\nworld\r\n");
    channel.check_exception().unwrap();
}

#[test]
fn test_over_long_line_raises_and_recovers() {
    init_log();
    let channel = echo_channel(4);
    channel.write_inbound(copied_str(ByteOrder::BigEndian, "toolong\n"));
    assert!(matches!(
        channel.take_exceptions().as_slice(),
        [err] if matches!(err.root_cause(), Error::Decode(_))
    ));

    channel.write_inbound(copied_str(ByteOrder::BigEndian, "ok\n"));
    assert_eq!(channel.read_outbound_bytes().to_string_lossy(), "ok\r\n");
}

#[test]
fn test_close_is_seen_by_sink() {
    init_log();
    let channel = echo_channel(64);
    assert!(!channel.finish());
    assert_eq!(channel.sunk_events(), [rivet::EventKind::Close]);
}
