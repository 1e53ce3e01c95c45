use rivet::buffer::copied_str;
use rivet::{ByteOrder, ChannelBuffer, ChannelFuture, ChannelHandler, ChannelHandlerContext, Error, EventSet, Result};

/// Converts between UTF-8 bytes and `String` messages.
///
/// Inbound, every queued `ChannelBuffer` frame becomes a `String`, and loose
/// cumulated bytes are decoded as one string. Outbound, every `String` is
/// encoded and appended to the next container's bytes. Other messages pass
/// through in both directions.
#[derive(Debug, Default)]
pub struct StringCodec {
    order: ByteOrder,
}

impl StringCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `order` for the buffers created when encoding.
    pub fn with_order(order: ByteOrder) -> Self {
        Self { order }
    }
}

fn utf8(bytes: &ChannelBuffer) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|err| Error::decode(format!("invalid UTF-8 frame: {}", err)))
}

impl ChannelHandler for StringCodec {
    fn events(&self) -> EventSet {
        EventSet::MESSAGE_UPDATED | EventSet::FLUSH
    }

    /// Converts what it can and forwards it; the first invalid frame is
    /// reported after the rest went through.
    fn message_updated(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        let mut failure = None;
        let mut converted = Vec::new();
        {
            let mut inbound = ctx.inbound();
            for msg in inbound.drain() {
                match msg.downcast::<ChannelBuffer>() {
                    Ok(frame) => match utf8(&frame) {
                        Ok(text) => converted.push(Box::new(text) as rivet::Message),
                        Err(err) => {
                            failure.get_or_insert(err);
                        }
                    },
                    Err(other) => converted.push(other),
                }
            }
            if inbound.bytes().is_readable() {
                match utf8(inbound.bytes()) {
                    Ok(text) => converted.push(Box::new(text)),
                    Err(err) => {
                        failure.get_or_insert(err);
                    }
                }
                inbound.clear();
            }
        }

        if !converted.is_empty() {
            ctx.with_next_inbound(|next| {
                for msg in converted {
                    next.push_boxed(msg);
                }
            });
            ctx.fire_message_updated();
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn flush(&self, ctx: &ChannelHandlerContext, future: ChannelFuture) -> Result<()> {
        let order = self.order;
        {
            let mut outbound = ctx.outbound();
            let pending: Vec<_> = outbound.drain().collect();
            ctx.with_next_outbound(|next| {
                for msg in pending {
                    match msg.downcast::<String>() {
                        Ok(text) => next.add(Box::new(copied_str(order, &text))),
                        Err(other) => next.push_boxed(other),
                    }
                }
                outbound.transfer_to(next);
            });
        }
        ctx.flush_with(future);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivet::buffer::copied_slice;
    use rivet::{Channel, ChannelPipeline, EmbeddedChannel};

    fn channel() -> std::sync::Arc<EmbeddedChannel> {
        let pipeline = ChannelPipeline::new();
        pipeline.add_last("string", StringCodec::new()).unwrap();
        EmbeddedChannel::new(pipeline).unwrap()
    }

    #[test]
    fn test_loose_bytes_become_one_string() {
        let channel = channel();
        channel.write_inbound(copied_slice(ByteOrder::BigEndian, "héllo".as_bytes()));
        assert_eq!(channel.read_inbound::<String>().as_deref(), Some("héllo"));
    }

    #[test]
    fn test_strings_are_encoded_outbound() {
        let channel = channel();
        channel.write_outbound(String::from("a")).wait().unwrap();
        channel.write_outbound(7u32).wait().unwrap();
        channel.write_outbound(String::from("bc")).wait().unwrap();
        assert_eq!(channel.read_outbound_bytes().to_vec(), b"abc");
        assert_eq!(channel.read_outbound::<u32>(), Some(7));
    }

    #[test]
    fn test_invalid_frame_does_not_drop_its_neighbours() {
        let channel = channel();
        let ctx = channel.pipeline().context("string").unwrap();
        {
            let mut inbound = ctx.inbound();
            inbound.push(String::from("already-a-string"));
            inbound.push(copied_slice(ByteOrder::BigEndian, &[0xff, 0xfe]));
            inbound.push(copied_slice(ByteOrder::BigEndian, b"valid-after"));
        }
        channel.pipeline().fire_message_updated();

        let exceptions = channel.take_exceptions();
        assert_eq!(exceptions.len(), 1);
        assert!(matches!(exceptions[0].root_cause(), Error::Decode(_)));
        assert_eq!(channel.read_inbound::<String>().as_deref(), Some("already-a-string"));
        assert_eq!(channel.read_inbound::<String>().as_deref(), Some("valid-after"));
        assert!(channel.read_inbound::<String>().is_none());
        assert!(ctx.inbound().is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        let channel = channel();
        channel.write_inbound(copied_slice(ByteOrder::BigEndian, &[0xff, 0xfe]));
        assert!(channel.read_inbound::<String>().is_none());
        assert!(matches!(channel.take_exceptions()[0].root_cause(), Error::Decode(_)));
    }
}
