use std::any::Any;

use log::trace;
use parking_lot::Mutex;
use rivet::{ChannelBuffer, ChannelHandler, ChannelHandlerContext, Error, EventSet, Message, Result};

mod line_based_frame_decoder;

pub use line_based_frame_decoder::{LineBasedFrameDecoder, TerminatorType};

/// Turns the front of a cumulative byte buffer into messages.
pub trait MessageDecoder: Send + 'static {
    type Output: Any + Send;

    /// Decodes at most one message from the readable bytes of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Consumed bytes must be
    /// skipped by advancing the reader index.
    fn decode(&mut self, buf: &mut ChannelBuffer) -> Result<Option<Self::Output>>;

    /// Decodes what is left once the channel went inactive.
    fn decode_last(&mut self, buf: &mut ChannelBuffer) -> Result<Option<Self::Output>> {
        self.decode(buf)
    }
}

/// A handler that cumulates inbound bytes and runs a [`MessageDecoder`] over them.
///
/// Decoded messages are queued in the next inbound container, followed by a
/// `message_updated` event. Queued non-byte messages pass through unchanged
/// and in order, ahead of whatever was decoded from the bytes.
pub struct ByteToMessageCodec<D: MessageDecoder> {
    decoder: Mutex<D>,
}

impl<D: MessageDecoder> ByteToMessageCodec<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder: Mutex::new(decoder),
        }
    }

    fn run(&self, ctx: &ChannelHandlerContext, last: bool) -> Result<()> {
        let mut decoded = Vec::new();
        let (passthrough, result) = {
            let mut inbound = ctx.inbound();
            let passthrough: Vec<Message> = inbound.drain().collect();
            let mut decoder = self.decoder.lock();
            let result = decode_all(&mut *decoder, inbound.bytes_mut(), last, &mut decoded);
            if result.is_ok() {
                inbound.discard_read_bytes();
            }
            (passthrough, result)
        };

        if !passthrough.is_empty() || !decoded.is_empty() {
            trace!("{}: decoded {} messages", ctx.name(), decoded.len());
            ctx.with_next_inbound(|next| {
                for msg in passthrough {
                    next.push_boxed(msg);
                }
                for msg in decoded {
                    next.push(msg);
                }
            });
            ctx.fire_message_updated();
        }
        result
    }
}

fn decode_all<D: MessageDecoder>(
    decoder: &mut D,
    buf: &mut ChannelBuffer,
    last: bool,
    out: &mut Vec<D::Output>,
) -> Result<()> {
    while buf.is_readable() {
        let before = buf.readable_bytes();
        let msg = if last { decoder.decode_last(buf)? } else { decoder.decode(buf)? };
        let progressed = buf.readable_bytes() != before;
        match msg {
            Some(_) if !progressed => {
                return Err(Error::illegal_state(format!(
                    "{}.decode() did not read anything but decoded a message.",
                    std::any::type_name::<D>()
                )));
            }
            Some(msg) => out.push(msg),
            None if progressed => continue,
            None => break,
        }
    }
    Ok(())
}

impl<D: MessageDecoder> ChannelHandler for ByteToMessageCodec<D> {
    fn events(&self) -> EventSet {
        EventSet::MESSAGE_UPDATED | EventSet::CHANNEL_INACTIVE
    }

    fn message_updated(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        self.run(ctx, false)
    }

    fn channel_inactive(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        let result = self.run(ctx, true);
        ctx.fire_channel_inactive();
        result
    }
}
