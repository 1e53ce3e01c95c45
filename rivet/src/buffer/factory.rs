//! Buffer construction: fresh allocations, zero-copy wrapping and deep copies.

use super::{ByteOrder, ChannelBuffer, DEFAULT_MAX_CAPACITY, HeapRegion};
use crate::error::{Error, Result};

/// A growable heap buffer with `capacity` bytes pre-allocated.
pub fn buffer(order: ByteOrder, capacity: usize) -> ChannelBuffer {
    ChannelBuffer::from_vec(
        order,
        vec![0u8; capacity],
        0,
        DEFAULT_MAX_CAPACITY.max(capacity),
    )
}

/// A heap buffer that never grows past `capacity`.
pub fn fixed_buffer(order: ByteOrder, capacity: usize) -> ChannelBuffer {
    ChannelBuffer::from_vec(order, vec![0u8; capacity], 0, capacity)
}

/// Takes ownership of `data` without copying; all of it is readable.
pub fn wrapped_vec(order: ByteOrder, data: Vec<u8>) -> ChannelBuffer {
    if data.is_empty() {
        return ChannelBuffer::empty().with_order(order);
    }
    let len = data.len();
    ChannelBuffer::from_vec(order, data, len, len)
}

/// Concatenates `parts` into one composite view without copying.
pub fn wrapped_vecs(order: ByteOrder, parts: Vec<Vec<u8>>) -> ChannelBuffer {
    let regions = parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .map(HeapRegion::new)
        .collect();
    ChannelBuffer::from_regions(order, regions)
}

/// A view of the readable bytes of `source`.
pub fn wrapped_buffer(source: &ChannelBuffer) -> ChannelBuffer {
    source.readable_slice()
}

/// Concatenates the readable bytes of `sources` into one composite view.
///
/// Empty sources are dropped. With nothing left the empty buffer comes back,
/// with one source a plain view of it. Composite sources contribute their own
/// components, so the result is always flat. Every source with readable bytes
/// must share one byte order.
pub fn wrapped_buffers(sources: &[ChannelBuffer]) -> Result<ChannelBuffer> {
    let order = common_order(sources)?;
    let mut regions = Vec::new();
    for source in sources.iter().filter(|source| source.is_readable()) {
        regions.extend(source.regions(source.reader_index(), source.readable_bytes()));
    }
    Ok(ChannelBuffer::from_regions(order, regions))
}

/// A growable copy of `data`.
pub fn copied_slice(order: ByteOrder, data: &[u8]) -> ChannelBuffer {
    if data.is_empty() {
        return ChannelBuffer::empty().with_order(order);
    }
    ChannelBuffer::from_vec(order, data.to_vec(), data.len(), DEFAULT_MAX_CAPACITY)
}

pub fn copied_str(order: ByteOrder, s: &str) -> ChannelBuffer {
    copied_slice(order, s.as_bytes())
}

/// One contiguous copy of all `parts`, sized to their exact total.
pub fn copied_slices(order: ByteOrder, parts: &[&[u8]]) -> Result<ChannelBuffer> {
    let total = checked_total(parts.iter().map(|part| part.len()))?;
    let mut data = Vec::with_capacity(total);
    for part in parts {
        data.extend_from_slice(part);
    }
    Ok(copied_vec(order, data))
}

/// A deep copy of the readable bytes of `source`.
pub fn copied_buffer(source: &ChannelBuffer) -> ChannelBuffer {
    copied_vec(source.order(), source.to_vec())
}

/// One contiguous copy of the readable bytes of all `sources`.
pub fn copied_buffers(sources: &[ChannelBuffer]) -> Result<ChannelBuffer> {
    let order = common_order(sources)?;
    let total = checked_total(sources.iter().map(|source| source.readable_bytes()))?;
    let mut data = vec![0u8; total];
    let mut at = 0;
    for source in sources {
        let len = source.readable_bytes();
        source.read_raw(source.reader_index(), &mut data[at..at + len]);
        at += len;
    }
    Ok(copied_vec(order, data))
}

fn copied_vec(order: ByteOrder, data: Vec<u8>) -> ChannelBuffer {
    if data.is_empty() {
        return ChannelBuffer::empty().with_order(order);
    }
    let len = data.len();
    ChannelBuffer::from_vec(order, data, len, DEFAULT_MAX_CAPACITY.max(len))
}

fn checked_total(lengths: impl Iterator<Item = usize>) -> Result<usize> {
    let mut total: usize = 0;
    for len in lengths {
        total = total
            .checked_add(len)
            .filter(|total| *total <= DEFAULT_MAX_CAPACITY)
            .ok_or_else(|| Error::argument("the total length of the sources overflows"))?;
    }
    Ok(total)
}

/// Byte order shared by the readable sources; big-endian when there are none.
fn common_order(sources: &[ChannelBuffer]) -> Result<ByteOrder> {
    let mut readable = sources.iter().filter(|source| source.is_readable());
    let Some(first) = readable.next() else {
        return Ok(ByteOrder::BigEndian);
    };
    let order = first.order();
    if readable.any(|source| source.order() != order) {
        return Err(Error::argument("inconsistent byte order"));
    }
    Ok(order)
}

/// Allocates buffers for a channel.
pub trait BufferFactory: Send + Sync {
    /// Byte order of buffers made by [`get_buffer`](Self::get_buffer).
    fn default_order(&self) -> ByteOrder;

    fn get_buffer_with_order(&self, order: ByteOrder, capacity: usize) -> ChannelBuffer;

    fn get_buffer(&self, capacity: usize) -> ChannelBuffer {
        self.get_buffer_with_order(self.default_order(), capacity)
    }

    /// A buffer holding a copy of `data`.
    fn get_buffer_from(&self, data: &[u8]) -> ChannelBuffer {
        let mut buf = self.get_buffer(data.len());
        buf.write_slice(data);
        buf
    }
}

/// Growable heap buffers in a fixed byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapBufferFactory {
    order: ByteOrder,
}

impl HeapBufferFactory {
    pub fn new(order: ByteOrder) -> Self {
        Self { order }
    }
}

impl BufferFactory for HeapBufferFactory {
    fn default_order(&self) -> ByteOrder {
        self.order
    }

    fn get_buffer_with_order(&self, order: ByteOrder, capacity: usize) -> ChannelBuffer {
        buffer(order, capacity)
    }
}
