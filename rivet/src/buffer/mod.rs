//! # ChannelBuffer - Index-Tracked Byte Storage
//!
//! [`ChannelBuffer`] is the byte container every pipeline stage reads from and
//! writes to. It keeps two cursors over one addressable region:
//!
//! ```text
//!       +-------------------+------------------+------------------+
//!       | discardable bytes |  readable bytes  |  writable bytes  |
//!       +-------------------+------------------+------------------+
//!       |                   |                  |                  |
//!       0      <=      reader_index   <=   writer_index    <=    capacity
//! ```
//!
//! `capacity` may grow up to `max_capacity` when a write needs more room. Growth
//! doubles from a 64 byte floor until the 4 MiB threshold and then advances in
//! 4 MiB steps (see [`calculate_new_capacity`]).
//!
//! ## Views
//!
//! Storage is shared between views. [`ChannelBuffer::slice`], [`ChannelBuffer::read_slice`]
//! and [`ChannelBuffer::duplicate`] (or `clone()`) never copy: writes through one view
//! are visible through the others, while every view keeps its own cursors.
//! Composite buffers built by [`wrapped_buffers`] present several regions as one
//! continuous index space and are always flat.
//!
//! ## Example
//!
//! ```rust
//! use rivet::buffer::{self, ByteOrder};
//!
//! let mut buf = buffer::buffer(ByteOrder::BigEndian, 16);
//! buf.write_u16(0xcafe);
//! buf.write_slice(b"hi");
//! assert_eq!(buf.readable_bytes(), 4);
//! assert_eq!(buf.read_u16(), 0xcafe);
//! assert_eq!(buf.to_vec(), b"hi");
//! ```

mod accessors;
mod compare;
mod composite;
mod factory;
mod hex;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};

pub(crate) use composite::Components;
pub use factory::{
    BufferFactory, HeapBufferFactory, buffer, copied_buffer, copied_buffers, copied_slice,
    copied_slices, copied_str, fixed_buffer, wrapped_buffer, wrapped_buffers, wrapped_vec,
    wrapped_vecs,
};
pub use hex::hex_dump;

/// Ceiling used by growable buffers when none is given.
pub const DEFAULT_MAX_CAPACITY: usize = usize::MAX >> 1;

/// Above this size capacity grows linearly instead of doubling.
pub const CAPACITY_THRESHOLD: usize = 4 * 1024 * 1024;

/// Smallest capacity chosen by the growth policy.
pub const MIN_CAPACITY: usize = 64;

/// Byte order used by the fixed-width accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// Outcome of [`ChannelBuffer::ensure_writable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writability {
    /// Enough room was already available.
    Sufficient,
    /// Capacity grew and the request now fits.
    Grew,
    /// Capacity was forced up to `max_capacity` but the request still does not fit.
    GrewToMax,
    /// Capacity is already at `max_capacity` (or growth was not forced); nothing changed.
    Exhausted,
}

/// Picks the capacity to grow to so that at least `min_new_capacity` bytes fit.
pub fn calculate_new_capacity(min_new_capacity: usize, max_capacity: usize) -> usize {
    if min_new_capacity >= CAPACITY_THRESHOLD {
        return min_new_capacity
            .div_ceil(CAPACITY_THRESHOLD)
            .checked_mul(CAPACITY_THRESHOLD)
            .map_or(max_capacity, |capacity| capacity.min(max_capacity));
    }

    let mut new_capacity = MIN_CAPACITY;
    while new_capacity < min_new_capacity {
        new_capacity <<= 1;
    }
    new_capacity.min(max_capacity)
}

/// A window onto shared heap storage.
#[derive(Clone)]
pub(crate) struct HeapRegion {
    data: Arc<RwLock<Vec<u8>>>,
    offset: usize,
    len: usize,
}

impl HeapRegion {
    fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data: Arc::new(RwLock::new(data)),
            offset: 0,
            len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn slice(&self, index: usize, len: usize) -> Self {
        Self {
            data: Arc::clone(&self.data),
            offset: self.offset + index,
            len,
        }
    }

    pub(crate) fn read(&self, index: usize, dst: &mut [u8]) {
        let data = self.data.read();
        let start = self.offset + index;
        dst.copy_from_slice(&data[start..start + dst.len()]);
    }

    pub(crate) fn write(&self, index: usize, src: &[u8]) {
        let mut data = self.data.write();
        let start = self.offset + index;
        data[start..start + src.len()].copy_from_slice(src);
    }

    fn fill(&self, index: usize, len: usize, value: u8) {
        let mut data = self.data.write();
        let start = self.offset + index;
        data[start..start + len].fill(value);
    }

    fn move_to_front(&self, start: usize, end: usize) {
        let mut data = self.data.write();
        data.copy_within(self.offset + start..self.offset + end, self.offset);
    }

    fn same_window(&self, other: &HeapRegion) -> bool {
        Arc::ptr_eq(&self.data, &other.data) && self.offset == other.offset
    }
}

#[derive(Clone)]
pub(crate) enum Storage {
    Empty,
    Heap(HeapRegion),
    Composite(Arc<Components>),
}

/// A growable byte buffer with independent reader and writer cursors.
///
/// Cloning a `ChannelBuffer` produces a [duplicate](ChannelBuffer::duplicate): the
/// clone shares storage with the original but has its own cursors and marks.
#[derive(Clone)]
pub struct ChannelBuffer {
    storage: Storage,
    order: ByteOrder,
    reader_index: usize,
    writer_index: usize,
    marked_reader_index: usize,
    marked_writer_index: usize,
    max_capacity: usize,
}

impl ChannelBuffer {
    /// The canonical zero-capacity buffer.
    pub const fn empty() -> Self {
        Self {
            storage: Storage::Empty,
            order: ByteOrder::BigEndian,
            reader_index: 0,
            writer_index: 0,
            marked_reader_index: 0,
            marked_writer_index: 0,
            max_capacity: 0,
        }
    }

    /// Buffer over `data` with the cursors at `[0, writer_index)`.
    pub(crate) fn from_vec(
        order: ByteOrder,
        data: Vec<u8>,
        writer_index: usize,
        max_capacity: usize,
    ) -> Self {
        debug_assert!(writer_index <= data.len() && data.len() <= max_capacity);
        Self {
            storage: Storage::Heap(HeapRegion::new(data)),
            order,
            reader_index: 0,
            writer_index,
            marked_reader_index: 0,
            marked_writer_index: 0,
            max_capacity,
        }
    }

    /// Fixed-size view whose whole region is readable.
    pub(crate) fn from_region(order: ByteOrder, region: HeapRegion) -> Self {
        let len = region.len();
        Self {
            storage: Storage::Heap(region),
            order,
            reader_index: 0,
            writer_index: len,
            marked_reader_index: 0,
            marked_writer_index: 0,
            max_capacity: len,
        }
    }

    /// Fixed-size composite over `regions`, or a plain view when there is only one.
    pub(crate) fn from_regions(order: ByteOrder, mut regions: Vec<HeapRegion>) -> Self {
        regions.retain(|region| region.len() > 0);
        match regions.len() {
            0 => Self::empty().with_order(order),
            1 => Self::from_region(order, regions.remove(0)),
            _ => {
                let components = Components::new(regions);
                let capacity = components.capacity();
                Self {
                    storage: Storage::Composite(Arc::new(components)),
                    order,
                    reader_index: 0,
                    writer_index: capacity,
                    marked_reader_index: 0,
                    marked_writer_index: 0,
                    max_capacity: capacity,
                }
            }
        }
    }

    /// The same storage and cursors, read with a different byte order.
    pub fn with_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Empty => 0,
            Storage::Heap(region) => region.len(),
            Storage::Composite(components) => components.capacity(),
        }
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.storage, Storage::Composite(_))
    }

    pub fn reader_index(&self) -> usize {
        self.reader_index
    }

    pub fn writer_index(&self) -> usize {
        self.writer_index
    }

    pub fn set_reader_index(&mut self, reader_index: usize) -> Result<()> {
        if reader_index > self.writer_index {
            return Err(Error::range(format!(
                "reader_index: {} (expected: 0 <= reader_index <= writer_index({}))",
                reader_index, self.writer_index
            )));
        }
        self.reader_index = reader_index;
        Ok(())
    }

    pub fn set_writer_index(&mut self, writer_index: usize) -> Result<()> {
        if writer_index < self.reader_index || writer_index > self.capacity() {
            return Err(Error::range(format!(
                "writer_index: {} (expected: reader_index({}) <= writer_index <= capacity({}))",
                writer_index,
                self.reader_index,
                self.capacity()
            )));
        }
        self.writer_index = writer_index;
        Ok(())
    }

    /// Sets both cursors at once, which avoids ordering problems when moving them past each other.
    pub fn set_index(&mut self, reader_index: usize, writer_index: usize) -> Result<()> {
        if reader_index > writer_index || writer_index > self.capacity() {
            return Err(Error::range(format!(
                "reader_index: {}, writer_index: {} (expected: 0 <= reader_index <= writer_index <= capacity({}))",
                reader_index,
                writer_index,
                self.capacity()
            )));
        }
        self.reader_index = reader_index;
        self.writer_index = writer_index;
        Ok(())
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer_index - self.reader_index
    }

    pub fn writable_bytes(&self) -> usize {
        self.capacity() - self.writer_index
    }

    /// Bytes that could still be written if the buffer grew to `max_capacity`.
    pub fn max_writable_bytes(&self) -> usize {
        self.max_capacity - self.writer_index
    }

    pub fn is_readable(&self) -> bool {
        self.readable_bytes() > 0
    }

    pub fn is_writable(&self) -> bool {
        self.writable_bytes() > 0
    }

    /// Resets both cursors to zero. Content is untouched.
    pub fn clear(&mut self) {
        self.reader_index = 0;
        self.writer_index = 0;
    }

    pub fn mark_reader_index(&mut self) {
        self.marked_reader_index = self.reader_index;
    }

    pub fn reset_reader_index(&mut self) -> Result<()> {
        self.set_reader_index(self.marked_reader_index)
    }

    pub fn mark_writer_index(&mut self) {
        self.marked_writer_index = self.writer_index;
    }

    pub fn reset_writer_index(&mut self) -> Result<()> {
        self.set_writer_index(self.marked_writer_index)
    }

    /// Moves the readable bytes to the front of the buffer.
    ///
    /// Marks shift with the data and saturate at zero.
    pub fn discard_read_bytes(&mut self) {
        let decrement = self.reader_index;
        if decrement == 0 {
            return;
        }

        if decrement != self.writer_index {
            match &self.storage {
                Storage::Heap(region) => region.move_to_front(decrement, self.writer_index),
                _ => {
                    let mut unread = vec![0u8; self.readable_bytes()];
                    self.read_raw(decrement, &mut unread);
                    self.write_raw(0, &unread);
                }
            }
        }
        self.writer_index -= decrement;
        self.reader_index = 0;
        self.marked_reader_index = self.marked_reader_index.saturating_sub(decrement);
        self.marked_writer_index = self.marked_writer_index.saturating_sub(decrement);
    }

    /// Makes sure `min_writable` more bytes can be written, growing if needed.
    pub fn ensure_writable_bytes(&mut self, min_writable: usize) -> Result<()> {
        if min_writable <= self.writable_bytes() {
            return Ok(());
        }
        if min_writable > self.max_writable_bytes() {
            return Err(Error::range(format!(
                "writer_index({}) + min_writable({}) exceeds max_capacity({})",
                self.writer_index, min_writable, self.max_capacity
            )));
        }

        let new_capacity = self.calculate_new_capacity(self.writer_index + min_writable);
        self.reallocate(new_capacity);
        Ok(())
    }

    /// Non-failing variant of [`ensure_writable_bytes`](Self::ensure_writable_bytes).
    ///
    /// With `force` set, a request that cannot be satisfied still grows the
    /// buffer to `max_capacity`.
    pub fn ensure_writable(&mut self, min_writable: usize, force: bool) -> Writability {
        if min_writable <= self.writable_bytes() {
            return Writability::Sufficient;
        }

        if min_writable > self.max_writable_bytes() {
            if !force || self.capacity() == self.max_capacity {
                return Writability::Exhausted;
            }
            self.reallocate(self.max_capacity);
            return Writability::GrewToMax;
        }

        let new_capacity = self.calculate_new_capacity(self.writer_index + min_writable);
        self.reallocate(new_capacity);
        Writability::Grew
    }

    pub fn calculate_new_capacity(&self, min_new_capacity: usize) -> usize {
        calculate_new_capacity(min_new_capacity, self.max_capacity)
    }

    fn reallocate(&mut self, new_capacity: usize) {
        let capacity = self.capacity();
        if new_capacity <= capacity {
            return;
        }
        let mut grown = vec![0u8; new_capacity];
        self.read_raw(0, &mut grown[..capacity]);
        self.storage = Storage::Heap(HeapRegion::new(grown));
    }

    fn check_index(&self, index: usize, length: usize) -> Result<()> {
        match index.checked_add(length) {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(Error::range(format!(
                "index: {}, length: {} (expected: range(0, {}))",
                index,
                length,
                self.capacity()
            ))),
        }
    }

    fn check_readable(&self, length: usize) -> Result<()> {
        if length > self.readable_bytes() {
            return Err(Error::range(format!(
                "no data to read: length {} exceeds readable_bytes({})",
                length,
                self.readable_bytes()
            )));
        }
        Ok(())
    }

    /// Copies `dst.len()` bytes from `index` without bounds checks beyond debug asserts.
    pub(crate) fn read_raw(&self, index: usize, dst: &mut [u8]) {
        if dst.is_empty() {
            return;
        }
        match &self.storage {
            Storage::Empty => {}
            Storage::Heap(region) => region.read(index, dst),
            Storage::Composite(components) => components.read(index, dst),
        }
    }

    fn write_raw(&self, index: usize, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        match &self.storage {
            Storage::Empty => {}
            Storage::Heap(region) => region.write(index, src),
            Storage::Composite(components) => components.write(index, src),
        }
    }

    fn fill_raw(&self, index: usize, len: usize, value: u8) {
        match &self.storage {
            Storage::Heap(region) if len > 0 => region.fill(index, len, value),
            _ => self.write_raw(index, &vec![value; len]),
        }
    }

    /// Heap regions covering `[index, index + length)`, already bounds checked.
    pub(crate) fn regions(&self, index: usize, length: usize) -> Vec<HeapRegion> {
        if length == 0 {
            return Vec::new();
        }
        match &self.storage {
            Storage::Empty => Vec::new(),
            Storage::Heap(region) => vec![region.slice(index, length)],
            Storage::Composite(components) => components.decompose(index, length),
        }
    }

    pub(crate) fn shares_window_with(&self, other: &ChannelBuffer) -> bool {
        match (&self.storage, &other.storage) {
            (Storage::Heap(a), Storage::Heap(b)) => a.same_window(b),
            (Storage::Composite(a), Storage::Composite(b)) => Arc::ptr_eq(a, b),
            (Storage::Empty, Storage::Empty) => true,
            _ => false,
        }
    }

    /// Copies bytes starting at `index` into `dst`.
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.check_index(index, dst.len())?;
        self.read_raw(index, dst);
        Ok(())
    }

    /// Copies `src` into the buffer starting at `index`. Cursors do not move.
    pub fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        self.check_index(index, src.len())?;
        self.write_raw(index, src);
        Ok(())
    }

    /// Fills up to `length` bytes from `index` with zero, clamped to the capacity.
    ///
    /// Returns the number of bytes zeroed.
    pub fn set_zero(&mut self, index: usize, length: usize) -> usize {
        let length = length.min(self.capacity().saturating_sub(index));
        if length > 0 {
            self.fill_raw(index, length, 0);
        }
        length
    }

    /// Fills `dst` from the reader cursor and advances it.
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<()> {
        self.check_readable(dst.len())?;
        self.read_raw(self.reader_index, dst);
        self.reader_index += dst.len();
        Ok(())
    }

    /// Reads `length` bytes into a newly allocated buffer.
    pub fn read_bytes(&mut self, length: usize) -> Result<ChannelBuffer> {
        self.check_readable(length)?;
        let copy = self.copy(self.reader_index, length)?;
        self.reader_index += length;
        Ok(copy)
    }

    /// Reads `length` bytes as a view sharing this buffer's storage.
    pub fn read_slice(&mut self, length: usize) -> Result<ChannelBuffer> {
        self.check_readable(length)?;
        let slice = self.slice(self.reader_index, length)?;
        self.reader_index += length;
        Ok(slice)
    }

    pub fn skip_bytes(&mut self, length: usize) -> Result<()> {
        self.check_readable(length)?;
        self.reader_index += length;
        Ok(())
    }

    /// Appends `src`, growing if allowed. Returns the bytes written, 0 if it did not fit.
    pub fn write_slice(&mut self, src: &[u8]) -> usize {
        if src.is_empty() {
            return 0;
        }
        match self.ensure_writable(src.len(), false) {
            Writability::Sufficient | Writability::Grew => {}
            Writability::GrewToMax | Writability::Exhausted => return 0,
        }
        self.write_raw(self.writer_index, src);
        self.writer_index += src.len();
        src.len()
    }

    /// Moves the readable bytes of `src` into this buffer, advancing both cursors.
    pub fn write_buffer(&mut self, src: &mut ChannelBuffer) -> usize {
        let length = src.readable_bytes();
        if length == 0 {
            return 0;
        }
        let mut staged = vec![0u8; length];
        src.read_raw(src.reader_index, &mut staged);
        let written = self.write_slice(&staged);
        src.reader_index += written;
        written
    }

    /// Appends up to `length` zero bytes, growing as far as `max_capacity` allows.
    ///
    /// Returns the number of bytes written.
    pub fn write_zero(&mut self, length: usize) -> usize {
        if length == 0 {
            return 0;
        }
        self.ensure_writable(length, true);
        let length = length.min(self.writable_bytes());
        if length > 0 {
            self.fill_raw(self.writer_index, length, 0);
            self.writer_index += length;
        }
        length
    }

    /// Writes `src` immediately before the reader cursor and moves the cursor back over it.
    pub fn write_bytes_ahead(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.reader_index {
            return Err(Error::range(format!(
                "not enough room ahead: length {} exceeds reader_index({})",
                src.len(),
                self.reader_index
            )));
        }
        self.reader_index -= src.len();
        self.write_raw(self.reader_index, src);
        Ok(())
    }

    /// Prepends up to `length` zero bytes, clamped to the room ahead of the reader cursor.
    pub fn write_zero_ahead(&mut self, length: usize) -> usize {
        let length = length.min(self.reader_index);
        if length > 0 {
            self.reader_index -= length;
            self.fill_raw(self.reader_index, length, 0);
        }
        length
    }

    /// A view of `[index, index + length)` sharing this buffer's storage.
    pub fn slice(&self, index: usize, length: usize) -> Result<ChannelBuffer> {
        self.check_index(index, length)?;
        Ok(ChannelBuffer::from_regions(
            self.order,
            self.regions(index, length),
        ))
    }

    /// A view of the readable bytes.
    pub fn readable_slice(&self) -> ChannelBuffer {
        ChannelBuffer::from_regions(
            self.order,
            self.regions(self.reader_index, self.readable_bytes()),
        )
    }

    /// A deep copy of `[index, index + length)`.
    pub fn copy(&self, index: usize, length: usize) -> Result<ChannelBuffer> {
        self.check_index(index, length)?;
        let mut data = vec![0u8; length];
        self.read_raw(index, &mut data);
        Ok(ChannelBuffer::from_vec(
            self.order,
            data,
            length,
            DEFAULT_MAX_CAPACITY.max(length),
        ))
    }

    /// Shares storage and copies the cursors and marks.
    pub fn duplicate(&self) -> ChannelBuffer {
        self.clone()
    }

    /// The flat regions making up `[index, index + length)` as independent views.
    pub fn decompose(&self, index: usize, length: usize) -> Result<Vec<ChannelBuffer>> {
        self.check_index(index, length)?;
        Ok(self
            .regions(index, length)
            .into_iter()
            .map(|region| ChannelBuffer::from_region(self.order, region))
            .collect())
    }

    /// Components of a composite buffer; a single view of the whole buffer otherwise.
    pub fn components(&self) -> Vec<ChannelBuffer> {
        self.regions(0, self.capacity())
            .into_iter()
            .map(|region| ChannelBuffer::from_region(self.order, region))
            .collect()
    }

    /// First index in the scan holding `value`.
    ///
    /// Scans `[from, to)` forwards when `from <= to`, otherwise scans backwards
    /// from `from - 1` down to `to`.
    pub fn index_of(&self, from: usize, to: usize, value: u8) -> Option<usize> {
        self.index_of_by(from, to, |b| b == value)
    }

    pub fn index_of_by<F>(&self, from: usize, to: usize, mut predicate: F) -> Option<usize>
    where
        F: FnMut(u8) -> bool,
    {
        let capacity = self.capacity();
        let mut byte = [0u8; 1];
        if from <= to {
            let to = to.min(capacity);
            (from..to).find(|&i| {
                self.read_raw(i, &mut byte);
                predicate(byte[0])
            })
        } else {
            let from = from.min(capacity);
            (to..from).rev().find(|&i| {
                self.read_raw(i, &mut byte);
                predicate(byte[0])
            })
        }
    }

    /// Distance from the reader cursor to the first readable `value`.
    pub fn bytes_before(&self, value: u8) -> Option<usize> {
        self.bytes_before_by(|b| b == value)
    }

    pub fn bytes_before_by<F>(&self, predicate: F) -> Option<usize>
    where
        F: FnMut(u8) -> bool,
    {
        self.index_of_by(self.reader_index, self.writer_index, predicate)
            .map(|i| i - self.reader_index)
    }

    /// Copies the readable bytes out.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.readable_bytes()];
        self.read_raw(self.reader_index, &mut out);
        out
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.to_vec()).into_owned()
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::from(self.to_vec())
    }

    /// Lowercase hex of the readable bytes.
    pub fn hex_dump(&self) -> String {
        hex::hex_dump_readable(self)
    }
}

impl Default for ChannelBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ChannelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBuffer")
            .field("reader_index", &self.reader_index)
            .field("writer_index", &self.writer_index)
            .field("capacity", &self.capacity())
            .field("max_capacity", &self.max_capacity)
            .field("order", &self.order)
            .field("composite", &self.is_composite())
            .finish()
    }
}

impl From<bytes::Bytes> for ChannelBuffer {
    fn from(bytes: bytes::Bytes) -> Self {
        wrapped_vec(ByteOrder::BigEndian, bytes.to_vec())
    }
}

impl From<Vec<u8>> for ChannelBuffer {
    fn from(data: Vec<u8>) -> Self {
        wrapped_vec(ByteOrder::BigEndian, data)
    }
}

impl From<&[u8]> for ChannelBuffer {
    fn from(data: &[u8]) -> Self {
        copied_slice(ByteOrder::BigEndian, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(data: &[u8]) -> ChannelBuffer {
        let mut buf = buffer(ByteOrder::BigEndian, data.len());
        buf.write_slice(data);
        buf
    }

    #[test]
    fn test_cursor_bounds() {
        let mut buf = fixed_buffer(ByteOrder::BigEndian, 8);
        assert!(buf.set_writer_index(9).is_err());
        buf.set_writer_index(4).unwrap();
        assert!(buf.set_reader_index(5).is_err());
        buf.set_reader_index(4).unwrap();
        assert!(buf.set_writer_index(3).is_err());
        assert!(buf.set_index(6, 5).is_err());
        buf.set_index(1, 8).unwrap();
        assert_eq!(buf.readable_bytes(), 7);
        assert_eq!(buf.writable_bytes(), 0);
    }

    #[test]
    fn test_failed_set_leaves_state() {
        let mut buf = filled(b"abcd");
        buf.set_reader_index(1).unwrap();
        assert!(buf.set_index(3, 100).is_err());
        assert_eq!((buf.reader_index(), buf.writer_index()), (1, 4));
    }

    #[test]
    fn test_marks() {
        let mut buf = filled(b"abcdef");
        buf.skip_bytes(2).unwrap();
        buf.mark_reader_index();
        buf.skip_bytes(3).unwrap();
        buf.reset_reader_index().unwrap();
        assert_eq!(buf.reader_index(), 2);

        buf.mark_writer_index();
        buf.write_slice(b"gh");
        buf.reset_writer_index().unwrap();
        assert_eq!(buf.writer_index(), 6);
    }

    #[test]
    fn test_discard_read_bytes() {
        let mut buf = filled(b"0123456789");
        buf.skip_bytes(4).unwrap();
        buf.mark_reader_index();
        buf.mark_writer_index();
        buf.skip_bytes(2).unwrap();
        let capacity = buf.capacity();

        buf.discard_read_bytes();
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.writer_index(), 4);
        assert_eq!(buf.to_vec(), b"6789");
        assert_eq!(buf.capacity(), capacity);

        // reader mark was at 4, shifted by 6 and clamped; writer mark was at 10
        buf.reset_reader_index().unwrap();
        assert_eq!(buf.reader_index(), 0);
        buf.reset_writer_index().unwrap();
        assert_eq!(buf.writer_index(), 4);
    }

    #[test]
    fn test_discard_read_bytes_when_fully_read() {
        let mut buf = filled(b"abc");
        buf.skip_bytes(3).unwrap();
        buf.discard_read_bytes();
        assert_eq!((buf.reader_index(), buf.writer_index()), (0, 0));
    }

    #[test]
    fn test_discard_read_bytes_noop_at_zero() {
        let mut buf = filled(b"abc");
        let before = (buf.capacity(), buf.writer_index(), buf.to_vec());
        buf.discard_read_bytes();
        assert_eq!((buf.capacity(), buf.writer_index(), buf.to_vec()), before);
    }

    #[test]
    fn test_growth() {
        let mut buf = buffer(ByteOrder::BigEndian, 0);
        assert_eq!(buf.capacity(), 0);
        buf.write_slice(b"x");
        assert_eq!(buf.capacity(), 64);
        buf.write_slice(&[0u8; 64]);
        assert_eq!(buf.capacity(), 128);
        assert_eq!(buf.readable_bytes(), 65);
    }

    #[test]
    fn test_ensure_writable_tristate() {
        let mut buf = ChannelBuffer::from_vec(ByteOrder::BigEndian, vec![0; 4], 0, 10);
        assert_eq!(buf.ensure_writable(4, false), Writability::Sufficient);
        assert_eq!(buf.ensure_writable(8, false), Writability::Grew);
        assert_eq!(buf.capacity(), 10);
        buf.set_writer_index(8).unwrap();
        assert_eq!(buf.ensure_writable(5, false), Writability::Exhausted);
        assert_eq!(buf.ensure_writable(5, true), Writability::Exhausted);

        let mut buf = ChannelBuffer::from_vec(ByteOrder::BigEndian, vec![0; 4], 4, 10);
        assert_eq!(buf.ensure_writable(20, true), Writability::GrewToMax);
        assert_eq!(buf.capacity(), 10);
        assert!(buf.ensure_writable_bytes(7).is_err());
        buf.ensure_writable_bytes(6).unwrap();
    }

    #[test]
    fn test_calculate_new_capacity() {
        let max = DEFAULT_MAX_CAPACITY;
        assert_eq!(calculate_new_capacity(0, max), 64);
        assert_eq!(calculate_new_capacity(64, max), 64);
        assert_eq!(calculate_new_capacity(65, max), 128);
        assert_eq!(calculate_new_capacity(1000, 512), 512);
        assert_eq!(
            calculate_new_capacity(CAPACITY_THRESHOLD, max),
            CAPACITY_THRESHOLD
        );
        assert_eq!(
            calculate_new_capacity(CAPACITY_THRESHOLD + 1, max),
            2 * CAPACITY_THRESHOLD
        );
        assert_eq!(
            calculate_new_capacity(3 * CAPACITY_THRESHOLD, max),
            3 * CAPACITY_THRESHOLD
        );
        assert_eq!(
            calculate_new_capacity(CAPACITY_THRESHOLD + 1, CAPACITY_THRESHOLD + 10),
            CAPACITY_THRESHOLD + 10
        );
    }

    #[test]
    fn test_write_fails_on_fixed_buffer() {
        let mut buf = fixed_buffer(ByteOrder::BigEndian, 3);
        assert_eq!(buf.write_slice(b"abcd"), 0);
        assert_eq!(buf.writer_index(), 0);
        assert_eq!(buf.write_slice(b"abc"), 3);
        assert_eq!(buf.write_u8(1), 0);
    }

    #[test]
    fn test_read_bytes_and_slice() {
        let mut buf = filled(b"hello world");
        let hello = buf.read_bytes(5).unwrap();
        assert_eq!(hello.to_vec(), b"hello");
        buf.skip_bytes(1).unwrap();
        let mut world = buf.read_slice(5).unwrap();
        assert_eq!(world.to_vec(), b"world");
        assert!(buf.read_slice(1).is_err());

        // a slice observes writes to the parent storage but keeps its own cursors
        buf.set_bytes(6, b"W").unwrap();
        assert_eq!(world.to_vec(), b"World");
        world.skip_bytes(1).unwrap();
        assert_eq!(buf.reader_index(), 11);
        assert_eq!(world.capacity(), 5);
    }

    #[test]
    fn test_copy_is_independent() {
        let mut buf = filled(b"abc");
        let copy = buf.copy(0, 3).unwrap();
        buf.set_bytes(0, b"z").unwrap();
        assert_eq!(copy.to_vec(), b"abc");
        assert!(buf.copy(2, 2).is_err());
        assert!(buf.slice(1, 3).is_err());
    }

    #[test]
    fn test_slice_preserves_order() {
        let buf = filled(&[1, 0, 0, 0]).with_order(ByteOrder::LittleEndian);
        let mut slice = buf.slice(0, 4).unwrap();
        assert_eq!(slice.order(), ByteOrder::LittleEndian);
        assert_eq!(slice.read_u32(), 1);
        assert_eq!(buf.copy(0, 4).unwrap().order(), ByteOrder::LittleEndian);
        assert_eq!(buf.slice(2, 0).unwrap().order(), ByteOrder::LittleEndian);
    }

    #[test]
    fn test_write_ahead() {
        let mut buf = filled(b"\0\0\0\0body");
        buf.skip_bytes(4).unwrap();
        buf.write_u16_ahead(0x0102).unwrap();
        assert_eq!(buf.reader_index(), 2);
        assert!(buf.write_bytes_ahead(b"abc").is_err());
        assert_eq!(buf.reader_index(), 2);
        buf.write_bytes_ahead(b"ab").unwrap();
        assert_eq!(buf.to_vec(), b"ab\x01\x02body");
    }

    #[test]
    fn test_zero_helpers_clamp() {
        let mut buf = filled(b"abcdef");
        assert_eq!(buf.set_zero(4, 10), buf.capacity() - 4);
        assert_eq!(buf.set_zero(100, 1), 0);
        buf.skip_bytes(3).unwrap();
        assert_eq!(buf.write_zero_ahead(5), 3);
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.to_vec()[..4], [0, 0, 0, b'd']);

        let mut fixed = fixed_buffer(ByteOrder::BigEndian, 4);
        fixed.write_slice(b"ab");
        assert_eq!(fixed.write_zero(10), 2);
        assert_eq!(fixed.writer_index(), 4);
    }

    #[test]
    fn test_index_of() {
        let buf = filled(b"a,b,c");
        assert_eq!(buf.index_of(0, 5, b','), Some(1));
        assert_eq!(buf.index_of(2, 5, b','), Some(3));
        assert_eq!(buf.index_of(5, 0, b','), Some(3));
        assert_eq!(buf.index_of(3, 0, b','), Some(1));
        assert_eq!(buf.index_of(0, 5, b'x'), None);
        assert_eq!(buf.index_of_by(0, 100, |b| b == b'c'), Some(4));
        assert_eq!(buf.bytes_before(b'b'), Some(2));
        assert_eq!(buf.bytes_before(b'z'), None);
    }

    #[test]
    fn test_empty_singleton() {
        let empty = ChannelBuffer::empty();
        assert_eq!(empty.capacity(), 0);
        assert_eq!(empty.max_capacity(), 0);
        assert_eq!(empty, ChannelBuffer::default());
        assert_eq!(empty, fixed_buffer(ByteOrder::LittleEndian, 10));
        assert_eq!(empty.hex_dump(), "");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Write(Vec<u8>),
            WriteZero(usize),
            Skip(usize),
            ReadBytes(usize),
            SetReader(usize),
            SetWriter(usize),
            SetIndex(usize, usize),
            Ensure(usize),
            EnsureForced(usize),
            Discard,
            Clear,
            MarkReader,
            ResetReader,
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                prop::collection::vec(any::<u8>(), 0..48).prop_map(Op::Write),
                (0usize..96).prop_map(Op::WriteZero),
                (0usize..48).prop_map(Op::Skip),
                (0usize..48).prop_map(Op::ReadBytes),
                (0usize..160).prop_map(Op::SetReader),
                (0usize..160).prop_map(Op::SetWriter),
                (0usize..160, 0usize..160).prop_map(|(r, w)| Op::SetIndex(r, w)),
                (0usize..192).prop_map(Op::Ensure),
                (0usize..192).prop_map(Op::EnsureForced),
                Just(Op::Discard),
                Just(Op::Clear),
                Just(Op::MarkReader),
                Just(Op::ResetReader),
            ]
        }

        fn cursors(buf: &ChannelBuffer) -> (usize, usize, usize) {
            (buf.reader_index(), buf.writer_index(), buf.capacity())
        }

        proptest! {
            #[test]
            fn prop_cursors_stay_in_bounds(
                capacity in 0usize..64,
                headroom in 0usize..96,
                ops in prop::collection::vec(op(), 0..40)
            ) {
                let mut buf = ChannelBuffer::from_vec(ByteOrder::BigEndian, vec![0u8; capacity], 0, capacity + headroom);
                for op in ops {
                    let before = cursors(&buf);
                    let failed = match op {
                        Op::Write(data) => !data.is_empty() && buf.write_slice(&data) == 0,
                        Op::WriteZero(n) => {
                            buf.write_zero(n);
                            false
                        }
                        Op::Skip(n) => buf.skip_bytes(n).is_err(),
                        Op::ReadBytes(n) => buf.read_bytes(n).is_err(),
                        Op::SetReader(n) => buf.set_reader_index(n).is_err(),
                        Op::SetWriter(n) => buf.set_writer_index(n).is_err(),
                        Op::SetIndex(r, w) => buf.set_index(r, w).is_err(),
                        Op::Ensure(n) => buf.ensure_writable_bytes(n).is_err(),
                        Op::EnsureForced(n) => {
                            buf.ensure_writable(n, true);
                            false
                        }
                        Op::Discard => {
                            buf.discard_read_bytes();
                            false
                        }
                        Op::Clear => {
                            buf.clear();
                            false
                        }
                        Op::MarkReader => {
                            buf.mark_reader_index();
                            false
                        }
                        Op::ResetReader => buf.reset_reader_index().is_err(),
                    };
                    if failed {
                        prop_assert_eq!(cursors(&buf), before);
                    }
                    prop_assert!(buf.reader_index() <= buf.writer_index());
                    prop_assert!(buf.writer_index() <= buf.capacity());
                    prop_assert!(buf.capacity() <= buf.max_capacity());
                }
            }

            #[test]
            fn prop_capacity_growth_law(
                min_new_capacity in 0usize..(3 * CAPACITY_THRESHOLD),
                max_capacity in 0usize..(4 * CAPACITY_THRESHOLD)
            ) {
                let capacity = calculate_new_capacity(min_new_capacity, max_capacity);
                prop_assert!(capacity <= max_capacity);
                if max_capacity >= min_new_capacity {
                    prop_assert!(capacity >= min_new_capacity);
                }
                if capacity < max_capacity {
                    if min_new_capacity < CAPACITY_THRESHOLD {
                        prop_assert!(capacity >= MIN_CAPACITY);
                        prop_assert!(capacity.is_power_of_two());
                        prop_assert!(capacity == MIN_CAPACITY || capacity / 2 < min_new_capacity);
                    } else {
                        prop_assert_eq!(capacity % CAPACITY_THRESHOLD, 0);
                        prop_assert!(capacity - CAPACITY_THRESHOLD < min_new_capacity);
                    }
                }
            }

            #[test]
            fn prop_growth_follows_capacity_law(
                written in 0usize..256,
                extra in 1usize..4096
            ) {
                let mut buf = buffer(ByteOrder::BigEndian, 0);
                buf.write_zero(written);
                let capacity = buf.capacity();
                buf.ensure_writable_bytes(extra).unwrap();
                if written + extra <= capacity {
                    prop_assert_eq!(buf.capacity(), capacity);
                } else {
                    prop_assert_eq!(buf.capacity(), calculate_new_capacity(written + extra, buf.max_capacity()));
                }
            }
        }
    }
}
