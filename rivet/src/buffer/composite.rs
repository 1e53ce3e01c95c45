use super::HeapRegion;

/// Flat list of heap regions addressed as one continuous range.
///
/// Regions are never empty and never composite themselves, so every lookup is a
/// single binary search over `offsets`.
pub(crate) struct Components {
    regions: Vec<HeapRegion>,
    offsets: Vec<usize>,
    capacity: usize,
}

impl Components {
    pub(crate) fn new(regions: Vec<HeapRegion>) -> Self {
        let mut offsets = Vec::with_capacity(regions.len());
        let mut capacity = 0;
        for region in &regions {
            offsets.push(capacity);
            capacity += region.len();
        }
        Self {
            regions,
            offsets,
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the region containing byte `index`.
    fn locate(&self, index: usize) -> usize {
        match self.offsets.binary_search(&index) {
            Ok(i) => i,
            Err(i) => i - 1,
        }
    }

    /// Visits `(region, local_index, len, done)` for each piece of `[index, index + len)`.
    fn walk<F>(&self, index: usize, len: usize, mut f: F)
    where
        F: FnMut(&HeapRegion, usize, usize, usize),
    {
        if len == 0 {
            return;
        }
        let mut i = self.locate(index);
        let mut index = index;
        let mut done = 0;
        while done < len {
            let region = &self.regions[i];
            let local = index - self.offsets[i];
            let n = (region.len() - local).min(len - done);
            f(region, local, n, done);
            index += n;
            done += n;
            i += 1;
        }
    }

    pub(crate) fn read(&self, index: usize, dst: &mut [u8]) {
        self.walk(index, dst.len(), |region, local, n, done| {
            region.read(local, &mut dst[done..done + n])
        });
    }

    pub(crate) fn write(&self, index: usize, src: &[u8]) {
        self.walk(index, src.len(), |region, local, n, done| {
            region.write(local, &src[done..done + n])
        });
    }

    /// Views of the regions covering `[index, index + len)`.
    pub(crate) fn decompose(&self, index: usize, len: usize) -> Vec<HeapRegion> {
        let mut out = Vec::new();
        self.walk(index, len, |region, local, n, _| {
            out.push(region.slice(local, n))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::{ByteOrder, wrapped_buffers, wrapped_vec};

    fn composite() -> crate::buffer::ChannelBuffer {
        wrapped_buffers(&[
            wrapped_vec(ByteOrder::BigEndian, b"abc".to_vec()),
            wrapped_vec(ByteOrder::BigEndian, b"de".to_vec()),
            wrapped_vec(ByteOrder::BigEndian, b"fghi".to_vec()),
        ])
        .unwrap()
    }

    #[test]
    fn test_reads_span_components() {
        let buf = composite();
        assert!(buf.is_composite());
        assert_eq!(buf.capacity(), 9);
        assert_eq!(buf.to_vec(), b"abcdefghi");

        let mut dst = [0u8; 4];
        buf.get_bytes(2, &mut dst).unwrap();
        assert_eq!(&dst, b"cdef");
        assert_eq!(buf.get_u16(4).unwrap(), u16::from_be_bytes(*b"ef"));
        assert!(buf.get_bytes(6, &mut dst).is_err());
    }

    #[test]
    fn test_writes_reach_components() {
        let first = wrapped_vec(ByteOrder::BigEndian, b"abc".to_vec());
        let second = wrapped_vec(ByteOrder::BigEndian, b"def".to_vec());
        let mut buf = wrapped_buffers(&[first.clone(), second.clone()]).unwrap();

        buf.set_bytes(2, b"XY").unwrap();
        assert_eq!(first.to_vec(), b"abX");
        assert_eq!(second.to_vec(), b"Yef");
        assert_eq!(buf.to_vec(), b"abXYef");
    }

    #[test]
    fn test_slice_within_and_across() {
        let buf = composite();
        let inner = buf.slice(5, 3).unwrap();
        assert!(!inner.is_composite());
        assert_eq!(inner.to_vec(), b"fgh");

        let across = buf.slice(1, 5).unwrap();
        assert!(across.is_composite());
        assert_eq!(across.to_vec(), b"bcdef");
        assert_eq!(across.components().len(), 3);
    }

    #[test]
    fn test_discard_read_bytes() {
        let mut buf = composite();
        buf.skip_bytes(4).unwrap();
        buf.discard_read_bytes();
        assert_eq!(buf.to_vec(), b"efghi");
        assert_eq!(buf.writer_index(), 5);
        assert_eq!(buf.writable_bytes(), 4);
    }

    #[test]
    fn test_index_of_spans_components() {
        let buf = composite();
        assert_eq!(buf.index_of(0, 9, b'g'), Some(6));
        assert_eq!(buf.index_of(9, 0, b'c'), Some(2));
    }
}
