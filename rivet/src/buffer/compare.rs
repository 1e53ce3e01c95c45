//! Value semantics for buffers.
//!
//! Comparison, equality and hashing all look at the readable bytes only and
//! treat every word as big-endian, so two buffers holding the same bytes agree
//! no matter their byte order or whether they are flat or composite.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use super::ChannelBuffer;

const WORD: usize = 4;

impl ChannelBuffer {
    /// Polynomial hash (multiplier 31) over the readable bytes, never zero.
    pub fn hash_code(&self) -> i32 {
        let bytes = self.to_vec();
        let mut words = bytes.chunks_exact(WORD);
        let mut hash: i32 = 1;
        for word in &mut words {
            let value = i32::from_be_bytes([word[0], word[1], word[2], word[3]]);
            hash = hash.wrapping_mul(31).wrapping_add(value);
        }
        for &byte in words.remainder() {
            hash = hash.wrapping_mul(31).wrapping_add(byte as i8 as i32);
        }
        if hash == 0 { 1 } else { hash }
    }

    /// True when both buffers hold the same readable bytes.
    pub fn equals(&self, other: &ChannelBuffer) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.readable_bytes() != other.readable_bytes() {
            return false;
        }
        if self.reader_index == other.reader_index && self.shares_window_with(other) {
            return true;
        }
        self.compare_to(other) == Ordering::Equal
    }

    /// Lexicographic comparison of the readable bytes, one big-endian word at a time.
    pub fn compare_to(&self, other: &ChannelBuffer) -> Ordering {
        let a = self.to_vec();
        let b = other.to_vec();
        let common = a.len().min(b.len());
        let words = common / WORD;

        for i in 0..words {
            let at = i * WORD;
            let va = u32::from_be_bytes([a[at], a[at + 1], a[at + 2], a[at + 3]]);
            let vb = u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]);
            match va.cmp(&vb) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        for i in words * WORD..common {
            match a[i].cmp(&b[i]) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        a.len().cmp(&b.len())
    }
}

impl PartialEq for ChannelBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for ChannelBuffer {}

impl PartialOrd for ChannelBuffer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelBuffer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_to(other)
    }
}

impl Hash for ChannelBuffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.hash_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ByteOrder, copied_slice, wrapped_buffers, wrapped_vec};
    use proptest::prelude::*;

    #[test]
    fn test_hash_matches_reference_values() {
        // 1 * 31 + 0x61626364, then one trailing byte
        let buf = copied_slice(ByteOrder::BigEndian, b"abcde");
        let expected = 31i32
            .wrapping_add(0x6162_6364)
            .wrapping_mul(31)
            .wrapping_add(b'e' as i32);
        assert_eq!(buf.hash_code(), expected);

        assert_eq!(copied_slice(ByteOrder::BigEndian, b"").hash_code(), 1);
        // negative trailing bytes are sign extended
        let buf = copied_slice(ByteOrder::BigEndian, &[0xff]);
        assert_eq!(buf.hash_code(), 31 - 1);
    }

    #[test]
    fn test_ordering() {
        let a = copied_slice(ByteOrder::BigEndian, b"abcd1");
        let b = copied_slice(ByteOrder::LittleEndian, b"abcd2");
        let c = copied_slice(ByteOrder::BigEndian, b"abcd");
        assert!(a < b);
        assert!(c < a);
        assert_eq!(a.compare_to(&a.duplicate()), Ordering::Equal);

        // the byte order must not flip the result of a word comparison
        let x = copied_slice(ByteOrder::LittleEndian, &[0x01, 0, 0, 0]);
        let y = copied_slice(ByteOrder::LittleEndian, &[0x00, 0, 0, 1]);
        assert!(x > y);
    }

    #[test]
    fn test_equality_ignores_consumed_bytes() {
        let mut a = copied_slice(ByteOrder::BigEndian, b"xxhello");
        a.skip_bytes(2).unwrap();
        let b = copied_slice(ByteOrder::LittleEndian, b"hello");
        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
        a.skip_bytes(1).unwrap();
        assert_ne!(a, b);
    }

    fn split(data: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
        let mut parts = Vec::new();
        let mut start = 0;
        for &cut in cuts {
            let cut = cut.min(data.len()).max(start);
            parts.push(data[start..cut].to_vec());
            start = cut;
        }
        parts.push(data[start..].to_vec());
        parts
    }

    proptest! {
        #[test]
        fn prop_hash_and_equality_ignore_representation(
            data in proptest::collection::vec(any::<u8>(), 0..64),
            cuts in proptest::collection::vec(0usize..64, 0..4)
        ) {
            let mut cuts = cuts;
            cuts.sort_unstable();
            let flat = copied_slice(ByteOrder::BigEndian, &data);
            let swapped = copied_slice(ByteOrder::LittleEndian, &data);
            let composite = wrapped_buffers(
                &split(&data, &cuts)
                    .into_iter()
                    .map(|part| wrapped_vec(ByteOrder::LittleEndian, part))
                    .collect::<Vec<_>>(),
            )
            .unwrap();

            prop_assert_eq!(&flat, &swapped);
            prop_assert_eq!(&flat, &composite);
            prop_assert_eq!(flat.hash_code(), swapped.hash_code());
            prop_assert_eq!(flat.hash_code(), composite.hash_code());
            prop_assert_eq!(composite.cmp(&flat), Ordering::Equal);
        }

        #[test]
        fn prop_compare_matches_slice_order(
            a in proptest::collection::vec(any::<u8>(), 0..24),
            b in proptest::collection::vec(any::<u8>(), 0..24)
        ) {
            let x = copied_slice(ByteOrder::LittleEndian, &a);
            let y = copied_slice(ByteOrder::BigEndian, &b);
            prop_assert_eq!(x.compare_to(&y), a.cmp(&b));
        }
    }
}
