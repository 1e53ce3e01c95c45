//! Fixed-width accessors.
//!
//! Every primitive gets absolute `get_*`/`set_*`, cursor-based `read_*`/`try_read_*`,
//! `write_*` and `write_*_ahead`, all honouring the buffer's [`ByteOrder`].
//! `read_*` is the lenient form: it yields zero and leaves the cursor alone when
//! not enough bytes are readable. `try_read_*` reports a range error instead.

use super::{ByteOrder, ChannelBuffer};
use crate::error::Result;

macro_rules! fixed_width {
    ($($ty:ty => $get:ident, $set:ident, $read:ident, $try_read:ident, $write:ident, $write_ahead:ident;)*) => {
        impl ChannelBuffer {
            $(
                pub fn $get(&self, index: usize) -> Result<$ty> {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    self.get_bytes(index, &mut raw)?;
                    Ok(match self.order {
                        ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
                        ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                    })
                }

                pub fn $set(&mut self, index: usize, value: $ty) -> Result<()> {
                    let raw = match self.order {
                        ByteOrder::BigEndian => value.to_be_bytes(),
                        ByteOrder::LittleEndian => value.to_le_bytes(),
                    };
                    self.set_bytes(index, &raw)
                }

                pub fn $try_read(&mut self) -> Result<$ty> {
                    self.check_readable(std::mem::size_of::<$ty>())?;
                    let value = self.$get(self.reader_index)?;
                    self.reader_index += std::mem::size_of::<$ty>();
                    Ok(value)
                }

                pub fn $read(&mut self) -> $ty {
                    self.$try_read().unwrap_or_default()
                }

                pub fn $write(&mut self, value: $ty) -> usize {
                    let raw = match self.order {
                        ByteOrder::BigEndian => value.to_be_bytes(),
                        ByteOrder::LittleEndian => value.to_le_bytes(),
                    };
                    self.write_slice(&raw)
                }

                pub fn $write_ahead(&mut self, value: $ty) -> Result<()> {
                    let raw = match self.order {
                        ByteOrder::BigEndian => value.to_be_bytes(),
                        ByteOrder::LittleEndian => value.to_le_bytes(),
                    };
                    self.write_bytes_ahead(&raw)
                }
            )*
        }
    };
}

fixed_width! {
    u8 => get_u8, set_u8, read_u8, try_read_u8, write_u8, write_u8_ahead;
    i8 => get_i8, set_i8, read_i8, try_read_i8, write_i8, write_i8_ahead;
    u16 => get_u16, set_u16, read_u16, try_read_u16, write_u16, write_u16_ahead;
    i16 => get_i16, set_i16, read_i16, try_read_i16, write_i16, write_i16_ahead;
    u32 => get_u32, set_u32, read_u32, try_read_u32, write_u32, write_u32_ahead;
    i32 => get_i32, set_i32, read_i32, try_read_i32, write_i32, write_i32_ahead;
    u64 => get_u64, set_u64, read_u64, try_read_u64, write_u64, write_u64_ahead;
    i64 => get_i64, set_i64, read_i64, try_read_i64, write_i64, write_i64_ahead;
    f32 => get_f32, set_f32, read_f32, try_read_f32, write_f32, write_f32_ahead;
    f64 => get_f64, set_f64, read_f64, try_read_f64, write_f64, write_f64_ahead;
}

// 24-bit "medium" values have no native type.
impl ChannelBuffer {
    fn medium_to_raw(&self, value: u32) -> [u8; 3] {
        let be = value.to_be_bytes();
        match self.order {
            ByteOrder::BigEndian => [be[1], be[2], be[3]],
            ByteOrder::LittleEndian => [be[3], be[2], be[1]],
        }
    }

    pub fn get_u24(&self, index: usize) -> Result<u32> {
        let mut raw = [0u8; 3];
        self.get_bytes(index, &mut raw)?;
        Ok(match self.order {
            ByteOrder::BigEndian => u32::from_be_bytes([0, raw[0], raw[1], raw[2]]),
            ByteOrder::LittleEndian => u32::from_le_bytes([raw[0], raw[1], raw[2], 0]),
        })
    }

    pub fn get_i24(&self, index: usize) -> Result<i32> {
        let value = self.get_u24(index)?;
        Ok(((value << 8) as i32) >> 8)
    }

    /// Stores the low 24 bits of `value`.
    pub fn set_u24(&mut self, index: usize, value: u32) -> Result<()> {
        let raw = self.medium_to_raw(value);
        self.set_bytes(index, &raw)
    }

    pub fn try_read_u24(&mut self) -> Result<u32> {
        self.check_readable(3)?;
        let value = self.get_u24(self.reader_index)?;
        self.reader_index += 3;
        Ok(value)
    }

    pub fn read_u24(&mut self) -> u32 {
        self.try_read_u24().unwrap_or_default()
    }

    pub fn try_read_i24(&mut self) -> Result<i32> {
        self.check_readable(3)?;
        let value = self.get_i24(self.reader_index)?;
        self.reader_index += 3;
        Ok(value)
    }

    pub fn read_i24(&mut self) -> i32 {
        self.try_read_i24().unwrap_or_default()
    }

    pub fn write_u24(&mut self, value: u32) -> usize {
        let raw = self.medium_to_raw(value);
        self.write_slice(&raw)
    }

    pub fn write_u24_ahead(&mut self, value: u32) -> Result<()> {
        let raw = self.medium_to_raw(value);
        self.write_bytes_ahead(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::buffer;
    use crate::error::Error;
    use proptest::prelude::*;

    #[test]
    fn test_byte_order_layout() {
        let mut be = buffer(ByteOrder::BigEndian, 8);
        be.write_u32(0x0102_0304);
        assert_eq!(be.to_vec(), [1, 2, 3, 4]);

        let mut le = buffer(ByteOrder::LittleEndian, 8);
        le.write_u32(0x0102_0304);
        assert_eq!(le.to_vec(), [4, 3, 2, 1]);
    }

    #[test]
    fn test_lenient_and_checked_reads() {
        let mut buf = buffer(ByteOrder::BigEndian, 8);
        buf.write_u16(7);
        assert_eq!(buf.read_u32(), 0);
        assert_eq!(buf.reader_index(), 0);
        assert!(matches!(buf.try_read_u32(), Err(Error::Range(msg)) if msg.starts_with("no data to read")));
        assert_eq!(buf.read_u16(), 7);
        assert_eq!(buf.read_u8(), 0);
    }

    #[test]
    fn test_medium() {
        for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let mut buf = buffer(order, 8);
            buf.write_u24(0x00ab_cdef);
            buf.write_u24(0x00ff_fffe);
            assert_eq!(buf.readable_bytes(), 6);
            assert_eq!(buf.read_u24(), 0x00ab_cdef);
            assert_eq!(buf.read_i24(), -2);
        }
    }

    #[test]
    fn test_get_set_do_not_move_cursors() {
        let mut buf = buffer(ByteOrder::LittleEndian, 16);
        buf.write_zero(16);
        buf.set_i64(8, -5).unwrap();
        assert_eq!(buf.get_i64(8).unwrap(), -5);
        assert!(buf.get_i64(9).is_err());
        assert!(buf.set_u16(15, 1).is_err());
        assert_eq!((buf.reader_index(), buf.writer_index()), (0, 16));
    }

    fn order() -> impl Strategy<Value = ByteOrder> {
        prop_oneof![Just(ByteOrder::BigEndian), Just(ByteOrder::LittleEndian)]
    }

    proptest! {
        #[test]
        fn prop_integers_round_trip(
            order in order(),
            a in any::<u8>(),
            b in any::<i16>(),
            c in any::<u32>(),
            d in any::<i64>(),
            e in any::<u64>()
        ) {
            let mut buf = buffer(order, 0);
            buf.write_u8(a);
            buf.write_i16(b);
            buf.write_u32(c);
            buf.write_i64(d);
            buf.write_u64(e);
            prop_assert_eq!(buf.read_u8(), a);
            prop_assert_eq!(buf.read_i16(), b);
            prop_assert_eq!(buf.read_u32(), c);
            prop_assert_eq!(buf.read_i64(), d);
            prop_assert_eq!(buf.read_u64(), e);
            prop_assert!(!buf.is_readable());
        }

        #[test]
        fn prop_floats_round_trip(order in order(), f in any::<f32>(), d in any::<f64>()) {
            let mut buf = buffer(order, 0);
            buf.write_f32(f);
            buf.write_f64(d);
            prop_assert_eq!(buf.read_f32().to_bits(), f.to_bits());
            prop_assert_eq!(buf.read_f64().to_bits(), d.to_bits());
        }

        #[test]
        fn prop_ahead_round_trip(order in order(), v in any::<u32>()) {
            let mut buf = buffer(order, 8);
            buf.write_zero(8);
            buf.skip_bytes(8).unwrap();
            buf.write_u32_ahead(v).unwrap();
            prop_assert_eq!(buf.read_u32(), v);
        }
    }
}
