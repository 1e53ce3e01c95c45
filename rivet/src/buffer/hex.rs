use super::ChannelBuffer;
use crate::error::Result;

static HEXDUMP_TABLE: [[u8; 2]; 256] = hexdump_table();

const fn hexdump_table() -> [[u8; 2]; 256] {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut table = [[0u8; 2]; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = [DIGITS[i >> 4], DIGITS[i & 0x0f]];
        i += 1;
    }
    table
}

fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        let [hi, lo] = HEXDUMP_TABLE[b as usize];
        out.push(hi as char);
        out.push(lo as char);
    }
    out
}

/// Lowercase hex of `[from_index, from_index + length)`.
pub fn hex_dump(buffer: &ChannelBuffer, from_index: usize, length: usize) -> Result<String> {
    let mut bytes = vec![0u8; length];
    buffer.get_bytes(from_index, &mut bytes)?;
    Ok(encode(&bytes))
}

pub(super) fn hex_dump_readable(buffer: &ChannelBuffer) -> String {
    encode(&buffer.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ByteOrder, copied_slice};

    #[test]
    fn test_hex_dump() {
        let buf = copied_slice(ByteOrder::BigEndian, &[0x12, 0x34, 0x56]);
        assert_eq!(buf.hex_dump(), "123456");
        assert_eq!(hex_dump(&buf, 1, 2).unwrap(), "3456");
        assert!(hex_dump(&buf, 2, 2).is_err());
    }

    #[test]
    fn test_table_covers_every_byte() {
        let all: Vec<u8> = (0..=255).collect();
        let buf = copied_slice(ByteOrder::LittleEndian, &all);
        let dump = buf.hex_dump();
        assert_eq!(dump.len(), 512);
        assert!(dump.starts_with("000102"));
        assert!(dump.ends_with("fdfeff"));
        assert_eq!(&dump[20..22], "0a");
    }
}
