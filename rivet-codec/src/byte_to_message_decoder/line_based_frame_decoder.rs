use log::debug;
use rivet::{ChannelBuffer, Error, Result};

use super::MessageDecoder;

/// Which line endings end a frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TerminatorType {
    /// `\n` or `\r\n`.
    #[default]
    Both,
    /// `\n` only; a preceding `\r` stays part of the frame.
    Newline,
    /// `\r\n` only; a lone `\n` is ordinary data.
    CrLf,
}

/// Splits a byte stream into frames at line endings.
///
/// A line longer than `max_length` is dropped as a whole, even if it arrives
/// in pieces, and reported as [`Error::Decode`] once its end has been seen.
#[derive(Debug)]
pub struct LineBasedFrameDecoder {
    max_length: usize,
    strip_delimiter: bool,
    terminator_type: TerminatorType,

    discarding: bool,
    discarded_bytes: usize,
}

impl LineBasedFrameDecoder {
    pub fn new(max_length: usize, strip_delimiter: bool, terminator_type: TerminatorType) -> Self {
        Self {
            max_length,
            strip_delimiter,
            terminator_type,
            discarding: false,
            discarded_bytes: 0,
        }
    }

    /// Absolute index of the first line ending and its length.
    fn find_end_of_line(&self, buf: &ChannelBuffer) -> Option<(usize, usize)> {
        let mut from = buf.reader_index();
        loop {
            let i = buf.index_of(from, buf.writer_index(), b'\n')?;
            let cr = i > buf.reader_index() && buf.get_u8(i - 1).ok() == Some(b'\r');
            match self.terminator_type {
                TerminatorType::Newline => return Some((i, 1)),
                TerminatorType::Both if cr => return Some((i - 1, 2)),
                TerminatorType::Both => return Some((i, 1)),
                TerminatorType::CrLf if cr => return Some((i - 1, 2)),
                TerminatorType::CrLf => from = i + 1,
            }
        }
    }

    fn too_long(&self, length: usize) -> Error {
        Error::decode(format!(
            "frame length ({}) exceeds the allowed maximum ({})",
            length, self.max_length
        ))
    }
}

impl MessageDecoder for LineBasedFrameDecoder {
    type Output = ChannelBuffer;

    fn decode(&mut self, buf: &mut ChannelBuffer) -> Result<Option<ChannelBuffer>> {
        let eol = self.find_end_of_line(buf);

        if self.discarding {
            return match eol {
                Some((end, delimiter)) => {
                    let length = self.discarded_bytes + end - buf.reader_index();
                    buf.set_reader_index(end + delimiter)?;
                    self.discarded_bytes = 0;
                    self.discarding = false;
                    Err(self.too_long(length))
                }
                None => {
                    self.discarded_bytes += buf.readable_bytes();
                    buf.set_reader_index(buf.writer_index())?;
                    Ok(None)
                }
            };
        }

        match eol {
            Some((end, delimiter)) => {
                let length = end - buf.reader_index();
                if length > self.max_length {
                    buf.set_reader_index(end + delimiter)?;
                    return Err(self.too_long(length));
                }
                let frame = if self.strip_delimiter {
                    let frame = buf.read_bytes(length)?;
                    buf.skip_bytes(delimiter)?;
                    frame
                } else {
                    buf.read_bytes(length + delimiter)?
                };
                Ok(Some(frame))
            }
            None => {
                let length = buf.readable_bytes();
                if length > self.max_length {
                    debug!("discarding an over-long line ({} bytes so far)", length);
                    self.discarded_bytes = length;
                    self.discarding = true;
                    buf.set_reader_index(buf.writer_index())?;
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivet::ByteOrder;
    use rivet::buffer::copied_slice;

    fn frames(decoder: &mut LineBasedFrameDecoder, input: &[u8]) -> Vec<Vec<u8>> {
        let mut buf = copied_slice(ByteOrder::BigEndian, input);
        let mut out = Vec::new();
        while let Ok(Some(frame)) = decoder.decode(&mut buf) {
            out.push(frame.to_vec());
        }
        out
    }

    #[test]
    fn test_terminator_types() {
        let input = b"a\r\nb\nc\r\n";
        assert_eq!(
            frames(&mut LineBasedFrameDecoder::new(64, true, TerminatorType::Both), input),
            [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(
            frames(&mut LineBasedFrameDecoder::new(64, true, TerminatorType::Newline), input),
            [b"a\r".to_vec(), b"b".to_vec(), b"c\r".to_vec()]
        );
        assert_eq!(
            frames(&mut LineBasedFrameDecoder::new(64, true, TerminatorType::CrLf), input),
            [b"a".to_vec(), b"b\nc".to_vec()]
        );
        assert_eq!(
            frames(&mut LineBasedFrameDecoder::new(64, false, TerminatorType::Both), input),
            [b"a\r\n".to_vec(), b"b\n".to_vec(), b"c\r\n".to_vec()]
        );
    }

    #[test]
    fn test_incomplete_line_waits() {
        let mut decoder = LineBasedFrameDecoder::new(64, true, TerminatorType::Both);
        let mut buf = copied_slice(ByteOrder::BigEndian, b"partial");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.readable_bytes(), 7);
        buf.write_slice(b"\n");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().to_vec(), b"partial");
    }

    #[test]
    fn test_over_long_line_is_discarded_across_chunks() {
        let mut decoder = LineBasedFrameDecoder::new(4, true, TerminatorType::Both);
        let mut buf = copied_slice(ByteOrder::BigEndian, b"123456");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(!buf.is_readable());

        buf.write_slice(b"78\nok\n");
        match decoder.decode(&mut buf) {
            Err(Error::Decode(msg)) => assert!(msg.contains("(8)"), "{}", msg),
            other => panic!("unexpected {:?}", other.map(|f| f.map(|f| f.to_vec()))),
        }
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().to_vec(), b"ok");
    }

    #[test]
    fn test_over_long_complete_line() {
        let mut decoder = LineBasedFrameDecoder::new(2, true, TerminatorType::Both);
        let mut buf = copied_slice(ByteOrder::BigEndian, b"abc\r\nde\n");
        assert!(matches!(decoder.decode(&mut buf), Err(Error::Decode(_))));
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().to_vec(), b"de");
    }
}
