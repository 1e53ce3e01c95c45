//! # Rivet Codec - Frame Decoders and String Codecs
//!
//! Reusable handlers for [`rivet`] pipelines:
//!
//! - [`ByteToMessageCodec`]: cumulates inbound bytes and drives a pluggable
//!   [`MessageDecoder`] over them
//! - [`LineBasedFrameDecoder`]: splits a byte stream at `\n` and/or `\r\n`
//! - [`StringCodec`]: UTF-8 bytes in, `String` out, and the reverse on the way down
//!
//! ## Building a Pipeline with Codecs
//!
//! ```rust
//! use rivet::ChannelPipeline;
//! use rivet_codec::{ByteToMessageCodec, LineBasedFrameDecoder, StringCodec, TerminatorType};
//!
//! let pipeline = ChannelPipeline::new();
//! pipeline
//!     .add_last(
//!         "framer",
//!         ByteToMessageCodec::new(LineBasedFrameDecoder::new(8192, true, TerminatorType::Both)),
//!     )
//!     .unwrap();
//! pipeline.add_last("string", StringCodec::new()).unwrap();
//! // pipeline.add_last("app", your_handler).unwrap();
//! ```

#![warn(rust_2018_idioms)]

/// Byte-to-message frame decoders for parsing delimited streams
pub mod byte_to_message_decoder;

/// UTF-8 string encoding/decoding handlers
pub mod string_codec;

pub use byte_to_message_decoder::{ByteToMessageCodec, LineBasedFrameDecoder, MessageDecoder, TerminatorType};
pub use string_codec::StringCodec;
