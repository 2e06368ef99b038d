//! QPACK: Header Compression for HTTP/3 (RFC 9204)
//!
//! This crate implements QPACK header compression with a dynamic table,
//! the encoder and decoder stream instruction protocols, and progressive
//! decoding of header blocks that may block on dynamic table updates.
//!
//! # Features
//!
//! - **Sans-IO**: instructions go to a [`StreamWriter`]; received stream
//!   bytes are fed in whatever pieces the transport delivers.
//! - **Safe eviction**: the encoder never evicts an entry the peer decoder
//!   may still need, and respects the peer's blocked stream limit.
//! - **Resumable parsing**: integers, string literals and instructions are
//!   decoded incrementally across input boundaries.
//! - **Bytes-based**: names and values are shared `Bytes` throughout.
//!
//! # Example
//!
//! ```rust
//! use qpack_codec::{Decoder, Encoder};
//!
//! let mut encoder = Encoder::new(4096, 100);
//! let mut decoder = Decoder::new(4096, 100);
//! encoder.set_dynamic_table_capacity(4096).unwrap();
//!
//! let headers = vec![
//!     (b":method".as_slice(), b"GET".as_slice()),
//!     (b"x-trace".as_slice(), b"abc".as_slice()),
//! ];
//! let encoded = encoder.encode(0, &headers).unwrap();
//!
//! // The encoder stream must reach the decoder too.
//! if let Some(instructions) = encoder.take_encoder_stream_data() {
//!     decoder.on_encoder_stream_data(&instructions).unwrap();
//! }
//! let decoded = decoder.decode_field_section(0, &encoded).unwrap();
//! assert_eq!(decoded.len(), 2);
//!
//! // Acknowledgements flow back on the decoder stream.
//! if let Some(acks) = decoder.take_decoder_stream_data() {
//!     encoder.on_decoder_stream_data(&acks).unwrap();
//! }
//! ```

pub mod blocking;
pub mod config;
pub mod decoder;
pub mod decoder_stream;
pub mod dynamic_table;
pub mod encoder;
pub mod encoder_stream;
pub mod error;
pub mod header_block;
pub mod header_list;
pub mod header_table;
mod instruction_decoder;
pub mod instructions;
pub mod session;
pub mod static_table;
pub mod stream;
pub mod value_splitter;
pub mod wire;

// Re-export main types
pub use config::QpackConfig;
pub use decoder::{Decoder, HeaderBlockState, HeaderBlockStatus};
pub use decoder_stream::{DecoderStreamDelegate, DecoderStreamReceiver, DecoderStreamSender};
pub use encoder::Encoder;
pub use encoder_stream::{EncoderStreamDelegate, EncoderStreamReceiver, EncoderStreamSender};
pub use error::{Error, ErrorCode, Result};
pub use header_list::{HeaderField, HeaderList};
pub use instructions::{DecoderInstruction, EncoderInstruction, FieldLine};
pub use session::QpackSession;
pub use stream::StreamWriter;
