//! Error types for QPACK operations.
//!
//! Every error is detected at the point where bytes are decoded and is
//! attributed to exactly one logical stream: the encoder stream, the decoder
//! stream, or a single header block. The [`ErrorCode`] carries the
//! fine-grained reason; the [`Error`] variant tells the caller which HTTP/3
//! error code (RFC 9204 Section 6) to close the connection with.

use std::fmt;

use thiserror::Error;

/// Result type for QPACK operations.
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP/3 error code `QPACK_DECOMPRESSION_FAILED`.
pub const QPACK_DECOMPRESSION_FAILED: u64 = 0x0200;
/// HTTP/3 error code `QPACK_ENCODER_STREAM_ERROR`.
pub const QPACK_ENCODER_STREAM_ERROR: u64 = 0x0201;
/// HTTP/3 error code `QPACK_DECODER_STREAM_ERROR`.
pub const QPACK_DECODER_STREAM_ERROR: u64 = 0x0202;

/// Fine-grained reason for a detected protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A prefix integer needs too many continuation bytes or overflows 64 bits.
    IntegerTooLarge,
    /// A string literal is longer than the configured limit.
    StringLiteralTooLong,
    /// A Huffman-encoded string literal is malformed.
    HuffmanDecodingError,
    /// Insert Count Increment with a value of zero.
    InvalidZeroIncrement,
    /// Insert Count Increment acknowledging entries that were never inserted.
    ImpossibleInsertCount,
    /// Insert Count Increment overflowing the Known Received Count.
    IncrementOverflow,
    /// Header Acknowledgement for a stream without outstanding header blocks.
    IncorrectAcknowledgement,
    /// A header block is malformed or references an unusable entry.
    DecodingError,
    /// An encoder stream instruction references a missing static entry.
    InvalidStaticEntry,
    /// An encoder stream instruction carries an out-of-range relative index.
    InvalidRelativeIndex,
    /// An encoder stream instruction references an evicted dynamic entry.
    DynamicEntryNotFound,
    /// An entry could not be inserted into the dynamic table.
    ErrorInsertingEntry,
    /// Set Dynamic Table Capacity exceeded the maximum capacity.
    SetDynamicTableCapacity,
    /// More header blocks are blocked than the decoder allows.
    BlockedStreamLimitExceeded,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::IntegerTooLarge => "integer too large",
            ErrorCode::StringLiteralTooLong => "string literal too long",
            ErrorCode::HuffmanDecodingError => "huffman decoding error",
            ErrorCode::InvalidZeroIncrement => "invalid zero increment",
            ErrorCode::ImpossibleInsertCount => "impossible insert count",
            ErrorCode::IncrementOverflow => "increment overflow",
            ErrorCode::IncorrectAcknowledgement => "incorrect acknowledgement",
            ErrorCode::DecodingError => "decoding error",
            ErrorCode::InvalidStaticEntry => "invalid static entry",
            ErrorCode::InvalidRelativeIndex => "invalid relative index",
            ErrorCode::DynamicEntryNotFound => "dynamic entry not found",
            ErrorCode::ErrorInsertingEntry => "error inserting entry",
            ErrorCode::SetDynamicTableCapacity => "invalid dynamic table capacity",
            ErrorCode::BlockedStreamLimitExceeded => "blocked stream limit exceeded",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during QPACK operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Decoding of a header block failed.
    ///
    /// Maps to `QPACK_DECOMPRESSION_FAILED` (0x0200).
    #[error("decompression failed on stream {stream_id} ({code}): {message}")]
    DecompressionFailed {
        stream_id: u64,
        code: ErrorCode,
        message: String,
    },

    /// Invalid instruction received on the encoder stream.
    ///
    /// Maps to `QPACK_ENCODER_STREAM_ERROR` (0x0201).
    #[error("encoder stream error ({code}): {message}")]
    EncoderStream { code: ErrorCode, message: String },

    /// Invalid instruction received on the decoder stream.
    ///
    /// Maps to `QPACK_DECODER_STREAM_ERROR` (0x0202).
    #[error("decoder stream error ({code}): {message}")]
    DecoderStream { code: ErrorCode, message: String },

    /// The header block on this stream waits for dynamic table entries.
    ///
    /// This is not a protocol error. Decoding resumes once the encoder
    /// stream delivers the missing insertions.
    #[error("stream {0} is blocked waiting for dynamic table entries")]
    Blocked(u64),

    /// A local dynamic table operation was rejected.
    #[error("dynamic table error: {0}")]
    DynamicTable(String),

    /// A local configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn encoder_stream(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::EncoderStream {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn decoder_stream(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::DecoderStream {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn decompression(
        stream_id: u64,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Error::DecompressionFailed {
            stream_id,
            code,
            message: message.into(),
        }
    }

    /// Returns the HTTP/3 error code the connection should be closed with.
    pub fn error_code(&self) -> u64 {
        match self {
            Error::EncoderStream { .. } => QPACK_ENCODER_STREAM_ERROR,
            Error::DecoderStream { .. } => QPACK_DECODER_STREAM_ERROR,
            _ => QPACK_DECOMPRESSION_FAILED,
        }
    }

    /// Returns the fine-grained error code, if this is a protocol error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::DecompressionFailed { code, .. }
            | Error::EncoderStream { code, .. }
            | Error::DecoderStream { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns the human-readable message of a protocol error.
    pub fn message(&self) -> Option<&str> {
        match self {
            Error::DecompressionFailed { message, .. }
            | Error::EncoderStream { message, .. }
            | Error::DecoderStream { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Returns true if this error indicates the stream is blocked.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Error::Blocked(_))
    }
}
