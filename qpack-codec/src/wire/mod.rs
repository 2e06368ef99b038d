//! Wire primitives shared by every QPACK instruction.
//!
//! - [`integer`]: RFC 7541 prefix integers
//! - [`literal`]: length-prefixed string literals with optional Huffman coding
//! - [`huffman`]: the RFC 7541 Appendix B static Huffman code

use crate::error::ErrorCode;

pub mod huffman;
pub mod integer;
pub mod literal;

/// Outcome of a resumable decode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// The value is complete.
    Done,
    /// All input was consumed; more is needed.
    InProgress,
    /// The input is malformed.
    Error(ErrorCode),
}
