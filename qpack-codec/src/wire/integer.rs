//! Prefix integer encoding and decoding.
//!
//! Implements the variable-length integer encoding defined in RFC 7541 Section 5.1,
//! used heavily throughout QPACK. The format allows efficient encoding of integers
//! while sharing byte prefixes with other fields.
//!
//! ## Format
//!
//! An integer is represented in two parts:
//! - A prefix that fills the remainder of a byte (N bits, where 1 ≤ N ≤ 8)
//! - Optional continuation bytes if the value doesn't fit in the prefix
//!
//! If I < 2^N - 1, the integer is encoded in the N-bit prefix.
//! Otherwise, the prefix bits are all set to 1, and the value is encoded
//! in one or more continuation bytes.
//!
//! Decoding is resumable: [`IntegerDecoder`] keeps the partial value between
//! calls so an integer may arrive split across any number of fragments.

use bytes::{BufMut, BytesMut};

use super::DecodeStatus;
use crate::error::ErrorCode;

/// Maximum number of continuation bytes accepted after the prefix.
///
/// Any `u64` fits in ten continuation bytes.
pub const MAX_CONTINUATION_BYTES: usize = 10;

#[inline]
fn prefix_max(prefix_bits: u8) -> u8 {
    debug_assert!((1..=8).contains(&prefix_bits), "prefix_bits must be 1-8");
    if prefix_bits == 8 {
        0xFF
    } else {
        (1u8 << prefix_bits) - 1
    }
}

/// Encodes an integer with an N-bit prefix.
///
/// `prefix_mask` holds the bits of the first byte outside the N-bit prefix
/// (opcode and flags). Returns the number of bytes written.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use qpack_codec::wire::integer::encode;
///
/// let mut buf = BytesMut::new();
/// // Encode 10 with a 5-bit prefix, preserving the top 3 bits as 001
/// let n = encode(10, 5, 0b001_00000, &mut buf);
/// assert_eq!(n, 1);
/// assert_eq!(buf[0], 0b001_01010);
/// ```
pub fn encode(value: u64, prefix_bits: u8, prefix_mask: u8, buf: &mut BytesMut) -> usize {
    let max_prefix = prefix_max(prefix_bits);

    if value < u64::from(max_prefix) {
        buf.put_u8(prefix_mask | value as u8);
        return 1;
    }

    buf.put_u8(prefix_mask | max_prefix);
    let mut remaining = value - u64::from(max_prefix);
    let mut written = 1;

    while remaining >= 0x80 {
        buf.put_u8(0x80 | (remaining & 0x7F) as u8);
        remaining >>= 7;
        written += 1;
    }

    buf.put_u8(remaining as u8);
    written + 1
}

/// Returns the number of bytes [`encode`] writes for `value`.
pub fn encoded_len(value: u64, prefix_bits: u8) -> usize {
    let max_prefix = u64::from(prefix_max(prefix_bits));
    if value < max_prefix {
        return 1;
    }
    let mut remaining = value - max_prefix;
    let mut len = 2;
    while remaining >= 0x80 {
        remaining >>= 7;
        len += 1;
    }
    len
}

/// Resumable prefix integer decoder.
///
/// Call [`start`](IntegerDecoder::start) at the first byte of the integer and
/// [`resume`](IntegerDecoder::resume) with each subsequent fragment while the
/// status is [`DecodeStatus::InProgress`]. Both advance the input cursor past
/// every byte they consume and never consume bytes beyond the integer.
#[derive(Debug, Clone, Default)]
pub struct IntegerDecoder {
    prefix_bits: u8,
    awaiting_prefix: bool,
    value: u64,
    shift: u32,
    continuation_bytes: usize,
}

impl IntegerDecoder {
    /// Creates an idle decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts decoding an integer with an N-bit prefix.
    pub fn start(&mut self, prefix_bits: u8, input: &mut &[u8]) -> DecodeStatus {
        debug_assert!((1..=8).contains(&prefix_bits), "prefix_bits must be 1-8");
        *self = Self {
            prefix_bits,
            awaiting_prefix: true,
            ..Self::default()
        };
        self.resume(input)
    }

    /// Continues decoding with the next fragment of input.
    pub fn resume(&mut self, input: &mut &[u8]) -> DecodeStatus {
        if self.awaiting_prefix {
            let Some((&first, rest)) = input.split_first() else {
                return DecodeStatus::InProgress;
            };
            *input = rest;
            self.awaiting_prefix = false;

            let max_prefix = prefix_max(self.prefix_bits);
            self.value = u64::from(first & max_prefix);
            if self.value < u64::from(max_prefix) {
                return DecodeStatus::Done;
            }
        }

        while let Some((&byte, rest)) = input.split_first() {
            *input = rest;
            self.continuation_bytes += 1;
            if self.continuation_bytes > MAX_CONTINUATION_BYTES {
                return DecodeStatus::Error(ErrorCode::IntegerTooLarge);
            }

            let chunk = u64::from(byte & 0x7F);
            let addend = match chunk.checked_shl(self.shift) {
                Some(shifted) if shifted >> self.shift == chunk => shifted,
                _ => return DecodeStatus::Error(ErrorCode::IntegerTooLarge),
            };
            self.value = match self.value.checked_add(addend) {
                Some(value) => value,
                None => return DecodeStatus::Error(ErrorCode::IntegerTooLarge),
            };
            self.shift += 7;

            if byte & 0x80 == 0 {
                return DecodeStatus::Done;
            }
        }

        DecodeStatus::InProgress
    }

    /// Returns the decoded value. Only meaningful after [`DecodeStatus::Done`].
    pub fn value(&self) -> u64 {
        self.value
    }
}

/// Decodes a complete integer from a contiguous buffer.
///
/// Returns `Ok(None)` if `data` ends before the integer does, otherwise the
/// value and the number of bytes consumed.
///
/// # Example
///
/// ```
/// use qpack_codec::wire::integer::decode;
///
/// let data = &[0b001_01010]; // 10 with 5-bit prefix
/// let (value, consumed) = decode(5, data).unwrap().unwrap();
/// assert_eq!(value, 10);
/// assert_eq!(consumed, 1);
/// ```
pub fn decode(prefix_bits: u8, data: &[u8]) -> Result<Option<(u64, usize)>, ErrorCode> {
    let mut cursor = data;
    let mut decoder = IntegerDecoder::new();
    match decoder.start(prefix_bits, &mut cursor) {
        DecodeStatus::Done => Ok(Some((decoder.value(), data.len() - cursor.len()))),
        DecodeStatus::InProgress => Ok(None),
        DecodeStatus::Error(code) => Err(code),
    }
}
