//! String literal encoding and decoding.
//!
//! A string literal is a prefix integer length, preceded by an `H` flag bit
//! immediately above the prefix, followed by that many bytes of either raw or
//! Huffman-encoded data (RFC 9204 Section 4.1.2).

use bytes::{BufMut, Bytes, BytesMut};

use super::{huffman, integer, DecodeStatus};
use crate::error::ErrorCode;

/// Default upper bound on the wire length of a single string literal.
pub const DEFAULT_MAX_STRING_LITERAL_LENGTH: usize = 1024 * 1024;

/// Encodes a string literal.
///
/// The `H` bit is placed at `1 << prefix_bits` and ORed with `prefix_mask`.
/// Huffman coding is used only when enabled and strictly shorter than the
/// raw bytes. Returns the number of bytes written.
pub fn encode(
    value: &[u8],
    prefix_bits: u8,
    prefix_mask: u8,
    use_huffman: bool,
    buf: &mut BytesMut,
) -> usize {
    let huffman_flag = 1u8 << prefix_bits;

    if use_huffman {
        let huffman_len = huffman::encoded_size(value);
        if huffman_len < value.len() {
            let n = integer::encode(
                huffman_len as u64,
                prefix_bits,
                prefix_mask | huffman_flag,
                buf,
            );
            return n + huffman::encode(value, buf);
        }
    }

    let n = integer::encode(value.len() as u64, prefix_bits, prefix_mask, buf);
    buf.put_slice(value);
    n + value.len()
}

/// Returns the number of bytes [`encode`] writes for `value`.
pub fn encoded_len(value: &[u8], prefix_bits: u8, use_huffman: bool) -> usize {
    let mut len = value.len();
    if use_huffman {
        len = len.min(huffman::encoded_size(value));
    }
    integer::encoded_len(len as u64, prefix_bits) + len
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    FirstByte,
    Length,
    Body,
    Done,
}

/// Resumable string literal decoder.
///
/// The first byte must contain the `H` flag directly above the length
/// prefix. Lengths above the configured limit are rejected as soon as the
/// length is known, before the body is buffered.
#[derive(Debug, Clone)]
pub struct StringDecoder {
    max_len: usize,
    prefix_bits: u8,
    stage: Stage,
    huffman: bool,
    length: usize,
    integer: integer::IntegerDecoder,
    buffer: Vec<u8>,
    value: Bytes,
}

impl Default for StringDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STRING_LITERAL_LENGTH)
    }
}

impl StringDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            prefix_bits: 7,
            stage: Stage::Idle,
            huffman: false,
            length: 0,
            integer: integer::IntegerDecoder::new(),
            buffer: Vec::new(),
            value: Bytes::new(),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Starts decoding a literal whose length uses an N-bit prefix.
    pub fn start(&mut self, prefix_bits: u8, input: &mut &[u8]) -> DecodeStatus {
        self.prefix_bits = prefix_bits;
        self.stage = Stage::FirstByte;
        self.huffman = false;
        self.length = 0;
        self.buffer.clear();
        self.value = Bytes::new();
        self.resume(input)
    }

    /// Continues decoding with the next fragment of input.
    pub fn resume(&mut self, input: &mut &[u8]) -> DecodeStatus {
        loop {
            match self.stage {
                Stage::Idle | Stage::Done => return DecodeStatus::Done,
                Stage::FirstByte => {
                    let Some(&first) = input.first() else {
                        return DecodeStatus::InProgress;
                    };
                    self.huffman = first & (1u8 << self.prefix_bits) != 0;
                    self.stage = Stage::Length;
                    match self.integer.start(self.prefix_bits, input) {
                        DecodeStatus::Done => {
                            if let Err(status) = self.on_length() {
                                return status;
                            }
                        }
                        status => return status,
                    }
                }
                Stage::Length => match self.integer.resume(input) {
                    DecodeStatus::Done => {
                        if let Err(status) = self.on_length() {
                            return status;
                        }
                    }
                    status => return status,
                },
                Stage::Body => {
                    let wanted = self.length - self.buffer.len();
                    let take = wanted.min(input.len());
                    self.buffer.extend_from_slice(&input[..take]);
                    *input = &input[take..];
                    if self.buffer.len() < self.length {
                        return DecodeStatus::InProgress;
                    }
                    return self.finish();
                }
            }
        }
    }

    fn on_length(&mut self) -> Result<(), DecodeStatus> {
        let length = self.integer.value();
        if length > self.max_len as u64 {
            return Err(DecodeStatus::Error(ErrorCode::StringLiteralTooLong));
        }
        self.length = length as usize;
        self.buffer.reserve(self.length);
        self.stage = Stage::Body;
        Ok(())
    }

    fn finish(&mut self) -> DecodeStatus {
        self.stage = Stage::Done;
        let raw = std::mem::take(&mut self.buffer);
        if !self.huffman {
            self.value = Bytes::from(raw);
            return DecodeStatus::Done;
        }

        let mut decoded = Vec::with_capacity(raw.len() * 8 / 5);
        match huffman::decode(&raw, &mut decoded) {
            Ok(_) => {
                self.value = Bytes::from(decoded);
                DecodeStatus::Done
            }
            Err(code) => DecodeStatus::Error(code),
        }
    }

    /// Returns true if the literal was Huffman-encoded on the wire.
    pub fn is_huffman_encoded(&self) -> bool {
        self.huffman
    }

    /// Takes the decoded value. Only meaningful after [`DecodeStatus::Done`].
    pub fn take_value(&mut self) -> Bytes {
        std::mem::take(&mut self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_to_vec(value: &[u8], prefix_bits: u8, use_huffman: bool) -> Vec<u8> {
        let mut buf = BytesMut::new();
        let n = encode(value, prefix_bits, 0, use_huffman, &mut buf);
        assert_eq!(n, buf.len());
        assert_eq!(n, encoded_len(value, prefix_bits, use_huffman));
        buf.to_vec()
    }

    fn decode_all(data: &[u8], prefix_bits: u8) -> (DecodeStatus, Bytes, usize) {
        let mut decoder = StringDecoder::default();
        let mut cursor = data;
        let status = decoder.start(prefix_bits, &mut cursor);
        (status, decoder.take_value(), data.len() - cursor.len())
    }

    #[test]
    fn test_plain_literal() {
        assert_eq!(encode_to_vec(b"bar", 7, false), b"\x03bar");
        let (status, value, consumed) = decode_all(b"\x03bar\xff", 7);
        assert_eq!(status, DecodeStatus::Done);
        assert_eq!(&value[..], b"bar");
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_huffman_only_when_shorter() {
        // "foo" is two bytes Huffman-coded.
        assert_eq!(encode_to_vec(b"foo", 7, true), vec![0x82, 0x94, 0xe7]);
        // 'Z' has an 8-bit code, so Huffman coding is never shorter.
        assert_eq!(encode_to_vec(b"ZZZZ", 7, true), b"\x04ZZZZ");
    }

    #[test]
    fn test_huffman_flag_position_follows_prefix() {
        // 3-bit prefix literal name: H bit is 0x08.
        let buf = encode_to_vec(b"foo", 3, true);
        assert_eq!(buf[0], 0x08 | 0x02);
        let (status, value, _) = decode_all(&buf, 3);
        assert_eq!(status, DecodeStatus::Done);
        assert_eq!(&value[..], b"foo");
    }

    #[test]
    fn test_empty_literal() {
        assert_eq!(encode_to_vec(b"", 7, true), vec![0x00]);
        let (status, value, consumed) = decode_all(&[0x00], 7);
        assert_eq!(status, DecodeStatus::Done);
        assert!(value.is_empty());
        assert_eq!(consumed, 1);
    }

    #[test]
    fn test_too_long_rejected_before_body() {
        let mut decoder = StringDecoder::new(4);
        let mut cursor: &[u8] = &[0x05];
        assert_eq!(
            decoder.start(7, &mut cursor),
            DecodeStatus::Error(ErrorCode::StringLiteralTooLong)
        );
    }

    #[test]
    fn test_invalid_huffman() {
        // Huffman flag with a single byte of zero bits: padding is not all ones.
        let (status, _, _) = decode_all(&[0x81, 0x00], 7);
        assert_eq!(status, DecodeStatus::Error(ErrorCode::HuffmanDecodingError));
    }

    #[test]
    fn test_resume_byte_by_byte() {
        let value = b"a value long enough to need a multi-byte length prefix".repeat(4);
        let buf = encode_to_vec(&value, 5, true);

        let mut decoder = StringDecoder::default();
        let mut status = DecodeStatus::InProgress;
        for (i, byte) in buf.iter().enumerate() {
            let mut chunk: &[u8] = std::slice::from_ref(byte);
            status = if i == 0 {
                decoder.start(5, &mut chunk)
            } else {
                decoder.resume(&mut chunk)
            };
            assert!(chunk.is_empty());
            if i + 1 < buf.len() {
                assert_eq!(status, DecodeStatus::InProgress);
            }
        }
        assert_eq!(status, DecodeStatus::Done);
        assert!(decoder.is_huffman_encoded());
        assert_eq!(&decoder.take_value()[..], &value[..]);
    }

    #[test]
    fn test_start_with_empty_input() {
        let mut decoder = StringDecoder::default();
        let mut empty: &[u8] = &[];
        assert_eq!(decoder.start(7, &mut empty), DecodeStatus::InProgress);
        let mut rest: &[u8] = b"\x02hi";
        assert_eq!(decoder.resume(&mut rest), DecodeStatus::Done);
        assert_eq!(&decoder.take_value()[..], b"hi");
    }

    #[test]
    fn test_split_anywhere_property() {
        use proptest::prelude::*;

        proptest!(|(
            value in prop::collection::vec(any::<u8>(), 0..200),
            prefix_bits in 1u8..=7,
            use_huffman in any::<bool>(),
            first in 0usize..256,
            second in 0usize..256,
        )| {
            let mut buf = encode_to_vec(&value, prefix_bits, use_huffman);
            let len = buf.len();
            // Start of the next field, which must not be consumed.
            buf.push(0xAB);
            let (first, second) = (first.min(len), second.min(len));
            let (first, second) = (first.min(second), first.max(second));

            let mut decoder = StringDecoder::default();
            let mut head: &[u8] = &buf[..first];
            let mut middle: &[u8] = &buf[first..second];
            let mut tail: &[u8] = &buf[second..];

            let mut status = decoder.start(prefix_bits, &mut head);
            if status == DecodeStatus::InProgress {
                status = decoder.resume(&mut middle);
            }
            if status == DecodeStatus::InProgress {
                status = decoder.resume(&mut tail);
            }

            prop_assert_eq!(status, DecodeStatus::Done);
            prop_assert!(head.is_empty() && middle.is_empty());
            prop_assert_eq!(tail, &[0xAB][..]);
            prop_assert_eq!(decoder.is_huffman_encoded(), buf[0] & (1 << prefix_bits) != 0);
            prop_assert_eq!(&decoder.take_value()[..], &value[..]);
        });
    }
}
