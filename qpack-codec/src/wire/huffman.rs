//! Huffman encoding and decoding for QPACK.
//!
//! Implements the static Huffman code defined in RFC 7541 Appendix B.
//! QPACK reuses HPACK's Huffman table without modification.
//!
//! Encoding is table driven. Decoding walks a binary tree built lazily on
//! first use.

use std::sync::OnceLock;

use bytes::{BufMut, BytesMut};

use crate::error::ErrorCode;

/// Huffman code entry: (code, code_length_in_bits)
struct HuffmanEntry {
    code: u32,
    len: u8,
}

// Huffman encoding table (RFC 7541 Appendix B)
// Each entry is (code, bit_length) for symbols 0-255, plus EOS (256)
static ENCODE_TABLE: [HuffmanEntry; 257] = include!("huffman_table.inc");

const EOS: u16 = 256;

#[derive(Clone, Copy, Debug)]
enum Link {
    Empty,
    Node(u16),
    Symbol(u16),
}

#[derive(Clone, Copy, Debug)]
struct DecodeNode {
    children: [Link; 2],
}

static DECODE_TREE: OnceLock<Vec<DecodeNode>> = OnceLock::new();

fn decode_tree() -> &'static [DecodeNode] {
    DECODE_TREE.get_or_init(|| {
        let empty = DecodeNode {
            children: [Link::Empty; 2],
        };
        let mut tree = vec![empty];

        for (sym, entry) in ENCODE_TABLE.iter().enumerate() {
            let mut node = 0usize;
            for bit_idx in (0..entry.len).rev() {
                let bit = ((entry.code >> bit_idx) & 1) as usize;
                if bit_idx == 0 {
                    tree[node].children[bit] = Link::Symbol(sym as u16);
                    break;
                }
                node = match tree[node].children[bit] {
                    Link::Node(next) => next as usize,
                    _ => {
                        let next = tree.len();
                        tree.push(empty);
                        tree[node].children[bit] = Link::Node(next as u16);
                        next
                    }
                };
            }
        }

        tree
    })
}

/// Returns the Huffman-encoded length of `data` in bytes.
pub fn encoded_size(data: &[u8]) -> usize {
    let bits: usize = data
        .iter()
        .map(|&b| ENCODE_TABLE[b as usize].len as usize)
        .sum();
    bits.div_ceil(8)
}

/// Huffman-encodes `data` into `output`, padding the last byte with ones.
///
/// Returns the number of bytes written.
pub fn encode(data: &[u8], output: &mut BytesMut) -> usize {
    let initial_len = output.len();
    let mut acc: u64 = 0;
    let mut bits: u8 = 0;

    for &byte in data {
        let entry = &ENCODE_TABLE[byte as usize];
        acc = (acc << entry.len) | u64::from(entry.code);
        bits += entry.len;

        while bits >= 8 {
            bits -= 8;
            output.put_u8((acc >> bits) as u8);
        }
    }

    // Pad with the most significant bits of EOS (RFC 7541 Section 5.2)
    if bits > 0 {
        acc <<= 8 - bits;
        acc |= (1u64 << (8 - bits)) - 1;
        output.put_u8(acc as u8);
    }

    output.len() - initial_len
}

/// Decodes Huffman-encoded `data`, appending the result to `output`.
///
/// Fails if the input contains the EOS symbol, if the padding is longer
/// than seven bits, or if the padding is not a prefix of EOS.
pub fn decode(data: &[u8], output: &mut Vec<u8>) -> Result<usize, ErrorCode> {
    let tree = decode_tree();
    let initial_len = output.len();
    let mut node = 0usize;
    let mut pending_bits = 0u32;
    let mut pending_all_ones = true;

    for &byte in data {
        for bit_idx in (0..8).rev() {
            let bit = ((byte >> bit_idx) & 1) as usize;
            pending_bits += 1;
            pending_all_ones &= bit == 1;

            match tree[node].children[bit] {
                Link::Symbol(EOS) => return Err(ErrorCode::HuffmanDecodingError),
                Link::Symbol(sym) => {
                    output.push(sym as u8);
                    node = 0;
                    pending_bits = 0;
                    pending_all_ones = true;
                }
                Link::Node(next) => node = next as usize,
                Link::Empty => return Err(ErrorCode::HuffmanDecodingError),
            }
        }
    }

    if pending_bits > 7 || !pending_all_ones {
        return Err(ErrorCode::HuffmanDecodingError);
    }

    Ok(output.len() - initial_len)
}
