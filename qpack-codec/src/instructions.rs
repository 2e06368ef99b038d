//! QPACK instructions per RFC 9204.
//!
//! Encoder stream instructions (Section 4.3):
//! - Set Dynamic Table Capacity
//! - Insert With Name Reference
//! - Insert With Literal Name
//! - Duplicate
//!
//! Decoder stream instructions (Section 4.4):
//! - Section Acknowledgement
//! - Stream Cancellation
//! - Insert Count Increment
//!
//! Field line representations (Section 4.5).
//!
//! Encoding writes straight into a `BytesMut`. Decoding is resumable and
//! lives in [`instruction_decoder`](crate::instruction_decoder); complete
//! instructions are converted into these types.

use bytes::{Bytes, BytesMut};

use crate::instruction_decoder::{Decoded, Opcode};
use crate::wire::{integer, literal};

/// Encoder stream instruction types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInstruction {
    /// Set Dynamic Table Capacity.
    /// Pattern: 001xxxxx (capacity with 5-bit prefix)
    SetCapacity { capacity: u64 },

    /// Insert With Name Reference.
    /// Pattern: 1Txxxxxx (T=0 dynamic relative index, T=1 static, 6-bit prefix)
    InsertWithNameRef {
        is_static: bool,
        name_index: u64,
        value: Bytes,
    },

    /// Insert With Literal Name.
    /// Pattern: 01Hxxxxx (H=Huffman flag, name length with 5-bit prefix)
    InsertLiteral { name: Bytes, value: Bytes },

    /// Duplicate an existing dynamic table entry.
    /// Pattern: 000xxxxx (relative index with 5-bit prefix)
    Duplicate { index: u64 },
}

impl EncoderInstruction {
    /// Encodes the instruction, returning the number of bytes written.
    pub fn encode(&self, use_huffman: bool, buf: &mut BytesMut) -> usize {
        match self {
            EncoderInstruction::SetCapacity { capacity } => {
                integer::encode(*capacity, 5, 0x20, buf)
            }
            EncoderInstruction::InsertWithNameRef {
                is_static,
                name_index,
                value,
            } => {
                let prefix = if *is_static { 0xC0 } else { 0x80 };
                integer::encode(*name_index, 6, prefix, buf)
                    + literal::encode(value, 7, 0x00, use_huffman, buf)
            }
            EncoderInstruction::InsertLiteral { name, value } => {
                literal::encode(name, 5, 0x40, use_huffman, buf)
                    + literal::encode(value, 7, 0x00, use_huffman, buf)
            }
            EncoderInstruction::Duplicate { index } => integer::encode(*index, 5, 0x00, buf),
        }
    }

    pub(crate) fn from_decoded(decoded: Decoded) -> Option<Self> {
        let instruction = match decoded.opcode {
            Opcode::SetDynamicTableCapacity => EncoderInstruction::SetCapacity {
                capacity: decoded.varint,
            },
            Opcode::InsertWithNameReference => EncoderInstruction::InsertWithNameRef {
                is_static: decoded.flags & 0x40 != 0,
                name_index: decoded.varint,
                value: decoded.value,
            },
            Opcode::InsertWithoutNameReference => EncoderInstruction::InsertLiteral {
                name: decoded.name,
                value: decoded.value,
            },
            Opcode::Duplicate => EncoderInstruction::Duplicate {
                index: decoded.varint,
            },
            _ => return None,
        };
        Some(instruction)
    }
}

/// Decoder stream instruction types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderInstruction {
    /// Section Acknowledgement.
    /// Pattern: 1xxxxxxx (stream ID with 7-bit prefix)
    SectionAck { stream_id: u64 },

    /// Stream Cancellation.
    /// Pattern: 01xxxxxx (stream ID with 6-bit prefix)
    StreamCancellation { stream_id: u64 },

    /// Insert Count Increment.
    /// Pattern: 00xxxxxx (increment with 6-bit prefix)
    InsertCountIncrement { increment: u64 },
}

impl DecoderInstruction {
    /// Encodes the instruction, returning the number of bytes written.
    pub fn encode(&self, buf: &mut BytesMut) -> usize {
        match self {
            DecoderInstruction::SectionAck { stream_id } => {
                integer::encode(*stream_id, 7, 0x80, buf)
            }
            DecoderInstruction::StreamCancellation { stream_id } => {
                integer::encode(*stream_id, 6, 0x40, buf)
            }
            DecoderInstruction::InsertCountIncrement { increment } => {
                integer::encode(*increment, 6, 0x00, buf)
            }
        }
    }

    pub(crate) fn from_decoded(decoded: &Decoded) -> Option<Self> {
        let instruction = match decoded.opcode {
            Opcode::HeaderAcknowledgement => DecoderInstruction::SectionAck {
                stream_id: decoded.varint,
            },
            Opcode::StreamCancellation => DecoderInstruction::StreamCancellation {
                stream_id: decoded.varint,
            },
            Opcode::InsertCountIncrement => DecoderInstruction::InsertCountIncrement {
                increment: decoded.varint,
            },
            _ => return None,
        };
        Some(instruction)
    }
}

/// Field line representations of a header block.
///
/// Dynamic references are relative to the block's Base: `relative_index`
/// counts back from `Base - 1`, `post_base_index` forward from `Base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldLine {
    /// Pattern: 11xxxxxx (6-bit prefix)
    IndexedStatic { index: u64 },
    /// Pattern: 10xxxxxx (6-bit prefix)
    IndexedDynamic { relative_index: u64 },
    /// Pattern: 0001xxxx (4-bit prefix)
    IndexedPostBase { post_base_index: u64 },
    /// Pattern: 01N1xxxx (4-bit prefix)
    LiteralStaticName {
        name_index: u64,
        value: Bytes,
        never_indexed: bool,
    },
    /// Pattern: 01N0xxxx (4-bit prefix)
    LiteralDynamicName {
        relative_index: u64,
        value: Bytes,
        never_indexed: bool,
    },
    /// Pattern: 0000Nxxx (3-bit prefix)
    LiteralPostBaseName {
        post_base_index: u64,
        value: Bytes,
        never_indexed: bool,
    },
    /// Pattern: 001NHxxx (name length with 3-bit prefix)
    Literal {
        name: Bytes,
        value: Bytes,
        never_indexed: bool,
    },
}

impl FieldLine {
    /// Encodes the representation, returning the number of bytes written.
    pub fn encode(&self, use_huffman: bool, buf: &mut BytesMut) -> usize {
        match self {
            FieldLine::IndexedStatic { index } => integer::encode(*index, 6, 0xC0, buf),
            FieldLine::IndexedDynamic { relative_index } => {
                integer::encode(*relative_index, 6, 0x80, buf)
            }
            FieldLine::IndexedPostBase { post_base_index } => {
                integer::encode(*post_base_index, 4, 0x10, buf)
            }
            FieldLine::LiteralStaticName {
                name_index,
                value,
                never_indexed,
            } => {
                let prefix = 0x50 | if *never_indexed { 0x20 } else { 0 };
                integer::encode(*name_index, 4, prefix, buf)
                    + literal::encode(value, 7, 0x00, use_huffman, buf)
            }
            FieldLine::LiteralDynamicName {
                relative_index,
                value,
                never_indexed,
            } => {
                let prefix = 0x40 | if *never_indexed { 0x20 } else { 0 };
                integer::encode(*relative_index, 4, prefix, buf)
                    + literal::encode(value, 7, 0x00, use_huffman, buf)
            }
            FieldLine::LiteralPostBaseName {
                post_base_index,
                value,
                never_indexed,
            } => {
                let prefix = if *never_indexed { 0x08 } else { 0 };
                integer::encode(*post_base_index, 3, prefix, buf)
                    + literal::encode(value, 7, 0x00, use_huffman, buf)
            }
            FieldLine::Literal {
                name,
                value,
                never_indexed,
            } => {
                let prefix = 0x20 | if *never_indexed { 0x10 } else { 0 };
                literal::encode(name, 3, prefix, use_huffman, buf)
                    + literal::encode(value, 7, 0x00, use_huffman, buf)
            }
        }
    }

    pub(crate) fn from_decoded(decoded: Decoded) -> Option<Self> {
        let never_indexed = match decoded.opcode {
            Opcode::LiteralWithNameReference => decoded.flags & 0x20 != 0,
            Opcode::Literal => decoded.flags & 0x10 != 0,
            Opcode::LiteralWithPostBaseNameReference => decoded.flags & 0x08 != 0,
            _ => false,
        };
        let line = match decoded.opcode {
            Opcode::Indexed if decoded.flags & 0x40 != 0 => FieldLine::IndexedStatic {
                index: decoded.varint,
            },
            Opcode::Indexed => FieldLine::IndexedDynamic {
                relative_index: decoded.varint,
            },
            Opcode::IndexedPostBase => FieldLine::IndexedPostBase {
                post_base_index: decoded.varint,
            },
            Opcode::LiteralWithNameReference if decoded.flags & 0x10 != 0 => {
                FieldLine::LiteralStaticName {
                    name_index: decoded.varint,
                    value: decoded.value,
                    never_indexed,
                }
            }
            Opcode::LiteralWithNameReference => FieldLine::LiteralDynamicName {
                relative_index: decoded.varint,
                value: decoded.value,
                never_indexed,
            },
            Opcode::LiteralWithPostBaseNameReference => FieldLine::LiteralPostBaseName {
                post_base_index: decoded.varint,
                value: decoded.value,
                never_indexed,
            },
            Opcode::Literal => FieldLine::Literal {
                name: decoded.name,
                value: decoded.value,
                never_indexed,
            },
            _ => return None,
        };
        Some(line)
    }
}
