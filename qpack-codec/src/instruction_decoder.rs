//! Generic resumable instruction decoder.
//!
//! Every QPACK instruction is a first byte whose high bits select the
//! instruction, followed by a fixed sequence of fields: flag bits taken from
//! the current byte, prefix integers and string literals. Each stream uses
//! its own [`Language`], a static table of instruction layouts, and a single
//! decoder state machine walks any of them. Input may be split anywhere;
//! partial fields are kept between calls.

use std::ops::ControlFlow;

use bytes::Bytes;

use crate::error::ErrorCode;
use crate::wire::integer::IntegerDecoder;
use crate::wire::literal::{StringDecoder, DEFAULT_MAX_STRING_LITERAL_LENGTH};
use crate::wire::DecodeStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opcode {
    // Encoder stream
    InsertWithNameReference,
    InsertWithoutNameReference,
    Duplicate,
    SetDynamicTableCapacity,
    // Decoder stream
    InsertCountIncrement,
    HeaderAcknowledgement,
    StreamCancellation,
    // Header block prefix
    Prefix,
    // Field lines
    Indexed,
    IndexedPostBase,
    LiteralWithNameReference,
    LiteralWithPostBaseNameReference,
    Literal,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Field {
    /// Flag bits of the current byte, ORed into `flags`. Consumes nothing.
    Flags(u8),
    /// Prefix integer stored in `varint`.
    Varint(u8),
    /// Prefix integer stored in `varint2`.
    Varint2(u8),
    /// String literal stored in `name`; the argument is the length prefix.
    Name(u8),
    /// String literal stored in `value`.
    Value(u8),
}

#[derive(Debug)]
pub(crate) struct InstructionLayout {
    pub opcode: Opcode,
    pub mask: u8,
    pub pattern: u8,
    pub fields: &'static [Field],
}

pub(crate) type Language = &'static [InstructionLayout];

pub(crate) static ENCODER_STREAM_LANGUAGE: Language = &[
    InstructionLayout {
        opcode: Opcode::InsertWithNameReference,
        mask: 0x80,
        pattern: 0x80,
        fields: &[Field::Flags(0x40), Field::Varint(6), Field::Value(7)],
    },
    InstructionLayout {
        opcode: Opcode::InsertWithoutNameReference,
        mask: 0xC0,
        pattern: 0x40,
        fields: &[Field::Name(5), Field::Value(7)],
    },
    InstructionLayout {
        opcode: Opcode::SetDynamicTableCapacity,
        mask: 0xE0,
        pattern: 0x20,
        fields: &[Field::Varint(5)],
    },
    InstructionLayout {
        opcode: Opcode::Duplicate,
        mask: 0xE0,
        pattern: 0x00,
        fields: &[Field::Varint(5)],
    },
];

pub(crate) static DECODER_STREAM_LANGUAGE: Language = &[
    InstructionLayout {
        opcode: Opcode::HeaderAcknowledgement,
        mask: 0x80,
        pattern: 0x80,
        fields: &[Field::Varint(7)],
    },
    InstructionLayout {
        opcode: Opcode::StreamCancellation,
        mask: 0xC0,
        pattern: 0x40,
        fields: &[Field::Varint(6)],
    },
    InstructionLayout {
        opcode: Opcode::InsertCountIncrement,
        mask: 0xC0,
        pattern: 0x00,
        fields: &[Field::Varint(6)],
    },
];

pub(crate) static PREFIX_LANGUAGE: Language = &[InstructionLayout {
    opcode: Opcode::Prefix,
    mask: 0x00,
    pattern: 0x00,
    fields: &[Field::Varint(8), Field::Flags(0x80), Field::Varint2(7)],
}];

pub(crate) static FIELD_LINE_LANGUAGE: Language = &[
    InstructionLayout {
        opcode: Opcode::Indexed,
        mask: 0x80,
        pattern: 0x80,
        fields: &[Field::Flags(0x40), Field::Varint(6)],
    },
    InstructionLayout {
        opcode: Opcode::LiteralWithNameReference,
        mask: 0xC0,
        pattern: 0x40,
        fields: &[Field::Flags(0x30), Field::Varint(4), Field::Value(7)],
    },
    InstructionLayout {
        opcode: Opcode::Literal,
        mask: 0xE0,
        pattern: 0x20,
        fields: &[Field::Flags(0x10), Field::Name(3), Field::Value(7)],
    },
    InstructionLayout {
        opcode: Opcode::IndexedPostBase,
        mask: 0xF0,
        pattern: 0x10,
        fields: &[Field::Varint(4)],
    },
    InstructionLayout {
        opcode: Opcode::LiteralWithPostBaseNameReference,
        mask: 0xF0,
        pattern: 0x00,
        fields: &[Field::Flags(0x08), Field::Varint(3), Field::Value(7)],
    },
];

/// A fully decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Decoded {
    pub opcode: Opcode,
    pub flags: u8,
    pub varint: u64,
    pub varint2: u64,
    pub name: Bytes,
    pub value: Bytes,
}

/// Decoding failure with the message reported to the error delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DecodeError {
    pub code: ErrorCode,
    pub message: &'static str,
}

impl DecodeError {
    fn from_code(code: ErrorCode) -> Self {
        let message = match code {
            ErrorCode::IntegerTooLarge => "Encoded integer too large.",
            ErrorCode::StringLiteralTooLong => "String literal too long.",
            ErrorCode::HuffmanDecodingError => "Error in Huffman-encoded string.",
            _ => "Invalid instruction.",
        };
        Self { code, message }
    }
}

#[derive(Debug)]
pub(crate) struct InstructionDecoder {
    language: Language,
    instruction: Option<&'static InstructionLayout>,
    field_index: usize,
    field_started: bool,
    integer: IntegerDecoder,
    string: StringDecoder,
    decoded: Decoded,
    error: Option<DecodeError>,
}

impl InstructionDecoder {
    pub fn new(language: Language) -> Self {
        Self::with_max_string_length(language, DEFAULT_MAX_STRING_LITERAL_LENGTH)
    }

    pub fn with_max_string_length(language: Language, max_string_length: usize) -> Self {
        Self {
            language,
            instruction: None,
            field_index: 0,
            field_started: false,
            integer: IntegerDecoder::new(),
            string: StringDecoder::new(max_string_length),
            decoded: Decoded {
                opcode: Opcode::Prefix,
                flags: 0,
                varint: 0,
                varint2: 0,
                name: Bytes::new(),
                value: Bytes::new(),
            },
            error: None,
        }
    }

    /// Returns true if no instruction is partially decoded.
    pub fn at_instruction_boundary(&self) -> bool {
        self.instruction.is_none()
    }

    #[cfg(test)]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Decodes as many instructions from `data` as possible.
    ///
    /// `on_instruction` is called for each complete instruction; returning
    /// [`ControlFlow::Break`] stops decoding right after that instruction.
    /// Returns the number of bytes consumed, which is all of `data` unless
    /// decoding was stopped. After an error, every later call fails with the
    /// same error.
    pub fn decode(
        &mut self,
        data: &[u8],
        mut on_instruction: impl FnMut(Decoded) -> ControlFlow<()>,
    ) -> Result<usize, DecodeError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut input = data;
        loop {
            let current = self.instruction;
            let instruction = match current {
                Some(instruction) => instruction,
                None => {
                    let Some(&first) = input.first() else {
                        break;
                    };
                    let language = self.language;
                    match language
                        .iter()
                        .find(|layout| first & layout.mask == layout.pattern)
                    {
                        Some(layout) => self.begin(layout),
                        None => return Err(self.fail(ErrorCode::DecodingError)),
                    }
                }
            };

            while self.field_index < instruction.fields.len() {
                let status = match instruction.fields[self.field_index] {
                    Field::Flags(mask) => match input.first() {
                        Some(&byte) => {
                            self.decoded.flags |= byte & mask;
                            DecodeStatus::Done
                        }
                        None => DecodeStatus::InProgress,
                    },
                    Field::Varint(prefix_bits) | Field::Varint2(prefix_bits) => {
                        if self.field_started {
                            self.integer.resume(&mut input)
                        } else {
                            self.integer.start(prefix_bits, &mut input)
                        }
                    }
                    Field::Name(prefix_bits) | Field::Value(prefix_bits) => {
                        if self.field_started {
                            self.string.resume(&mut input)
                        } else {
                            self.string.start(prefix_bits, &mut input)
                        }
                    }
                };

                match status {
                    DecodeStatus::Done => self.finish_field(instruction.fields[self.field_index]),
                    DecodeStatus::InProgress => {
                        self.field_started = true;
                        return Ok(data.len() - input.len());
                    }
                    DecodeStatus::Error(code) => return Err(self.fail(code)),
                }
            }

            self.instruction = None;
            let decoded = std::mem::replace(
                &mut self.decoded,
                Decoded {
                    opcode: instruction.opcode,
                    flags: 0,
                    varint: 0,
                    varint2: 0,
                    name: Bytes::new(),
                    value: Bytes::new(),
                },
            );
            if on_instruction(decoded).is_break() {
                break;
            }
        }

        Ok(data.len() - input.len())
    }

    fn begin(&mut self, layout: &'static InstructionLayout) -> &'static InstructionLayout {
        self.instruction = Some(layout);
        self.field_index = 0;
        self.field_started = false;
        self.decoded.opcode = layout.opcode;
        self.decoded.flags = 0;
        self.decoded.varint = 0;
        self.decoded.varint2 = 0;
        self.decoded.name = Bytes::new();
        self.decoded.value = Bytes::new();
        layout
    }

    fn finish_field(&mut self, field: Field) {
        match field {
            Field::Flags(_) => {}
            Field::Varint(_) => self.decoded.varint = self.integer.value(),
            Field::Varint2(_) => self.decoded.varint2 = self.integer.value(),
            Field::Name(_) => self.decoded.name = self.string.take_value(),
            Field::Value(_) => self.decoded.value = self.string.take_value(),
        }
        self.field_index += 1;
        self.field_started = false;
    }

    fn fail(&mut self, code: ErrorCode) -> DecodeError {
        let error = DecodeError::from_code(code);
        self.error = Some(error);
        error
    }
}
