//! Encoder stream: instructions from the encoder to the peer's decoder.
//!
//! [`EncoderStreamSender`] serializes instructions into a local buffer that
//! is handed to the transport on [`flush`](EncoderStreamSender::flush).
//! [`EncoderStreamReceiver`] parses the peer's encoder stream and dispatches
//! each instruction to an [`EncoderStreamDelegate`].

use std::ops::ControlFlow;

use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::{Error, ErrorCode, Result};
use crate::instruction_decoder::{InstructionDecoder, ENCODER_STREAM_LANGUAGE};
use crate::instructions::EncoderInstruction;
use crate::stream::StreamWriter;
use crate::wire::literal::DEFAULT_MAX_STRING_LITERAL_LENGTH;

/// Serializes encoder stream instructions.
#[derive(Debug)]
pub struct EncoderStreamSender<W = BytesMut> {
    writer: W,
    buffer: BytesMut,
    huffman_encoding: bool,
}

impl Default for EncoderStreamSender<BytesMut> {
    fn default() -> Self {
        Self::new(BytesMut::new())
    }
}

impl<W: StreamWriter> EncoderStreamSender<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: BytesMut::new(),
            huffman_encoding: true,
        }
    }

    pub fn set_huffman_encoding(&mut self, enabled: bool) {
        self.huffman_encoding = enabled;
    }

    /// Appends `instruction` to the local buffer.
    pub fn send(&mut self, instruction: &EncoderInstruction) {
        trace!(?instruction, "encoder stream instruction");
        instruction.encode(self.huffman_encoding, &mut self.buffer);
    }

    pub fn send_insert_with_name_reference(
        &mut self,
        is_static: bool,
        name_index: u64,
        value: Bytes,
    ) {
        self.send(&EncoderInstruction::InsertWithNameRef {
            is_static,
            name_index,
            value,
        });
    }

    pub fn send_insert_without_name_reference(&mut self, name: Bytes, value: Bytes) {
        self.send(&EncoderInstruction::InsertLiteral { name, value });
    }

    pub fn send_duplicate(&mut self, index: u64) {
        self.send(&EncoderInstruction::Duplicate { index });
    }

    pub fn send_set_dynamic_table_capacity(&mut self, capacity: u64) {
        self.send(&EncoderInstruction::SetCapacity { capacity });
    }

    /// Bytes serialized but not yet flushed.
    pub fn buffered_byte_count(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if the unflushed bytes plus the bytes the transport
    /// still holds stay within `limit`.
    pub fn can_write(&self, limit: usize) -> bool {
        self.writer.num_bytes_buffered() + self.buffer.len() < limit
    }

    /// Hands all buffered instructions to the writer, returning the number of bytes.
    pub fn flush(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }
        let data = self.buffer.split();
        self.writer.write_stream_data(&data);
        data.len()
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}

/// Handler for instructions parsed from the peer's encoder stream.
///
/// Returning an error from any `on_*` method stops the receiver; the error
/// is then reported once through [`on_error_detected`](Self::on_error_detected).
pub trait EncoderStreamDelegate {
    fn on_insert_with_name_reference(
        &mut self,
        is_static: bool,
        name_index: u64,
        value: Bytes,
    ) -> Result<()>;

    fn on_insert_without_name_reference(&mut self, name: Bytes, value: Bytes) -> Result<()>;

    fn on_duplicate(&mut self, index: u64) -> Result<()>;

    fn on_set_dynamic_table_capacity(&mut self, capacity: u64) -> Result<()>;

    fn on_error_detected(&mut self, code: ErrorCode, message: &str);
}

/// Parses the peer's encoder stream.
#[derive(Debug)]
pub struct EncoderStreamReceiver {
    decoder: InstructionDecoder,
    error: Option<Error>,
}

impl Default for EncoderStreamReceiver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STRING_LITERAL_LENGTH)
    }
}

impl EncoderStreamReceiver {
    pub fn new(max_string_literal_length: usize) -> Self {
        Self {
            decoder: InstructionDecoder::with_max_string_length(
                ENCODER_STREAM_LANGUAGE,
                max_string_literal_length,
            ),
            error: None,
        }
    }

    /// Returns the error that stopped this stream, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Decodes `data`, dispatching every complete instruction to `delegate`.
    ///
    /// Stops at the first error; later calls return the same error without
    /// looking at their input.
    pub fn decode(&mut self, data: &[u8], delegate: &mut impl EncoderStreamDelegate) -> Result<()> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let mut failure = None;
        let decoded = self.decoder.decode(data, |decoded| {
            let Some(instruction) = EncoderInstruction::from_decoded(decoded) else {
                return ControlFlow::Continue(());
            };
            let result = match instruction {
                EncoderInstruction::InsertWithNameRef {
                    is_static,
                    name_index,
                    value,
                } => delegate.on_insert_with_name_reference(is_static, name_index, value),
                EncoderInstruction::InsertLiteral { name, value } => {
                    delegate.on_insert_without_name_reference(name, value)
                }
                EncoderInstruction::Duplicate { index } => delegate.on_duplicate(index),
                EncoderInstruction::SetCapacity { capacity } => {
                    delegate.on_set_dynamic_table_capacity(capacity)
                }
            };
            match result {
                Ok(()) => ControlFlow::Continue(()),
                Err(error) => {
                    failure = Some(error);
                    ControlFlow::Break(())
                }
            }
        });

        let error = match (decoded, failure) {
            (_, Some(error)) => error,
            (Err(e), None) => Error::encoder_stream(e.code, e.message),
            (Ok(_), None) => return Ok(()),
        };

        warn!(%error, "encoder stream error");
        delegate.on_error_detected(
            error.code().unwrap_or(ErrorCode::DecodingError),
            error.message().unwrap_or_default(),
        );
        self.error = Some(error.clone());
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        errors: Vec<(ErrorCode, String)>,
        reject_duplicates: bool,
    }

    impl EncoderStreamDelegate for Recorder {
        fn on_insert_with_name_reference(
            &mut self,
            is_static: bool,
            name_index: u64,
            value: Bytes,
        ) -> Result<()> {
            self.events.push(format!(
                "name_ref static={} index={} value={}",
                is_static,
                name_index,
                String::from_utf8_lossy(&value)
            ));
            Ok(())
        }

        fn on_insert_without_name_reference(&mut self, name: Bytes, value: Bytes) -> Result<()> {
            self.events.push(format!(
                "literal {}={}",
                String::from_utf8_lossy(&name),
                String::from_utf8_lossy(&value)
            ));
            Ok(())
        }

        fn on_duplicate(&mut self, index: u64) -> Result<()> {
            if self.reject_duplicates {
                return Err(Error::encoder_stream(
                    ErrorCode::InvalidRelativeIndex,
                    "Invalid relative index.",
                ));
            }
            self.events.push(format!("duplicate {}", index));
            Ok(())
        }

        fn on_set_dynamic_table_capacity(&mut self, capacity: u64) -> Result<()> {
            self.events.push(format!("capacity {}", capacity));
            Ok(())
        }

        fn on_error_detected(&mut self, code: ErrorCode, message: &str) {
            self.errors.push((code, message.to_string()));
        }
    }

    #[test]
    fn test_sender_receiver() {
        let mut sender = EncoderStreamSender::default();
        sender.set_huffman_encoding(false);
        sender.send_set_dynamic_table_capacity(220);
        sender.send_insert_with_name_reference(true, 0, Bytes::from_static(b"www.example.com"));
        sender.send_insert_without_name_reference(
            Bytes::from_static(b"custom-key"),
            Bytes::from_static(b"custom-value"),
        );
        sender.send_duplicate(1);
        assert!(sender.buffered_byte_count() > 0);
        assert_eq!(sender.writer().len(), 0);

        let flushed = sender.flush();
        assert_eq!(flushed, sender.writer().len());
        assert_eq!(sender.buffered_byte_count(), 0);
        assert_eq!(&sender.writer()[..3], &[0x3f, 0xbd, 0x01]);

        let mut receiver = EncoderStreamReceiver::default();
        let mut recorder = Recorder::default();
        receiver.decode(sender.writer(), &mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec![
                "capacity 220",
                "name_ref static=true index=0 value=www.example.com",
                "literal custom-key=custom-value",
                "duplicate 1",
            ]
        );
    }

    #[test]
    fn test_can_write() {
        let mut sender = EncoderStreamSender::default();
        sender.send_duplicate(0);
        assert!(sender.can_write(2));
        assert!(!sender.can_write(1));
        sender.flush();
        // Bytes held by the transport still count.
        assert!(!sender.can_write(1));
        sender.writer_mut().clear();
        assert!(sender.can_write(1));
    }

    #[test]
    fn test_decode_error_reported_once_and_sticky() {
        let mut receiver = EncoderStreamReceiver::default();
        let mut recorder = Recorder::default();
        let mut data = vec![0x3f];
        data.extend(std::iter::repeat(0xff).take(11));

        let err = receiver.decode(&data, &mut recorder).unwrap_err();
        assert_eq!(err.error_code(), crate::error::QPACK_ENCODER_STREAM_ERROR);
        assert_eq!(
            recorder.errors,
            vec![(ErrorCode::IntegerTooLarge, "Encoded integer too large.".to_string())]
        );

        assert!(receiver.decode(&[0x02], &mut recorder).is_err());
        assert!(recorder.events.is_empty());
        assert_eq!(recorder.errors.len(), 1);
    }

    #[test]
    fn test_delegate_error_stops_processing() {
        let mut receiver = EncoderStreamReceiver::default();
        let mut recorder = Recorder {
            reject_duplicates: true,
            ..Recorder::default()
        };
        let err = receiver.decode(&[0x00, 0x21], &mut recorder).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidRelativeIndex));
        assert!(recorder.events.is_empty());
        assert_eq!(recorder.errors[0].1, "Invalid relative index.");
    }
}
