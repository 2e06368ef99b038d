//! Decoder stream: acknowledgements from the decoder to the peer's encoder.

use std::ops::ControlFlow;

use bytes::BytesMut;
use tracing::{trace, warn};

use crate::error::{Error, ErrorCode, Result};
use crate::instruction_decoder::{InstructionDecoder, DECODER_STREAM_LANGUAGE};
use crate::instructions::DecoderInstruction;
use crate::stream::StreamWriter;

/// Serializes decoder stream instructions.
#[derive(Debug)]
pub struct DecoderStreamSender<W = BytesMut> {
    writer: W,
    buffer: BytesMut,
}

impl Default for DecoderStreamSender<BytesMut> {
    fn default() -> Self {
        Self::new(BytesMut::new())
    }
}

impl<W: StreamWriter> DecoderStreamSender<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: BytesMut::new(),
        }
    }

    pub fn send(&mut self, instruction: DecoderInstruction) {
        trace!(?instruction, "decoder stream instruction");
        instruction.encode(&mut self.buffer);
    }

    pub fn send_insert_count_increment(&mut self, increment: u64) {
        self.send(DecoderInstruction::InsertCountIncrement { increment });
    }

    pub fn send_header_acknowledgement(&mut self, stream_id: u64) {
        self.send(DecoderInstruction::SectionAck { stream_id });
    }

    pub fn send_stream_cancellation(&mut self, stream_id: u64) {
        self.send(DecoderInstruction::StreamCancellation { stream_id });
    }

    /// Bytes serialized but not yet flushed.
    pub fn buffered_byte_count(&self) -> usize {
        self.buffer.len()
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

/// Handler for instructions parsed from the peer's decoder stream.
///
/// Returning an error from any `on_*` method stops the receiver; the error
/// is then reported once through [`on_error_detected`](Self::on_error_detected).
pub trait DecoderStreamDelegate {
    fn on_insert_count_increment(&mut self, increment: u64) -> Result<()>;

    fn on_header_acknowledgement(&mut self, stream_id: u64) -> Result<()>;

    fn on_stream_cancellation(&mut self, stream_id: u64) -> Result<()>;

    fn on_error_detected(&mut self, code: ErrorCode, message: &str);
}

/// Parses the peer's decoder stream.
#[derive(Debug)]
pub struct DecoderStreamReceiver {
    decoder: InstructionDecoder,
    error: Option<Error>,
}

impl Default for DecoderStreamReceiver {
    fn default() -> Self {
        Self {
            decoder: InstructionDecoder::new(DECODER_STREAM_LANGUAGE),
            error: None,
        }
    }
}

impl DecoderStreamReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Decodes `data`, dispatching every complete instruction to `delegate`.
    pub fn decode(&mut self, data: &[u8], delegate: &mut impl DecoderStreamDelegate) -> Result<()> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let mut failure = None;
        let decoded = self.decoder.decode(data, |decoded| {
            let result = match DecoderInstruction::from_decoded(&decoded) {
                Some(DecoderInstruction::InsertCountIncrement { increment }) => {
                    delegate.on_insert_count_increment(increment)
                }
                Some(DecoderInstruction::SectionAck { stream_id }) => {
                    delegate.on_header_acknowledgement(stream_id)
                }
                Some(DecoderInstruction::StreamCancellation { stream_id }) => {
                    delegate.on_stream_cancellation(stream_id)
                }
                None => Ok(()),
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
            (Err(e), None) => Error::decoder_stream(e.code, e.message),
            (Ok(_), None) => return Ok(()),
        };

        warn!(%error, "decoder stream error");
        delegate.on_error_detected(
            error.code().unwrap_or(ErrorCode::DecodingError),
            error.message().unwrap_or_default(),
        );
        self.error = Some(error.clone());
        Err(error)
    }
}
