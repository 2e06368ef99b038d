//! QPACK state of one HTTP/3 connection.
//!
//! Wires an [`Encoder`] and a [`Decoder`] to the connection's QPACK
//! unidirectional streams per RFC 9204 Section 4.2:
//! - Encoder stream (type 0x02) carrying our dynamic table updates
//! - Decoder stream (type 0x03) carrying our acknowledgements
//!
//! Every QPACK error is a connection error. The first one is kept and
//! returned by all later stream processing calls.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::QpackConfig;
use crate::decoder::{Decoder, HeaderBlockStatus};
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::header_list::{HeaderField, HeaderList};

/// QPACK session handling header compression/decompression for an HTTP/3 connection.
#[derive(Debug)]
pub struct QpackSession {
    /// Compresses outgoing header lists.
    encoder: Encoder,
    /// Decompresses incoming header blocks.
    decoder: Decoder,
    /// Our encoder stream ID (if opened).
    encoder_stream_id: Option<u64>,
    /// Our decoder stream ID (if opened).
    decoder_stream_id: Option<u64>,
    /// Dynamic table capacity the encoder uses once the peer allows it.
    preferred_table_capacity: u64,
    connection_error: Option<Error>,
}

impl QpackSession {
    /// Creates a session advertising the limits in `config`.
    ///
    /// The encoder does not use the dynamic table until
    /// [`on_peer_settings`](Self::on_peer_settings) is called.
    pub fn new(config: &QpackConfig) -> Result<Self> {
        let decoder = Decoder::from_config(config)?;
        let encoder = Encoder::from_config(&QpackConfig {
            maximum_dynamic_table_capacity: 0,
            maximum_blocked_streams: 0,
            ..config.clone()
        })?;

        Ok(Self {
            encoder,
            decoder,
            encoder_stream_id: None,
            decoder_stream_id: None,
            preferred_table_capacity: config.maximum_dynamic_table_capacity,
            connection_error: None,
        })
    }

    /// Applies the peer's SETTINGS_QPACK_MAX_TABLE_CAPACITY and
    /// SETTINGS_QPACK_BLOCKED_STREAMS.
    pub fn on_peer_settings(
        &mut self,
        max_table_capacity: u64,
        blocked_streams: u64,
    ) -> Result<()> {
        self.check()?;
        let result = self.apply_peer_settings(max_table_capacity, blocked_streams);
        self.track(result)
    }

    /// Register the encoder stream ID.
    ///
    /// Called when the encoder stream (type 0x02) is opened.
    pub fn set_encoder_stream(&mut self, stream_id: u64) {
        self.encoder_stream_id = Some(stream_id);
    }

    /// Register the decoder stream ID.
    ///
    /// Called when the decoder stream (type 0x03) is opened.
    pub fn set_decoder_stream(&mut self, stream_id: u64) {
        self.decoder_stream_id = Some(stream_id);
    }

    pub fn encoder_stream_id(&self) -> Option<u64> {
        self.encoder_stream_id
    }

    pub fn decoder_stream_id(&self) -> Option<u64> {
        self.decoder_stream_id
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// The error that broke this connection's QPACK state, if any.
    pub fn connection_error(&self) -> Option<&Error> {
        self.connection_error.as_ref()
    }

    /// Encode a field section for an HTTP message.
    ///
    /// Encoder stream instructions it needs are collected with
    /// [`take_encoder_instructions`](Self::take_encoder_instructions) and
    /// must be sent before or along with the returned block.
    pub fn encode_field_section(
        &mut self,
        stream_id: u64,
        fields: &[HeaderField],
    ) -> Result<Bytes> {
        self.check()?;
        let result = self
            .encoder
            .encode_field_section(stream_id, fields)
            .map(|(block, _)| block);
        self.track(result)
    }

    /// Decode a complete field section of an HTTP message.
    ///
    /// Returns [`Error::Blocked`] if the section waits for encoder stream
    /// data; it is then delivered by [`poll_decoded`](Self::poll_decoded).
    pub fn decode_field_section(&mut self, stream_id: u64, encoded: &[u8]) -> Result<HeaderList> {
        self.check()?;
        let result = self.decoder.decode_field_section(stream_id, encoded);
        self.track(result)
    }

    /// Feeds part of a field section.
    pub fn decode_header_block(&mut self, stream_id: u64, data: &[u8]) -> Result<()> {
        self.check()?;
        let result = self.decoder.decode_header_block(stream_id, data);
        self.track(result)
    }

    /// Completes a field section fed with [`decode_header_block`](Self::decode_header_block).
    pub fn end_header_block(&mut self, stream_id: u64) -> Result<HeaderBlockStatus> {
        self.check()?;
        let result = self.decoder.end_header_block(stream_id);
        self.track(result)
    }

    /// Returns the next field section that finished after being blocked.
    pub fn poll_decoded(&mut self) -> Option<(u64, Result<HeaderList>)> {
        let (stream_id, result) = self.decoder.poll_decoded()?;
        Some((stream_id, self.track(result)))
    }

    /// Process data received on the peer's encoder stream.
    pub fn process_encoder_stream_data(&mut self, data: &[u8]) -> Result<()> {
        self.check()?;
        let result = self.decoder.on_encoder_stream_data(data);
        self.track(result)
    }

    /// Process data received on the peer's decoder stream.
    pub fn process_decoder_stream_data(&mut self, data: &[u8]) -> Result<()> {
        self.check()?;
        let result = self.encoder.on_decoder_stream_data(data);
        self.track(result)
    }

    /// Abandons decoding on a reset request stream.
    pub fn cancel_stream(&mut self, stream_id: u64) {
        self.decoder.cancel_stream(stream_id);
    }

    /// Get buffered encoder stream instructions to send.
    pub fn take_encoder_instructions(&mut self) -> Option<Bytes> {
        self.encoder.take_encoder_stream_data()
    }

    /// Get buffered decoder stream instructions to send, including any
    /// pending Insert Count Increment.
    pub fn take_decoder_instructions(&mut self) -> Option<Bytes> {
        self.decoder.take_decoder_stream_data()
    }

    fn apply_peer_settings(&mut self, max_table_capacity: u64, blocked_streams: u64) -> Result<()> {
        let maximum = usize::try_from(max_table_capacity)
            .map_err(|_| Error::InvalidConfig("peer max_table_capacity out of range".into()))?;
        self.encoder.set_maximum_dynamic_table_capacity(maximum)?;
        self.encoder.set_maximum_blocked_streams(blocked_streams);

        let capacity = max_table_capacity.min(self.preferred_table_capacity) as usize;
        if capacity > 0 {
            self.encoder.set_dynamic_table_capacity(capacity)?;
        }
        debug!(max_table_capacity, blocked_streams, capacity, "applied peer QPACK settings");
        Ok(())
    }

    fn check(&self) -> Result<()> {
        match &self.connection_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if !error.is_blocked() && self.connection_error.is_none() {
                warn!(%error, error_code = error.error_code(), "QPACK connection error");
                self.connection_error = Some(error.clone());
            }
        }
        result
    }
}
