//! QPACK Encoder implementation per RFC 9204.
//!
//! Per header list the encoder decides, field by field, whether to
//! reference the static or dynamic table, insert a new dynamic entry and
//! reference it, or fall back to a literal:
//! - Dynamic table management with eviction only below the smallest blocking index
//! - Encoder stream instruction generation with backpressure
//! - Blocked stream budget tracking
//! - Required Insert Count and Base calculation
//!
//! Acknowledgements from the peer's decoder arrive through
//! [`Encoder::on_decoder_stream_data`].

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::blocking::{self, BlockingManager, IndexSet};
use crate::config::QpackConfig;
use crate::decoder_stream::{DecoderStreamDelegate, DecoderStreamReceiver};
use crate::encoder_stream::EncoderStreamSender;
use crate::error::{Error, ErrorCode, Result};
use crate::header_block;
use crate::header_list::HeaderField;
use crate::header_table::{HeaderTable, Match};
use crate::instructions::FieldLine;
use crate::stream::StreamWriter;
use crate::value_splitter::split_value;

/// Field line representation before the Base is known.
#[derive(Debug)]
enum Representation<'h> {
    IndexedStatic(u64),
    IndexedDynamic(u64),
    LiteralStaticName { index: u64, value: &'h [u8] },
    LiteralDynamicName { index: u64, value: &'h [u8] },
    Literal { name: &'h [u8], value: &'h [u8] },
}

/// QPACK Encoder state.
#[derive(Debug)]
pub struct Encoder<W = BytesMut> {
    header_table: HeaderTable,
    blocking_manager: BlockingManager,
    encoder_stream_sender: EncoderStreamSender<W>,
    decoder_stream_receiver: DecoderStreamReceiver,
    maximum_blocked_streams: u64,
    huffman_encoding: bool,
    cookie_crumbling: bool,
    draining_fraction: f64,
    encoder_stream_buffer_limit: usize,
}

impl Encoder<BytesMut> {
    /// Creates an encoder writing its encoder stream into a `BytesMut`.
    ///
    /// The dynamic table capacity starts at zero; call
    /// [`set_dynamic_table_capacity`](Self::set_dynamic_table_capacity) to
    /// start using it.
    pub fn new(maximum_dynamic_table_capacity: usize, maximum_blocked_streams: u64) -> Self {
        Self::with_writer(BytesMut::new(), maximum_dynamic_table_capacity, maximum_blocked_streams)
    }

    /// Creates an encoder from a configuration, with zero initial capacity.
    pub fn from_config(config: &QpackConfig) -> Result<Self> {
        Self::with_config(BytesMut::new(), config)
    }

    /// Takes everything written to the encoder stream so far.
    pub fn take_encoder_stream_data(&mut self) -> Option<Bytes> {
        let writer = self.encoder_stream_sender.writer_mut();
        if writer.is_empty() {
            None
        } else {
            Some(writer.split().freeze())
        }
    }
}

impl<W: StreamWriter> Encoder<W> {
    /// Creates an encoder writing its encoder stream into `writer`.
    ///
    /// A zero `maximum_dynamic_table_capacity` can still be raised once with
    /// [`set_maximum_dynamic_table_capacity`](Self::set_maximum_dynamic_table_capacity).
    pub fn with_writer(
        writer: W,
        maximum_dynamic_table_capacity: usize,
        maximum_blocked_streams: u64,
    ) -> Self {
        let mut header_table = HeaderTable::new();
        // Zero leaves the maximum open for the peer's SETTINGS.
        if maximum_dynamic_table_capacity > 0 {
            let _ = header_table.set_maximum_capacity(maximum_dynamic_table_capacity);
        }
        let defaults = QpackConfig::default();

        Self {
            header_table,
            blocking_manager: BlockingManager::new(),
            encoder_stream_sender: EncoderStreamSender::new(writer),
            decoder_stream_receiver: DecoderStreamReceiver::new(),
            maximum_blocked_streams,
            huffman_encoding: defaults.huffman_encoding,
            cookie_crumbling: defaults.cookie_crumbling,
            draining_fraction: defaults.draining_fraction,
            encoder_stream_buffer_limit: defaults.encoder_stream_buffer_limit,
        }
    }

    pub fn with_config(writer: W, config: &QpackConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| Error::InvalidConfig(errors.join("; ")))?;
        let capacity = usize::try_from(config.maximum_dynamic_table_capacity).map_err(|_| {
            Error::InvalidConfig("maximum_dynamic_table_capacity out of range".into())
        })?;

        let mut encoder = Self::with_writer(writer, capacity, config.maximum_blocked_streams);
        encoder.set_huffman_encoding(config.huffman_encoding);
        encoder.cookie_crumbling = config.cookie_crumbling;
        encoder.draining_fraction = config.draining_fraction;
        encoder.encoder_stream_buffer_limit = config.encoder_stream_buffer_limit;
        Ok(encoder)
    }

    /// Sets the maximum capacity from the peer's SETTINGS. Allowed once.
    pub fn set_maximum_dynamic_table_capacity(&mut self, maximum_capacity: usize) -> Result<()> {
        self.header_table.set_maximum_capacity(maximum_capacity)
    }

    /// Changes the dynamic table capacity and tells the peer.
    ///
    /// Fails if the capacity exceeds the maximum or if shrinking would
    /// evict entries the decoder may still need.
    pub fn set_dynamic_table_capacity(&mut self, capacity: usize) -> Result<()> {
        let bound = self.blocking_manager.smallest_blocking_index();
        self.header_table.set_capacity(capacity, bound)?;
        debug!(capacity, "dynamic table capacity changed");
        self.encoder_stream_sender
            .send_set_dynamic_table_capacity(capacity as u64);
        self.encoder_stream_sender.flush();
        Ok(())
    }

    /// Raises the blocked stream limit. Returns false if `maximum` is lower
    /// than the current limit.
    pub fn set_maximum_blocked_streams(&mut self, maximum: u64) -> bool {
        if maximum < self.maximum_blocked_streams {
            return false;
        }
        self.maximum_blocked_streams = maximum;
        true
    }

    pub fn maximum_blocked_streams(&self) -> u64 {
        self.maximum_blocked_streams
    }

    pub fn set_huffman_encoding(&mut self, enabled: bool) {
        self.huffman_encoding = enabled;
        self.encoder_stream_sender.set_huffman_encoding(enabled);
    }

    pub fn set_cookie_crumbling(&mut self, enabled: bool) {
        self.cookie_crumbling = enabled;
    }

    pub fn header_table(&self) -> &HeaderTable {
        &self.header_table
    }

    pub fn blocking_manager(&self) -> &BlockingManager {
        &self.blocking_manager
    }

    pub fn encoder_stream_sender(&self) -> &EncoderStreamSender<W> {
        &self.encoder_stream_sender
    }

    pub fn encoder_stream_sender_mut(&mut self) -> &mut EncoderStreamSender<W> {
        &mut self.encoder_stream_sender
    }

    /// Encode headers into a header block for a given stream.
    ///
    /// # Arguments
    /// * `stream_id` - HTTP/3 stream ID
    /// * `headers` - List of (name, value) pairs
    ///
    /// # Returns
    /// Encoded header block bytes
    pub fn encode(&mut self, stream_id: u64, headers: &[(&[u8], &[u8])]) -> Result<Bytes> {
        let (block, _) = self.encode_fields(stream_id, headers.iter().copied())?;
        Ok(block)
    }

    /// Encodes a field section, returning the header block and the number of
    /// bytes this call wrote to the encoder stream.
    pub fn encode_field_section(
        &mut self,
        stream_id: u64,
        fields: &[HeaderField],
    ) -> Result<(Bytes, usize)> {
        self.encode_fields(
            stream_id,
            fields.iter().map(|f| (f.name.as_ref(), f.value.as_ref())),
        )
    }

    fn encode_fields<'h>(
        &mut self,
        stream_id: u64,
        fields: impl Iterator<Item = (&'h [u8], &'h [u8])>,
    ) -> Result<(Bytes, usize)> {
        let known_received_count = self.blocking_manager.known_received_count();
        let draining_index = self.header_table.draining_index(self.draining_fraction);
        let blocking_allowed = self
            .blocking_manager
            .blocking_allowed_on_stream(stream_id, self.maximum_blocked_streams);
        // Entries at or above this index must survive this header block.
        let mut smallest_non_evictable = self
            .blocking_manager
            .smallest_blocking_index()
            .min(self.header_table.inserted_count());

        let mut referred = IndexSet::new();
        let mut representations = Vec::new();

        for (name, value) in fields {
            for piece in split_value(name, value, self.cookie_crumbling) {
                let representation = self.choose_representation(
                    name,
                    piece,
                    known_received_count,
                    draining_index,
                    blocking_allowed,
                    &mut smallest_non_evictable,
                )?;
                match representation {
                    Representation::IndexedDynamic(index)
                    | Representation::LiteralDynamicName { index, .. } => {
                        referred.insert(index);
                    }
                    _ => {}
                }
                representations.push(representation);
            }
        }

        let required_insert_count = blocking::required_insert_count(&referred);
        let base = required_insert_count;

        let mut block = BytesMut::new();
        header_block::encode_prefix(
            required_insert_count,
            base,
            self.header_table.max_entries(),
            &mut block,
        );
        for representation in representations {
            field_line(representation, base).encode(self.huffman_encoding, &mut block);
        }

        if !referred.is_empty() {
            self.blocking_manager
                .on_header_block_sent(stream_id, referred, required_insert_count);
        }
        let encoder_stream_bytes = self.encoder_stream_sender.flush();

        debug!(
            stream_id,
            required_insert_count,
            header_block_bytes = block.len(),
            encoder_stream_bytes,
            "encoded header block"
        );
        Ok((block.freeze(), encoder_stream_bytes))
    }

    fn choose_representation<'h>(
        &mut self,
        name: &'h [u8],
        value: &'h [u8],
        known_received_count: u64,
        draining_index: u64,
        blocking_allowed: bool,
        smallest_non_evictable: &mut u64,
    ) -> Result<Representation<'h>> {
        let referable = |index: u64| blocking_allowed || index < known_received_count;
        let usable = |index: u64| referable(index) && index >= draining_index;

        let matched = self.header_table.find_match(name, value, usable);
        if let Match::Full { is_static, index } = matched {
            if is_static {
                return Ok(Representation::IndexedStatic(index));
            }
            *smallest_non_evictable = (*smallest_non_evictable).min(index);
            return Ok(Representation::IndexedDynamic(index));
        }

        // A draining exact match is refreshed with a Duplicate.
        if let Some(index) = self.header_table.find_dynamic_exact(name, value) {
            if blocking_allowed && index < draining_index {
                let bound = (*smallest_non_evictable).min(index);
                if self.can_insert(name, value, bound) {
                    let relative_index = self.header_table.inserted_count() - index - 1;
                    self.encoder_stream_sender.send_duplicate(relative_index);
                    let new_index = self.insert(name, value, bound)?;
                    self.blocking_manager
                        .on_reference_sent_on_encoder_stream(new_index, index);
                    *smallest_non_evictable = bound.min(new_index);
                    return Ok(Representation::IndexedDynamic(new_index));
                }
            }
        }

        match matched {
            Match::Name {
                is_static: true,
                index,
            } => {
                if blocking_allowed && self.can_insert(name, value, *smallest_non_evictable) {
                    self.encoder_stream_sender.send_insert_with_name_reference(
                        true,
                        index,
                        Bytes::copy_from_slice(value),
                    );
                    let new_index = self.insert(name, value, *smallest_non_evictable)?;
                    *smallest_non_evictable = (*smallest_non_evictable).min(new_index);
                    return Ok(Representation::IndexedDynamic(new_index));
                }
                Ok(Representation::LiteralStaticName { index, value })
            }
            Match::Name {
                is_static: false,
                index,
            } => {
                let bound = (*smallest_non_evictable).min(index);
                if blocking_allowed && self.can_insert(name, value, bound) {
                    let relative_index = self.header_table.inserted_count() - index - 1;
                    self.encoder_stream_sender.send_insert_with_name_reference(
                        false,
                        relative_index,
                        Bytes::copy_from_slice(value),
                    );
                    let new_index = self.insert(name, value, bound)?;
                    self.blocking_manager
                        .on_reference_sent_on_encoder_stream(new_index, index);
                    *smallest_non_evictable = bound.min(new_index);
                    return Ok(Representation::IndexedDynamic(new_index));
                }
                *smallest_non_evictable = bound;
                Ok(Representation::LiteralDynamicName { index, value })
            }
            _ => {
                if blocking_allowed && self.can_insert(name, value, *smallest_non_evictable) {
                    self.encoder_stream_sender.send_insert_without_name_reference(
                        Bytes::copy_from_slice(name),
                        Bytes::copy_from_slice(value),
                    );
                    let new_index = self.insert(name, value, *smallest_non_evictable)?;
                    *smallest_non_evictable = (*smallest_non_evictable).min(new_index);
                    return Ok(Representation::IndexedDynamic(new_index));
                }
                Ok(Representation::Literal { name, value })
            }
        }
    }

    /// True if an insertion fits without evicting entries at or above
    /// `bound` and the encoder stream is not backed up.
    fn can_insert(&self, name: &[u8], value: &[u8], bound: u64) -> bool {
        self.header_table.can_insert(name, value, bound)
            && self
                .encoder_stream_sender
                .can_write(self.encoder_stream_buffer_limit)
    }

    fn insert(&mut self, name: &[u8], value: &[u8], bound: u64) -> Result<u64> {
        self.header_table.insert_entry(
            Bytes::copy_from_slice(name),
            Bytes::copy_from_slice(value),
            bound,
        )
    }

    /// Evicts the oldest dynamic entry if the decoder can no longer need it.
    ///
    /// Refuses while the entry is referenced by an unacknowledged header
    /// block or has not been acknowledged through the Known Received Count.
    pub fn evict_one(&mut self) -> bool {
        let bound = self.blocking_manager.smallest_blocking_index();
        self.header_table.evict_one(bound)
    }

    /// Processes bytes received on the peer's decoder stream.
    pub fn on_decoder_stream_data(&mut self, data: &[u8]) -> Result<()> {
        let mut receiver = std::mem::take(&mut self.decoder_stream_receiver);
        let result = receiver.decode(data, self);
        self.decoder_stream_receiver = receiver;
        result
    }
}

fn field_line(representation: Representation<'_>, base: u64) -> FieldLine {
    match representation {
        Representation::IndexedStatic(index) => FieldLine::IndexedStatic { index },
        Representation::IndexedDynamic(index) => FieldLine::IndexedDynamic {
            relative_index: base - index - 1,
        },
        Representation::LiteralStaticName { index, value } => FieldLine::LiteralStaticName {
            name_index: index,
            value: Bytes::copy_from_slice(value),
            never_indexed: false,
        },
        Representation::LiteralDynamicName { index, value } => FieldLine::LiteralDynamicName {
            relative_index: base - index - 1,
            value: Bytes::copy_from_slice(value),
            never_indexed: false,
        },
        Representation::Literal { name, value } => FieldLine::Literal {
            name: Bytes::copy_from_slice(name),
            value: Bytes::copy_from_slice(value),
            never_indexed: false,
        },
    }
}

impl<W: StreamWriter> DecoderStreamDelegate for Encoder<W> {
    fn on_insert_count_increment(&mut self, increment: u64) -> Result<()> {
        if increment == 0 {
            return Err(Error::decoder_stream(
                ErrorCode::InvalidZeroIncrement,
                "Invalid increment value 0.",
            ));
        }

        let known_received_count = self.blocking_manager.known_received_count();
        let Some(new_count) = known_received_count.checked_add(increment) else {
            return Err(Error::decoder_stream(
                ErrorCode::IncrementOverflow,
                "Insert Count Increment instruction causes overflow.",
            ));
        };

        let inserted_count = self.header_table.inserted_count();
        if new_count > inserted_count {
            return Err(Error::decoder_stream(
                ErrorCode::ImpossibleInsertCount,
                format!(
                    "Increment value {} raises known received count to {} exceeding inserted entry count {}",
                    increment, new_count, inserted_count
                ),
            ));
        }

        trace!(increment, known_received_count = new_count, "insert count increment");
        self.blocking_manager.on_insert_count_increment(increment);
        Ok(())
    }

    fn on_header_acknowledgement(&mut self, stream_id: u64) -> Result<()> {
        if !self.blocking_manager.on_header_acknowledgement(stream_id) {
            return Err(Error::decoder_stream(
                ErrorCode::IncorrectAcknowledgement,
                format!(
                    "Header Acknowledgement received for stream {} with no outstanding header blocks.",
                    stream_id
                ),
            ));
        }
        trace!(stream_id, "header block acknowledged");
        Ok(())
    }

    fn on_stream_cancellation(&mut self, stream_id: u64) -> Result<()> {
        trace!(stream_id, "stream cancelled by peer decoder");
        self.blocking_manager.on_stream_cancellation(stream_id);
        Ok(())
    }

    fn on_error_detected(&mut self, code: ErrorCode, message: &str) {
        warn!(%code, message, "decoder stream error detected");
    }
}
