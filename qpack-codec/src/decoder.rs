//! Full QPACK decoder implementation.
//!
//! Decodes QPACK-compressed HTTP header field sections per RFC 9204.
//!
//! The decoder mirrors the peer encoder's dynamic table by applying the
//! instructions it receives on the encoder stream, and decodes header
//! blocks progressively: bytes may arrive in any number of pieces. A block
//! whose Required Insert Count is ahead of the table is parked until the
//! encoder stream catches up, then decoded without the caller re-sending it.
//! Results of blocks that complete that way are collected with
//! [`Decoder::poll_decoded`].

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::QpackConfig;
use crate::decoder_stream::DecoderStreamSender;
use crate::dynamic_table::DynamicTable;
use crate::encoder_stream::{EncoderStreamDelegate, EncoderStreamReceiver};
use crate::error::{Error, ErrorCode, Result};
use crate::header_block;
use crate::header_list::{DecodedHeadersAccumulator, HeaderList};
use crate::instruction_decoder::{Decoded, InstructionDecoder, FIELD_LINE_LANGUAGE, PREFIX_LANGUAGE};
use crate::instructions::FieldLine;
use crate::static_table;
use crate::stream::StreamWriter;
use crate::wire::literal::DEFAULT_MAX_STRING_LITERAL_LENGTH;

/// Progress of a single header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBlockState {
    /// No bytes received yet.
    Idle,
    /// Reading the Required Insert Count and Base.
    AccumulatingPrefix,
    /// Waiting for the encoder stream to deliver referenced entries.
    AwaitingEntries,
    /// Decoding field lines.
    Decoding,
    Done,
    Error,
}

/// Outcome of [`Decoder::end_header_block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderBlockStatus {
    Complete(HeaderList),
    /// The block completes once the encoder stream delivers the entries it
    /// references; see [`Decoder::poll_decoded`].
    Blocked,
}

type FieldLineError = (ErrorCode, &'static str);
type Resolved = std::result::Result<(Bytes, Bytes), FieldLineError>;

/// Decoding state of one header block.
#[derive(Debug)]
struct HeaderBlock {
    state: HeaderBlockState,
    prefix: InstructionDecoder,
    field_lines: InstructionDecoder,
    required_insert_count: u64,
    base: u64,
    /// One more than the largest absolute index referenced so far.
    required_insert_count_so_far: u64,
    /// Bytes received while waiting for entries.
    buffered: BytesMut,
    /// True once the caller signalled the end of the block.
    ended: bool,
    compressed_size: usize,
    headers: DecodedHeadersAccumulator,
    error: Option<Error>,
}

impl HeaderBlock {
    fn new(max_string_literal_length: usize, max_header_list_size: usize) -> Self {
        Self {
            state: HeaderBlockState::Idle,
            prefix: InstructionDecoder::new(PREFIX_LANGUAGE),
            field_lines: InstructionDecoder::with_max_string_length(
                FIELD_LINE_LANGUAGE,
                max_string_literal_length,
            ),
            required_insert_count: 0,
            base: 0,
            required_insert_count_so_far: 0,
            buffered: BytesMut::new(),
            ended: false,
            compressed_size: 0,
            headers: DecodedHeadersAccumulator::new(max_header_list_size),
            error: None,
        }
    }

    fn decode(&mut self, stream_id: u64, data: &[u8], table: &DynamicTable) -> Result<()> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let result = self.decode_inner(stream_id, data, table);
        if let Err(error) = &result {
            self.fail(error.clone());
        }
        result
    }

    fn decode_inner(&mut self, stream_id: u64, data: &[u8], table: &DynamicTable) -> Result<()> {
        let mut input = data;

        if self.state == HeaderBlockState::Idle && !input.is_empty() {
            self.state = HeaderBlockState::AccumulatingPrefix;
        }

        if self.state == HeaderBlockState::AccumulatingPrefix {
            let mut prefix = None;
            let consumed = self
                .prefix
                .decode(input, |decoded| {
                    prefix = Some(decoded);
                    ControlFlow::Break(())
                })
                .map_err(|e| Error::decompression(stream_id, e.code, e.message))?;
            input = &input[consumed..];

            match prefix {
                Some(prefix) => self.on_prefix(stream_id, prefix, table)?,
                None => return Ok(()),
            }
        }

        match self.state {
            HeaderBlockState::AwaitingEntries => {
                self.buffered.extend_from_slice(input);
                Ok(())
            }
            HeaderBlockState::Decoding => self.decode_field_lines(stream_id, input, table),
            _ => Ok(()),
        }
    }

    fn on_prefix(&mut self, stream_id: u64, prefix: Decoded, table: &DynamicTable) -> Result<()> {
        let required_insert_count = header_block::decode_required_insert_count(
            prefix.varint,
            table.max_entries(),
            table.inserted_count(),
        )
        .ok_or_else(|| {
            Error::decompression(
                stream_id,
                ErrorCode::DecodingError,
                "Error decoding Required Insert Count.",
            )
        })?;

        let sign = prefix.flags & 0x80 != 0;
        let base = header_block::decode_base(required_insert_count, sign, prefix.varint2)
            .ok_or_else(|| {
                Error::decompression(stream_id, ErrorCode::DecodingError, "Error calculating Base.")
            })?;

        self.required_insert_count = required_insert_count;
        self.base = base;
        self.state = if required_insert_count > table.inserted_count() {
            HeaderBlockState::AwaitingEntries
        } else {
            HeaderBlockState::Decoding
        };
        trace!(stream_id, required_insert_count, base, "decoded header block prefix");
        Ok(())
    }

    fn decode_field_lines(
        &mut self,
        stream_id: u64,
        input: &[u8],
        table: &DynamicTable,
    ) -> Result<()> {
        let required_insert_count = self.required_insert_count;
        let base = self.base;
        let so_far = &mut self.required_insert_count_so_far;
        let headers = &mut self.headers;

        let mut failure = None;
        let decoded = self.field_lines.decode(input, |decoded| {
            let Some(line) = FieldLine::from_decoded(decoded) else {
                return ControlFlow::Continue(());
            };
            match resolve_field_line(line, table, required_insert_count, base, so_far) {
                Ok((name, value)) => {
                    headers.on_header_decoded(name, value);
                    ControlFlow::Continue(())
                }
                Err(error) => {
                    failure = Some(error);
                    ControlFlow::Break(())
                }
            }
        });

        match (decoded, failure) {
            (_, Some((code, message))) => Err(Error::decompression(stream_id, code, message)),
            (Err(e), None) => Err(Error::decompression(stream_id, e.code, e.message)),
            (Ok(_), None) => Ok(()),
        }
    }

    /// Leaves the blocked state and decodes everything buffered meanwhile.
    fn resume(&mut self, stream_id: u64, table: &DynamicTable) -> Result<()> {
        self.state = HeaderBlockState::Decoding;
        let buffered = std::mem::take(&mut self.buffered);
        self.decode(stream_id, &buffered, table)
    }

    /// Checks that the block ended cleanly and returns its header list.
    fn finish(&mut self, stream_id: u64) -> Result<HeaderList> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let message = match self.state {
            HeaderBlockState::Idle | HeaderBlockState::AccumulatingPrefix => {
                Some("Incomplete header data prefix.")
            }
            HeaderBlockState::Decoding if !self.field_lines.at_instruction_boundary() => {
                Some("Incomplete header block.")
            }
            HeaderBlockState::Decoding
                if self.required_insert_count != self.required_insert_count_so_far =>
            {
                Some("Required Insert Count too large.")
            }
            _ => None,
        };
        if let Some(message) = message {
            let error = Error::decompression(stream_id, ErrorCode::DecodingError, message);
            self.fail(error.clone());
            return Err(error);
        }

        self.state = HeaderBlockState::Done;
        let headers = std::mem::replace(&mut self.headers, DecodedHeadersAccumulator::new(0));
        Ok(headers.finish(self.compressed_size))
    }

    fn fail(&mut self, error: Error) {
        self.state = HeaderBlockState::Error;
        self.buffered.clear();
        self.error = Some(error);
    }
}

/// Looks up the name and value a field line refers to.
fn resolve_field_line(
    line: FieldLine,
    table: &DynamicTable,
    required_insert_count: u64,
    base: u64,
    required_insert_count_so_far: &mut u64,
) -> Resolved {
    let mut dynamic_entry = |absolute_index: u64| -> Resolved {
        if absolute_index >= required_insert_count {
            return Err((
                ErrorCode::DecodingError,
                "Absolute Index must be smaller than Required Insert Count.",
            ));
        }
        let entry = table.entry(absolute_index).ok_or((
            ErrorCode::DynamicEntryNotFound,
            "Dynamic table entry already evicted.",
        ))?;
        *required_insert_count_so_far = (*required_insert_count_so_far).max(absolute_index + 1);
        Ok((entry.name().clone(), entry.value().clone()))
    };
    let relative = |relative_index: u64| {
        base.checked_sub(relative_index)
            .and_then(|i| i.checked_sub(1))
            .ok_or((ErrorCode::InvalidRelativeIndex, "Invalid relative index."))
    };
    let post_base = |post_base_index: u64| {
        base.checked_add(post_base_index)
            .ok_or((ErrorCode::InvalidRelativeIndex, "Invalid post-base index."))
    };
    let static_entry = |index: u64| {
        static_table::get(index).ok_or((
            ErrorCode::InvalidStaticEntry,
            "Static table entry not found.",
        ))
    };

    match line {
        FieldLine::IndexedStatic { index } => {
            let entry = static_entry(index)?;
            Ok((
                Bytes::from_static(entry.name),
                Bytes::from_static(entry.value),
            ))
        }
        FieldLine::IndexedDynamic { relative_index } => dynamic_entry(relative(relative_index)?),
        FieldLine::IndexedPostBase { post_base_index } => {
            dynamic_entry(post_base(post_base_index)?)
        }
        FieldLine::LiteralStaticName {
            name_index, value, ..
        } => Ok((Bytes::from_static(static_entry(name_index)?.name), value)),
        FieldLine::LiteralDynamicName {
            relative_index,
            value,
            ..
        } => {
            let (name, _) = dynamic_entry(relative(relative_index)?)?;
            Ok((name, value))
        }
        FieldLine::LiteralPostBaseName {
            post_base_index,
            value,
            ..
        } => {
            let (name, _) = dynamic_entry(post_base(post_base_index)?)?;
            Ok((name, value))
        }
        FieldLine::Literal { name, value, .. } => Ok((name, value)),
    }
}

/// QPACK decoder.
#[derive(Debug)]
pub struct Decoder<W = BytesMut> {
    dynamic_table: DynamicTable,
    encoder_stream_receiver: EncoderStreamReceiver,
    decoder_stream_sender: DecoderStreamSender<W>,
    header_blocks: HashMap<u64, HeaderBlock>,
    /// Blocked streams in the order they blocked.
    blocked_streams: VecDeque<u64>,
    /// Blocks that completed or failed while unblocking.
    decoded: VecDeque<(u64, Result<HeaderList>)>,
    known_received_count: u64,
    maximum_blocked_streams: u64,
    max_string_literal_length: usize,
    max_header_list_size: usize,
}

impl Decoder<BytesMut> {
    /// Creates a new decoder.
    ///
    /// # Arguments
    ///
    /// * `maximum_dynamic_table_capacity` - Value advertised in SETTINGS_QPACK_MAX_TABLE_CAPACITY
    /// * `maximum_blocked_streams` - Value advertised in SETTINGS_QPACK_BLOCKED_STREAMS
    pub fn new(maximum_dynamic_table_capacity: usize, maximum_blocked_streams: u64) -> Self {
        Self::with_writer(BytesMut::new(), maximum_dynamic_table_capacity, maximum_blocked_streams)
    }

    pub fn from_config(config: &QpackConfig) -> Result<Self> {
        Self::with_config(BytesMut::new(), config)
    }

    /// Flushes the decoder stream and takes everything written to it.
    pub fn take_decoder_stream_data(&mut self) -> Option<Bytes> {
        self.flush_decoder_stream();
        let writer = self.decoder_stream_sender.writer_mut();
        if writer.is_empty() {
            None
        } else {
            Some(writer.split().freeze())
        }
    }
}

impl<W: StreamWriter> Decoder<W> {
    pub fn with_writer(
        writer: W,
        maximum_dynamic_table_capacity: usize,
        maximum_blocked_streams: u64,
    ) -> Self {
        let mut dynamic_table = DynamicTable::new();
        // First call on a fresh table cannot fail.
        let _ = dynamic_table.set_maximum_capacity(maximum_dynamic_table_capacity);

        Self {
            dynamic_table,
            encoder_stream_receiver: EncoderStreamReceiver::new(DEFAULT_MAX_STRING_LITERAL_LENGTH),
            decoder_stream_sender: DecoderStreamSender::new(writer),
            header_blocks: HashMap::new(),
            blocked_streams: VecDeque::new(),
            decoded: VecDeque::new(),
            known_received_count: 0,
            maximum_blocked_streams,
            max_string_literal_length: DEFAULT_MAX_STRING_LITERAL_LENGTH,
            max_header_list_size: QpackConfig::default().max_header_list_size,
        }
    }

    pub fn with_config(writer: W, config: &QpackConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| Error::InvalidConfig(errors.join("; ")))?;
        let capacity = usize::try_from(config.maximum_dynamic_table_capacity).map_err(|_| {
            Error::InvalidConfig("maximum_dynamic_table_capacity out of range".into())
        })?;

        let mut decoder = Self::with_writer(writer, capacity, config.maximum_blocked_streams);
        decoder.encoder_stream_receiver =
            EncoderStreamReceiver::new(config.max_string_literal_length);
        decoder.max_string_literal_length = config.max_string_literal_length;
        decoder.max_header_list_size = config.max_header_list_size;
        Ok(decoder)
    }

    pub fn dynamic_table(&self) -> &DynamicTable {
        &self.dynamic_table
    }

    /// Insert count the peer encoder knows this decoder has received.
    pub fn known_received_count(&self) -> u64 {
        self.known_received_count
    }

    pub fn maximum_blocked_streams(&self) -> u64 {
        self.maximum_blocked_streams
    }

    pub fn blocked_stream_count(&self) -> usize {
        self.blocked_streams.len()
    }

    /// State of the header block in progress on `stream_id`, if any.
    pub fn header_block_state(&self, stream_id: u64) -> Option<HeaderBlockState> {
        self.header_blocks.get(&stream_id).map(|block| block.state)
    }

    pub fn decoder_stream_sender(&self) -> &DecoderStreamSender<W> {
        &self.decoder_stream_sender
    }

    pub fn decoder_stream_sender_mut(&mut self) -> &mut DecoderStreamSender<W> {
        &mut self.decoder_stream_sender
    }

    /// Processes bytes received on the peer's encoder stream.
    ///
    /// Blocked header blocks whose entries arrived are decoded right away;
    /// their results are queued for [`poll_decoded`](Self::poll_decoded).
    pub fn on_encoder_stream_data(&mut self, data: &[u8]) -> Result<()> {
        let mut receiver = std::mem::take(&mut self.encoder_stream_receiver);
        let result = receiver.decode(data, self);
        self.encoder_stream_receiver = receiver;
        result
    }

    /// Feeds part of the header block received on `stream_id`.
    pub fn decode_header_block(&mut self, stream_id: u64, data: &[u8]) -> Result<()> {
        let max_string_literal_length = self.max_string_literal_length;
        let max_header_list_size = self.max_header_list_size;
        let block = self
            .header_blocks
            .entry(stream_id)
            .or_insert_with(|| HeaderBlock::new(max_string_literal_length, max_header_list_size));

        // A stream carries one section at a time; the ended one is still blocked.
        if block.ended {
            let error = Error::decompression(
                stream_id,
                ErrorCode::DecodingError,
                "Header block already in progress.",
            );
            warn!(stream_id, %error, "header block decoding failed");
            return Err(error);
        }

        let was_blocked = block.state == HeaderBlockState::AwaitingEntries;
        block.compressed_size += data.len();
        if let Err(error) = block.decode(stream_id, data, &self.dynamic_table) {
            warn!(stream_id, %error, "header block decoding failed");
            return Err(error);
        }

        if !was_blocked && block.state == HeaderBlockState::AwaitingEntries {
            self.on_stream_blocked(stream_id)?;
        }
        Ok(())
    }

    /// Signals that the whole header block of `stream_id` has been fed.
    pub fn end_header_block(&mut self, stream_id: u64) -> Result<HeaderBlockStatus> {
        let Some(mut block) = self.header_blocks.remove(&stream_id) else {
            return Err(Error::decompression(
                stream_id,
                ErrorCode::DecodingError,
                "Incomplete header data prefix.",
            ));
        };

        if block.state == HeaderBlockState::AwaitingEntries {
            block.ended = true;
            self.header_blocks.insert(stream_id, block);
            return Ok(HeaderBlockStatus::Blocked);
        }

        let list = block.finish(stream_id).inspect_err(|error| {
            warn!(stream_id, %error, "header block decoding failed");
        })?;
        self.on_decoding_completed(stream_id, block.required_insert_count);
        Ok(HeaderBlockStatus::Complete(list))
    }

    /// Decodes a complete header block.
    ///
    /// Returns [`Error::Blocked`] if the block waits for dynamic table
    /// entries; it then completes through [`poll_decoded`](Self::poll_decoded).
    pub fn decode_field_section(&mut self, stream_id: u64, data: &[u8]) -> Result<HeaderList> {
        self.decode_header_block(stream_id, data)?;
        match self.end_header_block(stream_id)? {
            HeaderBlockStatus::Complete(list) => Ok(list),
            HeaderBlockStatus::Blocked => Err(Error::Blocked(stream_id)),
        }
    }

    /// Returns the next header block that finished after being blocked.
    pub fn poll_decoded(&mut self) -> Option<(u64, Result<HeaderList>)> {
        self.decoded.pop_front()
    }

    /// Abandons the header block on `stream_id`, e.g. on stream reset.
    pub fn cancel_stream(&mut self, stream_id: u64) {
        self.header_blocks.remove(&stream_id);
        self.blocked_streams.retain(|&id| id != stream_id);
        self.decoded.retain(|(id, _)| *id != stream_id);

        // Without a dynamic table the encoder has no state to release.
        if self.dynamic_table.maximum_capacity() > 0 {
            self.decoder_stream_sender.send_stream_cancellation(stream_id);
        }
        debug!(stream_id, "stream cancelled");
    }

    /// Acknowledges every received insertion not yet covered by a Header
    /// Acknowledgement, then writes the decoder stream.
    pub fn flush_decoder_stream(&mut self) -> usize {
        let inserted_count = self.dynamic_table.inserted_count();
        if inserted_count > self.known_received_count {
            self.decoder_stream_sender
                .send_insert_count_increment(inserted_count - self.known_received_count);
            self.known_received_count = inserted_count;
        }
        self.decoder_stream_sender.flush()
    }

    fn on_stream_blocked(&mut self, stream_id: u64) -> Result<()> {
        if self.blocked_streams.len() as u64 >= self.maximum_blocked_streams {
            let error = Error::decompression(
                stream_id,
                ErrorCode::BlockedStreamLimitExceeded,
                "Limit on number of blocked streams exceeded.",
            );
            if let Some(block) = self.header_blocks.get_mut(&stream_id) {
                block.fail(error.clone());
            }
            warn!(stream_id, %error, "header block decoding failed");
            return Err(error);
        }
        debug!(stream_id, blocked = self.blocked_streams.len() + 1, "stream blocked");
        self.blocked_streams.push_back(stream_id);
        Ok(())
    }

    fn on_decoding_completed(&mut self, stream_id: u64, required_insert_count: u64) {
        if required_insert_count > 0 {
            self.decoder_stream_sender
                .send_header_acknowledgement(stream_id);
            self.known_received_count = self.known_received_count.max(required_insert_count);
        }
        trace!(stream_id, required_insert_count, "header block decoded");
    }

    /// Resumes blocked header blocks whose entries are now in the table.
    fn on_entry_inserted(&mut self) {
        let inserted_count = self.dynamic_table.inserted_count();
        let mut still_blocked = VecDeque::new();

        while let Some(stream_id) = self.blocked_streams.pop_front() {
            let Some(block) = self.header_blocks.get_mut(&stream_id) else {
                continue;
            };
            if block.required_insert_count > inserted_count {
                still_blocked.push_back(stream_id);
                continue;
            }

            debug!(stream_id, "stream unblocked");
            let resumed = block.resume(stream_id, &self.dynamic_table);
            if !block.ended {
                // The caller keeps feeding the block; errors surface then.
                continue;
            }

            let required_insert_count = block.required_insert_count;
            let result = resumed.and_then(|()| block.finish(stream_id));
            self.header_blocks.remove(&stream_id);
            match &result {
                Ok(_) => self.on_decoding_completed(stream_id, required_insert_count),
                Err(error) => warn!(stream_id, %error, "header block decoding failed"),
            }
            self.decoded.push_back((stream_id, result));
        }

        self.blocked_streams = still_blocked;
    }

    fn insert(&mut self, name: Bytes, value: Bytes, message: &'static str) -> Result<()> {
        self.dynamic_table
            .insert_evicting(name, value)
            .map_err(|_| Error::encoder_stream(ErrorCode::ErrorInsertingEntry, message))?;
        self.on_entry_inserted();
        Ok(())
    }

    /// Absolute index of the entry `relative_index` places before the most
    /// recent insertion.
    fn encoder_stream_entry(&self, relative_index: u64) -> Result<(Bytes, Bytes)> {
        let absolute_index = self
            .dynamic_table
            .inserted_count()
            .checked_sub(relative_index)
            .and_then(|i| i.checked_sub(1))
            .ok_or_else(|| {
                Error::encoder_stream(ErrorCode::InvalidRelativeIndex, "Invalid relative index.")
            })?;
        let entry = self.dynamic_table.entry(absolute_index).ok_or_else(|| {
            Error::encoder_stream(
                ErrorCode::DynamicEntryNotFound,
                "Dynamic table entry not found.",
            )
        })?;
        Ok((entry.name().clone(), entry.value().clone()))
    }
}

impl<W: StreamWriter> EncoderStreamDelegate for Decoder<W> {
    fn on_insert_with_name_reference(
        &mut self,
        is_static: bool,
        name_index: u64,
        value: Bytes,
    ) -> Result<()> {
        let name = if is_static {
            let entry = static_table::get(name_index).ok_or_else(|| {
                Error::encoder_stream(ErrorCode::InvalidStaticEntry, "Invalid static table entry.")
            })?;
            Bytes::from_static(entry.name)
        } else {
            self.encoder_stream_entry(name_index)?.0
        };
        self.insert(name, value, "Error inserting entry with name reference.")
    }

    fn on_insert_without_name_reference(&mut self, name: Bytes, value: Bytes) -> Result<()> {
        self.insert(name, value, "Error inserting literal entry.")
    }

    fn on_duplicate(&mut self, index: u64) -> Result<()> {
        let (name, value) = self.encoder_stream_entry(index)?;
        self.insert(name, value, "Error inserting duplicate entry.")
    }

    fn on_set_dynamic_table_capacity(&mut self, capacity: u64) -> Result<()> {
        let error = || {
            Error::encoder_stream(
                ErrorCode::SetDynamicTableCapacity,
                "Error updating dynamic table capacity.",
            )
        };
        let capacity = usize::try_from(capacity).map_err(|_| error())?;
        let evicted = self
            .dynamic_table
            .set_capacity(capacity)
            .map_err(|_| error())?;
        debug!(capacity, evicted = evicted.len(), "dynamic table capacity changed");
        Ok(())
    }

    fn on_error_detected(&mut self, code: ErrorCode, message: &str) {
        warn!(%code, message, "encoder stream error detected");
    }
}
