//! RFC 9204 Compliance Tests
//!
//! Tests critical behavior specified in RFC 9204:
//! - Appendix B encoding examples, byte for byte
//! - Dynamic table management and eviction
//! - Encoder/decoder stream instructions and their error handling
//! - Blocked streams
//! - Required Insert Count calculation

use bytes::Bytes;
use qpack_codec::{
    Decoder, DecoderStreamDelegate, DecoderStreamReceiver, Encoder, EncoderStreamDelegate,
    EncoderStreamReceiver, Error, ErrorCode, HeaderBlockState, HeaderField, Result,
};

fn hex(s: &str) -> Vec<u8> {
    let s: String = s.split_whitespace().collect();
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

fn fields(list: &qpack_codec::HeaderList) -> Vec<(String, String)> {
    list.iter()
        .map(|f| {
            (
                String::from_utf8_lossy(&f.name).into_owned(),
                String::from_utf8_lossy(&f.value).into_owned(),
            )
        })
        .collect()
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_literal_field_line_with_name_reference() {
    // RFC 9204 B.1
    let mut decoder = Decoder::new(0, 0);
    let list = decoder
        .decode_field_section(0, &hex("0000 510b 2f69 6e64 6578 2e68 746d 6c"))
        .unwrap();
    assert_eq!(fields(&list), pairs(&[(":path", "/index.html")]));

    let mut encoder = Encoder::new(0, 0);
    encoder.set_huffman_encoding(false);
    let block = encoder.encode(0, &[(b":path".as_slice(), b"/index.html".as_slice())]).unwrap();
    assert_eq!(&block[..], &hex("0000 510b 2f69 6e64 6578 2e68 746d 6c")[..]);
}

#[test]
fn test_dynamic_table_examples() {
    let mut decoder = Decoder::new(220, 100);

    // RFC 9204 B.2: capacity and two insertions, post-base references.
    decoder
        .on_encoder_stream_data(&hex(
            "3fbd01 c00f 7777 772e 6578 616d 706c 652e 636f 6d c10c 2f73 616d 706c 652f 7061 7468",
        ))
        .unwrap();
    let list = decoder.decode_field_section(0, &hex("0381 10 11")).unwrap();
    assert_eq!(
        fields(&list),
        pairs(&[(":authority", "www.example.com"), (":path", "/sample/path")])
    );
    assert_eq!(&decoder.take_decoder_stream_data().unwrap()[..], &hex("80")[..]);

    // B.3: speculative insert, acknowledged with an Insert Count Increment.
    decoder
        .on_encoder_stream_data(&hex(
            "4a63 7573 746f 6d2d 6b65 790c 6375 7374 6f6d 2d76 616c 7565",
        ))
        .unwrap();
    assert_eq!(&decoder.take_decoder_stream_data().unwrap()[..], &hex("01")[..]);

    // B.4: duplicate, then a block on stream 8.
    decoder.on_encoder_stream_data(&hex("02")).unwrap();
    let list = decoder.decode_field_section(8, &hex("0500 80 c1 81")).unwrap();
    assert_eq!(
        fields(&list),
        pairs(&[
            (":authority", "www.example.com"),
            (":path", "/"),
            ("custom-key", "custom-value"),
        ])
    );
    assert_eq!(&decoder.take_decoder_stream_data().unwrap()[..], &hex("88")[..]);

    // B.5: insertion with a dynamic name reference evicts the oldest entry.
    decoder
        .on_encoder_stream_data(&hex("810d 6375 7374 6f6d 2d76 616c 7565 32"))
        .unwrap();
    let table = decoder.dynamic_table();
    assert_eq!(table.inserted_count(), 5);
    assert_eq!(table.dropped_count(), 1);
    assert_eq!(table.size(), 215);
    assert_eq!(&table.entry(4).unwrap().value()[..], b"custom-value2");

    decoder.cancel_stream(8);
    assert_eq!(&decoder.take_decoder_stream_data().unwrap()[..], &hex("48 01")[..]);
}

#[test]
fn test_encoder_reproduces_insertions() {
    let mut encoder = Encoder::new(220, 100);
    encoder.set_huffman_encoding(false);
    encoder.set_dynamic_table_capacity(220).unwrap();
    assert_eq!(
        &encoder.take_encoder_stream_data().unwrap()[..],
        &hex("3fbd01")[..]
    );

    let block = encoder
        .encode(
            0,
            &[
                (b":authority".as_slice(), b"www.example.com".as_slice()),
                (b":path".as_slice(), b"/sample/path".as_slice()),
            ],
        )
        .unwrap();
    // Base equals the Required Insert Count, so references are relative.
    assert_eq!(&block[..], &hex("0300 81 80")[..]);
    assert_eq!(
        &encoder.take_encoder_stream_data().unwrap()[..],
        &hex("c00f 7777 772e 6578 616d 706c 652e 636f 6d c10c 2f73 616d 706c 652f 7061 7468")[..]
    );

    let mut decoder = Decoder::new(220, 100);
    decoder.on_encoder_stream_data(&hex("3fbd01")).unwrap();
    decoder
        .on_encoder_stream_data(&hex(
            "c00f 7777 772e 6578 616d 706c 652e 636f 6d c10c 2f73 616d 706c 652f 7061 7468",
        ))
        .unwrap();
    let list = decoder.decode_field_section(0, &block).unwrap();
    assert_eq!(
        fields(&list),
        pairs(&[(":authority", "www.example.com"), (":path", "/sample/path")])
    );
}

#[test]
fn test_literal_only_encoding() {
    let mut encoder = Encoder::new(0, 0);
    encoder.set_huffman_encoding(false);
    let block = encoder.encode(0, &[(b"foo".as_slice(), b"bar".as_slice())]).unwrap();
    assert_eq!(&block[..], &hex("0000 23666f6f 03626172")[..]);
    assert!(encoder.take_encoder_stream_data().is_none());
}

#[test]
fn test_second_encoding_reuses_dynamic_name() {
    let mut encoder = Encoder::new(4096, 100);
    encoder.set_huffman_encoding(false);
    encoder.set_dynamic_table_capacity(4096).unwrap();
    encoder.take_encoder_stream_data();

    encoder.encode(0, &[(b"foo".as_slice(), b"bar".as_slice())]).unwrap();
    let first = encoder.take_encoder_stream_data().unwrap();
    assert_eq!(&first[..], &hex("43 666f6f 03 626172")[..]);

    encoder.encode(0, &[(b"foo".as_slice(), b"baz".as_slice())]).unwrap();
    let second = encoder.take_encoder_stream_data().unwrap();
    // Insert With Name Reference to dynamic relative index 0, no literal name.
    assert_eq!(&second[..], &hex("80 03 62617a")[..]);
}

#[test]
fn test_blocked_block_completes_without_redelivery() {
    let mut encoder = Encoder::new(4096, 100);
    let mut decoder = Decoder::new(4096, 100);
    encoder.set_dynamic_table_capacity(4096).unwrap();

    let block = encoder.encode(0, &[(b"x-custom".as_slice(), b"value".as_slice())]).unwrap();
    let instructions = encoder.take_encoder_stream_data().unwrap();

    // The header block overtakes the encoder stream.
    assert_eq!(decoder.decode_field_section(0, &block), Err(Error::Blocked(0)));
    assert_eq!(
        decoder.header_block_state(0),
        Some(HeaderBlockState::AwaitingEntries)
    );

    decoder.on_encoder_stream_data(&instructions).unwrap();
    let (stream_id, result) = decoder.poll_decoded().unwrap();
    assert_eq!(stream_id, 0);
    assert_eq!(
        result.unwrap().fields(),
        &[HeaderField::new("x-custom", "value")]
    );

    encoder
        .on_decoder_stream_data(&decoder.take_decoder_stream_data().unwrap())
        .unwrap();
    assert_eq!(encoder.blocking_manager().known_received_count(), 1);
}

#[test]
fn test_second_section_rejected_while_first_is_blocked() {
    let mut encoder = Encoder::new(4096, 100);
    let mut decoder = Decoder::new(4096, 100);
    encoder.set_dynamic_table_capacity(4096).unwrap();

    let block = encoder.encode(0, &[(b"x-a".as_slice(), b"1".as_slice())]).unwrap();
    let instructions = encoder.take_encoder_stream_data().unwrap();
    assert_eq!(decoder.decode_field_section(0, &block), Err(Error::Blocked(0)));

    // :method GET from the static table, sent before the first one resolved.
    let err = decoder.decode_field_section(0, &[0x00, 0x00, 0xd1]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::DecodingError));
    assert_eq!(err.message(), Some("Header block already in progress."));
    assert_eq!(
        decoder.header_block_state(0),
        Some(HeaderBlockState::AwaitingEntries)
    );

    // The blocked section is left intact.
    decoder.on_encoder_stream_data(&instructions).unwrap();
    let (stream_id, result) = decoder.poll_decoded().unwrap();
    assert_eq!(stream_id, 0);
    let list = result.unwrap();
    assert_eq!(list.fields(), &[HeaderField::new("x-a", "1")]);
    assert!(decoder.poll_decoded().is_none());

    // Once it resolved the stream accepts the next section.
    let list = decoder.decode_field_section(0, &[0x00, 0x00, 0xd1]).unwrap();
    assert_eq!(list.fields(), &[HeaderField::new(":method", "GET")]);
}

#[derive(Default)]
struct RecordingDelegate {
    errors: Vec<(ErrorCode, String)>,
    increments: Vec<u64>,
    inserts: Vec<(Bytes, Bytes)>,
}

impl DecoderStreamDelegate for RecordingDelegate {
    fn on_insert_count_increment(&mut self, increment: u64) -> Result<()> {
        if increment == 0 {
            return Err(Error::DecoderStream {
                code: ErrorCode::InvalidZeroIncrement,
                message: "Invalid increment value 0.".into(),
            });
        }
        self.increments.push(increment);
        Ok(())
    }

    fn on_header_acknowledgement(&mut self, _stream_id: u64) -> Result<()> {
        Ok(())
    }

    fn on_stream_cancellation(&mut self, _stream_id: u64) -> Result<()> {
        Ok(())
    }

    fn on_error_detected(&mut self, code: ErrorCode, message: &str) {
        self.errors.push((code, message.to_string()));
    }
}

impl EncoderStreamDelegate for RecordingDelegate {
    fn on_insert_with_name_reference(
        &mut self,
        _is_static: bool,
        _name_index: u64,
        value: Bytes,
    ) -> Result<()> {
        self.inserts.push((Bytes::new(), value));
        Ok(())
    }

    fn on_insert_without_name_reference(&mut self, name: Bytes, value: Bytes) -> Result<()> {
        self.inserts.push((name, value));
        Ok(())
    }

    fn on_duplicate(&mut self, _index: u64) -> Result<()> {
        Ok(())
    }

    fn on_set_dynamic_table_capacity(&mut self, _capacity: u64) -> Result<()> {
        Ok(())
    }

    fn on_error_detected(&mut self, code: ErrorCode, message: &str) {
        self.errors.push((code, message.to_string()));
    }
}

#[test]
fn test_zero_increment_reported_once_without_mutation() {
    let mut encoder = Encoder::new(4096, 100);
    encoder.set_dynamic_table_capacity(4096).unwrap();
    let err = encoder.on_decoder_stream_data(&[0x00]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::InvalidZeroIncrement));
    assert_eq!(err.message(), Some("Invalid increment value 0."));
    assert_eq!(encoder.blocking_manager().known_received_count(), 0);

    let mut receiver = DecoderStreamReceiver::new();
    let mut delegate = RecordingDelegate::default();
    assert!(receiver.decode(&[0x00, 0x01], &mut delegate).is_err());
    assert!(receiver.decode(&[0x01], &mut delegate).is_err());
    assert_eq!(
        delegate.errors,
        vec![(ErrorCode::InvalidZeroIncrement, "Invalid increment value 0.".to_string())]
    );
    assert!(delegate.increments.is_empty());
}

#[test]
fn test_increment_overflow_is_an_error() {
    let mut encoder = Encoder::new(4096, 100);
    encoder.set_dynamic_table_capacity(4096).unwrap();
    encoder.encode(0, &[(b"foo".as_slice(), b"bar".as_slice())]).unwrap();
    encoder.on_decoder_stream_data(&[0x01]).unwrap();

    // Insert Count Increment of u64::MAX: 6-bit prefix, then 10 continuation bytes.
    let mut data = vec![0x3f];
    data.extend_from_slice(&[0xc0, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
    let err = encoder.on_decoder_stream_data(&data).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::IncrementOverflow));
    assert_eq!(encoder.blocking_manager().known_received_count(), 1);
}

#[test]
fn test_encoder_stream_decoding_errors() {
    // Integer with too many continuation bytes.
    let mut receiver = EncoderStreamReceiver::default();
    let mut delegate = RecordingDelegate::default();
    let mut data = vec![0x3f];
    data.extend_from_slice(&[0xff; 11]);
    data.push(0x01);
    let err = receiver.decode(&data, &mut delegate).unwrap_err();
    assert_eq!(err.error_code(), 0x201);
    assert_eq!(
        delegate.errors,
        vec![(ErrorCode::IntegerTooLarge, "Encoded integer too large.".to_string())]
    );

    // Literal longer than the receiver accepts.
    let mut receiver = EncoderStreamReceiver::new(4);
    let mut delegate = RecordingDelegate::default();
    receiver.decode(b"\x44abcd\x01x", &mut delegate).unwrap();
    assert_eq!(delegate.inserts.len(), 1);
    assert!(receiver.decode(b"\x45abcde\x01x", &mut delegate).is_err());
    assert_eq!(
        delegate.errors,
        vec![(ErrorCode::StringLiteralTooLong, "String literal too long.".to_string())]
    );

    // Eight bits of Huffman padding.
    let mut receiver = EncoderStreamReceiver::default();
    let mut delegate = RecordingDelegate::default();
    assert!(receiver.decode(&[0x61, 0xff, 0x00], &mut delegate).is_err());
    assert_eq!(
        delegate.errors,
        vec![(ErrorCode::HuffmanDecodingError, "Error in Huffman-encoded string.".to_string())]
    );
}

#[test]
fn test_cancelled_entry_is_not_evicted_before_acknowledgement() {
    // Capacity fits exactly one `foo: bar` entry (3 + 3 + 32 bytes).
    let mut encoder = Encoder::new(38, 100);
    encoder.set_dynamic_table_capacity(38).unwrap();
    encoder.encode(0, &[(b"foo".as_slice(), b"bar".as_slice())]).unwrap();
    assert_eq!(encoder.blocking_manager().reference_count(0), 1);

    // Stream Cancellation for stream 0.
    encoder.on_decoder_stream_data(&[0x40]).unwrap();
    assert_eq!(encoder.blocking_manager().reference_count(0), 0);

    assert!(!encoder.evict_one());
    assert_eq!(encoder.header_table().dynamic_table().len(), 1);

    // A new entry cannot displace it either.
    let block = encoder.encode(4, &[(b"abc".as_slice(), b"def".as_slice())]).unwrap();
    assert_eq!(block[0], 0x00);
    assert_eq!(encoder.header_table().inserted_count(), 1);
}

#[test]
fn test_required_insert_count_wraps() {
    // MaxEntries = 64 / 32 = 2, so the Required Insert Count wraps at 4.
    let mut encoder = Encoder::new(64, 100);
    let mut decoder = Decoder::new(64, 100);
    encoder.set_dynamic_table_capacity(64).unwrap();

    for i in 0..10u64 {
        // Distinct names, so each insertion evicts its acknowledged predecessor.
        let name = format!("k{}", i);
        let block = encoder
            .encode(i * 4, &[(name.as_bytes(), b"v".as_slice())])
            .unwrap();
        decoder
            .on_encoder_stream_data(&encoder.take_encoder_stream_data().unwrap())
            .unwrap();
        let list = decoder.decode_field_section(i * 4, &block).unwrap();
        assert_eq!(list.get(name.as_bytes()).map(|v| &v[..]), Some(b"v".as_slice()));
        encoder
            .on_decoder_stream_data(&decoder.take_decoder_stream_data().unwrap())
            .unwrap();
    }
    assert_eq!(decoder.dynamic_table().inserted_count(), 10);
}
