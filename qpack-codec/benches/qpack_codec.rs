//! Benchmarks for QPACK encoding and decoding.
//!
//! These benchmarks measure the hot path performance of:
//! - Huffman encoding and decoding of typical header values
//! - Encoding a request header list with a warm dynamic table
//! - Decoding the resulting header block
//!
//! Run with: cargo bench -p qpack-codec --bench qpack_codec

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use qpack_codec::wire::huffman;
use qpack_codec::{Decoder, Encoder, HeaderField};

fn request_headers() -> Vec<HeaderField> {
    vec![
        HeaderField::new(":method", "GET"),
        HeaderField::new(":scheme", "https"),
        HeaderField::new(":authority", "www.example.com"),
        HeaderField::new(":path", "/api/v1/items?page=2"),
        HeaderField::new("user-agent", "Mozilla/5.0 (X11; Linux x86_64)"),
        HeaderField::new("accept", "*/*"),
        HeaderField::new("accept-encoding", "gzip, deflate, br"),
        HeaderField::new("cookie", "session=a1b2c3d4; theme=dark; lang=en"),
        HeaderField::new("x-request-id", "7f3a9c2e-1b4d-4e8f-9a6b-2c5d8e1f0a3b"),
    ]
}

/// Builds an encoder/decoder pair that already shares the request's entries.
fn warm_pair() -> (Encoder, Decoder) {
    let mut encoder = Encoder::new(4096, 100);
    let mut decoder = Decoder::new(4096, 100);
    encoder.set_dynamic_table_capacity(4096).unwrap();

    let block = encoder.encode_field_section(0, &request_headers()).unwrap().0;
    let instructions = encoder.take_encoder_stream_data().unwrap();
    decoder.on_encoder_stream_data(&instructions).unwrap();
    decoder.decode_field_section(0, &block).unwrap();
    let acks = decoder.take_decoder_stream_data().unwrap();
    encoder.on_decoder_stream_data(&acks).unwrap();
    (encoder, decoder)
}

/// Benchmark Huffman coding of header values
fn bench_huffman(c: &mut Criterion) {
    let mut group = c.benchmark_group("huffman");

    for value in ["www.example.com", "Mozilla/5.0 (X11; Linux x86_64)"] {
        let mut encoded = BytesMut::new();
        huffman::encode(value.as_bytes(), &mut encoded);

        group.throughput(Throughput::Bytes(value.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", value.len()), value, |b, value| {
            let mut buf = BytesMut::with_capacity(64);
            b.iter(|| {
                buf.clear();
                huffman::encode(black_box(value.as_bytes()), &mut buf);
            })
        });
        group.bench_with_input(BenchmarkId::new("decode", value.len()), &encoded, |b, encoded| {
            let mut out = Vec::with_capacity(64);
            b.iter(|| {
                out.clear();
                huffman::decode(black_box(encoded), &mut out).unwrap();
            })
        });
    }

    group.finish();
}

/// Benchmark encoding against a warm, fully acknowledged dynamic table
fn bench_encode_warm(c: &mut Criterion) {
    let (mut encoder, _) = warm_pair();
    let headers = request_headers();
    let mut stream_id = 4;

    c.bench_function("encode_request_warm", |b| {
        b.iter(|| {
            let block = encoder.encode_field_section(stream_id, black_box(&headers)).unwrap();
            stream_id += 4;
            black_box(block)
        })
    });
}

/// Benchmark static-only encoding (no dynamic table)
fn bench_encode_static(c: &mut Criterion) {
    let mut encoder = Encoder::new(0, 0);
    let headers = request_headers();

    c.bench_function("encode_request_static", |b| {
        b.iter(|| black_box(encoder.encode_field_section(0, black_box(&headers)).unwrap()))
    });
}

/// Benchmark decoding a header block that references the dynamic table
fn bench_decode_warm(c: &mut Criterion) {
    let (mut encoder, mut decoder) = warm_pair();
    let (block, _) = encoder.encode_field_section(4, &request_headers()).unwrap();
    let mut stream_id = 4;

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(block.len() as u64));
    group.bench_function("request_warm", |b| {
        b.iter(|| {
            let list = decoder.decode_field_section(stream_id, black_box(&block)).unwrap();
            stream_id += 4;
            black_box(list)
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_huffman,
    bench_encode_warm,
    bench_encode_static,
    bench_decode_warm
);
criterion_main!(benches);
