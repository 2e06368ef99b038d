//! Transport seam for the encoder and decoder streams.
//!
//! The codec never owns a socket or QUIC stream. Instructions are handed to
//! a [`StreamWriter`], which also reports how many bytes the transport still
//! holds so the encoder can apply backpressure before it emits more
//! table-mutating instructions.

use bytes::BytesMut;

/// Byte-oriented, ordered write side of a unidirectional stream.
pub trait StreamWriter {
    /// Appends `data` to the stream.
    fn write_stream_data(&mut self, data: &[u8]);

    /// Number of bytes written but not yet sent by the transport.
    fn num_bytes_buffered(&self) -> usize;
}

/// In-memory stream; the owner drains it with `split()`.
impl StreamWriter for BytesMut {
    fn write_stream_data(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }

    fn num_bytes_buffered(&self) -> usize {
        self.len()
    }
}

impl<W: StreamWriter + ?Sized> StreamWriter for &mut W {
    fn write_stream_data(&mut self, data: &[u8]) {
        (**self).write_stream_data(data);
    }

    fn num_bytes_buffered(&self) -> usize {
        (**self).num_bytes_buffered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_mut_writer() {
        let mut buf = BytesMut::new();
        buf.write_stream_data(b"abc");
        buf.write_stream_data(b"de");
        assert_eq!(buf.num_bytes_buffered(), 5);
        assert_eq!(&buf.split()[..], b"abcde");
        assert_eq!(buf.num_bytes_buffered(), 0);
    }
}
