//! QPACK configuration and tunable parameters.
//!
//! The two settings exchanged with the peer (RFC 9204 Section 5) plus local
//! policies for the encoder and resource limits for the decoder.
//!
//! # Example
//!
//! ```toml
//! maximum_dynamic_table_capacity = 4096
//! maximum_blocked_streams = 100
//! huffman_encoding = true
//! cookie_crumbling = true
//! ```

use serde::{Deserialize, Serialize};

use crate::wire::literal::DEFAULT_MAX_STRING_LITERAL_LENGTH;

/// Configuration for a QPACK encoder/decoder pair.
///
/// Default values match common HTTP/3 deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QpackConfig {
    /// Maximum dynamic table capacity (default: 4 KB).
    ///
    /// Sent as SETTINGS_QPACK_MAX_TABLE_CAPACITY. Bounds the peer's encoder;
    /// zero disables the dynamic table.
    pub maximum_dynamic_table_capacity: u64,

    /// Maximum number of blocked streams (default: 100).
    ///
    /// Sent as SETTINGS_QPACK_BLOCKED_STREAMS.
    pub maximum_blocked_streams: u64,

    /// Huffman-encode string literals when shorter (default: true).
    pub huffman_encoding: bool,

    /// Split `cookie` values into crumbs before encoding (default: true).
    pub cookie_crumbling: bool,

    /// Oldest fraction of the dynamic table capacity the encoder avoids
    /// referencing (default: 0.25). Value is 0.0-1.0.
    pub draining_fraction: f64,

    /// Encoder stream bytes that may be outstanding before the encoder
    /// stops emitting new insertions (default: 64 KB).
    pub encoder_stream_buffer_limit: usize,

    /// Longest string literal accepted by the decoder (default: 1 MB).
    pub max_string_literal_length: usize,

    /// Largest decoded header list, as sum of name + value + 32 per field
    /// (default: 64 KB).
    pub max_header_list_size: usize,
}

impl Default for QpackConfig {
    fn default() -> Self {
        Self {
            maximum_dynamic_table_capacity: 4096, // 4 KB
            maximum_blocked_streams: 100,
            huffman_encoding: true,
            cookie_crumbling: true,
            draining_fraction: 0.25,
            encoder_stream_buffer_limit: 64 * 1024, // 64 KB
            max_string_literal_length: DEFAULT_MAX_STRING_LITERAL_LENGTH,
            max_header_list_size: 64 * 1024, // 64 KB
        }
    }
}

impl QpackConfig {
    /// Configuration favoring compression ratio over memory.
    pub fn high_throughput() -> Self {
        Self {
            maximum_dynamic_table_capacity: 16384, // 16 KB
            maximum_blocked_streams: 500,
            encoder_stream_buffer_limit: 256 * 1024, // 256 KB
            max_header_list_size: 256 * 1024,        // 256 KB
            ..Default::default()
        }
    }

    /// Configuration for memory-constrained environments.
    pub fn low_memory() -> Self {
        Self {
            maximum_dynamic_table_capacity: 512,
            maximum_blocked_streams: 10,
            encoder_stream_buffer_limit: 8 * 1024, // 8 KB
            max_string_literal_length: 64 * 1024,  // 64 KB
            max_header_list_size: 8 * 1024,        // 8 KB
            ..Default::default()
        }
    }

    /// Configuration that never uses the dynamic table.
    pub fn static_only() -> Self {
        Self {
            maximum_dynamic_table_capacity: 0,
            maximum_blocked_streams: 0,
            ..Default::default()
        }
    }

    /// Validate configuration values are within reasonable bounds.
    ///
    /// Returns every problem found rather than the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.maximum_dynamic_table_capacity > (1 << 30) {
            errors.push(format!(
                "maximum_dynamic_table_capacity ({}) too large (max 1 GB)",
                self.maximum_dynamic_table_capacity
            ));
        }
        if !(0.0..=1.0).contains(&self.draining_fraction) {
            errors.push(format!(
                "draining_fraction ({}) must be between 0.0 and 1.0",
                self.draining_fraction
            ));
        }
        if self.encoder_stream_buffer_limit == 0 {
            errors.push("encoder_stream_buffer_limit must be non-zero".into());
        }
        if self.max_string_literal_length == 0 {
            errors.push("max_string_literal_length must be non-zero".into());
        }
        if self.max_header_list_size == 0 {
            errors.push("max_header_list_size must be non-zero".into());
        }
        if self.maximum_dynamic_table_capacity == 0 && self.maximum_blocked_streams > 0 {
            tracing::warn!(
                "maximum_blocked_streams ({}) has no effect without a dynamic table",
                self.maximum_blocked_streams
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
