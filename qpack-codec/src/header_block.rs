//! Header block prefix (RFC 9204 Section 4.5.1).
//!
//! ```text
//!   0   1   2   3   4   5   6   7
//! +---+---+---+---+---+---+---+---+
//! |   Required Insert Count (8+)  |
//! +---+---------------------------+
//! | S |      Delta Base (7+)      |
//! +---+---------------------------+
//! ```
//!
//! The Required Insert Count is sent modulo `2 * MaxEntries` so that it
//! needs few bytes; the decoder reconstructs it from its own insert count.

use bytes::BytesMut;

use crate::wire::integer;

/// Wraps a Required Insert Count for transmission.
pub fn encode_required_insert_count(required_insert_count: u64, max_entries: u64) -> u64 {
    if required_insert_count == 0 {
        return 0;
    }
    required_insert_count % (2 * max_entries) + 1
}

/// Reconstructs a Required Insert Count from its wire form.
///
/// Returns `None` if no valid Required Insert Count maps to `encoded` given
/// the decoder's `total_inserts`.
pub fn decode_required_insert_count(
    encoded: u64,
    max_entries: u64,
    total_inserts: u64,
) -> Option<u64> {
    if encoded == 0 {
        return Some(0);
    }
    if max_entries == 0 {
        return None;
    }

    let full_range = max_entries.checked_mul(2)?;
    if encoded > full_range {
        return None;
    }

    let max_value = total_inserts.checked_add(max_entries)?;
    let max_wrapped = (max_value / full_range) * full_range;
    let mut required_insert_count = max_wrapped + encoded - 1;

    if required_insert_count > max_value {
        if required_insert_count <= full_range {
            return None;
        }
        required_insert_count -= full_range;
    }

    // Zero is always encoded as zero.
    if required_insert_count == 0 {
        return None;
    }
    Some(required_insert_count)
}

/// Reconstructs Base from the sign bit and Delta Base.
pub fn decode_base(required_insert_count: u64, sign: bool, delta_base: u64) -> Option<u64> {
    if sign {
        required_insert_count.checked_sub(delta_base)?.checked_sub(1)
    } else {
        required_insert_count.checked_add(delta_base)
    }
}

/// Writes the header block prefix.
pub fn encode_prefix(
    required_insert_count: u64,
    base: u64,
    max_entries: u64,
    buf: &mut BytesMut,
) -> usize {
    let encoded = encode_required_insert_count(required_insert_count, max_entries);
    let mut written = integer::encode(encoded, 8, 0x00, buf);
    written += if base >= required_insert_count {
        integer::encode(base - required_insert_count, 7, 0x00, buf)
    } else {
        integer::encode(required_insert_count - base - 1, 7, 0x80, buf)
    };
    written
}
