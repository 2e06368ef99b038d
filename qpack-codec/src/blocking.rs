//! Encoder-side bookkeeping of outstanding references.
//!
//! The encoder may only evict a dynamic table entry once the decoder can no
//! longer need it. That holds when the entry is below the Known Received
//! Count and no unacknowledged header block or encoder stream instruction
//! refers to it. The [`BlockingManager`] tracks both, and also decides
//! whether a header block may reference entries the decoder has not
//! acknowledged yet without exceeding the peer's blocked stream limit.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tracing::trace;

/// Set of absolute indices referenced by one header block.
pub type IndexSet = BTreeSet<u64>;

/// Required Insert Count of a header block referencing `indices`.
pub fn required_insert_count(indices: &IndexSet) -> u64 {
    indices.last().map_or(0, |max| max + 1)
}

#[derive(Debug)]
struct HeaderBlock {
    indices: IndexSet,
    required_insert_count: u64,
}

#[derive(Debug, Default)]
pub struct BlockingManager {
    /// Unacknowledged header blocks per stream, oldest first.
    header_blocks: HashMap<u64, VecDeque<HeaderBlock>>,
    /// Absolute index -> number of outstanding references.
    reference_counts: BTreeMap<u64, u64>,
    /// Inserted entry index -> entry it was inserted with a reference to.
    encoder_stream_references: BTreeMap<u64, u64>,
    known_received_count: u64,
}

impl BlockingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known_received_count(&self) -> u64 {
        self.known_received_count
    }

    /// Records a header block sent on `stream_id` referencing `indices`.
    pub fn on_header_block_sent(
        &mut self,
        stream_id: u64,
        indices: IndexSet,
        required_insert_count: u64,
    ) {
        debug_assert!(!indices.is_empty());
        self.increase_reference_counts(&indices);
        self.header_blocks
            .entry(stream_id)
            .or_default()
            .push_back(HeaderBlock {
                indices,
                required_insert_count,
            });
    }

    /// Processes a Header Acknowledgement for the oldest block on `stream_id`.
    ///
    /// Returns false if the stream has no outstanding header blocks.
    pub fn on_header_acknowledgement(&mut self, stream_id: u64) -> bool {
        let Some(blocks) = self.header_blocks.get_mut(&stream_id) else {
            return false;
        };
        let Some(block) = blocks.pop_front() else {
            return false;
        };
        if blocks.is_empty() {
            self.header_blocks.remove(&stream_id);
        }

        self.decrease_reference_counts(&block.indices);
        if block.required_insert_count > self.known_received_count {
            self.on_known_received_count_increased(block.required_insert_count);
        }
        true
    }

    /// Releases every reference held by unacknowledged blocks on `stream_id`.
    pub fn on_stream_cancellation(&mut self, stream_id: u64) {
        let Some(blocks) = self.header_blocks.remove(&stream_id) else {
            return;
        };
        trace!(stream_id, blocks = blocks.len(), "released references of cancelled stream");
        for block in blocks {
            self.decrease_reference_counts(&block.indices);
        }
    }

    /// Raises the Known Received Count by `increment`.
    ///
    /// Returns false without changing state if the count would overflow.
    pub fn on_insert_count_increment(&mut self, increment: u64) -> bool {
        match self.known_received_count.checked_add(increment) {
            Some(count) => {
                self.on_known_received_count_increased(count);
                true
            }
            None => false,
        }
    }

    /// Records that the instruction inserting entry `inserted_index` refers
    /// to entry `referred_index`; the reference is held until the insertion
    /// is acknowledged.
    pub fn on_reference_sent_on_encoder_stream(
        &mut self,
        inserted_index: u64,
        referred_index: u64,
    ) {
        self.encoder_stream_references.insert(inserted_index, referred_index);
        *self.reference_counts.entry(referred_index).or_insert(0) += 1;
    }

    /// Returns true if a header block on `stream_id` may reference
    /// unacknowledged entries without exceeding `maximum_blocked_streams`.
    pub fn blocking_allowed_on_stream(&self, stream_id: u64, maximum_blocked_streams: u64) -> bool {
        if self.stream_is_blocked(stream_id) {
            return true;
        }
        self.blocked_stream_count() < maximum_blocked_streams
    }

    /// Returns true if `stream_id` has a header block the decoder may be
    /// blocked on.
    pub fn stream_is_blocked(&self, stream_id: u64) -> bool {
        self.header_blocks.get(&stream_id).is_some_and(|blocks| {
            blocks
                .iter()
                .any(|block| block.required_insert_count > self.known_received_count)
        })
    }

    /// Number of streams that may currently be blocked at the decoder.
    pub fn blocked_stream_count(&self) -> u64 {
        self.header_blocks
            .keys()
            .filter(|&&stream_id| self.stream_is_blocked(stream_id))
            .count() as u64
    }

    /// Smaller of the Known Received Count and the smallest referenced index.
    ///
    /// Entries below this index may be evicted.
    pub fn smallest_blocking_index(&self) -> u64 {
        match self.reference_counts.keys().next() {
            Some(&index) => index.min(self.known_received_count),
            None => self.known_received_count,
        }
    }

    /// Number of outstanding references to `index`.
    pub fn reference_count(&self, index: u64) -> u64 {
        self.reference_counts.get(&index).copied().unwrap_or(0)
    }

    /// Number of unacknowledged header blocks on `stream_id`.
    pub fn outstanding_header_blocks(&self, stream_id: u64) -> usize {
        self.header_blocks.get(&stream_id).map_or(0, VecDeque::len)
    }

    fn on_known_received_count_increased(&mut self, known_received_count: u64) {
        self.known_received_count = known_received_count;

        let still_pending = self.encoder_stream_references.split_off(&known_received_count);
        let released = std::mem::replace(&mut self.encoder_stream_references, still_pending);
        for referred_index in released.into_values() {
            self.decrease_reference_count(referred_index);
        }
    }

    fn increase_reference_counts(&mut self, indices: &IndexSet) {
        for &index in indices {
            *self.reference_counts.entry(index).or_insert(0) += 1;
        }
    }

    fn decrease_reference_counts(&mut self, indices: &IndexSet) {
        for &index in indices {
            self.decrease_reference_count(index);
        }
    }

    fn decrease_reference_count(&mut self, index: u64) {
        if let Some(count) = self.reference_counts.get_mut(&index) {
            *count -= 1;
            if *count == 0 {
                self.reference_counts.remove(&index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(indices: &[u64]) -> IndexSet {
        indices.iter().copied().collect()
    }

    #[test]
    fn test_required_insert_count() {
        assert_eq!(required_insert_count(&set(&[])), 0);
        assert_eq!(required_insert_count(&set(&[0])), 1);
        assert_eq!(required_insert_count(&set(&[1, 4, 2])), 5);
    }

    #[test]
    fn test_acknowledgement_releases_references() {
        let mut manager = BlockingManager::new();
        manager.on_header_block_sent(0, set(&[0, 1]), 2);
        manager.on_header_block_sent(0, set(&[1]), 2);
        assert_eq!(manager.reference_count(1), 2);
        assert_eq!(manager.smallest_blocking_index(), 0);

        assert!(manager.on_header_acknowledgement(0));
        assert_eq!(manager.known_received_count(), 2);
        assert_eq!(manager.reference_count(0), 0);
        assert_eq!(manager.reference_count(1), 1);
        assert_eq!(manager.smallest_blocking_index(), 1);

        assert!(manager.on_header_acknowledgement(0));
        assert_eq!(manager.smallest_blocking_index(), 2);
        assert!(!manager.on_header_acknowledgement(0));
    }

    #[test]
    fn test_cancellation_keeps_known_received_count() {
        let mut manager = BlockingManager::new();
        manager.on_header_block_sent(4, set(&[0]), 1);
        manager.on_stream_cancellation(4);
        assert_eq!(manager.reference_count(0), 0);
        // Unacknowledged entries stay non-evictable.
        assert_eq!(manager.smallest_blocking_index(), 0);
        assert!(!manager.on_header_acknowledgement(4));
    }

    #[test]
    fn test_insert_count_increment() {
        let mut manager = BlockingManager::new();
        assert!(manager.on_insert_count_increment(3));
        assert_eq!(manager.known_received_count(), 3);
        assert!(!manager.on_insert_count_increment(u64::MAX));
        assert_eq!(manager.known_received_count(), 3);
    }

    #[test]
    fn test_encoder_stream_reference_held_until_acknowledged() {
        let mut manager = BlockingManager::new();
        manager.on_insert_count_increment(1);
        // Entry 1 is a duplicate of entry 0.
        manager.on_reference_sent_on_encoder_stream(1, 0);
        assert_eq!(manager.smallest_blocking_index(), 0);

        manager.on_insert_count_increment(1);
        assert_eq!(manager.reference_count(0), 0);
        assert_eq!(manager.smallest_blocking_index(), 2);
    }

    #[test]
    fn test_blocked_streams() {
        let mut manager = BlockingManager::new();
        manager.on_header_block_sent(0, set(&[0]), 1);
        manager.on_header_block_sent(4, set(&[1]), 2);
        assert_eq!(manager.blocked_stream_count(), 2);
        assert!(manager.stream_is_blocked(0));

        assert!(manager.blocking_allowed_on_stream(0, 2));
        assert!(!manager.blocking_allowed_on_stream(8, 2));
        assert!(manager.blocking_allowed_on_stream(8, 3));

        manager.on_insert_count_increment(1);
        assert!(!manager.stream_is_blocked(0));
        assert_eq!(manager.blocked_stream_count(), 1);
        assert!(manager.blocking_allowed_on_stream(8, 2));
        assert!(!manager.blocking_allowed_on_stream(8, 0));
    }
}
