//! Dynamic table implementation.
//!
//! The dynamic table is a FIFO of name/value entries. Entries are identified by
//! their absolute index, which starts at zero and grows by one on each
//! insertion; eviction only ever removes the oldest entry. Relative and
//! post-base indexing (RFC 9204 Section 3.2) are conversions performed by the
//! callers against a Base.
//!
//! The table is policy free: the encoder decides which entries may be evicted
//! (see [`HeaderTable`](crate::header_table::HeaderTable)), while the decoder
//! mirrors whatever the encoder stream tells it.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Per-entry overhead added to the name and value lengths (RFC 9204 Section 3.2.1).
pub const ENTRY_OVERHEAD: usize = 32;

/// Size of an entry for capacity accounting.
#[inline]
pub fn entry_size(name: &[u8], value: &[u8]) -> usize {
    name.len() + value.len() + ENTRY_OVERHEAD
}

/// Entry in the dynamic table.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    name: Bytes,
    value: Bytes,
    index: u64,
}

impl Entry {
    pub fn name(&self) -> &Bytes {
        &self.name
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Absolute index of this entry.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn size(&self) -> usize {
        entry_size(&self.name, &self.value)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("index", &self.index)
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("value", &String::from_utf8_lossy(&self.value))
            .finish()
    }
}

/// The dynamic table.
#[derive(Debug, Default)]
pub struct DynamicTable {
    entries: VecDeque<Entry>,
    dropped_count: u64,
    size: usize,
    capacity: usize,
    maximum_capacity: usize,
    maximum_capacity_set: bool,
}

impl DynamicTable {
    /// Creates an empty table with zero capacity and zero maximum capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum capacity negotiated through settings.
    ///
    /// May be called once; a later call with a different value fails.
    pub fn set_maximum_capacity(&mut self, maximum_capacity: usize) -> Result<()> {
        if self.maximum_capacity_set {
            if self.maximum_capacity == maximum_capacity {
                return Ok(());
            }
            return Err(Error::DynamicTable(format!(
                "maximum capacity already set to {}, cannot change to {}",
                self.maximum_capacity, maximum_capacity
            )));
        }
        self.maximum_capacity = maximum_capacity;
        self.maximum_capacity_set = true;
        Ok(())
    }

    pub fn maximum_capacity(&self) -> usize {
        self.maximum_capacity
    }

    /// `MaxEntries` used for Required Insert Count encoding.
    pub fn max_entries(&self) -> u64 {
        (self.maximum_capacity / ENTRY_OVERHEAD) as u64
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of the sizes of all entries.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total number of entries ever inserted.
    pub fn inserted_count(&self) -> u64 {
        self.dropped_count + self.entries.len() as u64
    }

    /// Number of entries evicted so far; also the absolute index of the oldest entry.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Returns the entry with the given absolute index if it is still present.
    pub fn entry(&self, index: u64) -> Option<&Entry> {
        let offset = index.checked_sub(self.dropped_count)?;
        self.entries.get(usize::try_from(offset).ok()?)
    }

    /// Returns the oldest entry.
    pub fn oldest(&self) -> Option<&Entry> {
        self.entries.front()
    }

    /// Returns true if an entry of `size` bytes fits without evicting anything.
    pub fn fits(&self, size: usize) -> bool {
        self.size + size <= self.capacity
    }

    /// Appends an entry and returns its absolute index.
    ///
    /// Fails if the entry does not fit in the remaining capacity; the caller
    /// is responsible for evicting first.
    pub fn insert_entry(&mut self, name: Bytes, value: Bytes) -> Result<u64> {
        let size = entry_size(&name, &value);
        if !self.fits(size) {
            return Err(Error::DynamicTable(format!(
                "entry of size {} does not fit: size {}, capacity {}",
                size, self.size, self.capacity
            )));
        }

        let index = self.inserted_count();
        self.entries.push_back(Entry { name, value, index });
        self.size += size;
        Ok(index)
    }

    /// Evicts as many of the oldest entries as needed, then inserts.
    ///
    /// Fails without modifying the table if the entry is larger than the capacity.
    pub fn insert_evicting(&mut self, name: Bytes, value: Bytes) -> Result<u64> {
        let size = entry_size(&name, &value);
        if size > self.capacity {
            return Err(Error::DynamicTable(format!(
                "entry of size {} exceeds capacity {}",
                size, self.capacity
            )));
        }
        self.evict_down_to(self.capacity - size);
        self.insert_entry(name, value)
    }

    /// Evicts the oldest entry if `can_evict` allows it.
    pub fn evict_one(&mut self, can_evict: impl FnOnce(&Entry) -> bool) -> Option<Entry> {
        if !can_evict(self.entries.front()?) {
            return None;
        }
        let entry = self.entries.pop_front()?;
        self.size -= entry.size();
        self.dropped_count += 1;
        Some(entry)
    }

    /// Evicts oldest entries until the table size is at most `target`.
    pub fn evict_down_to(&mut self, target: usize) -> Vec<Entry> {
        let mut evicted = Vec::new();
        while self.size > target {
            match self.evict_one(|_| true) {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    /// Total size of the entries whose absolute index is below `index`.
    pub fn size_below(&self, index: u64) -> usize {
        self.entries
            .iter()
            .take_while(|e| e.index < index)
            .map(Entry::size)
            .sum()
    }

    /// Sets the capacity, evicting oldest entries unconditionally to fit.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<Vec<Entry>> {
        if capacity > self.maximum_capacity {
            return Err(Error::DynamicTable(format!(
                "capacity {} exceeds maximum {}",
                capacity, self.maximum_capacity
            )));
        }
        self.capacity = capacity;
        Ok(self.evict_down_to(capacity))
    }
}
