//! Encoder-side header table.
//!
//! Wraps the [`DynamicTable`] with reverse indexes for match decisions and
//! with eviction that never drops an entry at or above a caller-supplied
//! bound. The bound is the smallest blocking index computed by the
//! [`BlockingManager`](crate::blocking::BlockingManager): the smaller of the
//! Known Received Count and the smallest index still referenced by an
//! outstanding header block or encoder stream instruction.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::trace;

use crate::dynamic_table::{entry_size, DynamicTable, Entry};
use crate::error::{Error, Result};
use crate::static_table;

/// Result of looking up a field in the static and dynamic tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    None,
    /// Only the name matches.
    Name { is_static: bool, index: u64 },
    /// Both name and value match.
    Full { is_static: bool, index: u64 },
}

/// Dynamic table plus reverse indexes, owned by the encoder.
#[derive(Debug, Default)]
pub struct HeaderTable {
    table: DynamicTable,
    /// name -> value -> most recent absolute index
    exact: HashMap<Bytes, HashMap<Bytes, u64>>,
    /// name -> most recent absolute index
    names: HashMap<Bytes, u64>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the underlying dynamic table.
    pub fn dynamic_table(&self) -> &DynamicTable {
        &self.table
    }

    pub fn set_maximum_capacity(&mut self, maximum_capacity: usize) -> Result<()> {
        self.table.set_maximum_capacity(maximum_capacity)
    }

    pub fn maximum_capacity(&self) -> usize {
        self.table.maximum_capacity()
    }

    pub fn max_entries(&self) -> u64 {
        self.table.max_entries()
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn size(&self) -> usize {
        self.table.size()
    }

    pub fn inserted_count(&self) -> u64 {
        self.table.inserted_count()
    }

    pub fn dropped_count(&self) -> u64 {
        self.table.dropped_count()
    }

    pub fn entry(&self, index: u64) -> Option<&Entry> {
        self.table.entry(index)
    }

    /// Looks up a field.
    ///
    /// Order of preference: a dynamic full match accepted by `usable`, a
    /// static full match, a dynamic name match accepted by `usable`, a static
    /// name match. Only the most recent dynamic entry for a name or
    /// name/value pair is considered.
    pub fn find_match(&self, name: &[u8], value: &[u8], usable: impl Fn(u64) -> bool) -> Match {
        if let Some(index) = self.find_dynamic_exact(name, value).filter(|&i| usable(i)) {
            return Match::Full {
                is_static: false,
                index,
            };
        }
        if let Some(index) = static_table::find_exact(name, value) {
            return Match::Full {
                is_static: true,
                index,
            };
        }
        if let Some(index) = self.find_dynamic_name(name).filter(|&i| usable(i)) {
            return Match::Name {
                is_static: false,
                index,
            };
        }
        if let Some(index) = static_table::find_name(name) {
            return Match::Name {
                is_static: true,
                index,
            };
        }
        Match::None
    }

    /// Most recent dynamic entry with this name and value.
    pub fn find_dynamic_exact(&self, name: &[u8], value: &[u8]) -> Option<u64> {
        self.exact.get(name)?.get(value).copied()
    }

    /// Most recent dynamic entry with this name.
    pub fn find_dynamic_name(&self, name: &[u8]) -> Option<u64> {
        self.names.get(name).copied()
    }

    /// Absolute index below which entries lie in the oldest `fraction` of
    /// the capacity.
    ///
    /// Returns the dropped count if the free space alone already covers the
    /// fraction, and the inserted count if every entry is draining.
    pub fn draining_index(&self, fraction: f64) -> u64 {
        let capacity = self.table.capacity();
        let required_space = (fraction * capacity as f64) as usize;
        let mut space_above = capacity - self.table.size();

        if self.table.is_empty() || space_above >= required_space {
            return self.table.dropped_count();
        }

        for entry in self.table.iter() {
            space_above += entry.size();
            if space_above >= required_space {
                return entry.index() + 1;
            }
        }
        self.table.inserted_count()
    }

    /// Largest entry that can be inserted by evicting only entries below `index`.
    pub fn max_insert_size_without_evicting(&self, index: u64) -> usize {
        self.table.capacity() - self.table.size() + self.table.size_below(index)
    }

    /// Returns true if a `name`/`value` entry can be inserted while only
    /// evicting entries below `bound`.
    pub fn can_insert(&self, name: &[u8], value: &[u8], bound: u64) -> bool {
        entry_size(name, value) <= self.max_insert_size_without_evicting(bound)
    }

    /// Inserts an entry, first evicting as many entries below `bound` as needed.
    ///
    /// Fails without modifying the table if the entry cannot fit.
    pub fn insert_entry(&mut self, name: Bytes, value: Bytes, bound: u64) -> Result<u64> {
        let size = entry_size(&name, &value);
        let available = self.max_insert_size_without_evicting(bound);
        if size > available {
            return Err(Error::DynamicTable(format!(
                "entry of size {} does not fit, {} bytes available",
                size, available
            )));
        }

        while !self.table.fits(size) {
            if !self.evict_one(bound) {
                break;
            }
        }

        let index = self.table.insert_entry(name.clone(), value.clone())?;
        trace!(index, size, "inserted dynamic table entry");
        self.names.insert(name.clone(), index);
        self.exact.entry(name).or_default().insert(value, index);
        Ok(index)
    }

    /// Evicts the oldest entry if its absolute index is below `bound`.
    pub fn evict_one(&mut self, bound: u64) -> bool {
        match self.table.evict_one(|entry| entry.index() < bound) {
            Some(entry) => {
                self.forget(&entry);
                true
            }
            None => false,
        }
    }

    /// Changes the capacity, evicting only entries below `bound`.
    ///
    /// Fails without modifying the table if the new capacity exceeds the
    /// maximum, or if entries at or above `bound` would have to be evicted.
    pub fn set_capacity(&mut self, capacity: usize, bound: u64) -> Result<()> {
        if capacity > self.table.maximum_capacity() {
            return Err(Error::DynamicTable(format!(
                "capacity {} exceeds maximum {}",
                capacity,
                self.table.maximum_capacity()
            )));
        }

        let excess = self.table.size().saturating_sub(capacity);
        if excess > self.table.size_below(bound) {
            return Err(Error::DynamicTable(format!(
                "cannot reduce capacity to {}: referenced or unacknowledged entries",
                capacity
            )));
        }

        while self.table.size() > capacity {
            if !self.evict_one(bound) {
                break;
            }
        }
        self.table.set_capacity(capacity)?;
        Ok(())
    }

    fn forget(&mut self, entry: &Entry) {
        trace!(index = entry.index(), "evicted dynamic table entry");
        if self.names.get(entry.name()) == Some(&entry.index()) {
            self.names.remove(entry.name());
        }
        if let Some(values) = self.exact.get_mut(entry.name()) {
            if values.get(entry.value()) == Some(&entry.index()) {
                values.remove(entry.value());
            }
            if values.is_empty() {
                self.exact.remove(entry.name());
            }
        }
    }
}
