//! A free list of address extents.
//!
//! Extents are indexed twice: by base address, so that neighbours can be coalesced on insertion,
//! and by (size, base), so that a search for `n` bytes visits the smallest fitting extents
//! first and breaks ties by the lowest address.

use crate::util::Address;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ExtentFreeList {
    by_base: BTreeMap<Address, usize>,
    by_size: BTreeSet<(usize, Address)>,
    total: usize,
}

impl ExtentFreeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }

    /// Number of extents. Adjacent extents are always coalesced.
    pub fn len(&self) -> usize {
        self.by_base.len()
    }

    /// Total bytes of all extents.
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Extents in address order.
    pub fn iter(&self) -> impl Iterator<Item = Range<Address>> + '_ {
        self.by_base.iter().map(|(&base, &size)| base..base + size)
    }

    /// Extents of at least `size` bytes, smallest first, then lowest address first.
    pub fn fitting(&self, size: usize) -> impl Iterator<Item = Range<Address>> + '_ {
        self.by_size
            .range((size, Address::ZERO)..)
            .map(|&(size, base)| base..base + size)
    }

    /// The extent that contains `addr`, if any.
    pub fn extent_containing(&self, addr: Address) -> Option<Range<Address>> {
        self.by_base
            .range(..=addr)
            .next_back()
            .filter(|&(&base, &size)| addr < base + size)
            .map(|(&base, &size)| base..base + size)
    }

    /// Does any extent overlap `range`?
    pub fn overlaps(&self, range: &Range<Address>) -> bool {
        if let Some((&base, &size)) = self.by_base.range(..range.end).next_back() {
            Address::ranges_overlap(&(base..base + size), range)
        } else {
            false
        }
    }

    /// Add `[base, base + size)` to the list, merging it with adjacent extents.
    pub fn insert(&mut self, base: Address, size: usize) {
        debug_assert!(size > 0);
        debug_assert!(
            !self.overlaps(&(base..base + size)),
            "extent {}..{} overlaps a free extent",
            base,
            base + size
        );
        self.total += size;
        let mut start = base;
        let mut end = base + size;
        if let Some((&prev_base, &prev_size)) = self.by_base.range(..base).next_back() {
            if prev_base + prev_size == base {
                self.unlink(prev_base, prev_size);
                start = prev_base;
            }
        }
        if let Some(&next_size) = self.by_base.get(&end) {
            self.unlink(end, next_size);
            end = end + next_size;
        }
        self.link(start, end - start);
    }

    /// Remove `[base, base + size)` from the list. The range must lie within a single extent.
    /// Returns false, leaving the list unchanged, if it does not.
    pub fn take(&mut self, base: Address, size: usize) -> bool {
        let Some(extent) = self.extent_containing(base) else {
            return false;
        };
        if base + size > extent.end {
            return false;
        }
        self.unlink(extent.start, extent.end - extent.start);
        if extent.start < base {
            self.link(extent.start, base - extent.start);
        }
        if base + size < extent.end {
            self.link(base + size, extent.end - (base + size));
        }
        self.total -= size;
        true
    }

    /// Remove and return every extent.
    pub fn drain(&mut self) -> Vec<Range<Address>> {
        let extents = self.iter().collect();
        self.by_base.clear();
        self.by_size.clear();
        self.total = 0;
        extents
    }

    fn link(&mut self, base: Address, size: usize) {
        self.by_base.insert(base, size);
        self.by_size.insert((size, base));
    }

    fn unlink(&mut self, base: Address, size: usize) {
        self.by_base.remove(&base);
        self.by_size.remove(&(size, base));
    }
}
