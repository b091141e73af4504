//! Zone sets classify memory by address stripe.
//!
//! The address space is divided into stripes of `1 << zone_shift` bytes. Stripe `n` belongs to
//! zone `n mod W`, where `W` is the number of bits in a word. A [`ZoneSet`] is a word-sized
//! bitmask of zones. It can answer "could this segment refer into that one?" with a single AND,
//! at the cost of false positives between addresses that share a zone.

use crate::util::constants::{BITS_IN_WORD, LOG_BITS_IN_WORD};
use crate::util::Address;
use bytemuck::NoUninit;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// A set of zones. This is an immutable value type.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, NoUninit)]
pub struct ZoneSet(usize);

impl ZoneSet {
    /// The set that matches no address.
    pub const EMPTY: ZoneSet = ZoneSet(0);
    /// The set that matches every address.
    pub const UNIV: ZoneSet = ZoneSet(usize::MAX);

    pub const fn from_bits(bits: usize) -> ZoneSet {
        ZoneSet(bits)
    }

    pub const fn bits(self) -> usize {
        self.0
    }

    /// The zone of an address.
    pub const fn zone_of(addr: Address, zone_shift: usize) -> usize {
        (addr.as_usize() >> zone_shift) & (BITS_IN_WORD - 1)
    }

    /// The set with only zone `zone`.
    pub const fn single(zone: usize) -> ZoneSet {
        debug_assert!(zone < BITS_IN_WORD);
        ZoneSet(1 << zone)
    }

    /// The set with only the zone of `addr`.
    pub const fn of_addr(addr: Address, zone_shift: usize) -> ZoneSet {
        ZoneSet::single(ZoneSet::zone_of(addr, zone_shift))
    }

    /// The union of the zones of every address in `[base, limit)`.
    pub fn of_range(base: Address, limit: Address, zone_shift: usize) -> ZoneSet {
        if limit <= base {
            return ZoneSet::EMPTY;
        }
        let first = base.as_usize() >> zone_shift;
        let last = (limit.as_usize() - 1) >> zone_shift;
        if last - first >= BITS_IN_WORD - 1 {
            return ZoneSet::UNIV;
        }
        let first_zone = first & (BITS_IN_WORD - 1);
        let count = last - first + 1;
        // A run of `count` bits starting at `first_zone`, wrapping around the word.
        let run = (1usize << count) - 1;
        ZoneSet(run.rotate_left(first_zone as u32))
    }

    pub const fn union(self, other: ZoneSet) -> ZoneSet {
        ZoneSet(self.0 | other.0)
    }

    pub const fn inter(self, other: ZoneSet) -> ZoneSet {
        ZoneSet(self.0 & other.0)
    }

    pub const fn diff(self, other: ZoneSet) -> ZoneSet {
        ZoneSet(self.0 & !other.0)
    }

    /// Add the zone of `addr` to the set.
    pub const fn add_addr(self, addr: Address, zone_shift: usize) -> ZoneSet {
        self.union(ZoneSet::of_addr(addr, zone_shift))
    }

    /// Is `self` a subset of `other`?
    pub const fn is_subset(self, other: ZoneSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub const fn intersects(self, other: ZoneSet) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains_addr(self, addr: Address, zone_shift: usize) -> bool {
        self.intersects(ZoneSet::of_addr(addr, zone_shift))
    }

    pub const fn is_univ(self) -> bool {
        self.0 == usize::MAX
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The number of zones in the set.
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }
}

impl BitOr for ZoneSet {
    type Output = ZoneSet;
    fn bitor(self, other: ZoneSet) -> ZoneSet {
        self.union(other)
    }
}

impl BitAnd for ZoneSet {
    type Output = ZoneSet;
    fn bitand(self, other: ZoneSet) -> ZoneSet {
        self.inter(other)
    }
}

impl Not for ZoneSet {
    type Output = ZoneSet;
    fn not(self) -> ZoneSet {
        ZoneSet(!self.0)
    }
}

impl fmt::Debug for ZoneSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ZoneSet({:#0width$b})", self.0, width = (1 << LOG_BITS_IN_WORD) + 2)
    }
}

impl fmt::Display for ZoneSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_univ() {
            write!(f, "UNIV")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIFT: usize = 20;

    fn addr(x: usize) -> Address {
        unsafe { Address::from_usize(x) }
    }

    #[test]
    fn zone_of_wraps() {
        assert_eq!(ZoneSet::zone_of(addr(0), SHIFT), 0);
        assert_eq!(ZoneSet::zone_of(addr(3 << SHIFT), SHIFT), 3);
        assert_eq!(
            ZoneSet::zone_of(addr((BITS_IN_WORD + 3) << SHIFT), SHIFT),
            3
        );
    }

    #[test]
    fn empty_and_univ() {
        assert!(!ZoneSet::EMPTY.contains_addr(addr(0x1234_5678), SHIFT));
        assert!(ZoneSet::UNIV.contains_addr(addr(0x1234_5678), SHIFT));
        assert!(ZoneSet::EMPTY.is_subset(ZoneSet::UNIV));
        assert!(!ZoneSet::UNIV.is_subset(ZoneSet::EMPTY));
    }

    #[test]
    fn range_within_one_zone() {
        let base = addr(5 << SHIFT);
        let z = ZoneSet::of_range(base, base + 4096usize, SHIFT);
        assert_eq!(z, ZoneSet::single(5));
    }

    #[test]
    fn range_across_zones() {
        let base = addr((5 << SHIFT) + 4096);
        let limit = addr(7 << SHIFT) + 1usize;
        let z = ZoneSet::of_range(base, limit, SHIFT);
        assert_eq!(z, ZoneSet::single(5) | ZoneSet::single(6) | ZoneSet::single(7));
    }

    #[test]
    fn range_wraps_around() {
        let base = addr((BITS_IN_WORD - 1) << SHIFT);
        let limit = addr((BITS_IN_WORD + 1) << SHIFT);
        let z = ZoneSet::of_range(base, limit, SHIFT);
        assert_eq!(z, ZoneSet::single(BITS_IN_WORD - 1) | ZoneSet::single(0));
    }

    #[test]
    fn huge_range_is_univ() {
        let base = addr(1 << SHIFT);
        let limit = base + (BITS_IN_WORD << SHIFT);
        assert!(ZoneSet::of_range(base, limit, SHIFT).is_univ());
    }

    #[test]
    fn empty_range() {
        let base = addr(1 << SHIFT);
        assert!(ZoneSet::of_range(base, base, SHIFT).is_empty());
    }

    #[test]
    fn set_algebra() {
        let a = ZoneSet::single(1) | ZoneSet::single(2);
        let b = ZoneSet::single(2) | ZoneSet::single(3);
        assert_eq!(a.inter(b), ZoneSet::single(2));
        assert_eq!(a.diff(b), ZoneSet::single(1));
        assert_eq!(a.union(b).count(), 3);
        assert!(a.intersects(b));
        assert!(ZoneSet::single(2).is_subset(a));
        assert!(!b.is_subset(a));
        assert_eq!(!ZoneSet::EMPTY, ZoneSet::UNIV);
    }
}
