//! Location dependency.
//!
//! A client that hashes objects by address (say, an address-keyed table over a copying pool)
//! records the addresses it depends on in a [`LocationDependency`]. When a trace that may
//! move objects flips, the arena epoch advances and the zones that trace may move objects out
//! of are added to a short history. A dependency is stale if any zone it recorded may have
//! moved since the epoch it was reset in. Staleness is conservative: a stale dependency only
//! says the addresses may have changed, and the client has to rehash.

use crate::arena::Arena;
use crate::util::constants::LD_HISTORY_LENGTH;
use crate::util::log::debug;
use crate::util::{Address, ZoneSet};

/// A set of addresses a client depends on, tagged with the epoch it was reset in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LocationDependency {
    epoch: u64,
    zones: ZoneSet,
}

impl LocationDependency {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Zones of the addresses added since the last reset.
    pub fn zones(&self) -> ZoneSet {
        self.zones
    }
}

/// Zones that may have moved, for each of the last few epochs.
pub(crate) struct MovedHistory {
    epoch: u64,
    /// `history[e % LD_HISTORY_LENGTH]` holds the zones moved since epoch `e`, for the last
    /// `LD_HISTORY_LENGTH` epochs.
    history: [ZoneSet; LD_HISTORY_LENGTH],
    /// Every zone moved since the arena was created.
    prehistory: ZoneSet,
}

impl MovedHistory {
    pub fn new() -> Self {
        MovedHistory {
            epoch: 0,
            history: [ZoneSet::EMPTY; LD_HISTORY_LENGTH],
            prehistory: ZoneSet::EMPTY,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Objects in `moved` may be moved from now on. Starts a new epoch.
    pub fn age(&mut self, moved: ZoneSet) {
        let slot = self.slot(self.epoch);
        // The oldest entry becomes the entry of the epoch that ends here.
        self.prehistory = self.prehistory.union(self.history[slot]);
        self.history[slot] = ZoneSet::EMPTY;
        for zones in self.history.iter_mut() {
            *zones = zones.union(moved);
        }
        self.prehistory = self.prehistory.union(moved);
        self.epoch += 1;
    }

    /// Zones moved since `epoch`.
    pub fn moved_since(&self, epoch: u64) -> ZoneSet {
        if epoch == self.epoch {
            ZoneSet::EMPTY
        } else if self.epoch - epoch > LD_HISTORY_LENGTH as u64 {
            self.prehistory
        } else {
            self.history[self.slot(epoch)]
        }
    }

    fn slot(&self, epoch: u64) -> usize {
        (epoch % LD_HISTORY_LENGTH as u64) as usize
    }
}

impl Arena {
    /// The number of flips of traces that may move objects.
    pub fn epoch(&self) -> u64 {
        self.moved.epoch()
    }

    /// A dependency on no addresses, starting at the current epoch.
    pub fn ld_new(&self) -> LocationDependency {
        LocationDependency {
            epoch: self.epoch(),
            zones: ZoneSet::EMPTY,
        }
    }

    /// Forget every address of `ld` and start it at the current epoch.
    pub fn ld_reset(&self, ld: &mut LocationDependency) {
        *ld = self.ld_new();
    }

    /// Record that the client depends on `addr`. Call it before using the address, for
    /// example before hashing it.
    pub fn ld_add(&self, ld: &mut LocationDependency, addr: Address) {
        debug_assert!(ld.epoch <= self.epoch());
        ld.zones = ld.zones.add_addr(addr, self.store.zone_shift());
    }

    /// May any address added to `ld` have changed since `ld` was reset?
    pub fn ld_is_stale(&self, ld: &LocationDependency) -> bool {
        debug_assert!(ld.epoch <= self.epoch());
        let stale = ld.zones.intersects(self.moved.moved_since(ld.epoch));
        if stale {
            debug!(
                "location dependency of epoch {} on {} is stale at epoch {}",
                ld.epoch,
                ld.zones,
                self.epoch()
            );
        }
        stale
    }

    /// Make `into` depend on the addresses of `from` too. The result is stale whenever either
    /// of them would be.
    pub fn ld_merge(&self, into: &mut LocationDependency, from: &LocationDependency) {
        debug_assert!(from.epoch <= self.epoch());
        into.epoch = into.epoch.min(from.epoch);
        into.zones = into.zones.union(from.zones);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(i: usize) -> ZoneSet {
        ZoneSet::single(i)
    }

    #[test]
    fn nothing_moved_in_the_current_epoch() {
        let mut history = MovedHistory::new();
        assert!(history.moved_since(0).is_empty());
        history.age(zone(1));
        assert_eq!(history.epoch(), 1);
        assert!(history.moved_since(1).is_empty());
        assert_eq!(history.moved_since(0), zone(1));
    }

    #[test]
    fn recent_epochs_see_only_later_moves() {
        let mut history = MovedHistory::new();
        history.age(zone(1));
        history.age(zone(2));
        history.age(zone(3));
        assert_eq!(history.moved_since(0), zone(1).union(zone(2)).union(zone(3)));
        assert_eq!(history.moved_since(1), zone(2).union(zone(3)));
        assert_eq!(history.moved_since(2), zone(3));
        assert!(history.moved_since(3).is_empty());
    }

    #[test]
    fn old_epochs_fall_back_to_prehistory() {
        let mut history = MovedHistory::new();
        history.age(zone(0));
        for _ in 0..LD_HISTORY_LENGTH {
            history.age(ZoneSet::EMPTY);
        }
        let epoch = history.epoch();
        // Epoch 1 is still in the history, and zone 0 moved before it.
        assert!(history.moved_since(epoch - LD_HISTORY_LENGTH as u64).is_empty());
        // Epoch 0 is not, so every zone ever moved counts.
        assert_eq!(history.moved_since(0), zone(0));
        history.age(zone(5));
        assert_eq!(history.moved_since(0), zone(0).union(zone(5)));
        assert_eq!(history.moved_since(1), zone(0).union(zone(5)));
        assert_eq!(history.moved_since(history.epoch() - 1), zone(5));
    }
}
