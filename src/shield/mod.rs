//! The shield: memory protection used as read and write barriers.
//!
//! Each segment has a required protection (its shield mode) and an actual protection. While a
//! segment is exposed, or sits at depth zero in the shield cache, its actual protection is
//! empty. Covered segments stay in the cache unprotected until they are evicted or the shield
//! is flushed, so a sequence of expose/cover pairs on the same segments costs no system calls.

mod fault;

use crate::arena::segment::SegmentId;
use crate::arena::store::SegmentStore;
use crate::util::constants::SHIELD_DEPTH_MAX;
use crate::util::error::{ensure_consistent, ArenaError, Result};
use crate::util::log::trace;
use crate::vm::AccessSet;
use std::collections::VecDeque;

/// Counters of shield activity.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ShieldStats {
    pub exposes: usize,
    pub covers: usize,
    /// Calls into the platform to change protection.
    pub protects: usize,
    /// Cache entries reprotected to make room.
    pub evictions: usize,
    pub flushes: usize,
    /// Faults handled on managed segments.
    pub faults: usize,
}

/// The cache of exposed segments, least recently exposed first.
pub(crate) struct Shield {
    cache: VecDeque<SegmentId>,
    capacity: usize,
    pub stats: ShieldStats,
}

impl Shield {
    pub fn new(capacity: usize) -> Self {
        Shield {
            cache: VecDeque::with_capacity(capacity),
            capacity,
            stats: ShieldStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cached(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.cache.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    fn touch(&mut self, id: SegmentId) {
        self.uncache(id);
        self.cache.push_back(id);
    }

    pub fn uncache(&mut self, id: SegmentId) {
        if let Some(i) = self.cache.iter().position(|&c| c == id) {
            self.cache.remove(i);
        }
    }

    pub fn verify(&self, store: &SegmentStore) -> Result<()> {
        ensure_consistent!(
            self.cache.len() <= self.capacity,
            "shield cache holds {} entries, capacity {}",
            self.cache.len(),
            self.capacity
        );
        for &id in self.cache.iter() {
            ensure_consistent!(
                store.seg(id)?.cached,
                "{} is in the shield cache but not marked cached",
                id
            );
        }
        Ok(())
    }
}

impl SegmentStore {
    /// Bring the hardware protection of a segment in line with its shield state.
    fn sync(&mut self, id: SegmentId) -> Result<()> {
        let seg = self.seg(id)?;
        let wanted = if seg.depth > 0 || seg.cached {
            AccessSet::empty()
        } else {
            seg.sm
        };
        if seg.pm != wanted {
            let (base, size) = (seg.base, seg.size);
            self.platform_mut().protect(base, size, wanted)?;
            self.shield.stats.protects += 1;
            self.seg_mut(id)?.pm = wanted;
            trace!("protect {} {:?}", id, wanted);
        }
        Ok(())
    }

    /// Drop a zero-depth entry from the cache and reprotect it.
    fn evict(&mut self, id: SegmentId) -> Result<()> {
        self.shield.uncache(id);
        self.seg_mut(id)?.cached = false;
        self.sync(id)
    }

    /// Make room for one more cache entry.
    fn make_cache_room(&mut self) -> Result<()> {
        while self.shield.cache.len() >= self.shield.capacity {
            let victim = self
                .shield
                .cache
                .iter()
                .copied()
                .find(|&id| self.table.get(id).is_some_and(|seg| seg.depth == 0));
            match victim {
                Some(id) => {
                    self.evict(id)?;
                    self.shield.stats.evictions += 1;
                }
                None => {
                    return Err(ArenaError::resource(format!(
                        "all {} shield cache entries are exposed",
                        self.shield.capacity
                    )))
                }
            }
        }
        Ok(())
    }

    /// Make a segment accessible. Exposures nest and must be balanced by [`Self::cover`].
    pub fn expose(&mut self, id: SegmentId) -> Result<()> {
        let seg = self.seg(id)?;
        if seg.depth >= SHIELD_DEPTH_MAX {
            return Err(ArenaError::resource(format!(
                "{} exposed more than {} times",
                id, SHIELD_DEPTH_MAX
            )));
        }
        let (depth, cached) = (seg.depth, seg.cached);
        if depth == 0 {
            if cached {
                self.shield.touch(id);
            } else {
                self.make_cache_room()?;
                self.shield.cache.push_back(id);
                self.seg_mut(id)?.cached = true;
            }
        }
        self.seg_mut(id)?.depth = depth + 1;
        self.shield.stats.exposes += 1;
        self.sync(id)?;
        trace!("expose {} depth {}", id, depth + 1);
        Ok(())
    }

    /// Undo one [`Self::expose`]. The segment is reprotected lazily.
    pub fn cover(&mut self, id: SegmentId) -> Result<()> {
        let seg = self.seg_mut(id)?;
        ensure_consistent!(seg.depth > 0, "{} covered without being exposed", id);
        seg.depth -= 1;
        let depth = seg.depth;
        self.shield.stats.covers += 1;
        trace!("cover {} depth {}", id, depth);
        Ok(())
    }

    /// Require `mode` to be denied on the segment whenever it is not exposed.
    pub fn raise(&mut self, id: SegmentId, mode: AccessSet) -> Result<()> {
        let seg = self.seg_mut(id)?;
        seg.sm |= mode;
        if seg.depth == 0 && seg.cached {
            self.evict(id)
        } else {
            self.sync(id)
        }
    }

    /// Stop requiring `mode` to be denied on the segment.
    pub fn lower(&mut self, id: SegmentId, mode: AccessSet) -> Result<()> {
        self.seg_mut(id)?.sm.remove(mode);
        self.sync(id)
    }

    /// Reprotect every covered segment in the cache.
    pub fn flush(&mut self) -> Result<()> {
        let covered: Vec<SegmentId> = self
            .shield
            .cache
            .iter()
            .copied()
            .filter(|&id| self.table.get(id).is_some_and(|seg| seg.depth == 0))
            .collect();
        for id in covered {
            self.evict(id)?;
        }
        self.shield.stats.flushes += 1;
        Ok(())
    }

    pub fn shield_stats(&self) -> ShieldStats {
        self.shield.stats
    }

    pub fn shield_cached(&self) -> Vec<SegmentId> {
        self.shield.cached().collect()
    }
}
