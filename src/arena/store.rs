use crate::arena::segment::{Segment, SegmentId, SegmentTable};
use crate::policy::{PoolId, Rank};
use crate::shield::Shield;
use crate::util::constants::{BITS_IN_WORD, BYTES_IN_PAGE};
use crate::util::conversions::{bytes_to_pages_up, raw_align_up};
use crate::util::error::{ensure_consistent, ArenaError, Result};
use crate::util::heap::{ExtentFreeList, PageAccounting};
use crate::util::log::{debug, error, trace};
use crate::util::options::Options;
use crate::util::{Address, ZoneSet};
use crate::vm::{AccessSet, Platform};
use std::ops::Range;

/// Where a new segment would like to be placed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegPref {
    /// Zones the segment should preferably lie in.
    pub zones: ZoneSet,
    /// Take the segment from the top of a free extent rather than the bottom. Memory that is
    /// never collected is placed high, away from collected memory.
    pub high: bool,
}

/// Per-generation bookkeeping used by placement and by the chain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GenerationStats {
    /// Zones that segments of this generation have been placed in.
    pub zones: ZoneSet,
    /// Bytes of live segments in this generation.
    pub live_bytes: usize,
    /// Bytes that entered this generation since it was last condemned.
    pub new_bytes: usize,
}

/// The address space of an arena and the segments carved out of it.
///
/// Reserved memory is kept in two free lists. `free` holds reserved extents without backing
/// memory, `spare` holds committed extents that are not in any segment. The total size of
/// `spare` never exceeds the spare commit limit.
pub struct SegmentStore {
    pub(crate) options: Options,
    platform: Box<dyn Platform>,
    grain: usize,
    chunks: Vec<Range<Address>>,
    free: ExtentFreeList,
    spare: ExtentFreeList,
    pub(crate) table: SegmentTable,
    accounting: PageAccounting,
    pub(crate) shield: Shield,
    summary: ZoneSet,
    generations: Vec<GenerationStats>,
    top_generation: usize,
}

impl SegmentStore {
    pub fn new(options: Options, platform: Box<dyn Platform>) -> Result<Self> {
        let page_size = platform.page_size();
        ensure_consistent!(
            page_size.is_power_of_two(),
            "platform page size {} is not a power of two",
            page_size
        );
        let grain = page_size.max(BYTES_IN_PAGE);
        let shield = Shield::new(options.shield_cache_size);
        let first = options.arena_size;
        let mut store = SegmentStore {
            options,
            platform,
            grain,
            chunks: vec![],
            free: ExtentFreeList::new(),
            spare: ExtentFreeList::new(),
            table: SegmentTable::default(),
            accounting: PageAccounting::new(),
            shield,
            summary: ZoneSet::EMPTY,
            generations: vec![],
            top_generation: 0,
        };
        store.reserve(first)?;
        Ok(store)
    }

    /// Reserve a new chunk of address space of at least `size_hint` bytes and add it to the
    /// free extents.
    pub fn reserve(&mut self, size_hint: usize) -> Result<Range<Address>> {
        let size = raw_align_up(size_hint.max(self.grain), self.grain);
        let base = self.platform.reserve(size)?;
        ensure_consistent!(
            base.is_aligned_to(self.grain),
            "platform reserved {} which is not aligned to {}",
            base,
            self.grain
        );
        debug!("Reserved chunk {}..{}", base, base + size);
        self.chunks.push(base..base + size);
        self.free.insert(base, size);
        self.accounting.reserve(bytes_to_pages_up(size));
        Ok(base..base + size)
    }

    pub fn grain(&self) -> usize {
        self.grain
    }

    pub fn zone_shift(&self) -> usize {
        self.options.zone_shift
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    pub fn platform_mut(&mut self) -> &mut dyn Platform {
        self.platform.as_mut()
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.table.get(id)
    }

    pub(crate) fn seg(&self, id: SegmentId) -> Result<&Segment> {
        self.table
            .get(id)
            .ok_or_else(|| ArenaError::consistency(format!("{} is not a live segment", id)))
    }

    pub(crate) fn seg_mut(&mut self, id: SegmentId) -> Result<&mut Segment> {
        self.table
            .get_mut(id)
            .ok_or_else(|| ArenaError::consistency(format!("{} is not a live segment", id)))
    }

    /// The segment that contains `addr`.
    pub fn segment_of(&self, addr: Address) -> Option<SegmentId> {
        self.table.of_addr(addr)
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.table.iter()
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.table.ids()
    }

    pub fn segment_count(&self) -> usize {
        self.table.len()
    }

    /// The union of the summaries of all live segments, possibly larger.
    pub fn zone_summary(&self) -> ZoneSet {
        self.summary
    }

    pub fn free_extents(&self) -> &ExtentFreeList {
        &self.free
    }

    pub fn spare_extents(&self) -> &ExtentFreeList {
        &self.spare
    }

    pub fn accounting(&self) -> &PageAccounting {
        &self.accounting
    }

    pub fn reserved_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.end - c.start).sum()
    }

    pub fn committed_bytes(&self) -> usize {
        self.accounting.get_committed_pages() * BYTES_IN_PAGE
    }

    pub fn spare_bytes(&self) -> usize {
        self.spare.total_bytes()
    }

    pub fn chunks(&self) -> &[Range<Address>] {
        &self.chunks
    }

    pub fn generation(&self, gen: usize) -> GenerationStats {
        self.generations.get(gen).copied().unwrap_or_default()
    }

    pub fn top_generation(&self) -> usize {
        self.top_generation
    }

    pub(crate) fn set_top_generation(&mut self, top: usize) {
        self.top_generation = top;
    }

    fn generation_mut(&mut self, gen: usize) -> &mut GenerationStats {
        if self.generations.len() <= gen {
            self.generations.resize(gen + 1, GenerationStats::default());
        }
        &mut self.generations[gen]
    }

    /// Forget the allocation into generations up to and including `gen`. Called when they are
    /// condemned.
    pub(crate) fn reset_new_bytes(&mut self, gen: usize) {
        for g in self.generations.iter_mut().take(gen + 1) {
            g.new_bytes = 0;
        }
    }

    /// Move a segment into a generation.
    pub(crate) fn set_generation(&mut self, id: SegmentId, gen: usize) -> Result<()> {
        let gen = gen.min(self.top_generation);
        let seg = self.seg_mut(id)?;
        let (old, size, zones) = (seg.generation, seg.size, seg.zones);
        if old == gen {
            return Ok(());
        }
        seg.generation = gen;
        self.generation_mut(old).live_bytes -= size;
        let stats = self.generation_mut(gen);
        stats.live_bytes += size;
        stats.new_bytes += size;
        stats.zones = stats.zones.union(zones);
        Ok(())
    }

    /// Collected segments prefer the zones of their generation, or else zones no generation
    /// uses yet. Uncollected segments only prefer high addresses.
    fn preference(&self, gen: usize, high: bool) -> SegPref {
        if high {
            return SegPref {
                zones: ZoneSet::UNIV,
                high,
            };
        }
        let own = self.generation(gen).zones;
        let zones = if !own.is_empty() {
            own
        } else {
            let used = self
                .generations
                .iter()
                .fold(ZoneSet::EMPTY, |acc, g| acc.union(g.zones));
            if used.is_univ() {
                ZoneSet::UNIV
            } else {
                !used
            }
        };
        SegPref { zones, high }
    }

    /// Addresses in `extent` where `size` bytes could start, from the preferred end inwards.
    /// After the end itself, only zone stripe boundaries are tried.
    fn candidates(
        extent: Range<Address>,
        size: usize,
        high: bool,
        stripe: usize,
    ) -> impl Iterator<Item = Address> {
        let mut next = Some(if high { extent.end - size } else { extent.start });
        std::iter::from_fn(move || {
            let current = next?;
            let following = if high {
                let limit = current.align_down(stripe);
                (limit.as_usize() >= extent.start.as_usize() + size).then(|| limit - size)
            } else {
                let base = (current + 1usize).align_up(stripe);
                (base.as_usize() + size <= extent.end.as_usize()).then_some(base)
            };
            next = following;
            Some(current)
        })
        // Zones repeat every BITS_IN_WORD stripes.
        .take(2 * BITS_IN_WORD)
    }

    /// Choose where to place `size` bytes in `list`. Extents are tried smallest first. The
    /// preferred zones are honoured if any fitting extent allows it.
    fn place(&self, list: &ExtentFreeList, size: usize, pref: SegPref) -> Option<Address> {
        let shift = self.zone_shift();
        let stripe = (1usize << shift).max(self.grain);
        if !pref.zones.is_univ() {
            let preferred = list
                .fitting(size)
                .flat_map(|r| Self::candidates(r, size, pref.high, stripe))
                .find(|&a| ZoneSet::of_range(a, a + size, shift).is_subset(pref.zones));
            if preferred.is_some() {
                return preferred;
            }
        }
        if pref.high {
            list.fitting(size).max_by_key(|r| r.end).map(|r| r.end - size)
        } else {
            list.fitting(size).next().map(|r| r.start)
        }
    }

    fn ensure_commit_limit(&mut self, size: usize) -> Result<()> {
        if self.committed_bytes() + size > self.options.commit_limit {
            self.release_spare()?;
        }
        if self.committed_bytes() + size > self.options.commit_limit {
            return Err(ArenaError::out_of_memory(format!(
                "committing {} bytes would exceed the commit limit of {} bytes",
                size, self.options.commit_limit
            )));
        }
        Ok(())
    }

    fn find_extent(&mut self, size: usize, pref: SegPref) -> Result<Address> {
        if let Some(base) = self.place(&self.spare, size, pref) {
            let taken = self.spare.take(base, size);
            debug_assert!(taken);
            self.accounting.remove_spare(bytes_to_pages_up(size));
            return Ok(base);
        }
        loop {
            if let Some(base) = self.place(&self.free, size, pref) {
                self.ensure_commit_limit(size)?;
                self.platform.commit(base, size).map_err(|e| match e {
                    ArenaError::Resource(msg) => ArenaError::OutOfMemory(msg),
                    e => e,
                })?;
                let taken = self.free.take(base, size);
                debug_assert!(taken);
                self.accounting.commit(bytes_to_pages_up(size));
                return Ok(base);
            }
            let extend = size.max(self.options.arena_extend_by);
            if let Err(e) = self.reserve(extend) {
                return Err(match e {
                    ArenaError::Resource(msg) => ArenaError::out_of_memory(format!(
                        "no extent of {} bytes and {}",
                        size, msg
                    )),
                    e => e,
                });
            }
        }
    }

    /// Allocate a segment of at least `size` bytes for a pool, in generation `gen`.
    pub fn segment_alloc(
        &mut self,
        pool: PoolId,
        rank: Option<Rank>,
        size: usize,
        gen: usize,
        high: bool,
    ) -> Result<SegmentId> {
        let size = raw_align_up(size.max(1), self.grain);
        let gen = gen.min(self.top_generation);
        let pref = self.preference(gen, high);
        let base = self.find_extent(size, pref)?;
        let zones = ZoneSet::of_range(base, base + size, self.zone_shift());
        // A new segment is black for every trace. Until it has been scanned, it may refer
        // anywhere.
        let summary = if rank.is_some() {
            ZoneSet::UNIV
        } else {
            ZoneSet::EMPTY
        };
        let id = self.table.next_id();
        self.table.insert(Segment {
            id,
            base,
            size,
            pool,
            zones,
            rank,
            generation: gen,
            white: Default::default(),
            grey: Default::default(),
            summary,
            depth: 0,
            pm: AccessSet::empty(),
            sm: AccessSet::empty(),
            cached: false,
        });
        self.summary = self.summary.union(summary);
        let stats = self.generation_mut(gen);
        if !high {
            stats.zones = stats.zones.union(zones);
        }
        stats.live_bytes += size;
        stats.new_bytes += size;
        trace!(
            "segment_alloc {} {}..{} pool={:?} gen={} zones={}",
            id,
            base,
            base + size,
            pool,
            gen,
            zones
        );
        Ok(id)
    }

    /// Return a segment. The segment must not be coloured by any trace or exposed.
    pub fn segment_free(&mut self, id: SegmentId) -> Result<()> {
        let seg = self.seg(id)?;
        ensure_consistent!(
            !seg.is_coloured(),
            "{} freed while white for {:?} and grey for {:?}",
            id,
            seg.white,
            seg.grey
        );
        ensure_consistent!(
            seg.depth == 0,
            "{} freed while exposed at depth {}",
            id,
            seg.depth
        );
        let (base, size, gen, cached, pm) =
            (seg.base, seg.size, seg.generation, seg.cached, seg.pm);
        if cached {
            self.shield.uncache(id);
        }
        if !pm.is_empty() {
            self.platform.protect(base, size, AccessSet::empty())?;
            self.shield.stats.protects += 1;
        }
        self.table.remove(id);
        self.generation_mut(gen).live_bytes -= size;

        let pages = bytes_to_pages_up(size);
        if self.spare.total_bytes() + size <= self.options.spare_commit_limit {
            self.spare.insert(base, size);
            self.accounting.add_spare(pages);
        } else {
            self.platform.decommit(base, size)?;
            self.accounting.decommit(pages);
            self.free.insert(base, size);
        }
        self.recompute_summary();
        trace!("segment_free {} {}..{}", id, base, base + size);
        Ok(())
    }

    /// Decommit every spare extent.
    pub fn release_spare(&mut self) -> Result<()> {
        for extent in self.spare.drain() {
            let size = extent.end - extent.start;
            let pages = bytes_to_pages_up(size);
            self.accounting.remove_spare(pages);
            self.platform.decommit(extent.start, size)?;
            self.accounting.decommit(pages);
            self.free.insert(extent.start, size);
        }
        Ok(())
    }

    /// Replace the summary of a segment and update the write barrier to match it.
    pub fn set_summary(&mut self, id: SegmentId, summary: ZoneSet) -> Result<()> {
        let seg = self.seg_mut(id)?;
        seg.summary = summary;
        let has_refs = seg.rank.is_some();
        self.summary = self.summary.union(summary);
        if has_refs {
            if summary.is_univ() {
                self.lower(id, AccessSet::WRITE)?;
            } else {
                self.raise(id, AccessSet::WRITE)?;
            }
        }
        Ok(())
    }

    /// Narrow the global summary to the union of the summaries of live segments.
    fn recompute_summary(&mut self) {
        self.summary = self
            .table
            .iter()
            .fold(ZoneSet::EMPTY, |acc, seg| acc.union(seg.summary));
    }

    /// Check the structural invariants of the store.
    pub fn verify(&self) -> Result<()> {
        let mut prev: Option<&Segment> = None;
        let mut union = ZoneSet::EMPTY;
        for seg in self.table.iter() {
            if let Some(p) = prev {
                ensure_consistent!(
                    p.limit() <= seg.base,
                    "{} {}..{} overlaps {} {}..{}",
                    p.id,
                    p.base,
                    p.limit(),
                    seg.id,
                    seg.base,
                    seg.limit()
                );
            }
            ensure_consistent!(
                !self.free.overlaps(&seg.range()) && !self.spare.overlaps(&seg.range()),
                "{} overlaps a free extent",
                seg.id
            );
            ensure_consistent!(
                seg.depth == 0 || (seg.pm.is_empty() && seg.cached),
                "{} is exposed but protected or uncached",
                seg.id
            );
            union = union.union(seg.summary);
            prev = Some(seg);
        }
        ensure_consistent!(
            union.is_subset(self.summary),
            "arena summary {} misses zones of segment summaries {}",
            self.summary,
            union
        );
        self.shield.verify(self)
    }
}

impl Drop for SegmentStore {
    fn drop(&mut self) {
        for chunk in std::mem::take(&mut self.chunks) {
            if let Err(e) = self.platform.release(chunk.start, chunk.end - chunk.start) {
                error!("Failed to release chunk {}..{}: {}", chunk.start, chunk.end, e);
            }
        }
    }
}
