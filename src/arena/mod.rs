//! The arena: the owner of all memory, pools, roots and traces of one heap.
//!
//! Every public operation that may run collection work is an arena entry. On entry, the
//! segments the mutator exposed through faults are covered again. On exit, the shield is
//! flushed so that the mutator only runs with the protection the barriers require.

mod collect;
pub mod ld;
pub mod segment;
pub mod store;

use crate::policy::{Chain, Pool, PoolContext, PoolId, Rank};
use crate::shield::ShieldStats;
use crate::trace::{pool_mut, Tracer};
use crate::util::error::{ensure_consistent, ArenaError, Result};
use crate::util::heap::ExtentFreeList;
use crate::util::log::{debug, info};
use crate::util::options::Options;
use crate::util::{Address, ZoneSet};
use crate::vm::{AccessSet, Platform, Root};
use ld::MovedHistory;
use segment::{Segment, SegmentId};
use store::{GenerationStats, SegmentStore};
use std::fmt;

pub(crate) type PoolTable = Vec<Option<Box<dyn Pool>>>;

/// The handle of a root registered with an arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RootId(usize);

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "root#{}", self.0)
    }
}

pub(crate) struct RootEntry {
    pub rank: Rank,
    pub root: Box<dyn Root>,
}

/// A heap. Arenas are independent of each other; several may exist in one process.
pub struct Arena {
    pub(crate) store: SegmentStore,
    pub(crate) pools: PoolTable,
    pub(crate) roots: Vec<Option<RootEntry>>,
    pub(crate) tracer: Tracer,
    pub(crate) chain: Chain,
    pub(crate) alloc_since_poll: usize,
    /// Segments exposed on behalf of the mutator by the fault handler.
    pub(crate) mutator_exposed: Vec<SegmentId>,
    /// Zones that may have moved, by epoch.
    pub(crate) moved: MovedHistory,
}

impl Arena {
    /// Create an arena and reserve its first chunk of address space.
    pub fn new(options: Options, platform: Box<dyn Platform>) -> Result<Arena> {
        let chain = Chain::with_nursery(options.nursery_capacity);
        let tracer = Tracer::new(options.max_traces);
        let mut store = SegmentStore::new(options, platform)?;
        store.set_top_generation(chain.top_generation());
        info!(
            "Arena created: {} bytes reserved, zone shift {}, {} traces",
            store.reserved_bytes(),
            store.zone_shift(),
            store.options.max_traces
        );
        Ok(Arena {
            store,
            pools: vec![],
            roots: vec![],
            tracer,
            chain,
            alloc_since_poll: 0,
            mutator_exposed: vec![],
            moved: MovedHistory::new(),
        })
    }

    pub fn options(&self) -> &Options {
        self.store.options()
    }

    /// Replace the generation chain. Segments already in generations beyond the new top stay
    /// where they are until they are next promoted.
    pub fn set_chain(&mut self, chain: Chain) {
        self.store.set_top_generation(chain.top_generation());
        self.chain = chain;
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn create_pool(&mut self, pool: Box<dyn Pool>) -> PoolId {
        let id = PoolId::new(self.pools.len());
        info!("Created {} ({})", id, pool.name());
        self.pools.push(Some(pool));
        id
    }

    /// Destroy a pool and free all its segments.
    pub fn destroy_pool(&mut self, id: PoolId) -> Result<()> {
        ensure_consistent!(
            self.pools.get(id.index()).is_some_and(|p| p.is_some()),
            "{} is not a live pool",
            id
        );
        let segs: Vec<SegmentId> = self
            .store
            .segments()
            .filter(|s| s.pool == id)
            .map(|s| s.id)
            .collect();
        for &seg in &segs {
            ensure_consistent!(
                !self.store.seg(seg)?.is_coloured(),
                "{} destroyed while {} is part of a trace",
                id,
                seg
            );
        }
        self.enter()?;
        let result = segs.into_iter().try_for_each(|seg| self.store.segment_free(seg));
        self.pools[id.index()] = None;
        debug!("Destroyed {}", id);
        self.leave_with(result)
    }

    pub fn pool<P: Pool>(&self, id: PoolId) -> Option<&P> {
        self.pools
            .get(id.index())?
            .as_ref()?
            .downcast_ref::<P>()
    }

    pub fn pool_mut<P: Pool>(&mut self, id: PoolId) -> Option<&mut P> {
        self.pools
            .get_mut(id.index())?
            .as_mut()?
            .downcast_mut::<P>()
    }

    /// Register references held outside managed memory. Roots are ambiguous or exact.
    pub fn create_root(&mut self, rank: Rank, root: Box<dyn Root>) -> Result<RootId> {
        ensure_consistent!(rank != Rank::Weak, "roots cannot be weak");
        let id = RootId(self.roots.len());
        self.roots.push(Some(RootEntry { rank, root }));
        Ok(id)
    }

    pub fn destroy_root(&mut self, id: RootId) -> Result<()> {
        match self.roots.get_mut(id.0).and_then(|r| r.take()) {
            Some(_) => Ok(()),
            None => Err(ArenaError::consistency(format!("{} is not a live root", id))),
        }
    }

    pub fn root<R: Root>(&self, id: RootId) -> Option<&R> {
        self.roots.get(id.0)?.as_ref()?.root.downcast_ref::<R>()
    }

    pub fn root_mut<R: Root>(&mut self, id: RootId) -> Option<&mut R> {
        self.roots.get_mut(id.0)?.as_mut()?.root.downcast_mut::<R>()
    }

    /// Cover the exposures made for the mutator.
    pub(crate) fn enter(&mut self) -> Result<()> {
        for id in std::mem::take(&mut self.mutator_exposed) {
            self.store.cover(id)?;
        }
        Ok(())
    }

    /// Reprotect covered segments before returning to the mutator.
    pub(crate) fn leave(&mut self) -> Result<()> {
        self.store.flush()
    }

    pub(crate) fn leave_with<T>(&mut self, result: Result<T>) -> Result<T> {
        let left = self.leave();
        let value = result?;
        left?;
        Ok(value)
    }

    /// Expose a segment until the next arena entry. When the shield cache is full of such
    /// exposures, the oldest one is covered.
    pub(crate) fn expose_for_mutator(&mut self, id: SegmentId) -> Result<()> {
        loop {
            match self.store.expose(id) {
                Ok(()) => {
                    self.mutator_exposed.push(id);
                    return Ok(());
                }
                Err(ArenaError::Resource(_)) if !self.mutator_exposed.is_empty() => {
                    let oldest = self.mutator_exposed.remove(0);
                    self.store.cover(oldest)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(crate) fn pool_context(
        &mut self,
        id: PoolId,
    ) -> Result<(&mut Box<dyn Pool>, PoolContext<'_>)> {
        let pool = pool_mut(&mut self.pools, id)?;
        let ctx = PoolContext::new(&mut self.store, id, pool.rank(), pool.is_collected());
        Ok((pool, ctx))
    }

    pub fn expose(&mut self, id: SegmentId) -> Result<()> {
        self.store.expose(id)
    }

    pub fn cover(&mut self, id: SegmentId) -> Result<()> {
        self.store.cover(id)
    }

    pub fn raise(&mut self, id: SegmentId, mode: AccessSet) -> Result<()> {
        self.store.raise(id, mode)
    }

    pub fn lower(&mut self, id: SegmentId, mode: AccessSet) -> Result<()> {
        self.store.lower(id, mode)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    pub fn release_spare(&mut self) -> Result<()> {
        self.store.release_spare()
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.store.segment(id)
    }

    pub fn segment_of(&self, addr: Address) -> Option<SegmentId> {
        self.store.segment_of(addr)
    }

    /// Live segments in address order.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.store.segments()
    }

    pub fn zone_summary(&self) -> ZoneSet {
        self.store.zone_summary()
    }

    pub fn free_extents(&self) -> &ExtentFreeList {
        self.store.free_extents()
    }

    pub fn spare_extents(&self) -> &ExtentFreeList {
        self.store.spare_extents()
    }

    pub fn committed_bytes(&self) -> usize {
        self.store.committed_bytes()
    }

    pub fn spare_bytes(&self) -> usize {
        self.store.spare_bytes()
    }

    pub fn reserved_bytes(&self) -> usize {
        self.store.reserved_bytes()
    }

    pub fn generation(&self, gen: usize) -> GenerationStats {
        self.store.generation(gen)
    }

    pub fn shield_stats(&self) -> ShieldStats {
        self.store.shield_stats()
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn platform<P: Platform>(&self) -> Option<&P> {
        self.store.platform().downcast_ref::<P>()
    }

    pub fn platform_mut<P: Platform>(&mut self) -> Option<&mut P> {
        self.store.platform_mut().downcast_mut::<P>()
    }

    /// Check the invariants of the arena: segments are disjoint, the arena summary covers every
    /// segment summary, exposed segments are unprotected, and every colour belongs to a running
    /// trace.
    pub fn verify(&self) -> Result<()> {
        self.store.verify()?;
        let busy = self.tracer.busy();
        for seg in self.store.segments() {
            ensure_consistent!(
                seg.white.union(seg.grey).is_subset(busy),
                "{} is coloured for a trace that is not running",
                seg.id
            );
            ensure_consistent!(
                seg.rank.is_some() || seg.grey.is_empty(),
                "{} holds no references but is grey",
                seg.id
            );
        }
        for id in busy.iter() {
            let trace = self.tracer.get(id)?;
            for &seg in trace.condemned() {
                if let Some(seg) = self.store.segment(seg) {
                    ensure_consistent!(
                        seg.zones.is_subset(trace.white()),
                        "{} is condemned by {} outside its white zones",
                        seg.id,
                        id
                    );
                }
            }
        }
        Ok(())
    }
}
