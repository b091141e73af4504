use crate::arena::segment::SegmentId;
use crate::arena::store::SegmentStore;
use crate::arena::PoolTable;
use crate::policy::{FixContext, FixOutcome, Pool, PoolContext, PoolId, Rank, ScanOutcome};
use crate::trace::{TraceSet, TraceStats, Tracer};
use crate::util::error::{ArenaError, Result};
use crate::util::log::{info, trace};
use crate::util::{Address, ObjectReference, ZoneSet};
use crate::vm::AccessSet;

/// The state of scanning one segment or one root for a set of traces.
pub(crate) struct ScanState<'a> {
    pub store: &'a mut SegmentStore,
    pub pools: &'a mut PoolTable,
    pub tracer: &'a mut Tracer,
    /// Traces the references are fixed for.
    traces: TraceSet,
    rank: Rank,
    white: ZoneSet,
    emergency: bool,
    /// Zones of the references seen since the last reset.
    pub fixed_summary: ZoneSet,
    pub stats: TraceStats,
}

impl<'a> ScanState<'a> {
    pub fn new(
        store: &'a mut SegmentStore,
        pools: &'a mut PoolTable,
        tracer: &'a mut Tracer,
        traces: TraceSet,
        rank: Rank,
    ) -> Self {
        let white = tracer.white_zones(traces);
        let emergency = tracer.any_emergency(traces);
        ScanState {
            store,
            pools,
            tracer,
            traces,
            rank,
            white,
            emergency,
            fixed_summary: ZoneSet::EMPTY,
            stats: TraceStats::default(),
        }
    }

    /// Fix one reference and return where its referent is now. Null is returned for a weak
    /// reference whose referent was not preserved.
    pub fn fix(&mut self, object: ObjectReference) -> Result<ObjectReference> {
        if object.is_null() {
            return Ok(object);
        }
        let fixed = self.fix_nonnull(object)?;
        if !fixed.is_null() {
            self.fixed_summary = self
                .fixed_summary
                .add_addr(fixed.to_raw_address(), self.store.zone_shift());
        }
        Ok(fixed)
    }

    fn fix_nonnull(&mut self, object: ObjectReference) -> Result<ObjectReference> {
        let addr = object.to_raw_address();
        if !self.white.contains_addr(addr, self.store.zone_shift()) {
            return Ok(object);
        }
        let Some(seg_id) = self.store.segment_of(addr) else {
            return Ok(object);
        };
        let seg = self.store.seg(seg_id)?;
        let traces = seg.white.inter(self.traces);
        if traces.is_empty() {
            return Ok(object);
        }
        let pool_id = seg.pool;
        self.stats.fixes += 1;

        if self.rank == Rank::Weak {
            let pool = pool_ref(self.pools, pool_id)?;
            return Ok(match pool.is_preserved(self.store, seg_id, object) {
                Some(now) => now,
                None => {
                    self.stats.splatted += 1;
                    ObjectReference::NULL
                }
            });
        }

        let outcome = match self.fix_in_pool(traces, seg_id, pool_id, object, self.emergency) {
            Err(e) if e.is_out_of_memory() && !self.emergency => {
                info!(
                    "Out of memory fixing {} for {:?}, continuing in emergency mode: {}",
                    object, traces, e
                );
                self.emergency = true;
                self.tracer.set_emergency(self.traces);
                self.fix_in_pool(traces, seg_id, pool_id, object, true)?
            }
            r => r?,
        };
        Ok(match outcome {
            FixOutcome::Unchanged => object,
            FixOutcome::Moved(to) => {
                self.stats.moved += 1;
                to
            }
        })
    }

    fn fix_in_pool(
        &mut self,
        traces: TraceSet,
        seg: SegmentId,
        pool_id: PoolId,
        object: ObjectReference,
        emergency: bool,
    ) -> Result<FixOutcome> {
        let pool = pool_mut(self.pools, pool_id)?;
        let ctx = PoolContext::new(self.store, pool_id, pool.rank(), pool.is_collected());
        let mut fctx = FixContext::new(ctx, traces, self.rank, emergency);
        let outcome = pool.fix(&mut fctx, seg, object);
        let greyed = std::mem::take(&mut fctx.greyed);
        for id in greyed {
            grey_segment(self.store, self.tracer, traces, id)?;
        }
        outcome
    }

    /// Scan a grey segment for the traces of this scan state, which must be the traces the
    /// segment is grey for. The segment stays black for them unless a fix greys it again.
    pub fn scan_segment(&mut self, id: SegmentId) -> Result<ScanOutcome> {
        let seg = self.store.seg_mut(id)?;
        debug_assert!(self.traces.is_subset(seg.grey));
        seg.grey = seg.grey.diff(self.traces);
        let (pool_id, old_summary, size) = (seg.pool, seg.summary, seg.size);

        self.store.expose(id)?;
        let scanned = self.scan_exposed(id, pool_id);
        let covered = self.store.cover(id);
        let outcome = match scanned {
            Ok(outcome) => outcome,
            Err(e) => {
                // Slots fixed before the failure may already refer to new zones.
                self.store.set_summary(id, old_summary.union(self.fixed_summary))?;
                return Err(e);
            }
        };
        covered?;

        let summary = if outcome.total {
            self.fixed_summary
        } else {
            old_summary.union(self.fixed_summary)
        };
        self.store.set_summary(id, summary)?;
        // Only flipped traces need the read barrier.
        let still_grey = self.store.seg(id)?.grey.inter(self.tracer.flipped());
        if still_grey.is_empty() {
            self.store.lower(id, AccessSet::READ)?;
        }
        self.stats.segments_scanned += 1;
        self.stats.scanned_bytes += outcome.scanned_bytes.min(size);
        trace!(
            "scanned {} for {:?} total={} summary {} -> {}",
            id,
            self.traces,
            outcome.total,
            old_summary,
            summary
        );
        Ok(outcome)
    }

    fn scan_exposed(&mut self, id: SegmentId, pool_id: PoolId) -> Result<ScanOutcome> {
        let pool = pool_mut(self.pools, pool_id)?;
        let mut slots: Vec<Address> = vec![];
        let outcome = {
            let mut ctx = PoolContext::new(self.store, pool_id, pool.rank(), pool.is_collected());
            pool.scan_segment(&mut ctx, id, &mut |slot: Address| slots.push(slot))?
        };
        self.fixed_summary = ZoneSet::EMPTY;
        for slot in slots {
            let object = ObjectReference::from_raw_address(unsafe { slot.load::<Address>() });
            let fixed = self.fix(object)?;
            if fixed != object {
                unsafe { slot.store(fixed.to_raw_address()) };
            }
        }
        Ok(outcome)
    }
}

/// Make `id` grey for `traces`, queueing it on each trace it was not already grey for. Segments
/// without references are never grey.
pub(crate) fn grey_segment(
    store: &mut SegmentStore,
    tracer: &mut Tracer,
    traces: TraceSet,
    id: SegmentId,
) -> Result<()> {
    let seg = store.seg_mut(id)?;
    let Some(rank) = seg.rank else {
        return Ok(());
    };
    let new = traces.diff(seg.grey);
    if new.is_empty() {
        return Ok(());
    }
    seg.grey = seg.grey.union(new);
    for t in new.iter() {
        tracer.get_mut(t)?.gray[rank].push_back(id);
    }
    if !new.inter(tracer.flipped()).is_empty() {
        store.raise(id, AccessSet::READ)?;
    }
    Ok(())
}

pub(crate) fn pool_mut(
    pools: &mut PoolTable,
    id: PoolId,
) -> Result<&mut Box<dyn Pool>> {
    pools
        .get_mut(id.index())
        .and_then(|p| p.as_mut())
        .ok_or_else(|| ArenaError::consistency(format!("{} is not a live pool", id)))
}

pub(crate) fn pool_ref(
    pools: &PoolTable,
    id: PoolId,
) -> Result<&dyn Pool> {
    pools
        .get(id.index())
        .and_then(|p| p.as_deref())
        .ok_or_else(|| ArenaError::consistency(format!("{} is not a live pool", id)))
}
