//! Incremental tracing.
//!
//! A trace condemns a set of segments (they become white), greys every other segment whose
//! summary says it may refer into the condemned zones, then flips: it scans the roots and
//! read-protects its grey segments. From then on the mutator can only obtain references to
//! objects the trace has preserved. Grey segments are scanned in bounded steps until none are
//! left, and the pools reclaim what is still white.

mod scan;
#[allow(clippy::module_inception)]
mod trace;
mod trace_set;

pub(crate) use self::scan::{grey_segment, pool_mut, ScanState};
pub use self::trace::{Trace, TraceReport, TraceState, TraceStats};
pub use self::trace_set::{TraceId, TraceSet};

use crate::arena::segment::SegmentId;
use crate::arena::Arena;
use crate::policy::{PoolContext, Rank, ReclaimOutcome};
use crate::util::constants::{TRACE_HISTORY_LENGTH, TRACE_MAX};
use crate::util::error::{ensure_consistent, ArenaError, Result};
use crate::util::log::{debug, info, warn};
use crate::util::{ObjectReference, ZoneSet};
use crate::vm::AccessSet;
use std::collections::VecDeque;

/// The trace slots of an arena.
pub(crate) struct Tracer {
    traces: Vec<Option<Trace>>,
    busy: TraceSet,
    flipped: TraceSet,
    max: usize,
    history: VecDeque<TraceReport>,
}

impl Tracer {
    pub fn new(max: usize) -> Self {
        Tracer {
            traces: (0..TRACE_MAX).map(|_| None).collect(),
            busy: TraceSet::EMPTY,
            flipped: TraceSet::EMPTY,
            max: max.min(TRACE_MAX),
            history: VecDeque::with_capacity(TRACE_HISTORY_LENGTH),
        }
    }

    pub fn busy(&self) -> TraceSet {
        self.busy
    }

    /// Traces that have scanned their roots.
    pub fn flipped(&self) -> TraceSet {
        self.flipped
    }

    pub fn create(&mut self) -> Result<TraceId> {
        if self.busy.len() >= self.max {
            return Err(ArenaError::resource(format!(
                "too many traces: {} already running",
                self.max
            )));
        }
        let index = (0..TRACE_MAX)
            .find(|&i| self.traces[i].is_none())
            .ok_or_else(|| ArenaError::resource("no free trace slot"))?;
        let id = TraceId::new(index);
        self.traces[index] = Some(Trace::new(id));
        self.busy = self.busy.add(id);
        Ok(id)
    }

    pub fn get(&self, id: TraceId) -> Result<&Trace> {
        self.traces[id.index()]
            .as_ref()
            .ok_or_else(|| ArenaError::consistency(format!("{} is not running", id)))
    }

    pub fn get_mut(&mut self, id: TraceId) -> Result<&mut Trace> {
        self.traces[id.index()]
            .as_mut()
            .ok_or_else(|| ArenaError::consistency(format!("{} is not running", id)))
    }

    pub fn set_flipped(&mut self, id: TraceId) {
        self.flipped = self.flipped.add(id);
    }

    pub fn white_zones(&self, traces: TraceSet) -> ZoneSet {
        traces
            .iter()
            .filter_map(|t| self.traces[t.index()].as_ref())
            .fold(ZoneSet::EMPTY, |acc, t| acc.union(t.white))
    }

    pub fn any_emergency(&self, traces: TraceSet) -> bool {
        traces
            .iter()
            .filter_map(|t| self.traces[t.index()].as_ref())
            .any(|t| t.emergency)
    }

    pub fn set_emergency(&mut self, traces: TraceSet) {
        for t in traces.iter() {
            if let Some(trace) = self.traces[t.index()].as_mut() {
                trace.emergency = true;
            }
        }
    }

    /// Free the slot of a trace that reached `Finished` or `Failed` and keep its report.
    fn retire(&mut self, id: TraceId, failure: Option<String>) -> Result<TraceReport> {
        let trace = self.traces[id.index()]
            .take()
            .ok_or_else(|| ArenaError::consistency(format!("{} is not running", id)))?;
        debug_assert!(trace.state.is_done());
        self.busy = self.busy.del(id);
        self.flipped = self.flipped.del(id);
        let report = trace.report(failure);
        if self.history.len() == TRACE_HISTORY_LENGTH {
            self.history.pop_front();
        }
        self.history.push_back(report.clone());
        Ok(report)
    }

    pub fn history(&self) -> impl Iterator<Item = &TraceReport> + '_ {
        self.history.iter()
    }
}

impl Arena {
    /// Start a new trace. At most `max_traces` traces run at once.
    pub fn trace_create(&mut self) -> Result<TraceId> {
        let id = self.tracer.create()?;
        debug!("Created {}", id);
        Ok(id)
    }

    /// Condemn segments for a trace that has not started yet.
    ///
    /// A segment whose pool refuses to whiten it with a resource error is left out. If nothing
    /// could be condemned, the trace is destroyed and the error is returned.
    pub fn trace_condemn(&mut self, id: TraceId, segs: &[SegmentId]) -> Result<()> {
        let state = self.tracer.get(id)?.state;
        ensure_consistent!(
            matches!(state, TraceState::Unstarted | TraceState::Condemning),
            "cannot condemn for {} in state {}",
            id,
            state
        );
        let mut last_refusal = None;
        for &seg_id in segs {
            let seg = self.store.seg(seg_id)?;
            if seg.white.contains(id) {
                continue;
            }
            let (pool_id, zones, size) = (seg.pool, seg.zones, seg.size);
            let pool = pool_mut(&mut self.pools, pool_id)?;
            ensure_consistent!(
                pool.is_collected(),
                "{} belongs to {} which is not collected",
                seg_id,
                pool.name()
            );
            let may_move = pool.may_move();
            let mut ctx = PoolContext::new(&mut self.store, pool_id, pool.rank(), true);
            match pool.whiten(&mut ctx, seg_id, id) {
                Ok(()) => {}
                Err(e @ ArenaError::Resource(_)) => {
                    warn!("{} not condemned for {}: {}", seg_id, id, e);
                    last_refusal = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
            let seg = self.store.seg_mut(seg_id)?;
            seg.white = seg.white.add(id);
            let trace = self.tracer.get_mut(id)?;
            trace.white = trace.white.union(zones);
            if may_move {
                trace.may_move = trace.may_move.union(zones);
            }
            trace.condemned.push(seg_id);
            trace.stats.condemned_segments += 1;
            trace.stats.condemned_bytes += size;
        }
        let trace = self.tracer.get_mut(id)?;
        if trace.condemned.is_empty() {
            trace.state = TraceState::Failed;
            let err = last_refusal.unwrap_or_else(|| {
                ArenaError::resource(format!("{} condemned no segments", id))
            });
            self.tracer.retire(id, Some(err.to_string()))?;
            return Err(err);
        }
        trace.state = TraceState::Condemning;
        Ok(())
    }

    /// Grey the segments that may refer to condemned objects, then flip.
    pub fn trace_start(&mut self, id: TraceId) -> Result<()> {
        self.enter()?;
        let result = self.trace_start_inner(id);
        self.leave_with(result)
    }

    pub(crate) fn trace_start_inner(&mut self, id: TraceId) -> Result<()> {
        let trace = self.tracer.get_mut(id)?;
        ensure_consistent!(
            trace.state == TraceState::Condemning,
            "cannot start {} in state {}",
            id,
            trace.state
        );
        let white = trace.white;
        trace.summary = self.store.zone_summary();
        let single = TraceSet::single(id);
        let candidates: Vec<SegmentId> = self
            .store
            .segments()
            .filter(|s| s.rank.is_some() && !s.white.contains(id) && s.summary.intersects(white))
            .map(|s| s.id)
            .collect();
        for seg in candidates {
            grey_segment(&mut self.store, &mut self.tracer, single, seg)?;
        }
        info!(
            "{} started: {} segments condemned ({} bytes), white zones {}",
            id,
            self.tracer.get(id)?.condemned.len(),
            self.tracer.get(id)?.stats.condemned_bytes,
            white
        );

        let trace = self.tracer.get_mut(id)?;
        trace.state = TraceState::ScanningRoots;
        let may_move = trace.may_move;
        self.tracer.set_flipped(id);
        // Roots may be fixed to new addresses from here on.
        if !may_move.is_empty() {
            self.moved.age(may_move);
        }
        match self.scan_roots(id) {
            Ok(()) => {}
            Err(e) if !e.is_fatal() => return self.fail_trace(id, &e),
            Err(e) => return Err(e),
        }
        let grey: Vec<SegmentId> = self
            .store
            .segments()
            .filter(|s| s.grey.contains(id))
            .map(|s| s.id)
            .collect();
        for seg in grey {
            self.store.raise(seg, AccessSet::READ)?;
        }
        let trace = self.tracer.get_mut(id)?;
        trace.roots_scanned = true;
        trace.state = TraceState::ScanningSegments;
        Ok(())
    }

    /// Scan every root for a trace, ambiguous roots first.
    fn scan_roots(&mut self, id: TraceId) -> Result<()> {
        let Arena {
            store,
            pools,
            tracer,
            roots,
            ..
        } = self;
        let mut order: Vec<usize> = (0..roots.len()).filter(|&i| roots[i].is_some()).collect();
        order.sort_by_key(|&i| roots[i].as_ref().map(|r| r.rank));

        let mut totals = TraceStats::default();
        let mut failure = None;
        for index in order {
            let Some(entry) = roots[index].as_mut() else {
                continue;
            };
            let mut ss = ScanState::new(store, pools, tracer, TraceSet::single(id), entry.rank);
            entry.root.scan(&mut |object: ObjectReference| {
                if failure.is_some() {
                    return object;
                }
                match ss.fix(object) {
                    Ok(fixed) => fixed,
                    Err(e) => {
                        failure = Some(e);
                        object
                    }
                }
            });
            totals.add_fix_counts(&ss.stats);
            totals.roots_scanned += 1;
            if failure.is_some() {
                break;
            }
        }
        let trace = tracer.get_mut(id)?;
        trace.stats.add_fix_counts(&totals);
        trace.stats.roots_scanned += totals.roots_scanned;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Scan grey segments of a trace until about `budget` bytes have been scanned. At least one
    /// segment is scanned even if it is larger than the budget. When no grey segment is left,
    /// the trace reclaims and finishes. Returns an estimate of the bytes left to scan.
    pub fn trace_step(&mut self, id: TraceId, budget: usize) -> Result<usize> {
        self.enter()?;
        let result = self.trace_step_inner(id, budget);
        self.leave_with(result)
    }

    pub(crate) fn trace_step_inner(&mut self, id: TraceId, budget: usize) -> Result<usize> {
        let mut done = 0;
        self.trace_step_shared(id, budget, &mut done)
    }

    /// Like [`Self::trace_step_inner`], with `done` bytes of the budget already spent, possibly
    /// by other traces. `done` is updated with the bytes this step scans.
    pub(crate) fn trace_step_shared(
        &mut self,
        id: TraceId,
        budget: usize,
        done: &mut usize,
    ) -> Result<usize> {
        let trace = self.tracer.get_mut(id)?;
        ensure_consistent!(
            trace.state == TraceState::ScanningSegments,
            "cannot step {} in state {}",
            id,
            trace.state
        );
        trace.stats.quanta += 1;
        loop {
            let Some(seg_id) = self.tracer.get_mut(id)?.pop_gray() else {
                self.reclaim(id)?;
                return Ok(0);
            };
            let Some(seg) = self.store.segment(seg_id) else {
                continue;
            };
            // Entries of segments scanned out of turn are stale.
            if !seg.grey.contains(id) {
                continue;
            }
            let size = seg.size;
            let rank = seg.rank.unwrap_or(Rank::Exact);
            if *done > 0 && *done + size > budget {
                self.tracer.get_mut(id)?.unpop_gray(rank, seg_id);
                break;
            }
            let traces = seg.grey.inter(self.tracer.flipped());
            self.scan_for(seg_id, traces, rank)?;
            *done += size;
            if !self.tracer.busy().contains(id) {
                // The trace failed.
                return Ok(0);
            }
        }
        Ok(self.remaining_work(id))
    }

    /// Scan a segment for `traces`. Traces that run out of resources on the way fail.
    pub(crate) fn scan_for(&mut self, seg: SegmentId, traces: TraceSet, rank: Rank) -> Result<()> {
        let Arena {
            store,
            pools,
            tracer,
            ..
        } = self;
        let mut ss = ScanState::new(store, pools, tracer, traces, rank);
        let result = ss.scan_segment(seg);
        let stats = ss.stats;
        for t in traces.iter() {
            let trace = self.tracer.get_mut(t)?;
            trace.stats.segments_scanned += stats.segments_scanned;
            trace.stats.scanned_bytes += stats.scanned_bytes;
            trace.stats.add_fix_counts(&stats);
        }
        match result {
            Ok(_) => Ok(()),
            Err(e) if !e.is_fatal() => {
                for t in traces.iter() {
                    self.fail_trace(t, &e)?;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn remaining_work(&self, id: TraceId) -> usize {
        let Ok(trace) = self.tracer.get(id) else {
            return 0;
        };
        trace
            .gray
            .values()
            .flatten()
            .filter_map(|&s| self.store.segment(s))
            .filter(|s| s.grey.contains(id))
            .map(|s| s.size)
            .sum()
    }

    /// Run a trace to completion.
    pub fn trace_finish(&mut self, id: TraceId) -> Result<TraceReport> {
        self.enter()?;
        let result = self.trace_finish_inner(id);
        self.leave_with(result)
    }

    pub(crate) fn trace_finish_inner(&mut self, id: TraceId) -> Result<TraceReport> {
        while self.tracer.busy().contains(id) {
            match self.tracer.get(id)?.state {
                TraceState::Condemning => self.trace_start_inner(id)?,
                TraceState::ScanningSegments => {
                    self.trace_step_inner(id, usize::MAX)?;
                }
                state => {
                    return Err(ArenaError::consistency(format!(
                        "cannot finish {} in state {}",
                        id, state
                    )))
                }
            }
        }
        self.tracer
            .history()
            .filter(|r| r.id == id)
            .last()
            .cloned()
            .ok_or_else(|| ArenaError::consistency(format!("no report for {}", id)))
    }

    /// Reclaim the condemned segments of a trace that reached its fixed point.
    fn reclaim(&mut self, id: TraceId) -> Result<()> {
        let trace = self.tracer.get_mut(id)?;
        trace.state = TraceState::Reclaiming;
        let condemned = std::mem::take(&mut trace.condemned);
        let mut stats = TraceStats::default();
        for seg_id in condemned.iter().copied() {
            let Some(seg) = self.store.segment(seg_id) else {
                continue;
            };
            if !seg.white.contains(id) {
                continue;
            }
            let (pool_id, size) = (seg.pool, seg.size);
            let pool = pool_mut(&mut self.pools, pool_id)?;
            let mut ctx =
                PoolContext::new(&mut self.store, pool_id, pool.rank(), pool.is_collected());
            let outcome = pool.reclaim_segment(&mut ctx, seg_id, id)?;
            let seg = self.store.seg_mut(seg_id)?;
            seg.white = seg.white.del(id);
            let (coloured, next_gen) = (seg.is_coloured(), seg.generation + 1);
            match outcome {
                ReclaimOutcome::Empty if !coloured => {
                    self.store.segment_free(seg_id)?;
                    pool_mut(&mut self.pools, pool_id)?.segment_freed(seg_id);
                    stats.reclaimed_segments += 1;
                    stats.reclaimed_bytes += size;
                }
                ReclaimOutcome::Empty => {}
                ReclaimOutcome::Live { preserved_bytes } => {
                    stats.preserved_bytes += preserved_bytes;
                    self.store.set_generation(seg_id, next_gen)?;
                }
            }
        }
        let trace = self.tracer.get_mut(id)?;
        trace.condemned = condemned;
        trace.stats.reclaimed_segments += stats.reclaimed_segments;
        trace.stats.reclaimed_bytes += stats.reclaimed_bytes;
        trace.stats.preserved_bytes += stats.preserved_bytes;
        trace.state = TraceState::Finished;
        let report = self.tracer.retire(id, None)?;
        info!(
            "{} finished: scanned {} bytes in {} segments, reclaimed {} bytes, preserved {} bytes",
            id,
            report.stats.scanned_bytes,
            report.stats.segments_scanned,
            report.stats.reclaimed_bytes,
            report.stats.preserved_bytes
        );
        #[cfg(feature = "extreme_assertions")]
        self.verify()?;
        Ok(())
    }

    /// Abandon a trace. Every condemned segment is kept and every colour the trace holds is
    /// cleared.
    pub(crate) fn fail_trace(&mut self, id: TraceId, error: &ArenaError) -> Result<()> {
        info!("{} failed: {}", id, error);
        let trace = self.tracer.get_mut(id)?;
        trace.state = TraceState::Failed;
        let condemned = trace.condemned.clone();
        let others = self.tracer.flipped().del(id);

        let grey: Vec<SegmentId> = self
            .store
            .segments()
            .filter(|s| s.grey.contains(id))
            .map(|s| s.id)
            .collect();
        for seg_id in grey {
            let seg = self.store.seg_mut(seg_id)?;
            seg.grey = seg.grey.del(id);
            if seg.grey.inter(others).is_empty() {
                self.store.lower(seg_id, AccessSet::READ)?;
            }
        }
        for seg_id in condemned {
            let Some(seg) = self.store.table.get_mut(seg_id) else {
                continue;
            };
            if !seg.white.contains(id) {
                continue;
            }
            seg.white = seg.white.del(id);
            let pool_id = seg.pool;
            let pool = pool_mut(&mut self.pools, pool_id)?;
            let mut ctx =
                PoolContext::new(&mut self.store, pool_id, pool.rank(), pool.is_collected());
            pool.trace_failed(&mut ctx, seg_id, id);
        }
        self.tracer.retire(id, Some(error.to_string()))?;
        Ok(())
    }

    pub fn trace(&self, id: TraceId) -> Option<&Trace> {
        self.tracer.get(id).ok()
    }

    /// Traces that have been created and have not finished or failed.
    pub fn busy_traces(&self) -> TraceSet {
        self.tracer.busy()
    }

    /// Reports of the most recently retired traces, oldest first.
    pub fn trace_history(&self) -> impl Iterator<Item = &TraceReport> + '_ {
        self.tracer.history()
    }

    pub fn last_trace_report(&self) -> Option<&TraceReport> {
        self.tracer.history().last()
    }
}
