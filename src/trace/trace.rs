use crate::arena::segment::SegmentId;
use crate::policy::Rank;
use crate::trace::TraceId;
use crate::util::ZoneSet;
use enum_map::EnumMap;
use std::collections::VecDeque;
use strum_macros::Display;

/// The life cycle of a trace.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum TraceState {
    /// Created. Nothing condemned yet.
    Unstarted,
    /// Segments are being condemned.
    Condemning,
    /// Roots are being scanned.
    ScanningRoots,
    /// Grey segments are being scanned in bounded steps.
    ScanningSegments,
    /// The fixed point was reached and white segments are being reclaimed.
    Reclaiming,
    /// Reclamation finished.
    Finished,
    /// The trace could not finish. Every condemned segment was kept.
    Failed,
}

impl TraceState {
    pub fn is_done(self) -> bool {
        matches!(self, TraceState::Finished | TraceState::Failed)
    }
}

/// Counters of the work done by a trace.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceStats {
    pub condemned_segments: usize,
    pub condemned_bytes: usize,
    pub segments_scanned: usize,
    pub scanned_bytes: usize,
    pub roots_scanned: usize,
    pub fixes: usize,
    pub moved: usize,
    /// Weak references cleared.
    pub splatted: usize,
    pub reclaimed_segments: usize,
    pub reclaimed_bytes: usize,
    pub preserved_bytes: usize,
    /// Calls to `trace_step` that did work.
    pub quanta: usize,
}

impl TraceStats {
    pub(crate) fn add_fix_counts(&mut self, other: &TraceStats) {
        self.fixes += other.fixes;
        self.moved += other.moved;
        self.splatted += other.splatted;
    }
}

/// The record of a trace kept after it has finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceReport {
    pub id: TraceId,
    pub state: TraceState,
    /// The oldest generation condemned, or `None` for a full collection.
    pub generation: Option<usize>,
    pub emergency: bool,
    pub stats: TraceStats,
    /// Why the trace failed.
    pub failure: Option<String>,
}

/// One garbage collection, possibly running interleaved with others.
#[derive(Debug)]
pub struct Trace {
    pub(crate) id: TraceId,
    pub(crate) state: TraceState,
    /// Zones of the condemned segments.
    pub(crate) white: ZoneSet,
    /// Zones of the condemned segments of pools that may move objects.
    pub(crate) may_move: ZoneSet,
    /// The arena summary when the trace started.
    pub(crate) summary: ZoneSet,
    pub(crate) condemned: Vec<SegmentId>,
    pub(crate) gray: EnumMap<Rank, VecDeque<SegmentId>>,
    pub(crate) roots_scanned: bool,
    pub(crate) emergency: bool,
    pub(crate) generation: Option<usize>,
    pub(crate) stats: TraceStats,
}

impl Trace {
    pub(crate) fn new(id: TraceId) -> Self {
        Trace {
            id,
            state: TraceState::Unstarted,
            white: ZoneSet::EMPTY,
            may_move: ZoneSet::EMPTY,
            summary: ZoneSet::EMPTY,
            condemned: vec![],
            gray: EnumMap::default(),
            roots_scanned: false,
            emergency: false,
            generation: None,
            stats: TraceStats::default(),
        }
    }

    pub fn id(&self) -> TraceId {
        self.id
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    pub fn white(&self) -> ZoneSet {
        self.white
    }

    pub fn may_move(&self) -> ZoneSet {
        self.may_move
    }

    pub fn summary(&self) -> ZoneSet {
        self.summary
    }

    pub fn condemned(&self) -> &[SegmentId] {
        &self.condemned
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    pub fn generation(&self) -> Option<usize> {
        self.generation
    }

    pub fn stats(&self) -> &TraceStats {
        &self.stats
    }

    /// Grey segments queued at `rank`, including entries that were scanned out of turn.
    pub fn gray_len(&self, rank: Rank) -> usize {
        self.gray[rank].len()
    }

    /// The next grey segment to scan. Weak segments wait until no ambiguous or exact work is
    /// left.
    pub(crate) fn pop_gray(&mut self) -> Option<SegmentId> {
        if let Some(id) = self.gray[Rank::Ambig].pop_front() {
            return Some(id);
        }
        if let Some(id) = self.gray[Rank::Exact].pop_front() {
            return Some(id);
        }
        self.gray[Rank::Weak].pop_front()
    }

    pub(crate) fn unpop_gray(&mut self, rank: Rank, id: SegmentId) {
        self.gray[rank].push_front(id);
    }

    pub(crate) fn report(&self, failure: Option<String>) -> TraceReport {
        TraceReport {
            id: self.id,
            state: self.state,
            generation: self.generation,
            emergency: self.emergency,
            stats: self.stats,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::segment::SegmentTable;

    #[test]
    fn weak_band_waits_for_exact_work() {
        let table = SegmentTable::default();
        let a = table.next_id();
        let mut trace = Trace::new(TraceId::new(0));
        trace.gray[Rank::Weak].push_back(a);
        trace.gray[Rank::Exact].push_back(a);
        assert_eq!(trace.gray_len(Rank::Weak), 1);
        assert_eq!(trace.pop_gray(), Some(a));
        assert_eq!(trace.gray_len(Rank::Exact), 0);
        assert_eq!(trace.pop_gray(), Some(a));
        assert_eq!(trace.pop_gray(), None);
        assert_eq!(TraceState::ScanningRoots.to_string(), "ScanningRoots");
        assert!(TraceState::Failed.is_done());
    }
}
