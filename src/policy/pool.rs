use crate::arena::segment::{Segment, SegmentId};
use crate::arena::store::SegmentStore;
use crate::policy::Rank;
use crate::trace::{TraceId, TraceSet};
use crate::util::error::Result;
use crate::util::{Address, ObjectReference};
use crate::vm::SlotVisitor;
use delegate::delegate;
use downcast_rs::{impl_downcast, Downcast};
use std::fmt;

/// The handle of a pool registered with an arena. Handles are never reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(usize);

impl PoolId {
    pub(crate) const fn new(index: usize) -> Self {
        PoolId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// What a pool did when asked to scan a segment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Every object in the segment was scanned, so the references reported are all the
    /// references the segment holds.
    pub total: bool,
    /// Bytes of objects scanned.
    pub scanned_bytes: usize,
}

/// The result of fixing one reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FixOutcome {
    /// The referent stays where it is.
    Unchanged,
    /// The referent was moved. The slot must be updated.
    Moved(ObjectReference),
}

/// What is left of a condemned segment after reclamation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// Nothing in the segment survived. The arena frees it.
    Empty,
    /// Some objects survived.
    Live { preserved_bytes: usize },
}

/// An allocation policy. Pools own segments, allocate objects in them, and take part in
/// tracing through the hooks below.
///
/// A pool only touches segment memory between [`PoolContext::expose`] and
/// [`PoolContext::cover`], since the shield may protect any segment at any time a trace is
/// running. Segment memory passed to [`Pool::scan_segment`] is already exposed.
pub trait Pool: Downcast + Send {
    fn name(&self) -> &str;

    /// The rank of the references in this pool's objects, or `None` if they hold no references.
    fn rank(&self) -> Option<Rank>;

    /// Can the segments of this pool be condemned?
    fn is_collected(&self) -> bool {
        true
    }

    /// May fixing a reference move an object of this pool?
    fn may_move(&self) -> bool {
        false
    }

    /// The segment size to request for `size` bytes of objects. The arena rounds the result up
    /// to its page granularity.
    fn segment_size_class(&self, size: usize) -> usize {
        size
    }

    /// Allocate `size` bytes for an object.
    fn alloc(&mut self, ctx: &mut PoolContext, size: usize) -> Result<Address>;

    /// `trace` condemned `seg`. A pool that cannot condemn the segment now returns a resource
    /// error and the segment stays out of the trace.
    fn whiten(&mut self, ctx: &mut PoolContext, seg: SegmentId, trace: TraceId) -> Result<()> {
        let _ = (ctx, seg, trace);
        Ok(())
    }

    /// Report the reference slots of the objects in `seg` that still have to be scanned.
    fn scan_segment(
        &mut self,
        ctx: &mut PoolContext,
        seg: SegmentId,
        visitor: &mut dyn SlotVisitor,
    ) -> Result<ScanOutcome>;

    /// Preserve `object` in the white segment `seg` for the traces of `ctx`. A pool that keeps
    /// the object in place but now has to scan it calls [`FixContext::grey`] on the segment.
    fn fix(
        &mut self,
        ctx: &mut FixContext,
        seg: SegmentId,
        object: ObjectReference,
    ) -> Result<FixOutcome>;

    /// Where `object` in the white segment `seg` lives now, if it has been preserved.
    fn is_preserved(
        &self,
        store: &SegmentStore,
        seg: SegmentId,
        object: ObjectReference,
    ) -> Option<ObjectReference>;

    /// `trace` reached its fixed point. Reclaim the objects of `seg` that were not preserved.
    fn reclaim_segment(
        &mut self,
        ctx: &mut PoolContext,
        seg: SegmentId,
        trace: TraceId,
    ) -> Result<ReclaimOutcome>;

    /// `trace` failed and `seg` is no longer condemned. Objects preserved so far are already
    /// valid. The pool must forget the condemnation.
    fn trace_failed(&mut self, ctx: &mut PoolContext, seg: SegmentId, trace: TraceId) {
        let _ = (ctx, seg, trace);
    }

    /// The arena freed `seg`.
    fn segment_freed(&mut self, seg: SegmentId) {
        let _ = seg;
    }
}

impl_downcast!(Pool);

/// The arena as seen by a pool while it runs a hook.
pub struct PoolContext<'a> {
    pub(crate) store: &'a mut SegmentStore,
    pool: PoolId,
    rank: Option<Rank>,
    high: bool,
}

impl<'a> PoolContext<'a> {
    pub(crate) fn new(
        store: &'a mut SegmentStore,
        pool: PoolId,
        rank: Option<Rank>,
        collected: bool,
    ) -> Self {
        PoolContext {
            store,
            pool,
            rank,
            high: !collected,
        }
    }

    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// Allocate a segment for this pool in generation `gen`.
    pub fn segment_alloc(&mut self, size: usize, gen: usize) -> Result<SegmentId> {
        self.store
            .segment_alloc(self.pool, self.rank, size, gen, self.high)
    }

    /// The generation that survivors of `seg` are promoted to.
    pub fn next_generation(&self, seg: &Segment) -> usize {
        (seg.generation + 1).min(self.store.top_generation())
    }

    /// The store, for pools that need more than the operations forwarded here.
    pub fn store(&mut self) -> &mut SegmentStore {
        self.store
    }

    delegate! {
        to self.store {
            pub fn segment(&self, id: SegmentId) -> Option<&Segment>;
            pub fn segment_of(&self, addr: Address) -> Option<SegmentId>;
            pub fn segment_free(&mut self, id: SegmentId) -> Result<()>;
            pub fn expose(&mut self, id: SegmentId) -> Result<()>;
            pub fn cover(&mut self, id: SegmentId) -> Result<()>;
            pub fn grain(&self) -> usize;
            pub fn zone_shift(&self) -> usize;
        }
    }
}

/// The arena as seen by a pool while it fixes a reference.
pub struct FixContext<'a> {
    pub(crate) ctx: PoolContext<'a>,
    traces: TraceSet,
    rank: Rank,
    emergency: bool,
    pub(crate) greyed: Vec<SegmentId>,
}

impl<'a> FixContext<'a> {
    pub(crate) fn new(ctx: PoolContext<'a>, traces: TraceSet, rank: Rank, emergency: bool) -> Self {
        FixContext {
            ctx,
            traces,
            rank,
            emergency,
            greyed: vec![],
        }
    }

    /// The traces the reference is being fixed for.
    pub fn traces(&self) -> TraceSet {
        self.traces
    }

    /// The rank of the reference. Referents of ambiguous references must not move.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// In emergency mode the pool must preserve objects without allocating.
    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    /// May the pool move the referent?
    pub fn may_move(&self) -> bool {
        self.rank.allows_moving() && !self.emergency
    }

    /// Ask the traces to scan `seg`, because objects in it were preserved or copied into it.
    pub fn grey(&mut self, seg: SegmentId) {
        if !self.greyed.contains(&seg) {
            self.greyed.push(seg);
        }
    }

    pub fn pool_context(&mut self) -> &mut PoolContext<'a> {
        &mut self.ctx
    }

    delegate! {
        to self.ctx {
            pub fn pool(&self) -> PoolId;
            pub fn segment_alloc(&mut self, size: usize, gen: usize) -> Result<SegmentId>;
            pub fn next_generation(&self, seg: &Segment) -> usize;
            pub fn segment(&self, id: SegmentId) -> Option<&Segment>;
            pub fn segment_of(&self, addr: Address) -> Option<SegmentId>;
            pub fn expose(&mut self, id: SegmentId) -> Result<()>;
            pub fn cover(&mut self, id: SegmentId) -> Result<()>;
            pub fn grain(&self) -> usize;
        }
    }
}
