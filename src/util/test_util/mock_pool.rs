use crate::arena::segment::SegmentId;
use crate::arena::store::SegmentStore;
use crate::policy::{
    FixContext, FixOutcome, Pool, PoolContext, Rank, ReclaimOutcome, ScanOutcome,
};
use crate::trace::TraceId;
use crate::util::constants::BYTES_IN_WORD;
use crate::util::conversions::raw_align_up;
use crate::util::error::{ArenaError, Result};
use crate::util::test_util::mock_format::MockFormat;
use crate::util::{Address, ObjectReference};
use crate::vm::{Format, SlotVisitor};
use std::collections::{BTreeMap, HashMap, HashSet};

/// How a [`MockPool`] preserves objects.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MockPoolKind {
    /// Mark objects in place and pad the dead ones.
    Mark,
    /// Copy objects to fresh segments. Referents of ambiguous references are nailed in place.
    Copy,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MockPoolStats {
    pub allocs: usize,
    pub whitened: usize,
    pub copied: usize,
    pub nailed: usize,
    /// Every reclaim call, in order.
    pub reclaims: Vec<(TraceId, SegmentId, Address)>,
    pub reclaimed_objects: usize,
    pub freed_segments: usize,
    pub failed: usize,
}

struct SegState {
    cursor: Address,
    limit: Address,
    /// Objects in address order.
    objects: Vec<ObjectReference>,
    /// Objects preserved in place by the current trace.
    marked: HashSet<ObjectReference>,
    /// Marked objects that have not been scanned yet.
    pending: Vec<ObjectReference>,
    forwarded: HashMap<ObjectReference, ObjectReference>,
}

impl SegState {
    fn room(&self) -> usize {
        self.limit - self.cursor
    }
}

/// A pool of [`MockFormat`] objects.
///
/// Marks are kept per segment, not per trace. A segment may be condemned by one trace at a
/// time, and scanning a condemned segment only reports the objects marked since its last scan.
/// Tests that run several traces at once keep their segments and references apart.
pub struct MockPool {
    kind: MockPoolKind,
    rank: Option<Rank>,
    segment_bytes: usize,
    segs: BTreeMap<SegmentId, SegState>,
    alloc_seg: Option<SegmentId>,
    copy_seg: Option<SegmentId>,
    pub collected: bool,
    /// Refuse to condemn segments.
    pub refuse_whiten: bool,
    /// In emergency mode, nail objects instead of failing.
    pub nail_in_emergency: bool,
    pub stats: MockPoolStats,
}

impl MockPool {
    pub const DEFAULT_SEGMENT_BYTES: usize = 16 * 1024;

    pub fn new(kind: MockPoolKind, rank: Option<Rank>) -> Self {
        MockPool {
            kind,
            rank,
            segment_bytes: Self::DEFAULT_SEGMENT_BYTES,
            segs: BTreeMap::new(),
            alloc_seg: None,
            copy_seg: None,
            collected: true,
            refuse_whiten: false,
            nail_in_emergency: true,
            stats: MockPoolStats::default(),
        }
    }

    pub fn with_segment_bytes(mut self, bytes: usize) -> Self {
        self.segment_bytes = bytes;
        self
    }

    pub fn kind(&self) -> MockPoolKind {
        self.kind
    }

    pub fn segments(&self) -> Vec<SegmentId> {
        self.segs.keys().copied().collect()
    }

    pub fn objects(&self, seg: SegmentId) -> Vec<ObjectReference> {
        self.segs
            .get(&seg)
            .map(|s| s.objects.clone())
            .unwrap_or_default()
    }

    pub fn object_count(&self) -> usize {
        self.segs.values().map(|s| s.objects.len()).sum()
    }

    pub fn contains(&self, object: ObjectReference) -> bool {
        self.segs
            .values()
            .any(|s| s.objects.binary_search(&object).is_ok())
    }

    fn state(&self, seg: SegmentId) -> Result<&SegState> {
        self.segs
            .get(&seg)
            .ok_or_else(|| ArenaError::consistency(format!("{} is not in the mock pool", seg)))
    }

    fn state_mut(&mut self, seg: SegmentId) -> Result<&mut SegState> {
        self.segs
            .get_mut(&seg)
            .ok_or_else(|| ArenaError::consistency(format!("{} is not in the mock pool", seg)))
    }

    fn new_segment(&mut self, ctx: &mut PoolContext, size: usize, gen: usize) -> Result<SegmentId> {
        let id = ctx.segment_alloc(self.segment_bytes.max(size), gen)?;
        let seg = ctx
            .segment(id)
            .ok_or_else(|| ArenaError::consistency("new segment vanished"))?;
        let (cursor, limit) = (seg.base(), seg.limit());
        self.segs.insert(
            id,
            SegState {
                cursor,
                limit,
                objects: vec![],
                marked: HashSet::new(),
                pending: vec![],
                forwarded: HashMap::new(),
            },
        );
        Ok(id)
    }

    /// A segment with room for `size` bytes that no trace has condemned.
    fn usable(&self, ctx: &PoolContext, seg: Option<SegmentId>, size: usize) -> Option<SegmentId> {
        let seg = seg?;
        let white = ctx.segment(seg)?.white();
        let room = self.segs.get(&seg)?.room();
        (white.is_empty() && room >= size).then_some(seg)
    }

    fn bump(&mut self, seg: SegmentId, size: usize) -> Result<Address> {
        let state = self.state_mut(seg)?;
        let addr = state.cursor;
        state.cursor += size;
        Ok(addr)
    }

    fn copy_alloc(&mut self, ctx: &mut PoolContext, size: usize, gen: usize) -> Result<SegmentId> {
        let seg = match self.usable(ctx, self.copy_seg, size) {
            Some(seg) if ctx.segment(seg).is_some_and(|s| s.generation() == gen) => seg,
            _ => {
                let seg = self.new_segment(ctx, size, gen)?;
                self.copy_seg = Some(seg);
                seg
            }
        };
        Ok(seg)
    }

    fn nail(
        &mut self,
        ctx: &mut FixContext,
        seg: SegmentId,
        object: ObjectReference,
    ) -> Result<()> {
        let state = self.state_mut(seg)?;
        if state.marked.insert(object) {
            state.pending.push(object);
            self.stats.nailed += 1;
            ctx.grey(seg);
        }
        Ok(())
    }

    fn copy(
        &mut self,
        ctx: &mut FixContext,
        seg: SegmentId,
        object: ObjectReference,
    ) -> Result<ObjectReference> {
        ctx.expose(seg)?;
        let size = MockFormat::size(object);
        let gen = match ctx.segment(seg) {
            Some(s) => ctx.next_generation(s),
            None => 0,
        };
        let dest = match self.copy_alloc(ctx.pool_context(), size, gen) {
            Ok(dest) => dest,
            Err(e) => {
                ctx.cover(seg)?;
                return Err(e);
            }
        };
        let to = self.bump(dest, size)?;
        ctx.expose(dest)?;
        let new = MockFormat.copy(object, to);
        MockFormat.forward(object, new);
        ctx.cover(dest)?;
        ctx.cover(seg)?;

        self.state_mut(seg)?.forwarded.insert(object, new);
        self.state_mut(dest)?.objects.push(new);
        self.stats.copied += 1;
        ctx.grey(dest);
        Ok(new)
    }
}

impl Pool for MockPool {
    fn name(&self) -> &str {
        match self.kind {
            MockPoolKind::Mark => "mock mark",
            MockPoolKind::Copy => "mock copy",
        }
    }

    fn rank(&self) -> Option<Rank> {
        self.rank
    }

    fn is_collected(&self) -> bool {
        self.collected
    }

    fn may_move(&self) -> bool {
        self.kind == MockPoolKind::Copy
    }

    fn alloc(&mut self, ctx: &mut PoolContext, size: usize) -> Result<Address> {
        let size = raw_align_up(size, BYTES_IN_WORD).max(MockFormat::object_size(0));
        let seg = match self.usable(ctx, self.alloc_seg, size) {
            Some(seg) => seg,
            None => {
                let seg = self.new_segment(ctx, size, 0)?;
                self.alloc_seg = Some(seg);
                seg
            }
        };
        let addr = self.bump(seg, size)?;
        ctx.expose(seg)?;
        let object = MockFormat::init(addr, size);
        ctx.cover(seg)?;
        self.state_mut(seg)?.objects.push(object);
        self.stats.allocs += 1;
        Ok(addr)
    }

    fn whiten(&mut self, _ctx: &mut PoolContext, seg: SegmentId, _trace: TraceId) -> Result<()> {
        if self.refuse_whiten {
            return Err(ArenaError::resource("mock pool refuses to condemn"));
        }
        let state = self.state_mut(seg)?;
        state.marked.clear();
        state.pending.clear();
        if self.alloc_seg == Some(seg) {
            self.alloc_seg = None;
        }
        if self.copy_seg == Some(seg) {
            self.copy_seg = None;
        }
        self.stats.whitened += 1;
        Ok(())
    }

    fn scan_segment(
        &mut self,
        ctx: &mut PoolContext,
        seg: SegmentId,
        visitor: &mut dyn SlotVisitor,
    ) -> Result<ScanOutcome> {
        let white = ctx.segment(seg).is_some_and(|s| !s.white().is_empty());
        let state = self.state_mut(seg)?;
        let (objects, total) = if white {
            (std::mem::take(&mut state.pending), false)
        } else {
            (state.objects.clone(), true)
        };
        let mut scanned_bytes = 0;
        for object in objects {
            MockFormat.scan(object, visitor);
            scanned_bytes += MockFormat::size(object);
        }
        Ok(ScanOutcome {
            total,
            scanned_bytes,
        })
    }

    fn fix(
        &mut self,
        ctx: &mut FixContext,
        seg: SegmentId,
        object: ObjectReference,
    ) -> Result<FixOutcome> {
        let (kind, nail_in_emergency) = (self.kind, self.nail_in_emergency);
        let state = self.state_mut(seg)?;
        if state.objects.binary_search(&object).is_err() {
            // Not the start of an object. Only ambiguous references may do that.
            return Ok(FixOutcome::Unchanged);
        }
        match kind {
            MockPoolKind::Mark => {
                if state.marked.insert(object) {
                    state.pending.push(object);
                    ctx.grey(seg);
                }
                Ok(FixOutcome::Unchanged)
            }
            MockPoolKind::Copy => {
                if let Some(&to) = state.forwarded.get(&object) {
                    return Ok(FixOutcome::Moved(to));
                }
                if state.marked.contains(&object) {
                    return Ok(FixOutcome::Unchanged);
                }
                if ctx.may_move() {
                    return self.copy(ctx, seg, object).map(FixOutcome::Moved);
                }
                if ctx.rank() != Rank::Ambig && !nail_in_emergency {
                    return Err(ArenaError::out_of_memory(
                        "cannot preserve without copying",
                    ));
                }
                self.nail(ctx, seg, object)?;
                Ok(FixOutcome::Unchanged)
            }
        }
    }

    fn is_preserved(
        &self,
        _store: &SegmentStore,
        seg: SegmentId,
        object: ObjectReference,
    ) -> Option<ObjectReference> {
        let state = self.segs.get(&seg)?;
        if state.objects.binary_search(&object).is_err() {
            return Some(object);
        }
        if let Some(&to) = state.forwarded.get(&object) {
            return Some(to);
        }
        state.marked.contains(&object).then_some(object)
    }

    fn reclaim_segment(
        &mut self,
        ctx: &mut PoolContext,
        seg: SegmentId,
        trace: TraceId,
    ) -> Result<ReclaimOutcome> {
        let base = ctx
            .segment(seg)
            .map(|s| s.base())
            .unwrap_or(Address::ZERO);
        self.stats.reclaims.push((trace, seg, base));
        let state = self.state(seg)?;
        let (live, dead): (Vec<_>, Vec<_>) = state
            .objects
            .iter()
            .copied()
            .partition(|o| state.marked.contains(o));
        self.stats.reclaimed_objects += dead.len();
        if live.is_empty() {
            return Ok(ReclaimOutcome::Empty);
        }
        ctx.expose(seg)?;
        for object in dead {
            MockFormat.pad(object.to_raw_address(), MockFormat::size(object));
        }
        let preserved_bytes = live.iter().map(|&o| MockFormat::size(o)).sum();
        ctx.cover(seg)?;
        let state = self.state_mut(seg)?;
        state.objects = live;
        state.marked.clear();
        state.pending.clear();
        state.forwarded.clear();
        Ok(ReclaimOutcome::Live { preserved_bytes })
    }

    fn trace_failed(&mut self, _ctx: &mut PoolContext, seg: SegmentId, _trace: TraceId) {
        if let Some(state) = self.segs.get_mut(&seg) {
            state.marked.clear();
            state.pending.clear();
        }
        self.stats.failed += 1;
    }

    fn segment_freed(&mut self, seg: SegmentId) {
        self.segs.remove(&seg);
        if self.alloc_seg == Some(seg) {
            self.alloc_seg = None;
        }
        if self.copy_seg == Some(seg) {
            self.copy_seg = None;
        }
        self.stats.freed_segments += 1;
    }
}
