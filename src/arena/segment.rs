use crate::policy::{PoolId, Rank};
use crate::trace::{TraceId, TraceSet};
use crate::util::{Address, ZoneSet};
use crate::vm::AccessSet;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// The handle of a segment. Handles are reused after a segment is freed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(u32);

impl SegmentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "seg#{}", self.0)
    }
}

/// A contiguous, page aligned span of committed memory owned by one pool.
#[derive(Debug)]
pub struct Segment {
    pub(crate) id: SegmentId,
    pub(crate) base: Address,
    pub(crate) size: usize,
    pub(crate) pool: PoolId,
    pub(crate) zones: ZoneSet,
    /// The rank of the references in the segment, or `None` if it holds no references.
    pub(crate) rank: Option<Rank>,
    pub(crate) generation: usize,
    /// Traces that condemned the segment.
    pub(crate) white: TraceSet,
    /// Traces that still have to scan the segment.
    pub(crate) grey: TraceSet,
    /// Zones that references in the segment may point into.
    pub(crate) summary: ZoneSet,
    /// Exposure depth. The segment is never protected while this is non-zero.
    pub(crate) depth: u8,
    /// Accesses currently denied by the hardware.
    pub(crate) pm: AccessSet,
    /// Accesses the barriers need denied whenever the segment is not exposed.
    pub(crate) sm: AccessSet,
    /// Is the segment in the shield cache?
    pub(crate) cached: bool,
}

impl Segment {
    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn limit(&self) -> Address {
        self.base + self.size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn range(&self) -> Range<Address> {
        self.base..self.limit()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.base <= addr && addr < self.limit()
    }

    pub fn pool(&self) -> PoolId {
        self.pool
    }

    pub fn zones(&self) -> ZoneSet {
        self.zones
    }

    pub fn rank(&self) -> Option<Rank> {
        self.rank
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn white(&self) -> TraceSet {
        self.white
    }

    pub fn grey(&self) -> TraceSet {
        self.grey
    }

    pub fn is_white_for(&self, trace: TraceId) -> bool {
        self.white.contains(trace)
    }

    /// A segment is black for a trace when it is neither white nor grey for it.
    pub fn is_black_for(&self, trace: TraceId) -> bool {
        !self.white.contains(trace) && !self.grey.contains(trace)
    }

    /// Does any trace hold a colour on this segment?
    pub fn is_coloured(&self) -> bool {
        !self.white.union(self.grey).is_empty()
    }

    pub fn summary(&self) -> ZoneSet {
        self.summary
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn is_exposed(&self) -> bool {
        self.depth > 0
    }

    /// Accesses currently denied by the hardware.
    pub fn protection(&self) -> AccessSet {
        self.pm
    }

    /// Accesses that the barriers require to be denied.
    pub fn shield_mode(&self) -> AccessSet {
        self.sm
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }
}

/// Live segments, indexed by handle and by base address.
#[derive(Default)]
pub(crate) struct SegmentTable {
    slots: Vec<Option<Segment>>,
    free_ids: Vec<SegmentId>,
    by_base: BTreeMap<Address, SegmentId>,
}

impl SegmentTable {
    pub fn next_id(&self) -> SegmentId {
        self.free_ids
            .last()
            .copied()
            .unwrap_or(SegmentId(self.slots.len() as u32))
    }

    pub fn insert(&mut self, seg: Segment) -> SegmentId {
        let id = seg.id;
        debug_assert_eq!(id, self.next_id());
        if self.free_ids.last() == Some(&id) {
            self.free_ids.pop();
        } else {
            self.slots.push(None);
        }
        self.by_base.insert(seg.base, id);
        self.slots[id.index()] = Some(seg);
        id
    }

    pub fn remove(&mut self, id: SegmentId) -> Option<Segment> {
        let seg = self.slots.get_mut(id.index())?.take()?;
        self.by_base.remove(&seg.base);
        self.free_ids.push(id);
        Some(seg)
    }

    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.slots.get(id.index()).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        self.slots.get_mut(id.index()).and_then(|s| s.as_mut())
    }

    /// The segment that contains `addr`.
    pub fn of_addr(&self, addr: Address) -> Option<SegmentId> {
        let (_, &id) = self.by_base.range(..=addr).next_back()?;
        self.get(id).filter(|seg| seg.contains(addr)).map(|seg| seg.id)
    }

    /// Live segments in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.by_base.values().filter_map(move |id| self.get(*id))
    }

    pub fn ids(&self) -> Vec<SegmentId> {
        self.by_base.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_base.len()
    }
}
