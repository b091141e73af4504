use crate::util::constants::TRACE_MAX;
use static_assertions::const_assert;
use std::fmt;

const_assert!(TRACE_MAX <= u8::BITS as usize);

/// The slot of a trace. Identifiers are reused once a trace finishes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u8);

impl TraceId {
    pub(crate) fn new(index: usize) -> Self {
        debug_assert!(index < TRACE_MAX);
        TraceId(index as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "trace#{}", self.0)
    }
}

/// A set of traces, one bit per trace slot. Segments keep their colours as trace sets.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct TraceSet(u8);

impl TraceSet {
    pub const EMPTY: TraceSet = TraceSet(0);

    pub const fn single(id: TraceId) -> TraceSet {
        TraceSet(1 << id.0)
    }

    pub const fn contains(self, id: TraceId) -> bool {
        self.0 & (1 << id.0) != 0
    }

    pub const fn add(self, id: TraceId) -> TraceSet {
        TraceSet(self.0 | (1 << id.0))
    }

    pub const fn del(self, id: TraceId) -> TraceSet {
        TraceSet(self.0 & !(1 << id.0))
    }

    pub const fn union(self, other: TraceSet) -> TraceSet {
        TraceSet(self.0 | other.0)
    }

    pub const fn inter(self, other: TraceSet) -> TraceSet {
        TraceSet(self.0 & other.0)
    }

    pub const fn diff(self, other: TraceSet) -> TraceSet {
        TraceSet(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_subset(self, other: TraceSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = TraceId> {
        (0..TRACE_MAX)
            .map(TraceId::new)
            .filter(move |id| self.contains(*id))
    }
}

impl fmt::Debug for TraceSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TraceSet({:#010b})", self.0)
    }
}
