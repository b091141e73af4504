// Some tests are conditionally compiled. So not all the code in this module will be used. We simply allow dead code in this module.
#![allow(dead_code)]

use crate::arena::{Arena, RootId};
use crate::policy::{PoolId, Rank};
use crate::util::options::Options;
use crate::util::test_util::mock_format::MockFormat;
use crate::util::test_util::mock_platform::MockPlatform;
use crate::util::test_util::mock_pool::{MockPool, MockPoolKind};
use crate::util::ObjectReference;
use crate::vm::TableRoot;

pub trait FixtureContent {
    fn create() -> Self;
}

/// Options for small test arenas: 1MB reservations split into 64KB zone stripes, and no
/// collection work triggered by allocation.
pub fn test_options() -> Options {
    let mut options = Options::builtin();
    options.arena_size = 1 << 20;
    options.arena_extend_by = 1 << 20;
    options.zone_shift = 16;
    options.poll_threshold = usize::MAX;
    options.trace_quantum = 64 << 10;
    options.nursery_capacity = 256 << 10;
    options
}

pub fn mock_arena(options: Options) -> Arena {
    Arena::new(options, Box::new(MockPlatform::new())).unwrap()
}

pub fn mock_pool(arena: &mut Arena, kind: MockPoolKind, rank: Option<Rank>) -> PoolId {
    arena.create_pool(Box::new(MockPool::new(kind, rank)))
}

pub fn alloc_object(arena: &mut Arena, pool: PoolId, fields: usize) -> ObjectReference {
    let addr = arena.alloc(pool, MockFormat::object_size(fields)).unwrap();
    ObjectReference::from_raw_address(addr)
}

pub fn mock_pool_ref(arena: &Arena, pool: PoolId) -> &MockPool {
    arena.pool::<MockPool>(pool).unwrap()
}

pub fn mock_pool_mut(arena: &mut Arena, pool: PoolId) -> &mut MockPool {
    arena.pool_mut::<MockPool>(pool).unwrap()
}

/// An arena with one exact mark pool.
pub struct ArenaFixture {
    pub arena: Arena,
    pub pool: PoolId,
}

impl FixtureContent for ArenaFixture {
    fn create() -> Self {
        Self::create_with_kind(MockPoolKind::Mark)
    }
}

impl ArenaFixture {
    pub fn create_with_kind(kind: MockPoolKind) -> Self {
        Self::create_with_options(test_options(), kind)
    }

    pub fn create_with_options(options: Options, kind: MockPoolKind) -> Self {
        let mut arena = mock_arena(options);
        let pool = mock_pool(&mut arena, kind, Some(Rank::Exact));
        ArenaFixture { arena, pool }
    }

    pub fn alloc(&mut self, fields: usize) -> ObjectReference {
        alloc_object(&mut self.arena, self.pool, fields)
    }

    pub fn mock_pool(&self) -> &MockPool {
        mock_pool_ref(&self.arena, self.pool)
    }

    pub fn mock_pool_mut(&mut self) -> &mut MockPool {
        mock_pool_mut(&mut self.arena, self.pool)
    }

    pub fn platform(&self) -> &MockPlatform {
        self.arena.platform::<MockPlatform>().unwrap()
    }

    /// Register an exact root holding `refs`.
    pub fn add_root(&mut self, refs: Vec<ObjectReference>) -> RootId {
        self.arena
            .create_root(Rank::Exact, Box::new(TableRoot::with_refs(refs)))
            .unwrap()
    }

    pub fn root(&self, root: RootId) -> &TableRoot {
        self.arena.root::<TableRoot>(root).unwrap()
    }
}

/// A root referring to `a`, which refers to `b`.
pub struct TwoObjects {
    pub fixture: ArenaFixture,
    pub root: RootId,
    pub a: ObjectReference,
    pub b: ObjectReference,
}

impl FixtureContent for TwoObjects {
    fn create() -> Self {
        Self::create_with_kind(MockPoolKind::Mark)
    }
}

impl TwoObjects {
    pub fn create_with_kind(kind: MockPoolKind) -> Self {
        let mut fixture = ArenaFixture::create_with_kind(kind);
        let a = fixture.alloc(2);
        let b = fixture.alloc(1);
        unsafe { MockFormat::field_slot(a, 0).store(b.to_raw_address()) };
        let root = fixture.add_root(vec![a]);
        TwoObjects {
            fixture,
            root,
            a,
            b,
        }
    }

    /// Where the root points now.
    pub fn root_object(&self) -> ObjectReference {
        self.fixture.root(self.root).get(0)
    }
}
