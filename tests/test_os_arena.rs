//! An arena on the real virtual memory of the process. Nothing here touches a protected page
//! from outside the arena: the only protection left after a collection denies writes.

#![cfg(all(unix, feature = "mock_test"))]

extern crate shieldgc;

use shieldgc::util::test_util::fixtures::{alloc_object, mock_pool};
use shieldgc::util::test_util::mock_format::MockFormat;
use shieldgc::util::test_util::mock_pool::MockPoolKind;
use shieldgc::vm::{OSPlatform, TableRoot};
use shieldgc::{AccessSet, Arena, ObjectReference, Options, Rank};

fn os_arena() -> Arena {
    let mut options = Options::builtin();
    options.arena_size = 4 << 20;
    options.arena_extend_by = 4 << 20;
    options.poll_threshold = usize::MAX;
    Arena::new(options, Box::new(OSPlatform::new())).unwrap()
}

fn load_field(object: ObjectReference, index: usize) -> ObjectReference {
    ObjectReference::from_raw_address(unsafe { MockFormat::field_slot(object, index).load() })
}

#[test]
fn segments_are_committed_and_released() {
    let mut arena = os_arena();
    let pool = mock_pool(&mut arena, MockPoolKind::Mark, Some(Rank::Exact));
    let before = arena.committed_bytes();
    let seg = arena.segment_alloc(pool, 64 << 10, 0).unwrap();
    assert_eq!(arena.committed_bytes(), before + (64 << 10));
    let base = arena.segment(seg).unwrap().base();
    unsafe { base.store::<usize>(42) };
    assert_eq!(unsafe { base.load::<usize>() }, 42);
    arena.segment_free(seg).unwrap();
    arena.release_spare().unwrap();
    assert_eq!(arena.committed_bytes(), before);
    arena.verify().unwrap();
}

#[test]
fn protection_round_trip() {
    let mut arena = os_arena();
    let pool = mock_pool(&mut arena, MockPoolKind::Mark, Some(Rank::Exact));
    let seg = arena.segment_alloc(pool, 64 << 10, 0).unwrap();
    let base = arena.segment(seg).unwrap().base();
    unsafe { base.store::<usize>(7) };

    arena.raise(seg, AccessSet::READ).unwrap();
    arena.expose(seg).unwrap();
    assert_eq!(unsafe { base.load::<usize>() }, 7);
    arena.cover(seg).unwrap();
    arena.flush().unwrap();
    arena.lower(seg, AccessSet::READ).unwrap();
    assert_eq!(unsafe { base.load::<usize>() }, 7);
    assert_eq!(arena.shield_stats().exposes, arena.shield_stats().covers);
}

#[test]
fn collect_on_os_memory() {
    let mut arena = os_arena();
    let pool = mock_pool(&mut arena, MockPoolKind::Copy, Some(Rank::Exact));
    let a = alloc_object(&mut arena, pool, 1);
    let b = alloc_object(&mut arena, pool, 1);
    let _garbage = alloc_object(&mut arena, pool, 4);
    unsafe { MockFormat::field_slot(a, 0).store(b.to_raw_address()) };
    let root = arena
        .create_root(Rank::Exact, Box::new(TableRoot::with_refs(vec![a])))
        .unwrap();

    let report = arena.collect().unwrap().unwrap();
    assert!(report.failure.is_none());
    assert!(arena.busy_traces().is_empty());

    let a = arena.root::<TableRoot>(root).unwrap().get(0);
    let b = load_field(a, 0);
    assert!(!b.is_null());
    assert!(load_field(b, 0).is_null());
    arena.verify().unwrap();
}
