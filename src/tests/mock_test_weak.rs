use super::mock_test_prelude::*;

/// A table of weak references in an uncollected pool. `strong` is also rooted, `weak_only`
/// is reachable only through the table.
struct WeakTable {
    fixture: ArenaFixture,
    root: RootId,
    table: ObjectReference,
    strong: ObjectReference,
    weak_only: ObjectReference,
}

impl WeakTable {
    fn create(kind: MockPoolKind) -> Self {
        let mut fixture = ArenaFixture::create_with_kind(kind);
        let mut pool = MockPool::new(MockPoolKind::Mark, Some(Rank::Weak));
        pool.collected = false;
        let weak_pool = fixture.arena.create_pool(Box::new(pool));
        let table = alloc_object(&mut fixture.arena, weak_pool, 2);
        let strong = fixture.alloc(1);
        let weak_only = fixture.alloc(1);
        set_field(&mut fixture.arena, table, 0, strong);
        set_field(&mut fixture.arena, table, 1, weak_only);
        let root = fixture.add_root(vec![strong]);
        WeakTable {
            fixture,
            root,
            table,
            strong,
            weak_only,
        }
    }
}

fn unreachable_referents_are_splatted(kind: MockPoolKind) {
    let mut w = WeakTable::create(kind);
    let table_seg = segment_of_object(&w.fixture.arena, w.table);
    assert_eq!(
        w.fixture.arena.segment(table_seg).unwrap().rank(),
        Some(Rank::Weak)
    );

    let report = w.fixture.arena.collect().unwrap().unwrap();
    assert_eq!(report.stats.splatted, 1);
    let strong = w.fixture.root(w.root).get(0);
    assert_eq!(get_field(&mut w.fixture.arena, w.table, 0), strong);
    assert!(get_field(&mut w.fixture.arena, w.table, 1).is_null());
    assert!(w.fixture.mock_pool().contains(strong));
    assert!(!w.fixture.mock_pool().contains(w.weak_only));
    assert_eq!(w.fixture.mock_pool().object_count(), 1);
    match kind {
        MockPoolKind::Mark => assert_eq!(strong, w.strong),
        MockPoolKind::Copy => assert_ne!(strong, w.strong),
    }
    w.fixture.arena.verify().unwrap();
}

#[test]
fn unreachable_referents_are_splatted_mark() {
    unreachable_referents_are_splatted(MockPoolKind::Mark)
}

#[test]
fn unreachable_referents_are_splatted_copy() {
    unreachable_referents_are_splatted(MockPoolKind::Copy)
}

#[test]
fn weak_segments_are_scanned_last() {
    let mut w = WeakTable::create(MockPoolKind::Mark);
    let segs: Vec<SegmentId> = mock_pool_ref(&w.fixture.arena, w.fixture.pool).segments();
    let id = w.fixture.arena.condemn(&segs).unwrap();
    let trace = w.fixture.arena.trace(id).unwrap();
    assert_eq!(trace.gray_len(Rank::Weak), 1);
    assert_eq!(trace.gray_len(Rank::Exact), 1);

    // The first step scans the exact segment and stops before the weak one.
    let table_seg = segment_of_object(&w.fixture.arena, w.table);
    let size = w.fixture.arena.segment(table_seg).unwrap().size();
    w.fixture.arena.trace_step(id, 1).unwrap();
    assert!(w.fixture.arena.segment(table_seg).unwrap().grey().contains(id));
    assert_eq!(w.fixture.arena.trace(id).unwrap().stats().splatted, 0);
    assert_eq!(w.fixture.arena.trace_step(id, size).unwrap(), 0);
    assert_eq!(w.fixture.arena.last_trace_report().unwrap().stats.splatted, 1);
}

#[test]
fn mutator_read_keeps_weak_referent_alive() {
    let mut w = WeakTable::create(MockPoolKind::Mark);
    let segs: Vec<SegmentId> = mock_pool_ref(&w.fixture.arena, w.fixture.pool).segments();
    let id = w.fixture.arena.condemn(&segs).unwrap();

    // Reading the table before the trace scanned it hands the referent to the mutator, so it
    // must be preserved.
    let read = get_field(&mut w.fixture.arena, w.table, 1);
    assert_eq!(read, w.weak_only);
    let report = w.fixture.arena.trace_finish(id).unwrap();
    assert_eq!(report.stats.splatted, 0);
    assert!(w.fixture.mock_pool().contains(w.weak_only));
    assert_eq!(get_field(&mut w.fixture.arena, w.table, 1), w.weak_only);
}
