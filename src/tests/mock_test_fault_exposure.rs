use super::mock_test_prelude::*;

/// An object in an uncollected pool, and a collected object for it to refer to.
struct Holder {
    fixture: ArenaFixture,
    root: RootId,
    holder: ObjectReference,
    target: ObjectReference,
}

impl Holder {
    fn create() -> Self {
        let mut fixture = ArenaFixture::create();
        let mut pool = MockPool::new(MockPoolKind::Mark, Some(Rank::Exact));
        pool.collected = false;
        let uncollected = fixture.arena.create_pool(Box::new(pool));
        let holder = alloc_object(&mut fixture.arena, uncollected, 2);
        let target = fixture.alloc(1);
        let root = fixture.add_root(vec![target]);
        Holder {
            fixture,
            root,
            holder,
            target,
        }
    }

    fn holder_segment(&self) -> SegmentId {
        segment_of_object(&self.fixture.arena, self.holder)
    }
}

#[test]
fn write_to_narrow_summary_widens_it() {
    let mut h = Holder::create();
    let seg = h.holder_segment();
    // The holder segment is scanned in full by the collection and refers nowhere.
    h.fixture.arena.collect().unwrap().unwrap();
    let s = h.fixture.arena.segment(seg).unwrap();
    assert!(s.summary().is_empty());
    assert!(s.shield_mode().contains(AccessSet::WRITE));
    assert_eq!(s.protection(), AccessSet::WRITE);

    let slot = MockFormat::field_slot(h.holder, 0);
    let before = h.fixture.arena.shield_stats();
    let disposition = h.fixture.arena.handle_fault(slot, AccessSet::WRITE).unwrap();
    assert_eq!(disposition, FaultDisposition::Handled);
    let after = h.fixture.arena.shield_stats();
    assert_eq!(after.faults, before.faults + 1);
    assert_eq!(after.exposes, before.exposes + 1);

    let s = h.fixture.arena.segment(seg).unwrap();
    assert!(s.summary().is_univ());
    assert!(!s.shield_mode().contains(AccessSet::WRITE));
    assert_eq!(s.depth(), 1);
    assert!(s.is_cached());
    assert!(s.protection().is_empty());
    unsafe { slot.store(h.target.to_raw_address()) };
    h.fixture.arena.verify().unwrap();

    // The next arena entry covers the exposure.
    h.fixture.alloc(1);
    assert_eq!(h.fixture.arena.segment(seg).unwrap().depth(), 0);
    let stats = h.fixture.arena.shield_stats();
    assert_eq!(stats.exposes, stats.covers);
}

#[test]
fn mutator_write_through_helpers() {
    let mut h = Holder::create();
    h.fixture.arena.collect().unwrap().unwrap();
    let faults = h.fixture.arena.shield_stats().faults;
    let target = h.target;
    set_field(&mut h.fixture.arena, h.holder, 1, target);
    assert_eq!(h.fixture.arena.shield_stats().faults, faults + 1);
    // A second write does not fault: the barrier is gone.
    set_field(&mut h.fixture.arena, h.holder, 0, target);
    assert_eq!(h.fixture.arena.shield_stats().faults, faults + 1);

    // The widened summary keeps the target alive once the root is gone.
    h.fixture.arena.destroy_root(h.root).unwrap();
    h.fixture.arena.collect().unwrap().unwrap();
    assert!(h.fixture.mock_pool().contains(target));
    assert_eq!(get_field(&mut h.fixture.arena, h.holder, 1), target);
}

#[test]
fn read_fault_scans_grey_segment_first() {
    let mut two = TwoObjects::create();
    let seg = segment_of_object(&two.fixture.arena, two.a);
    assert_eq!(seg, segment_of_object(&two.fixture.arena, two.b));
    let id = two.fixture.arena.condemn(&[seg]).unwrap();
    assert!(two.fixture.arena.segment(seg).unwrap().grey().contains(id));
    assert_eq!(
        two.fixture.arena.segment(seg).unwrap().protection(),
        AccessSet::READ
    );

    let b = get_field(&mut two.fixture.arena, two.a, 0);
    assert_eq!(b, two.b);
    let s = two.fixture.arena.segment(seg).unwrap();
    assert!(!s.grey().contains(id));
    // The scan narrowed the summary, so the segment stays write protected.
    assert!(!s.summary().is_univ());
    assert!(!s.is_exposed());
    assert_eq!(s.protection(), AccessSet::WRITE);
    let trace = two.fixture.arena.trace(id).unwrap();
    // Scanning `a` preserved `b` in the same segment, which had to be scanned again.
    assert_eq!(trace.stats().segments_scanned, 2);
    two.fixture.arena.verify().unwrap();

    let report = two.fixture.arena.trace_finish(id).unwrap();
    assert_eq!(report.state, TraceState::Finished);
    assert!(two.fixture.mock_pool().contains(two.b));
    assert_eq!(two.fixture.mock_pool().stats.reclaimed_objects, 0);
}

#[test]
fn write_after_read_fault_still_faults() {
    let mut h = Holder::create();
    let fresh = h.fixture.alloc(1);
    let fresh_root = h.fixture.add_root(vec![fresh]);
    let seg = h.holder_segment();
    let segs = h.fixture.mock_pool().segments();
    let id = h.fixture.arena.condemn(&segs).unwrap();
    assert!(h.fixture.arena.segment(seg).unwrap().grey().contains(id));

    // Reading the holder scans it. Its fields are null, so its summary becomes empty.
    let faults = h.fixture.arena.shield_stats().faults;
    assert!(get_field(&mut h.fixture.arena, h.holder, 0).is_null());
    assert_eq!(h.fixture.arena.shield_stats().faults, faults + 1);
    let s = h.fixture.arena.segment(seg).unwrap();
    assert!(s.summary().is_empty());
    assert_eq!(s.protection(), AccessSet::WRITE);

    // A store with no arena entry in between must still trip the write barrier.
    set_field(&mut h.fixture.arena, h.holder, 1, fresh);
    assert_eq!(h.fixture.arena.shield_stats().faults, faults + 2);
    assert!(h.fixture.arena.segment(seg).unwrap().summary().is_univ());

    h.fixture.arena.destroy_root(fresh_root).unwrap();
    h.fixture.arena.trace_finish(id).unwrap();
    h.fixture.arena.collect().unwrap().unwrap();
    assert!(h.fixture.mock_pool().contains(fresh));
    assert_eq!(get_field(&mut h.fixture.arena, h.holder, 1), fresh);
    h.fixture.arena.verify().unwrap();
}

#[test]
fn fault_outside_the_arena_is_not_managed() {
    let mut f = ArenaFixture::create();
    f.alloc(1);
    let addr = unsafe { Address::from_usize(0x1000) };
    assert_eq!(
        f.arena.handle_fault(addr, AccessSet::READ).unwrap(),
        FaultDisposition::NotManaged
    );
    assert_eq!(f.arena.shield_stats().faults, 0);
}
