use super::mock_test_prelude::*;

fn arena_with_cache(capacity: usize, segments: usize) -> (Arena, Vec<SegmentId>) {
    let mut options = test_options();
    options.shield_cache_size = capacity;
    let mut arena = mock_arena(options);
    let pool = mock_pool(&mut arena, MockPoolKind::Mark, Some(Rank::Exact));
    let segs: Vec<SegmentId> = (0..segments)
        .map(|_| arena.segment_alloc(pool, 4096, 0).unwrap())
        .collect();
    for &seg in &segs {
        arena.raise(seg, AccessSet::READ).unwrap();
        assert_eq!(arena.segment(seg).unwrap().protection(), AccessSet::READ);
    }
    (arena, segs)
}

fn expose_and_cover(arena: &mut Arena, seg: SegmentId) {
    arena.expose(seg).unwrap();
    assert!(arena.segment(seg).unwrap().protection().is_empty());
    assert!(!arena
        .platform::<MockPlatform>()
        .unwrap()
        .denies(arena.segment(seg).unwrap().base(), AccessSet::READ));
    arena.cover(seg).unwrap();
}

fn is_cached_unprotected(arena: &Arena, seg: SegmentId) -> bool {
    let seg = arena.segment(seg).unwrap();
    seg.is_cached() && seg.protection().is_empty()
}

fn is_reprotected(arena: &Arena, seg: SegmentId) -> bool {
    let seg = arena.segment(seg).unwrap();
    !seg.is_cached() && seg.protection() == AccessSet::READ
}

#[test]
fn least_recently_exposed_segment_is_evicted() {
    let (mut arena, segs) = arena_with_cache(4, 6);
    for &seg in &segs[..4] {
        expose_and_cover(&mut arena, seg);
    }
    assert!(segs[..4].iter().all(|&s| is_cached_unprotected(&arena, s)));
    assert_eq!(arena.shield_stats().evictions, 0);

    expose_and_cover(&mut arena, segs[4]);
    expose_and_cover(&mut arena, segs[5]);
    assert!(is_reprotected(&arena, segs[0]));
    assert!(is_reprotected(&arena, segs[1]));
    assert!(segs[2..].iter().all(|&s| is_cached_unprotected(&arena, s)));
    assert_eq!(arena.shield_stats().evictions, 2);
    assert_eq!(arena.store().shield_cached(), segs[2..].to_vec());

    // Exposing a cached segment again makes it the most recent entry.
    expose_and_cover(&mut arena, segs[2]);
    expose_and_cover(&mut arena, segs[0]);
    assert!(is_reprotected(&arena, segs[3]));
    assert!(is_cached_unprotected(&arena, segs[2]));
    assert!(is_cached_unprotected(&arena, segs[0]));
    assert_eq!(
        arena.store().shield_cached(),
        vec![segs[4], segs[5], segs[2], segs[0]]
    );
    arena.verify().unwrap();
}

#[test]
fn cached_segments_cost_no_protection_changes() {
    let (mut arena, segs) = arena_with_cache(4, 2);
    expose_and_cover(&mut arena, segs[0]);
    expose_and_cover(&mut arena, segs[1]);
    let protects = arena.shield_stats().protects;
    let platform_protects = arena.platform::<MockPlatform>().unwrap().counts.protects;
    for _ in 0..10 {
        expose_and_cover(&mut arena, segs[0]);
        expose_and_cover(&mut arena, segs[1]);
    }
    assert_eq!(arena.shield_stats().protects, protects);
    assert_eq!(
        arena.platform::<MockPlatform>().unwrap().counts.protects,
        platform_protects
    );
    assert_eq!(arena.shield_stats().evictions, 0);
}

#[test]
fn flush_reprotects_every_covered_segment() {
    let (mut arena, segs) = arena_with_cache(4, 3);
    for &seg in &segs {
        expose_and_cover(&mut arena, seg);
    }
    // An exposed segment stays in the cache through a flush.
    arena.expose(segs[1]).unwrap();
    arena.flush().unwrap();
    assert!(is_reprotected(&arena, segs[0]));
    assert!(is_reprotected(&arena, segs[2]));
    assert!(is_cached_unprotected(&arena, segs[1]));
    assert_eq!(arena.store().shield_cached(), vec![segs[1]]);

    arena.cover(segs[1]).unwrap();
    arena.flush().unwrap();
    assert!(segs.iter().all(|&s| is_reprotected(&arena, s)));
    let stats = arena.shield_stats();
    assert_eq!(stats.exposes, stats.covers);
    arena.verify().unwrap();
}

#[test]
fn raising_a_cached_segment_protects_it_at_once() {
    let (mut arena, segs) = arena_with_cache(4, 1);
    let seg = segs[0];
    arena.lower(seg, AccessSet::READ).unwrap();
    expose_and_cover(&mut arena, seg);
    assert!(arena.segment(seg).unwrap().is_cached());
    arena.raise(seg, AccessSet::WRITE).unwrap();
    assert!(!arena.segment(seg).unwrap().is_cached());
    assert_eq!(arena.segment(seg).unwrap().protection(), AccessSet::WRITE);
    let base = arena.segment(seg).unwrap().base();
    let platform = arena.platform::<MockPlatform>().unwrap();
    assert!(platform.denies(base, AccessSet::WRITE));
    assert!(!platform.denies(base, AccessSet::READ));
}
