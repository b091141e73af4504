use criterion::Criterion;

use shieldgc::util::test_util::fixtures::*;
use shieldgc::util::test_util::mock_pool::MockPoolKind;
use shieldgc::{AccessSet, SegmentId};

pub fn bench(c: &mut Criterion) {
    let mut fixture = ArenaFixture::create_with_kind(MockPoolKind::Mark);
    let segs: Vec<SegmentId> = (0..64)
        .map(|_| fixture.arena.segment_alloc(fixture.pool, 4096, 0).unwrap())
        .collect();
    for &seg in &segs {
        fixture.arena.raise(seg, AccessSet::READ).unwrap();
    }

    // Exposing a segment the cache already holds unprotected.
    c.bench_function("expose_cover_cached", |b| {
        b.iter(|| {
            fixture.arena.expose(segs[0]).unwrap();
            fixture.arena.cover(segs[0]).unwrap();
        })
    });

    // Cycling through more segments than the cache holds, so every expose evicts one.
    let mut next = 0;
    c.bench_function("expose_cover_evicting", |b| {
        b.iter(|| {
            let seg = segs[next % segs.len()];
            next += 1;
            fixture.arena.expose(seg).unwrap();
            fixture.arena.cover(seg).unwrap();
        })
    });

    c.bench_function("raise_lower", |b| {
        b.iter(|| {
            fixture.arena.lower(segs[1], AccessSet::READ).unwrap();
            fixture.arena.raise(segs[1], AccessSet::READ).unwrap();
        })
    });
}
