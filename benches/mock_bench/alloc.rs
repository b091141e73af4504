use criterion::Criterion;

use shieldgc::util::test_util::fixtures::*;
use shieldgc::util::test_util::mock_format::MockFormat;
use shieldgc::util::test_util::mock_pool::MockPoolKind;

pub fn bench(c: &mut Criterion) {
    // A large arena, and no collection work triggered by allocation.
    let mut options = test_options();
    options.arena_size = 1 << 30;
    options.arena_extend_by = 64 << 20;
    let mut fixture = ArenaFixture::create_with_options(options, MockPoolKind::Mark);
    let size = MockFormat::object_size(1);

    c.bench_function("alloc", |b| {
        b.iter(|| {
            let _addr = fixture.arena.alloc(fixture.pool, size).unwrap();
        })
    });

    let mut fixture = ArenaFixture::create_with_options(test_options(), MockPoolKind::Mark);
    c.bench_function("segment_alloc_free", |b| {
        b.iter(|| {
            let seg = fixture.arena.segment_alloc(fixture.pool, 64 << 10, 0).unwrap();
            fixture.arena.segment_free(seg).unwrap();
        })
    });
}
