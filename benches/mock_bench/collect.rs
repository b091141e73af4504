use criterion::{BatchSize, Criterion};

use shieldgc::util::test_util::fixtures::*;
use shieldgc::util::test_util::mock_pool::MockPoolKind;
use shieldgc::util::test_util::set_field;

/// A linked list of `count` rooted objects, with as many unreachable objects between them.
fn populated(kind: MockPoolKind, count: usize) -> ArenaFixture {
    let mut options = test_options();
    options.arena_size = 16 << 20;
    let mut fixture = ArenaFixture::create_with_options(options, kind);
    let head = fixture.alloc(1);
    let mut prev = head;
    for _ in 1..count {
        let _garbage = fixture.alloc(1);
        let next = fixture.alloc(1);
        set_field(&mut fixture.arena, prev, 0, next);
        prev = next;
    }
    fixture.add_root(vec![head]);
    fixture
}

pub fn bench(c: &mut Criterion) {
    for (name, kind) in [
        ("collect_mark", MockPoolKind::Mark),
        ("collect_copy", MockPoolKind::Copy),
    ] {
        c.bench_function(name, |b| {
            b.iter_batched(
                || populated(kind, 4096),
                |mut fixture| {
                    let report = fixture.arena.collect().unwrap();
                    assert!(report.is_some());
                    fixture
                },
                BatchSize::LargeInput,
            )
        });
    }
}
