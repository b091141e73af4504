use criterion::Criterion;

pub mod alloc;
pub mod collect;
pub mod shield;

pub fn bench(c: &mut Criterion) {
    alloc::bench(c);
    collect::bench(c);
    shield::bench(c);
}
