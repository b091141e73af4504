use super::mock_test_prelude::*;
use paste::paste;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};

const EDGES: usize = 3;

/// A random object graph, and the shape it is expected to have in the heap.
struct Graph {
    root: RootId,
    roots: Vec<usize>,
    edges: Vec<[Option<usize>; EDGES]>,
}

impl Graph {
    fn build(f: &mut ArenaFixture, objects: usize) -> Graph {
        let mut rng = get_rng();
        let refs: Vec<ObjectReference> = (0..objects)
            .map(|_| {
                let padding = rng.random_range(0..60);
                f.alloc(EDGES + padding)
            })
            .collect();
        let edges: Vec<[Option<usize>; EDGES]> = (0..objects)
            .map(|_| {
                let mut e = [None; EDGES];
                for slot in e.iter_mut() {
                    if rng.random_bool(0.4) {
                        *slot = Some(rng.random_range(0..objects));
                    }
                }
                e
            })
            .collect();
        for (i, e) in edges.iter().enumerate() {
            for (j, target) in e.iter().enumerate() {
                let value = target.map_or(ObjectReference::NULL, |t| refs[t]);
                set_field(&mut f.arena, refs[i], j, value);
            }
        }
        let roots: Vec<usize> = (0..4).map(|_| rng.random_range(0..objects)).collect();
        let root = f.add_root(roots.iter().map(|&i| refs[i]).collect());
        Graph { root, roots, edges }
    }

    fn reachable(&self) -> usize {
        let mut seen: HashSet<usize> = self.roots.iter().copied().collect();
        let mut queue: VecDeque<usize> = seen.iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            for t in self.edges[i].iter().flatten() {
                if seen.insert(*t) {
                    queue.push_back(*t);
                }
            }
        }
        seen.len()
    }

    /// Walk the heap from the root as the mutator, and check that it has the shape of the graph.
    /// Returns the number of objects reached.
    fn check(&self, f: &mut ArenaFixture) -> usize {
        let refs = f.root(self.root).refs().to_vec();
        let mut found: HashMap<usize, ObjectReference> = HashMap::new();
        let mut queue = VecDeque::new();
        for (&i, &r) in self.roots.iter().zip(refs.iter()) {
            assert!(!r.is_null());
            match found.get(&i) {
                Some(&known) => assert_eq!(known, r),
                None => {
                    found.insert(i, r);
                    queue.push_back((i, r));
                }
            }
        }
        while let Some((i, object)) = queue.pop_front() {
            assert!(f.mock_pool().contains(object), "{} is not a live object", object);
            for j in 0..EDGES {
                let value = get_field(&mut f.arena, object, j);
                match self.edges[i][j] {
                    None => assert!(value.is_null()),
                    Some(t) => match found.get(&t) {
                        Some(&known) => assert_eq!(known, value),
                        None => {
                            found.insert(t, value);
                            queue.push_back((t, value));
                        }
                    },
                }
            }
        }
        found.len()
    }
}

fn condemn_reachable_object(kind: MockPoolKind) {
    let mut f = ArenaFixture::create_with_kind(kind);
    let object = f.alloc(1);
    let seg = segment_of_object(&f.arena, object);
    let root = f.add_root(vec![object]);

    let id = f.arena.condemn(&[seg]).unwrap();
    let trace = f.arena.trace(id).unwrap();
    assert_eq!(trace.state(), TraceState::ScanningSegments);
    assert_eq!(trace.stats().roots_scanned, 1);
    assert_eq!(trace.gray_len(Rank::Exact), 1);
    assert!(f.arena.segment(seg).unwrap().is_white_for(id));
    f.arena.verify().unwrap();

    let report = f.arena.trace_finish(id).unwrap();
    assert_eq!(report.state, TraceState::Finished);
    assert!(all_uncoloured(&f.arena));
    let now = f.root(root).get(0);
    assert!(f.mock_pool().contains(now));
    let live = segment_of_object(&f.arena, now);
    assert!(f.arena.segment(live).unwrap().is_black_for(id));
    match kind {
        MockPoolKind::Mark => {
            assert_eq!(now, object);
            assert_eq!(live, seg);
            assert_eq!(report.stats.reclaimed_segments, 0);
        }
        MockPoolKind::Copy => {
            assert_ne!(now, object);
            assert!(f.arena.segment(seg).is_none());
            assert_eq!(report.stats.reclaimed_segments, 1);
            assert_eq!(report.stats.moved, 1);
        }
    }

    // Drop the only reference and collect the segment again.
    f.arena.root_mut::<TableRoot>(root).unwrap().set(0, ObjectReference::NULL);
    let id = f.arena.condemn(&[live]).unwrap();
    let report = f.arena.trace_finish(id).unwrap();
    assert_eq!(report.stats.reclaimed_segments, 1);
    assert!(f.arena.segment(live).is_none());
    assert_eq!(f.mock_pool().object_count(), 0);
    f.arena.verify().unwrap();
}

fn collect_random_graph(kind: MockPoolKind) {
    let mut f = ArenaFixture::create_with_kind(kind);
    let graph = Graph::build(&mut f, 300);
    let expected = graph.reachable();
    assert_eq!(graph.check(&mut f), expected);

    let report = f.arena.collect().unwrap().unwrap();
    assert_eq!(report.state, TraceState::Finished);
    assert!(f.arena.busy_traces().is_empty());
    assert!(all_uncoloured(&f.arena));
    assert_eq!(graph.check(&mut f), expected);
    assert_eq!(f.mock_pool().object_count(), expected);
    if kind == MockPoolKind::Mark {
        assert_eq!(f.mock_pool().stats.reclaimed_objects, 300 - expected);
    }
    f.arena.verify().unwrap();

    // Nothing died since.
    f.arena.collect().unwrap().unwrap();
    assert_eq!(graph.check(&mut f), expected);
    assert_eq!(f.mock_pool().object_count(), expected);
}

fn incremental_collection_with_mutator(kind: MockPoolKind) {
    let mut f = ArenaFixture::create_with_kind(kind);
    let graph = Graph::build(&mut f, 300);
    let expected = graph.reachable();
    let segs: Vec<SegmentId> = f.arena.segments().map(|s| s.id()).collect();

    let id = f.arena.condemn(&segs).unwrap();
    // The mutator runs between small steps and faults on grey segments.
    while f.arena.busy_traces().contains(id) {
        assert_eq!(graph.check(&mut f), expected);
        f.arena.verify().unwrap();
        f.arena.trace_step(id, 4096).unwrap();
    }
    assert!(f.arena.shield_stats().faults > 0);
    let report = f.arena.last_trace_report().unwrap();
    assert_eq!(report.id, id);
    assert_eq!(report.state, TraceState::Finished);
    assert_eq!(graph.check(&mut f), expected);
    assert_eq!(f.mock_pool().object_count(), expected);
    f.arena.verify().unwrap();
}

macro_rules! test_with_kinds {
    ($($name:ident),*) => {
        paste! {
            $(
                #[test]
                fn [<$name _mark>]() {
                    $name(MockPoolKind::Mark)
                }

                #[test]
                fn [<$name _copy>]() {
                    $name(MockPoolKind::Copy)
                }
            )*
        }
    };
}

test_with_kinds!(
    condemn_reachable_object,
    collect_random_graph,
    incremental_collection_with_mutator
);

#[test]
fn copy_preserves_references_between_objects() {
    let mut two = TwoObjects::create_with_kind(MockPoolKind::Copy);
    two.fixture.arena.collect().unwrap().unwrap();
    let a = two.root_object();
    assert_ne!(a, two.a);
    let b = get_field(&mut two.fixture.arena, a, 0);
    assert_ne!(b, two.b);
    assert!(two.fixture.mock_pool().contains(b));
    assert!(get_field(&mut two.fixture.arena, b, 0).is_null());
    assert_eq!(MockFormat.is_forwarded(a), None);
    assert_eq!(two.fixture.mock_pool().stats.copied, 2);
}

#[test]
fn ambiguous_roots_pin_objects() {
    let mut f = ArenaFixture::create_with_kind(MockPoolKind::Copy);
    let pinned = f.alloc(1);
    let moved = f.alloc(1);
    let ambig = f
        .arena
        .create_root(Rank::Ambig, Box::new(TableRoot::with_refs(vec![pinned])))
        .unwrap();
    let exact = f.add_root(vec![moved]);

    f.arena.collect().unwrap().unwrap();
    assert_eq!(f.arena.root::<TableRoot>(ambig).unwrap().get(0), pinned);
    assert_ne!(f.root(exact).get(0), moved);
    assert!(f.mock_pool().contains(pinned));
    assert_eq!(f.mock_pool().stats.nailed, 1);
    assert_eq!(f.mock_pool().object_count(), 2);
}

#[test]
fn interior_ambiguous_reference_is_ignored() {
    let mut f = ArenaFixture::create();
    let object = f.alloc(2);
    let interior = ObjectReference::from_raw_address(object.to_raw_address() + 8usize);
    f.arena
        .create_root(Rank::Ambig, Box::new(TableRoot::with_refs(vec![interior])))
        .unwrap();
    f.arena.collect().unwrap().unwrap();
    assert!(!f.mock_pool().contains(object));
}
