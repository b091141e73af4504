use crate::arena::store::GenerationStats;

/// Parameters of one generation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GenParams {
    /// Bytes that may enter the generation before it should be collected.
    pub capacity: usize,
    /// Expected fraction of the generation that dies in a collection.
    pub mortality: f64,
}

/// An ordered list of generations. Survivors of generation `g` are promoted to `g + 1`. The
/// generation after the last one in the chain is the top generation, which is never collected
/// by the chain.
#[derive(Clone, Debug)]
pub struct Chain {
    gens: Vec<GenParams>,
}

impl Chain {
    pub fn new(gens: Vec<GenParams>) -> Self {
        Chain { gens }
    }

    /// A nursery of `nursery_capacity` bytes and one intermediate generation.
    pub fn with_nursery(nursery_capacity: usize) -> Self {
        Chain::new(vec![
            GenParams {
                capacity: nursery_capacity,
                mortality: 0.85,
            },
            GenParams {
                capacity: nursery_capacity * 4,
                mortality: 0.45,
            },
        ])
    }

    pub fn len(&self) -> usize {
        self.gens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gens.is_empty()
    }

    pub fn top_generation(&self) -> usize {
        self.gens.len()
    }

    pub fn params(&self, gen: usize) -> Option<&GenParams> {
        self.gens.get(gen)
    }

    /// The oldest generation that exceeded its capacity. Collecting it also collects every
    /// younger generation.
    pub fn select<F: Fn(usize) -> GenerationStats>(&self, stats: F) -> Option<usize> {
        (0..self.gens.len())
            .rev()
            .find(|&g| stats(g).new_bytes > self.gens[g].capacity)
    }

    /// The bytes a collection of generations `0..=gen` is expected to free.
    pub fn expected_yield<F: Fn(usize) -> GenerationStats>(&self, gen: usize, stats: F) -> usize {
        self.gens
            .iter()
            .take(gen + 1)
            .enumerate()
            .map(|(g, p)| (stats(g).live_bytes as f64 * p.mortality) as usize)
            .sum()
    }
}
