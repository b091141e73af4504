// Tests that drive a whole arena through the mock platform, format and pools in
// `crate::util::test_util`. Each arena is an owned value, so tests do not share state and can run
// in parallel. Tests that read environment variables must use `serial_test`.

// Common includes for mock tests.
pub(crate) mod mock_test_prelude {
    pub use crate::arena::{Arena, RootId};
    pub use crate::policy::{PoolId, Rank};
    pub use crate::trace::{TraceState, TraceStats};
    pub use crate::util::error::ArenaError;
    pub use crate::util::test_util::fixtures::*;
    pub use crate::util::test_util::mock_format::MockFormat;
    pub use crate::util::test_util::mock_platform::MockPlatform;
    pub use crate::util::test_util::mock_pool::{MockPool, MockPoolKind};
    pub use crate::util::test_util::*;
    pub use crate::util::{Address, ObjectReference, ZoneSet};
    pub use crate::vm::*;
    pub use crate::{SegmentId, TraceId};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Get a deterministic seeded Rng.
    pub fn get_rng() -> ChaCha8Rng {
        const SEED64: u64 = 0x4050cb1b5ab26c70;
        ChaCha8Rng::seed_from_u64(SEED64)
    }

    pub fn segment_of_object(arena: &Arena, object: ObjectReference) -> SegmentId {
        arena.segment_of(object.to_raw_address()).unwrap()
    }

    /// Is every segment free of trace colours?
    pub fn all_uncoloured(arena: &Arena) -> bool {
        arena.segments().all(|s| !s.is_coloured())
    }
}

mod mock_test_basic_collection;
mod mock_test_cache_eviction;
mod mock_test_fault_exposure;
mod mock_test_weak;
