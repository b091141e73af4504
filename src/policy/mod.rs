//! Allocation policies.
//!
//! A [`Pool`] decides how objects are laid out in its segments, how they are preserved when a
//! trace fixes a reference to them, and what is reclaimed at the end of a trace. The arena
//! never interprets object memory itself.

mod chain;
mod pool;
mod rank;

pub use self::chain::{Chain, GenParams};
pub use self::pool::{
    FixContext, FixOutcome, Pool, PoolContext, PoolId, ReclaimOutcome, ScanOutcome,
};
pub use self::rank::Rank;
