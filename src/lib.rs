//! shieldgc is an incremental, generational memory manager. It uses page protection as its read
//! and write barriers.
//!
//! An [`Arena`] owns address space, carves it into [`Segment`]s for the [`Pool`]s registered
//! with it, and runs traces over those segments a bounded step at a time. The mutator never
//! sees a reference into a condemned segment after a trace flips. Segments that may hold such
//! references are read protected until the trace has scanned them, and the [`FaultHandler`]
//! scans a segment on demand when the mutator touches it first.
//!
//! The embedding supplies the virtual memory primitives ([`Platform`]), the object layout of
//! each pool ([`vm::Format`]), and the references held outside managed memory ([`Root`]).
//!
//! Logging goes through the `log` crate. [`util::logger::try_init`] installs `env_logger` when
//! the `builtin_env_logger` feature is on.

// This is the `log` crate. It is renamed so that `log::info!` and friends are not imported by
// accident. Use the wrappers in `crate::util::log` instead.
extern crate log as the_log_crate;

pub mod arena;
pub mod policy;
pub mod shield;
pub mod trace;
pub mod util;
pub mod vm;

#[cfg(test)]
mod tests;

pub use crate::arena::segment::{Segment, SegmentId};
pub use crate::arena::store::{GenerationStats, SegPref, SegmentStore};
pub use crate::arena::ld::LocationDependency;
pub use crate::arena::{Arena, RootId};
pub use crate::policy::{
    Chain, FixContext, FixOutcome, GenParams, Pool, PoolContext, PoolId, Rank, ReclaimOutcome,
    ScanOutcome,
};
pub use crate::shield::ShieldStats;
pub use crate::trace::{Trace, TraceId, TraceReport, TraceSet, TraceState, TraceStats};
pub use crate::util::error::{ArenaError, Result};
pub use crate::util::options::Options;
pub use crate::util::{Address, ObjectReference, ZoneSet};
pub use crate::vm::{AccessSet, FaultDisposition, FaultHandler, Platform, Root};
