//! Contracts between the engine and the embedding.
//!
//! The embedding supplies a [`Platform`] for virtual memory, a [`Format`] for each pool's
//! objects, and [`Root`]s for references held outside managed memory. It delivers protection
//! faults to a [`FaultHandler`].

mod format;
mod platform;
mod roots;

pub use self::format::{walk_objects, Format};
#[cfg(unix)]
pub use self::platform::OSPlatform;
pub use self::platform::{AccessSet, FaultDisposition, FaultHandler, Platform};
pub use self::roots::{ObjectTracer, Root, SlotVisitor, TableRoot};
