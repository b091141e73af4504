//! Utilities shared by the rest of the crate: addresses, zone sets, the error type, options,
//! logging, free lists, and the OS layer.

pub mod address;
pub mod constants;
pub mod conversions;
pub mod error;
pub mod heap;
pub(crate) mod log;
pub mod logger;
pub mod options;
pub mod os;
pub mod zoneset;

/// Mock collaborators for tests and benchmarks.
#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
pub use self::zoneset::ZoneSet;
