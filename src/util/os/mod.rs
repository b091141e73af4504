//! Thin wrappers of the OS virtual memory calls used by [`crate::vm::OSPlatform`].

pub mod memory;

#[cfg(unix)]
pub(crate) mod posix_common;

pub use memory::*;
