use crate::util::error::{ArenaError, Result};
use crate::util::Address;
use bitflags::bitflags;
use downcast_rs::{impl_downcast, Downcast};

bitflags! {
    /// A set of memory accesses. A protection mode is the set of accesses it denies.
    ///
    /// Hardware cannot deny reads while allowing writes, so a mode that contains `READ` denies
    /// every access.
    #[derive(Default)]
    pub struct AccessSet: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// The virtual memory backend of an arena.
///
/// All addresses and sizes passed to a platform are multiples of [`Platform::page_size`].
/// Reserved memory is inaccessible until committed. Committed memory reads as zero the first
/// time it is touched.
pub trait Platform: Downcast + Send {
    /// The protection granularity in bytes.
    fn page_size(&self) -> usize;

    /// Reserve `size` bytes of address space. Fails with [`ArenaError::Resource`] if the platform
    /// cannot reserve the whole request.
    fn reserve(&mut self, size: usize) -> Result<Address>;

    /// Return a reservation made by [`Platform::reserve`]. It must be fully decommitted.
    fn release(&mut self, base: Address, size: usize) -> Result<()>;

    /// Provide backing memory for a reserved range, and make it readable and writable.
    fn commit(&mut self, base: Address, size: usize) -> Result<()>;

    /// Give the backing memory of a committed range back, keeping the reservation.
    fn decommit(&mut self, base: Address, size: usize) -> Result<()>;

    /// Deny the accesses in `deny` on a committed range, and allow every other access.
    /// A failure here breaks the barriers and is reported as [`ArenaError::Platform`].
    fn protect(&mut self, base: Address, size: usize, deny: AccessSet) -> Result<()>;
}

impl_downcast!(Platform);

/// The result of asking an arena to handle a protection fault.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultDisposition {
    /// The fault was on a managed segment. The access can be retried.
    Handled,
    /// The address is not managed by this arena. The fault must be passed on to whatever
    /// handled faults before the arena was installed.
    NotManaged,
}

/// The trap capability. The embedding delivers protection faults to an implementation of
/// this trait (usually an [`crate::Arena`]) synchronously, before the faulting access is retried.
pub trait FaultHandler {
    fn handle_fault(&mut self, addr: Address, access: AccessSet) -> Result<FaultDisposition>;
}

/// A [`Platform`] on top of POSIX `mmap`, `mprotect` and `madvise`.
#[cfg(unix)]
pub struct OSPlatform {
    page_size: usize,
}

#[cfg(unix)]
impl OSPlatform {
    pub fn new() -> Self {
        OSPlatform {
            page_size: crate::util::os::posix_common::page_size(),
        }
    }

    fn mode(deny: AccessSet) -> crate::util::os::MmapProtection {
        use crate::util::os::MmapProtection;
        if deny.contains(AccessSet::READ) {
            MmapProtection::NoAccess
        } else if deny.contains(AccessSet::WRITE) {
            MmapProtection::ReadOnly
        } else {
            MmapProtection::ReadWrite
        }
    }
}

#[cfg(unix)]
impl Default for OSPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl Platform for OSPlatform {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn reserve(&mut self, size: usize) -> Result<Address> {
        use crate::util::os::{posix_common, MmapStrategy};
        posix_common::mmap_anywhere(size, MmapStrategy::ADDRESS_SPACE).map_err(|e| {
            let oom = e.raw_os_error().is_some_and(posix_common::is_mmap_oom);
            ArenaError::resource(format!(
                "cannot reserve {} bytes of address space{}: {}",
                size,
                if oom { " (out of address space)" } else { "" },
                e
            ))
        })
    }

    fn release(&mut self, base: Address, size: usize) -> Result<()> {
        crate::util::os::posix_common::munmap(base, size)
            .map_err(|e| ArenaError::platform("munmap", e))
    }

    fn commit(&mut self, base: Address, size: usize) -> Result<()> {
        use crate::util::os::{posix_common, MmapProtection};
        posix_common::mprotect(base, size, MmapProtection::ReadWrite).map_err(|e| {
            ArenaError::resource(format!("cannot commit {} bytes at {}: {}", size, base, e))
        })
    }

    fn decommit(&mut self, base: Address, size: usize) -> Result<()> {
        use crate::util::os::{posix_common, MmapProtection};
        posix_common::madvise_dontneed(base, size)
            .map_err(|e| ArenaError::platform("madvise", e))?;
        posix_common::mprotect(base, size, MmapProtection::NoAccess)
            .map_err(|e| ArenaError::platform("mprotect", e))
    }

    fn protect(&mut self, base: Address, size: usize, deny: AccessSet) -> Result<()> {
        crate::util::os::posix_common::mprotect(base, size, Self::mode(deny))
            .map_err(|e| ArenaError::platform("mprotect", e))
    }
}
