use crate::util::address::Address;
use crate::util::os::memory::*;
use std::io::Result;

impl MmapProtection {
    fn into_native_flags(self) -> i32 {
        use libc::{PROT_NONE, PROT_READ, PROT_WRITE};
        match self {
            Self::ReadWrite => PROT_READ | PROT_WRITE,
            Self::ReadOnly => PROT_READ,
            Self::NoAccess => PROT_NONE,
        }
    }
}

impl MmapStrategy {
    fn get_posix_mmap_flags(&self) -> i32 {
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        if !self.reserve {
            flags |= libc::MAP_NORESERVE;
        }
        flags
    }
}

/// Map `size` bytes anywhere in the address space.
pub fn mmap_anywhere(size: usize, strategy: MmapStrategy) -> Result<Address> {
    let prot = strategy.prot.into_native_flags();
    let flags = strategy.get_posix_mmap_flags();
    let ptr = unsafe { libc::mmap(std::ptr::null_mut(), size, prot, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(Address::from_mut_ptr(ptr))
    }
}

pub fn is_mmap_oom(os_errno: i32) -> bool {
    os_errno == libc::ENOMEM
}

pub fn munmap(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

pub fn mprotect(start: Address, size: usize, prot: MmapProtection) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::mprotect(start.to_mut_ptr(), size, prot.into_native_flags()) },
        0,
    )
}

/// Give the backing memory of the range back to the OS. The range stays mapped and reads as
/// zero the next time it is touched.
pub fn madvise_dontneed(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::madvise(start.to_mut_ptr(), size, libc::MADV_DONTNEED) },
        0,
    )
}

/// The size of a hardware page.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        crate::util::constants::BYTES_IN_PAGE
    } else {
        size as usize
    }
}

pub fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
