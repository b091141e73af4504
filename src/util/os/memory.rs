/// Strategy for performing mmap
#[derive(Debug, Copy, Clone)]
pub struct MmapStrategy {
    /// The protection flags for mmap.
    pub prot: MmapProtection,
    /// Whether this mmap allows reserve/commit physical memory. Address space reservations
    /// must not ask for swap space, so they set this to false.
    pub reserve: bool,
}

impl std::default::Default for MmapStrategy {
    fn default() -> Self {
        Self {
            prot: MmapProtection::ReadWrite,
            reserve: true,
        }
    }
}

impl MmapStrategy {
    /// Create a new strategy
    pub fn new(prot: MmapProtection, reserve: bool) -> Self {
        Self { prot, reserve }
    }

    /// Set protection option.
    pub fn prot(self, prot: MmapProtection) -> Self {
        Self { prot, ..self }
    }

    /// Set the reserve flag.
    pub fn reserve(self, reserve: bool) -> Self {
        Self { reserve, ..self }
    }

    /// The strategy for reserving address space without backing memory.
    pub const ADDRESS_SPACE: Self = Self {
        prot: MmapProtection::NoAccess,
        reserve: false,
    };
}

/// The protection flags for Mmap
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MmapProtection {
    /// Allow read + write
    ReadWrite,
    /// Allow read only. Writes fault.
    ReadOnly,
    /// Do not allow any access
    NoAccess,
}
