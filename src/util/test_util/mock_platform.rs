use crate::util::error::{ArenaError, Result};
use crate::util::Address;
use crate::vm::{AccessSet, Platform};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Calls made to a [`MockPlatform`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MockPlatformCounts {
    pub reserves: usize,
    pub releases: usize,
    pub commits: usize,
    pub decommits: usize,
    pub protects: usize,
}

/// A platform backed by heap memory. Protection is only recorded: accesses never trap, so
/// tests ask [`MockPlatform::denies`] before touching memory and deliver the fault themselves.
pub struct MockPlatform {
    page_size: usize,
    chunks: BTreeMap<Address, Layout>,
    committed: HashSet<Address>,
    protection: HashMap<Address, AccessSet>,
    reserved_bytes: usize,
    /// Refuse reservations that would take the reserved total above this.
    pub reserve_limit: Option<usize>,
    /// Fail every protection change.
    pub fail_protect: bool,
    pub counts: MockPlatformCounts,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::with_page_size(4096)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        MockPlatform {
            page_size,
            chunks: BTreeMap::new(),
            committed: HashSet::new(),
            protection: HashMap::new(),
            reserved_bytes: 0,
            reserve_limit: None,
            fail_protect: false,
            counts: MockPlatformCounts::default(),
        }
    }

    fn pages(&self, base: Address, size: usize) -> impl Iterator<Item = Address> {
        let page = self.page_size;
        (0..size / page).map(move |i| base + i * page)
    }

    fn check_reserved(&self, base: Address, size: usize) -> Result<()> {
        let inside = self
            .chunks
            .range(..=base)
            .next_back()
            .is_some_and(|(&start, layout)| base + size <= start + layout.size());
        if inside && base.is_aligned_to(self.page_size) && size % self.page_size == 0 {
            Ok(())
        } else {
            Err(ArenaError::consistency(format!(
                "{}..{} is not page aligned inside a reservation",
                base,
                base + size
            )))
        }
    }

    /// The accesses denied on the page of `addr`.
    pub fn protection_of(&self, addr: Address) -> AccessSet {
        self.protection
            .get(&addr.align_down(self.page_size))
            .copied()
            .unwrap_or_default()
    }

    /// Would `access` to `addr` trap? Read protection denies every access.
    pub fn denies(&self, addr: Address, access: AccessSet) -> bool {
        let prot = self.protection_of(addr);
        prot.contains(AccessSet::READ) || prot.intersects(access)
    }

    pub fn is_committed(&self, addr: Address) -> bool {
        self.committed.contains(&addr.align_down(self.page_size))
    }

    pub fn committed_bytes(&self) -> usize {
        self.committed.len() * self.page_size
    }

    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MockPlatform {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn reserve(&mut self, size: usize) -> Result<Address> {
        if self
            .reserve_limit
            .is_some_and(|limit| self.reserved_bytes + size > limit)
        {
            return Err(ArenaError::resource(format!(
                "reserving {} bytes exceeds the mock limit",
                size
            )));
        }
        let layout = Layout::from_size_align(size, self.page_size)
            .map_err(|e| ArenaError::resource(e.to_string()))?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(ArenaError::resource(format!("cannot allocate {} bytes", size)));
        }
        let base = Address::from_mut_ptr(ptr);
        self.chunks.insert(base, layout);
        self.reserved_bytes += size;
        self.counts.reserves += 1;
        Ok(base)
    }

    fn release(&mut self, base: Address, size: usize) -> Result<()> {
        let layout = self.chunks.remove(&base).ok_or_else(|| {
            ArenaError::consistency(format!("{} is not the base of a reservation", base))
        })?;
        debug_assert_eq!(layout.size(), size);
        for page in self.pages(base, size).collect::<Vec<_>>() {
            self.committed.remove(&page);
            self.protection.remove(&page);
        }
        unsafe { dealloc(base.to_mut_ptr(), layout) };
        self.reserved_bytes -= size;
        self.counts.releases += 1;
        Ok(())
    }

    fn commit(&mut self, base: Address, size: usize) -> Result<()> {
        self.check_reserved(base, size)?;
        for page in self.pages(base, size).collect::<Vec<_>>() {
            self.committed.insert(page);
        }
        self.counts.commits += 1;
        Ok(())
    }

    fn decommit(&mut self, base: Address, size: usize) -> Result<()> {
        self.check_reserved(base, size)?;
        // Decommitted memory reads as zero when it is committed again.
        unsafe { std::ptr::write_bytes(base.to_mut_ptr::<u8>(), 0, size) };
        for page in self.pages(base, size).collect::<Vec<_>>() {
            self.committed.remove(&page);
        }
        self.counts.decommits += 1;
        Ok(())
    }

    fn protect(&mut self, base: Address, size: usize, deny: AccessSet) -> Result<()> {
        if self.fail_protect {
            return Err(ArenaError::platform(
                "mprotect",
                std::io::Error::other("injected failure"),
            ));
        }
        self.check_reserved(base, size)?;
        for page in self.pages(base, size).collect::<Vec<_>>() {
            if deny.is_empty() {
                self.protection.remove(&page);
            } else {
                self.protection.insert(page, deny);
            }
        }
        self.counts.protects += 1;
        Ok(())
    }
}

impl Drop for MockPlatform {
    fn drop(&mut self) {
        for (base, layout) in std::mem::take(&mut self.chunks) {
            unsafe { dealloc(base.to_mut_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protection_is_recorded_per_page() {
        let mut platform = MockPlatform::new();
        let base = platform.reserve(4 * 4096).unwrap();
        platform.commit(base, 2 * 4096).unwrap();
        assert!(platform.is_committed(base + 4096usize));
        assert!(!platform.is_committed(base + 2 * 4096usize));
        platform.protect(base + 4096usize, 4096, AccessSet::WRITE).unwrap();
        assert!(!platform.denies(base, AccessSet::WRITE));
        assert!(platform.denies(base + 4096usize, AccessSet::WRITE));
        assert!(!platform.denies(base + 4096usize, AccessSet::READ));
        platform.protect(base + 4096usize, 4096, AccessSet::READ).unwrap();
        assert!(platform.denies(base + 4096usize, AccessSet::WRITE));
        assert!(platform.commit(base + 5 * 4096usize, 4096).is_err());
        platform.release(base, 4 * 4096).unwrap();
        assert_eq!(platform.reserved_bytes(), 0);
    }

    #[test]
    fn reserve_limit() {
        let mut platform = MockPlatform::new();
        platform.reserve_limit = Some(8192);
        platform.reserve(8192).unwrap();
        assert!(matches!(platform.reserve(4096), Err(ArenaError::Resource(_))));
    }
}
