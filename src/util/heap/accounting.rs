/// Page usage of an arena, in arena grains.
///
/// Reserved pages are address space owned by the arena. Committed pages have backing memory,
/// whether they belong to a live segment or are spare. Spare pages are committed but not in any
/// segment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageAccounting {
    reserved: usize,
    committed: usize,
    spare: usize,
}

impl PageAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inform of reserving a certain number of pages of address space.
    pub fn reserve(&mut self, pages: usize) {
        self.reserved += pages;
    }

    /// Inform of releasing reserved address space. The pages must not be committed.
    pub fn release(&mut self, pages: usize) {
        debug_assert!(self.reserved >= pages);
        self.reserved -= pages;
    }

    /// Inform of successfully committing a certain number of pages.
    pub fn commit(&mut self, pages: usize) {
        self.committed += pages;
        debug_assert!(self.committed <= self.reserved);
    }

    /// Inform of decommitting a certain number of pages.
    pub fn decommit(&mut self, pages: usize) {
        debug_assert!(self.committed >= pages);
        self.committed -= pages;
    }

    /// Committed pages left a segment and were kept for reuse.
    pub fn add_spare(&mut self, pages: usize) {
        self.spare += pages;
        debug_assert!(self.spare <= self.committed);
    }

    /// Spare pages were reused by a segment, or decommitted.
    pub fn remove_spare(&mut self, pages: usize) {
        debug_assert!(self.spare >= pages);
        self.spare -= pages;
    }

    pub fn get_reserved_pages(&self) -> usize {
        self.reserved
    }

    pub fn get_committed_pages(&self) -> usize {
        self.committed
    }

    pub fn get_spare_pages(&self) -> usize {
        self.spare
    }

    /// Committed pages that belong to live segments.
    pub fn get_used_pages(&self) -> usize {
        self.committed - self.spare
    }
}
