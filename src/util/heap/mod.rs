pub mod accounting;
pub mod freelist;

pub use accounting::PageAccounting;
pub use freelist::ExtentFreeList;
