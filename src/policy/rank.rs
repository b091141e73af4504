use enum_map::Enum;
use strum_macros::{Display, EnumIter};

/// How strongly a reference keeps its referent alive.
///
/// Traces scan in rank order. Ambiguous references may be arbitrary words that happen to look
/// like addresses, so their referents are never moved. Exact references are always valid
/// references or null. Weak references do not keep their referent alive: once every exact
/// reference has been traced, a weak reference to an object that was not preserved is
/// cleared to null.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Enum, Display, EnumIter)]
pub enum Rank {
    Ambig,
    Exact,
    Weak,
}

impl Rank {
    /// May a fix at this rank move the referent?
    pub fn allows_moving(self) -> bool {
        self != Rank::Ambig
    }
}
