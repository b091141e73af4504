use crate::arena::Arena;
use crate::policy::Rank;
use crate::util::error::{ensure_consistent, Result};
use crate::util::log::trace;
use crate::util::{Address, ZoneSet};
use crate::vm::{AccessSet, FaultDisposition, FaultHandler};

impl FaultHandler for Arena {
    /// Handle a protection fault of the mutator at `addr`.
    ///
    /// A grey segment is scanned until it is black before the mutator may see it. A write to a
    /// segment with a narrow summary widens the summary to every zone. Only the barriers the
    /// access tripped are lifted: after a read, a narrow summary keeps the segment write
    /// protected so that a later store still faults. A segment with no barrier left is exposed
    /// until the next arena entry.
    fn handle_fault(&mut self, addr: Address, access: AccessSet) -> Result<FaultDisposition> {
        let Some(id) = self.store.segment_of(addr) else {
            return Ok(FaultDisposition::NotManaged);
        };
        self.store.shield.stats.faults += 1;
        let seg = self.store.seg(id)?;
        let mut grey = seg.grey.inter(self.tracer.flipped());
        // Weak segments touched by the mutator are scanned as exact, since the mutator may
        // hold on to what it reads.
        let rank = match seg.rank {
            Some(Rank::Ambig) => Rank::Ambig,
            _ => Rank::Exact,
        };
        trace!("fault at {} in {} {:?}", addr, id, access);
        if !grey.is_empty() {
            self.enter()?;
        }
        // A scan can grey the segment again, by preserving more objects in it. The mutator must
        // not see it before it is black.
        while !grey.is_empty() {
            self.scan_for(id, grey, rank)?;
            grey = self.store.seg(id)?.grey.inter(self.tracer.flipped());
        }

        let seg = self.store.seg(id)?;
        if access.contains(AccessSet::WRITE) && seg.rank.is_some() && !seg.summary.is_univ() {
            self.store.set_summary(id, ZoneSet::UNIV)?;
        }
        let sm = self.store.seg(id)?.sm;
        ensure_consistent!(
            !sm.contains(AccessSet::READ) && !sm.intersects(access),
            "{} still denies {:?} after a fault",
            id,
            access
        );
        if sm.is_empty() {
            self.expose_for_mutator(id)?;
        }
        self.store.flush()?;
        Ok(FaultDisposition::Handled)
    }
}
