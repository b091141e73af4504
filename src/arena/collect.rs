use crate::arena::segment::SegmentId;
use crate::arena::Arena;
use crate::policy::PoolId;
use crate::trace::{pool_mut, TraceId, TraceReport, TraceState};
use crate::util::error::Result;
use crate::util::log::{debug, info, warn};
use crate::util::Address;

impl Arena {
    /// Allocate `size` bytes in a pool. If the pool runs out of memory, collect everything and
    /// try once more.
    pub fn alloc(&mut self, pool: PoolId, size: usize) -> Result<Address> {
        self.enter()?;
        let result = self.alloc_inner(pool, size);
        let addr = self.leave_with(result)?;
        self.poll(size)?;
        Ok(addr)
    }

    fn alloc_inner(&mut self, pool: PoolId, size: usize) -> Result<Address> {
        match self.pool_alloc(pool, size) {
            Err(e) if e.is_out_of_memory() && self.store.options.collect_on_oom => {
                info!(
                    "Allocating {} bytes in {} failed, collecting before retrying: {}",
                    size, pool, e
                );
                match self.collect_inner() {
                    Ok(_) => self.pool_alloc(pool, size),
                    Err(err) if err.is_fatal() => Err(err),
                    Err(err) => {
                        warn!("Collecting for {} failed: {}", pool, err);
                        Err(e)
                    }
                }
            }
            r => r,
        }
    }

    fn pool_alloc(&mut self, pool: PoolId, size: usize) -> Result<Address> {
        let (pool, mut ctx) = self.pool_context(pool)?;
        pool.alloc(&mut ctx, size)
    }

    /// Allocate a segment for a pool, sized by the pool's size class.
    pub fn segment_alloc(&mut self, pool: PoolId, size: usize, gen: usize) -> Result<SegmentId> {
        let (pool, mut ctx) = self.pool_context(pool)?;
        let size = pool.segment_size_class(size);
        ctx.segment_alloc(size, gen)
    }

    pub fn segment_free(&mut self, seg: SegmentId) -> Result<()> {
        let pool = self.store.seg(seg)?.pool;
        self.store.segment_free(seg)?;
        pool_mut(&mut self.pools, pool)?.segment_freed(seg);
        Ok(())
    }

    /// Account for allocation. Once `poll_threshold` bytes have been allocated since collection
    /// work last ran, one quantum of work is shared by the running traces, oldest slot first.
    /// If no trace is running and a generation is over capacity, a trace of that generation
    /// starts.
    pub fn poll(&mut self, allocated: usize) -> Result<()> {
        self.alloc_since_poll += allocated;
        if self.alloc_since_poll < self.store.options.poll_threshold {
            return Ok(());
        }
        self.alloc_since_poll = 0;
        self.enter()?;
        let result = self.poll_inner();
        self.leave_with(result)
    }

    fn poll_inner(&mut self) -> Result<()> {
        if self.tracer.busy().is_empty() {
            let selected = self.chain.select(|g| self.store.generation(g));
            if let Some(gen) = selected {
                self.start_generation_trace(gen)?;
            }
        }
        let quantum = self.store.options.trace_quantum;
        let mut done = 0;
        for id in self.tracer.busy().iter() {
            if done >= quantum {
                break;
            }
            if self.tracer.get(id)?.state == TraceState::ScanningSegments {
                self.trace_step_shared(id, quantum, &mut done)?;
            }
        }
        Ok(())
    }

    /// Segments of collected pools in generations up to `max_gen`, or in every generation.
    pub(crate) fn collectable_segments(&self, max_gen: Option<usize>) -> Vec<SegmentId> {
        self.store
            .segments()
            .filter(|s| max_gen.map_or(true, |g| s.generation <= g))
            .filter(|s| {
                self.pools
                    .get(s.pool.index())
                    .and_then(|p| p.as_ref())
                    .is_some_and(|p| p.is_collected())
            })
            .map(|s| s.id)
            .collect()
    }

    /// Start a trace condemning generations `0..=gen`.
    fn start_generation_trace(&mut self, gen: usize) -> Result<Option<TraceId>> {
        let segs = self.collectable_segments(Some(gen));
        self.store.reset_new_bytes(gen);
        if segs.is_empty() {
            return Ok(None);
        }
        info!(
            "Generation {} is over capacity, condemning {} segments",
            gen,
            segs.len()
        );
        let id = self.trace_create()?;
        match self.trace_condemn(id, &segs) {
            Ok(()) => {}
            Err(e) if !e.is_fatal() => return Ok(None),
            Err(e) => return Err(e),
        }
        self.tracer.get_mut(id)?.generation = Some(gen);
        self.trace_start_inner(id)?;
        Ok(Some(id))
    }

    /// Condemn segments in a new trace and start it.
    pub fn condemn(&mut self, segs: &[SegmentId]) -> Result<TraceId> {
        let id = self.trace_create()?;
        self.trace_condemn(id, segs)?;
        self.enter()?;
        let result = self.trace_start_inner(id);
        self.leave_with(result)?;
        Ok(id)
    }

    /// Finish every running trace, then collect every collected segment. Returns the report of
    /// the full collection, or `None` if there was nothing to condemn.
    pub fn collect(&mut self) -> Result<Option<TraceReport>> {
        self.enter()?;
        let result = self.collect_inner();
        self.leave_with(result)
    }

    pub(crate) fn collect_inner(&mut self) -> Result<Option<TraceReport>> {
        for id in self.tracer.busy().iter() {
            if self.tracer.get(id)?.state != TraceState::Unstarted {
                self.trace_finish_inner(id)?;
            }
        }
        let segs = self.collectable_segments(None);
        if segs.is_empty() {
            debug!("Nothing to collect");
            return Ok(None);
        }
        let id = self.trace_create()?;
        match self.trace_condemn(id, &segs) {
            Ok(()) => {}
            Err(e) if !e.is_fatal() => return Ok(None),
            Err(e) => return Err(e),
        }
        self.store.reset_new_bytes(self.store.top_generation());
        self.trace_finish_inner(id).map(Some)
    }
}
