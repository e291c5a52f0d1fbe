//! Per-thread performance counters.
//!
//! Each attached thread owns a [`ThreadCounterBlock`] of `i64` counters that
//! only it increments. Counts of threads that have detached are folded into
//! a process-wide retired pool. Every block and the retired pool always have
//! the same length; [`CounterRegistry::resize_all`] changes that length for
//! all of them at once, as a global-pause operation.
//!
//! # Retirement ordering
//!
//! A detaching thread folds its values into the retired pool and leaves the
//! live set under the registry write lock. [`CounterRegistry::collect`]
//! holds the read lock for the whole collection, so a collection sees a
//! detaching thread either as live or as retired, never both.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use crate::error::CounterError;
use crate::safepoint::{GlobalPause, PauseOperation};

/// Counters owned by one attached thread.
#[derive(Debug)]
pub struct ThreadCounterBlock {
    id: u64,
    included: bool,
    values: RwLock<Vec<AtomicI64>>,
}

impl ThreadCounterBlock {
    fn zeroed(id: u64, included: bool, len: usize) -> Self {
        Self {
            id,
            included,
            values: RwLock::new((0..len).map(|_| AtomicI64::new(0)).collect()),
        }
    }

    /// Add `delta` to counter `index`. Returns `false` if the index is out of
    /// range for the current counter count.
    pub fn add(&self, index: usize, delta: i64) -> bool {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let values = self.values.read().unwrap();
        match values.get(index) {
            Some(counter) => {
                counter.fetch_add(delta, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn increment(&self, index: usize) -> bool {
        self.add(index, 1)
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let values = self.values.read().unwrap();
        values.get(index).map(|c| c.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> Vec<i64> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let values = self.values.read().unwrap();
        values.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    pub fn len(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let values = self.values.read().unwrap();
        values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this block's counts take part in collection and retirement.
    pub fn is_included(&self) -> bool {
        self.included
    }

    fn add_into(&self, out: &mut [i64]) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let values = self.values.read().unwrap();
        for (slot, counter) in out.iter_mut().zip(values.iter()) {
            *slot = slot.saturating_add(counter.load(Ordering::Relaxed));
        }
    }
}

#[derive(Debug)]
struct RegistryState {
    size: usize,
    retired: Vec<i64>,
    live: FxHashMap<u64, Arc<ThreadCounterBlock>>,
}

impl RegistryState {
    /// `out` must be `size` long.
    fn sum_into(&self, out: &mut [i64]) {
        out.fill(0);
        for (slot, retired) in out.iter_mut().zip(self.retired.iter()) {
            *slot = *retired;
        }
        for block in self.live.values().filter(|b| b.is_included()) {
            block.add_into(out);
        }
    }
}

/// Registry of every live counter block plus the retired pool.
pub struct CounterRegistry {
    state: RwLock<RegistryState>,
    exclude_compiler: bool,
    next_id: AtomicU64,
    pause: Arc<dyn GlobalPause>,
    /// Number of array allocations allowed before they start failing.
    #[cfg(any(test, feature = "test-utils"))]
    allocation_budget: std::sync::Mutex<Option<usize>>,
}

impl CounterRegistry {
    /// Create the registry with a zeroed retired pool of `size` counters.
    pub fn new(size: usize, exclude_compiler: bool, pause: Arc<dyn GlobalPause>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                size,
                retired: vec![0; size],
                live: FxHashMap::default(),
            }),
            exclude_compiler,
            next_id: AtomicU64::new(0),
            pause,
            #[cfg(any(test, feature = "test-utils"))]
            allocation_budget: std::sync::Mutex::new(None),
        }
    }

    /// Current counter count.
    pub fn size(&self) -> usize {
        self.read_state().size
    }

    /// Number of live (attached) blocks.
    pub fn live_count(&self) -> usize {
        self.read_state().live.len()
    }

    /// Copy of the retired pool.
    pub fn retired(&self) -> Vec<i64> {
        self.read_state().retired.clone()
    }

    /// Create and register a zero-filled block for a newly attached thread.
    pub fn attach(&self, is_compiler_thread: bool) -> Arc<ThreadCounterBlock> {
        let included = !(self.exclude_compiler && is_compiler_thread);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.write_state();
        let block = Arc::new(ThreadCounterBlock::zeroed(id, included, state.size));
        state.live.insert(id, Arc::clone(&block));
        block
    }

    /// Sum the retired pool and every included live block into `out`.
    ///
    /// `out.len()` must equal the current counter count.
    pub fn collect(&self, out: &mut [i64]) -> Result<(), CounterError> {
        let state = self.read_state();
        if out.len() != state.size {
            return Err(CounterError::LengthMismatch {
                expected: state.size,
                actual: out.len(),
            });
        }
        state.sum_into(out);
        Ok(())
    }

    /// Same as [`collect`](Self::collect), into a buffer sized to the
    /// current counter count.
    pub fn totals(&self) -> Vec<i64> {
        let state = self.read_state();
        let mut out = vec![0; state.size];
        state.sum_into(&mut out);
        out
    }

    /// Resize the retired pool and every live block to `new_size` while the
    /// world is paused.
    ///
    /// Values below `min(old, new)` are kept, new slots are zero. If any
    /// array cannot be allocated nothing changes and the error is returned.
    pub fn resize_all(&self, new_size: usize) -> Result<(), CounterError> {
        let mut op = ResizeCounters {
            registry: self,
            new_size,
            result: Ok(()),
        };
        self.pause.execute(&mut op);
        op.result
    }

    /// Retire a detaching thread's block: fold its values into the retired
    /// pool (if included) and drop it from the live set.
    pub fn free(&self, block: &ThreadCounterBlock) {
        let mut state = self.write_state();
        if state.live.remove(&block.id).is_none() {
            return;
        }
        if state.size == 0 || !block.is_included() {
            return;
        }
        block.add_into(&mut state.retired);
    }

    /// Drop the counts of every retired thread. The pool keeps its length,
    /// so threads retired later are still accounted for.
    pub fn free_global(&self) {
        let mut state = self.write_state();
        state.retired.fill(0);
    }

    fn allocate(&self, len: usize) -> Result<Vec<i64>, CounterError> {
        #[cfg(any(test, feature = "test-utils"))]
        {
            #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
            let mut budget = self.allocation_budget.lock().unwrap();
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(CounterError::AllocationFailed { requested: len });
                }
                *remaining = remaining.saturating_sub(1);
            }
        }
        let mut array = Vec::new();
        array
            .try_reserve_exact(len)
            .map_err(|_| CounterError::AllocationFailed { requested: len })?;
        Ok(array)
    }

    /// Make every counter array allocation after the next `allowed` ones
    /// fail. `None` removes the limit.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_allocation_budget(&self, allowed: Option<usize>) {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut budget = self.allocation_budget.lock().unwrap();
        *budget = allowed;
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let state = self.state.read().unwrap();
        state
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let state = self.state.write().unwrap();
        state
    }
}

impl std::fmt::Debug for CounterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterRegistry")
            .field("size", &self.size())
            .field("live", &self.live_count())
            .field("exclude_compiler", &self.exclude_compiler)
            .finish_non_exhaustive()
    }
}

/// Copy `old` into a freshly allocated array of `new_size`, zero-filling new
/// slots and truncating on shrink.
fn resized(old: impl Iterator<Item = i64>, mut array: Vec<i64>, new_size: usize) -> Vec<i64> {
    array.extend(old.take(new_size));
    array.resize(new_size, 0);
    array
}

/// The global-pause half of [`CounterRegistry::resize_all`].
struct ResizeCounters<'a> {
    registry: &'a CounterRegistry,
    new_size: usize,
    result: Result<(), CounterError>,
}

impl ResizeCounters<'_> {
    fn resize(&self) -> Result<(), CounterError> {
        let registry = self.registry;
        let new_size = self.new_size;
        let mut state = registry.write_state();
        let old_size = state.size;

        // Block writers stay excluded from the copy until the install, so an
        // increment cannot land in an array that is about to be replaced.
        let blocks: Vec<Arc<ThreadCounterBlock>> = state.live.values().cloned().collect();
        let mut guards = Vec::with_capacity(blocks.len());
        for block in &blocks {
            #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
            let values = block.values.write().unwrap();
            guards.push(values);
        }

        // Stage every array first so a failed allocation leaves all blocks
        // at the old size.
        let retired = resized(
            state.retired.iter().copied(),
            registry.allocate(new_size)?,
            new_size,
        );
        let mut staged = Vec::with_capacity(guards.len());
        for values in &guards {
            let array = registry.allocate(new_size)?;
            staged.push(resized(
                values.iter().map(|c| c.load(Ordering::Relaxed)),
                array,
                new_size,
            ));
        }

        state.retired = retired;
        for (values, array) in guards.iter_mut().zip(staged) {
            **values = array.into_iter().map(AtomicI64::new).collect();
        }
        drop(guards);
        state.size = new_size;

        tracing::info!(
            old_size,
            new_size,
            threads = state.live.len(),
            "Resized compiler counters"
        );
        Ok(())
    }
}

impl PauseOperation for ResizeCounters<'_> {
    fn name(&self) -> &'static str {
        "ResizeCounters"
    }

    fn run(&mut self) {
        self.result = self.resize();
        if let Err(error) = &self.result {
            tracing::warn!(%error, new_size = self.new_size, "Counter resize failed");
        }
    }
}
