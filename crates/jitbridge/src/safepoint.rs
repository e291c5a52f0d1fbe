//! Global pause ("stop the world") coordination.
//!
//! Mutator threads hold a [`MutatorGuard`] while they touch state that a
//! paused operation may rewrite (their own counter block). A
//! [`PauseOperation`] runs only once every mutator has left its guarded
//! region, and no mutator can re-enter until the operation is done.
//!
//! The embedding runtime usually already owns such a coordinator; it can be
//! plugged in through [`GlobalPause`] instead of [`Safepoint`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard};
use std::time::Instant;

/// Work that must run while every other thread is quiescent.
pub trait PauseOperation {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Perform the operation. Called exactly once, with the world paused.
    fn run(&mut self);
}

/// Executor of [`PauseOperation`]s.
pub trait GlobalPause: Send + Sync {
    /// Bring every mutator to a safe point, run `op`, then resume them.
    fn execute(&self, op: &mut dyn PauseOperation);
}

/// In-process global pause built on a readers-writer lock: mutators are
/// readers, a paused operation is the single writer.
#[derive(Debug, Default)]
pub struct Safepoint {
    world: RwLock<()>,
    pauses: AtomicU64,
}

/// Proof that the holder is running and no pause is in progress.
///
/// A thread holding a guard must not call [`GlobalPause::execute`] on the
/// same safepoint.
#[derive(Debug)]
pub struct MutatorGuard<'a> {
    _running: RwLockReadGuard<'a, ()>,
}

impl Safepoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a mutator region; blocks while a pause is in progress.
    pub fn enter(&self) -> MutatorGuard<'_> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let running = self.world.read().unwrap();
        MutatorGuard { _running: running }
    }

    /// Number of operations executed so far.
    pub fn pause_count(&self) -> u64 {
        self.pauses.load(Ordering::Relaxed)
    }
}

impl GlobalPause for Safepoint {
    fn execute(&self, op: &mut dyn PauseOperation) {
        let requested = Instant::now();
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let _paused = self.world.write().unwrap();
        let reached = requested.elapsed();

        op.run();

        self.pauses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            operation = op.name(),
            time_to_safepoint_us = micros(reached),
            total_us = micros(requested.elapsed()),
            "Global pause operation finished"
        );
    }
}

fn micros(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
