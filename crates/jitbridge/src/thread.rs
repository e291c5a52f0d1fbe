//! Threads attached to the bridge and the per-thread state read by
//! compiled code.
//!
//! Compiled code addresses [`BridgeThreadState`] fields directly, through
//! byte offsets from the base of the native thread block. Those offsets are
//! part of the machine-code ABI: reordering fields in either struct below is
//! a breaking change.

use std::mem::offset_of;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::counters::ThreadCounterBlock;

/// Byte offset from the native thread block base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteOffset(pub usize);

impl ByteOffset {
    pub fn in_bytes(self) -> usize {
        self.0
    }
}

/// Bridge-owned slice of the native thread block.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeThreadState {
    /// Deoptimization reason/action pending for the thread, `-1` if none.
    pub pending_deoptimization: i32,
    /// A monitor enter must be completed before returning to compiled code.
    pub pending_monitorenter: bool,
    /// Control must transfer to the interpreter on deoptimization.
    pub pending_transfer_to_interpreter: bool,
    /// The thread is in an allocation that may be retried.
    pub in_retryable_allocation: bool,
    /// Failed speculation to record on the next deoptimization.
    pub pending_failed_speculation: i64,
    /// Either the alternate call target or the implicit exception pc,
    /// depending on what the thread is doing. Compiled code reads both
    /// through the same offset.
    pub alternate_call_target_or_implicit_exception_pc: usize,
    /// Address of the thread's counter block.
    pub counters: usize,
    pub reserved0: i64,
    pub reserved1: i64,
    pub reserved_oop0: usize,
}

impl BridgeThreadState {
    pub fn alternate_call_target(&self) -> usize {
        self.alternate_call_target_or_implicit_exception_pc
    }

    pub fn set_alternate_call_target(&mut self, target: usize) {
        self.alternate_call_target_or_implicit_exception_pc = target;
    }

    pub fn implicit_exception_pc(&self) -> usize {
        self.alternate_call_target_or_implicit_exception_pc
    }

    pub fn set_implicit_exception_pc(&mut self, pc: usize) {
        self.alternate_call_target_or_implicit_exception_pc = pc;
    }
}

impl Default for BridgeThreadState {
    fn default() -> Self {
        Self {
            pending_deoptimization: -1,
            pending_monitorenter: false,
            pending_transfer_to_interpreter: false,
            in_retryable_allocation: false,
            pending_failed_speculation: 0,
            alternate_call_target_or_implicit_exception_pc: 0,
            counters: 0,
            reserved0: 0,
            reserved1: 0,
            reserved_oop0: 0,
        }
    }
}

/// Layout of the native per-thread block as seen by compiled code. Only the
/// fields ahead of the bridge state matter for the offsets.
#[repr(C)]
#[derive(Debug, Default)]
pub struct NativeThreadBlock {
    pub thread_id: u64,
    pub suspend_flags: u32,
    pub poll_word: usize,
    pub bridge: BridgeThreadState,
}

const BRIDGE_STATE_OFFSET: usize = offset_of!(NativeThreadBlock, bridge);

pub fn pending_deoptimization_offset() -> ByteOffset {
    ByteOffset(BRIDGE_STATE_OFFSET + offset_of!(BridgeThreadState, pending_deoptimization))
}

pub fn pending_monitorenter_offset() -> ByteOffset {
    ByteOffset(BRIDGE_STATE_OFFSET + offset_of!(BridgeThreadState, pending_monitorenter))
}

pub fn alternate_call_target_offset() -> ByteOffset {
    ByteOffset(
        BRIDGE_STATE_OFFSET
            + offset_of!(
                BridgeThreadState,
                alternate_call_target_or_implicit_exception_pc
            ),
    )
}

/// Same slot as [`alternate_call_target_offset`].
pub fn implicit_exception_pc_offset() -> ByteOffset {
    alternate_call_target_offset()
}

/// One published field, as registered for introspection tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedField {
    pub name: &'static str,
    pub offset: ByteOffset,
}

/// Every offset compiled code depends on.
pub fn published_layout() -> Vec<PublishedField> {
    vec![
        PublishedField {
            name: "pending_deoptimization",
            offset: pending_deoptimization_offset(),
        },
        PublishedField {
            name: "pending_monitorenter",
            offset: pending_monitorenter_offset(),
        },
        PublishedField {
            name: "alternate_call_target",
            offset: alternate_call_target_offset(),
        },
        PublishedField {
            name: "implicit_exception_pc",
            offset: implicit_exception_pc_offset(),
        },
    ]
}

/// Which side of the bridge a thread works for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadKind {
    /// An application (managed-language) thread.
    Managed,
    /// A compiler worker thread.
    Compiler,
}

/// State of a compilation whose requester is blocked waiting for it.
#[derive(Debug, Default)]
pub struct BlockingCompileState {
    compilation_ticks: AtomicU32,
}

impl BlockingCompileState {
    pub fn inc_compilation_ticks(&self) {
        self.compilation_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn compilation_ticks(&self) -> u32 {
        self.compilation_ticks.load(Ordering::Relaxed)
    }
}

/// A compilation task as far as the bridge is concerned.
#[derive(Debug, Default)]
pub struct CompileTask {
    pub method: String,
    /// Present when the requester waits for the result.
    pub blocking_state: Option<BlockingCompileState>,
}

impl CompileTask {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            blocking_state: None,
        }
    }

    pub fn blocking(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            blocking_state: Some(BlockingCompileState::default()),
        }
    }
}

/// A thread attached to the bridge.
#[derive(Debug)]
pub struct BridgeThread {
    name: String,
    kind: ThreadKind,
    counters: Arc<ThreadCounterBlock>,
    task: Mutex<Option<Arc<CompileTask>>>,
    state: Mutex<NativeThreadBlock>,
}

impl BridgeThread {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: ThreadKind,
        counters: Arc<ThreadCounterBlock>,
        thread_id: u64,
    ) -> Self {
        let bridge = BridgeThreadState {
            counters: Arc::as_ptr(&counters).addr(),
            ..Default::default()
        };
        Self {
            name: name.into(),
            kind,
            counters,
            task: Mutex::new(None),
            state: Mutex::new(NativeThreadBlock {
                thread_id,
                bridge,
                ..Default::default()
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    pub fn is_compiler_thread(&self) -> bool {
        self.kind == ThreadKind::Compiler
    }

    pub fn counters(&self) -> &Arc<ThreadCounterBlock> {
        &self.counters
    }

    /// Install (or clear) the task the thread is compiling.
    pub fn set_task(&self, task: Option<Arc<CompileTask>>) {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut current = self.task.lock().unwrap();
        *current = task;
    }

    pub fn task(&self) -> Option<Arc<CompileTask>> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let current = self.task.lock().unwrap();
        current.clone()
    }

    /// Run `f` with the thread's native block.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut NativeThreadBlock) -> R) -> R {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_are_inside_bridge_state() {
        let base = offset_of!(NativeThreadBlock, bridge);
        let end = base + std::mem::size_of::<BridgeThreadState>();
        for field in published_layout() {
            assert!(field.offset.in_bytes() >= base, "{}", field.name);
            assert!(field.offset.in_bytes() < end, "{}", field.name);
        }
    }

    #[test]
    fn test_union_views_share_offset() {
        assert_eq!(alternate_call_target_offset(), implicit_exception_pc_offset());
        assert_ne!(pending_deoptimization_offset(), pending_monitorenter_offset());
        assert_eq!(pending_deoptimization_offset().in_bytes(), BRIDGE_STATE_OFFSET);
    }

    #[test]
    fn test_union_views_alias() {
        let mut state = BridgeThreadState::default();
        state.set_implicit_exception_pc(0x1000);
        assert_eq!(state.alternate_call_target(), 0x1000);
        state.set_alternate_call_target(0x2000);
        assert_eq!(state.implicit_exception_pc(), 0x2000);
    }

    #[test]
    fn test_default_state() {
        let state = BridgeThreadState::default();
        assert_eq!(state.pending_deoptimization, -1);
        assert!(!state.pending_monitorenter);
        assert_eq!(state.alternate_call_target(), 0);
    }
}
