//! Runtime instances and their metadata-handle tables.
//!
//! A runtime instance is one side of the compiler bridge. In native-library
//! mode the compiler side and the managed side get separate instances;
//! otherwise one instance plays both roles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Which role(s) an instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeRole {
    /// Compiler side only (native-library mode).
    Compiler,
    /// Managed side only (native-library mode).
    Managed,
    /// Both sides.
    Shared,
}

/// Class metadata referenced from a handle table. Opaque apart from its name
/// and whether its defining loader has been unloaded.
#[derive(Debug)]
pub struct Metadata {
    name: String,
    unloaded: AtomicBool,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            unloaded: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Called by the host when the metadata's class loader dies.
    pub fn mark_unloaded(&self) {
        self.unloaded.store(true, Ordering::Release);
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::Acquire)
    }
}

/// Table of metadata handles owned by a runtime instance.
pub trait MetadataHandles: Send + Sync {
    /// Clear handles whose metadata has been unloaded.
    fn do_unloading(&self);

    /// Visit every live handle's metadata.
    fn metadata_do(&self, f: &mut dyn FnMut(&Metadata));
}

/// Index of a handle in a [`MetadataHandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetadataHandle(usize);

/// Slot-reusing handle table.
#[derive(Debug, Default)]
pub struct MetadataHandleTable {
    slots: Mutex<Vec<Option<Arc<Metadata>>>>,
}

impl MetadataHandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, metadata: Arc<Metadata>) -> MetadataHandle {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut slots = self.slots.lock().unwrap();
        if let Some(index) = slots.iter().position(Option::is_none)
            && let Some(slot) = slots.get_mut(index)
        {
            *slot = Some(metadata);
            return MetadataHandle(index);
        }
        slots.push(Some(metadata));
        MetadataHandle(slots.len().saturating_sub(1))
    }

    pub fn get(&self, handle: MetadataHandle) -> Option<Arc<Metadata>> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let slots = self.slots.lock().unwrap();
        slots.get(handle.0).cloned().flatten()
    }

    pub fn release(&self, handle: MetadataHandle) {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(handle.0) {
            *slot = None;
        }
    }

    pub fn live_count(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let slots = self.slots.lock().unwrap();
        slots.iter().filter(|s| s.is_some()).count()
    }
}

impl MetadataHandles for MetadataHandleTable {
    fn do_unloading(&self) {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut slots = self.slots.lock().unwrap();
        let mut cleared = 0usize;
        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|m| m.is_unloaded()) {
                *slot = None;
                cleared = cleared.saturating_add(1);
            }
        }
        tracing::debug!(cleared, "Cleared unloaded metadata handles");
    }

    fn metadata_do(&self, f: &mut dyn FnMut(&Metadata)) {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let slots = self.slots.lock().unwrap();
        for metadata in slots.iter().flatten() {
            f(metadata);
        }
    }
}

/// One side of the compiler bridge.
pub struct RuntimeInstance {
    id: i32,
    role: RuntimeRole,
    handles: Arc<MetadataHandleTable>,
    shut_down: AtomicBool,
}

impl RuntimeInstance {
    pub fn new(id: i32, role: RuntimeRole) -> Self {
        Self {
            id,
            role,
            handles: Arc::new(MetadataHandleTable::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn role(&self) -> RuntimeRole {
        self.role
    }

    pub fn metadata_handles(&self) -> &Arc<MetadataHandleTable> {
        &self.handles
    }

    /// Shut the instance down. Repeated calls are no-ops; returns whether
    /// this call did the work.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::info!(id = self.id, role = ?self.role, "Runtime instance shut down");
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RuntimeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInstance")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("handles", &self.handles.live_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_slots_reused() {
        let table = MetadataHandleTable::new();
        let a = table.allocate(Metadata::new("A"));
        let b = table.allocate(Metadata::new("B"));
        table.release(a);
        let c = table.allocate(Metadata::new("C"));
        assert_eq!(a, c);
        assert_eq!(table.get(c).unwrap().name(), "C");
        assert_eq!(table.get(b).unwrap().name(), "B");
        assert_eq!(table.live_count(), 2);
    }

    #[test]
    fn test_do_unloading_clears_only_unloaded() {
        let table = MetadataHandleTable::new();
        let dead = Metadata::new("Dead");
        let alive = Metadata::new("Alive");
        let dead_handle = table.allocate(Arc::clone(&dead));
        let alive_handle = table.allocate(alive);

        dead.mark_unloaded();
        table.do_unloading();

        assert!(table.get(dead_handle).is_none());
        assert!(table.get(alive_handle).is_some());
    }

    #[test]
    fn test_metadata_do_visits_live_handles() {
        let table = MetadataHandleTable::new();
        table.allocate(Metadata::new("A"));
        let b = table.allocate(Metadata::new("B"));
        table.allocate(Metadata::new("C"));
        table.release(b);

        let mut seen = Vec::new();
        table.metadata_do(&mut |m| seen.push(m.name().to_owned()));
        assert_eq!(seen, vec!["A", "C"]);
    }

    #[test]
    fn test_shutdown_idempotent() {
        let runtime = RuntimeInstance::new(0, RuntimeRole::Shared);
        assert!(runtime.shutdown());
        assert!(!runtime.shutdown());
        assert!(runtime.is_shut_down());
    }
}
