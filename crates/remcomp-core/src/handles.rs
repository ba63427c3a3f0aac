//! Client-side view of kernel variable handles.
//!
//! The kernel owns all variable storage and issues the ids. The registry only
//! remembers which ids this client allocated, what type and shape they were
//! declared with, and where each one is in its lifecycle:
//!
//! ```text
//! Unallocated -> Allocated -> [Written <-> Read]* -> Freed
//! ```
//!
//! Tracking the state lets the client reject calls on freed or foreign
//! handles without a round trip.
//!
//! The kernel reuses ids (after `free`, and from 1 again after `reset`), so a
//! handle also carries the generation it was registered under. A handle whose
//! id has since been reissued stays freed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::protocol::{VariableId, VariableType};
use crate::{RemoteError, Result};

/// Opaque handle to a kernel variable. Only obtainable from `allocate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableHandle {
    id: VariableId,
    generation: u64,
}

impl VariableHandle {
    /// The kernel-issued id. Two handles may share an id if the kernel
    /// reissued it; they are still different handles.
    pub fn id(self) -> VariableId {
        self.id
    }
}

impl std::fmt::Display for VariableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "variable {}", self.id)
    }
}

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Allocated,
    Written,
    Read,
    Freed,
}

impl HandleState {
    pub fn is_live(self) -> bool {
        !matches!(self, HandleState::Freed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HandleState::Allocated => "allocated",
            HandleState::Written => "written",
            HandleState::Read => "read",
            HandleState::Freed => "freed",
        }
    }
}

/// What the client declared when allocating a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub dtype: VariableType,
    /// Empty for scalars.
    pub dimensions: Vec<u32>,
    pub state: HandleState,
    generation: u64,
}

impl VariableInfo {
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }
}

/// Registry of handles allocated through one client.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    entries: RwLock<HashMap<VariableId, VariableInfo>>,
    next_generation: AtomicU64,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Entries are only changed by single map operations, so a poisoned lock
    // still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<VariableId, VariableInfo>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<VariableId, VariableInfo>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a freshly allocated id under a new generation. The kernel is
    /// authoritative: an id that is already tracked is replaced, and handles
    /// issued for it earlier read as freed from then on.
    pub fn register(
        &self,
        id: VariableId,
        dtype: VariableType,
        dimensions: Vec<u32>,
    ) -> VariableHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.write().insert(
            id,
            VariableInfo {
                dtype,
                dimensions,
                state: HandleState::Allocated,
                generation,
            },
        );
        if let Some(previous) = previous.filter(|p| p.state.is_live()) {
            warn!(
                "Kernel reissued live id {} (was {} {:?}); replacing",
                id, previous.dtype, previous.dimensions
            );
        }
        VariableHandle { id, generation }
    }

    /// Look up a live handle, failing fast for freed or unknown ones.
    pub fn live(&self, operation: &'static str, handle: VariableHandle) -> Result<VariableInfo> {
        let entries = self.read();
        let state = match entries.get(&handle.id) {
            Some(info) if info.generation != handle.generation => HandleState::Freed.as_str(),
            Some(info) if info.state.is_live() => return Ok(info.clone()),
            Some(info) => info.state.as_str(),
            None => "unallocated",
        };
        Err(RemoteError::HandleNotLive {
            operation,
            handle: handle.id,
            state,
        })
    }

    /// Current state of `handle`, or `None` if this registry never issued
    /// its id. A handle whose id was reissued reports `Freed`.
    pub fn state(&self, handle: VariableHandle) -> Option<HandleState> {
        self.read().get(&handle.id).map(|info| {
            if info.generation == handle.generation {
                info.state
            } else {
                HandleState::Freed
            }
        })
    }

    /// Move a live handle to `state`. Freed handles, and handles whose id has
    /// been reissued, are left untouched.
    pub fn transition(&self, handle: VariableHandle, state: HandleState) {
        if let Some(info) = self.write().get_mut(&handle.id) {
            if info.generation == handle.generation && info.state.is_live() {
                info.state = state;
            }
        }
    }

    /// Mark every tracked handle as freed, e.g. after a kernel reset.
    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.write();
        let mut count = 0;
        for info in entries.values_mut().filter(|info| info.state.is_live()) {
            info.state = HandleState::Freed;
            count += 1;
        }
        count
    }

    /// Handles that have not been freed, sorted by id.
    pub fn live_handles(&self) -> Vec<VariableHandle> {
        let mut handles: Vec<_> = self
            .read()
            .iter()
            .filter(|(_, info)| info.state.is_live())
            .map(|(&id, info)| VariableHandle {
                id,
                generation: info.generation,
            })
            .collect();
        handles.sort();
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = HandleRegistry::new();
        let handle = registry.register(3, VariableType::Float64, vec![2, 2]);

        assert_eq!(handle.id(), 3);
        let info = registry.live("send", handle).unwrap();
        assert_eq!(info.dtype, VariableType::Float64);
        assert_eq!(info.rank(), 2);
        assert_eq!(info.state, HandleState::Allocated);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let registry = HandleRegistry::new();
        let handle = registry.register(1, VariableType::Int32, vec![]);

        registry.transition(handle, HandleState::Written);
        assert_eq!(registry.state(handle), Some(HandleState::Written));
        registry.transition(handle, HandleState::Read);
        registry.transition(handle, HandleState::Written);
        assert_eq!(registry.state(handle), Some(HandleState::Written));

        registry.transition(handle, HandleState::Freed);
        // Freed is terminal
        registry.transition(handle, HandleState::Read);
        assert_eq!(registry.state(handle), Some(HandleState::Freed));
    }

    #[test]
    fn test_freed_handle_fails_fast() {
        let registry = HandleRegistry::new();
        let handle = registry.register(9, VariableType::Float32, vec![4]);
        registry.transition(handle, HandleState::Freed);

        match registry.live("recv", handle).unwrap_err() {
            RemoteError::HandleNotLive {
                operation,
                handle,
                state,
            } => {
                assert_eq!(operation, "recv");
                assert_eq!(handle, 9);
                assert_eq!(state, "freed");
            }
            other => panic!("Expected HandleNotLive, got: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_handle_is_unallocated() {
        let other = HandleRegistry::new();
        let foreign = other.register(77, VariableType::Int32, vec![]);

        let registry = HandleRegistry::new();
        let err = registry.live("free", foreign).unwrap_err();
        assert!(err.is_local());
        assert!(err.to_string().contains("unallocated"));
    }

    #[test]
    fn test_invalidate_all() {
        let registry = HandleRegistry::new();
        let a = registry.register(1, VariableType::Float64, vec![]);
        let b = registry.register(2, VariableType::Float64, vec![3]);
        registry.transition(a, HandleState::Freed);

        assert_eq!(registry.live_handles(), vec![b]);
        assert_eq!(registry.invalidate_all(), 1);
        assert!(registry.live_handles().is_empty());
    }

    #[test]
    fn test_reissued_id_does_not_revive_old_handle() {
        let registry = HandleRegistry::new();
        let first = registry.register(1, VariableType::Float64, vec![]);
        registry.transition(first, HandleState::Freed);

        let second = registry.register(1, VariableType::Int32, vec![2]);
        assert_eq!(first.id(), second.id());
        assert_ne!(first, second);

        let info = registry.live("send", second).unwrap();
        assert_eq!(info.dtype, VariableType::Int32);

        let err = registry.live("send", first).unwrap_err();
        assert!(err.to_string().contains("freed"));
        assert_eq!(registry.state(first), Some(HandleState::Freed));
    }

    #[test]
    fn test_reset_then_reissue_keeps_old_handles_dead() {
        let registry = HandleRegistry::new();
        let before = registry.register(1, VariableType::Float64, vec![]);
        registry.invalidate_all();

        let after = registry.register(1, VariableType::Float64, vec![]);
        assert!(registry.live("recv", before).is_err());
        assert!(registry.live("recv", after).is_ok());
        assert_eq!(registry.live_handles(), vec![after]);
    }

    #[test]
    fn test_stale_transition_leaves_reissued_entry_alone() {
        let registry = HandleRegistry::new();
        let old = registry.register(7, VariableType::Int32, vec![]);
        let fresh = registry.register(7, VariableType::Int32, vec![]);

        // A late free of the old handle must not retire the new one
        registry.transition(old, HandleState::Freed);
        assert_eq!(registry.state(fresh), Some(HandleState::Allocated));
        registry.transition(fresh, HandleState::Written);
        assert_eq!(registry.state(fresh), Some(HandleState::Written));
    }
}
