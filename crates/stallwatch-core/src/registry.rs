//! Directory of supervised liveness handles.
//!
//! The registry never owns a handle: entries hold a `Weak` so a worker that
//! exits without deregistering simply leaves a dead entry behind, which the
//! supervisor reclaims on its next scan. The lock guards membership only and
//! is never held while touching, scanning, or running actions.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use crate::clock::Clock;
use crate::error::RegistrationError;
use crate::handle::{LivenessHandle, WorkerId};

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: WorkerId,
    /// Distinguishes successive registrations under the same identity.
    pub generation: u64,
    pub handle: Weak<LivenessHandle>,
}

impl RegistryEntry {
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.handle.strong_count() > 0
    }
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    handle: Weak<LivenessHandle>,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<WorkerId, Slot>,
    next_generation: u64,
}

/// Thread-safe worker directory.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a handle for `id`.
    ///
    /// Fails if a live handle is already registered under `id`. A dead entry
    /// left behind by a dropped handle is replaced.
    pub fn register(
        &self,
        id: WorkerId,
        touch_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<LivenessHandle>, RegistrationError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner
            .slots
            .get(&id)
            .is_some_and(|slot| slot.handle.strong_count() > 0)
        {
            return Err(RegistrationError::Duplicate { id });
        }

        let handle = Arc::new(LivenessHandle::new(id, touch_interval, clock));
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.slots.insert(
            id,
            Slot {
                generation,
                handle: Arc::downgrade(&handle),
            },
        );
        Ok(handle)
    }

    /// Remove `id`. Returns whether an entry was present.
    pub fn deregister(&self, id: WorkerId) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .remove(&id)
            .is_some()
    }

    /// Copy of the current entries, for iteration without the lock held.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .slots
            .iter()
            .map(|(id, slot)| RegistryEntry {
                id: *id,
                generation: slot.generation,
                handle: slot.handle.clone(),
            })
            .collect()
    }

    /// Drop entries whose handle no longer exists. Returns how many were removed.
    pub fn reclaim(&self) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.slots.len();
        inner.slots.retain(|_, slot| slot.handle.strong_count() > 0);
        before - inner.slots.len()
    }

    /// Number of entries, including dead ones not yet reclaimed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: WorkerId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .contains_key(&id)
    }
}
