//! Storage for the DI container
//!
//! Uses DashMap for lock-free concurrent access to registrations and to the
//! realized instances of each lifetime. Instances are initialized through a
//! per-key `OnceCell`, so concurrent resolvers build each one at most once.

use crate::error::{DiError, Result};
use crate::factory::AnyInstance;
use crate::key::ServiceKey;
use crate::registration::{Realized, Registration, Teardown};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::OnceCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Pick a shard count for the expected number of entries.
///
/// Default DashMap uses num_cpus * 4 shards which is overkill for
/// typical DI containers with <50 services.
#[inline]
fn shard_amount(capacity: usize) -> usize {
    if capacity <= 16 {
        8
    } else if capacity <= 64 {
        16
    } else {
        32
    }
}

#[inline]
pub(crate) fn new_map<K, V>(capacity: usize) -> DashMap<K, V, RandomState>
where
    K: Eq + std::hash::Hash,
{
    DashMap::with_capacity_and_hasher_and_shard_amount(
        capacity,
        RandomState::new(),
        shard_amount(capacity),
    )
}

// A poisoned lock only means another resolver panicked; the data is still usable.

#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[inline]
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

#[inline]
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Registrations
// =============================================================================

/// Thread-safe table of registrations, one per service key.
pub(crate) struct ServiceStorage {
    registrations: DashMap<ServiceKey, Arc<Registration>, RandomState>,
}

impl ServiceStorage {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::with_capacity(0)
    }

    #[inline]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            registrations: new_map(capacity),
        }
    }

    /// Insert a registration, rejecting a second one for the same key.
    pub(crate) fn insert(&self, registration: Arc<Registration>) -> Result<()> {
        match self.registrations.entry(registration.key()) {
            Entry::Occupied(existing) => Err(DiError::already_registered(*existing.key())),
            Entry::Vacant(slot) => {
                slot.insert(registration);
                Ok(())
            }
        }
    }

    /// Look up a registration. The map guard is released before returning.
    #[inline]
    pub(crate) fn get(&self, key: &ServiceKey) -> Option<Arc<Registration>> {
        self.registrations.get(key).map(|entry| Arc::clone(entry.value()))
    }

    #[inline]
    pub(crate) fn contains(&self, key: &ServiceKey) -> bool {
        self.registrations.contains_key(key)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.registrations.len()
    }

    pub(crate) fn keys(&self) -> Vec<ServiceKey> {
        self.registrations.iter().map(|entry| *entry.key()).collect()
    }
}

// =============================================================================
// Realized instances
// =============================================================================

/// Realized instances of one lifetime level (the root or a single scope).
///
/// Remembers the order in which disposable instances were created so they
/// can be torn down in reverse.
pub(crate) struct InstanceCache {
    cells: DashMap<ServiceKey, Arc<OnceCell<AnyInstance>>, RandomState>,
    teardowns: Mutex<Vec<Teardown>>,
}

impl InstanceCache {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::with_capacity(0)
    }

    #[inline]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            cells: new_map(capacity),
            teardowns: Mutex::new(Vec::new()),
        }
    }

    /// Fast path: an instance that is already realized.
    #[inline]
    pub(crate) fn get(&self, key: &ServiceKey) -> Option<AnyInstance> {
        self.cells
            .get(key)
            .and_then(|cell| cell.value().get().cloned())
    }

    #[inline]
    pub(crate) fn is_realized(&self, key: &ServiceKey) -> bool {
        self.get(key).is_some()
    }

    /// Return the instance for `key`, realizing it with `realize` if needed.
    ///
    /// `realize` runs at most once per key even under contention; a failed
    /// attempt leaves the cell empty so a later call may retry.
    ///
    /// Contending callers block on the cell. Cycle detection lives in the
    /// caller's resolution path, which is per thread, so two threads each
    /// realizing one half of a singleton cycle wait on each other forever.
    pub(crate) fn get_or_realize<F>(&self, key: ServiceKey, realize: F) -> Result<AnyInstance>
    where
        F: FnOnce() -> Result<Realized>,
    {
        // Clone the cell out so no shard lock is held while realizing,
        // which may resolve other keys from this same cache.
        let cell = Arc::clone(&*self.cells.entry(key).or_default());

        cell.get_or_try_init(|| {
            let realized = realize()?;
            if let Some(teardown) = realized.teardown {
                lock(&self.teardowns).push(teardown);
            }
            Ok(realized.instance)
        })
        .cloned()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.value().get().is_some())
            .count()
    }

    /// Dispose every tracked instance in reverse realization order.
    ///
    /// Every disposer runs even if earlier ones fail or panic; the failure
    /// messages are returned. The cache is empty afterwards.
    pub(crate) fn dispose(&self) -> Vec<String> {
        let teardowns = std::mem::take(&mut *lock(&self.teardowns));
        let mut failures = Vec::new();

        for teardown in teardowns.into_iter().rev() {
            let outcome = catch_unwind(AssertUnwindSafe(|| teardown.run()));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{}: {}", teardown.name(), e)),
                Err(_) => Some(format!("{}: disposer panicked", teardown.name())),
            };

            #[cfg(feature = "logging")]
            match &failure {
                Some(message) => warn!(
                    target: crate::logging::TARGET,
                    failure = %message,
                    "Service disposal failed"
                ),
                None => debug!(
                    target: crate::logging::TARGET,
                    implementation = teardown.name(),
                    "Disposed service instance"
                ),
            }

            failures.extend(failure);
        }

        self.cells.clear();
        failures
    }
}

/// Turn collected disposal failures into a result.
pub(crate) fn disposal_result(failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DiError::DisposalFailed { failures })
    }
}
