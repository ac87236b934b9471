//! State shared by every emulated hardware thread of one guest.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::mem::{GuestMemory, GuestMemoryResult};

/// Construction-time knobs for a [`System`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemConfig {
    /// Guest RAM size in bytes. Rounded up to a whole page.
    pub ram_size: u64,
    /// Guest page size in bytes; must be a power of two.
    pub page_size: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            ram_size: 16 * 1024 * 1024,
            page_size: 4096,
        }
    }
}

/// The system-wide fallback lock for LOCK-prefixed accesses the host cannot
/// perform with a native atomic (byte/word widths, unaligned operands).
///
/// Holding the lock serializes LOCK-prefixed operations against each other
/// only; unlocked guest accesses are never ordered by it.
#[derive(Debug, Default)]
pub struct SharedLock {
    inner: Mutex<()>,
}

impl SharedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        // The mutex guards no data, so poisoning carries no meaning here.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the lock only for LOCK-prefixed instructions.
    pub fn lock_if(&self, locked: bool) -> Option<MutexGuard<'_, ()>> {
        locked.then(|| self.lock())
    }
}

#[derive(Debug)]
pub struct System {
    memory: GuestMemory,
    lock: SharedLock,
}

impl System {
    pub fn new(config: SystemConfig) -> GuestMemoryResult<Self> {
        let memory = GuestMemory::new(config.ram_size, config.page_size)?;
        tracing::debug!(
            ram_size = memory.size(),
            page_size = memory.page_size(),
            "guest system created"
        );
        Ok(Self {
            memory,
            lock: SharedLock::new(),
        })
    }

    #[inline]
    pub fn memory(&self) -> &GuestMemory {
        &self.memory
    }

    #[inline]
    pub fn lock(&self) -> &SharedLock {
        &self.lock
    }
}
