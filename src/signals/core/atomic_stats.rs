/*!
 * Lock-Free Registry Statistics
 * Uses atomic counters so dispatch never contends on stats tracking
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Registry statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub handlers_registered: usize,
    pub handlers_removed: u64,
    pub dispatches: u64,
    pub handler_invocations: u64,
    pub handler_failures: u64,
    pub handlers_skipped: u64,
    pub traps_installed: u64,
    pub traps_restored: u64,
    pub trap_failures: u64,
}

/// Atomic registry statistics for lock-free updates
///
/// # Performance
/// - Cache-line aligned to prevent false sharing
/// - All operations use relaxed ordering
#[repr(C, align(64))]
#[derive(Debug)]
pub struct AtomicRegistryStats {
    handlers_registered: AtomicUsize,
    handlers_removed: AtomicU64,
    dispatches: AtomicU64,
    handler_invocations: AtomicU64,
    handler_failures: AtomicU64,
    handlers_skipped: AtomicU64,
    traps_installed: AtomicU64,
    traps_restored: AtomicU64,
    trap_failures: AtomicU64,
}

impl AtomicRegistryStats {
    #[inline]
    pub const fn new() -> Self {
        Self {
            handlers_registered: AtomicUsize::new(0),
            handlers_removed: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            handler_invocations: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            handlers_skipped: AtomicU64::new(0),
            traps_installed: AtomicU64::new(0),
            traps_restored: AtomicU64::new(0),
            trap_failures: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn inc_handlers(&self) {
        self.handlers_registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement live handler count and record the removals
    #[inline(always)]
    pub fn dec_handlers(&self, count: usize) {
        if count == 0 {
            return;
        }
        let _ = self
            .handlers_registered
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(count))
            });
        self.handlers_removed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Hot path - called on every dispatch
    #[inline(always)]
    pub fn inc_dispatches(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Hot path - called on every handler invocation
    #[inline(always)]
    pub fn inc_invocations(&self) {
        self.handler_invocations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_failures(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_skipped(&self) {
        self.handlers_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_installed(&self) {
        self.traps_installed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_restored(&self) {
        self.traps_restored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_trap_failures(&self) {
        self.trap_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats (no locks required)
    ///
    /// # Note
    /// Values may not be perfectly consistent with each other under concurrent
    /// updates, but each individual value is accurate.
    #[inline]
    pub fn snapshot(&self) -> RegistryStats {
        RegistryStats {
            handlers_registered: self.handlers_registered.load(Ordering::Relaxed),
            handlers_removed: self.handlers_removed.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            handler_invocations: self.handler_invocations.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handlers_skipped: self.handlers_skipped.load(Ordering::Relaxed),
            traps_installed: self.traps_installed.load(Ordering::Relaxed),
            traps_restored: self.traps_restored.load(Ordering::Relaxed),
            trap_failures: self.trap_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for AtomicRegistryStats {
    fn default() -> Self {
        Self::new()
    }
}
