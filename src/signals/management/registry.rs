/*!
 * Signal Registry
 * Ordered multi-handler lists multiplexed onto the OS single-slot trap table
 */

use super::builder::SignalRegistryBuilder;
use crate::core::limits::FIRST_ORDINAL;
use crate::core::RegistryConfig;
use crate::monitoring::DispatchSpan;
use crate::signals::core::atomic_stats::{AtomicRegistryStats, RegistryStats};
use crate::signals::core::traits::SignalTrap;
use crate::signals::core::types::*;
use crate::signals::handler::{
    DispatchOutcome, HandlerEntry, HandlerFn, HandlerInvoker, InvocationOutcome,
};
use ahash::HashMap;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Handlers of one signal in ascending-ordinal order
type HandlerList = BTreeMap<Ordinal, Arc<HandlerEntry>>;

/// Signal number -> handler list. Only non-empty lists are ever stored.
type SignalTable = HashMap<i32, Arc<HandlerList>>;

/// Signal registry
///
/// Cheap to clone; clones share the same state. Construct one per process at
/// the composition root and hand clones to whatever needs to register
/// handlers.
///
/// # Concurrency
/// - Readers (`dispatch`, `handler_exists`, `get_handlers`) load a snapshot
///   without locking
/// - Writers serialise on a mutex and publish a fresh table, so a dispatch in
///   progress keeps iterating the list it started with
#[derive(Clone)]
pub struct SignalRegistry {
    table: Arc<ArcSwap<SignalTable>>,
    write_lock: Arc<Mutex<()>>,
    trap: Arc<dyn SignalTrap>,
    invoker: HandlerInvoker,
    config: Arc<RegistryConfig>,
    diverged: Arc<Mutex<BTreeSet<i32>>>,
    stats: Arc<AtomicRegistryStats>,
}

impl SignalRegistry {
    /// Create a registry on top of `trap` with default configuration
    pub fn new(trap: Arc<dyn SignalTrap>) -> Self {
        Self::with_config(trap, RegistryConfig::default())
    }

    pub fn with_config(trap: Arc<dyn SignalTrap>, config: RegistryConfig) -> Self {
        info!(
            catch_panics = config.catch_panics,
            skip_redundant_install = config.skip_redundant_install,
            "Signal registry initialized"
        );
        Self {
            table: Arc::new(ArcSwap::from_pointee(SignalTable::default())),
            write_lock: Arc::new(Mutex::new(())),
            trap,
            invoker: HandlerInvoker::new(&config),
            config: Arc::new(config),
            diverged: Arc::new(Mutex::new(BTreeSet::new())),
            stats: Arc::new(AtomicRegistryStats::new()),
        }
    }

    pub fn builder() -> SignalRegistryBuilder {
        SignalRegistryBuilder::new()
    }

    /// Whether `self` and `other` are clones of the same registry
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.table, &other.table)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Without an ordinal: true iff the signal has at least one handler.
    /// With an ordinal: true iff that entry exists and is active.
    pub fn handler_exists(&self, signal: impl Into<SignalId>, ordinal: Option<Ordinal>) -> bool {
        let signal = signal.into();
        let table = self.table.load();
        match (table.get(&signal.value()), ordinal) {
            (None, _) => false,
            (Some(list), None) => !list.is_empty(),
            (Some(list), Some(ordinal)) => list.get(&ordinal).is_some_and(|e| e.is_active()),
        }
    }

    /// Snapshot of the handlers for `signal` in invocation order
    pub fn get_handlers(&self, signal: impl Into<SignalId>) -> Vec<Arc<HandlerEntry>> {
        let signal = signal.into();
        self.table
            .load()
            .get(&signal.value())
            .map(|list| list.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn handler_count(&self, signal: impl Into<SignalId>) -> usize {
        let signal = signal.into();
        self.table
            .load()
            .get(&signal.value())
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Signals with at least one handler, ascending
    pub fn registered_signals(&self) -> Vec<SignalId> {
        let mut signals: Vec<SignalId> = self
            .table
            .load()
            .keys()
            .copied()
            .map(SignalId::from_raw)
            .collect();
        signals.sort_unstable();
        signals
    }

    /// Signals whose handlers are gone but whose default disposition could
    /// not be restored
    pub fn diverged_signals(&self) -> Vec<SignalId> {
        self.diverged
            .lock()
            .iter()
            .copied()
            .map(SignalId::from_raw)
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.snapshot()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register `action` for `signal`.
    ///
    /// Without an ordinal the entry goes after every existing one. A
    /// caller-supplied ordinal that is already taken replaces that entry in
    /// place. The first handler for a signal installs the OS trap; if that
    /// fails nothing is registered.
    pub fn add_handler(
        &self,
        signal: impl Into<SignalId>,
        action: HandlerFn,
        bound_args: Vec<Value>,
        ordinal: Option<Ordinal>,
    ) -> RegistryResult<Ordinal> {
        let signal = signal.into();
        self.ensure_trappable(signal)?;

        let _guard = self.write_lock.lock();
        let table = self.table.load_full();
        let existing = table.get(&signal.value());

        let ordinal = match ordinal {
            Some(ordinal) => ordinal,
            None => next_ordinal(existing.map(|l| &**l))
                .ok_or(RegistryError::OrdinalExhausted(signal))?,
        };
        let mut list: HandlerList = existing.map(|l| (**l).clone()).unwrap_or_default();
        let replaced = list.insert(
            ordinal,
            Arc::new(HandlerEntry::new(ordinal, action, bound_args)),
        );

        if existing.is_none() {
            self.attach(signal)?;
        }
        self.publish(&table, signal, Some(list));

        match replaced {
            Some(old) => {
                old.revoke();
                debug!(%signal, ordinal, "Replaced handler at existing ordinal");
            }
            None => self.stats.inc_handlers(),
        }

        debug!(%signal, ordinal, "Added signal handler");
        Ok(ordinal)
    }

    /// Register a closure with no bound arguments after existing handlers
    pub fn add<F>(&self, signal: impl Into<SignalId>, f: F) -> RegistryResult<Ordinal>
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_handler(signal, Arc::new(f), Vec::new(), None)
    }

    /// Register a closure with bound arguments after existing handlers
    pub fn add_with_args<F>(
        &self,
        signal: impl Into<SignalId>,
        bound_args: Vec<Value>,
        f: F,
    ) -> RegistryResult<Ordinal>
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_handler(signal, Arc::new(f), bound_args, None)
    }

    /// Register a closure at an explicit ordinal
    pub fn add_at<F>(
        &self,
        signal: impl Into<SignalId>,
        ordinal: Ordinal,
        f: F,
    ) -> RegistryResult<Ordinal>
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_handler(signal, Arc::new(f), Vec::new(), Some(ordinal))
    }

    /// Make `action` the only handler for `signal`, at the first ordinal.
    ///
    /// Existing handlers are revoked. The trap stays installed throughout, so
    /// there is no window in which the default disposition applies.
    pub fn replace_handlers(
        &self,
        signal: impl Into<SignalId>,
        action: HandlerFn,
        bound_args: Vec<Value>,
    ) -> RegistryResult<Ordinal> {
        let signal = signal.into();
        self.ensure_trappable(signal)?;

        let _guard = self.write_lock.lock();
        let table = self.table.load_full();
        let existing = table.get(&signal.value()).cloned();

        if existing.is_none() {
            self.attach(signal)?;
        }

        let mut list = HandlerList::new();
        list.insert(
            FIRST_ORDINAL,
            Arc::new(HandlerEntry::new(FIRST_ORDINAL, action, bound_args)),
        );
        self.publish(&table, signal, Some(list));
        self.stats.inc_handlers();

        if let Some(old) = existing {
            Self::revoke_all(&old);
            self.stats.dec_handlers(old.len());
        }

        debug!(%signal, "Replaced all signal handlers");
        Ok(FIRST_ORDINAL)
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Remove one handler.
    ///
    /// Without an ordinal removes the highest-ordinal entry. When the list
    /// becomes empty the default disposition is restored; if that fails the
    /// removal still stands and `DispositionDiverged` is returned.
    pub fn remove_handler(
        &self,
        signal: impl Into<SignalId>,
        ordinal: Option<Ordinal>,
    ) -> RegistryResult<Ordinal> {
        let signal = signal.into();
        self.ensure_trappable(signal)?;

        let _guard = self.write_lock.lock();
        let table = self.table.load_full();
        let existing = table
            .get(&signal.value())
            .ok_or(RegistryError::NoHandlers(signal))?;

        let target = match ordinal {
            Some(ordinal) => match existing.get(&ordinal) {
                Some(entry) if entry.is_active() => ordinal,
                _ => return Err(RegistryError::UnknownOrdinal { signal, ordinal }),
            },
            None => *existing
                .keys()
                .next_back()
                .ok_or(RegistryError::NoHandlers(signal))?,
        };

        let mut list: HandlerList = (**existing).clone();
        if let Some(removed) = list.remove(&target) {
            removed.revoke();
        }
        self.stats.dec_handlers(1);
        debug!(%signal, ordinal = target, "Removed signal handler");

        if list.is_empty() {
            self.publish(&table, signal, None);
            self.detach(signal)?;
        } else {
            self.publish(&table, signal, Some(list));
        }

        Ok(target)
    }

    /// Drop every handler for `signal` and restore the default disposition.
    ///
    /// The restore call is issued even when no handlers were registered.
    pub fn clear_handlers(&self, signal: impl Into<SignalId>) -> RegistryResult<()> {
        let signal = signal.into();
        self.ensure_trappable(signal)?;

        let _guard = self.write_lock.lock();
        self.clear_locked(signal)
    }

    /// Clear every registered signal.
    ///
    /// Every signal is attempted; the first failure is returned.
    pub fn clear_all_handlers(&self) -> RegistryResult<()> {
        let _guard = self.write_lock.lock();
        let signals: Vec<SignalId> = self
            .table
            .load()
            .keys()
            .copied()
            .map(SignalId::from_raw)
            .collect();

        let mut first_error = None;
        for signal in signals {
            if let Err(e) = self.clear_locked(signal) {
                first_error.get_or_insert(e);
            }
        }

        self.table.store(Arc::new(SignalTable::default()));
        info!("Cleared all signal handlers");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Disable a handler in place without removing it.
    ///
    /// Dispatch skips revoked handlers; `prune_revoked` removes them.
    pub fn revoke_handler(
        &self,
        signal: impl Into<SignalId>,
        ordinal: Ordinal,
    ) -> RegistryResult<()> {
        let signal = signal.into();
        let _guard = self.write_lock.lock();
        let table = self.table.load();

        let entry = table
            .get(&signal.value())
            .and_then(|list| list.get(&ordinal))
            .ok_or(RegistryError::UnknownOrdinal { signal, ordinal })?;

        if entry.revoke() {
            debug!(%signal, ordinal, "Revoked signal handler");
            Ok(())
        } else {
            Err(RegistryError::UnknownOrdinal { signal, ordinal })
        }
    }

    /// Remove revoked handlers of `signal`. Returns how many were removed.
    pub fn prune_revoked(&self, signal: impl Into<SignalId>) -> RegistryResult<usize> {
        let signal = signal.into();
        let _guard = self.write_lock.lock();
        self.prune_locked(signal)
    }

    /// Remove revoked handlers of every signal
    pub fn prune_all_revoked(&self) -> RegistryResult<usize> {
        let _guard = self.write_lock.lock();
        let signals: Vec<SignalId> = self
            .table
            .load()
            .keys()
            .copied()
            .map(SignalId::from_raw)
            .collect();

        let mut pruned = 0;
        let mut first_error = None;
        for signal in signals {
            match self.prune_locked(signal) {
                Ok(n) => pruned += n,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(pruned),
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Invoke every handler of `signal` in ascending-ordinal order.
    ///
    /// Runs on a snapshot, so handlers may add or remove registrations; those
    /// changes apply from the next dispatch. A failing or panicking handler
    /// does not stop the ones after it.
    pub fn dispatch(&self, signal: impl Into<SignalId>) -> DispatchOutcome {
        let signal = signal.into();
        let mut outcome = DispatchOutcome::empty(signal);

        let Some(list) = self.table.load().get(&signal.value()).cloned() else {
            trace!(%signal, "No handlers registered, ignoring delivery");
            return outcome;
        };

        let span = DispatchSpan::new(signal, list.len());
        let _entered = span.enter();
        self.stats.inc_dispatches();

        for entry in list.values() {
            let result = self.invoker.invoke(signal, entry);
            match &result {
                InvocationOutcome::Skipped => self.stats.inc_skipped(),
                InvocationOutcome::Completed => self.stats.inc_invocations(),
                InvocationOutcome::Failed(_) | InvocationOutcome::Panicked(_) => {
                    self.stats.inc_invocations();
                    self.stats.inc_failures();
                }
            }
            outcome.record(&result);
        }

        span.record_outcome(&outcome);
        outcome
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_trappable(&self, signal: SignalId) -> RegistryResult<()> {
        if signal.is_trappable() {
            Ok(())
        } else {
            debug!(%signal, "Rejected untrappable signal");
            Err(RegistryError::UnsupportedSignal(signal))
        }
    }

    /// Point the OS slot for `signal` at the dispatcher
    fn attach(&self, signal: SignalId) -> RegistryResult<()> {
        if self.config.skip_redundant_install {
            match self.trap.disposition(signal) {
                Ok(TrapDisposition::Dispatcher) => {
                    debug!(%signal, "Trap already routed to dispatcher");
                    self.diverged.lock().remove(&signal.value());
                    return Ok(());
                }
                Ok(TrapDisposition::Foreign) => {
                    warn!(%signal, "Replacing foreign signal disposition");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(%signal, error = %e, "Disposition query failed, installing anyway");
                }
            }
        }

        match self.trap.install(signal) {
            Ok(()) => {
                self.stats.inc_installed();
                self.diverged.lock().remove(&signal.value());
                info!(%signal, "Installed signal trap");
                Ok(())
            }
            Err(source) => {
                self.stats.inc_trap_failures();
                warn!(%signal, error = %source, "Failed to install signal trap");
                Err(RegistryError::TrapInstallation { signal, source })
            }
        }
    }

    /// Restore the default disposition, recording divergence on failure
    fn detach(&self, signal: SignalId) -> RegistryResult<()> {
        match self.trap.restore_default(signal) {
            Ok(()) => {
                self.stats.inc_restored();
                self.diverged.lock().remove(&signal.value());
                info!(%signal, "Restored default signal disposition");
                Ok(())
            }
            Err(source) => {
                self.stats.inc_trap_failures();
                self.diverged.lock().insert(signal.value());
                error!(
                    %signal,
                    error = %source,
                    "Handler list is empty but the default disposition could not be restored"
                );
                Err(RegistryError::DispositionDiverged { signal, source })
            }
        }
    }

    /// Publish a new table with `signal` set to `list`, or removed when `None`.
    /// Caller holds the write lock and passes the table it loaded under it.
    fn publish(&self, current: &SignalTable, signal: SignalId, list: Option<HandlerList>) {
        let mut next = current.clone();
        match list {
            Some(list) if !list.is_empty() => {
                next.insert(signal.value(), Arc::new(list));
            }
            _ => {
                next.remove(&signal.value());
            }
        }
        self.table.store(Arc::new(next));
    }

    fn clear_locked(&self, signal: SignalId) -> RegistryResult<()> {
        let table = self.table.load_full();
        if let Some(old) = table.get(&signal.value()) {
            Self::revoke_all(old);
            self.stats.dec_handlers(old.len());
            self.publish(&table, signal, None);
            debug!(%signal, count = old.len(), "Cleared signal handlers");
        }
        self.detach(signal)
    }

    fn prune_locked(&self, signal: SignalId) -> RegistryResult<usize> {
        let table = self.table.load_full();
        let Some(existing) = table.get(&signal.value()) else {
            return Ok(0);
        };

        let list: HandlerList = existing
            .iter()
            .filter(|(_, entry)| entry.is_active())
            .map(|(ordinal, entry)| (*ordinal, entry.clone()))
            .collect();
        let pruned = existing.len() - list.len();
        if pruned == 0 {
            return Ok(0);
        }

        self.stats.dec_handlers(pruned);
        debug!(%signal, pruned, "Pruned revoked signal handlers");

        if list.is_empty() {
            self.publish(&table, signal, None);
            self.detach(signal)?;
        } else {
            self.publish(&table, signal, Some(list));
        }
        Ok(pruned)
    }

    fn revoke_all(list: &HandlerList) {
        for entry in list.values() {
            entry.revoke();
        }
    }
}

/// Highest existing ordinal + 1, or the first ordinal for an empty list.
/// `None` when the highest ordinal is already `Ordinal::MAX`.
fn next_ordinal(list: Option<&HandlerList>) -> Option<Ordinal> {
    match list.and_then(|l| l.keys().next_back()) {
        Some(highest) => highest.checked_add(1),
        None => Some(FIRST_ORDINAL),
    }
}

impl std::fmt::Debug for SignalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRegistry")
            .field("signals", &self.registered_signals())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
