/*!
 * Handler Executor
 * Runs one handler entry with failure isolation
 */

use super::entry::HandlerEntry;
use crate::core::RegistryConfig;
use crate::signals::core::types::{Ordinal, SignalId};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of invoking a single handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationOutcome {
    /// Handler returned Ok
    Completed,
    /// Handler returned an error
    Failed(String),
    /// Handler panicked and the panic was contained
    Panicked(String),
    /// Entry was revoked and not invoked
    Skipped,
}

impl InvocationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, InvocationOutcome::Failed(_) | InvocationOutcome::Panicked(_))
    }
}

/// Summary of one dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub signal: SignalId,
    /// Handlers that were called, successful or not
    pub invoked: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
    /// Revoked handlers passed over
    pub skipped: usize,
}

impl DispatchOutcome {
    pub fn empty(signal: SignalId) -> Self {
        Self {
            signal,
            invoked: 0,
            failed: 0,
            skipped: 0,
        }
    }

    /// True when nothing was registered for the signal
    pub fn is_noop(&self) -> bool {
        self.invoked == 0 && self.skipped == 0
    }

    pub(crate) fn record(&mut self, outcome: &InvocationOutcome) {
        match outcome {
            InvocationOutcome::Completed => self.invoked += 1,
            InvocationOutcome::Failed(_) | InvocationOutcome::Panicked(_) => {
                self.invoked += 1;
                self.failed += 1;
            }
            InvocationOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Handler executor
#[derive(Debug, Clone)]
pub struct HandlerInvoker {
    catch_panics: bool,
    slow_threshold: Duration,
}

impl HandlerInvoker {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            catch_panics: config.catch_panics,
            slow_threshold: config.slow_handler_threshold,
        }
    }

    /// Invoke `entry` with its bound arguments
    pub fn invoke(&self, signal: SignalId, entry: &HandlerEntry) -> InvocationOutcome {
        let ordinal = entry.ordinal();
        if !entry.is_active() {
            debug!(%signal, ordinal, "Skipping revoked handler");
            return InvocationOutcome::Skipped;
        }

        let start = Instant::now();
        let action = entry.action();
        let args = entry.bound_args();

        let outcome = if self.catch_panics {
            match panic::catch_unwind(AssertUnwindSafe(|| action(args))) {
                Ok(result) => Self::from_result(signal, ordinal, result),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(%signal, ordinal, panic = %message, "Signal handler panicked");
                    InvocationOutcome::Panicked(message)
                }
            }
        } else {
            Self::from_result(signal, ordinal, action(args))
        };

        let elapsed = start.elapsed();
        if elapsed > self.slow_threshold {
            warn!(
                %signal,
                ordinal,
                duration_ms = elapsed.as_millis() as u64,
                slow = true,
                "slow signal handler detected"
            );
        }

        outcome
    }

    fn from_result(
        signal: SignalId,
        ordinal: Ordinal,
        result: anyhow::Result<()>,
    ) -> InvocationOutcome {
        match result {
            Ok(()) => InvocationOutcome::Completed,
            Err(e) => {
                warn!(%signal, ordinal, error = %e, "Signal handler failed");
                InvocationOutcome::Failed(format!("{:#}", e))
            }
        }
    }
}

impl Default for HandlerInvoker {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
