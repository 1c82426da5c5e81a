/*!
 * Delivery Pumps
 * Move recorded deliveries from the trap's pipe into registry dispatch
 */

use super::posix::PosixTrap;
use crate::signals::core::types::RegistryResult;
use crate::signals::handler::DispatchOutcome;
use crate::signals::management::SignalRegistry;
use std::future::Future;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{debug, info};

/// Synchronous pump
///
/// Call [`pump_pending`](Self::pump_pending) from a main loop, or block in
/// [`wait_and_pump`](Self::wait_and_pump).
#[derive(Debug, Clone)]
pub struct DeliveryPump {
    trap: Arc<PosixTrap>,
    registry: SignalRegistry,
}

impl DeliveryPump {
    pub fn new(trap: Arc<PosixTrap>, registry: SignalRegistry) -> Self {
        Self { trap, registry }
    }

    /// Pump built on the process-wide trap
    pub fn shared(registry: SignalRegistry) -> RegistryResult<Self> {
        Ok(Self::new(PosixTrap::shared()?, registry))
    }

    pub fn registry(&self) -> &SignalRegistry {
        &self.registry
    }

    /// Dispatch every delivery recorded so far, in arrival order
    pub fn pump_pending(&self) -> Vec<DispatchOutcome> {
        let delivered = self.trap.drain();
        if !delivered.is_empty() {
            debug!(count = delivered.len(), "Pumping signal deliveries");
        }
        delivered
            .into_iter()
            .map(|signal| self.registry.dispatch(signal))
            .collect()
    }

    /// Block until a delivery arrives or `timeout` elapses, then pump.
    ///
    /// Returns an empty batch on timeout.
    pub fn wait_and_pump(&self, timeout: Option<Duration>) -> RegistryResult<Vec<DispatchOutcome>> {
        if self.trap.wait(timeout)? {
            Ok(self.pump_pending())
        } else {
            Ok(Vec::new())
        }
    }
}

/// Tokio pump
///
/// Registers a duplicate of the delivery pipe with the reactor. Must be
/// created inside a runtime.
pub struct AsyncDeliveryPump {
    fd: AsyncFd<OwnedFd>,
    pump: DeliveryPump,
}

impl AsyncDeliveryPump {
    pub fn new(pump: DeliveryPump) -> io::Result<Self> {
        let fd = pump.trap.try_clone_delivery_fd()?;
        let fd = AsyncFd::with_interest(fd, Interest::READABLE)?;
        Ok(Self { fd, pump })
    }

    /// Wait for the next non-empty batch of dispatches
    pub async fn next_batch(&self) -> io::Result<Vec<DispatchOutcome>> {
        loop {
            let mut guard = self.fd.readable().await?;
            // Cleared before draining so a byte written mid-drain re-arms readiness
            guard.clear_ready();
            let batch = self.pump.pump_pending();
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
    }

    /// Pump until `shutdown` resolves. Returns the number of dispatches run.
    pub async fn run_until<F>(&self, shutdown: F) -> io::Result<usize>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut dispatched = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(dispatched, "Signal pump stopped");
                    return Ok(dispatched);
                }
                batch = self.next_batch() => {
                    dispatched += batch?.len();
                }
            }
        }
    }

    pub fn pump(&self) -> &DeliveryPump {
        &self.pump
    }
}

impl std::fmt::Debug for AsyncDeliveryPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDeliveryPump")
            .field("pump", &self.pump)
            .finish_non_exhaustive()
    }
}
