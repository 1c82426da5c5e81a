/*!
 * Signal Traits
 * Boundary between the registry and the OS single-slot trap table
 */

use super::types::{SignalId, TrapDisposition, TrapResult};

/// OS signal facility.
///
/// The platform keeps exactly one disposition per signal number. The registry
/// multiplexes its handler lists onto that slot through this trait.
pub trait SignalTrap: Send + Sync {
    /// Route `signal` to the dispatcher, replacing the previous disposition
    fn install(&self, signal: SignalId) -> TrapResult<()>;

    /// Reset `signal` to the platform default disposition
    fn restore_default(&self, signal: SignalId) -> TrapResult<()>;

    /// Report the current disposition of `signal`
    fn disposition(&self, signal: SignalId) -> TrapResult<TrapDisposition>;
}
