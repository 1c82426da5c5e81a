/*!
 * Signals Module
 * Process-wide multi-handler registry over POSIX signal dispositions
 */

pub mod core;
pub mod handler;
pub mod management;
pub mod trap;

// Re-export public API
pub use self::core::{
    value_of, AtomicRegistryStats, Ordinal, PosixSignal, RegistryError, RegistryResult,
    RegistryStats, SignalId, SignalTrap, TrapDisposition, TrapError, TrapResult,
};
pub use handler::{
    handler_fn, DispatchOutcome, HandlerEntry, HandlerFn, HandlerInvoker, HandlerState,
    InvocationOutcome,
};
pub use management::{SignalRegistry, SignalRegistryBuilder};
pub use trap::{AsyncDeliveryPump, DeliveryPump, PosixTrap};
