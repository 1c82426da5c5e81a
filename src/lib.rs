/*!
 * POSIX Signal Manager
 * Ordered multi-handler registry on top of the single-slot OS signal table
 *
 * ```no_run
 * use posix_signal_manager::{DeliveryPump, PosixSignal, SignalRegistry};
 *
 * let registry = SignalRegistry::builder().with_env_config().build()?;
 * registry.add(PosixSignal::Terminate, |_| {
 *     println!("shutting down");
 *     Ok(())
 * })?;
 *
 * let pump = DeliveryPump::shared(registry.clone())?;
 * loop {
 *     pump.wait_and_pump(None)?;
 * }
 * # Ok::<(), posix_signal_manager::RegistryError>(())
 * ```
 */

pub mod core;
pub mod monitoring;
pub mod signals;

// Re-exports
pub use crate::core::RegistryConfig;
pub use monitoring::init_tracing;
pub use signals::{
    handler_fn, value_of, AsyncDeliveryPump, DeliveryPump, DispatchOutcome, HandlerEntry,
    HandlerFn, HandlerState, InvocationOutcome, Ordinal, PosixSignal, PosixTrap, RegistryError,
    RegistryResult, RegistryStats, SignalId, SignalRegistry, SignalRegistryBuilder, SignalTrap,
    TrapDisposition, TrapError, TrapResult,
};
