/*!
 * Signal Trap - OS Bridge
 * sigaction trap with self-pipe delivery and the pumps that drain it
 */

mod posix;
mod pump;

// Re-export public API
pub use posix::PosixTrap;
pub use pump::{AsyncDeliveryPump, DeliveryPump};
