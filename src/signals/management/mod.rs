/*!
 * Signal Management - Registry
 * Central handler registry and its builder
 */

mod builder;
mod registry;

// Re-export public API
pub use builder::SignalRegistryBuilder;
pub use registry::SignalRegistry;
