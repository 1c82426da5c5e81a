/*!
 * Core Module
 * Configuration and shared limits
 */

pub mod config;
pub mod limits;

// Re-export for convenience
pub use config::RegistryConfig;
