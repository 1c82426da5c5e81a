/*!
 * Signal Core - Types and Traits
 * Signal identity, error taxonomy, statistics and the OS trap boundary
 */

pub mod atomic_stats;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use atomic_stats::{AtomicRegistryStats, RegistryStats};
pub use traits::*;
pub use types::*;
