/*!
 * Signal Registry Builder
 * Builder pattern for SignalRegistry construction
 */

use super::registry::SignalRegistry;
use crate::core::RegistryConfig;
use crate::signals::core::traits::SignalTrap;
use crate::signals::core::types::RegistryResult;
use crate::signals::trap::PosixTrap;
use parking_lot::{const_mutex, Mutex};
use std::sync::Arc;
use tracing::warn;

/// Registry bound to the process-wide POSIX trap
static PROCESS_REGISTRY: Mutex<Option<SignalRegistry>> = const_mutex(None);

/// Builder for SignalRegistry
pub struct SignalRegistryBuilder {
    trap: Option<Arc<dyn SignalTrap>>,
    config: Option<RegistryConfig>,
}

impl SignalRegistryBuilder {
    pub fn new() -> Self {
        Self {
            trap: None,
            config: None,
        }
    }

    /// Use a specific trap instead of the process-wide POSIX trap
    pub fn with_trap(mut self, trap: Arc<dyn SignalTrap>) -> Self {
        self.trap = Some(trap);
        self
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Read configuration from the environment
    pub fn with_env_config(self) -> Self {
        self.with_config(RegistryConfig::from_env())
    }

    /// Build the registry.
    ///
    /// With an explicit trap a new registry is created. Without one the
    /// registry bound to [`PosixTrap::shared`] is returned, created on first
    /// use. Every such call yields a clone of that same registry, and
    /// configuration only applies to the first one. Fails if the delivery pipe
    /// cannot be created.
    pub fn build(self) -> RegistryResult<SignalRegistry> {
        match self.trap {
            Some(trap) => Ok(SignalRegistry::with_config(
                trap,
                self.config.unwrap_or_default(),
            )),
            None => Self::process_registry(self.config),
        }
    }

    fn process_registry(config: Option<RegistryConfig>) -> RegistryResult<SignalRegistry> {
        let mut slot = PROCESS_REGISTRY.lock();
        if let Some(registry) = slot.as_ref() {
            if config.as_ref().is_some_and(|c| c != registry.config()) {
                warn!("Process registry already built, ignoring new configuration");
            }
            return Ok(registry.clone());
        }

        let trap: Arc<dyn SignalTrap> = PosixTrap::shared()?;
        let registry = SignalRegistry::with_config(trap, config.unwrap_or_default());
        *slot = Some(registry.clone());
        Ok(registry)
    }
}

impl Default for SignalRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
