/*!
 * Registry Configuration
 *
 * Dispatch and trap-installation policies for a signal registry.
 */

use super::limits::{
    DEFAULT_SLOW_HANDLER_THRESHOLD, ENV_CATCH_PANICS, ENV_SKIP_REDUNDANT_INSTALL,
    ENV_SLOW_HANDLER_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`SignalRegistry`](crate::signals::SignalRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Contain panics raised by a handler so sibling handlers still run (default: true)
    pub catch_panics: bool,

    /// Handlers slower than this are logged at warn level (default: 10ms)
    pub slow_handler_threshold: Duration,

    /// Query the current disposition before installing a trap and skip the
    /// install when it already points at the dispatcher (default: true)
    pub skip_redundant_install: bool,
}

impl RegistryConfig {
    /// Create default configuration
    pub fn new() -> Self {
        Self {
            catch_panics: true,
            slow_handler_threshold: DEFAULT_SLOW_HANDLER_THRESHOLD,
            skip_redundant_install: true,
        }
    }

    /// Let handler panics propagate to the pump (testing and debugging)
    pub fn strict() -> Self {
        Self {
            catch_panics: false,
            ..Self::new()
        }
    }

    /// Build configuration from environment variables.
    ///
    /// Environment variables:
    /// - SIGNAL_CATCH_PANICS: `0`/`false` disables panic isolation
    /// - SIGNAL_SLOW_HANDLER_MS: slow handler threshold in milliseconds
    /// - SIGNAL_SKIP_REDUNDANT_INSTALL: `0`/`false` always reinstalls traps
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::new();

        Self {
            catch_panics: lookup(ENV_CATCH_PANICS)
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.catch_panics),
            slow_handler_threshold: lookup(ENV_SLOW_HANDLER_MS)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.slow_handler_threshold),
            skip_redundant_install: lookup(ENV_SKIP_REDUNDANT_INSTALL)
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.skip_redundant_install),
        }
    }

    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }

    pub fn with_slow_handler_threshold(mut self, threshold: Duration) -> Self {
        self.slow_handler_threshold = threshold;
        self
    }

    pub fn with_skip_redundant_install(mut self, skip: bool) -> Self {
        self.skip_redundant_install = skip;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a boolean environment flag
pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
