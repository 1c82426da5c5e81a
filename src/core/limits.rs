/*!
 * Registry Limits and Constants
 *
 * Thresholds and sizes shared by the registry, the trap and the pumps.
 */

use std::time::Duration;

// =============================================================================
// DISPATCH
// =============================================================================

/// Handler runtime above which a slow-handler warning is logged (10ms)
pub const DEFAULT_SLOW_HANDLER_THRESHOLD: Duration = Duration::from_millis(10);

/// First ordinal handed out for a signal with no handlers
pub const FIRST_ORDINAL: i64 = 0;

// =============================================================================
// DELIVERY PIPE
// =============================================================================

/// Bytes read from the delivery pipe per read(2) call.
/// One byte per delivered signal.
pub const DELIVERY_READ_CHUNK: usize = 64;

/// Signal numbers tracked by the overflow bitmap (one bit each)
pub const OVERFLOW_BITMAP_BITS: i32 = 64;

// =============================================================================
// ENVIRONMENT
// =============================================================================

pub const ENV_CATCH_PANICS: &str = "SIGNAL_CATCH_PANICS";
pub const ENV_SLOW_HANDLER_MS: &str = "SIGNAL_SLOW_HANDLER_MS";
pub const ENV_SKIP_REDUNDANT_INSTALL: &str = "SIGNAL_SKIP_REDUNDANT_INSTALL";
pub const ENV_TRACE_JSON: &str = "SIGNAL_TRACE_JSON";
