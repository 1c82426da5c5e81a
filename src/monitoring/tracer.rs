/*!
 * Tracing
 * Subscriber setup and dispatch spans using the tracing crate
 */

use crate::core::config::parse_flag;
use crate::core::limits::ENV_TRACE_JSON;
use crate::signals::core::types::SignalId;
use crate::signals::handler::DispatchOutcome;
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Dispatches slower than this are logged at warn level
const SLOW_DISPATCH: Duration = Duration::from_millis(50);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SIGNAL_TRACE_JSON: Enable JSON output (default: false)
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(ENV_TRACE_JSON)
        .ok()
        .and_then(|v| parse_flag(&v))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Signal tracing initialized");
    }
    installed
}

/// Span covering one dispatch of a signal's handler list
pub struct DispatchSpan {
    span: Span,
    start: Instant,
    signal: SignalId,
}

impl DispatchSpan {
    pub fn new(signal: SignalId, handler_count: usize) -> Self {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            signal = %signal,
            handlers = handler_count,
            invoked = tracing::field::Empty,
            failed = tracing::field::Empty,
            skipped = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            signal,
        }
    }

    pub fn record_outcome(&self, outcome: &DispatchOutcome) {
        self.span.record("invoked", outcome.invoked);
        self.span.record("failed", outcome.failed);
        self.span.record("skipped", outcome.skipped);
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for DispatchSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration > SLOW_DISPATCH {
            warn!(
                signal = %self.signal,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow signal dispatch"
            );
        } else {
            debug!(
                signal = %self.signal,
                duration_us = duration.as_micros() as u64,
                "signal dispatch completed"
            );
        }
    }
}
