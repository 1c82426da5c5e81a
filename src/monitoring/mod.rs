/*!
 * Monitoring
 * Structured tracing for signal dispatch
 */

mod tracer;

pub use tracer::{init_tracing, DispatchSpan};
