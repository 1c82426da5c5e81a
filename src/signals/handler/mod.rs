/*!
 * Signal Handler - Entries and Execution
 * Handler entries and the isolated invoker used by dispatch
 */

mod entry;
mod executor;

// Re-export public API
pub use entry::{handler_fn, HandlerEntry, HandlerFn, HandlerState};
pub use executor::{DispatchOutcome, HandlerInvoker, InvocationOutcome};
