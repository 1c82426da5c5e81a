/*!
 * Handler Entries
 * One registered callback with its ordinal, bound arguments and state
 */

use crate::signals::core::types::Ordinal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Signal handler callback.
///
/// Receives the arguments bound at registration as its only parameter.
pub type HandlerFn = Arc<dyn Fn(&[Value]) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`HandlerFn`]
pub fn handler_fn<F>(f: F) -> HandlerFn
where
    F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Whether an entry may still be invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerState {
    Active,
    Revoked,
}

/// Registered handler
///
/// Entries are shared between the registry's current list and any dispatch
/// snapshot taken before a removal. Revoking flips a flag visible to both.
pub struct HandlerEntry {
    ordinal: Ordinal,
    action: HandlerFn,
    bound_args: Vec<Value>,
    revoked: AtomicBool,
}

impl HandlerEntry {
    pub(crate) fn new(ordinal: Ordinal, action: HandlerFn, bound_args: Vec<Value>) -> Self {
        Self {
            ordinal,
            action,
            bound_args,
            revoked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn ordinal(&self) -> Ordinal {
        self.ordinal
    }

    #[inline]
    pub fn bound_args(&self) -> &[Value] {
        &self.bound_args
    }

    #[inline]
    pub fn state(&self) -> HandlerState {
        if self.revoked.load(Ordering::Acquire) {
            HandlerState::Revoked
        } else {
            HandlerState::Active
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state() == HandlerState::Active
    }

    /// Mark the entry revoked. Returns false if it already was.
    pub(crate) fn revoke(&self) -> bool {
        !self.revoked.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn action(&self) -> &HandlerFn {
        &self.action
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("ordinal", &self.ordinal)
            .field("bound_args", &self.bound_args)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
