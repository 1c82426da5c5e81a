/*!
 * Signal Types
 * Signal identity, handler ordinals, dispositions and registry errors
 */

use miette::Diagnostic;
use nix::errno::Errno;
use nix::libc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Position of a handler in its signal's invocation order
pub type Ordinal = i64;

/// Registry operation result
pub type RegistryResult<T> = Result<T, RegistryError>;

/// OS trap operation result
pub type TrapResult<T> = Result<T, TrapError>;

/// Errors raised by the OS trap boundary
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum TrapError {
    #[error("platform rejected {signal}: {errno}")]
    #[diagnostic(
        code(trap::os),
        help("The signal may be untrappable on this platform or a resource limit was hit.")
    )]
    Os { signal: SignalId, errno: Errno },

    #[error("trap rejected {signal}: {reason}")]
    #[diagnostic(code(trap::rejected))]
    Rejected { signal: SignalId, reason: String },

    #[error("failed to set up signal delivery pipe: {0}")]
    #[diagnostic(
        code(trap::setup),
        help("Check the open file descriptor limit of the process.")
    )]
    Setup(Errno),

    #[error("failed to wait on signal delivery pipe: {0}")]
    #[diagnostic(code(trap::wait))]
    Wait(Errno),
}

impl TrapError {
    /// Signal the error refers to, if any
    pub fn signal(&self) -> Option<SignalId> {
        match self {
            TrapError::Os { signal, .. } | TrapError::Rejected { signal, .. } => Some(*signal),
            TrapError::Setup(_) | TrapError::Wait(_) => None,
        }
    }
}

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum RegistryError {
    #[error("{0} cannot be trapped on this platform")]
    #[diagnostic(
        code(registry::unsupported_signal),
        help("SIGKILL and SIGSTOP can never be caught; numbers outside the platform range are rejected.")
    )]
    UnsupportedSignal(SignalId),

    #[error("failed to install trap for {signal}")]
    #[diagnostic(
        code(registry::trap_installation),
        help("The handler was not registered. The previous disposition is unchanged.")
    )]
    TrapInstallation {
        signal: SignalId,
        #[source]
        source: TrapError,
    },

    #[error("handlers for {signal} were removed but the default disposition could not be restored")]
    #[diagnostic(
        code(registry::disposition_diverged),
        help("The OS still routes the signal to the dispatcher, which now ignores it.")
    )]
    DispositionDiverged {
        signal: SignalId,
        #[source]
        source: TrapError,
    },

    #[error("no handlers registered for {0}")]
    #[diagnostic(code(registry::no_handlers))]
    NoHandlers(SignalId),

    #[error("no active handler at ordinal {ordinal} for {signal}")]
    #[diagnostic(
        code(registry::unknown_ordinal),
        help("Use the ordinal returned by add_handler; revoked handlers cannot be removed by ordinal.")
    )]
    UnknownOrdinal { signal: SignalId, ordinal: Ordinal },

    #[error("no ordinal left above the highest handler of {0}")]
    #[diagnostic(
        code(registry::ordinal_exhausted),
        help("Pass an explicit ordinal, or remove the handler registered at the maximum ordinal.")
    )]
    OrdinalExhausted(SignalId),

    #[error("unknown signal name: {0}")]
    #[diagnostic(code(registry::unknown_signal_name))]
    UnknownSignalName(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Trap(#[from] TrapError),
}

impl RegistryError {
    /// Signal the error refers to, if any
    pub fn signal(&self) -> Option<SignalId> {
        match self {
            RegistryError::UnsupportedSignal(signal)
            | RegistryError::NoHandlers(signal)
            | RegistryError::OrdinalExhausted(signal) => Some(*signal),
            RegistryError::TrapInstallation { signal, .. }
            | RegistryError::DispositionDiverged { signal, .. }
            | RegistryError::UnknownOrdinal { signal, .. } => Some(*signal),
            RegistryError::UnknownSignalName(_) => None,
            RegistryError::Trap(err) => err.signal(),
        }
    }
}

/// Generates the named signal set. Discriminants come from libc so the
/// numbering always matches the host platform.
macro_rules! posix_signals {
    ($($variant:ident => $constant:ident, $description:literal;)*) => {
        /// Named POSIX signals
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(i32)]
        pub enum PosixSignal {
            $(
                #[doc = $description]
                $variant = libc::$constant,
            )*
        }

        impl PosixSignal {
            /// Every named signal, in declaration order
            pub const ALL: &'static [PosixSignal] = &[$(PosixSignal::$variant,)*];

            /// Platform signal number
            pub const fn value(self) -> i32 {
                self as i32
            }

            /// POSIX name, e.g. `SIGINT`
            pub const fn name(self) -> &'static str {
                match self {
                    $(PosixSignal::$variant => stringify!($constant),)*
                }
            }

            /// Human-readable description
            pub const fn description(self) -> &'static str {
                match self {
                    $(PosixSignal::$variant => $description,)*
                }
            }
        }
    };
}

posix_signals! {
    Hangup => SIGHUP, "Hangup";
    Interrupt => SIGINT, "Interrupt";
    Quit => SIGQUIT, "Quit";
    IllegalInstruction => SIGILL, "Illegal instruction";
    Abort => SIGABRT, "Aborted";
    Kill => SIGKILL, "Killed";
    SegmentationViolation => SIGSEGV, "Segmentation fault";
    BrokenPipe => SIGPIPE, "Broken pipe";
    Alarm => SIGALRM, "Alarm clock";
    Terminate => SIGTERM, "Terminated";
    User1 => SIGUSR1, "User defined signal 1";
    User2 => SIGUSR2, "User defined signal 2";
    ChildStatusChanged => SIGCHLD, "Child status changed";
    Continue => SIGCONT, "Continued";
    Stop => SIGSTOP, "Stopped (signal)";
    TerminalStop => SIGTSTP, "Stopped";
    TerminalInput => SIGTTIN, "Stopped (tty input)";
    TerminalOutput => SIGTTOU, "Stopped (tty output)";
}

impl PosixSignal {
    /// Look up a named signal by platform number
    pub fn from_value(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.value() == value)
    }

    /// Look up a named signal by name.
    ///
    /// Accepts `SIGINT`, `INT`, `sigint` and `int`.
    pub fn from_name(name: &str) -> RegistryResult<Self> {
        let trimmed = name.trim();
        let upper = trimmed.to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);

        Self::ALL
            .iter()
            .copied()
            .find(|s| &s.name()[3..] == bare)
            .ok_or_else(|| RegistryError::UnknownSignalName(trimmed.to_string()))
    }
}

impl FromStr for PosixSignal {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl fmt::Display for PosixSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.value())
    }
}

/// Signal identifier accepted by every registry operation.
///
/// Wraps the raw platform number. Named signals, raw integers and `nix`
/// signals all convert into it, so call sites can use whichever form they
/// have at hand. Equality is by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(i32);

impl SignalId {
    pub const fn from_raw(value: i32) -> Self {
        Self(value)
    }

    /// Underlying platform number
    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Named signal bound to this number, if any
    pub fn named(self) -> Option<PosixSignal> {
        PosixSignal::from_value(self.0)
    }

    /// Whether the platform allows installing a trap for this number
    pub fn is_trappable(self) -> bool {
        match nix::sys::signal::Signal::try_from(self.0) {
            Ok(signal) => !matches!(
                signal,
                nix::sys::signal::Signal::SIGKILL | nix::sys::signal::Signal::SIGSTOP
            ),
            Err(_) => false,
        }
    }
}

/// Resolve any signal form to its platform number
#[inline]
pub fn value_of(signal: impl Into<SignalId>) -> i32 {
    signal.into().value()
}

impl From<PosixSignal> for SignalId {
    fn from(signal: PosixSignal) -> Self {
        Self(signal.value())
    }
}

impl From<i32> for SignalId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<nix::sys::signal::Signal> for SignalId {
    fn from(signal: nix::sys::signal::Signal) -> Self {
        Self(signal as i32)
    }
}

impl From<SignalId> for i32 {
    fn from(signal: SignalId) -> Self {
        signal.0
    }
}

impl PartialEq<i32> for SignalId {
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

impl PartialEq<PosixSignal> for SignalId {
    fn eq(&self, other: &PosixSignal) -> bool {
        self.0 == other.value()
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.named() {
            Some(signal) => signal.fmt(f),
            None => write!(f, "signal {}", self.0),
        }
    }
}

/// Current OS disposition of a signal number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrapDisposition {
    /// Platform default action
    Default,
    /// Signal is ignored
    Ignore,
    /// Routed to this crate's dispatcher
    Dispatcher,
    /// Some other handler owns the slot
    Foreign,
}
