/*!
 * POSIX Trap
 * sigaction-based trap that records deliveries on a self-pipe
 *
 * The installed handler only writes the signal number to a non-blocking pipe.
 * Dispatch happens later on the application's control flow, when a pump drains
 * the pipe (see `pump.rs`).
 */

use crate::core::limits::{DELIVERY_READ_CHUNK, OVERFLOW_BITMAP_BITS};
use crate::signals::core::traits::SignalTrap;
use crate::signals::core::types::{SignalId, TrapDisposition, TrapError, TrapResult};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::libc::{self, c_int, c_void};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{pipe, read};
use parking_lot::{const_mutex, Mutex};
use std::mem::MaybeUninit;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Write end of the delivery pipe, read by the signal handler
static DELIVERY_FD: AtomicI32 = AtomicI32::new(-1);

/// Signals whose delivery byte could not be written (pipe full)
static OVERFLOW: AtomicU64 = AtomicU64::new(0);

/// Process-wide trap instance
static SHARED: Mutex<Option<Arc<PosixTrap>>> = const_mutex(None);

/// Installed for every trapped signal. Async-signal-safe: one write(2) and
/// atomics only, errno preserved.
extern "C" fn on_signal(signo: c_int) {
    let saved = Errno::last_raw();

    let fd = DELIVERY_FD.load(Ordering::Relaxed);
    let byte = signo as u8;
    let written = if fd >= 0 {
        unsafe { libc::write(fd, &byte as *const u8 as *const c_void, 1) }
    } else {
        -1
    };

    if written != 1 && signo > 0 && signo < OVERFLOW_BITMAP_BITS {
        OVERFLOW.fetch_or(1u64 << signo, Ordering::SeqCst);
    }

    Errno::set_raw(saved);
}

fn dispatcher_address() -> libc::sighandler_t {
    on_signal as extern "C" fn(c_int) as libc::sighandler_t
}

/// POSIX signal trap
///
/// There is one per process; obtain it with [`PosixTrap::shared`].
#[derive(Debug)]
pub struct PosixTrap {
    read_fd: OwnedFd,
    _write_fd: OwnedFd,
}

impl PosixTrap {
    /// Get the process-wide trap, creating the delivery pipe on first use.
    ///
    /// Only one registry may drive it. Obtain that registry with
    /// `SignalRegistry::builder().build()` rather than wrapping this trap in
    /// a second `SignalRegistry::new`.
    pub fn shared() -> TrapResult<Arc<PosixTrap>> {
        let mut slot = SHARED.lock();
        if let Some(trap) = slot.as_ref() {
            return Ok(trap.clone());
        }

        let trap = Arc::new(Self::create()?);
        *slot = Some(trap.clone());
        Ok(trap)
    }

    fn create() -> TrapResult<Self> {
        let (read_fd, write_fd) = pipe().map_err(TrapError::Setup)?;
        for fd in [read_fd.as_raw_fd(), write_fd.as_raw_fd()] {
            fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(TrapError::Setup)?;
            fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(TrapError::Setup)?;
        }

        DELIVERY_FD.store(write_fd.as_raw_fd(), Ordering::SeqCst);
        info!(
            read_fd = read_fd.as_raw_fd(),
            write_fd = write_fd.as_raw_fd(),
            "Signal delivery pipe created"
        );

        Ok(Self {
            read_fd,
            _write_fd: write_fd,
        })
    }

    fn to_nix(signal: SignalId) -> TrapResult<Signal> {
        Signal::try_from(signal.value()).map_err(|errno| TrapError::Os { signal, errno })
    }

    /// Read end of the delivery pipe
    pub fn delivery_fd(&self) -> BorrowedFd<'_> {
        self.read_fd.as_fd()
    }

    /// Duplicate of the read end, for registering with an event loop
    pub fn try_clone_delivery_fd(&self) -> std::io::Result<OwnedFd> {
        self.read_fd.try_clone()
    }

    /// Drain recorded deliveries without blocking, in arrival order.
    ///
    /// Signals that overflowed the pipe are appended once each, unless they
    /// were already seen in this batch.
    pub fn drain(&self) -> Vec<SignalId> {
        let mut delivered = Vec::new();
        let mut buf = [0u8; DELIVERY_READ_CHUNK];
        let raw: RawFd = self.read_fd.as_raw_fd();

        loop {
            match read(raw, &mut buf) {
                Ok(0) => break,
                Ok(n) => delivered.extend(
                    buf[..n]
                        .iter()
                        .map(|&b| SignalId::from_raw(i32::from(b))),
                ),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read signal delivery pipe");
                    break;
                }
            }
        }

        let overflow = OVERFLOW.swap(0, Ordering::SeqCst);
        if overflow != 0 {
            for signo in 1..OVERFLOW_BITMAP_BITS {
                if overflow & (1u64 << signo) != 0 {
                    let signal = SignalId::from_raw(signo);
                    if !delivered.contains(&signal) {
                        delivered.push(signal);
                    }
                }
            }
            warn!(bitmap = overflow, "Signal delivery pipe overflowed");
        }

        delivered
    }

    /// Block until a delivery is recorded or `timeout` elapses.
    ///
    /// `None` waits indefinitely. Returns whether deliveries are pending.
    /// Interrupted polls resume with whatever remains of `timeout`.
    pub fn wait(&self, timeout: Option<Duration>) -> TrapResult<bool> {
        let deadline = timeout.and_then(|d| Instant::now().checked_add(d));

        loop {
            let timeout = match deadline {
                None => PollTimeout::NONE,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    PollTimeout::try_from(remaining).unwrap_or(PollTimeout::MAX)
                }
            };

            let mut fds = [PollFd::new(self.read_fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, timeout) {
                Ok(n) => return Ok(n > 0),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(TrapError::Wait(e)),
            }
        }
    }
}

impl SignalTrap for PosixTrap {
    fn install(&self, signal: SignalId) -> TrapResult<()> {
        let sig = Self::to_nix(signal)?;
        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        unsafe { sigaction(sig, &action) }.map_err(|errno| TrapError::Os { signal, errno })?;
        debug!(%signal, "sigaction installed dispatcher");
        Ok(())
    }

    fn restore_default(&self, signal: SignalId) -> TrapResult<()> {
        let sig = Self::to_nix(signal)?;
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());

        unsafe { sigaction(sig, &action) }.map_err(|errno| TrapError::Os { signal, errno })?;
        debug!(%signal, "sigaction restored default");
        Ok(())
    }

    fn disposition(&self, signal: SignalId) -> TrapResult<TrapDisposition> {
        let mut current = MaybeUninit::<libc::sigaction>::zeroed();
        let rc = unsafe { libc::sigaction(signal.value(), std::ptr::null(), current.as_mut_ptr()) };
        if rc != 0 {
            return Err(TrapError::Os {
                signal,
                errno: Errno::last(),
            });
        }

        let handler = unsafe { current.assume_init() }.sa_sigaction;
        Ok(if handler == libc::SIG_DFL {
            TrapDisposition::Default
        } else if handler == libc::SIG_IGN {
            TrapDisposition::Ignore
        } else if handler == dispatcher_address() {
            TrapDisposition::Dispatcher
        } else {
            TrapDisposition::Foreign
        })
    }
}
