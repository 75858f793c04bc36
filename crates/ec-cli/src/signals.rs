//! Unix signal handling for the console.
//!
//! SIGINT stops the axis, which cancels a blocking motion without leaving
//! the console. SIGTERM and SIGHUP stop the axis and request shutdown; the
//! process exits with the shell convention 128 + signal number.
//! Handlers only set atomic flags; a watcher thread turns them into
//! callbacks.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Signals the console reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT (Ctrl+C): stop motion.
    Interrupt,
    /// SIGTERM: stop motion and exit.
    Terminate,
    /// SIGHUP (controlling terminal closed): stop motion and exit.
    Hangup,
}

impl SignalKind {
    /// Whether the signal ends the session.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, SignalKind::Interrupt)
    }

    /// Process exit status after this signal (128 + signal number).
    #[must_use]
    pub fn exit_code(self) -> i32 {
        // POSIX signal numbers
        let signo = match self {
            SignalKind::Interrupt => 2,
            SignalKind::Terminate => 15,
            SignalKind::Hangup => 1,
        };
        128 + signo
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Shared signal state.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    interrupt_count: AtomicU32,
}

impl SignalState {
    /// Whether a terminating signal was received.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Number of interrupts received.
    pub fn interrupt_count(&self) -> u32 {
        self.interrupt_count.load(Ordering::Relaxed)
    }

    fn record(&self, kind: SignalKind) {
        match kind {
            SignalKind::Interrupt => {
                self.interrupt_count.fetch_add(1, Ordering::Relaxed);
            }
            SignalKind::Terminate | SignalKind::Hangup => {
                self.shutdown_requested.store(true, Ordering::Relaxed);
            }
        }
    }
}

/// Installed signal handlers and their watcher thread.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Register handlers; `on_signal` runs on the watcher thread.
    pub fn install<F>(on_signal: F) -> std::io::Result<Self>
    where
        F: Fn(SignalKind) + Send + 'static,
    {
        let handler = Self {
            state: Arc::new(SignalState::default()),
        };

        #[cfg(unix)]
        handler.register_unix_handlers(on_signal)?;
        #[cfg(not(unix))]
        drop(on_signal);

        Ok(handler)
    }

    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn register_unix_handlers<F>(&self, on_signal: F) -> std::io::Result<()>
    where
        F: Fn(SignalKind) + Send + 'static,
    {
        use std::os::raw::c_int;

        static INTERRUPT_FLAG: AtomicBool = AtomicBool::new(false);
        static TERMINATE_FLAG: AtomicBool = AtomicBool::new(false);
        static HANGUP_FLAG: AtomicBool = AtomicBool::new(false);

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("ec-signals".into())
            .spawn(move || loop {
                for (flag, kind) in [
                    (&INTERRUPT_FLAG, SignalKind::Interrupt),
                    (&TERMINATE_FLAG, SignalKind::Terminate),
                    (&HANGUP_FLAG, SignalKind::Hangup),
                ] {
                    if flag.swap(false, Ordering::Relaxed) {
                        info!(signal = %kind, "Signal received");
                        state.record(kind);
                        on_signal(kind);
                    }
                }
                std::thread::sleep(Duration::from_millis(10));
            })?;

        extern "C" fn interrupt_handler(_: c_int) {
            INTERRUPT_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn terminate_handler(_: c_int) {
            TERMINATE_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn hangup_handler(_: c_int) {
            HANGUP_FLAG.store(true, Ordering::Relaxed);
        }

        // SAFETY: the handlers only store to atomics, which is async-signal-safe.
        unsafe {
            libc::signal(libc::SIGINT, interrupt_handler as libc::sighandler_t);
            libc::signal(libc::SIGTERM, terminate_handler as libc::sighandler_t);
            libc::signal(libc::SIGHUP, hangup_handler as libc::sighandler_t);
        }

        debug!("Unix signal handlers registered");
        Ok(())
    }

    /// Signal state for inspection.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}
