#![forbid(unsafe_code)]

//! Signal handling for resize and termination.
//!
//! A dedicated thread drains a `signal-hook` iterator, so no work ever
//! happens in actual signal context:
//!
//! - `SIGWINCH` sets an atomic pending-resize flag. The event loop
//!   consumes it between iterations; the handler never touches the
//!   compositor.
//! - `SIGINT`, `SIGTERM`, `SIGQUIT` restore the terminal with the
//!   precomputed sequence and exit with the conventional `128 + signo`
//!   status.
//!
//! Crash signals (`SIGSEGV` and friends) cannot be routed through an
//! iterator thread and are handled separately in [`crate::crash`].

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM, SIGWINCH};
use signal_hook::iterator::Signals;

/// Owns the signal-draining thread; dropping it detaches the handlers
/// and joins the thread.
#[derive(Debug)]
pub struct SignalGuard {
    handle: signal_hook::iterator::Handle,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SignalGuard {
    /// Install handlers. `resize_pending` is shared with the event loop.
    pub fn new(resize_pending: Arc<AtomicBool>) -> io::Result<Self> {
        let mut signals =
            Signals::new([SIGWINCH, SIGINT, SIGTERM, SIGQUIT]).map_err(io::Error::other)?;
        let handle = signals.handle();
        let thread = std::thread::spawn(move || {
            for signal in signals.forever() {
                match signal {
                    SIGWINCH => {
                        resize_pending.store(true, Ordering::SeqCst);
                        vtc_core::debug!("SIGWINCH received, resize pending");
                    }
                    SIGINT | SIGTERM | SIGQUIT => {
                        vtc_core::warn!(signal, "termination signal, restoring terminal");
                        crate::terminal::emergency_restore();
                        std::process::exit(128 + signal);
                    }
                    _ => {}
                }
            }
        });
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
