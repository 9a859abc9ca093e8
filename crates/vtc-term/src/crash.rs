//! Crash-signal terminal restoration.
//!
//! `SIGSEGV`, `SIGILL`, and `SIGABRT` arrive on a possibly corrupted
//! process, so the handler does exactly one thing that is async-signal
//! safe: a raw `write(2)` of a restoration byte sequence precomputed at
//! startup, followed by re-raising the signal with its default
//! disposition so the process still dies with the right status.
//!
//! No allocation, no locking, no formatting happens in the handler. The
//! sequence pointer lives in atomics and points at leaked memory that
//! stays valid for the life of the process.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

static RESTORE_PTR: AtomicPtr<u8> = AtomicPtr::new(std::ptr::null_mut());
static RESTORE_LEN: AtomicUsize = AtomicUsize::new(0);

const CRASH_SIGNALS: [libc::c_int; 3] = [libc::SIGSEGV, libc::SIGILL, libc::SIGABRT];

/// Install the crash handlers with a restoration sequence.
///
/// The sequence must have static lifetime; the terminal context leaks
/// one copy at startup. Installing again replaces the sequence.
pub fn install(restore: &'static [u8]) {
    RESTORE_LEN.store(restore.len(), Ordering::SeqCst);
    RESTORE_PTR.store(restore.as_ptr().cast_mut(), Ordering::SeqCst);

    // SAFETY: sigaction with a handler that only calls async-signal-safe
    // functions (write, sigaction, raise).
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        for sig in CRASH_SIGNALS {
            libc::sigaction(sig, &action, std::ptr::null_mut());
        }
    }
}

/// Restore the default dispositions and forget the sequence.
pub fn uninstall() {
    RESTORE_PTR.store(std::ptr::null_mut(), Ordering::SeqCst);
    RESTORE_LEN.store(0, Ordering::SeqCst);
    // SAFETY: resetting to the default disposition.
    unsafe {
        for sig in CRASH_SIGNALS {
            libc::signal(sig, libc::SIG_DFL);
        }
    }
}

extern "C" fn handler(sig: libc::c_int) {
    let ptr = RESTORE_PTR.load(Ordering::SeqCst);
    let len = RESTORE_LEN.load(Ordering::SeqCst);
    // SAFETY: async-signal-safe calls only; the pointer is either null
    // or leaked static memory.
    unsafe {
        if !ptr.is_null() && len > 0 {
            libc::write(libc::STDOUT_FILENO, ptr.cast(), len);
        }
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}
