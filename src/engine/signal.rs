//! Ctrl-C handling
//!
//! The first interrupt sets a flag that runners check between tasks, so a
//! plan that is being applied is never cut short. A second interrupt exits
//! immediately.

use std::sync::atomic::{AtomicBool, Ordering};

static CANCELLED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    if CANCELLED.swap(true, Ordering::SeqCst) {
        // SAFETY: _exit is async-signal-safe
        unsafe { libc::_exit(130) };
    }
}

/// Install the SIGINT handler and return the cancellation flag.
pub fn install() -> &'static AtomicBool {
    #[cfg(unix)]
    {
        // SAFETY: the handler only touches an atomic and calls _exit
        let previous = unsafe { libc::signal(libc::SIGINT, on_interrupt as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            log::warn!("could not install Ctrl-C handler");
        }
    }
    &CANCELLED
}

/// Whether an interrupt was received
pub fn cancelled() -> bool {
    CANCELLED.load(Ordering::SeqCst)
}
