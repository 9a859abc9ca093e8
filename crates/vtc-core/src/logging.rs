#![forbid(unsafe_code)]

//! Event logging behind the `tracing` cargo feature.
//!
//! The crates in this workspace emit events through `vtc_core::debug!`
//! and friends. With the feature on these are the real `tracing` event
//! macros; with it off they expand to nothing, so call sites need no
//! `cfg` guards and the dependency disappears entirely.
//!
//! Only the four event levels the workspace actually emits are covered.
//! Span instrumentation stays behind explicit `cfg(feature = "tracing")`
//! at its few call sites.

#[cfg(feature = "tracing")]
pub use tracing::{debug, info, trace, warn};

#[cfg(not(feature = "tracing"))]
mod discard {
    // One shim per level; the bodies swallow the tracing field syntax
    // (`key = value`, `%display`, `?debug`) along with plain messages.

    #[macro_export]
    macro_rules! trace {
        ($($tokens:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! debug {
        ($($tokens:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! info {
        ($($tokens:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! warn {
        ($($tokens:tt)*) => {{}};
    }
}

#[cfg(all(test, not(feature = "tracing")))]
mod tests {
    #[test]
    fn shims_accept_event_syntax() {
        let n = 3u16;
        crate::trace!("plain message");
        crate::debug!(n, "field capture");
        crate::info!(count = n, "named field");
        crate::warn!(size = %n, detail = ?n, "display and debug fields");
    }
}
