#![forbid(unsafe_code)]

//! Core: capability database, terminal detection, and encoding negotiation.

pub mod detect;
pub mod encoding;
pub mod error;
pub mod logging;
pub mod params;
pub mod termcap;

#[cfg(feature = "probe")]
pub mod probe;

pub use detect::{DetectInputs, ProbeOutcome, TermFamily, TerminalProfile};
pub use encoding::{Encoder, Encoding, NativeChar};
pub use error::{CapError, ParamError};
pub use termcap::{BoolCap, NumCap, StringCap, TermDb};

// Event macros live at the crate root in both builds: re-exported here
// with the feature on, placed there by `#[macro_export]` with it off.
#[cfg(feature = "tracing")]
pub use logging::{debug, info, trace, warn};
