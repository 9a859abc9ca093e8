//! Terminal context: raw-mode lifecycle, signals, and the widget-facing
//! compositing surface.

#[cfg(target_os = "linux")]
pub mod console;
#[cfg(unix)]
pub mod crash;
#[cfg(unix)]
pub mod signals;
pub mod terminal;

pub use terminal::{OwnerId, Phase, TermError, TermOptions, Terminal};
