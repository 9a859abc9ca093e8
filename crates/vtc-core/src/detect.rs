#![forbid(unsafe_code)]

//! Terminal detection model.
//!
//! Classifies the terminal emulator into a closed family set and derives
//! the profile flags the rest of the stack consumes. Detection is pure
//! over a [`DetectInputs`] snapshot so tests run hermetically; the
//! process-environment snapshot and the optional active probes are taken
//! by the caller.
//!
//! # Detection strategy
//!
//! - `TERM` seeds the family guess and the effective entry name.
//! - `COLORTERM`, `VTE_VERSION`, `KONSOLE_DBUS_SESSION`, `TMUX`, `STY`,
//!   `MLTERM`, `TERM_PROGRAM` and friends refine it.
//! - Active probe results (ENQ answerback, secondary device attributes)
//!   override the environment guess when they identify an emulator.
//! - The effective terminal-type name may be rewritten to select a richer
//!   database entry (e.g. `xterm` → `xterm-256color`).
//!
//! # Invariants
//!
//! 1. Given the same inputs, `detect` always produces the same profile.
//! 2. Probe absence (timeout) degrades to the environment-derived guess.
//! 3. Non-TTY stdio yields [`TerminalProfile::minimal`] and never probes.

use std::env;
use std::io::IsTerminal;

/// Closed set of recognized emulator families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermFamily {
    Xterm,
    Rxvt,
    RxvtUnicode,
    Screen,
    Tmux,
    Putty,
    Konsole,
    GnomeVte,
    LinuxConsole,
    Mintty,
    Kterm,
    TeraTerm,
    Eterm,
    Cygwin,
    Mlterm,
    Unknown,
}

impl TermFamily {
    /// Family name for diagnostics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Xterm => "xterm",
            Self::Rxvt => "rxvt",
            Self::RxvtUnicode => "rxvt-unicode",
            Self::Screen => "screen",
            Self::Tmux => "tmux",
            Self::Putty => "putty",
            Self::Konsole => "konsole",
            Self::GnomeVte => "gnome-vte",
            Self::LinuxConsole => "linux",
            Self::Mintty => "mintty",
            Self::Kterm => "kterm",
            Self::TeraTerm => "teraterm",
            Self::Eterm => "eterm",
            Self::Cygwin => "cygwin",
            Self::Mlterm => "mlterm",
            Self::Unknown => "unknown",
        }
    }
}

/// Snapshot of the environment variables detection consumes.
#[derive(Debug, Clone, Default)]
pub struct DetectInputs {
    pub term: String,
    pub colorterm: String,
    pub term_program: String,
    pub vte_version: Option<u32>,
    pub konsole: bool,
    pub in_tmux: bool,
    pub in_screen: bool,
    pub mlterm: bool,
    pub xterm_version: bool,
    pub locale: String,
    pub columns: Option<u16>,
    pub lines: Option<u16>,
}

impl DetectInputs {
    /// Snapshot the process environment.
    pub fn from_env() -> Self {
        Self {
            term: env::var("TERM").unwrap_or_default(),
            colorterm: env::var("COLORTERM").unwrap_or_default(),
            term_program: env::var("TERM_PROGRAM").unwrap_or_default(),
            vte_version: env::var("VTE_VERSION").ok().and_then(|v| v.parse().ok()),
            konsole: env::var("KONSOLE_DBUS_SESSION").is_ok() || env::var("KONSOLE_DCOP").is_ok(),
            in_tmux: env::var("TMUX").is_ok(),
            in_screen: env::var("STY").is_ok(),
            mlterm: env::var("MLTERM").is_ok(),
            xterm_version: env::var("XTERM_VERSION").is_ok(),
            locale: env::var("LC_ALL")
                .or_else(|_| env::var("LC_CTYPE"))
                .or_else(|_| env::var("LANG"))
                .or_else(|_| env::var("XTERM_LOCALE"))
                .unwrap_or_default(),
            columns: env::var("COLUMNS").ok().and_then(|v| v.parse().ok()),
            lines: env::var("LINES").ok().and_then(|v| v.parse().ok()),
        }
    }
}

/// Results of the active probes, all best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Reply to the ENQ enquiry, if any arrived in time.
    pub answerback: Option<String>,
    /// Secondary device attributes: (terminal type, firmware version,
    /// hardware options).
    pub secondary_da: Option<(u32, u32, u32)>,
}

/// The detected terminal profile consumed by later components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalProfile {
    /// Effective terminal-type name (possibly rewritten from `$TERM`).
    pub term_name: String,
    pub family: TermFamily,
    /// 256-color palette evidence.
    pub color256: bool,
    /// 24-bit color evidence (`COLORTERM=truecolor`, recent VTE).
    pub truecolor: bool,
    /// The locale codeset is UTF-8.
    pub utf8_locale: bool,
    /// Standard output is a terminal. `false` selects the minimal
    /// ASCII-only profile and suppresses all escape output decisions.
    pub is_tty: bool,
    /// Geometry hints from `COLUMNS`/`LINES`, if set.
    pub columns: Option<u16>,
    pub lines: Option<u16>,
}

impl TerminalProfile {
    /// Minimal ASCII-only profile used when stdio is not a terminal.
    pub fn minimal() -> Self {
        Self {
            term_name: "dumb".to_owned(),
            family: TermFamily::Unknown,
            color256: false,
            truecolor: false,
            utf8_locale: false,
            is_tty: false,
            columns: None,
            lines: None,
        }
    }
}

/// Detect the terminal from the current process environment.
///
/// Short-circuits to [`TerminalProfile::minimal`] when standard output is
/// not a terminal. Active probes are only attempted when the `probe`
/// feature is enabled and the caller already holds the terminal in raw
/// mode; this entry point never probes.
pub fn detect_from_env() -> TerminalProfile {
    if !std::io::stdout().is_terminal() {
        return TerminalProfile::minimal();
    }
    detect(&DetectInputs::from_env(), None)
}

/// Classify the terminal from an input snapshot and optional probe results.
pub fn detect(inputs: &DetectInputs, probes: Option<&ProbeOutcome>) -> TerminalProfile {
    let family = classify(inputs, probes);

    let term = if inputs.term.is_empty() {
        // No TERM at all: assume the lowest common denominator the
        // capability layer can still drive.
        "vt100".to_owned()
    } else {
        inputs.term.clone()
    };

    let truecolor = matches!(inputs.colorterm.as_str(), "truecolor" | "24bit")
        || inputs.vte_version.is_some_and(|v| v >= 3600);

    let color256 = term.contains("256color")
        || truecolor
        || inputs.vte_version.is_some_and(|v| v >= 3000)
        || matches!(
            family,
            TermFamily::Konsole | TermFamily::GnomeVte | TermFamily::RxvtUnicode
        );

    let term_name = rewrite_term_name(&term, family, color256);

    let utf8_locale = {
        let lc = inputs.locale.to_ascii_uppercase();
        lc.contains("UTF-8") || lc.contains("UTF8")
    };

    crate::debug!(
        family = family.as_str(),
        term = %term_name,
        color256,
        truecolor,
        "terminal detected"
    );

    TerminalProfile {
        term_name,
        family,
        color256,
        truecolor,
        utf8_locale,
        is_tty: true,
        columns: inputs.columns,
        lines: inputs.lines,
    }
}

fn classify(inputs: &DetectInputs, probes: Option<&ProbeOutcome>) -> TermFamily {
    // Probe responses are the strongest evidence.
    if let Some(p) = probes {
        if let Some(ab) = &p.answerback
            && ab.contains("PuTTY")
        {
            return TermFamily::Putty;
        }
        if let Some((term_type, version, _)) = p.secondary_da
            && let Some(f) = family_from_secondary_da(term_type, version)
        {
            return f;
        }
    }
    family_from_env(inputs)
}

/// Map a secondary-device-attributes terminal type to a family.
///
/// `None` means the id is a generic VT identification that should not
/// override the environment-derived guess.
pub fn family_from_secondary_da(term_type: u32, version: u32) -> Option<TermFamily> {
    match term_type {
        32 => Some(TermFamily::TeraTerm),
        41 => Some(TermFamily::Xterm),
        67 => Some(TermFamily::Cygwin),
        77 => Some(TermFamily::Mintty),
        82 => Some(TermFamily::Rxvt),
        83 => Some(TermFamily::Screen),
        84 => Some(TermFamily::Tmux),
        85 => Some(TermFamily::RxvtUnicode),
        // Modern VTE answers type 65 with its version in the second field.
        65 if version >= 4000 => Some(TermFamily::GnomeVte),
        _ => None,
    }
}

fn family_from_env(inputs: &DetectInputs) -> TermFamily {
    let term = inputs.term.as_str();

    // Multiplexers first: TERM inside them still says "screen".
    if term.starts_with("tmux") || (inputs.in_tmux && term.starts_with("screen")) {
        return TermFamily::Tmux;
    }
    if term.starts_with("screen") || inputs.in_screen {
        return TermFamily::Screen;
    }
    if term == "linux" || term.starts_with("con") {
        return TermFamily::LinuxConsole;
    }
    if inputs.mlterm || term.starts_with("mlterm") {
        return TermFamily::Mlterm;
    }
    if inputs.konsole || term.starts_with("konsole") {
        return TermFamily::Konsole;
    }
    if inputs.vte_version.is_some() {
        return TermFamily::GnomeVte;
    }
    if inputs.term_program.eq_ignore_ascii_case("mintty") {
        return TermFamily::Mintty;
    }
    if term.starts_with("rxvt-unicode") {
        return TermFamily::RxvtUnicode;
    }
    if term.starts_with("rxvt") || inputs.colorterm == "rxvt" {
        return TermFamily::Rxvt;
    }
    if term.starts_with("putty") {
        return TermFamily::Putty;
    }
    if term.starts_with("kterm") {
        return TermFamily::Kterm;
    }
    if term.starts_with("Eterm") || term.starts_with("eterm") {
        return TermFamily::Eterm;
    }
    if term.starts_with("cygwin") {
        return TermFamily::Cygwin;
    }
    if term.starts_with("xterm") || inputs.xterm_version {
        return TermFamily::Xterm;
    }
    if term.is_empty() {
        return TermFamily::Unknown;
    }
    TermFamily::Unknown
}

/// Rewrite the effective entry name when a richer variant applies.
fn rewrite_term_name(term: &str, family: TermFamily, color256: bool) -> String {
    if !color256 || term.contains("256color") {
        return term.to_owned();
    }
    match family {
        TermFamily::Xterm | TermFamily::Konsole | TermFamily::GnomeVte | TermFamily::Mintty => {
            "xterm-256color".to_owned()
        }
        TermFamily::Screen => "screen-256color".to_owned(),
        TermFamily::Tmux if term.starts_with("tmux") => "tmux-256color".to_owned(),
        TermFamily::Tmux => "screen-256color".to_owned(),
        TermFamily::Rxvt | TermFamily::RxvtUnicode => "rxvt-256color".to_owned(),
        _ => term.to_owned(),
    }
}
