#![forbid(unsafe_code)]

//! Attribute-transition optimizer.
//!
//! Computes the byte sequence that takes the terminal from one display
//! attribute state to another. Three strategies compete per transition:
//!
//! - **Incremental**: individual exit capabilities for dropped flags
//!   (`rmso`, `rmul`, `rmacs`, `ritm`) plus enter capabilities for added
//!   ones. Only valid when every dropped flag has an individual exit.
//! - **Reset and rebuild**: `sgr0`, then every flag of the target state.
//!   Always valid; `sgr0` also resets colors, so they are re-emitted.
//! - **Combined**: the nine-parameter `sgr` capability when the entry
//!   has one, plus the few attributes `sgr` cannot express.
//!
//! The shortest valid sequence wins. Transitioning a state to itself is
//! always empty.
//!
//! Colors use `setaf`/`setab` when present and hard ANSI SGR sequences
//! otherwise, with the logical palette permuted into ANSI order. Default
//! colors are restored through `op`.

use smallvec::SmallVec;
use vtc_core::params;
use vtc_core::{NumCap, StringCap, TermDb};

use crate::cell::{ansi_color_index, Cell, StyleFlags, DEFAULT_COLOR};

/// Hard reset used when the entry lacks `sgr0`.
const FALLBACK_SGR0: &[u8] = b"\x1b[0m";

/// Hard default-color restore used when the entry lacks `op`.
const FALLBACK_ORIG_PAIR: &[u8] = b"\x1b[39;49m";

/// Precomputed attribute capabilities for one terminal.
#[derive(Debug, Clone)]
pub struct AttrOptimizer {
    sgr0: Vec<u8>,
    sgr: Option<String>,
    orig_pair: Vec<u8>,
    setaf: Option<String>,
    setab: Option<String>,
    enter: Vec<(StyleFlags, Vec<u8>)>,
    exit: Vec<(StyleFlags, Vec<u8>)>,
    max_colors: i32,
}

impl AttrOptimizer {
    /// Snapshot the attribute capabilities of a loaded entry.
    pub fn new(db: &TermDb) -> Self {
        let lit = |cap| db.string(cap).map(|s| s.as_bytes().to_vec());
        let enter_cap = |cap: StringCap, fallback: Option<&[u8]>| {
            lit(cap).or_else(|| fallback.map(<[u8]>::to_vec))
        };

        let mut enter = Vec::new();
        let mut push_enter = |flag, cap, fallback: Option<&[u8]>| {
            if let Some(seq) = enter_cap(cap, fallback) {
                enter.push((flag, seq));
            }
        };
        push_enter(StyleFlags::BOLD, StringCap::EnterBoldMode, Some(b"\x1b[1m"));
        push_enter(StyleFlags::DIM, StringCap::EnterDimMode, Some(b"\x1b[2m"));
        push_enter(
            StyleFlags::ITALIC,
            StringCap::EnterItalicsMode,
            Some(b"\x1b[3m"),
        );
        push_enter(
            StyleFlags::UNDERLINE,
            StringCap::EnterUnderlineMode,
            Some(b"\x1b[4m"),
        );
        push_enter(StyleFlags::DBL_UNDERLINE, StringCap::EnterUnderlineMode, None);
        push_enter(
            StyleFlags::BLINK,
            StringCap::EnterBlinkMode,
            Some(b"\x1b[5m"),
        );
        push_enter(
            StyleFlags::REVERSE,
            StringCap::EnterReverseMode,
            Some(b"\x1b[7m"),
        );
        push_enter(
            StyleFlags::STANDOUT,
            StringCap::EnterStandoutMode,
            Some(b"\x1b[7m"),
        );
        push_enter(
            StyleFlags::INVISIBLE,
            StringCap::EnterSecureMode,
            Some(b"\x1b[8m"),
        );
        push_enter(StyleFlags::PROTECT, StringCap::EnterProtectedMode, None);
        push_enter(StyleFlags::ALT_CHARSET, StringCap::EnterAltCharsetMode, None);
        drop(push_enter);
        // crossed-out has no classic capability slot; hard ANSI only
        enter.push((StyleFlags::CROSSED_OUT, b"\x1b[9m".to_vec()));

        let mut exit = Vec::new();
        let mut push_exit = |flag, cap: Option<StringCap>, fallback: Option<&[u8]>| {
            let seq = cap.and_then(lit).or_else(|| fallback.map(<[u8]>::to_vec));
            if let Some(seq) = seq {
                exit.push((flag, seq));
            }
        };
        push_exit(StyleFlags::STANDOUT, Some(StringCap::ExitStandoutMode), None);
        push_exit(StyleFlags::UNDERLINE, Some(StringCap::ExitUnderlineMode), None);
        push_exit(
            StyleFlags::DBL_UNDERLINE,
            Some(StringCap::ExitUnderlineMode),
            Some(b"\x1b[24m"),
        );
        push_exit(
            StyleFlags::ITALIC,
            Some(StringCap::ExitItalicsMode),
            Some(b"\x1b[23m"),
        );
        push_exit(StyleFlags::CROSSED_OUT, None, Some(b"\x1b[29m"));
        push_exit(StyleFlags::ALT_CHARSET, Some(StringCap::ExitAltCharsetMode), None);

        Self {
            sgr0: lit(StringCap::ExitAttributeMode).unwrap_or_else(|| FALLBACK_SGR0.to_vec()),
            sgr: db.string(StringCap::SetAttributes).map(str::to_owned),
            orig_pair: lit(StringCap::OrigPair).unwrap_or_else(|| FALLBACK_ORIG_PAIR.to_vec()),
            setaf: db.string(StringCap::SetAForeground).map(str::to_owned),
            setab: db.string(StringCap::SetABackground).map(str::to_owned),
            enter,
            exit,
            max_colors: db.number(NumCap::MaxColors).unwrap_or(8),
        }
    }

    /// Colors the optimizer will emit without clamping.
    pub fn max_colors(&self) -> i32 {
        self.max_colors
    }

    /// The full attribute reset, for teardown.
    pub fn reset_sequence(&self) -> &[u8] {
        &self.sgr0
    }

    /// The sequence taking the terminal from state `from` to state `to`.
    ///
    /// Only attributes and colors matter; the cells' characters are
    /// ignored. `transition(a, a)` is empty.
    pub fn transition(&self, from: &Cell, to: &Cell) -> Vec<u8> {
        if from.attrs == to.attrs && from.fg == to.fg && from.bg == to.bg {
            return Vec::new();
        }

        // individual exits when every dropped flag has one, the reset
        // path otherwise; the combined form only when it is shorter
        let chosen = self
            .incremental(from, to)
            .unwrap_or_else(|| self.rebuild(to));
        if let Some(combined) = self.combined(to) {
            if combined.len() < chosen.len() {
                return combined;
            }
        }
        chosen
    }

    /// Exit dropped flags individually, enter added ones, adjust colors.
    /// `None` when some dropped flag has no individual exit.
    fn incremental(&self, from: &Cell, to: &Cell) -> Option<Vec<u8>> {
        let removed = from.attrs - to.attrs;
        let added = to.attrs - from.attrs;
        let mut out = Vec::new();
        for flag in removed.iter() {
            let seq = self.exit.iter().find(|(f, _)| *f == flag)?;
            out.extend_from_slice(&seq.1);
        }
        self.emit_enters(&mut out, added);
        self.emit_colors(&mut out, (from.fg, from.bg), (to.fg, to.bg));
        Some(out)
    }

    /// The sequence establishing state `to` from an unknown terminal
    /// state: a full reset, then every flag and color of the target.
    pub fn establish(&self, to: &Cell) -> Vec<u8> {
        self.rebuild(to)
    }

    /// `sgr0`, then every target flag and both target colors.
    fn rebuild(&self, to: &Cell) -> Vec<u8> {
        let mut out = self.sgr0.clone();
        self.emit_enters(&mut out, to.attrs);
        self.emit_colors(&mut out, (DEFAULT_COLOR, DEFAULT_COLOR), (to.fg, to.bg));
        out
    }

    /// The nine-parameter `sgr` form plus whatever it cannot express.
    fn combined(&self, to: &Cell) -> Option<Vec<u8>> {
        let fmt = self.sgr.as_ref()?;
        let a = to.attrs;
        let p = |f: StyleFlags| i32::from(a.intersects(f));
        let params = [
            p(StyleFlags::STANDOUT),
            p(StyleFlags::UNDERLINE | StyleFlags::DBL_UNDERLINE),
            p(StyleFlags::REVERSE),
            p(StyleFlags::BLINK),
            p(StyleFlags::DIM),
            p(StyleFlags::BOLD),
            p(StyleFlags::INVISIBLE),
            p(StyleFlags::PROTECT),
            p(StyleFlags::ALT_CHARSET),
        ];
        let mut out = params::expand(fmt, &params).ok()?;
        // sgr has no slots for these
        self.emit_enters(
            &mut out,
            a & (StyleFlags::ITALIC | StyleFlags::CROSSED_OUT | StyleFlags::PC_CHARSET),
        );
        self.emit_colors(&mut out, (DEFAULT_COLOR, DEFAULT_COLOR), (to.fg, to.bg));
        Some(out)
    }

    /// Append enter sequences for every set flag that has one. Flags with
    /// no capability and no fallback are silently unsupported.
    fn emit_enters(&self, out: &mut Vec<u8>, flags: StyleFlags) {
        for (flag, seq) in &self.enter {
            if flags.contains(*flag) {
                out.extend_from_slice(seq);
            }
        }
    }

    /// Append the color changes taking `(fg, bg)` from `from` to `to`.
    fn emit_colors(&self, out: &mut Vec<u8>, from: (u8, u8), to: (u8, u8)) {
        if from == to {
            return;
        }
        let dropping_fg = to.0 == DEFAULT_COLOR && from.0 != DEFAULT_COLOR;
        let dropping_bg = to.1 == DEFAULT_COLOR && from.1 != DEFAULT_COLOR;
        if dropping_fg || dropping_bg {
            // orig-pair resets both; re-establish the one still colored
            out.extend_from_slice(&self.orig_pair);
            if to.0 != DEFAULT_COLOR {
                self.emit_fg(out, to.0);
            }
            if to.1 != DEFAULT_COLOR {
                self.emit_bg(out, to.1);
            }
            return;
        }
        if to.0 != from.0 && to.0 != DEFAULT_COLOR {
            self.emit_fg(out, to.0);
        }
        if to.1 != from.1 && to.1 != DEFAULT_COLOR {
            self.emit_bg(out, to.1);
        }
    }

    fn emit_fg(&self, out: &mut Vec<u8>, logical: u8) {
        let idx = i32::from(ansi_color_index(self.clamp(logical)));
        if let Some(fmt) = &self.setaf {
            if let Ok(seq) = params::expand(fmt, &[idx]) {
                out.extend_from_slice(&seq);
                return;
            }
        }
        out.extend_from_slice(&hard_color(idx, false));
    }

    fn emit_bg(&self, out: &mut Vec<u8>, logical: u8) {
        let idx = i32::from(ansi_color_index(self.clamp(logical)));
        if let Some(fmt) = &self.setab {
            if let Ok(seq) = params::expand(fmt, &[idx]) {
                out.extend_from_slice(&seq);
                return;
            }
        }
        out.extend_from_slice(&hard_color(idx, true));
    }

    /// Fold palette indices the terminal cannot show into its range.
    fn clamp(&self, logical: u8) -> u8 {
        if i32::from(logical) < self.max_colors {
            logical
        } else if self.max_colors >= 16 {
            logical % 16
        } else {
            logical & 0x07
        }
    }
}

/// Hard ANSI color sequence for terminals without `setaf`/`setab`.
fn hard_color(idx: i32, background: bool) -> SmallVec<[u8; 16]> {
    let mut out = SmallVec::new();
    let s = match (idx, background) {
        (0..=7, false) => format!("\x1b[3{idx}m"),
        (0..=7, true) => format!("\x1b[4{idx}m"),
        (8..=15, false) => format!("\x1b[9{}m", idx - 8),
        (8..=15, true) => format!("\x1b[10{}m", idx - 8),
        (_, false) => format!("\x1b[38;5;{idx}m"),
        (_, true) => format!("\x1b[48;5;{idx}m"),
    };
    out.extend_from_slice(s.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn caps() -> TermDb {
        let mut db = TermDb::empty("attr-test");
        db.inject_string(StringCap::ExitAttributeMode, "\x1b[0m");
        db.inject_string(StringCap::EnterBoldMode, "\x1b[1m");
        db.inject_string(StringCap::EnterDimMode, "\x1b[2m");
        db.inject_string(StringCap::EnterUnderlineMode, "\x1b[4m");
        db.inject_string(StringCap::ExitUnderlineMode, "\x1b[24m");
        db.inject_string(StringCap::EnterStandoutMode, "\x1bSO+");
        db.inject_string(StringCap::ExitStandoutMode, "\x1bSO-");
        db.inject_string(StringCap::EnterReverseMode, "\x1b[7m");
        db.inject_string(StringCap::EnterAltCharsetMode, "\x0e");
        db.inject_string(StringCap::ExitAltCharsetMode, "\x0f");
        db.inject_string(StringCap::OrigPair, "\x1b[39;49m");
        db.inject_string(
            StringCap::SetAForeground,
            "\x1b[%?%p1%{8}%<%t3%p1%d%e38;5;%p1%d%;m",
        );
        db.inject_string(
            StringCap::SetABackground,
            "\x1b[%?%p1%{8}%<%t4%p1%d%e48;5;%p1%d%;m",
        );
        db.inject_number(NumCap::MaxColors, 256);
        db
    }

    fn styled(fg: u8, bg: u8, attrs: StyleFlags) -> Cell {
        Cell::new(' ', fg, bg, attrs)
    }

    #[test]
    fn identical_states_are_empty() {
        let opt = AttrOptimizer::new(&caps());
        let c = styled(3, 5, StyleFlags::BOLD | StyleFlags::UNDERLINE);
        assert!(opt.transition(&c, &c).is_empty());
        assert!(opt.transition(&Cell::BLANK, &Cell::BLANK).is_empty());
    }

    #[test]
    fn character_does_not_matter() {
        let opt = AttrOptimizer::new(&caps());
        let a = Cell::new('a', 1, 2, StyleFlags::BOLD);
        let b = Cell::new('b', 1, 2, StyleFlags::BOLD);
        assert!(opt.transition(&a, &b).is_empty());
    }

    #[test]
    fn dropping_underline_uses_the_individual_exit() {
        let opt = AttrOptimizer::new(&caps());
        let from = styled(DEFAULT_COLOR, DEFAULT_COLOR, StyleFlags::UNDERLINE);
        let out = opt.transition(&from, &Cell::BLANK);
        assert_eq!(out, b"\x1b[24m");
    }

    #[test]
    fn dropping_bold_needs_the_reset_path() {
        let opt = AttrOptimizer::new(&caps());
        let from = styled(DEFAULT_COLOR, DEFAULT_COLOR, StyleFlags::BOLD);
        let out = opt.transition(&from, &Cell::BLANK);
        assert_eq!(out, b"\x1b[0m");
    }

    #[test]
    fn reset_rebuilds_surviving_attributes_and_colors() {
        let opt = AttrOptimizer::new(&caps());
        let from = styled(2, DEFAULT_COLOR, StyleFlags::BOLD | StyleFlags::UNDERLINE);
        let to = styled(2, DEFAULT_COLOR, StyleFlags::UNDERLINE);
        let out = opt.transition(&from, &to);
        let s = String::from_utf8_lossy(&out);
        assert!(s.starts_with("\x1b[0m"), "not a reset: {s:?}");
        assert!(s.contains("\x1b[4m"), "underline lost: {s:?}");
        // logical green (2) stays ANSI green (2)
        assert!(s.ends_with("\x1b[32m"), "color not re-established: {s:?}");
    }

    #[test]
    fn color_change_uses_the_vga_permutation() {
        let opt = AttrOptimizer::new(&caps());
        // logical VGA blue (1) must come out as ANSI blue (4)
        let out = opt.transition(&Cell::BLANK, &styled(1, DEFAULT_COLOR, StyleFlags::empty()));
        assert_eq!(out, b"\x1b[34m");
        let out = opt.transition(&Cell::BLANK, &styled(DEFAULT_COLOR, 4, StyleFlags::empty()));
        assert_eq!(out, b"\x1b[41m");
    }

    #[test]
    fn high_palette_uses_the_indexed_form() {
        let opt = AttrOptimizer::new(&caps());
        let out = opt.transition(&Cell::BLANK, &styled(196, DEFAULT_COLOR, StyleFlags::empty()));
        assert_eq!(out, b"\x1b[38;5;196m");
    }

    #[test]
    fn few_color_terminals_clamp_the_palette() {
        let mut db = caps();
        db.inject_number(NumCap::MaxColors, 8);
        let opt = AttrOptimizer::new(&db);
        let out = opt.transition(&Cell::BLANK, &styled(196, DEFAULT_COLOR, StyleFlags::empty()));
        // 196 & 7 = 4 (VGA red), permuted to ANSI red (1)
        assert_eq!(out, b"\x1b[31m");
    }

    #[test]
    fn returning_to_default_colors_goes_through_orig_pair() {
        let opt = AttrOptimizer::new(&caps());
        let from = styled(3, 6, StyleFlags::empty());
        let out = opt.transition(&from, &Cell::BLANK);
        assert_eq!(out, b"\x1b[39;49m");
        // dropping only the background keeps the foreground alive
        let to = styled(3, DEFAULT_COLOR, StyleFlags::empty());
        let out = opt.transition(&from, &to);
        let s = String::from_utf8_lossy(&out);
        assert!(s.starts_with("\x1b[39;49m"), "{s:?}");
        assert!(s.contains("\x1b[36m"), "fg not re-established: {s:?}");
    }

    #[test]
    fn combined_sgr_wins_when_shorter() {
        let mut db = caps();
        // dropping bold would otherwise reset and re-enter three attrs
        db.inject_string(
            StringCap::SetAttributes,
            "\x1b[0%?%p1%t;7%;%?%p2%t;4%;%?%p6%t;1%;m",
        );
        let opt = AttrOptimizer::new(&db);
        let from = styled(
            DEFAULT_COLOR,
            DEFAULT_COLOR,
            StyleFlags::BOLD | StyleFlags::UNDERLINE | StyleFlags::STANDOUT,
        );
        let to = styled(
            DEFAULT_COLOR,
            DEFAULT_COLOR,
            StyleFlags::UNDERLINE | StyleFlags::STANDOUT,
        );
        let out = opt.transition(&from, &to);
        assert_eq!(out, b"\x1b[0;7;4m");
    }

    #[test]
    fn alt_charset_exits_individually() {
        let opt = AttrOptimizer::new(&caps());
        let from = styled(DEFAULT_COLOR, DEFAULT_COLOR, StyleFlags::ALT_CHARSET);
        assert_eq!(opt.transition(&from, &Cell::BLANK), b"\x0f");
        let out = opt.transition(&Cell::BLANK, &from);
        assert_eq!(out, b"\x0e");
    }

    proptest! {
        #[test]
        fn self_transition_is_always_empty(
            fg in 0u8..=255, bg in 0u8..=255, bits in 0u16..(1 << 13)
        ) {
            let opt = AttrOptimizer::new(&caps());
            let c = styled(fg, bg, StyleFlags::from_bits_truncate(bits));
            prop_assert!(opt.transition(&c, &c).is_empty());
        }
    }
}
