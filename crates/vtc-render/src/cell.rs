#![forbid(unsafe_code)]

//! Cell types and invariants.
//!
//! The `Cell` is the atomic unit of every frame buffer: one code point, two
//! palette color indices, and the full set of display attribute flags.
//!
//! # Invariant
//!
//! Equality of two cells implies identical terminal output when
//! transitioning between them. The diff and compositing layers rely on this
//! to suppress redundant writes, so every field that influences output must
//! participate in `PartialEq` (all of them do, derived).
//!
//! # Colors
//!
//! Color indices are logical palette slots in VGA order (blue and red
//! swapped relative to ANSI). [`DEFAULT_COLOR`] selects the terminal's
//! own default foreground or background. [`ansi_color_index`] converts a
//! logical slot to the wire index expected by SGR color sequences.

use bitflags::bitflags;

/// Sentinel palette index meaning "the terminal's default color".
pub const DEFAULT_COLOR: u8 = 0xFF;

/// Permutation from VGA palette order to ANSI SGR order.
///
/// VGA orders the primaries blue-green-red, ANSI red-green-blue; the
/// bright half of the 16-color palette applies the same permutation with
/// the intensity bit kept.
const VGA_TO_ANSI: [u8; 8] = [0, 4, 2, 6, 1, 5, 3, 7];

/// Map a logical palette index to the terminal's native color index.
///
/// Indices 0..16 are permuted per [`VGA_TO_ANSI`]; the 256-color cube and
/// grayscale ramp (16..) are identical in both orders. [`DEFAULT_COLOR`]
/// is passed through and must be special-cased by the caller.
#[inline]
pub const fn ansi_color_index(logical: u8) -> u8 {
    if logical == DEFAULT_COLOR || logical >= 16 {
        logical
    } else {
        (logical & 0x08) | VGA_TO_ANSI[(logical & 0x07) as usize]
    }
}

bitflags! {
    /// Display attribute flags of one cell.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StyleFlags: u16 {
        const BOLD          = 1 << 0;
        const DIM           = 1 << 1;
        const ITALIC        = 1 << 2;
        const UNDERLINE     = 1 << 3;
        const DBL_UNDERLINE = 1 << 4;
        const BLINK         = 1 << 5;
        const REVERSE       = 1 << 6;
        const STANDOUT      = 1 << 7;
        const INVISIBLE     = 1 << 8;
        const PROTECT       = 1 << 9;
        const CROSSED_OUT   = 1 << 10;
        /// VT100 alternate (line drawing) charset active.
        const ALT_CHARSET   = 1 << 11;
        /// PC (CP437) charset active.
        const PC_CHARSET    = 1 << 12;
    }
}

/// One display cell: code point, colors, attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    /// Code point to display.
    pub ch: char,
    /// Logical foreground palette index, [`DEFAULT_COLOR`] for default.
    pub fg: u8,
    /// Logical background palette index, [`DEFAULT_COLOR`] for default.
    pub bg: u8,
    /// Attribute flags.
    pub attrs: StyleFlags,
}

impl Cell {
    /// The blank cell: a space with default colors and no attributes.
    pub const BLANK: Self = Self {
        ch: ' ',
        fg: DEFAULT_COLOR,
        bg: DEFAULT_COLOR,
        attrs: StyleFlags::empty(),
    };

    /// Build a cell from a character with default colors.
    pub const fn from_char(ch: char) -> Self {
        Self {
            ch,
            fg: DEFAULT_COLOR,
            bg: DEFAULT_COLOR,
            attrs: StyleFlags::empty(),
        }
    }

    /// Build a fully specified cell.
    pub const fn new(ch: char, fg: u8, bg: u8, attrs: StyleFlags) -> Self {
        Self { ch, fg, bg, attrs }
    }

    /// True when the cell carries no visible styling.
    pub fn is_plain(&self) -> bool {
        self.attrs.is_empty() && self.fg == DEFAULT_COLOR && self.bg == DEFAULT_COLOR
    }

    /// The same cell with its colors darkened, used for shadow
    /// compositing. Bright palette colors drop to their dark counterpart,
    /// default foreground becomes dark gray. Idempotent, so repeated
    /// compositing of an unchanged shadow never darkens further.
    pub fn shadowed(&self) -> Self {
        let fg = match self.fg {
            DEFAULT_COLOR => 8, // dark gray
            f if (9..16).contains(&f) => f - 8,
            f => f,
        };
        Self {
            ch: self.ch,
            fg,
            bg: DEFAULT_COLOR,
            attrs: (self.attrs - StyleFlags::BOLD) | StyleFlags::DIM,
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::BLANK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_is_default() {
        assert_eq!(Cell::default(), Cell::BLANK);
        assert!(Cell::BLANK.is_plain());
    }

    #[test]
    fn equality_covers_every_field() {
        let base = Cell::new('a', 1, 2, StyleFlags::BOLD);
        assert_ne!(base, Cell::new('b', 1, 2, StyleFlags::BOLD));
        assert_ne!(base, Cell::new('a', 3, 2, StyleFlags::BOLD));
        assert_ne!(base, Cell::new('a', 1, 3, StyleFlags::BOLD));
        assert_ne!(base, Cell::new('a', 1, 2, StyleFlags::UNDERLINE));
        assert_eq!(base, Cell::new('a', 1, 2, StyleFlags::BOLD));
    }

    #[test]
    fn vga_permutation() {
        // VGA blue (1) is ANSI blue (4), VGA red (4) is ANSI red (1).
        assert_eq!(ansi_color_index(1), 4);
        assert_eq!(ansi_color_index(4), 1);
        // black and white are fixed points
        assert_eq!(ansi_color_index(0), 0);
        assert_eq!(ansi_color_index(7), 7);
        // bright half keeps the intensity bit
        assert_eq!(ansi_color_index(9), 12);
        assert_eq!(ansi_color_index(15), 15);
        // 256-color cube is untouched
        assert_eq!(ansi_color_index(16), 16);
        assert_eq!(ansi_color_index(231), 231);
        assert_eq!(ansi_color_index(DEFAULT_COLOR), DEFAULT_COLOR);
    }

    #[test]
    fn permutation_is_a_bijection_on_the_palette() {
        let mut seen = [false; 16];
        for i in 0..16u8 {
            let mapped = ansi_color_index(i) as usize;
            assert!(mapped < 16);
            assert!(!seen[mapped]);
            seen[mapped] = true;
        }
    }

    #[test]
    fn shadow_darkens() {
        let bright = Cell::new('x', 14, 4, StyleFlags::BOLD);
        let s = bright.shadowed();
        assert_eq!(s.fg, 6);
        assert_eq!(s.bg, DEFAULT_COLOR);
        assert!(s.attrs.contains(StyleFlags::DIM));
        assert!(!s.attrs.contains(StyleFlags::BOLD));
        assert_eq!(s.ch, 'x');
    }
}
