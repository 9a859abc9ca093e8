#![forbid(unsafe_code)]

//! Character-encoding negotiation and translation.
//!
//! The active encoding is decided once at startup from the locale
//! codeset, the presence of the alternate-charset capability, and the
//! detected profile (a Linux console with a custom font forces the PC
//! charset). After that, [`Encoder::encode`] is a pure function over the
//! static character table and the chosen encoding.
//!
//! The table carries, per logical character, its Unicode code point, its
//! VT100 line-drawing byte, its CP437 byte, and an ASCII substitute.
//! Printable ASCII is always the identity and is not tabulated.

/// The closed set of output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Plain 7-bit ASCII, substitutes for everything else.
    Ascii,
    /// ASCII plus the VT100 alternate (line-drawing) charset.
    Vt100,
    /// CP437-style single-byte charset (Linux console, custom fonts).
    Pc,
    /// UTF-8, full Unicode.
    Utf8,
}

impl Encoding {
    /// Encoding name for diagnostics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ascii => "ASCII",
            Self::Vt100 => "VT100",
            Self::Pc => "PC",
            Self::Utf8 => "UTF-8",
        }
    }
}

/// One code point translated into the active encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeChar {
    /// The native code (a Unicode scalar for UTF-8, a single byte value
    /// for the other encodings).
    pub code: char,
    /// The VT100 alternate charset must be active while printing this.
    pub alt_charset: bool,
}

impl NativeChar {
    const fn plain(code: char) -> Self {
        Self {
            code,
            alt_charset: false,
        }
    }
}

/// One row of the static character table.
struct CharMapping {
    unicode: char,
    /// VT100 alternate-charset byte, 0 when unrepresentable.
    vt100: u8,
    /// CP437 byte, 0 when unrepresentable.
    pc: u8,
    /// ASCII substitute, 0 when none is sensible.
    ascii: u8,
}

const fn m(unicode: char, vt100: u8, pc: u8, ascii: u8) -> CharMapping {
    CharMapping {
        unicode,
        vt100,
        pc,
        ascii,
    }
}

/// Logical characters the widget layer draws with, in every encoding.
#[rustfmt::skip]
const CHARACTER_TABLE: &[CharMapping] = &[
    // box drawing, single
    m('─', b'q', 0xC4, b'-'),
    m('│', b'x', 0xB3, b'|'),
    m('┌', b'l', 0xDA, b'+'),
    m('┐', b'k', 0xBF, b'+'),
    m('└', b'm', 0xC0, b'+'),
    m('┘', b'j', 0xD9, b'+'),
    m('├', b't', 0xC3, b'+'),
    m('┤', b'u', 0xB4, b'+'),
    m('┬', b'w', 0xC2, b'+'),
    m('┴', b'v', 0xC1, b'+'),
    m('┼', b'n', 0xC5, b'+'),
    // box drawing, double (no VT100 equivalent)
    m('═', 0, 0xCD, b'='),
    m('║', 0, 0xBA, b'|'),
    m('╔', 0, 0xC9, b'+'),
    m('╗', 0, 0xBB, b'+'),
    m('╚', 0, 0xC8, b'+'),
    m('╝', 0, 0xBC, b'+'),
    // blocks and shades
    m('█', 0, 0xDB, b'#'),
    m('▄', 0, 0xDC, b'#'),
    m('▀', 0, 0xDF, b'#'),
    m('▌', 0, 0xDD, b'#'),
    m('▐', 0, 0xDE, b'#'),
    m('░', 0, 0xB0, b':'),
    m('▒', b'a', 0xB1, b'#'),
    m('▓', 0, 0xB2, b'#'),
    m('■', 0, 0xFE, b'#'),
    // arrows and pointers
    m('←', 0, 0x1B, b'<'),
    m('→', 0, 0x1A, b'>'),
    m('↑', 0, 0x18, b'^'),
    m('↓', 0, 0x19, b'v'),
    m('↕', 0, 0x12, b'|'),
    m('►', 0, 0x10, b'>'),
    m('◄', 0, 0x11, b'<'),
    m('▲', 0, 0x1E, b'^'),
    m('▼', 0, 0x1F, b'v'),
    // bullets and suits
    m('•', 0, 0x07, b'*'),
    m('○', 0, 0x09, b'o'),
    m('·', b'~', 0xFA, b'.'),
    m('◆', b'`', 0x04, b'*'),
    m('♦', 0, 0x04, b'*'),
    m('♣', 0, 0x05, b'*'),
    m('♠', 0, 0x06, b'*'),
    m('♥', 0, 0x03, b'*'),
    // math and signs
    m('°', b'f', 0xF8, b'o'),
    m('±', b'g', 0xF1, b'#'),
    m('≤', b'y', 0xF3, b'<'),
    m('≥', b'z', 0xF2, b'>'),
    m('≠', b'|', 0, b'='),
    m('≡', 0, 0xF0, b'='),
    m('π', b'{', 0xE3, b'*'),
    m('£', b'}', 0x9C, b'L'),
    m('¶', 0, 0x14, 0),
    m('§', 0, 0x15, 0),
];

// The PC downgrade mask below indexes table rows by bit position.
const _: () = assert!(CHARACTER_TABLE.len() <= 64);

fn table_index(c: char) -> Option<usize> {
    CHARACTER_TABLE.iter().position(|row| row.unicode == c)
}

fn table_lookup(c: char) -> Option<&'static CharMapping> {
    CHARACTER_TABLE.iter().find(|row| row.unicode == c)
}

/// The encoding decision plus the translation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoder {
    encoding: Encoding,
    /// Table rows whose CP437 byte the console cannot display; these
    /// encode as their ASCII substitute instead.
    pc_downgraded: u64,
}

impl Encoder {
    /// Build an encoder with a fixed encoding.
    pub const fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            pc_downgraded: 0,
        }
    }

    /// Decide the session encoding.
    ///
    /// Precedence: a UTF-8 locale selects UTF-8; a forced PC charset
    /// (custom console font, CP437 emulator quirk) selects PC; an
    /// alternate-charset capability selects VT100 line drawing; plain
    /// ASCII otherwise. A non-TTY profile is always ASCII.
    pub fn choose(utf8_locale: bool, has_alt_charset: bool, force_pc: bool, is_tty: bool) -> Self {
        let encoding = if !is_tty {
            Encoding::Ascii
        } else if utf8_locale {
            Encoding::Utf8
        } else if force_pc {
            Encoding::Pc
        } else if has_alt_charset {
            Encoding::Vt100
        } else {
            Encoding::Ascii
        };
        crate::debug!(encoding = encoding.as_str(), "encoding selected");
        Self {
            encoding,
            pc_downgraded: 0,
        }
    }

    /// Reconcile the PC charset with the console's actual
    /// unicode-to-glyph map.
    ///
    /// Every table row whose Unicode the map cannot resolve falls back
    /// to its ASCII substitute, so a remapped console font never shows
    /// the wrong glyph. A non-PC encoding and an empty map (no Unicode
    /// translation at all) leave the table untouched.
    pub fn apply_console_map(&mut self, map: &[(u16, u16)]) {
        if self.encoding != Encoding::Pc || map.is_empty() {
            return;
        }
        let mut downgraded = 0u64;
        for (i, row) in CHARACTER_TABLE.iter().enumerate() {
            if row.pc == 0 {
                continue;
            }
            let code = row.unicode as u32;
            let mapped = u16::try_from(code)
                .is_ok_and(|code| map.iter().any(|&(unicode, _)| unicode == code));
            if !mapped {
                downgraded |= 1 << i;
            }
        }
        self.pc_downgraded = downgraded;
        crate::debug!(rows = downgraded.count_ones(), "PC charset rows downgraded");
    }

    /// The active encoding.
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Translate one code point into the active encoding.
    ///
    /// Returns `None` when the active encoding has no representation;
    /// the caller falls back to [`ascii_substitute`].
    pub fn encode(&self, c: char) -> Option<NativeChar> {
        if c.is_ascii() {
            return Some(NativeChar::plain(c));
        }
        match self.encoding {
            Encoding::Utf8 => Some(NativeChar::plain(c)),
            Encoding::Vt100 => table_lookup(c).and_then(|row| {
                (row.vt100 != 0).then_some(NativeChar {
                    code: row.vt100 as char,
                    alt_charset: true,
                })
            }),
            Encoding::Pc => table_index(c).and_then(|i| {
                let row = &CHARACTER_TABLE[i];
                if self.pc_downgraded & (1 << i) != 0 {
                    (row.ascii != 0).then_some(NativeChar::plain(row.ascii as char))
                } else {
                    (row.pc != 0).then_some(NativeChar::plain(row.pc as char))
                }
            }),
            Encoding::Ascii => table_lookup(c)
                .and_then(|row| (row.ascii != 0).then_some(NativeChar::plain(row.ascii as char))),
        }
    }

    /// Serialize one translated code point: 1-4 bytes of UTF-8, or the
    /// single native byte for the other encodings.
    pub fn emit(&self, native: NativeChar, out: &mut Vec<u8>) {
        match self.encoding {
            Encoding::Utf8 => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(native.code.encode_utf8(&mut buf).as_bytes());
            }
            _ => out.push(native.code as u8),
        }
    }
}

/// The ASCII stand-in for a code point no encoding can carry.
pub fn ascii_substitute(c: char) -> char {
    if c.is_ascii() {
        return c;
    }
    match table_lookup(c) {
        Some(row) if row.ascii != 0 => row.ascii as char,
        _ => '?',
    }
}
