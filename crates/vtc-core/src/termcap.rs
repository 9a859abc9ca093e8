#![forbid(unsafe_code)]

//! Compiled-terminfo capability database.
//!
//! Reads the binary entries produced by `tic` directly, without linking
//! against curses. Both storage formats are understood: the legacy format
//! (magic `0o432`, 16-bit numbers) and the 32-bit-number format
//! (magic `0o1036`). Extended (user-defined) capability tables that may
//! follow the standard tables are ignored.
//!
//! # Lookup model
//!
//! Capabilities are addressed by typed enums ([`BoolCap`], [`NumCap`],
//! [`StringCap`]) whose discriminants are the standard terminfo table
//! positions, so lookup is a bounds-checked index, never a name scan.
//!
//! # Fallback injection
//!
//! A loaded entry is immutable except through [`TermDb::inject_string`],
//! which overrides or synthesizes a string capability after load. This is
//! how emulator-specific fixes and hand-coded default sequences (e.g. an
//! `orig_pair` for entries that lack one) are applied.
//!
//! # Invariants
//!
//! 1. [`TermDb::load`] fails with [`CapError::UnknownTerminalType`] when no
//!    search root holds an entry; callers treat this as fatal.
//! 2. Absent capabilities answer `None`/`false`, never a guessed default.
//! 3. Lookups after load are pure; only `inject_string` mutates.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CapError;

/// Legacy storage format magic (16-bit numbers), octal 0432.
const MAGIC_LEGACY: u16 = 0o432;
/// 32-bit-number storage format magic, octal 01036.
const MAGIC_WIDE: u16 = 0o1036;

/// Boolean capabilities, by standard terminfo table position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BoolCap {
    /// `am`: cursor wraps at the right margin.
    AutoRightMargin = 1,
    /// `xenl`: newline is ignored after wrapping (the "newline glitch").
    EatNewlineGlitch = 4,
    /// `km`: terminal has a meta key.
    HasMetaKey = 8,
    /// `bce`: erases use the current background color.
    BackColorErase = 28,
}

impl BoolCap {
    /// Short terminfo name, for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::AutoRightMargin => "am",
            Self::EatNewlineGlitch => "xenl",
            Self::HasMetaKey => "km",
            Self::BackColorErase => "bce",
        }
    }
}

/// Numeric capabilities, by standard terminfo table position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NumCap {
    /// `cols`: number of columns.
    Columns = 0,
    /// `it`: width of initial tab stops.
    InitTabs = 1,
    /// `lines`: number of lines.
    Lines = 2,
    /// `colors`: size of the color palette.
    MaxColors = 13,
}

impl NumCap {
    /// Short terminfo name, for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Columns => "cols",
            Self::InitTabs => "it",
            Self::Lines => "lines",
            Self::MaxColors => "colors",
        }
    }
}

/// String capabilities, by standard terminfo table position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StringCap {
    /// `cbt`: move left to the previous tab stop.
    BackTab = 0,
    /// `cr`: carriage return.
    CarriageReturn = 2,
    /// `clear`: clear screen and home the cursor.
    ClearScreen = 5,
    /// `el`: clear to end of line.
    ClrEol = 6,
    /// `ed`: clear to end of screen.
    ClrEos = 7,
    /// `hpa`: set cursor column (parameterized).
    ColumnAddress = 8,
    /// `cup`: absolute cursor addressing (parameterized).
    CursorAddress = 10,
    /// `cud1`: cursor down one row.
    CursorDown = 11,
    /// `home`: cursor to top-left.
    CursorHome = 12,
    /// `civis`: hide the cursor.
    CursorInvisible = 13,
    /// `cub1`: cursor left one column.
    CursorLeft = 14,
    /// `cnorm`: restore normal cursor visibility.
    CursorNormal = 16,
    /// `cuf1`: cursor right one column.
    CursorRight = 17,
    /// `cuu1`: cursor up one row.
    CursorUp = 19,
    /// `smacs`: enter the alternate (line-drawing) charset.
    EnterAltCharsetMode = 25,
    /// `blink`: enter blink mode.
    EnterBlinkMode = 26,
    /// `bold`: enter bold mode.
    EnterBoldMode = 27,
    /// `smcup`: enter the alternate screen buffer.
    EnterCaMode = 28,
    /// `dim`: enter dim mode.
    EnterDimMode = 30,
    /// `invis`: enter invisible-text mode.
    EnterSecureMode = 32,
    /// `prot`: enter protected mode.
    EnterProtectedMode = 33,
    /// `rev`: enter reverse-video mode.
    EnterReverseMode = 34,
    /// `smso`: enter standout mode.
    EnterStandoutMode = 35,
    /// `smul`: enter underline mode.
    EnterUnderlineMode = 36,
    /// `rmacs`: leave the alternate charset.
    ExitAltCharsetMode = 38,
    /// `sgr0`: reset every display attribute.
    ExitAttributeMode = 39,
    /// `rmcup`: leave the alternate screen buffer.
    ExitCaMode = 40,
    /// `rmso`: leave standout mode.
    ExitStandoutMode = 43,
    /// `rmul`: leave underline mode.
    ExitUnderlineMode = 44,
    /// `rmkx`: leave keypad-transmit mode.
    KeypadLocal = 88,
    /// `smkx`: enter keypad-transmit mode.
    KeypadXmit = 89,
    /// `cud`: cursor down N rows (parameterized).
    ParmDownCursor = 107,
    /// `cub`: cursor left N columns (parameterized).
    ParmLeftCursor = 111,
    /// `cuf`: cursor right N columns (parameterized).
    ParmRightCursor = 112,
    /// `cuu`: cursor up N rows (parameterized).
    ParmUpCursor = 114,
    /// `vpa`: set cursor row (parameterized).
    RowAddress = 127,
    /// `sgr`: set all attributes at once (nine-parameter form).
    SetAttributes = 131,
    /// `ht`: move right to the next tab stop.
    Tab = 134,
    /// `acsc`: alternate-charset pairing string.
    AcsChars = 146,
    /// `op`: restore default foreground and background.
    OrigPair = 297,
    /// `oc`: restore all original colors.
    OrigColors = 298,
    /// `setaf`: set ANSI foreground color (parameterized).
    SetAForeground = 359,
    /// `setab`: set ANSI background color (parameterized).
    SetABackground = 360,
    /// `sitm`: enter italics mode.
    EnterItalicsMode = 311,
    /// `ritm`: exit italics mode.
    ExitItalicsMode = 312,
}

impl StringCap {
    /// Short terminfo name, for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::BackTab => "cbt",
            Self::CarriageReturn => "cr",
            Self::ClearScreen => "clear",
            Self::ClrEol => "el",
            Self::ClrEos => "ed",
            Self::ColumnAddress => "hpa",
            Self::CursorAddress => "cup",
            Self::CursorDown => "cud1",
            Self::CursorHome => "home",
            Self::CursorInvisible => "civis",
            Self::CursorLeft => "cub1",
            Self::CursorNormal => "cnorm",
            Self::CursorRight => "cuf1",
            Self::CursorUp => "cuu1",
            Self::EnterAltCharsetMode => "smacs",
            Self::EnterBlinkMode => "blink",
            Self::EnterBoldMode => "bold",
            Self::EnterCaMode => "smcup",
            Self::EnterDimMode => "dim",
            Self::EnterSecureMode => "invis",
            Self::EnterProtectedMode => "prot",
            Self::EnterReverseMode => "rev",
            Self::EnterStandoutMode => "smso",
            Self::EnterUnderlineMode => "smul",
            Self::ExitAltCharsetMode => "rmacs",
            Self::ExitAttributeMode => "sgr0",
            Self::ExitCaMode => "rmcup",
            Self::ExitStandoutMode => "rmso",
            Self::ExitUnderlineMode => "rmul",
            Self::KeypadLocal => "rmkx",
            Self::KeypadXmit => "smkx",
            Self::ParmDownCursor => "cud",
            Self::ParmLeftCursor => "cub",
            Self::ParmRightCursor => "cuf",
            Self::ParmUpCursor => "cuu",
            Self::RowAddress => "vpa",
            Self::SetAttributes => "sgr",
            Self::EnterItalicsMode => "sitm",
            Self::ExitItalicsMode => "ritm",
            Self::Tab => "ht",
            Self::AcsChars => "acsc",
            Self::OrigPair => "op",
            Self::OrigColors => "oc",
            Self::SetAForeground => "setaf",
            Self::SetABackground => "setab",
        }
    }
}

/// A loaded terminal capability entry.
///
/// Immutable after load except for [`inject_string`](Self::inject_string).
#[derive(Debug, Clone)]
pub struct TermDb {
    names: String,
    flags: Vec<bool>,
    numbers: Vec<Option<i32>>,
    strings: Vec<Option<String>>,
}

impl TermDb {
    /// An entry with no capabilities at all.
    ///
    /// Every capability is then supplied through
    /// [`inject_string`](Self::inject_string). Mostly useful to embedders
    /// and tests; a real session loads a compiled entry instead.
    pub fn empty(names: impl Into<String>) -> Self {
        Self {
            names: names.into(),
            flags: Vec::new(),
            numbers: Vec::new(),
            strings: Vec::new(),
        }
    }

    /// Load the compiled entry for `term` from the system search roots.
    ///
    /// Search order: `$TERMINFO`, `$HOME/.terminfo`, `/etc/terminfo`,
    /// `/lib/terminfo`, `/usr/share/terminfo`. Within a root the entry
    /// lives at `<first-char>/<name>` (or the hex-digit variant some
    /// systems use).
    ///
    /// # Errors
    ///
    /// [`CapError::UnknownTerminalType`] when no root holds an entry,
    /// [`CapError::Malformed`] when an entry exists but cannot be parsed.
    pub fn load(term: &str) -> Result<Self, CapError> {
        if term.is_empty() || term.starts_with('.') || term.contains('/') {
            return Err(CapError::UnknownTerminalType(term.to_owned()));
        }
        for root in Self::search_roots() {
            match Self::load_from_root(&root, term) {
                Ok(db) => {
                    crate::debug!(term, root = %root.display(), "terminfo entry loaded");
                    return Ok(db);
                }
                Err(CapError::UnknownTerminalType(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(CapError::UnknownTerminalType(term.to_owned()))
    }

    /// Load from one specific database root directory.
    pub fn load_from_root(root: &Path, term: &str) -> Result<Self, CapError> {
        let first = term.chars().next().unwrap_or('?');
        let mut candidates = vec![root.join(first.to_string()).join(term)];
        // Some systems key the first-level directory by the hex value of
        // the first character instead of the character itself.
        candidates.push(root.join(format!("{:02x}", first as u32)).join(term));

        for path in candidates {
            if path.is_file() {
                let bytes = fs::read(&path)?;
                return Self::from_bytes(&bytes);
            }
        }
        Err(CapError::UnknownTerminalType(term.to_owned()))
    }

    fn search_roots() -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Ok(dir) = env::var("TERMINFO") {
            roots.push(PathBuf::from(dir));
        }
        if let Ok(home) = env::var("HOME") {
            roots.push(PathBuf::from(home).join(".terminfo"));
        }
        roots.push(PathBuf::from("/etc/terminfo"));
        roots.push(PathBuf::from("/lib/terminfo"));
        roots.push(PathBuf::from("/usr/share/terminfo"));
        roots
    }

    /// Parse a compiled entry from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CapError> {
        let mut r = Reader::new(bytes);

        let magic = r.u16()?;
        let num_width = match magic {
            MAGIC_LEGACY => 2,
            MAGIC_WIDE => 4,
            _ => return Err(CapError::Malformed("bad magic number")),
        };

        let names_size = r.u16()? as usize;
        let bool_count = r.u16()? as usize;
        let num_count = r.u16()? as usize;
        let str_count = r.u16()? as usize;
        let table_size = r.u16()? as usize;

        let names_raw = r.take(names_size)?;
        let names = String::from_utf8_lossy(names_raw)
            .trim_end_matches('\0')
            .to_owned();

        let mut flags = Vec::with_capacity(bool_count);
        for _ in 0..bool_count {
            flags.push(r.u8()? == 1);
        }

        // Numbers start on an even byte boundary.
        if (names_size + bool_count) % 2 == 1 {
            r.take(1)?;
        }

        let mut numbers = Vec::with_capacity(num_count);
        for _ in 0..num_count {
            let v = if num_width == 2 {
                i64::from(r.i16()?)
            } else {
                i64::from(r.i32()?)
            };
            numbers.push(if v < 0 { None } else { Some(v as i32) });
        }

        let mut offsets = Vec::with_capacity(str_count);
        for _ in 0..str_count {
            let off = r.i16()?;
            offsets.push(if off < 0 { None } else { Some(off as usize) });
        }

        let table = r.take(table_size)?;
        let mut strings = Vec::with_capacity(str_count);
        for off in offsets {
            let s = match off {
                Some(off) if off < table.len() => {
                    let end = table[off..]
                        .iter()
                        .position(|&b| b == 0)
                        .map(|p| off + p)
                        .ok_or(CapError::Malformed("unterminated capability string"))?;
                    Some(String::from_utf8_lossy(&table[off..end]).into_owned())
                }
                Some(_) => return Err(CapError::Malformed("string offset past table end")),
                None => None,
            };
            strings.push(s);
        }

        Ok(Self {
            names,
            flags,
            numbers,
            strings,
        })
    }

    /// The entry's name/alias field (`name1|name2|description`).
    pub fn names(&self) -> &str {
        &self.names
    }

    /// Look up a boolean capability. Absent means `false`.
    pub fn flag(&self, cap: BoolCap) -> bool {
        self.flags.get(cap as usize).copied().unwrap_or(false)
    }

    /// Look up a numeric capability.
    pub fn number(&self, cap: NumCap) -> Option<i32> {
        self.numbers.get(cap as usize).copied().flatten()
    }

    /// Look up a string capability.
    pub fn string(&self, cap: StringCap) -> Option<&str> {
        self.strings
            .get(cap as usize)
            .and_then(|s| s.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Override or synthesize a string capability after load.
    ///
    /// Used for emulator-specific fixes and for hand-coded default
    /// sequences the database lacks.
    pub fn inject_string(&mut self, cap: StringCap, seq: impl Into<String>) {
        let idx = cap as usize;
        if self.strings.len() <= idx {
            self.strings.resize(idx + 1, None);
        }
        crate::trace!(cap = cap.name(), "capability override injected");
        self.strings[idx] = Some(seq.into());
    }

    /// Remove a string capability (used to disable a broken entry).
    pub fn clear_string(&mut self, cap: StringCap) {
        if let Some(slot) = self.strings.get_mut(cap as usize) {
            *slot = None;
        }
    }

    /// Override a boolean capability after load.
    pub fn inject_flag(&mut self, cap: BoolCap, value: bool) {
        let idx = cap as usize;
        if self.flags.len() <= idx {
            self.flags.resize(idx + 1, false);
        }
        self.flags[idx] = value;
    }

    /// Override a numeric capability after load.
    pub fn inject_number(&mut self, cap: NumCap, value: i32) {
        let idx = cap as usize;
        if self.numbers.len() <= idx {
            self.numbers.resize(idx + 1, None);
        }
        self.numbers[idx] = Some(value);
    }
}

/// Bounds-checked little-endian cursor over the entry bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CapError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.bytes.len())
            .ok_or(CapError::Malformed("entry truncated"))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CapError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CapError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Result<i16, CapError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, CapError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    //! Synthetic compiled entries for tests.

    use super::*;

    pub struct EntryBuilder {
        names: String,
        flags: Vec<(usize, bool)>,
        numbers: Vec<(usize, i32)>,
        strings: Vec<(usize, Vec<u8>)>,
        wide: bool,
    }

    impl EntryBuilder {
        pub fn new(names: &str) -> Self {
            Self {
                names: names.to_owned(),
                flags: Vec::new(),
                numbers: Vec::new(),
                strings: Vec::new(),
                wide: false,
            }
        }

        pub fn wide(mut self) -> Self {
            self.wide = true;
            self
        }

        pub fn flag(mut self, cap: BoolCap) -> Self {
            self.flags.push((cap as usize, true));
            self
        }

        pub fn number(mut self, cap: NumCap, v: i32) -> Self {
            self.numbers.push((cap as usize, v));
            self
        }

        pub fn string(mut self, cap: StringCap, s: &str) -> Self {
            self.strings.push((cap as usize, s.as_bytes().to_vec()));
            self
        }

        pub fn build(self) -> Vec<u8> {
            let bool_count = self.flags.iter().map(|&(i, _)| i + 1).max().unwrap_or(0);
            let num_count = self.numbers.iter().map(|&(i, _)| i + 1).max().unwrap_or(0);
            let str_count = self.strings.iter().map(|&(i, _)| i + 1).max().unwrap_or(0);

            let mut flags = vec![0u8; bool_count];
            for (i, v) in &self.flags {
                flags[*i] = u8::from(*v);
            }
            let mut numbers = vec![-1i32; num_count];
            for (i, v) in &self.numbers {
                numbers[*i] = *v;
            }

            let mut table = Vec::new();
            let mut offsets = vec![-1i16; str_count];
            for (i, s) in &self.strings {
                offsets[*i] = table.len() as i16;
                table.extend_from_slice(s);
                table.push(0);
            }

            let names_size = self.names.len() + 1;
            let mut out = Vec::new();
            let magic = if self.wide { MAGIC_WIDE } else { MAGIC_LEGACY };
            for v in [
                magic,
                names_size as u16,
                bool_count as u16,
                num_count as u16,
                str_count as u16,
                table.len() as u16,
            ] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.extend_from_slice(self.names.as_bytes());
            out.push(0);
            out.extend_from_slice(&flags);
            if (names_size + bool_count) % 2 == 1 {
                out.push(0);
            }
            for n in numbers {
                if self.wide {
                    out.extend_from_slice(&n.to_le_bytes());
                } else {
                    out.extend_from_slice(&(n as i16).to_le_bytes());
                }
            }
            for o in offsets {
                out.extend_from_slice(&o.to_le_bytes());
            }
            out.extend_from_slice(&table);
            out
        }
    }

    /// An xterm-flavored entry with everything the optimizers consume.
    pub fn xterm_like() -> TermDb {
        let bytes = EntryBuilder::new("xtest|synthetic xterm-like entry")
            .flag(BoolCap::AutoRightMargin)
            .flag(BoolCap::EatNewlineGlitch)
            .number(NumCap::Columns, 80)
            .number(NumCap::Lines, 24)
            .number(NumCap::InitTabs, 8)
            .number(NumCap::MaxColors, 8)
            .string(StringCap::CarriageReturn, "\r")
            .string(StringCap::Tab, "\t")
            .string(StringCap::ClearScreen, "\x1b[H\x1b[2J")
            .string(StringCap::CursorAddress, "\x1b[%i%p1%d;%p2%dH")
            .string(StringCap::CursorHome, "\x1b[H")
            .string(StringCap::CursorUp, "\x1b[A")
            .string(StringCap::CursorDown, "\n")
            .string(StringCap::CursorLeft, "\x08")
            .string(StringCap::CursorRight, "\x1b[C")
            .string(StringCap::ParmUpCursor, "\x1b[%p1%dA")
            .string(StringCap::ParmDownCursor, "\x1b[%p1%dB")
            .string(StringCap::ParmRightCursor, "\x1b[%p1%dC")
            .string(StringCap::ParmLeftCursor, "\x1b[%p1%dD")
            .string(StringCap::ColumnAddress, "\x1b[%i%p1%dG")
            .string(StringCap::RowAddress, "\x1b[%i%p1%dd")
            .string(StringCap::ExitAttributeMode, "\x1b[0m")
            .string(StringCap::EnterBoldMode, "\x1b[1m")
            .string(StringCap::EnterDimMode, "\x1b[2m")
            .string(StringCap::EnterUnderlineMode, "\x1b[4m")
            .string(StringCap::ExitUnderlineMode, "\x1b[24m")
            .string(StringCap::EnterBlinkMode, "\x1b[5m")
            .string(StringCap::EnterReverseMode, "\x1b[7m")
            .string(StringCap::EnterStandoutMode, "\x1b[7m")
            .string(StringCap::ExitStandoutMode, "\x1b[27m")
            .string(StringCap::EnterSecureMode, "\x1b[8m")
            .string(StringCap::EnterAltCharsetMode, "\x0e")
            .string(StringCap::ExitAltCharsetMode, "\x0f")
            .string(
                StringCap::SetAForeground,
                "\x1b[%?%p1%{8}%<%t3%p1%d%e38;5;%p1%d%;m",
            )
            .string(
                StringCap::SetABackground,
                "\x1b[%?%p1%{8}%<%t4%p1%d%e48;5;%p1%d%;m",
            )
            .string(StringCap::OrigPair, "\x1b[39;49m")
            .string(StringCap::EnterCaMode, "\x1b[?1049h")
            .string(StringCap::ExitCaMode, "\x1b[?1049l")
            .string(StringCap::CursorInvisible, "\x1b[?25l")
            .string(StringCap::CursorNormal, "\x1b[?25h")
            .string(StringCap::KeypadXmit, "\x1b[?1h\x1b=")
            .string(StringCap::KeypadLocal, "\x1b[?1l\x1b>")
            .build();
        TermDb::from_bytes(&bytes).expect("fixture entry parses")
    }
}
