#![forbid(unsafe_code)]

//! Flush presenter: state-tracked terminal output.
//!
//! Walks the vterm's dirty ranges and writes only the cells that differ
//! from the front buffer (the mirror of what the physical screen already
//! shows). Cursor motion goes through the motion optimizer, attribute
//! changes through the attribute optimizer, characters through the
//! encoder. Everything is assembled in a buffered writer and flushed
//! once per update cycle.
//!
//! # State tracking
//!
//! The presenter owns the last-known cursor position and attribute
//! state. Both become unknown whenever the terminal may disagree with
//! the model: after a character of display width other than one, after
//! printing in the last column under automatic margins with the
//! eat-newline glitch (`xenl`), and after a resize. Unknown state
//! forces absolute addressing and a full attribute
//! rebuild on the next write, never a wrong delta.
//!
//! # Invariant
//!
//! After a successful [`flush`](Presenter::flush), every dirty range of
//! the flushed vterm is empty and the front buffer equals the vterm.

use std::io::{self, BufWriter, Write};

use smallvec::SmallVec;
use unicode_width::UnicodeWidthChar;
use vtc_core::encoding::{ascii_substitute, Encoder, Encoding};
use vtc_core::{BoolCap, TermDb};

use crate::area::{Area, Rect};
use crate::attrs::AttrOptimizer;
use crate::cell::{Cell, StyleFlags};
use crate::optimove::CursorOptimizer;

/// Size of the internal write buffer.
const BUFFER_CAPACITY: usize = 32 * 1024;

/// State-tracked flush layer between the vterm and the terminal device.
pub struct Presenter<W: Write> {
    writer: BufWriter<W>,
    /// Mirror of the physical screen contents.
    front: Area,
    /// Last-known cursor position, `None` when unknown.
    cursor: Option<(u16, u16)>,
    /// Last-known attribute state, `None` when unknown.
    style: Option<Cell>,
    moves: CursorOptimizer,
    attrs: AttrOptimizer,
    encoder: Encoder,
    auto_margin: bool,
    /// `xenl`: the wrap after the last column is deferred, so the
    /// position there is ambiguous.
    eat_newline: bool,
    columns: u16,
    rows: u16,
}

impl<W: Write> Presenter<W> {
    /// Build a presenter over a writer for a terminal of the given size.
    pub fn new(writer: W, db: &TermDb, encoder: Encoder, columns: u16, rows: u16) -> Self {
        Self {
            writer: BufWriter::with_capacity(BUFFER_CAPACITY, writer),
            front: Area::new(Rect::new(0, 0, columns, rows), 0, 0),
            cursor: None,
            style: None,
            moves: CursorOptimizer::new(db, columns, rows),
            attrs: AttrOptimizer::new(db),
            encoder,
            auto_margin: db.flag(BoolCap::AutoRightMargin),
            eat_newline: db.flag(BoolCap::EatNewlineGlitch),
            columns,
            rows,
        }
    }

    /// The active encoder.
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Forget all tracked terminal state, forcing absolute addressing
    /// and a full attribute rebuild on the next write.
    pub fn invalidate_state(&mut self) {
        self.cursor = None;
        self.style = None;
    }

    /// Adopt a new terminal size. The front buffer is rebuilt blank, so
    /// the next flush repaints everything the vterm holds.
    pub fn set_size(&mut self, columns: u16, rows: u16) {
        self.columns = columns;
        self.rows = rows;
        self.front = Area::new(Rect::new(0, 0, columns, rows), 0, 0);
        self.moves.set_size(columns, rows);
        self.invalidate_state();
    }

    /// Write raw bytes (setup and teardown sequences) through the same
    /// buffered writer, keeping output ordered with flushed frames.
    pub fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    /// Push everything buffered to the terminal.
    pub fn flush_writer(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Emit the cursor motion to a position, tracking the new state.
    /// Used for the visible input cursor after a frame.
    pub fn park_cursor(&mut self, x: u16, y: u16) -> io::Result<()> {
        let to = (x.min(self.columns.saturating_sub(1)), y.min(self.rows.saturating_sub(1)));
        let motion = self.moves.move_to(self.cursor, to);
        self.writer.write_all(&motion)?;
        self.cursor = Some(to);
        Ok(())
    }

    /// Write every dirty cell of `vterm` that differs from the front
    /// buffer, then clear the vterm's dirty ranges and flush once.
    pub fn flush(&mut self, vterm: &mut Area) -> io::Result<()> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("flush", columns = self.columns, rows = self.rows).entered();

        let rows: SmallVec<[(u16, u16, u16); 32]> = vterm.dirty_rows().collect();
        for (y, xmin, xmax) in rows {
            if y >= self.rows {
                continue;
            }
            for x in xmin..=xmax.min(self.columns.saturating_sub(1)) {
                let Some(&cell) = vterm.cell(x, y) else {
                    continue;
                };
                if self.front.cell(x, y) == Some(&cell) {
                    continue;
                }
                self.put_cell(x, y, cell)?;
                self.front.write_cell(x, y, cell);
            }
        }
        vterm.clear_dirty();
        self.front.clear_dirty();
        self.writer.flush()
    }

    /// Move, restyle, and print one cell at `(x, y)`.
    fn put_cell(&mut self, x: u16, y: u16, cell: Cell) -> io::Result<()> {
        let motion = self.moves.move_to(self.cursor, (x, y));
        self.writer.write_all(&motion)?;

        // pick the bytes first so the alternate-charset requirement can
        // flow into the attribute transition
        let (bytes, printed, alt) = self.encode_char(cell.ch);
        let mut target = cell;
        target.attrs.set(StyleFlags::ALT_CHARSET, alt || cell.attrs.contains(StyleFlags::ALT_CHARSET));

        let restyle = match &self.style {
            Some(prev) => self.attrs.transition(prev, &target),
            None => self.attrs.establish(&target),
        };
        self.writer.write_all(&restyle)?;
        self.writer.write_all(&bytes)?;
        self.style = Some(target);

        // cursor bookkeeping; anything that may wrap or mis-advance
        // makes the position unknown
        let width = match self.encoder.encoding() {
            Encoding::Utf8 => UnicodeWidthChar::width(printed).unwrap_or(1),
            _ => 1,
        };
        let next_x = x + 1;
        if width != 1 {
            self.cursor = None;
        } else if next_x >= self.columns {
            if !self.auto_margin {
                self.cursor = Some((x, y));
            } else if self.eat_newline || y + 1 >= self.rows {
                // wrap is deferred (or would scroll); position unknown
                self.cursor = None;
            } else {
                self.cursor = Some((0, y + 1));
            }
        } else {
            self.cursor = Some((next_x, y));
        }
        Ok(())
    }

    /// Encode one code point for the active encoding, with the ASCII
    /// substitute as the fallback. Returns the bytes, the character the
    /// terminal will show, and whether it needs the alternate charset.
    fn encode_char(&self, ch: char) -> (SmallVec<[u8; 4]>, char, bool) {
        let mut buf = SmallVec::new();
        match self.encoder.encode(ch) {
            Some(native) => {
                let mut bytes = Vec::new();
                self.encoder.emit(native, &mut bytes);
                buf.extend_from_slice(&bytes);
                (buf, native.code, native.alt_charset)
            }
            None => {
                let sub = ascii_substitute(ch);
                buf.push(sub as u8);
                (buf, sub, false)
            }
        }
    }

    /// The attribute reset sequence, for teardown.
    pub fn reset_attributes(&mut self) -> io::Result<()> {
        let seq = self.attrs.reset_sequence().to_vec();
        self.writer.write_all(&seq)?;
        self.style = Some(Cell::BLANK);
        Ok(())
    }
}
