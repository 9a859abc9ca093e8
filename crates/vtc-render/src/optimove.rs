#![forbid(unsafe_code)]

//! Cursor-motion optimizer.
//!
//! Computes the cheapest escape sequence that moves the cursor between
//! two coordinates, given the capabilities the terminal actually has.
//! Candidates considered: absolute addressing (`cup`), one-axis
//! addressing (`vpa`/`hpa`), chained relative steps, parameterized
//! multi-step motions (`cuu`/`cud`/`cub`/`cuf`), carriage return plus
//! vertical motion, home plus relative motion, and tabs for rightward
//! motion.
//!
//! Cost is output byte length plus a small fixed weight per chained
//! piece, so a one-sequence `cup` wins over an equally long three-piece
//! chain.
//!
//! # Quirks
//!
//! - `am` (automatic margins): tab candidates that could land on the
//!   last column are discarded, wrapping there is terminal dependent.
//! - `xenl` (eat-newline glitch) and width handling at the right margin
//!   are the flush layer's concern; it reports the cursor as unknown
//!   after any write that may have wrapped, and this optimizer then
//!   receives `from = None`.

use smallvec::SmallVec;
use vtc_core::params;
use vtc_core::{BoolCap, NumCap, StringCap, TermDb};

/// Weight added per chained piece beyond the first, in cost units.
const PIECE_WEIGHT: usize = 1;

/// A cursor position in zero-based (column, row) form.
pub type Point = (u16, u16);

/// Precomputed motion capabilities for one terminal.
#[derive(Debug, Clone)]
pub struct CursorOptimizer {
    cup: Option<String>,
    vpa: Option<String>,
    hpa: Option<String>,
    parm_up: Option<String>,
    parm_down: Option<String>,
    parm_left: Option<String>,
    parm_right: Option<String>,
    up1: Option<Vec<u8>>,
    down1: Option<Vec<u8>>,
    left1: Option<Vec<u8>>,
    right1: Option<Vec<u8>>,
    home: Option<Vec<u8>>,
    cr: Option<Vec<u8>>,
    tab: Option<Vec<u8>>,
    auto_margin: bool,
    tab_width: u16,
    columns: u16,
    rows: u16,
}

impl CursorOptimizer {
    /// Snapshot the motion capabilities of a loaded entry.
    pub fn new(db: &TermDb, columns: u16, rows: u16) -> Self {
        let fmt = |cap| db.string(cap).map(str::to_owned);
        let lit = |cap| db.string(cap).map(|s| s.as_bytes().to_vec());
        Self {
            cup: fmt(StringCap::CursorAddress),
            vpa: fmt(StringCap::RowAddress),
            hpa: fmt(StringCap::ColumnAddress),
            parm_up: fmt(StringCap::ParmUpCursor),
            parm_down: fmt(StringCap::ParmDownCursor),
            parm_left: fmt(StringCap::ParmLeftCursor),
            parm_right: fmt(StringCap::ParmRightCursor),
            up1: lit(StringCap::CursorUp),
            down1: lit(StringCap::CursorDown),
            left1: lit(StringCap::CursorLeft),
            right1: lit(StringCap::CursorRight),
            home: lit(StringCap::CursorHome),
            cr: lit(StringCap::CarriageReturn),
            tab: lit(StringCap::Tab),
            auto_margin: db.flag(BoolCap::AutoRightMargin),
            tab_width: db
                .number(NumCap::InitTabs)
                .and_then(|n| u16::try_from(n).ok())
                .filter(|&n| n > 0)
                .unwrap_or(8),
            columns,
            rows,
        }
    }

    /// Update the cached screen size after a resize.
    pub fn set_size(&mut self, columns: u16, rows: u16) {
        self.columns = columns;
        self.rows = rows;
    }

    /// The cheapest sequence moving the cursor from `from` to `to`.
    ///
    /// `from = None` means the current position is unknown, restricting
    /// the candidates to absolute ones. Empty output means either no
    /// motion is needed or the capability set cannot express the move.
    pub fn move_to(&self, from: Option<Point>, to: Point) -> Vec<u8> {
        if from == Some(to) {
            return Vec::new();
        }
        let (tx, ty) = to;
        let mut best: Option<(usize, Vec<u8>)> = None;

        // absolute candidates work regardless of the starting point
        consider(&mut best, 0, self.expand2(&self.cup, ty, tx));
        consider(
            &mut best,
            PIECE_WEIGHT,
            join2(self.expand1(&self.vpa, ty), self.expand1(&self.hpa, tx)),
        );
        if let Some(home) = &self.home {
            consider(
                &mut best,
                2 * PIECE_WEIGHT,
                join3(
                    Some(home.clone()),
                    self.vertical(0, ty),
                    self.horizontal(0, tx),
                ),
            );
        }

        if let Some((fx, fy)) = from {
            // pure relative chain
            consider(
                &mut best,
                PIECE_WEIGHT,
                join2(self.vertical(fy, ty), self.horizontal(fx, tx)),
            );
            // carriage return, then relative from column zero
            if let Some(cr) = &self.cr {
                consider(
                    &mut best,
                    2 * PIECE_WEIGHT,
                    join3(
                        Some(cr.clone()),
                        self.vertical(fy, ty),
                        self.horizontal(0, tx),
                    ),
                );
            }
            // one axis absolute, the other relative
            consider(
                &mut best,
                PIECE_WEIGHT,
                join2(self.expand1(&self.vpa, ty), self.horizontal(fx, tx)),
            );
            consider(
                &mut best,
                PIECE_WEIGHT,
                join2(self.expand1(&self.hpa, tx), self.vertical(fy, ty)),
            );
        }

        best.map(|(_, bytes)| bytes).unwrap_or_default()
    }

    /// Relative vertical motion, cheapest of the parameterized and the
    /// repeated single-step form.
    fn vertical(&self, from_y: u16, to_y: u16) -> Option<Vec<u8>> {
        if from_y == to_y {
            return Some(Vec::new());
        }
        let (n, parm, single) = if to_y < from_y {
            (from_y - to_y, &self.parm_up, &self.up1)
        } else {
            (to_y - from_y, &self.parm_down, &self.down1)
        };
        shortest(self.expand1(parm, n), repeat(single, n))
    }

    /// Relative horizontal motion; rightward motion may ride tab stops.
    fn horizontal(&self, from_x: u16, to_x: u16) -> Option<Vec<u8>> {
        if from_x == to_x {
            return Some(Vec::new());
        }
        if to_x < from_x {
            let n = from_x - to_x;
            return shortest(self.expand1(&self.parm_left, n), repeat(&self.left1, n));
        }
        let n = to_x - from_x;
        let plain = shortest(self.expand1(&self.parm_right, n), repeat(&self.right1, n));
        shortest(plain, self.tabbed_right(from_x, to_x))
    }

    /// Rightward motion via tab stops plus a short remainder.
    fn tabbed_right(&self, from_x: u16, to_x: u16) -> Option<Vec<u8>> {
        let tab = self.tab.as_ref()?;
        let tw = self.tab_width;
        let mut out = Vec::new();
        let mut x = from_x;
        loop {
            let stop = (x / tw + 1) * tw;
            if stop > to_x || stop >= self.columns {
                break;
            }
            // never tab into the last column under automatic margins
            if self.auto_margin && stop >= self.columns.saturating_sub(1) {
                break;
            }
            out.extend_from_slice(tab);
            x = stop;
        }
        if x == from_x {
            return None;
        }
        if x < to_x {
            let rest = self.horizontal_no_tabs(x, to_x)?;
            out.extend_from_slice(&rest);
        }
        Some(out)
    }

    fn horizontal_no_tabs(&self, from_x: u16, to_x: u16) -> Option<Vec<u8>> {
        let n = to_x - from_x;
        shortest(self.expand1(&self.parm_right, n), repeat(&self.right1, n))
    }

    fn expand1(&self, fmt: &Option<String>, p1: u16) -> Option<Vec<u8>> {
        fmt.as_ref()
            .and_then(|f| params::expand(f, &[i32::from(p1)]).ok())
    }

    fn expand2(&self, fmt: &Option<String>, p1: u16, p2: u16) -> Option<Vec<u8>> {
        fmt.as_ref()
            .and_then(|f| params::expand(f, &[i32::from(p1), i32::from(p2)]).ok())
    }

    /// Screen size the optimizer currently assumes.
    pub fn size(&self) -> (u16, u16) {
        (self.columns, self.rows)
    }
}

/// Keep the cheaper candidate. Cost is length plus the chain weight.
fn consider(best: &mut Option<(usize, Vec<u8>)>, weight: usize, candidate: Option<Vec<u8>>) {
    let Some(bytes) = candidate else {
        return;
    };
    if bytes.is_empty() {
        // an empty candidate means "no motion needed", never a winner
        // over a real sequence unless nothing else exists
        return;
    }
    let cost = bytes.len() + weight;
    if best.as_ref().is_none_or(|(c, _)| cost < *c) {
        *best = Some((cost, bytes));
    }
}

fn join2(a: Option<Vec<u8>>, b: Option<Vec<u8>>) -> Option<Vec<u8>> {
    let mut a = a?;
    a.extend_from_slice(&b?);
    Some(a)
}

fn join3(a: Option<Vec<u8>>, b: Option<Vec<u8>>, c: Option<Vec<u8>>) -> Option<Vec<u8>> {
    join2(join2(a, b), c)
}

fn shortest(a: Option<Vec<u8>>, b: Option<Vec<u8>>) -> Option<Vec<u8>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.len() <= b.len() { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn repeat(seq: &Option<Vec<u8>>, n: u16) -> Option<Vec<u8>> {
    let seq = seq.as_ref()?;
    let mut out: SmallVec<[u8; 24]> = SmallVec::new();
    for _ in 0..n {
        out.extend_from_slice(seq);
    }
    Some(out.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vtc_core::TermDb;

    fn xterm_caps() -> TermDb {
        let mut db = TermDb::empty("optimizer-test");
        db.inject_string(StringCap::CursorAddress, "\x1b[%i%p1%d;%p2%dH");
        db.inject_string(StringCap::RowAddress, "\x1b[%i%p1%dd");
        db.inject_string(StringCap::ColumnAddress, "\x1b[%i%p1%dG");
        db.inject_string(StringCap::CursorUp, "\x1b[A");
        db.inject_string(StringCap::CursorDown, "\n");
        db.inject_string(StringCap::CursorLeft, "\x08");
        db.inject_string(StringCap::CursorRight, "\x1b[C");
        db.inject_string(StringCap::ParmUpCursor, "\x1b[%p1%dA");
        db.inject_string(StringCap::ParmDownCursor, "\x1b[%p1%dB");
        db.inject_string(StringCap::ParmLeftCursor, "\x1b[%p1%dD");
        db.inject_string(StringCap::ParmRightCursor, "\x1b[%p1%dC");
        db.inject_string(StringCap::CursorHome, "\x1b[H");
        db.inject_string(StringCap::CarriageReturn, "\r");
        db.inject_string(StringCap::Tab, "\t");
        db.inject_flag(BoolCap::AutoRightMargin, true);
        db
    }

    /// Applies emitted motion bytes to a model cursor. Understands the
    /// CSI forms, CR, BS, LF, and tabs the way a VT100 does.
    fn apply(bytes: &[u8], start: Point, columns: u16, rows: u16) -> Point {
        let (mut x, mut y) = (start.0 as i32, start.1 as i32);
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\r' => x = 0,
                b'\x08' => x -= 1,
                b'\n' => y += 1,
                b'\t' => x = (x / 8 + 1) * 8,
                0x1b => {
                    assert_eq!(bytes.get(i + 1), Some(&b'['), "unexpected escape");
                    let mut j = i + 2;
                    while j < bytes.len() && !bytes[j].is_ascii_alphabetic() {
                        j += 1;
                    }
                    let args: Vec<i32> = std::str::from_utf8(&bytes[i + 2..j])
                        .unwrap()
                        .split(';')
                        .filter(|s| !s.is_empty())
                        .map(|s| s.parse().unwrap())
                        .collect();
                    let n = *args.first().unwrap_or(&1);
                    match bytes[j] {
                        b'A' => y -= n,
                        b'B' => y += n,
                        b'C' => x += n,
                        b'D' => x -= n,
                        b'G' => x = n - 1,
                        b'd' => y = n - 1,
                        b'H' => {
                            y = args.first().copied().unwrap_or(1) - 1;
                            x = args.get(1).copied().unwrap_or(1) - 1;
                        }
                        other => panic!("unhandled final byte {other:?}"),
                    }
                    i = j;
                }
                other => panic!("unhandled byte {other:?}"),
            }
            i += 1;
            assert!(x >= 0 && y >= 0, "cursor ran off the top-left");
            assert!(x < columns as i32 && y < rows as i32, "cursor ran off screen");
        }
        (x as u16, y as u16)
    }

    #[test]
    fn same_position_is_empty() {
        let opt = CursorOptimizer::new(&xterm_caps(), 80, 24);
        assert!(opt.move_to(Some((10, 5)), (10, 5)).is_empty());
    }

    #[test]
    fn unknown_position_uses_absolute_addressing() {
        let opt = CursorOptimizer::new(&xterm_caps(), 80, 24);
        let out = opt.move_to(None, (3, 7));
        assert_eq!(apply(&out, (0, 0), 80, 24), (3, 7));
        assert_eq!(out, b"\x1b[8;4H");
    }

    #[test]
    fn short_vertical_hop_beats_cup() {
        let opt = CursorOptimizer::new(&xterm_caps(), 80, 24);
        // one row up from (10, 5): a single cuu1 is cheapest
        assert_eq!(opt.move_to(Some((10, 5)), (10, 4)), b"\x1b[A");
        // one row down: cud1 is a single newline
        assert_eq!(opt.move_to(Some((10, 5)), (10, 6)), b"\n");
    }

    #[test]
    fn column_zero_prefers_carriage_return() {
        let opt = CursorOptimizer::new(&xterm_caps(), 80, 24);
        assert_eq!(opt.move_to(Some((70, 5)), (0, 5)), b"\r");
    }

    #[test]
    fn synthesizes_motion_without_cup() {
        let mut db = TermDb::empty("dumb-ish");
        db.inject_string(StringCap::CursorUp, "\x1bU");
        db.inject_string(StringCap::CursorDown, "\n");
        db.inject_string(StringCap::CarriageReturn, "\r");
        let opt = CursorOptimizer::new(&db, 80, 24);
        // (10,5) -> (10,2) must become three cursor-up sequences
        let out = opt.move_to(Some((10, 5)), (10, 2));
        assert_eq!(out, b"\x1bU\x1bU\x1bU");
    }

    #[test]
    fn impossible_move_degrades_to_empty() {
        let db = TermDb::empty("dumb");
        let opt = CursorOptimizer::new(&db, 80, 24);
        assert!(opt.move_to(Some((0, 0)), (5, 5)).is_empty());
        assert!(opt.move_to(None, (5, 5)).is_empty());
    }

    #[test]
    fn tabs_carry_rightward_motion() {
        let mut db = TermDb::empty("tabby");
        db.inject_string(StringCap::Tab, "\t");
        db.inject_string(StringCap::CursorRight, "\x1b[C");
        let opt = CursorOptimizer::new(&db, 80, 24);
        let out = opt.move_to(Some((0, 3)), (16, 3));
        assert_eq!(out, b"\t\t");
        assert_eq!(apply(&out, (0, 3), 80, 24), (16, 3));
    }

    #[test]
    fn tabs_never_land_on_last_column_with_margins() {
        let mut db = TermDb::empty("tabby-am");
        db.inject_string(StringCap::Tab, "\t");
        db.inject_string(StringCap::CursorRight, "\x1b[C");
        db.inject_flag(BoolCap::AutoRightMargin, true);
        let opt = CursorOptimizer::new(&db, 17, 24);
        // column 16 is the last column of a 17-wide screen; a naive
        // tabber would ride two stops and land exactly on the margin
        let out = opt.move_to(Some((0, 0)), (16, 0));
        let tabs = out.iter().filter(|&&b| b == b'\t').count();
        assert!(tabs <= 1, "tab landed on the margin: {out:?}");
        assert_eq!(apply(&out, (0, 0), 17, 24), (16, 0));
    }

    #[test]
    fn parameterized_beats_repeated_steps_for_long_moves() {
        let mut db = TermDb::empty("parm-only");
        db.inject_string(StringCap::CursorUp, "\x1b[A");
        db.inject_string(StringCap::ParmUpCursor, "\x1b[%p1%dA");
        let opt = CursorOptimizer::new(&db, 80, 24);
        let out = opt.move_to(Some((0, 20)), (0, 2));
        assert_eq!(out, b"\x1b[18A");
    }

    proptest! {
        #[test]
        fn emitted_motion_lands_exactly(
            fx in 0u16..80, fy in 0u16..24,
            tx in 0u16..80, ty in 0u16..24,
        ) {
            let opt = CursorOptimizer::new(&xterm_caps(), 80, 24);
            let out = opt.move_to(Some((fx, fy)), (tx, ty));
            prop_assert_eq!(apply(&out, (fx, fy), 80, 24), (tx, ty));
        }

        #[test]
        fn absolute_motion_lands_exactly(tx in 0u16..80, ty in 0u16..24) {
            let opt = CursorOptimizer::new(&xterm_caps(), 80, 24);
            let out = opt.move_to(None, (tx, ty));
            prop_assert_eq!(apply(&out, (40, 12), 80, 24), (tx, ty));
        }
    }
}
