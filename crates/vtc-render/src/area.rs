#![forbid(unsafe_code)]

//! Areas: rectangular cell buffers with per-row dirty ranges.
//!
//! An `Area` is the off-screen buffer behind one window-like entity. It
//! tracks, per row, the minimum and maximum column changed since the last
//! reconciliation so compositing touches only what moved.
//!
//! # Invariants
//!
//! - A write that stores a cell equal to the existing one never marks the
//!   row dirty.
//! - After any content-changing write, the row's dirty range contains the
//!   written column.
//! - The clean sentinel is `xmin > xmax`; [`DirtyRange::CLEAN`] is the
//!   canonical form.

use crate::cell::Cell;

/// Per-row dirty extent, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRange {
    /// Leftmost changed column.
    pub xmin: u16,
    /// Rightmost changed column.
    pub xmax: u16,
}

impl DirtyRange {
    /// The empty range: no change on this row.
    pub const CLEAN: Self = Self {
        xmin: u16::MAX,
        xmax: 0,
    };

    /// True when nothing on the row changed.
    #[inline]
    pub const fn is_clean(&self) -> bool {
        self.xmin > self.xmax
    }

    /// Widen the range to include `x`.
    #[inline]
    pub fn mark(&mut self, x: u16) {
        if x < self.xmin {
            self.xmin = x;
        }
        if x > self.xmax {
            self.xmax = x;
        }
    }

    /// Widen the range to include `[a, b]` (inclusive).
    pub fn mark_span(&mut self, a: u16, b: u16) {
        debug_assert!(a <= b);
        self.mark(a);
        self.mark(b);
    }

    /// The full-row range for a row of `width` columns.
    pub const fn full(width: u16) -> Self {
        if width == 0 {
            Self::CLEAN
        } else {
            Self {
                xmin: 0,
                xmax: width - 1,
            }
        }
    }

    /// The inclusive column span, or `None` when clean.
    pub fn span(&self) -> Option<(u16, u16)> {
        if self.is_clean() {
            None
        } else {
            Some((self.xmin, self.xmax))
        }
    }
}

impl Default for DirtyRange {
    fn default() -> Self {
        Self::CLEAN
    }
}

/// A rectangle on the global (vterm) coordinate grid.
///
/// Positions are signed so windows may hang partially off-screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// One past the rightmost column.
    #[inline]
    pub const fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    /// One past the bottom row.
    #[inline]
    pub const fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    /// True when the global point lies inside the rectangle.
    #[inline]
    pub const fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// The overlapping rectangle, or `None` when disjoint.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if x < right && y < bottom {
            Some(Rect::new(x, y, (right - x) as u16, (bottom - y) as u16))
        } else {
            None
        }
    }

    /// The rectangle grown by a right/bottom shadow extension.
    pub fn with_shadow(&self, shadow_w: u16, shadow_h: u16) -> Rect {
        Rect::new(
            self.x,
            self.y,
            self.width.saturating_add(shadow_w),
            self.height.saturating_add(shadow_h),
        )
    }
}

/// A rectangular cell buffer with per-row dirty tracking.
///
/// The buffer spans the content rectangle plus the shadow extension; cells
/// in the shadow zone are never copied verbatim, the compositor darkens
/// whatever lies beneath them instead.
#[derive(Debug, Clone)]
pub struct Area {
    rect: Rect,
    shadow_w: u16,
    shadow_h: u16,
    visible: bool,
    cells: Vec<Cell>,
    dirty: Vec<DirtyRange>,
}

impl Area {
    /// Allocate an area, every cell blank, every row clean.
    pub fn new(rect: Rect, shadow_w: u16, shadow_h: u16) -> Self {
        let tw = rect.width.saturating_add(shadow_w) as usize;
        let th = rect.height.saturating_add(shadow_h) as usize;
        Self {
            rect,
            shadow_w,
            shadow_h,
            visible: true,
            cells: vec![Cell::BLANK; tw * th],
            dirty: vec![DirtyRange::CLEAN; th],
        }
    }

    /// The content rectangle in global coordinates (shadow excluded).
    #[inline]
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// The full footprint including the shadow extension.
    #[inline]
    pub fn footprint(&self) -> Rect {
        self.rect.with_shadow(self.shadow_w, self.shadow_h)
    }

    /// Buffer width including the shadow columns.
    #[inline]
    pub fn total_width(&self) -> u16 {
        self.rect.width.saturating_add(self.shadow_w)
    }

    /// Buffer height including the shadow rows.
    #[inline]
    pub fn total_height(&self) -> u16 {
        self.rect.height.saturating_add(self.shadow_h)
    }

    #[inline]
    pub fn shadow(&self) -> (u16, u16) {
        (self.shadow_w, self.shadow_h)
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// True when the local coordinate falls in the shadow extension.
    #[inline]
    pub fn in_shadow_zone(&self, x: u16, y: u16) -> bool {
        x >= self.rect.width || y >= self.rect.height
    }

    /// Move the area without touching its contents.
    pub fn set_position(&mut self, x: i32, y: i32) {
        self.rect.x = x;
        self.rect.y = y;
    }

    #[inline]
    fn index(&self, x: u16, y: u16) -> Option<usize> {
        if x < self.total_width() && y < self.total_height() {
            Some(y as usize * self.total_width() as usize + x as usize)
        } else {
            None
        }
    }

    /// The cell at local `(x, y)`, `None` out of bounds.
    pub fn cell(&self, x: u16, y: u16) -> Option<&Cell> {
        self.index(x, y).map(|i| &self.cells[i])
    }

    /// Store a cell at local `(x, y)`.
    ///
    /// Equal cells are a no-op; out-of-bounds writes are silently dropped.
    pub fn write_cell(&mut self, x: u16, y: u16, cell: Cell) {
        let Some(i) = self.index(x, y) else {
            return;
        };
        if self.cells[i] == cell {
            return;
        }
        self.cells[i] = cell;
        self.dirty[y as usize].mark(x);
    }

    /// Write a run of characters left to right with one style.
    ///
    /// Stops at the right edge of the buffer.
    pub fn write_run(&mut self, x: u16, y: u16, text: &str, template: Cell) {
        let mut col = x;
        for ch in text.chars() {
            if col >= self.total_width() {
                break;
            }
            let mut cell = template;
            cell.ch = ch;
            self.write_cell(col, y, cell);
            col += 1;
        }
    }

    /// Fill the whole content rectangle (shadow zone excluded).
    pub fn fill(&mut self, cell: Cell) {
        for y in 0..self.rect.height {
            for x in 0..self.rect.width {
                self.write_cell(x, y, cell);
            }
        }
    }

    /// The dirty range of a row, `None` out of bounds.
    pub fn dirty_range(&self, y: u16) -> Option<DirtyRange> {
        self.dirty.get(y as usize).copied()
    }

    /// Widen a row's dirty range to a given span.
    pub fn mark_dirty(&mut self, y: u16, xmin: u16, xmax: u16) {
        let max_x = self.total_width().saturating_sub(1);
        if let Some(range) = self.dirty.get_mut(y as usize) {
            if xmin <= xmax {
                range.mark_span(xmin, xmax.min(max_x));
            }
        }
    }

    /// Mark every row fully dirty.
    pub fn mark_all_dirty(&mut self) {
        let full = DirtyRange::full(self.total_width());
        for range in &mut self.dirty {
            *range = full;
        }
    }

    /// Clear one row's dirty range.
    pub fn clear_dirty_row(&mut self, y: u16) {
        if let Some(range) = self.dirty.get_mut(y as usize) {
            *range = DirtyRange::CLEAN;
        }
    }

    /// Clear every dirty range.
    pub fn clear_dirty(&mut self) {
        for range in &mut self.dirty {
            *range = DirtyRange::CLEAN;
        }
    }

    /// True when no row is dirty.
    pub fn is_clean(&self) -> bool {
        self.dirty.iter().all(DirtyRange::is_clean)
    }

    /// Rows with a non-empty dirty range, as `(row, xmin, xmax)`.
    pub fn dirty_rows(&self) -> impl Iterator<Item = (u16, u16, u16)> + '_ {
        self.dirty
            .iter()
            .enumerate()
            .filter_map(|(y, r)| r.span().map(|(a, b)| (y as u16, a, b)))
    }

    /// Resize the buffer, keeping the overlapping content.
    ///
    /// New cells are blank. Every row ends fully dirty, the only safe
    /// assumption after a reallocation.
    pub fn resize(&mut self, width: u16, height: u16) {
        if width == self.rect.width && height == self.rect.height {
            return;
        }
        let old_tw = self.total_width() as usize;
        let old = std::mem::take(&mut self.cells);
        let old_th = self.dirty.len();

        self.rect.width = width;
        self.rect.height = height;
        let tw = self.total_width() as usize;
        let th = self.total_height() as usize;

        self.cells = vec![Cell::BLANK; tw * th];
        for y in 0..th.min(old_th) {
            let copy = tw.min(old_tw);
            let src = y * old_tw;
            let dst = y * tw;
            self.cells[dst..dst + copy].copy_from_slice(&old[src..src + copy]);
        }
        self.dirty = vec![DirtyRange::full(self.total_width()); th];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::StyleFlags;

    fn area(w: u16, h: u16) -> Area {
        Area::new(Rect::new(0, 0, w, h), 0, 0)
    }

    #[test]
    fn new_area_is_blank_and_clean() {
        let a = area(4, 3);
        assert!(a.is_clean());
        assert_eq!(a.cell(3, 2), Some(&Cell::BLANK));
        assert_eq!(a.cell(4, 0), None);
    }

    #[test]
    fn write_marks_dirty_and_range_contains_column() {
        let mut a = area(10, 2);
        a.write_cell(7, 1, Cell::from_char('x'));
        let r = a.dirty_range(1).unwrap();
        assert_eq!(r.span(), Some((7, 7)));
        a.write_cell(2, 1, Cell::from_char('y'));
        assert_eq!(a.dirty_range(1).unwrap().span(), Some((2, 7)));
        assert!(a.dirty_range(0).unwrap().is_clean());
    }

    #[test]
    fn equal_write_is_a_noop() {
        let mut a = area(4, 1);
        a.write_cell(0, 0, Cell::BLANK);
        assert!(a.is_clean());
        a.write_cell(1, 0, Cell::from_char('z'));
        a.clear_dirty();
        a.write_cell(1, 0, Cell::from_char('z'));
        assert!(a.is_clean());
    }

    #[test]
    fn out_of_bounds_write_is_dropped() {
        let mut a = area(2, 2);
        a.write_cell(9, 9, Cell::from_char('x'));
        assert!(a.is_clean());
    }

    #[test]
    fn write_run_stops_at_edge() {
        let mut a = area(3, 1);
        a.write_run(1, 0, "abcdef", Cell::BLANK);
        assert_eq!(a.cell(1, 0).unwrap().ch, 'a');
        assert_eq!(a.cell(2, 0).unwrap().ch, 'b');
        assert_eq!(a.dirty_range(0).unwrap().span(), Some((1, 2)));
    }

    #[test]
    fn shadow_extends_footprint() {
        let a = Area::new(Rect::new(2, 3, 4, 2), 2, 1);
        assert_eq!(a.total_width(), 6);
        assert_eq!(a.total_height(), 3);
        assert_eq!(a.footprint(), Rect::new(2, 3, 6, 3));
        assert!(!a.in_shadow_zone(3, 1));
        assert!(a.in_shadow_zone(4, 0));
        assert!(a.in_shadow_zone(0, 2));
    }

    #[test]
    fn resize_is_full_dirty_and_keeps_overlap() {
        let mut a = area(4, 2);
        a.write_cell(1, 1, Cell::new('q', 2, 3, StyleFlags::BOLD));
        a.clear_dirty();
        a.resize(6, 3);
        assert_eq!(a.cell(1, 1).unwrap().ch, 'q');
        assert_eq!(a.cell(5, 2), Some(&Cell::BLANK));
        for y in 0..3 {
            assert_eq!(a.dirty_range(y).unwrap().span(), Some((0, 5)));
        }
    }

    #[test]
    fn rect_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(Rect::new(5, 5, 5, 5)));
        let c = Rect::new(20, 20, 1, 1);
        assert_eq!(a.intersect(&c), None);
        assert!(b.contains(5, 5));
        assert!(!b.contains(15, 5));
    }

    #[test]
    fn clean_sentinel() {
        let mut r = DirtyRange::CLEAN;
        assert!(r.is_clean());
        assert_eq!(r.span(), None);
        r.mark(3);
        assert_eq!(r.span(), Some((3, 3)));
        assert_eq!(DirtyRange::full(0), DirtyRange::CLEAN);
    }
}
