#![forbid(unsafe_code)]

//! Compositor: areas, z-order, occlusion, and the virtual terminal.
//!
//! The compositor owns the global frame buffer (vterm), the desktop base
//! surface beneath every window, and an arena of window areas with a
//! z-ordered stack. Compositing copies an area's dirty cells into the
//! vterm unless a higher layer covers them; restoring recomputes the
//! topmost visible content for a rectangle after an area is destroyed,
//! hidden, or reordered.
//!
//! # Invariants
//!
//! - Coverage precedence, highest first: status bar, menu bar, window
//!   stack top to bottom, desktop.
//! - The always-on-top entries form a contiguous suffix of the stack.
//! - Operations on a stale [`AreaId`] are no-ops.
//! - After compositing, the source area's dirty ranges are clean; the
//!   vterm's dirty ranges cover exactly the cells that changed.
//!
//! Shadow zones never copy their own content. They darken whatever the
//! composite already shows beneath them.

use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::area::{Area, Rect};
use crate::cell::Cell;

slotmap::new_key_type! {
    /// Generation-checked handle to an [`Area`] in the compositor arena.
    pub struct AreaId;
}

/// How a higher layer covers one global cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    /// No higher layer touches the cell.
    None,
    /// Only a shadow extension lies over the cell.
    Shadow,
    /// A higher layer's content covers the cell.
    Full,
}

/// The virtual terminal, the desktop, and the window stack.
pub struct Compositor {
    vterm: Area,
    desktop: Area,
    areas: SlotMap<AreaId, Area>,
    /// Z-order, later entries higher. The last `on_top` entries are the
    /// always-on-top suffix.
    stack: Vec<AreaId>,
    on_top: usize,
    menu_bar: Option<AreaId>,
    status_bar: Option<AreaId>,
}

impl Compositor {
    /// Build a compositor for a terminal of the given size. The vterm and
    /// the desktop both span it entirely.
    pub fn new(columns: u16, rows: u16) -> Self {
        Self {
            vterm: Area::new(Rect::new(0, 0, columns, rows), 0, 0),
            desktop: Area::new(Rect::new(0, 0, columns, rows), 0, 0),
            areas: SlotMap::with_key(),
            stack: Vec::new(),
            on_top: 0,
            menu_bar: None,
            status_bar: None,
        }
    }

    /// The global composite buffer.
    #[inline]
    pub fn vterm(&self) -> &Area {
        &self.vterm
    }

    /// Mutable access to the composite, used by the flush step to clear
    /// dirty ranges after presenting.
    #[inline]
    pub fn vterm_mut(&mut self) -> &mut Area {
        &mut self.vterm
    }

    /// The desktop base surface.
    #[inline]
    pub fn desktop(&self) -> &Area {
        &self.desktop
    }

    /// Mutable access to the desktop surface.
    pub fn desktop_mut(&mut self) -> &mut Area {
        &mut self.desktop
    }

    /// Allocate a window area and push it on top of the normal stack
    /// segment (below any always-on-top windows).
    pub fn create_area(&mut self, rect: Rect, shadow_w: u16, shadow_h: u16) -> AreaId {
        let id = self.areas.insert(Area::new(rect, shadow_w, shadow_h));
        let boundary = self.stack.len() - self.on_top;
        self.stack.insert(boundary, id);
        vtc_core::trace!(?rect, "area created");
        id
    }

    /// Shared access to an area. `None` for a stale handle.
    pub fn area(&self, id: AreaId) -> Option<&Area> {
        self.areas.get(id)
    }

    /// Mutable access to an area. `None` for a stale handle.
    pub fn area_mut(&mut self, id: AreaId) -> Option<&mut Area> {
        self.areas.get_mut(id)
    }

    /// Number of live areas.
    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    /// Promote an area to the menu-bar slot. It leaves the window stack
    /// and composites above every window.
    pub fn set_menu_bar(&mut self, id: AreaId) {
        if self.areas.contains_key(id) {
            self.remove_from_stack(id);
            self.menu_bar = Some(id);
        }
    }

    /// Promote an area to the status-bar slot, above everything else.
    pub fn set_status_bar(&mut self, id: AreaId) {
        if self.areas.contains_key(id) {
            self.remove_from_stack(id);
            self.status_bar = Some(id);
        }
    }

    fn remove_from_stack(&mut self, id: AreaId) {
        if let Some(pos) = self.stack.iter().position(|&e| e == id) {
            self.stack.remove(pos);
            if pos >= self.stack.len() + 1 - self.on_top {
                self.on_top -= 1;
            }
        }
        if self.menu_bar == Some(id) {
            self.menu_bar = None;
        }
        if self.status_bar == Some(id) {
            self.status_bar = None;
        }
    }

    /// Destroy an area: reconcile the composite beneath its footprint,
    /// then drop it. Stale handles are a no-op.
    pub fn destroy(&mut self, id: AreaId) {
        let Some(area) = self.areas.get(id) else {
            return;
        };
        let footprint = area.footprint();
        self.remove_from_stack(id);
        self.areas.remove(id);
        self.restore(footprint);
        vtc_core::trace!(?footprint, "area destroyed");
    }

    /// Show or hide an area, reconciling the composite either way.
    pub fn set_area_visible(&mut self, id: AreaId, visible: bool) {
        let Some(area) = self.areas.get_mut(id) else {
            return;
        };
        if area.is_visible() == visible {
            return;
        }
        area.set_visible(visible);
        let footprint = area.footprint();
        if visible {
            area.mark_all_dirty();
            self.composite(id);
        } else {
            self.restore(footprint);
        }
    }

    /// Move an area to the top of its stack segment.
    pub fn raise(&mut self, id: AreaId) {
        let Some(pos) = self.stack.iter().position(|&e| e == id) else {
            return;
        };
        let boundary = self.stack.len() - self.on_top;
        self.stack.remove(pos);
        if pos >= boundary {
            self.stack.push(id);
        } else {
            self.stack.insert(boundary - 1, id);
        }
        self.reconcile_footprint(id);
    }

    /// Move an area to the bottom of its stack segment.
    pub fn lower(&mut self, id: AreaId) {
        let Some(pos) = self.stack.iter().position(|&e| e == id) else {
            return;
        };
        let boundary = self.stack.len() - self.on_top;
        self.stack.remove(pos);
        if pos >= boundary {
            self.stack.insert(self.stack.len() + 1 - self.on_top, id);
        } else {
            self.stack.insert(0, id);
        }
        self.reconcile_footprint(id);
    }

    /// Move an area between the normal segment and the always-on-top
    /// suffix, keeping the suffix contiguous.
    pub fn set_always_on_top(&mut self, id: AreaId, on_top: bool) {
        let Some(pos) = self.stack.iter().position(|&e| e == id) else {
            return;
        };
        let boundary = self.stack.len() - self.on_top;
        let currently = pos >= boundary;
        if currently == on_top {
            return;
        }
        self.stack.remove(pos);
        if on_top {
            self.stack.push(id);
            self.on_top += 1;
        } else {
            self.on_top -= 1;
            let boundary = self.stack.len() - self.on_top;
            self.stack.insert(boundary, id);
        }
        self.reconcile_footprint(id);
    }

    /// True when the area sits in the always-on-top suffix.
    pub fn is_always_on_top(&self, id: AreaId) -> bool {
        self.stack
            .iter()
            .position(|&e| e == id)
            .is_some_and(|pos| pos >= self.stack.len() - self.on_top)
    }

    fn reconcile_footprint(&mut self, id: AreaId) {
        if let Some(area) = self.areas.get(id) {
            let footprint = area.footprint();
            self.restore(footprint);
        }
    }

    /// Resize the virtual terminal after a physical resize. Everything is
    /// recomposited from scratch; the vterm ends fully dirty.
    pub fn resize_vterm(&mut self, columns: u16, rows: u16) {
        self.vterm.resize(columns, rows);
        self.desktop.resize(columns, rows);
        self.restore(Rect::new(0, 0, columns, rows));
        self.vterm.mark_all_dirty();
        vtc_core::debug!(columns, rows, "vterm resized");
    }

    /// Copy an area's dirty, non-occluded cells into the vterm and clear
    /// the area's dirty ranges. Hidden areas and stale handles are no-ops.
    pub fn composite(&mut self, id: AreaId) {
        let covers = self.covering_rects_above(id);
        let Some(area) = self.areas.get_mut(id) else {
            return;
        };
        if !area.is_visible() {
            return;
        }
        let rect = area.rect();
        let rows: SmallVec<[(u16, u16, u16); 32]> = area.dirty_rows().collect();
        for (y, xmin, xmax) in rows {
            let gy = rect.y + y as i32;
            for x in xmin..=xmax {
                let gx = rect.x + x as i32;
                if !self.vterm.rect().contains(gx, gy) {
                    continue;
                }
                let coverage = coverage_at(&covers, gx, gy);
                if coverage == Coverage::Full {
                    continue;
                }
                let (gx, gy) = (gx as u16, gy as u16);
                let cell = if area.in_shadow_zone(x, y) {
                    match self.vterm.cell(gx, gy) {
                        Some(under) => under.shadowed(),
                        None => continue,
                    }
                } else {
                    let mut cell = match area.cell(x, y) {
                        Some(c) => *c,
                        None => continue,
                    };
                    if coverage == Coverage::Shadow {
                        cell = cell.shadowed();
                    }
                    cell
                };
                self.vterm.write_cell(gx, gy, cell);
            }
            area.clear_dirty_row(y);
        }
    }

    /// Composite every visible layer's dirty cells, bottom to top.
    pub fn composite_all(&mut self) {
        let order: SmallVec<[AreaId; 16]> = self
            .stack
            .iter()
            .copied()
            .chain(self.menu_bar)
            .chain(self.status_bar)
            .collect();
        self.composite_desktop();
        for id in order {
            self.composite(id);
        }
    }

    /// Copy the desktop's dirty cells into the vterm where no window
    /// covers them.
    pub fn composite_desktop(&mut self) {
        let covers = self.covering_rects_above_desktop();
        let rows: SmallVec<[(u16, u16, u16); 32]> = self.desktop.dirty_rows().collect();
        for (y, xmin, xmax) in rows {
            for x in xmin..=xmax {
                let (gx, gy) = (x as i32, y as i32);
                if !self.vterm.rect().contains(gx, gy) {
                    continue;
                }
                let coverage = coverage_at(&covers, gx, gy);
                if coverage == Coverage::Full {
                    continue;
                }
                let Some(mut cell) = self.desktop.cell(x, y).copied() else {
                    continue;
                };
                if coverage == Coverage::Shadow {
                    cell = cell.shadowed();
                }
                self.vterm.write_cell(x, y, cell);
            }
            self.desktop.clear_dirty_row(y);
        }
    }

    /// Recompute the topmost visible content for every cell of a global
    /// rectangle. Used after destroy, hide, move, or reorder.
    pub fn restore(&mut self, rect: Rect) {
        let Some(rect) = rect.intersect(&self.vterm.rect()) else {
            return;
        };
        for gy in rect.y..rect.bottom() {
            for gx in rect.x..rect.right() {
                let cell = self.topmost_visible(gx, gy);
                self.vterm.write_cell(gx as u16, gy as u16, cell);
            }
        }
    }

    /// The cell the composite must show at one global position.
    fn topmost_visible(&self, gx: i32, gy: i32) -> Cell {
        let mut shade = false;
        for id in self.precedence_order() {
            let Some(area) = self.areas.get(id) else {
                continue;
            };
            if !area.is_visible() {
                continue;
            }
            let rect = area.rect();
            if rect.contains(gx, gy) {
                let (lx, ly) = ((gx - rect.x) as u16, (gy - rect.y) as u16);
                let mut cell = area.cell(lx, ly).copied().unwrap_or(Cell::BLANK);
                if shade {
                    cell = cell.shadowed();
                }
                return cell;
            }
            if area.footprint().contains(gx, gy) {
                shade = true;
            }
        }
        let mut cell = self
            .desktop
            .cell(gx as u16, gy as u16)
            .copied()
            .unwrap_or(Cell::BLANK);
        if shade {
            cell = cell.shadowed();
        }
        cell
    }

    /// Layer handles in coverage precedence order, highest first.
    fn precedence_order(&self) -> impl Iterator<Item = AreaId> + '_ {
        self.status_bar
            .into_iter()
            .chain(self.menu_bar)
            .chain(self.stack.iter().rev().copied())
    }

    /// Content and footprint rectangles of every visible layer above the
    /// given one.
    fn covering_rects_above(&self, id: AreaId) -> SmallVec<[(Rect, Rect); 8]> {
        let mut covers = SmallVec::new();
        if self.status_bar == Some(id) {
            return covers;
        }
        self.push_cover(&mut covers, self.status_bar);
        if self.menu_bar == Some(id) {
            return covers;
        }
        self.push_cover(&mut covers, self.menu_bar);
        if let Some(pos) = self.stack.iter().position(|&e| e == id) {
            for &above in &self.stack[pos + 1..] {
                self.push_cover(&mut covers, Some(above));
            }
        }
        covers
    }

    fn covering_rects_above_desktop(&self) -> SmallVec<[(Rect, Rect); 8]> {
        let mut covers = SmallVec::new();
        self.push_cover(&mut covers, self.status_bar);
        self.push_cover(&mut covers, self.menu_bar);
        for &above in self.stack.iter().rev() {
            self.push_cover(&mut covers, Some(above));
        }
        covers
    }

    fn push_cover(&self, covers: &mut SmallVec<[(Rect, Rect); 8]>, id: Option<AreaId>) {
        if let Some(area) = id.and_then(|i| self.areas.get(i)) {
            if area.is_visible() {
                covers.push((area.rect(), area.footprint()));
            }
        }
    }
}

/// Coverage of one global cell by a precomputed list of higher layers.
fn coverage_at(covers: &[(Rect, Rect)], gx: i32, gy: i32) -> Coverage {
    let mut shadow = false;
    for (content, footprint) in covers {
        if content.contains(gx, gy) {
            return Coverage::Full;
        }
        if footprint.contains(gx, gy) {
            shadow = true;
        }
    }
    if shadow { Coverage::Shadow } else { Coverage::None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{DEFAULT_COLOR, StyleFlags};

    fn cell(ch: char) -> Cell {
        Cell::from_char(ch)
    }

    fn vterm_char(comp: &Compositor, x: u16, y: u16) -> char {
        comp.vterm().cell(x, y).unwrap().ch
    }

    #[test]
    fn composite_copies_dirty_cells() {
        let mut comp = Compositor::new(20, 10);
        let id = comp.create_area(Rect::new(2, 3, 5, 2), 0, 0);
        comp.area_mut(id).unwrap().write_cell(0, 0, cell('A'));
        comp.area_mut(id).unwrap().write_cell(4, 1, cell('B'));
        comp.composite(id);
        assert_eq!(vterm_char(&comp, 2, 3), 'A');
        assert_eq!(vterm_char(&comp, 6, 4), 'B');
        assert!(comp.area(id).unwrap().is_clean());
        // the vterm's dirty range covers exactly the changed cells
        assert_eq!(comp.vterm().dirty_range(3).unwrap().span(), Some((2, 2)));
        assert_eq!(comp.vterm().dirty_range(4).unwrap().span(), Some((6, 6)));
    }

    #[test]
    fn higher_area_occludes_lower() {
        let mut comp = Compositor::new(20, 10);
        let low = comp.create_area(Rect::new(5, 5, 1, 1), 0, 0);
        let high = comp.create_area(Rect::new(5, 5, 1, 1), 0, 0);
        comp.area_mut(high).unwrap().write_cell(0, 0, cell('Y'));
        comp.composite(high);
        comp.area_mut(low).unwrap().write_cell(0, 0, cell('X'));
        comp.composite(low);
        // the covered cell keeps the higher area's content
        assert_eq!(vterm_char(&comp, 5, 5), 'Y');
    }

    #[test]
    fn occlusion_then_restore_scenario() {
        let mut comp = Compositor::new(20, 10);
        let low = comp.create_area(Rect::new(5, 5, 1, 1), 0, 0);
        comp.area_mut(low).unwrap().write_cell(0, 0, cell('X'));
        comp.composite(low);
        assert_eq!(vterm_char(&comp, 5, 5), 'X');

        let high = comp.create_area(Rect::new(5, 5, 1, 1), 0, 0);
        comp.area_mut(high).unwrap().write_cell(0, 0, cell('Y'));
        comp.composite(high);
        assert_eq!(vterm_char(&comp, 5, 5), 'Y');

        comp.destroy(high);
        assert_eq!(vterm_char(&comp, 5, 5), 'X');
    }

    #[test]
    fn stale_handles_are_noops() {
        let mut comp = Compositor::new(10, 10);
        let id = comp.create_area(Rect::new(0, 0, 2, 2), 0, 0);
        comp.destroy(id);
        assert!(comp.area(id).is_none());
        comp.composite(id);
        comp.destroy(id);
        comp.raise(id);
        comp.lower(id);
        comp.set_always_on_top(id, true);
        comp.set_area_visible(id, false);
        assert_eq!(comp.area_count(), 0);
    }

    #[test]
    fn status_bar_covers_everything() {
        let mut comp = Compositor::new(20, 10);
        let bar = comp.create_area(Rect::new(0, 9, 20, 1), 0, 0);
        comp.set_status_bar(bar);
        comp.area_mut(bar).unwrap().write_run(0, 0, "status", Cell::BLANK);
        comp.composite(bar);

        let win = comp.create_area(Rect::new(0, 9, 20, 1), 0, 0);
        comp.area_mut(win).unwrap().write_run(0, 0, "window", Cell::BLANK);
        comp.composite(win);
        // the later window never paints over the status bar
        assert_eq!(vterm_char(&comp, 0, 9), 's');
    }

    #[test]
    fn raise_changes_topmost() {
        let mut comp = Compositor::new(20, 10);
        let a = comp.create_area(Rect::new(3, 3, 2, 2), 0, 0);
        let b = comp.create_area(Rect::new(3, 3, 2, 2), 0, 0);
        comp.area_mut(a).unwrap().fill(cell('a'));
        comp.area_mut(b).unwrap().fill(cell('b'));
        comp.composite(a);
        comp.composite(b);
        assert_eq!(vterm_char(&comp, 3, 3), 'b');
        comp.raise(a);
        assert_eq!(vterm_char(&comp, 3, 3), 'a');
        comp.lower(a);
        assert_eq!(vterm_char(&comp, 3, 3), 'b');
    }

    #[test]
    fn always_on_top_suffix_stays_contiguous() {
        let mut comp = Compositor::new(20, 10);
        let a = comp.create_area(Rect::new(0, 0, 1, 1), 0, 0);
        let b = comp.create_area(Rect::new(0, 0, 1, 1), 0, 0);
        let c = comp.create_area(Rect::new(0, 0, 1, 1), 0, 0);
        comp.set_always_on_top(a, true);
        assert!(comp.is_always_on_top(a));
        assert!(!comp.is_always_on_top(b));
        // a new window lands below the on-top suffix
        let d = comp.create_area(Rect::new(0, 0, 1, 1), 0, 0);
        assert!(!comp.is_always_on_top(d));
        assert!(comp.is_always_on_top(a));
        // raising a normal window keeps it below the suffix
        comp.raise(b);
        assert!(!comp.is_always_on_top(b));
        assert!(comp.is_always_on_top(a));
        comp.set_always_on_top(a, false);
        assert!(!comp.is_always_on_top(a));
        let _ = c;
    }

    #[test]
    fn hide_restores_underlying_content() {
        let mut comp = Compositor::new(20, 10);
        comp.desktop_mut().fill(cell('.'));
        comp.composite_desktop();
        let win = comp.create_area(Rect::new(4, 4, 3, 1), 0, 0);
        comp.area_mut(win).unwrap().fill(cell('#'));
        comp.composite(win);
        assert_eq!(vterm_char(&comp, 4, 4), '#');
        comp.set_area_visible(win, false);
        assert_eq!(vterm_char(&comp, 4, 4), '.');
        comp.set_area_visible(win, true);
        assert_eq!(vterm_char(&comp, 4, 4), '#');
    }

    #[test]
    fn shadow_darkens_underlying_composite() {
        let mut comp = Compositor::new(20, 10);
        comp.desktop_mut()
            .fill(Cell::new('.', 15, DEFAULT_COLOR, StyleFlags::empty()));
        comp.composite_desktop();
        let win = comp.create_area(Rect::new(2, 2, 3, 2), 1, 1);
        comp.area_mut(win).unwrap().fill(cell('#'));
        comp.area_mut(win).unwrap().mark_all_dirty();
        comp.composite(win);
        // content copied as-is
        assert_eq!(vterm_char(&comp, 2, 2), '#');
        // shadow column keeps the underlying glyph, darkened
        let shadow = comp.vterm().cell(5, 2).unwrap();
        assert_eq!(shadow.ch, '.');
        assert_eq!(shadow.fg, 7);
        assert!(shadow.attrs.contains(StyleFlags::DIM));
        // destroying the window restores the bright desktop
        comp.destroy(win);
        assert_eq!(comp.vterm().cell(5, 2).unwrap().fg, 15);
    }

    #[test]
    fn resize_marks_everything_dirty() {
        let mut comp = Compositor::new(10, 5);
        comp.resize_vterm(12, 6);
        assert_eq!(comp.vterm().rect(), Rect::new(0, 0, 12, 6));
        for y in 0..6 {
            assert_eq!(comp.vterm().dirty_range(y).unwrap().span(), Some((0, 11)));
        }
    }

    #[test]
    fn off_screen_cells_are_clipped() {
        let mut comp = Compositor::new(10, 5);
        let win = comp.create_area(Rect::new(8, 3, 5, 5), 0, 0);
        comp.area_mut(win).unwrap().fill(cell('w'));
        comp.composite(win);
        assert_eq!(vterm_char(&comp, 9, 4), 'w');
        // nothing outside the vterm, nothing panicked
        assert_eq!(comp.vterm().cell(10, 4), None);
    }
}
