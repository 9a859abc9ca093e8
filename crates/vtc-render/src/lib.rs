#![forbid(unsafe_code)]

//! Render kernel: cells, areas, compositing, and optimized terminal output.

pub mod area;
pub mod attrs;
pub mod cell;
pub mod compositor;
pub mod optimove;
pub mod presenter;

pub use area::{Area, DirtyRange, Rect};
pub use attrs::AttrOptimizer;
pub use cell::{Cell, DEFAULT_COLOR, StyleFlags};
pub use compositor::{AreaId, Compositor};
pub use optimove::CursorOptimizer;
pub use presenter::Presenter;
