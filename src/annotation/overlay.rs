//! Interactive overlay model for annotations on a displayed page.
//!
//! An overlay is the draggable, resizable box drawn over a rendered page. The
//! client reports where a drag or resize ended; the overlay bounds that report
//! to the page container before it reaches the store.

use super::geometry::{Rect, Size};
use super::store::{Annotation, AnnotationId, AnnotationStore, MIN_ANNOTATION_SIZE};
use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Edge or corner a resize gesture was made from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResizeHandle {
    Top,
    Right,
    Bottom,
    Left,
    TopRight,
    BottomRight,
    BottomLeft,
    TopLeft,
}

impl fmt::Display for ResizeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResizeHandle::Top => "top",
            ResizeHandle::Right => "right",
            ResizeHandle::Bottom => "bottom",
            ResizeHandle::Left => "left",
            ResizeHandle::TopRight => "top_right",
            ResizeHandle::BottomRight => "bottom_right",
            ResizeHandle::BottomLeft => "bottom_left",
            ResizeHandle::TopLeft => "top_left",
        };
        f.write_str(name)
    }
}

/// Which handles accept resize gestures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResizeHandles {
    pub top: bool,
    pub right: bool,
    pub bottom: bool,
    pub left: bool,
    pub top_right: bool,
    pub bottom_right: bool,
    pub bottom_left: bool,
    pub top_left: bool,
}

impl ResizeHandles {
    /// Left and top edges stay anchored; only the right and bottom sides move.
    pub const ANNOTATION: ResizeHandles = ResizeHandles {
        top: false,
        right: true,
        bottom: true,
        left: false,
        top_right: true,
        bottom_right: true,
        bottom_left: false,
        top_left: false,
    };

    pub fn allows(&self, handle: ResizeHandle) -> bool {
        match handle {
            ResizeHandle::Top => self.top,
            ResizeHandle::Right => self.right,
            ResizeHandle::Bottom => self.bottom,
            ResizeHandle::Left => self.left,
            ResizeHandle::TopRight => self.top_right,
            ResizeHandle::BottomRight => self.bottom_right,
            ResizeHandle::BottomLeft => self.bottom_left,
            ResizeHandle::TopLeft => self.top_left,
        }
    }
}

/// An annotation as presented over its page
#[derive(Debug, Clone, Serialize)]
pub struct Overlay {
    pub id: AnnotationId,
    pub page: u32,
    pub bounds: Rect,
    /// Displayed size of the parent page
    pub container: Size,
    pub handles: ResizeHandles,
    pub min_size: Size,
}

impl Overlay {
    pub fn new(annotation: &Annotation, container: Size) -> Self {
        Self {
            id: annotation.id,
            page: annotation.page_number,
            bounds: annotation.bounds,
            container,
            handles: ResizeHandles::ANNOTATION,
            min_size: MIN_ANNOTATION_SIZE,
        }
    }

    /// Final bounds after a drag ending at `(x, y)`. Size is unchanged and the
    /// box stays inside the container.
    pub fn drag_to(&self, x: f64, y: f64) -> Result<Rect> {
        check_finite(&[x, y])?;
        let width = self.bounds.width;
        let height = self.bounds.height;
        Ok(Rect::new(
            bound(x, 0.0, self.container.width - width),
            bound(y, 0.0, self.container.height - height),
            width,
            height,
        ))
    }

    /// Final bounds after a resize from `handle` that proposed `proposed`.
    ///
    /// Only the edges the handle drags follow the proposal: the left edge
    /// never moves, and the top edge moves only for `top_right`, which keeps
    /// the bottom edge in place instead.
    pub fn resize_to(&self, handle: ResizeHandle, proposed: Rect) -> Result<Rect> {
        if !self.handles.allows(handle) {
            return Err(Error::ResizeHandleDisabled {
                handle: handle.to_string(),
            });
        }
        check_finite(&[proposed.x, proposed.y, proposed.width, proposed.height])?;

        let current = self.bounds;
        let (width, height) = match handle {
            ResizeHandle::Right => (proposed.width, current.height),
            ResizeHandle::Bottom => (current.width, proposed.height),
            _ => (proposed.width, proposed.height),
        };

        let x = bound(current.x, 0.0, self.container.width - self.min_size.width);
        let width = bound(width, self.min_size.width, self.container.width - x);

        let (y, height) = if handle == ResizeHandle::TopRight {
            let bottom = bound(
                current.y + current.height,
                self.min_size.height,
                self.container.height,
            );
            let height = bound(height, self.min_size.height, bottom);
            (bottom - height, height)
        } else {
            let y = bound(current.y, 0.0, self.container.height - self.min_size.height);
            (y, bound(height, self.min_size.height, self.container.height - y))
        };

        Ok(Rect::new(x, y, width, height))
    }
}

/// Overlays for every annotation on `page`, in insertion order
pub fn page_overlays(store: &AnnotationStore, page: u32, container: Size) -> Vec<Overlay> {
    store
        .list_by_page(page)
        .into_iter()
        .map(|a| Overlay::new(a, container))
        .collect()
}

/// Clamp into `[lo, hi]`, preferring `lo` when the range is empty.
fn bound(value: f64, lo: f64, hi: f64) -> f64 {
    if hi < lo {
        lo
    } else {
        value.clamp(lo, hi)
    }
}

fn check_finite(values: &[f64]) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(Error::InvalidGeometry {
            reason: format!("{:?} contains a non-finite value", values),
        })
    }
}
