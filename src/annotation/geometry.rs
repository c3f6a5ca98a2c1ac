//! Mapping between displayed page pixels and PDF document points.
//!
//! Displayed space has its origin at the top-left corner of the rendered page
//! with y growing downward. Document space has its origin at the bottom-left
//! corner of the page with y growing upward. The horizontal and vertical scale
//! factors are independent:
//!
//! ```text
//! scale_x = page_width / displayed_width
//! scale_y = page_height / displayed_height
//! doc_y   = page_height - y * scale_y - height * scale_y
//! ```

use serde::Serialize;

/// Width and height, in pixels or points depending on the space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// True when both dimensions are finite and strictly positive.
    pub fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// Size of a page rendered at `target_width`, preserving aspect ratio.
    pub fn fit_width(&self, target_width: f64) -> Size {
        if self.width <= 0.0 {
            return Size::new(target_width, 0.0);
        }
        Size::new(target_width, self.height * target_width / self.width)
    }
}

/// Axis-aligned rectangle given by its origin corner and size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Independent horizontal and vertical scale factors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    pub const IDENTITY: Scale = Scale { x: 1.0, y: 1.0 };

    /// Scale from displayed pixels to document points.
    ///
    /// Returns `None` when the displayed size is unusable (zero or non-finite),
    /// in which case callers fall back to [`Scale::IDENTITY`].
    pub fn between(displayed: Size, page: Size) -> Option<Scale> {
        if !displayed.is_usable() {
            return None;
        }
        Some(Scale {
            x: page.width / displayed.width,
            y: page.height / displayed.height,
        })
    }
}

/// Map a displayed rectangle (top-left origin, pixels) into document space
/// (bottom-left origin, points).
///
/// When `displayed` is `None` or unusable the displayed size is taken to be the
/// page size itself, so only the y-axis flip is applied.
pub fn to_document(rect: &Rect, displayed: Option<Size>, page: Size) -> Rect {
    let scale = displayed
        .and_then(|d| Scale::between(d, page))
        .unwrap_or(Scale::IDENTITY);

    let x = rect.x * scale.x;
    let y = rect.y * scale.y;
    let width = rect.width * scale.x;
    let height = rect.height * scale.y;

    Rect::new(x, page.height - y - height, width, height)
}

/// Inverse of [`to_document`]: map a document rectangle back to displayed
/// pixels on a page shown at `displayed`.
pub fn to_display(rect: &Rect, displayed: Option<Size>, page: Size) -> Rect {
    let scale = displayed
        .and_then(|d| Scale::between(d, page))
        .unwrap_or(Scale::IDENTITY);

    let top = page.height - rect.y - rect.height;

    Rect::new(
        rect.x / scale.x,
        top / scale.y,
        rect.width / scale.x,
        rect.height / scale.y,
    )
}
