//! Per-page displayed dimensions reported by the rendering side.

use super::geometry::Size;
use std::collections::HashMap;

/// Source of the pixel size at which each page is currently displayed.
///
/// Pages are 1-indexed. `None` means the page has no known displayed size and
/// callers must fall back to identity scale.
pub trait DisplaySurface {
    fn displayed_size(&self, page: u32) -> Option<Size>;
}

/// Displayed page sizes as reported by renders or explicit client reports.
#[derive(Debug, Clone, Default)]
pub struct DisplayedPages {
    sizes: HashMap<u32, Size>,
}

impl DisplayedPages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every page with its native size scaled to `display_width`.
    pub fn fit_width(page_sizes: &[Size], display_width: f64) -> Self {
        let sizes = page_sizes
            .iter()
            .enumerate()
            .map(|(i, size)| (i as u32 + 1, size.fit_width(display_width)))
            .collect();
        Self { sizes }
    }

    /// Record the size a page is displayed at. Unusable sizes forget the page.
    pub fn report(&mut self, page: u32, size: Size) {
        if size.is_usable() {
            self.sizes.insert(page, size);
        } else {
            self.sizes.remove(&page);
        }
    }

    pub fn clear(&mut self) {
        self.sizes.clear();
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

impl DisplaySurface for DisplayedPages {
    fn displayed_size(&self, page: u32) -> Option<Size> {
        self.sizes.get(&page).copied()
    }
}
