//! Interfaces to the PDF rendering and mutation engine

use crate::annotation::{Rect, Size};
use crate::error::Result;
use image::DynamicImage;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Page count and native page sizes of a parsed document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub page_count: u32,
    /// Native size of each page in points, index 0 is page 1
    pub page_sizes: Vec<Size>,
}

impl DocumentInfo {
    /// Native size of a 1-indexed page
    pub fn page_size(&self, page: u32) -> Option<Size> {
        if page == 0 {
            return None;
        }
        self.page_sizes.get(page as usize - 1).copied()
    }
}

/// A page rasterized for display
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Page number (1-indexed)
    pub page: u32,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// PNG image data
    pub png: Vec<u8>,
}

/// Font style used to rasterize typed signatures and text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    /// Flowing italic, the default for typed signatures
    #[default]
    Signature,
    Elegant,
    /// Plain serif, used for free text
    Professional,
    Modern,
    Handwritten,
}

/// Mutable view of one in-memory document copy.
///
/// Pages are 1-indexed. Rectangles are in document space (points, origin
/// bottom-left).
pub trait DocumentEditor {
    fn page_count(&self) -> u32;

    fn page_size(&self, page: u32) -> Result<Size>;

    /// Draw `image` into `page`, stretched to fill `rect`
    fn draw_image(&mut self, page: u32, image: &DynamicImage, rect: &Rect) -> Result<()>;
}

/// PDF engine used by the session and export pipeline
pub trait PdfBackend: Send + Sync {
    /// Parse `data` and report its pages
    fn inspect(&self, data: &[u8], password: Option<&str>) -> Result<DocumentInfo>;

    /// Rasterize one 1-indexed page at `target_width` pixels
    fn render_page(
        &self,
        data: &[u8],
        password: Option<&str>,
        page: u32,
        target_width: u16,
    ) -> Result<RenderedPage>;

    /// Reload a private copy of `data`, let `edit` mutate it, and serialize the
    /// result. The input bytes are never modified.
    fn edit_copy(
        &self,
        data: &[u8],
        password: Option<&str>,
        edit: &mut dyn FnMut(&mut dyn DocumentEditor) -> Result<()>,
    ) -> Result<Vec<u8>>;

    /// Rasterize `text` as a transparent PNG
    fn render_text(&self, text: &str, style: TextStyle, font_size: f32) -> Result<Vec<u8>>;
}
