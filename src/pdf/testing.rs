//! In-memory [`PdfBackend`] for unit tests.
//!
//! Pages are RGBA canvases at one pixel per point, addressed in document
//! coordinates (origin bottom-left), so tests can check what was painted where.

use super::backend::{DocumentEditor, DocumentInfo, PdfBackend, RenderedPage, TextStyle};
use crate::annotation::placement::png_fixture;
use crate::annotation::{Rect, Size};
use crate::error::{Error, Result};
use image::{DynamicImage, RgbaImage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct RecordingBackend {
    page_sizes: Vec<Size>,
    calls: AtomicUsize,
    saved: AtomicUsize,
    draws: Mutex<Vec<(u32, Rect)>>,
    canvases: Mutex<Vec<RgbaImage>>,
}

struct RecordingEditor<'a> {
    page_sizes: &'a [Size],
    canvases: Vec<RgbaImage>,
    draws: Vec<(u32, Rect)>,
}

impl RecordingBackend {
    pub(crate) fn new(page_sizes: Vec<Size>) -> Self {
        Self {
            page_sizes,
            calls: AtomicUsize::new(0),
            saved: AtomicUsize::new(0),
            draws: Mutex::new(Vec::new()),
            canvases: Mutex::new(Vec::new()),
        }
    }

    /// US Letter pages
    pub(crate) fn letter(pages: usize) -> Self {
        Self::new(vec![Size::new(612.0, 792.0); pages])
    }

    /// Number of backend calls of any kind
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of successfully serialized copies
    pub(crate) fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }

    /// Draw calls of the last successful export, in order
    pub(crate) fn draws(&self) -> Vec<(u32, Rect)> {
        self.draws.lock().clone()
    }

    /// Pixel at document point `(x, y)` of the last successful export
    pub(crate) fn pixel(&self, page: u32, x: u32, y: u32) -> Option<[u8; 4]> {
        let canvases = self.canvases.lock();
        let canvas = canvases.get(page as usize - 1)?;
        canvas.get_pixel_checked(x, y).map(|p| p.0)
    }

    fn blank_canvases(&self) -> Vec<RgbaImage> {
        self.page_sizes
            .iter()
            .map(|s| RgbaImage::new(s.width as u32, s.height as u32))
            .collect()
    }

    fn check(&self, data: &[u8]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !data.starts_with(b"%PDF") || data.windows(7).any(|w| w == b"corrupt") {
            return Err(Error::InvalidPdf {
                reason: "unreadable test document".to_string(),
            });
        }
        Ok(())
    }
}

impl DocumentEditor for RecordingEditor<'_> {
    fn page_count(&self) -> u32 {
        self.page_sizes.len() as u32
    }

    fn page_size(&self, page: u32) -> Result<Size> {
        self.page_sizes
            .get(page as usize - 1)
            .copied()
            .ok_or(Error::PageOutOfBounds {
                page,
                total: self.page_count(),
            })
    }

    fn draw_image(&mut self, page: u32, image: &DynamicImage, rect: &Rect) -> Result<()> {
        let source = image.to_rgba8();
        let canvas = &mut self.canvases[page as usize - 1];

        let x0 = rect.x.round().max(0.0) as u32;
        let y0 = rect.y.round().max(0.0) as u32;
        let x1 = ((rect.x + rect.width).round() as u32).min(canvas.width());
        let y1 = ((rect.y + rect.height).round() as u32).min(canvas.height());

        for y in y0..y1 {
            for x in x0..x1 {
                let sx = ((x - x0) * source.width() / (x1 - x0).max(1)).min(source.width() - 1);
                let sy = ((y - y0) * source.height() / (y1 - y0).max(1)).min(source.height() - 1);
                canvas.put_pixel(x, y, *source.get_pixel(sx, sy));
            }
        }

        self.draws.push((page, *rect));
        Ok(())
    }
}

impl PdfBackend for RecordingBackend {
    fn inspect(&self, data: &[u8], _password: Option<&str>) -> Result<DocumentInfo> {
        self.check(data)?;
        Ok(DocumentInfo {
            page_count: self.page_sizes.len() as u32,
            page_sizes: self.page_sizes.clone(),
        })
    }

    fn render_page(
        &self,
        data: &[u8],
        _password: Option<&str>,
        page: u32,
        target_width: u16,
    ) -> Result<RenderedPage> {
        self.check(data)?;
        let size = self
            .page_sizes
            .get(page.max(1) as usize - 1)
            .filter(|_| page >= 1)
            .ok_or(Error::PageOutOfBounds {
                page,
                total: self.page_sizes.len() as u32,
            })?;
        let shown = size.fit_width(target_width as f64);
        Ok(RenderedPage {
            page,
            width: target_width as u32,
            height: shown.height.round() as u32,
            png: png_fixture(1, 1, [255, 255, 255, 255]),
        })
    }

    fn edit_copy(
        &self,
        data: &[u8],
        _password: Option<&str>,
        edit: &mut dyn FnMut(&mut dyn DocumentEditor) -> Result<()>,
    ) -> Result<Vec<u8>> {
        self.check(data)?;
        let mut editor = RecordingEditor {
            page_sizes: &self.page_sizes,
            canvases: self.blank_canvases(),
            draws: Vec::new(),
        };
        edit(&mut editor)?;

        let bytes = format!(
            "%PDF-recorded pages={} draws={:?}",
            self.page_sizes.len(),
            editor.draws
        )
        .into_bytes();

        *self.draws.lock() = editor.draws;
        *self.canvases.lock() = editor.canvases;
        self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(bytes)
    }

    fn render_text(&self, text: &str, _style: TextStyle, font_size: f32) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let padding = (font_size * 0.5).max(20.0);
        let width = (text.chars().count() as f32 * font_size * 0.5 + padding * 2.0).max(200.0);
        let height = (font_size + padding * 2.0).max(60.0);
        Ok(png_fixture(width as u32, height as u32, [0, 0, 0, 255]))
    }
}
