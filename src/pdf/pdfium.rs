//! PDFium implementation of [`PdfBackend`]

use super::backend::{DocumentEditor, DocumentInfo, PdfBackend, RenderedPage, TextStyle};
use super::qpdf::QpdfWrapper;
use crate::annotation::{Rect, Size};
use crate::error::{Error, Result};
use image::DynamicImage;
use pdfium_render::prelude::*;

/// Smallest canvas a text stamp is rasterized on, in points
const MIN_TEXT_CANVAS: (f32, f32) = (200.0, 60.0);

/// Get PDFium instance (creates new instance each time - PDFium is not thread-safe)
fn create_pdfium() -> Result<Pdfium> {
    // Try to bind to system library or use static linking
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

fn map_pdfium_error(err: PdfiumError) -> Error {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            Error::PasswordRequired
        }
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FormatError) => {
            Error::InvalidPdf {
                reason: "Malformed PDF".to_string(),
            }
        }
        _ => Error::Pdfium {
            reason: format!("{}", err),
        },
    }
}

fn check_header(data: &[u8]) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }
    Ok(())
}

/// PDF engine backed by the PDFium shared library
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumBackend;

impl PdfiumBackend {
    pub fn new() -> Self {
        Self
    }

    /// True when the PDFium shared library can be bound
    pub fn is_available() -> bool {
        create_pdfium().is_ok()
    }
}

/// One document copy opened for drawing
pub struct PdfiumEditor<'a> {
    document: PdfDocument<'a>,
    page_count: u32,
}

impl<'a> PdfiumEditor<'a> {
    fn new(document: PdfDocument<'a>) -> Self {
        let page_count = document.pages().len() as u32;
        Self {
            document,
            page_count,
        }
    }

    fn page(&self, page: u32) -> Result<PdfPage<'a>> {
        if page < 1 || page > self.page_count {
            return Err(Error::PageOutOfBounds {
                page,
                total: self.page_count,
            });
        }
        self.document
            .pages()
            .get((page - 1) as u16)
            .map_err(|e| Error::Pdfium {
                reason: format!("Failed to get page {}: {}", page, e),
            })
    }

    fn save(&self) -> Result<Vec<u8>> {
        self.document.save_to_bytes().map_err(|e| Error::Pdfium {
            reason: format!("Failed to save signed PDF: {}", e),
        })
    }
}

impl DocumentEditor for PdfiumEditor<'_> {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self, page: u32) -> Result<Size> {
        let page = self.page(page)?;
        Ok(Size::new(
            page.width().value as f64,
            page.height().value as f64,
        ))
    }

    fn draw_image(&mut self, page_number: u32, image: &DynamicImage, rect: &Rect) -> Result<()> {
        let mut page = self.page(page_number)?;
        page.objects_mut()
            .create_image_object(
                PdfPoints::new(rect.x as f32),
                PdfPoints::new(rect.y as f32),
                image,
                Some(PdfPoints::new(rect.width as f32)),
                Some(PdfPoints::new(rect.height as f32)),
            )
            .map_err(|e| Error::Pdfium {
                reason: format!("Failed to draw image on page {}: {}", page_number, e),
            })?;
        Ok(())
    }
}

impl PdfBackend for PdfiumBackend {
    fn inspect(&self, data: &[u8], password: Option<&str>) -> Result<DocumentInfo> {
        check_header(data)?;

        let pdfium = create_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(data, password)
            .map_err(map_pdfium_error)?;

        let page_sizes: Vec<Size> = document
            .pages()
            .iter()
            .map(|page| Size::new(page.width().value as f64, page.height().value as f64))
            .collect();

        if page_sizes.is_empty() {
            return Err(Error::InvalidPdf {
                reason: "PDF has no pages".to_string(),
            });
        }

        Ok(DocumentInfo {
            page_count: page_sizes.len() as u32,
            page_sizes,
        })
    }

    fn render_page(
        &self,
        data: &[u8],
        password: Option<&str>,
        page_num: u32,
        target_width: u16,
    ) -> Result<RenderedPage> {
        check_header(data)?;

        let pdfium = create_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(data, password)
            .map_err(map_pdfium_error)?;

        let pages = document.pages();
        let page_count = pages.len() as u32;
        if page_num < 1 || page_num > page_count {
            return Err(Error::PageOutOfBounds {
                page: page_num,
                total: page_count,
            });
        }

        let page = pages.get((page_num - 1) as u16).map_err(|e| Error::Pdfium {
            reason: format!("Failed to get page {}: {}", page_num, e),
        })?;

        let config = PdfRenderConfig::new()
            .set_target_width(target_width as i32)
            .render_form_data(true)
            .render_annotations(true);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| Error::Pdfium {
                reason: format!("Failed to render page {}: {}", page_num, e),
            })?;

        let dynamic_image = bitmap.as_image();
        let width = dynamic_image.width();
        let height = dynamic_image.height();

        Ok(RenderedPage {
            page: page_num,
            width,
            height,
            png: encode_png(&dynamic_image)?,
        })
    }

    fn edit_copy(
        &self,
        data: &[u8],
        password: Option<&str>,
        edit: &mut dyn FnMut(&mut dyn DocumentEditor) -> Result<()>,
    ) -> Result<Vec<u8>> {
        check_header(data)?;

        let copy = QpdfWrapper::reload(data, password)?;

        let pdfium = create_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&copy, None)
            .map_err(map_pdfium_error)?;

        let mut editor = PdfiumEditor::new(document);
        edit(&mut editor)?;
        editor.save()
    }

    fn render_text(&self, text: &str, style: TextStyle, font_size: f32) -> Result<Vec<u8>> {
        let pdfium = create_pdfium()?;
        let mut document = pdfium.create_new_pdf().map_err(map_pdfium_error)?;
        let font = font_for(&mut document, style);
        let size = PdfPoints::new(font_size);

        // Measure on a scratch page first; the canvas depends on the text width
        let text_width = {
            let mut scratch = document
                .pages_mut()
                .create_page_at_end(PdfPagePaperSize::Custom(
                    PdfPoints::new(font_size * text.chars().count().max(1) as f32 * 2.0),
                    PdfPoints::new(font_size * 4.0),
                ))
                .map_err(map_pdfium_error)?;
            let object = scratch
                .objects_mut()
                .create_text_object(PdfPoints::ZERO, PdfPoints::ZERO, text, font, size)
                .map_err(map_pdfium_error)?;
            object.width().map_err(map_pdfium_error)?.value
        };

        let padding = (font_size * 0.5).max(20.0);
        let canvas_width = (text_width + padding * 2.0).max(MIN_TEXT_CANVAS.0).ceil();
        let canvas_height = (font_size + padding * 2.0).max(MIN_TEXT_CANVAS.1).ceil();

        let mut page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(
                PdfPoints::new(canvas_width),
                PdfPoints::new(canvas_height),
            ))
            .map_err(map_pdfium_error)?;

        // Baseline placed so the glyph box sits around the vertical middle
        let x = (canvas_width - text_width) / 2.0;
        let y = (canvas_height - font_size * 0.7) / 2.0;
        page.objects_mut()
            .create_text_object(PdfPoints::new(x), PdfPoints::new(y), text, font, size)
            .map_err(map_pdfium_error)?;

        let config = PdfRenderConfig::new()
            .set_target_width(canvas_width as i32)
            .set_clear_color(PdfColor::new(255, 255, 255, 0));

        let bitmap = page.render_with_config(&config).map_err(|e| Error::Pdfium {
            reason: format!("Failed to render text stamp: {}", e),
        })?;

        encode_png(&bitmap.as_image())
    }
}

fn font_for(document: &mut PdfDocument, style: TextStyle) -> PdfFontToken {
    let fonts = document.fonts_mut();
    match style {
        TextStyle::Signature => fonts.times_italic(),
        TextStyle::Elegant => fonts.times_bold_italic(),
        TextStyle::Professional => fonts.times_roman(),
        TextStyle::Modern => fonts.helvetica(),
        TextStyle::Handwritten => fonts.courier_oblique(),
    }
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    image
        .write_to(
            &mut std::io::Cursor::new(&mut png_bytes),
            image::ImageFormat::Png,
        )
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to encode PNG: {}", e),
        })?;
    Ok(png_bytes)
}
