//! The signing session: one controller that owns the loaded document, its
//! annotations, and the displayed page sizes.
//!
//! All state changes go through methods on [`SigningSession`]. Rendering and
//! export only ever see borrowed or copied views of it.

use crate::annotation::{
    decode_image_metadata, initial_size, page_overlays, Annotation, AnnotationId, AnnotationKind,
    AnnotationStore, DisplaySurface, DisplayedPages, ImageMetadata, Overlay, Rect, ResizeHandle,
    Size, VerificationRecord, ViewportProfile,
};
use crate::error::{Error, Result};
use crate::export::ExportJob;
use crate::pdf::{DocumentInfo, PdfBackend, RenderedPage, TextStyle};
use crate::source::{validate_upload, ByteCache, CacheLease};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Font size for typed signatures, in points
pub const TYPED_SIGNATURE_FONT_SIZE: f32 = 36.0;
/// Allowed font sizes for free text
pub const TEXT_FONT_SIZES: RangeInclusive<f32> = 16.0..=60.0;
pub const DEFAULT_TEXT_FONT_SIZE: f32 = 24.0;

/// Tunables for a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Width pages are assumed to be displayed at until a render or report says otherwise
    pub display_width: f64,
    pub max_display_width: f64,
    /// Pixel budget for annotation images
    pub max_image_pixels: u64,
    /// Name shown in cosmetic verification records
    pub verifier_name: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            display_width: 600.0,
            max_display_width: 800.0,
            max_image_pixels: 25_000_000,
            verifier_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// The document currently open in a session
#[derive(Debug)]
pub struct LoadedDocument {
    pub name: String,
    pub data: Arc<Vec<u8>>,
    pub password: Option<String>,
    pub info: DocumentInfo,
    lease: CacheLease,
}

impl LoadedDocument {
    /// Cache key the document bytes are reachable under while loaded
    pub fn cache_key(&self) -> &str {
        self.lease.key()
    }
}

/// Where a new annotation goes
#[derive(Debug, Clone, Default)]
pub struct Placement {
    /// Target page, defaults to the selected page
    pub page: Option<u32>,
    /// Top-left corner in displayed pixels, defaults to the profile origin
    pub position: Option<(f64, f64)>,
    pub profile: ViewportProfile,
    /// Attach a cosmetic verification record
    pub verified: bool,
}

/// What to rasterize for a text annotation
#[derive(Debug, Clone, Copy)]
pub enum TextRequest {
    TypedSignature { style: TextStyle },
    Text { font_size: Option<f32> },
}

impl TextRequest {
    fn resolve(self) -> (AnnotationKind, TextStyle, f32) {
        match self {
            TextRequest::TypedSignature { style } => {
                (AnnotationKind::TypedSignature, style, TYPED_SIGNATURE_FONT_SIZE)
            }
            TextRequest::Text { font_size } => {
                let size = font_size
                    .filter(|s| s.is_finite())
                    .unwrap_or(DEFAULT_TEXT_FONT_SIZE)
                    .clamp(*TEXT_FONT_SIZES.start(), *TEXT_FONT_SIZES.end());
                (AnnotationKind::Text, TextStyle::Professional, size)
            }
        }
    }
}

/// Held while an export runs. Dropping it reopens the gate.
#[derive(Debug)]
pub struct ExportPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for ExportPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

pub struct SigningSession {
    backend: Arc<dyn PdfBackend>,
    cache: Arc<ByteCache>,
    settings: SessionSettings,
    document: Option<LoadedDocument>,
    store: AnnotationStore,
    surface: DisplayedPages,
    selected_page: u32,
    exporting: Arc<AtomicBool>,
}

impl SigningSession {
    pub fn new(backend: Arc<dyn PdfBackend>, cache: Arc<ByteCache>, settings: SessionSettings) -> Self {
        Self {
            backend,
            cache,
            settings,
            document: None,
            store: AnnotationStore::new(0),
            surface: DisplayedPages::new(),
            selected_page: 1,
            exporting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn backend(&self) -> Arc<dyn PdfBackend> {
        Arc::clone(&self.backend)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn document(&self) -> Option<&LoadedDocument> {
        self.document.as_ref()
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn surface(&self) -> &DisplayedPages {
        &self.surface
    }

    pub fn selected_page(&self) -> u32 {
        self.selected_page
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting.load(Ordering::Acquire)
    }

    /// Validate and parse a document, then make it the session's document.
    ///
    /// On success the annotations are cleared and page 1 is selected. On any
    /// failure the session is left exactly as it was.
    pub fn load_document(
        &mut self,
        name: impl Into<String>,
        mime_type: Option<&str>,
        data: Arc<Vec<u8>>,
        password: Option<String>,
    ) -> Result<&LoadedDocument> {
        let name = name.into();
        validate_upload(&name, mime_type, &data)?;

        let info = self.backend.inspect(&data, password.as_deref())?;
        if info.page_count == 0 {
            return Err(Error::InvalidPdf {
                reason: "PDF has no pages".to_string(),
            });
        }

        let lease = self.cache.lease(Arc::clone(&data));
        let display_width = self.display_width(None);

        tracing::info!(
            name = %name,
            pages = info.page_count,
            bytes = data.len(),
            "document loaded"
        );

        self.surface = DisplayedPages::fit_width(&info.page_sizes, display_width);
        self.store = AnnotationStore::new(info.page_count);
        self.selected_page = 1;
        // Replacing the document drops the previous lease
        let document = self.document.insert(LoadedDocument {
            name,
            data,
            password,
            info,
            lease,
        });
        Ok(document)
    }

    /// Close the document and discard every annotation.
    pub fn reset(&mut self) {
        if let Some(document) = self.document.take() {
            tracing::info!(name = %document.name, "session reset");
        }
        self.store = AnnotationStore::new(0);
        self.surface.clear();
        self.selected_page = 1;
    }

    pub fn select_page(&mut self, page: u32) -> Result<u32> {
        self.check_page(page)?;
        self.selected_page = page;
        Ok(page)
    }

    /// Record the pixel size `page` is currently displayed at.
    pub fn report_displayed_size(&mut self, page: u32, size: Size) -> Result<()> {
        self.check_page(page)?;
        if !size.is_usable() {
            return Err(Error::InvalidGeometry {
                reason: format!("displayed size {}x{} is not usable", size.width, size.height),
            });
        }
        self.surface.report(page, size);
        Ok(())
    }

    /// Rasterize a page for display and remember the size it was shown at.
    pub fn render_page(&mut self, page: u32, width: Option<u32>) -> Result<RenderedPage> {
        self.check_page(page)?;
        let target = self.display_width(width).round() as u16;
        let document = self.loaded()?;
        let rendered =
            self.backend
                .render_page(&document.data, document.password.as_deref(), page, target)?;

        self.surface
            .report(page, Size::new(rendered.width as f64, rendered.height as f64));
        Ok(rendered)
    }

    /// Displayed size of `page`, or its native size when none was reported
    pub fn container_size(&self, page: u32) -> Result<Size> {
        self.check_page(page)?;
        if let Some(size) = self.surface.displayed_size(page) {
            return Ok(size);
        }
        self.loaded()?
            .info
            .page_size(page)
            .ok_or(Error::PageOutOfBounds {
                page,
                total: self.store.page_count(),
            })
    }

    /// Commit an image whose metadata has already been decoded.
    pub fn add_image_annotation(
        &mut self,
        kind: AnnotationKind,
        image: Arc<[u8]>,
        metadata: ImageMetadata,
        placement: &Placement,
    ) -> Result<&Annotation> {
        self.loaded()?;
        let page = placement.page.unwrap_or(self.selected_page);
        self.check_page(page)?;

        let size = initial_size(metadata, placement.profile);
        let (x, y) = placement
            .position
            .unwrap_or_else(|| placement.profile.default_origin());
        let verification = placement
            .verified
            .then(|| VerificationRecord::cosmetic(&self.settings.verifier_name));

        let id = self.store.next_id();
        self.store.add(Annotation {
            id,
            kind,
            image,
            bounds: Rect::new(x, y, size.width, size.height),
            page_number: page,
            verification,
        })?;

        tracing::info!(%id, page, ?kind, "annotation added");
        self.store.get(id).ok_or(Error::AnnotationNotFound { id: id.0 })
    }

    /// Decode the image header, then commit it.
    pub fn add_image_bytes(
        &mut self,
        kind: AnnotationKind,
        image: Vec<u8>,
        placement: &Placement,
    ) -> Result<&Annotation> {
        let metadata = decode_image_metadata(&image, self.settings.max_image_pixels)?;
        self.add_image_annotation(kind, Arc::from(image), metadata, placement)
    }

    /// Rasterize `text` and commit it as an annotation.
    pub fn add_text_annotation(
        &mut self,
        text: &str,
        request: TextRequest,
        placement: &Placement,
    ) -> Result<&Annotation> {
        self.loaded()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyText);
        }

        let (kind, style, font_size) = request.resolve();
        let png = self.backend.render_text(text, style, font_size)?;
        self.add_image_bytes(kind, png, placement)
    }

    /// Finish a drag. The final position is kept inside the page.
    pub fn move_annotation(&mut self, id: AnnotationId, x: f64, y: f64) -> Result<&Annotation> {
        let bounds = self.overlay(id)?.drag_to(x, y)?;
        self.store.update_position(id, bounds.x, bounds.y)
    }

    /// Finish a resize reported through `handle`.
    pub fn resize_annotation(
        &mut self,
        id: AnnotationId,
        handle: ResizeHandle,
        proposed: Rect,
    ) -> Result<&Annotation> {
        let bounds = self.overlay(id)?.resize_to(handle, proposed)?;
        self.store.update_geometry(id, bounds)
    }

    /// Remove an annotation. Returns whether anything was removed.
    pub fn delete_annotation(&mut self, id: AnnotationId) -> bool {
        let removed = self.store.remove(id).is_some();
        if removed {
            tracing::info!(%id, "annotation deleted");
        }
        removed
    }

    /// Annotations on `page`, or all of them, in insertion order
    pub fn annotations(&self, page: Option<u32>) -> Vec<&Annotation> {
        match page {
            Some(page) => self.store.list_by_page(page),
            None => self.store.iter().collect(),
        }
    }

    pub fn overlays(&self, page: u32) -> Result<Vec<Overlay>> {
        let container = self.container_size(page)?;
        Ok(page_overlays(&self.store, page, container))
    }

    /// Snapshot everything an export needs and close the export gate.
    ///
    /// Fails without side effects when no document is loaded, when there are
    /// no annotations, or when another export still holds its permit.
    pub fn begin_export(&self) -> Result<(ExportPermit, ExportJob)> {
        let document = self.loaded()?;
        if self.store.is_empty() {
            return Err(Error::NoAnnotations);
        }

        if self
            .exporting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("export requested while another is running");
            return Err(Error::ExportInProgress);
        }
        let permit = ExportPermit {
            busy: Arc::clone(&self.exporting),
        };

        let job = ExportJob::new(
            Arc::clone(&document.data),
            document.password.clone(),
            document.name.clone(),
            self.store.snapshot(),
            self.surface.clone(),
        )?;
        Ok((permit, job))
    }

    fn loaded(&self) -> Result<&LoadedDocument> {
        self.document.as_ref().ok_or(Error::NoDocumentLoaded)
    }

    fn check_page(&self, page: u32) -> Result<()> {
        let total = self.loaded()?.info.page_count;
        if page < 1 || page > total {
            return Err(Error::PageOutOfBounds { page, total });
        }
        Ok(())
    }

    fn overlay(&self, id: AnnotationId) -> Result<Overlay> {
        let annotation = self
            .store
            .get(id)
            .ok_or(Error::AnnotationNotFound { id: id.0 })?;
        let container = self.container_size(annotation.page_number)?;
        Ok(Overlay::new(annotation, container))
    }

    fn display_width(&self, requested: Option<u32>) -> f64 {
        let width = requested
            .map(f64::from)
            .unwrap_or(self.settings.display_width);
        let max = self
            .settings
            .max_display_width
            .min(u16::MAX as f64)
            .max(1.0);
        if width.is_finite() {
            width.clamp(1.0, max)
        } else {
            max
        }
    }
}

impl std::fmt::Debug for SigningSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningSession")
            .field("document", &self.document.as_ref().map(|d| &d.name))
            .field("annotations", &self.store.len())
            .field("selected_page", &self.selected_page)
            .field("exporting", &self.is_exporting())
            .finish()
    }
}
