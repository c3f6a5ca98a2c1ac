//! MCP Server implementation using rmcp

use crate::annotation::{
    decode_image_metadata, Annotation, AnnotationId, AnnotationKind, Overlay, Rect, ResizeHandle,
    Size, VerificationRecord, ViewportProfile,
};
use crate::error::Error;
use crate::pdf::{PdfBackend, PdfiumBackend, TextStyle};
use crate::session::{Placement, SessionSettings, SigningSession, TextRequest};
use crate::source::{
    decode_image_base64, resolve_base64, resolve_cache, resolve_path, ByteCache, ResolvedPdf,
};
use anyhow::Result;
use base64::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// PDF source specification
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PdfSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the PDF file
        path: String,
    },
    /// Base64 encoded PDF data
    Base64 {
        /// Base64 encoded PDF content
        base64: String,
    },
    /// Reference to cached PDF
    CacheRef {
        /// Cache key from previous operation
        cache_key: String,
    },
}

impl<'de> serde::Deserialize<'de> for PdfSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;

        let Some(obj) = value.as_object() else {
            return Err(serde::de::Error::custom(format!(
                "Invalid source: expected an object with one of \"path\", \"base64\", or \"cache_key\", but got {}",
                match &value {
                    serde_json::Value::Array(_) => "an array",
                    serde_json::Value::String(_) => "a string",
                    serde_json::Value::Number(_) => "a number",
                    serde_json::Value::Bool(_) => "a boolean",
                    serde_json::Value::Null => "null",
                    _ => "unknown type",
                }
            )));
        };

        let field = |name: &str| -> std::result::Result<Option<String>, D::Error> {
            match obj.get(name) {
                None => Ok(None),
                Some(v) => v.as_str().map(|s| Some(s.to_string())).ok_or_else(|| {
                    serde::de::Error::custom(format!("\"{}\" must be a string", name))
                }),
            }
        };

        if let Some(path) = field("path")? {
            return Ok(PdfSource::Path { path });
        }
        if let Some(base64) = field("base64")? {
            return Ok(PdfSource::Base64 { base64 });
        }
        if let Some(cache_key) = field("cache_key")? {
            return Ok(PdfSource::CacheRef { cache_key });
        }

        let keys: Vec<&String> = obj.keys().collect();
        Err(serde::de::Error::custom(format!(
            "Invalid source: expected an object with one of \"path\", \"base64\", or \"cache_key\", but got keys: {:?}",
            keys
        )))
    }
}

/// Security and resource configuration for the signing server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directories PDFs may be read from and written to. Empty allows any path.
    pub resource_dirs: Vec<String>,
    /// Directory signed PDFs are written to when no output path is given
    pub output_dir: Option<String>,
    /// Width pages are displayed at by default, in pixels (default: 600)
    pub display_width: f64,
    /// Largest accepted display width, in pixels (default: 800)
    pub max_display_width: f64,
    /// Maximum pixel area of an annotation image (default: 25_000_000)
    pub max_image_pixels: u64,
    /// Maximum number of cache entries (default: 32)
    pub cache_max_entries: usize,
    /// Maximum total bytes in cache (default: 256MB)
    pub cache_max_bytes: usize,
    /// Name shown in cosmetic verification records
    pub verifier_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let session = SessionSettings::default();
        Self {
            resource_dirs: Vec::new(),
            output_dir: None,
            display_width: session.display_width,
            max_display_width: session.max_display_width,
            max_image_pixels: session.max_image_pixels,
            cache_max_entries: 32,
            cache_max_bytes: 256 * 1024 * 1024, // 256MB
            verifier_name: session.verifier_name,
        }
    }
}

impl ServerConfig {
    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            display_width: self.display_width,
            max_display_width: self.max_display_width,
            max_image_pixels: self.max_image_pixels,
            verifier_name: self.verifier_name.clone(),
        }
    }
}

/// PDF signing MCP Server
#[derive(Clone)]
pub struct PdfSignServer {
    session: Arc<Mutex<SigningSession>>,
    cache: Arc<ByteCache>,
    tool_router: ToolRouter<Self>,
    /// Server configuration
    config: Arc<ServerConfig>,
}

// ============================================================================
// Shared response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PageSizeInfo {
    /// Page number (1-indexed)
    pub page: u32,
    /// Native width in points
    pub width: f64,
    /// Native height in points
    pub height: f64,
    /// Width the page is displayed at, in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displayed_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displayed_height: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AnnotationInfo {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Size of the PNG payload in bytes
    pub image_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationRecord>,
}

impl From<&Annotation> for AnnotationInfo {
    fn from(annotation: &Annotation) -> Self {
        Self {
            id: annotation.id,
            kind: annotation.kind,
            page: annotation.page_number,
            x: annotation.bounds.x,
            y: annotation.bounds.y,
            width: annotation.bounds.width,
            height: annotation.bounds.height,
            image_bytes: annotation.image.len(),
            verification: annotation.verification.clone(),
        }
    }
}

/// Placement fields shared by the annotation tools
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct PlacementParams {
    /// Target page (1-indexed). Defaults to the selected page.
    #[serde(default)]
    pub page: Option<u32>,
    /// Left edge in displayed pixels. Must be given together with y.
    #[serde(default)]
    pub x: Option<f64>,
    /// Top edge in displayed pixels. Must be given together with x.
    #[serde(default)]
    pub y: Option<f64>,
    /// Screen class used for default size and position
    #[serde(default)]
    pub profile: ViewportProfile,
    /// Attach a decorative verification badge (not a cryptographic signature)
    #[serde(default)]
    pub verified: bool,
}

impl PlacementParams {
    fn to_placement(&self) -> crate::error::Result<Placement> {
        let position = match (self.x, self.y) {
            (Some(x), Some(y)) => Some((x, y)),
            (None, None) => None,
            _ => {
                return Err(Error::InvalidGeometry {
                    reason: "x and y must be given together".to_string(),
                })
            }
        };
        Ok(Placement {
            page: self.page,
            position,
            profile: self.profile,
            verified: self.verified,
        })
    }
}

// ============================================================================
// Request/Response types for open_pdf
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct OpenPdfParams {
    /// PDF source to load
    pub source: PdfSource,
    /// File name used for validation and the signed copy's name.
    /// Defaults to the path's file name, or "document.pdf".
    #[serde(default)]
    pub file_name: Option<String>,
    /// Declared MIME type; must be "application/pdf" when given
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OpenPdfResult {
    pub source: String,
    pub file_name: String,
    pub page_count: u32,
    /// Key the loaded document is cached under while it stays open
    pub cache_key: String,
    pub pages: Vec<PageSizeInfo>,
}

// ============================================================================
// Request/Response types for page display
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenderPageParams {
    /// Page number (1-indexed)
    pub page: u32,
    /// Target width in pixels (default: configured display width, capped at the maximum)
    #[serde(default)]
    pub width: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RenderPageResult {
    /// Page number (1-indexed)
    pub page: u32,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Base64-encoded PNG image data
    pub data_base64: String,
    /// MIME type (always "image/png")
    pub mime_type: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReportPageSizeParams {
    /// Page number (1-indexed)
    pub page: u32,
    /// Width the page is displayed at, in pixels
    pub width: f64,
    /// Height the page is displayed at, in pixels
    pub height: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SelectPageParams {
    /// Page number (1-indexed)
    pub page: u32,
}

#[derive(Debug, Serialize)]
pub struct SelectPageResult {
    pub selected_page: u32,
    pub page_count: u32,
}

// ============================================================================
// Request/Response types for annotation tools
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddImageAnnotationParams {
    /// Base64-encoded PNG, optionally as a data URL
    pub image_base64: String,
    #[serde(flatten)]
    pub placement: PlacementParams,
}

/// What a text annotation represents
#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    /// A name rendered in a signature font at 36pt
    #[default]
    TypedSignature,
    /// Free text in a plain font
    Text,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddTextAnnotationParams {
    /// Text to render
    pub text: String,
    #[serde(default)]
    pub kind: TextKind,
    /// Font style for typed signatures (default: signature)
    #[serde(default)]
    pub style: Option<TextStyle>,
    /// Font size for free text, 16 to 60 (default: 24)
    #[serde(default)]
    pub font_size: Option<f32>,
    #[serde(flatten)]
    pub placement: PlacementParams,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MoveAnnotationParams {
    /// Annotation id
    pub id: u64,
    /// New left edge in displayed pixels
    pub x: f64,
    /// New top edge in displayed pixels
    pub y: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResizeAnnotationParams {
    /// Annotation id
    pub id: u64,
    /// Handle the resize was made from (right, bottom, bottom_right or top_right)
    pub handle: ResizeHandle,
    /// Proposed left edge. The left edge stays fixed, so this is ignored.
    pub x: f64,
    /// Proposed top edge. Only a top_right resize moves the top edge.
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteAnnotationParams {
    /// Annotation id
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct DeleteAnnotationResult {
    pub id: AnnotationId,
    /// False when the annotation did not exist
    pub deleted: bool,
    pub remaining: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListAnnotationsParams {
    /// Only list annotations on this page, with their overlays
    #[serde(default)]
    pub page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListAnnotationsResult {
    pub selected_page: u32,
    pub page_count: u32,
    pub annotations: Vec<AnnotationInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<Overlay>,
}

// ============================================================================
// Request/Response types for export_pdf
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExportPdfParams {
    /// Where to write the signed PDF. Defaults to `<output_dir>/<name>_signed.pdf`
    /// when an output directory is configured.
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExportPdfResult {
    /// Suggested file name, `<name>_signed.pdf`
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub size_bytes: usize,
    pub drawn: usize,
    /// Annotations whose page no longer exists
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<AnnotationId>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ResetSessionParams {}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl PdfSignServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new PdfSignServer backed by PDFium
    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_backend(config, Arc::new(PdfiumBackend::new()))
    }

    /// Create a new PdfSignServer with a custom PDF engine
    pub fn with_backend(config: ServerConfig, backend: Arc<dyn PdfBackend>) -> Self {
        let cache = Arc::new(ByteCache::new(
            config.cache_max_entries,
            config.cache_max_bytes,
        ));
        let session = SigningSession::new(backend, Arc::clone(&cache), config.session_settings());
        Self {
            session: Arc::new(Mutex::new(session)),
            cache,
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    #[tool(
        description = "Load a PDF for signing. Replaces any open document and clears all annotations; on failure the current document stays open.

Returns page count and native page sizes with the displayed size each page is assumed to have.

Source format: one of {\"path\": \"/absolute/path.pdf\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn open_pdf(&self, Parameters(params): Parameters<OpenPdfParams>) -> String {
        Self::respond("open_pdf", self.process_open_pdf(&params).await)
    }

    #[tool(
        description = "Render a page of the open PDF as a PNG (base64). The rendered pixel size becomes the page's displayed size for placement and export."
    )]
    async fn render_page(&self, Parameters(params): Parameters<RenderPageParams>) -> String {
        Self::respond("render_page", self.process_render_page(&params).await)
    }

    #[tool(
        description = "Report the pixel size a page is displayed at by the client. Annotation coordinates on that page are interpreted relative to this size."
    )]
    async fn report_page_size(
        &self,
        Parameters(params): Parameters<ReportPageSizeParams>,
    ) -> String {
        Self::respond(
            "report_page_size",
            self.process_report_page_size(&params).await,
        )
    }

    #[tool(description = "Select the page new annotations are placed on by default.")]
    async fn select_page(&self, Parameters(params): Parameters<SelectPageParams>) -> String {
        Self::respond("select_page", self.process_select_page(&params).await)
    }

    #[tool(
        description = "Place a drawn signature image (PNG, base64) on a page. Large images are scaled down to fit 300x150 (desktop) or 200x100 (compact) and raised to at least 80x40.

Coordinates are displayed pixels with a top-left origin."
    )]
    async fn add_image_annotation(
        &self,
        Parameters(params): Parameters<AddImageAnnotationParams>,
    ) -> String {
        Self::respond(
            "add_image_annotation",
            self.process_add_image_annotation(&params).await,
        )
    }

    #[tool(
        description = "Render a typed signature or free text as an image and place it on a page.

Styles: signature, elegant, professional, modern, handwritten. Typed signatures use 36pt; free text uses 16-60pt (default 24)."
    )]
    async fn add_text_annotation(
        &self,
        Parameters(params): Parameters<AddTextAnnotationParams>,
    ) -> String {
        Self::respond(
            "add_text_annotation",
            self.process_add_text_annotation(&params).await,
        )
    }

    #[tool(
        description = "Move an annotation to a new top-left position. The annotation is kept inside its page."
    )]
    async fn move_annotation(
        &self,
        Parameters(params): Parameters<MoveAnnotationParams>,
    ) -> String {
        Self::respond("move_annotation", self.process_move_annotation(&params).await)
    }

    #[tool(
        description = "Resize an annotation from the right, bottom, bottom_right or top_right handle. Sizes below 50x20 are raised to 50x20."
    )]
    async fn resize_annotation(
        &self,
        Parameters(params): Parameters<ResizeAnnotationParams>,
    ) -> String {
        Self::respond(
            "resize_annotation",
            self.process_resize_annotation(&params).await,
        )
    }

    #[tool(description = "Delete an annotation. Deleting an unknown id is not an error.")]
    async fn delete_annotation(
        &self,
        Parameters(params): Parameters<DeleteAnnotationParams>,
    ) -> String {
        Self::respond(
            "delete_annotation",
            self.process_delete_annotation(&params).await,
        )
    }

    #[tool(
        description = "List annotations in insertion order, optionally for one page together with its interactive overlays."
    )]
    async fn list_annotations(
        &self,
        Parameters(params): Parameters<ListAnnotationsParams>,
    ) -> String {
        Self::respond(
            "list_annotations",
            self.process_list_annotations(&params).await,
        )
    }

    #[tool(
        description = "Export a copy of the open PDF with every annotation flattened into the pages as images. The original is never modified.

The result is cached (output_cache_key) and written to output_path, or to the configured output directory as <name>_signed.pdf. Only one export runs at a time."
    )]
    async fn export_pdf(&self, Parameters(params): Parameters<ExportPdfParams>) -> String {
        Self::respond("export_pdf", self.process_export_pdf(&params).await)
    }

    #[tool(description = "Close the open PDF and discard all annotations.")]
    async fn reset_session(&self, Parameters(_params): Parameters<ResetSessionParams>) -> String {
        self.session.lock().await.reset();
        Self::respond("reset_session", Ok(serde_json::json!({ "reset": true })))
    }
}

impl PdfSignServer {
    fn respond<T: Serialize>(tool: &str, result: crate::error::Result<T>) -> String {
        match result {
            Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(tool, error = %e, "tool failed");
                let response = serde_json::json!({ "error": e.client_message() });
                serde_json::to_string_pretty(&response).unwrap_or_default()
            }
        }
    }

    /// Name the document is known by: explicit name, else the path's file name
    fn document_name(source: &PdfSource, file_name: Option<&str>) -> String {
        if let Some(name) = file_name.filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        match source {
            PdfSource::Path { path } => Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document.pdf".to_string()),
            _ => "document.pdf".to_string(),
        }
    }

    fn resolve_source(&self, source: &PdfSource) -> crate::error::Result<ResolvedPdf> {
        match source {
            PdfSource::Path { path } => {
                self.validate_path_access(path)?;
                resolve_path(path)
            }
            PdfSource::Base64 { base64 } => resolve_base64(base64),
            PdfSource::CacheRef { cache_key } => resolve_cache(cache_key, &self.cache),
        }
    }

    /// Run `task` against the session on the blocking pool.
    async fn with_session<T, F>(&self, task: F) -> crate::error::Result<T>
    where
        F: FnOnce(&mut SigningSession) -> crate::error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = session.blocking_lock();
            task(&mut guard)
        })
        .await
        .map_err(join_error)?
    }

    /// Validate that a path is within allowed resource directories.
    /// If no resource_dirs are configured, all paths are allowed.
    fn validate_path_access(&self, path: &str) -> crate::error::Result<std::path::PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(std::path::PathBuf::from(path));
        }

        let canonical = std::fs::canonicalize(path).map_err(|_| Error::PathAccessDenied {
            path: path.to_string(),
        })?;

        for dir in &self.config.resource_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical.starts_with(&canonical_dir) {
                    return Ok(canonical);
                }
            }
        }

        Err(Error::PathAccessDenied {
            path: path.to_string(),
        })
    }

    /// Validate that an output path is within allowed resource directories.
    /// Canonicalizes the parent directory since the output file may not exist yet.
    fn validate_output_path_access(&self, path: &str) -> crate::error::Result<std::path::PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(std::path::PathBuf::from(path));
        }

        let path_obj = Path::new(path);
        let parent = path_obj.parent().unwrap_or(Path::new("."));

        let canonical_parent = std::fs::canonicalize(parent).map_err(|_| Error::PathAccessDenied {
            path: path.to_string(),
        })?;

        let canonical_target =
            canonical_parent.join(path_obj.file_name().unwrap_or(std::ffi::OsStr::new("")));

        for dir in &self.config.resource_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical_target.starts_with(&canonical_dir) {
                    return Ok(canonical_target);
                }
            }
        }

        Err(Error::PathAccessDenied {
            path: path.to_string(),
        })
    }

    /// Write output data to a file path, with sandbox validation.
    ///
    /// Bytes go to a sibling `.part` file that is renamed into place, so a
    /// failed write never leaves a truncated PDF at `path_str`.
    fn write_output(&self, path_str: &str, data: &[u8]) -> crate::error::Result<String> {
        self.validate_output_path_access(path_str)?;

        let path = Path::new(path_str);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = std::path::PathBuf::from(partial);

        if let Err(e) = std::fs::write(&partial, data).and_then(|_| std::fs::rename(&partial, path)) {
            let _ = std::fs::remove_file(&partial);
            return Err(Error::Io(e));
        }
        Ok(path_str.to_string())
    }

    fn page_infos(session: &SigningSession) -> Vec<PageSizeInfo> {
        use crate::annotation::DisplaySurface;

        let Some(document) = session.document() else {
            return Vec::new();
        };
        document
            .info
            .page_sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let page = i as u32 + 1;
                let shown = session.surface().displayed_size(page);
                PageSizeInfo {
                    page,
                    width: size.width,
                    height: size.height,
                    displayed_width: shown.map(|s| s.width),
                    displayed_height: shown.map(|s| s.height),
                }
            })
            .collect()
    }

    pub async fn process_open_pdf(
        &self,
        params: &OpenPdfParams,
    ) -> crate::error::Result<OpenPdfResult> {
        let resolved = self.resolve_source(&params.source)?;
        let source_name = resolved.source_name;
        let file_name = Self::document_name(&params.source, params.file_name.as_deref());
        let mime_type = params.mime_type.clone();
        let password = params.password.clone();
        let data = resolved.data;

        self.with_session(move |session| {
            let document =
                session.load_document(file_name, mime_type.as_deref(), data, password)?;
            let file_name = document.name.clone();
            let page_count = document.info.page_count;
            let cache_key = document.cache_key().to_string();

            Ok(OpenPdfResult {
                source: source_name,
                file_name,
                page_count,
                cache_key,
                pages: Self::page_infos(session),
            })
        })
        .await
    }

    pub async fn process_render_page(
        &self,
        params: &RenderPageParams,
    ) -> crate::error::Result<RenderPageResult> {
        let page = params.page;
        let width = params.width;

        let rendered = self
            .with_session(move |session| session.render_page(page, width))
            .await?;

        Ok(RenderPageResult {
            page: rendered.page,
            width: rendered.width,
            height: rendered.height,
            data_base64: base64::engine::general_purpose::STANDARD.encode(&rendered.png),
            mime_type: "image/png".to_string(),
        })
    }

    pub async fn process_report_page_size(
        &self,
        params: &ReportPageSizeParams,
    ) -> crate::error::Result<PageSizeInfo> {
        let mut session = self.session.lock().await;
        session.report_displayed_size(params.page, Size::new(params.width, params.height))?;

        Self::page_infos(&session)
            .into_iter()
            .find(|info| info.page == params.page)
            .ok_or(Error::NoDocumentLoaded)
    }

    pub async fn process_select_page(
        &self,
        params: &SelectPageParams,
    ) -> crate::error::Result<SelectPageResult> {
        let mut session = self.session.lock().await;
        let selected_page = session.select_page(params.page)?;
        Ok(SelectPageResult {
            selected_page,
            page_count: session.store().page_count(),
        })
    }

    pub async fn process_add_image_annotation(
        &self,
        params: &AddImageAnnotationParams,
    ) -> crate::error::Result<AnnotationInfo> {
        let placement = params.placement.to_placement()?;
        let image = decode_image_base64(&params.image_base64)?;
        let max_pixels = self.config.max_image_pixels;

        // Metadata is known before anything is committed
        let (image, metadata) = tokio::task::spawn_blocking(move || {
            let metadata = decode_image_metadata(&image, max_pixels)?;
            Ok::<_, Error>((image, metadata))
        })
        .await
        .map_err(join_error)??;

        let mut session = self.session.lock().await;
        let annotation = session.add_image_annotation(
            AnnotationKind::Drawn,
            Arc::from(image),
            metadata,
            &placement,
        )?;
        Ok(AnnotationInfo::from(annotation))
    }

    pub async fn process_add_text_annotation(
        &self,
        params: &AddTextAnnotationParams,
    ) -> crate::error::Result<AnnotationInfo> {
        let placement = params.placement.to_placement()?;
        let request = match params.kind {
            TextKind::TypedSignature => TextRequest::TypedSignature {
                style: params.style.unwrap_or_default(),
            },
            TextKind::Text => TextRequest::Text {
                font_size: params.font_size,
            },
        };
        let text = params.text.clone();

        self.with_session(move |session| {
            session
                .add_text_annotation(&text, request, &placement)
                .map(AnnotationInfo::from)
        })
        .await
    }

    pub async fn process_move_annotation(
        &self,
        params: &MoveAnnotationParams,
    ) -> crate::error::Result<AnnotationInfo> {
        let mut session = self.session.lock().await;
        session
            .move_annotation(AnnotationId(params.id), params.x, params.y)
            .map(AnnotationInfo::from)
    }

    pub async fn process_resize_annotation(
        &self,
        params: &ResizeAnnotationParams,
    ) -> crate::error::Result<AnnotationInfo> {
        let proposed = Rect::new(params.x, params.y, params.width, params.height);
        let mut session = self.session.lock().await;
        session
            .resize_annotation(AnnotationId(params.id), params.handle, proposed)
            .map(AnnotationInfo::from)
    }

    pub async fn process_delete_annotation(
        &self,
        params: &DeleteAnnotationParams,
    ) -> crate::error::Result<DeleteAnnotationResult> {
        let id = AnnotationId(params.id);
        let mut session = self.session.lock().await;
        let deleted = session.delete_annotation(id);
        Ok(DeleteAnnotationResult {
            id,
            deleted,
            remaining: session.store().len(),
        })
    }

    pub async fn process_list_annotations(
        &self,
        params: &ListAnnotationsParams,
    ) -> crate::error::Result<ListAnnotationsResult> {
        let session = self.session.lock().await;
        if session.document().is_none() {
            return Err(Error::NoDocumentLoaded);
        }

        let overlays = match params.page {
            Some(page) => session.overlays(page)?,
            None => Vec::new(),
        };

        Ok(ListAnnotationsResult {
            selected_page: session.selected_page(),
            page_count: session.store().page_count(),
            annotations: session
                .annotations(params.page)
                .into_iter()
                .map(AnnotationInfo::from)
                .collect(),
            overlays,
        })
    }

    pub async fn process_export_pdf(
        &self,
        params: &ExportPdfParams,
    ) -> crate::error::Result<ExportPdfResult> {
        // The session lock is only held long enough to snapshot; the permit
        // keeps a second export out while this one runs.
        let (permit, job, backend) = {
            let session = self.session.lock().await;
            let (permit, job) = session.begin_export()?;
            (permit, job, session.backend())
        };

        // A denied destination fails before anything is drawn
        let target = params.output_path.clone().or_else(|| {
            self.config.output_dir.as_ref().map(|dir| {
                Path::new(dir)
                    .join(job.suggested_file_name())
                    .to_string_lossy()
                    .into_owned()
            })
        });
        if let Some(path) = &target {
            self.validate_output_path_access(path)?;
        }

        tracing::info!(annotations = job.annotation_count(), "export started");

        let exported = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job.run(backend.as_ref())
        })
        .await
        .map_err(join_error)??;

        let output_path = match &target {
            Some(path) => Some(self.write_output(path, &exported.bytes)?),
            None => None,
        };

        let size_bytes = exported.bytes.len();
        let key = self.cache.generate_unique_key();
        let output_cache_key = if self.cache.put(key.clone(), Arc::new(exported.bytes)) {
            Some(key)
        } else {
            tracing::warn!(size_bytes, "signed PDF too large to cache");
            None
        };

        Ok(ExportPdfResult {
            file_name: exported.file_name,
            output_cache_key,
            output_path,
            size_bytes,
            drawn: exported.summary.drawn,
            skipped: exported.summary.skipped,
        })
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Pdfium {
        reason: format!("Task join error: {}", e),
    }
}

impl Default for PdfSignServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for PdfSignServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF signing server. Open a PDF, render or report page sizes, place drawn, \
                 typed or text annotations, adjust them, then export a flattened signed copy."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server without resource directories
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with specified resource directories
pub async fn run_server_with_dirs(resource_dirs: Vec<String>) -> Result<()> {
    run_server_with_config(ServerConfig {
        resource_dirs,
        ..ServerConfig::default()
    })
    .await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    if !PdfiumBackend::is_available() {
        tracing::warn!("PDFium library not found; PDF tools will fail until it is installed");
    }

    let server = PdfSignServer::with_config(config);

    tracing::info!("PDF signing server ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::placement::png_fixture;
    use crate::pdf::testing::RecordingBackend;
    use pretty_assertions::assert_eq;

    const PDF: &[u8] = b"%PDF-1.7 test document";

    fn encode(data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    fn test_server(config: ServerConfig) -> (PdfSignServer, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::letter(2));
        let server = PdfSignServer::with_backend(config, Arc::clone(&backend) as Arc<dyn PdfBackend>);
        (server, backend)
    }

    fn open_params(file_name: &str) -> OpenPdfParams {
        OpenPdfParams {
            source: PdfSource::Base64 {
                base64: encode(PDF),
            },
            file_name: Some(file_name.to_string()),
            mime_type: Some("application/pdf".to_string()),
            password: None,
        }
    }

    fn image_params(x: f64, y: f64) -> AddImageAnnotationParams {
        AddImageAnnotationParams {
            image_base64: format!(
                "data:image/png;base64,{}",
                encode(&png_fixture(100, 50, [0, 0, 255, 255]))
            ),
            placement: PlacementParams {
                x: Some(x),
                y: Some(y),
                ..PlacementParams::default()
            },
        }
    }

    #[test]
    fn test_pdf_source_deserialization() {
        let source: PdfSource = serde_json::from_str(r#"{"path": "/test.pdf"}"#).unwrap();
        assert!(matches!(source, PdfSource::Path { .. }));

        let source: PdfSource = serde_json::from_str(r#"{"base64": "JVBERi0xLjQ="}"#).unwrap();
        assert!(matches!(source, PdfSource::Base64 { .. }));

        let source: PdfSource = serde_json::from_str(r#"{"cache_key": "abc123"}"#).unwrap();
        assert!(matches!(source, PdfSource::CacheRef { .. }));

        let err = serde_json::from_str::<PdfSource>(r#"{"url": "https://example.com/a.pdf"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("cache_key"));

        let err = serde_json::from_str::<PdfSource>(r#"{"path": 3}"#).unwrap_err();
        assert!(err.to_string().contains("\"path\" must be a string"));
    }

    #[test]
    fn test_params_deserialization() {
        let json = r#"{"text": "Jane Doe", "style": "elegant", "x": 10, "y": 20, "profile": "compact"}"#;
        let params: AddTextAnnotationParams = serde_json::from_str(json).unwrap();
        assert!(matches!(params.kind, TextKind::TypedSignature));
        assert_eq!(params.style, Some(TextStyle::Elegant));
        assert_eq!(params.placement.x, Some(10.0));
        assert_eq!(params.placement.profile, ViewportProfile::Compact);

        let params: ResizeAnnotationParams = serde_json::from_str(
            r#"{"id": 1, "handle": "bottom_right", "x": 0, "y": 0, "width": 10, "height": 10}"#,
        )
        .unwrap();
        assert_eq!(params.handle, ResizeHandle::BottomRight);
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.display_width, 600.0);
        assert_eq!(config.max_display_width, 800.0);
        assert_eq!(config.max_image_pixels, 25_000_000);
        assert_eq!(config.cache_max_entries, 32);
        assert_eq!(config.cache_max_bytes, 256 * 1024 * 1024);
        assert!(config.output_dir.is_none());
    }

    #[test]
    fn test_document_name() {
        let path = PdfSource::Path {
            path: "/docs/lease.pdf".to_string(),
        };
        assert_eq!(PdfSignServer::document_name(&path, None), "lease.pdf");
        assert_eq!(PdfSignServer::document_name(&path, Some("nda.pdf")), "nda.pdf");

        let cached = PdfSource::CacheRef {
            cache_key: "k".to_string(),
        };
        assert_eq!(PdfSignServer::document_name(&cached, None), "document.pdf");
    }

    #[test]
    fn test_respond_formats_errors() {
        let response = PdfSignServer::respond::<()>("export_pdf", Err(Error::NoAnnotations));
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(
            value["error"],
            "Please add at least one signature before downloading"
        );
    }

    #[tokio::test]
    async fn test_open_pdf() {
        let (server, _) = test_server(ServerConfig::default());
        let result = server.process_open_pdf(&open_params("contract.pdf")).await.unwrap();

        assert_eq!(result.file_name, "contract.pdf");
        assert_eq!(result.page_count, 2);
        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.pages[0].width, 612.0);
        assert_eq!(result.pages[0].displayed_width, Some(600.0));
        assert!(server.cache.contains(&result.cache_key));
    }

    #[tokio::test]
    async fn test_open_pdf_rejects_wrong_type() {
        let (server, _) = test_server(ServerConfig::default());
        let mut params = open_params("photo.png");
        params.mime_type = Some("image/png".to_string());

        let result = server.process_open_pdf(&params).await;
        assert!(matches!(result, Err(Error::InvalidFileType { .. })));

        let response = server.open_pdf(Parameters(params)).await;
        assert!(response.contains("Please upload a valid PDF file"));
    }

    #[tokio::test]
    async fn test_sign_and_export_to_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (server, backend) = test_server(ServerConfig {
            output_dir: Some(dir.path().to_string_lossy().into_owned()),
            ..ServerConfig::default()
        });

        server.process_open_pdf(&open_params("contract.pdf")).await.unwrap();
        server
            .process_report_page_size(&ReportPageSizeParams {
                page: 1,
                width: 600.0,
                height: 777.0,
            })
            .await
            .unwrap();

        let added = server
            .process_add_image_annotation(&image_params(0.0, 0.0))
            .await
            .unwrap();
        assert_eq!(added.page, 1);
        assert_eq!((added.width, added.height), (100.0, 50.0));

        let moved = server
            .process_move_annotation(&MoveAnnotationParams {
                id: added.id.0,
                x: 200.0,
                y: 150.0,
            })
            .await
            .unwrap();
        assert_eq!((moved.x, moved.y), (200.0, 150.0));

        let exported = server
            .process_export_pdf(&ExportPdfParams { output_path: None })
            .await
            .unwrap();

        assert_eq!(exported.file_name, "contract_signed.pdf");
        assert_eq!(exported.drawn, 1);

        let written = dir.path().join("contract_signed.pdf");
        assert_eq!(exported.output_path, Some(written.to_string_lossy().into_owned()));
        let bytes = std::fs::read(&written).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert_eq!(bytes.len(), exported.size_bytes);

        let cache_key = exported.output_cache_key.unwrap();
        assert_eq!(server.cache.get(&cache_key).unwrap().as_slice(), bytes.as_slice());

        let (page, rect) = backend.draws()[0];
        assert_eq!(page, 1);
        assert!((rect.x - 204.0).abs() < 1e-9);
        assert!((rect.y - 588.138_996).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_export_without_annotations_then_recover() {
        let (server, backend) = test_server(ServerConfig::default());
        server.process_open_pdf(&open_params("contract.pdf")).await.unwrap();
        let calls = backend.calls();

        let response = server
            .export_pdf(Parameters(ExportPdfParams { output_path: None }))
            .await;
        assert!(response.contains("Please add at least one signature before downloading"));
        assert_eq!(backend.calls(), calls);

        server
            .process_add_image_annotation(&image_params(10.0, 10.0))
            .await
            .unwrap();
        let exported = server
            .process_export_pdf(&ExportPdfParams { output_path: None })
            .await
            .unwrap();
        assert_eq!(exported.drawn, 1);
        assert!(exported.output_path.is_none());
    }

    #[tokio::test]
    async fn test_export_output_outside_sandbox() {
        let allowed = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let (server, backend) = test_server(ServerConfig {
            resource_dirs: vec![allowed.path().to_string_lossy().into_owned()],
            ..ServerConfig::default()
        });

        server.process_open_pdf(&open_params("contract.pdf")).await.unwrap();
        server
            .process_add_image_annotation(&image_params(10.0, 10.0))
            .await
            .unwrap();
        let cached = server.cache.len();

        let outside = other.path().join("out.pdf").to_string_lossy().into_owned();
        let result = server
            .process_export_pdf(&ExportPdfParams {
                output_path: Some(outside),
            })
            .await;
        assert!(matches!(result, Err(Error::PathAccessDenied { .. })));
        assert!(!other.path().join("out.pdf").exists());
        assert_eq!(server.cache.len(), cached);
        assert_eq!(backend.saved(), 0);

        // The gate is open again and writing inside the sandbox works
        let inside = allowed.path().join("out.pdf").to_string_lossy().into_owned();
        let exported = server
            .process_export_pdf(&ExportPdfParams {
                output_path: Some(inside),
            })
            .await
            .unwrap();
        assert!(exported.output_path.is_some());
        assert!(!allowed.path().join("out.pdf.part").exists());
        assert_eq!(server.cache.len(), cached + 1);
    }

    #[tokio::test]
    async fn test_failed_write_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _) = test_server(ServerConfig::default());

        server.process_open_pdf(&open_params("contract.pdf")).await.unwrap();
        server
            .process_add_image_annotation(&image_params(10.0, 10.0))
            .await
            .unwrap();
        let cached = server.cache.len();

        // A directory sits at the destination, so the rename fails
        let blocked = dir.path().join("contract_signed.pdf");
        std::fs::create_dir(&blocked).unwrap();
        let result = server
            .process_export_pdf(&ExportPdfParams {
                output_path: Some(blocked.to_string_lossy().into_owned()),
            })
            .await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(server.cache.len(), cached);
        assert!(!dir.path().join("contract_signed.pdf.part").exists());
        assert!(!server.session.lock().await.is_exporting());
    }

    #[tokio::test]
    async fn test_signed_output_can_be_reopened_from_cache() {
        let (server, _) = test_server(ServerConfig::default());
        server.process_open_pdf(&open_params("contract.pdf")).await.unwrap();
        server
            .process_add_image_annotation(&image_params(10.0, 10.0))
            .await
            .unwrap();
        let exported = server
            .process_export_pdf(&ExportPdfParams { output_path: None })
            .await
            .unwrap();

        let reopened = server
            .process_open_pdf(&OpenPdfParams {
                source: PdfSource::CacheRef {
                    cache_key: exported.output_cache_key.unwrap(),
                },
                file_name: Some(exported.file_name),
                mime_type: None,
                password: None,
            })
            .await
            .unwrap();
        assert_eq!(reopened.file_name, "contract_signed.pdf");

        let listed = server
            .process_list_annotations(&ListAnnotationsParams { page: None })
            .await
            .unwrap();
        assert!(listed.annotations.is_empty());
    }

    #[tokio::test]
    async fn test_annotation_tools() {
        let (server, _) = test_server(ServerConfig::default());
        server.process_open_pdf(&open_params("contract.pdf")).await.unwrap();
        server
            .process_select_page(&SelectPageParams { page: 2 })
            .await
            .unwrap();

        let typed = server
            .process_add_text_annotation(&AddTextAnnotationParams {
                text: "Jane Doe".to_string(),
                kind: TextKind::TypedSignature,
                style: None,
                font_size: None,
                placement: PlacementParams::default(),
            })
            .await
            .unwrap();
        assert_eq!(typed.page, 2);
        assert_eq!((typed.x, typed.y), (200.0, 150.0));

        let empty = server
            .process_add_text_annotation(&AddTextAnnotationParams {
                text: " ".to_string(),
                kind: TextKind::Text,
                style: None,
                font_size: None,
                placement: PlacementParams::default(),
            })
            .await;
        assert!(matches!(empty, Err(Error::EmptyText)));

        let half = server
            .process_add_image_annotation(&AddImageAnnotationParams {
                placement: PlacementParams {
                    x: Some(1.0),
                    ..PlacementParams::default()
                },
                ..image_params(0.0, 0.0)
            })
            .await;
        assert!(matches!(half, Err(Error::InvalidGeometry { .. })));

        let resized = server
            .process_resize_annotation(&ResizeAnnotationParams {
                id: typed.id.0,
                handle: ResizeHandle::BottomRight,
                x: 200.0,
                y: 150.0,
                width: 1.0,
                height: 1.0,
            })
            .await
            .unwrap();
        assert_eq!((resized.width, resized.height), (50.0, 20.0));

        let listed = server
            .process_list_annotations(&ListAnnotationsParams { page: Some(2) })
            .await
            .unwrap();
        assert_eq!(listed.selected_page, 2);
        assert_eq!(listed.annotations.len(), 1);
        assert_eq!(listed.overlays.len(), 1);

        let deleted = server
            .process_delete_annotation(&DeleteAnnotationParams { id: typed.id.0 })
            .await
            .unwrap();
        assert!(deleted.deleted);
        let again = server
            .process_delete_annotation(&DeleteAnnotationParams { id: typed.id.0 })
            .await
            .unwrap();
        assert!(!again.deleted);
        assert_eq!(again.remaining, 0);
    }

    #[tokio::test]
    async fn test_render_page_records_display_size() {
        let (server, _) = test_server(ServerConfig::default());
        server.process_open_pdf(&open_params("contract.pdf")).await.unwrap();

        let rendered = server
            .process_render_page(&RenderPageParams {
                page: 2,
                width: Some(306),
            })
            .await
            .unwrap();
        assert_eq!((rendered.width, rendered.height), (306, 396));
        assert_eq!(rendered.mime_type, "image/png");

        let listed = server
            .process_list_annotations(&ListAnnotationsParams { page: Some(2) })
            .await
            .unwrap();
        assert!(listed.overlays.is_empty());

        let page = server
            .process_report_page_size(&ReportPageSizeParams {
                page: 2,
                width: 306.0,
                height: 396.0,
            })
            .await
            .unwrap();
        assert_eq!(page.displayed_width, Some(306.0));
    }

    #[tokio::test]
    async fn test_reset_session() {
        let (server, _) = test_server(ServerConfig::default());
        let opened = server.process_open_pdf(&open_params("contract.pdf")).await.unwrap();

        let response = server.reset_session(Parameters(ResetSessionParams {})).await;
        assert!(response.contains("\"reset\": true"));
        assert!(!server.cache.contains(&opened.cache_key));

        let result = server
            .process_list_annotations(&ListAnnotationsParams { page: None })
            .await;
        assert!(matches!(result, Err(Error::NoDocumentLoaded)));
    }
}
