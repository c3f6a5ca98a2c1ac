//! Error types for PDF Sign Server

use thiserror::Error;

/// Result type alias for PDF Sign Server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for PDF Sign Server
#[derive(Error, Debug)]
pub enum Error {
    /// PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Uploaded file is not a PDF by MIME type or extension
    #[error("Invalid file type: {reason}")]
    InvalidFileType { reason: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// PDF is password protected and no password was provided
    #[error("PDF is password protected")]
    PasswordRequired,

    /// Incorrect password provided
    #[error("Incorrect password")]
    IncorrectPassword,

    /// An operation needs a loaded document
    #[error("No PDF document is loaded")]
    NoDocumentLoaded,

    /// Page out of bounds
    #[error("Page {page} out of bounds (total: {total})")]
    PageOutOfBounds { page: u32, total: u32 },

    /// Annotation id not present in the store
    #[error("Annotation not found: {id}")]
    AnnotationNotFound { id: u64 },

    /// Annotation id already present in the store
    #[error("Duplicate annotation id: {id}")]
    DuplicateAnnotation { id: u64 },

    /// Geometry that is not finite or otherwise unusable
    #[error("Invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    /// Resize reported through an edge or corner that is fixed
    #[error("Resize handle is disabled: {handle}")]
    ResizeHandleDisabled { handle: String },

    /// Image payload could not be decoded
    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    /// Image dimension exceeded
    #[error("Image dimension exceeded: {detail}")]
    ImageDimensionExceeded { detail: String },

    /// Text annotation with nothing to draw
    #[error("Text annotation is empty")]
    EmptyText,

    /// Export requested with an empty annotation collection
    #[error("No annotations to export")]
    NoAnnotations,

    /// Another export is still running
    #[error("An export is already in progress")]
    ExportInProgress,

    /// Cache key not found
    #[error("Cache key not found: {key}")]
    CacheKeyNotFound { key: String },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PDFium error
    #[error("PDFium error: {reason}")]
    Pdfium { reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// qpdf error
    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors, file sizes) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidFileType { .. } => "Please upload a valid PDF file".to_string(),
            Error::InvalidPdf { .. } => "Error loading PDF file".to_string(),
            Error::PasswordRequired => "PDF is password protected".to_string(),
            Error::IncorrectPassword => "Incorrect password".to_string(),
            Error::NoDocumentLoaded => "No PDF document is loaded".to_string(),
            Error::PageOutOfBounds { page, total } => {
                format!("Page {} out of bounds (total: {})", page, total)
            }
            Error::AnnotationNotFound { id } => format!("Annotation {} not found", id),
            Error::DuplicateAnnotation { id } => format!("Annotation {} already exists", id),
            Error::InvalidGeometry { reason } => format!("Invalid geometry: {}", reason),
            Error::ResizeHandleDisabled { handle } => {
                format!("Resizing from the {} handle is not allowed", handle)
            }
            Error::InvalidImage { .. } => "Invalid image data".to_string(),
            Error::ImageDimensionExceeded { detail } => {
                format!("Image dimension exceeded: {}", detail)
            }
            Error::EmptyText => "Please enter some text".to_string(),
            Error::NoAnnotations => {
                "Please add at least one signature before downloading".to_string()
            }
            Error::ExportInProgress => "An export is already in progress".to_string(),
            Error::CacheKeyNotFound { .. } => "Cache key not found".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Pdfium { .. } => "Error signing PDF".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::QpdfError { .. } => "Error signing PDF".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
        }
    }
}
