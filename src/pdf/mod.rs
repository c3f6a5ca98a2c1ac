//! PDF processing layer
//!
//! This module provides PDF rendering and mutation using PDFium and qpdf.

mod backend;
mod pdfium;
mod qpdf;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{DocumentEditor, DocumentInfo, PdfBackend, RenderedPage, TextStyle};
pub use pdfium::{PdfiumBackend, PdfiumEditor};
pub use qpdf::QpdfWrapper;
