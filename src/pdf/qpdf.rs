//! qpdf FFI wrapper for whole-document rewrites
//!
//! Export works on a copy produced by serializing the source document through
//! qpdf and parsing the result again, so the loaded bytes are never touched
//! and repeated exports start from the same base state.

use crate::error::{Error, Result};
use qpdf::QPdf;

/// Wrapper for qpdf operations via FFI
pub struct QpdfWrapper;

/// Helper: open a QPdf from memory, optionally with password
fn open_qpdf(data: &[u8], password: Option<&str>) -> Result<QPdf> {
    match password {
        Some(pwd) => QPdf::read_from_memory_encrypted(data, pwd).map_err(map_qpdf_error),
        None => QPdf::read_from_memory(data).map_err(map_qpdf_error),
    }
}

/// Map qpdf crate errors to our error types
fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    match e.error_code() {
        qpdf::QPdfErrorCode::InvalidPassword => Error::IncorrectPassword,
        _ => Error::QpdfError {
            reason: e.to_string(),
        },
    }
}

impl QpdfWrapper {
    /// Serialize a fresh, unencrypted copy of a PDF
    ///
    /// # Arguments
    /// * `input_data` - Raw PDF bytes
    /// * `password` - Optional password for encrypted PDFs
    ///
    /// # Returns
    /// The rewritten PDF as bytes
    pub fn reload(input_data: &[u8], password: Option<&str>) -> Result<Vec<u8>> {
        let qpdf = open_qpdf(input_data, password)?;

        let mut writer = qpdf.writer();
        writer.preserve_encryption(false);
        writer.write_to_memory().map_err(map_qpdf_error)
    }

    /// Get the page count of a PDF
    pub fn get_page_count(input_data: &[u8], password: Option<&str>) -> Result<u32> {
        let qpdf = open_qpdf(input_data, password)?;
        qpdf.get_num_pages().map_err(map_qpdf_error)
    }
}

/// Build an empty PDF with one blank page per `(width, height)` entry.
#[cfg(test)]
pub(crate) fn blank_pdf(page_sizes: &[(f64, f64)]) -> Vec<u8> {
    let qpdf = QPdf::empty();
    for (width, height) in page_sizes {
        let page = qpdf
            .parse_object(&format!(
                "<< /Type /Page /MediaBox [0 0 {} {}] /Resources << >> >>",
                width, height
            ))
            .unwrap();
        qpdf.add_page(&page, false).unwrap();
    }
    qpdf.writer().write_to_memory().unwrap()
}
