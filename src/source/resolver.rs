//! Source resolution for PDF and image data

use crate::error::{Error, Result};
use crate::source::ByteCache;
use base64::Engine;
use std::path::Path;
use std::sync::Arc;

/// MIME type accepted for uploaded documents
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Resolved PDF data
pub struct ResolvedPdf {
    pub data: Arc<Vec<u8>>,
    pub source_name: String,
}

/// Resolve a file path to PDF data
pub fn resolve_path<P: AsRef<Path>>(path: P) -> Result<ResolvedPdf> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(Error::PdfNotFound {
            path: path.display().to_string(),
        });
    }

    let data = std::fs::read(path).map_err(Error::Io)?;
    check_pdf_header(&data)?;

    Ok(ResolvedPdf {
        data: Arc::new(data),
        source_name: path.display().to_string(),
    })
}

/// Resolve base64 encoded data to PDF data. A `data:` URL prefix is accepted.
pub fn resolve_base64(base64_data: &str) -> Result<ResolvedPdf> {
    let data = decode_payload(base64_data)?;
    check_pdf_header(&data)?;

    Ok(ResolvedPdf {
        data: Arc::new(data),
        source_name: "<base64>".to_string(),
    })
}

/// Resolve a cache key to PDF data
pub fn resolve_cache(cache_key: &str, cache: &ByteCache) -> Result<ResolvedPdf> {
    let data = cache.get(cache_key).ok_or_else(|| Error::CacheKeyNotFound {
        key: cache_key.to_string(),
    })?;

    Ok(ResolvedPdf {
        data,
        source_name: format!("<cache:{}>", cache_key),
    })
}

/// Decode a base64 image payload, with or without a `data:image/...` prefix.
pub fn decode_image_base64(payload: &str) -> Result<Vec<u8>> {
    let data = decode_payload(payload)?;
    if data.is_empty() {
        return Err(Error::InvalidImage {
            reason: "image payload is empty".to_string(),
        });
    }
    Ok(data)
}

/// Check an uploaded document before it is parsed.
///
/// The declared MIME type decides when present; otherwise the file name must
/// end in `.pdf`. The bytes must start with a PDF header either way.
pub fn validate_upload(file_name: &str, mime_type: Option<&str>, data: &[u8]) -> Result<()> {
    match mime_type.map(str::trim).filter(|m| !m.is_empty()) {
        Some(mime) if !mime.eq_ignore_ascii_case(PDF_MIME_TYPE) => {
            return Err(Error::InvalidFileType {
                reason: format!("unsupported MIME type {}", mime),
            });
        }
        Some(_) => {}
        None => {
            let is_pdf = Path::new(file_name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
            if !is_pdf {
                return Err(Error::InvalidFileType {
                    reason: format!("{} does not have a .pdf extension", file_name),
                });
            }
        }
    }

    check_pdf_header(data)
}

fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let encoded = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    let engine = base64::engine::general_purpose::STANDARD;
    Ok(engine.decode(encoded.trim())?)
}

fn check_pdf_header(data: &[u8]) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }
    Ok(())
}
