//! Source resolution and caching

pub mod cache;
pub mod resolver;

pub use cache::{ByteCache, CacheLease};
pub use resolver::{
    decode_image_base64, resolve_base64, resolve_cache, resolve_path, validate_upload,
    ResolvedPdf, PDF_MIME_TYPE,
};
