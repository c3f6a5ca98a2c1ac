//! PDF Signing Server Library
//!
//! This crate provides an MCP server for signing PDFs:
//! - `open_pdf`, `render_page`, `report_page_size`: load a document and track
//!   the size each page is displayed at
//! - `add_image_annotation`, `add_text_annotation`: place drawn, typed or text
//!   stamps on a page
//! - `move_annotation`, `resize_annotation`, `delete_annotation`: adjust them
//! - `export_pdf`: flatten every annotation into a new `<name>_signed.pdf`

pub mod annotation;
pub mod error;
pub mod export;
pub mod pdf;
pub mod server;
pub mod session;
pub mod source;

pub use error::{Error, Result};
pub use export::{signed_file_name, ExportJob, ExportedDocument};
pub use server::{
    run_server, run_server_with_config, run_server_with_dirs, PdfSignServer, PdfSource,
    ServerConfig,
};
pub use session::{Placement, SessionSettings, SigningSession, TextRequest};
