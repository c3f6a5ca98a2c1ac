//! Annotation model: geometry, storage, overlays and placement
//!
//! Everything here is pure state and arithmetic; PDF access lives in
//! [`crate::pdf`].

pub mod geometry;
pub mod overlay;
pub mod placement;
pub mod store;
pub mod surface;
pub mod verification;

pub use geometry::{to_display, to_document, Rect, Scale, Size};
pub use overlay::{page_overlays, Overlay, ResizeHandle, ResizeHandles};
pub use placement::{
    decode_image_metadata, initial_size, ImageMetadata, ViewportProfile, MIN_PLACEMENT_SIZE,
};
pub use store::{Annotation, AnnotationId, AnnotationKind, AnnotationStore, MIN_ANNOTATION_SIZE};
pub use surface::{DisplaySurface, DisplayedPages};
pub use verification::VerificationRecord;
