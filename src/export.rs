//! Flattening annotations into a new copy of the loaded PDF

use crate::annotation::{to_document, Annotation, AnnotationId, DisplaySurface, DisplayedPages};
use crate::error::{Error, Result};
use crate::pdf::{DocumentEditor, PdfBackend};
use std::path::Path;
use std::sync::Arc;

/// Everything an export needs, detached from the live session
#[derive(Debug, Clone)]
pub struct ExportJob {
    source: Arc<Vec<u8>>,
    password: Option<String>,
    file_name: String,
    annotations: Vec<Annotation>,
    surface: DisplayedPages,
}

/// Counts from drawing annotations into one document copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BurnInSummary {
    pub drawn: usize,
    /// Annotations whose page no longer exists in the document
    pub skipped: Vec<AnnotationId>,
}

/// A finished export
#[derive(Debug, Clone)]
pub struct ExportedDocument {
    pub bytes: Vec<u8>,
    /// Suggested name for saving, `<stem>_signed.pdf`
    pub file_name: String,
    pub summary: BurnInSummary,
}

impl ExportJob {
    /// Build an export job. Fails with [`Error::NoAnnotations`] when there is
    /// nothing to draw.
    pub fn new(
        source: Arc<Vec<u8>>,
        password: Option<String>,
        file_name: impl Into<String>,
        annotations: Vec<Annotation>,
        surface: DisplayedPages,
    ) -> Result<Self> {
        if annotations.is_empty() {
            return Err(Error::NoAnnotations);
        }
        Ok(Self {
            source,
            password,
            file_name: file_name.into(),
            annotations,
            surface,
        })
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    pub fn suggested_file_name(&self) -> String {
        signed_file_name(&self.file_name)
    }

    /// Draw every annotation into a private copy of the source and serialize it.
    ///
    /// Any image or serialization failure aborts the whole export; the copy is
    /// discarded and nothing is returned.
    pub fn run(&self, backend: &dyn PdfBackend) -> Result<ExportedDocument> {
        let mut summary = BurnInSummary::default();
        let bytes = backend.edit_copy(
            &self.source,
            self.password.as_deref(),
            &mut |editor: &mut dyn DocumentEditor| {
                summary = self.burn_in(editor)?;
                Ok(())
            },
        )?;

        tracing::info!(
            drawn = summary.drawn,
            skipped = summary.skipped.len(),
            bytes = bytes.len(),
            "export finished"
        );

        Ok(ExportedDocument {
            bytes,
            file_name: self.suggested_file_name(),
            summary,
        })
    }

    /// Draw annotations in collection order, so later entries paint over
    /// earlier ones where they overlap.
    pub fn burn_in(&self, editor: &mut dyn DocumentEditor) -> Result<BurnInSummary> {
        let page_count = editor.page_count();
        let mut summary = BurnInSummary::default();

        for annotation in &self.annotations {
            let page = annotation.page_number;
            if page < 1 || page > page_count {
                tracing::warn!(
                    id = %annotation.id,
                    page,
                    page_count,
                    "skipping annotation on missing page"
                );
                summary.skipped.push(annotation.id);
                continue;
            }

            let image = image::load_from_memory(&annotation.image).map_err(|e| {
                Error::InvalidImage {
                    reason: format!("annotation {}: {}", annotation.id, e),
                }
            })?;

            let page_size = editor.page_size(page)?;
            let displayed = self.surface.displayed_size(page);
            if !displayed.is_some_and(|d| d.is_usable()) {
                tracing::warn!(
                    page,
                    "no displayed size for page, placing with identity scale"
                );
            }

            let rect = to_document(&annotation.bounds, displayed, page_size);
            tracing::debug!(
                id = %annotation.id,
                page,
                x = rect.x,
                y = rect.y,
                width = rect.width,
                height = rect.height,
                "drawing annotation"
            );

            editor.draw_image(page, &image, &rect)?;
            summary.drawn += 1;
        }

        Ok(summary)
    }
}

/// Insert `_signed` before the extension of `original`'s file name.
pub fn signed_file_name(original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf");

    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_signed.{}", stem, ext),
        _ => format!("{}_signed.pdf", name.trim_start_matches('.')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::placement::png_fixture;
    use crate::annotation::{AnnotationKind, Rect, Size};
    use crate::pdf::testing::RecordingBackend;
    use pretty_assertions::assert_eq;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn annotation(id: u64, page: u32, bounds: Rect, color: [u8; 4]) -> Annotation {
        Annotation {
            id: AnnotationId(id),
            kind: AnnotationKind::Drawn,
            image: Arc::from(png_fixture(4, 2, color)),
            bounds,
            page_number: page,
            verification: None,
        }
    }

    fn job(annotations: Vec<Annotation>, surface: DisplayedPages) -> ExportJob {
        ExportJob::new(
            Arc::new(b"%PDF-1.7 fake".to_vec()),
            None,
            "contract.pdf",
            annotations,
            surface,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_collection_rejected_before_any_work() {
        let backend = RecordingBackend::letter(1);
        let result = ExportJob::new(
            Arc::new(b"%PDF".to_vec()),
            None,
            "a.pdf",
            Vec::new(),
            DisplayedPages::new(),
        );
        assert!(matches!(result, Err(Error::NoAnnotations)));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_scaled_placement_on_letter_page() {
        let backend = RecordingBackend::letter(1);
        let mut surface = DisplayedPages::new();
        surface.report(1, Size::new(600.0, 777.0));

        let exported = job(
            vec![annotation(1, 1, Rect::new(200.0, 150.0, 100.0, 50.0), RED)],
            surface,
        )
        .run(&backend)
        .unwrap();

        assert_eq!(exported.file_name, "contract_signed.pdf");
        assert_eq!(exported.summary.drawn, 1);

        let draws = backend.draws();
        assert_eq!(draws.len(), 1);
        let (page, rect) = draws[0];
        assert_eq!(page, 1);
        assert!((rect.x - 204.0).abs() < 1e-9);
        assert!((rect.y - 588.138_996_139).abs() < 1e-6);
        assert!((rect.width - 102.0).abs() < 1e-9);
        assert!((rect.height - 50.965_250_965).abs() < 1e-6);
    }

    #[test]
    fn test_each_page_uses_its_own_displayed_size() {
        let backend = RecordingBackend::new(vec![Size::new(612.0, 792.0), Size::new(792.0, 612.0)]);
        let mut surface = DisplayedPages::new();
        surface.report(1, Size::new(612.0, 792.0));
        surface.report(2, Size::new(396.0, 306.0));

        job(
            vec![
                annotation(1, 1, Rect::new(10.0, 10.0, 100.0, 50.0), RED),
                annotation(2, 2, Rect::new(10.0, 10.0, 100.0, 50.0), RED),
            ],
            surface,
        )
        .run(&backend)
        .unwrap();

        let draws = backend.draws();
        assert_eq!(draws[0].1, Rect::new(10.0, 732.0, 100.0, 50.0));
        assert_eq!(draws[1].1, Rect::new(20.0, 492.0, 200.0, 100.0));
    }

    #[test]
    fn test_missing_display_size_falls_back_to_identity() {
        let backend = RecordingBackend::letter(1);
        job(
            vec![annotation(1, 1, Rect::new(200.0, 150.0, 100.0, 50.0), RED)],
            DisplayedPages::new(),
        )
        .run(&backend)
        .unwrap();

        assert_eq!(backend.draws()[0].1, Rect::new(200.0, 592.0, 100.0, 50.0));
    }

    #[test]
    fn test_later_annotation_paints_over_earlier() {
        let backend = RecordingBackend::letter(1);
        let mut surface = DisplayedPages::new();
        surface.report(1, Size::new(612.0, 792.0));

        job(
            vec![
                annotation(1, 1, Rect::new(100.0, 100.0, 100.0, 100.0), RED),
                annotation(2, 1, Rect::new(150.0, 150.0, 100.0, 100.0), BLUE),
            ],
            surface,
        )
        .run(&backend)
        .unwrap();

        // Displayed (175, 175) is inside both boxes; document y is flipped
        assert_eq!(backend.pixel(1, 175, 792 - 175), Some(BLUE));
        assert_eq!(backend.pixel(1, 120, 792 - 120), Some(RED));
    }

    #[test]
    fn test_stale_page_is_skipped() {
        let backend = RecordingBackend::letter(1);
        let exported = job(
            vec![
                annotation(1, 3, Rect::new(0.0, 0.0, 80.0, 40.0), RED),
                annotation(2, 1, Rect::new(0.0, 0.0, 80.0, 40.0), RED),
            ],
            DisplayedPages::new(),
        )
        .run(&backend)
        .unwrap();

        assert_eq!(
            exported.summary,
            BurnInSummary {
                drawn: 1,
                skipped: vec![AnnotationId(1)],
            }
        );
    }

    #[test]
    fn test_bad_image_aborts_whole_export() {
        let backend = RecordingBackend::letter(1);
        let mut broken = annotation(2, 1, Rect::new(0.0, 0.0, 80.0, 40.0), RED);
        broken.image = Arc::from(&b"not a png"[..]);

        let result = job(
            vec![annotation(1, 1, Rect::new(0.0, 0.0, 80.0, 40.0), RED), broken],
            DisplayedPages::new(),
        )
        .run(&backend);

        assert!(matches!(result, Err(Error::InvalidImage { .. })));
        assert_eq!(backend.saved(), 0);
    }

    #[test]
    fn test_repeated_exports_start_from_same_base() {
        let backend = RecordingBackend::letter(1);
        let job = job(
            vec![annotation(1, 1, Rect::new(0.0, 0.0, 80.0, 40.0), RED)],
            DisplayedPages::new(),
        );

        let first = job.run(&backend).unwrap();
        let second = job.run(&backend).unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(backend.saved(), 2);
    }

    #[test]
    fn test_signed_file_name() {
        assert_eq!(signed_file_name("contract.pdf"), "contract_signed.pdf");
        assert_eq!(signed_file_name("Scan.PDF"), "Scan_signed.PDF");
        assert_eq!(signed_file_name("lease.v2.pdf"), "lease.v2_signed.pdf");
        assert_eq!(signed_file_name("/home/me/docs/nda.pdf"), "nda_signed.pdf");
        assert_eq!(signed_file_name("untitled"), "untitled_signed.pdf");
    }
}
