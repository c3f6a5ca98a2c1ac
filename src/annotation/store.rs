//! Ordered collection of placed annotations

use super::geometry::{Rect, Size};
use super::verification::VerificationRecord;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Smallest size an annotation may be resized to, in displayed pixels.
pub const MIN_ANNOTATION_SIZE: Size = Size::new(50.0, 20.0);

/// Annotation identifier, issued in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(pub u64);

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the annotation image was authored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Hand-drawn signature supplied as an image
    Drawn,
    /// Name rendered in a signature font
    TypedSignature,
    /// Free text
    Text,
}

/// A signature or text image placed on one page.
///
/// `bounds` is in displayed-page pixels with a top-left origin.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
    /// PNG-encoded image payload
    pub image: Arc<[u8]>,
    pub bounds: Rect,
    /// 1-indexed target page, fixed at creation
    pub page_number: u32,
    pub verification: Option<VerificationRecord>,
}

/// Issues millisecond timestamps that never repeat within one store.
#[derive(Debug, Default)]
struct IdClock {
    last: u64,
}

impl IdClock {
    fn next(&mut self) -> AnnotationId {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let id = now.max(self.last + 1);
        self.last = id;
        AnnotationId(id)
    }

    fn observe(&mut self, id: AnnotationId) {
        self.last = self.last.max(id.0);
    }
}

/// Annotations for one loaded document, kept in insertion order.
#[derive(Debug)]
pub struct AnnotationStore {
    page_count: u32,
    entries: Vec<Annotation>,
    clock: IdClock,
}

impl AnnotationStore {
    /// Create an empty store for a document with `page_count` pages
    pub fn new(page_count: u32) -> Self {
        Self {
            page_count,
            entries: Vec::new(),
            clock: IdClock::default(),
        }
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Issue a fresh id, unique within this store
    pub fn next_id(&mut self) -> AnnotationId {
        self.clock.next()
    }

    /// Append an annotation.
    ///
    /// Rejects out-of-range pages and id collisions without touching existing
    /// entries. Size is raised to [`MIN_ANNOTATION_SIZE`] and negative
    /// positions are moved to zero.
    pub fn add(&mut self, mut annotation: Annotation) -> Result<AnnotationId> {
        if annotation.page_number < 1 || annotation.page_number > self.page_count {
            return Err(Error::PageOutOfBounds {
                page: annotation.page_number,
                total: self.page_count,
            });
        }
        if self.get(annotation.id).is_some() {
            return Err(Error::DuplicateAnnotation {
                id: annotation.id.0,
            });
        }

        annotation.bounds = normalize(annotation.bounds)?;
        self.clock.observe(annotation.id);

        let id = annotation.id;
        self.entries.push(annotation);
        Ok(id)
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.entries.iter().find(|a| a.id == id)
    }

    /// Move an annotation. Size is left unchanged.
    pub fn update_position(&mut self, id: AnnotationId, x: f64, y: f64) -> Result<&Annotation> {
        let (x, y) = position(x, y)?;
        let entry = self.entry_mut(id)?;
        entry.bounds.x = x;
        entry.bounds.y = y;
        Ok(entry)
    }

    /// Move and resize an annotation, clamping size to the minimum.
    pub fn update_geometry(&mut self, id: AnnotationId, bounds: Rect) -> Result<&Annotation> {
        let bounds = normalize(bounds)?;
        let entry = self.entry_mut(id)?;
        entry.bounds = bounds;
        Ok(entry)
    }

    /// Remove an annotation. Removing an unknown id is not an error.
    pub fn remove(&mut self, id: AnnotationId) -> Option<Annotation> {
        let index = self.entries.iter().position(|a| a.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Annotations on `page`, in insertion order
    pub fn list_by_page(&self, page: u32) -> Vec<&Annotation> {
        self.entries
            .iter()
            .filter(|a| a.page_number == page)
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.entries.iter()
    }

    /// Owned copy of every annotation, in insertion order
    pub fn snapshot(&self) -> Vec<Annotation> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, id: AnnotationId) -> Result<&mut Annotation> {
        self.entries
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(Error::AnnotationNotFound { id: id.0 })
    }
}

fn position(x: f64, y: f64) -> Result<(f64, f64)> {
    if !x.is_finite() || !y.is_finite() {
        return Err(Error::InvalidGeometry {
            reason: format!("position ({}, {}) is not finite", x, y),
        });
    }
    Ok((x.max(0.0), y.max(0.0)))
}

fn normalize(bounds: Rect) -> Result<Rect> {
    if !bounds.is_finite() {
        return Err(Error::InvalidGeometry {
            reason: format!("{:?} is not finite", bounds),
        });
    }
    let (x, y) = position(bounds.x, bounds.y)?;
    Ok(Rect::new(
        x,
        y,
        bounds.width.max(MIN_ANNOTATION_SIZE.width),
        bounds.height.max(MIN_ANNOTATION_SIZE.height),
    ))
}
