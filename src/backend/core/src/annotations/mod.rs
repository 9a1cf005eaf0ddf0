//! Append-only annotations (notes and data queries) attached to aggregates.

pub mod store;

pub use store::{Annotation, AnnotationId, AnnotationKind, AnnotationStore};
