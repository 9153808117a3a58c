//! # marginalia-core: annotation model and overlay rendering
//!
//! Pure, synchronous building blocks shared by every reader:
//!
//! ```text
//!  rendered selection ──► selection::map_selection ──► (start, end)
//!                                                         │
//!                          verses::verses_touched_by ◄────┤
//!                                                         ▼
//!                                                  AnnotationDraft
//!                                                         │  (store + publish)
//!                                                         ▼
//!  AnnotationSet ──► highlights ──► overlay::Overlay ──► segments
//! ```
//!
//! ## Modules
//!
//! - [`document`]: linearized documents, the offset coordinate space
//! - [`verses`]: verse spans and touched-verse lookup
//! - [`selection`]: offset mapper and selection debouncer
//! - [`overlay`]: boundary sweep producing render segments
//! - [`annotation`]: annotations, comments, likes
//! - [`collection`]: the client-owned annotation collection
//! - [`draft`]: submission drafts and their validation

pub mod annotation;
pub mod collection;
pub mod document;
pub mod draft;
pub mod error;
pub mod overlay;
pub mod selection;
pub mod verses;

pub use annotation::{Annotation, AnnotationKind, Author, Comment, HighlightColor, Like};
pub use collection::{AnnotationSet, CollectionMode, PendingLike, Upsert};
pub use document::{Document, DocumentKind, DocumentSource, Segment, SEPARATOR};
pub use draft::{AnnotationDraft, FieldErrors};
pub use error::CoreError;
pub use overlay::{render, Highlight, Overlay, OverlaySegment, SELECTION_CLASS};
pub use selection::{map_selection, Debouncer, MappedSelection, NodePoint, RawSelection};
pub use verses::{verses_touched_by, VerseMarker, VersePosition};
