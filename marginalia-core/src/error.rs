use thiserror::Error;

/// Errors raised by the annotation model.
///
/// None of these are fatal: callers surface them as warnings and keep
/// their last consistent state.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Range [{start}, {end}) does not fit a document of {len} characters")]
    InvalidRange { start: usize, end: usize, len: usize },
    #[error("Selection is empty")]
    EmptySelection,
    #[error("Annotation not found: {0}")]
    AnnotationNotFound(String),
    #[error("Document source error: {0}")]
    Source(#[from] serde_json::Error),
}
