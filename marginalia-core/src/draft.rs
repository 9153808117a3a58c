//! Annotation drafts: what a reader submits before the store assigns an id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, AnnotationKind, Author, HighlightColor};
use crate::document::Document;
use crate::error::CoreError;
use crate::selection::MappedSelection;

/// Field name → problem. Empty means the draft is valid.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationDraft {
    pub document_key: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub kind: AnnotationKind,
    pub color: HighlightColor,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub author_id: String,
    pub author_name: String,
    #[serde(default)]
    pub verse_numbers: Vec<u32>,
}

impl AnnotationDraft {
    /// Start a draft from a mapped selection. Touched verses are computed
    /// here, once, and never again.
    pub fn from_selection(
        document: &Document,
        selection: &MappedSelection,
        kind: AnnotationKind,
        color: HighlightColor,
        author: &Author,
    ) -> Result<Self, CoreError> {
        let (start, end) = (selection.start_offset, selection.end_offset);
        if start == end {
            return Err(CoreError::EmptySelection);
        }
        if start > end || end > document.len() {
            return Err(CoreError::InvalidRange {
                start,
                end,
                len: document.len(),
            });
        }

        Ok(Self {
            document_key: document.key().to_string(),
            start_offset: start,
            end_offset: end,
            kind,
            color,
            text: String::new(),
            url: None,
            photo_url: None,
            author_id: author.id.clone(),
            author_name: author.name.clone(),
            verse_numbers: document.touched_by(start, end),
        })
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_photo_url(mut self, photo_url: impl Into<String>) -> Self {
        self.photo_url = Some(photo_url.into());
        self
    }

    /// Check required fields for the draft's kind.
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());

        if self.document_key.trim().is_empty() {
            errors.insert("documentKey".into(), "Document is required".into());
        }
        if self.start_offset >= self.end_offset {
            errors.insert("endOffset".into(), "Selection must not be empty".into());
        }
        if self.author_id.trim().is_empty() {
            errors.insert("authorId".into(), "Author is required".into());
        }

        let needs_text = matches!(self.kind, AnnotationKind::Note | AnnotationKind::Combo);
        let needs_url = matches!(self.kind, AnnotationKind::Link | AnnotationKind::Combo);
        let needs_photo = matches!(self.kind, AnnotationKind::Photo | AnnotationKind::Combo);

        if needs_text && self.text.trim().is_empty() {
            errors.insert("text".into(), "Note text is required".into());
        }
        if needs_url && blank(&self.url) {
            errors.insert("url".into(), "Link URL is required".into());
        }
        if needs_photo && blank(&self.photo_url) {
            errors.insert("photoUrl".into(), "Photo is required".into());
        }
        errors
    }

    /// Materialize as a stored annotation.
    pub fn into_annotation(self, id: impl Into<String>, created_at: DateTime<Utc>) -> Annotation {
        Annotation {
            id: id.into(),
            document_key: self.document_key,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            kind: self.kind,
            color: self.color,
            text: self.text,
            url: self.url,
            photo_url: self.photo_url,
            author_id: self.author_id,
            author_name: self.author_name,
            created_at,
            comments: Vec::new(),
            likes: Vec::new(),
            verse_numbers: self.verse_numbers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Segment;

    fn doc() -> Document {
        Document::chapter(
            "genesis-1",
            vec![
                Segment::new(1, "In the beginning"),
                Segment::new(2, "God created"),
            ],
        )
    }

    fn selection(start: usize, end: usize) -> MappedSelection {
        MappedSelection {
            text: doc().slice(start, end).unwrap().to_string(),
            start_offset: start,
            end_offset: end,
        }
    }

    fn ada() -> Author {
        Author::new("u1", "Ada")
    }

    #[test]
    fn test_draft_tags_touched_verses() {
        let draft = AnnotationDraft::from_selection(
            &doc(),
            &selection(9, 24),
            AnnotationKind::Note,
            HighlightColor::Yellow,
            &ada(),
        )
        .unwrap();
        assert_eq!(draft.verse_numbers, vec![1, 2]);
        assert_eq!(draft.document_key, "genesis-1");
    }

    #[test]
    fn test_draft_rejects_out_of_range() {
        let sel = MappedSelection {
            text: String::new(),
            start_offset: 30,
            end_offset: 99,
        };
        let result = AnnotationDraft::from_selection(
            &doc(),
            &sel,
            AnnotationKind::Note,
            HighlightColor::Yellow,
            &ada(),
        );
        assert!(matches!(result, Err(CoreError::InvalidRange { .. })));
    }

    #[test]
    fn test_validation_by_kind() {
        let base = AnnotationDraft::from_selection(
            &doc(),
            &selection(9, 18),
            AnnotationKind::Combo,
            HighlightColor::Pink,
            &ada(),
        )
        .unwrap();

        let errors = base.validate();
        assert!(errors.contains_key("text"));
        assert!(errors.contains_key("url"));
        assert!(errors.contains_key("photoUrl"));

        let complete = base
            .with_text("light")
            .with_url("https://example.org")
            .with_photo_url("https://example.org/p.jpg");
        assert!(complete.validate().is_empty());
    }

    #[test]
    fn test_link_only_needs_url() {
        let draft = AnnotationDraft::from_selection(
            &doc(),
            &selection(0, 4),
            AnnotationKind::Link,
            HighlightColor::Blue,
            &ada(),
        )
        .unwrap()
        .with_url("https://example.org");
        assert!(draft.validate().is_empty());
    }

    #[test]
    fn test_into_annotation() {
        let draft = AnnotationDraft::from_selection(
            &doc(),
            &selection(9, 18),
            AnnotationKind::Note,
            HighlightColor::Yellow,
            &ada(),
        )
        .unwrap()
        .with_text("beginning");
        let annotation = draft.into_annotation("a1", Utc::now());
        assert_eq!(annotation.id, "a1");
        assert_eq!(annotation.verse_numbers, vec![1]);
        assert!(annotation.comments.is_empty());
    }
}
