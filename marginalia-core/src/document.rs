//! Linearized documents: the coordinate space for every offset.
//!
//! A document is an ordered list of segments (verses of a chapter, or
//! paragraphs of an introduction) concatenated once, at construction,
//! into a single immutable string:
//!
//! ```text
//! chapter:       "1 In the beginning\n\n2 God created"
//!                 ├─ verse 1 ──────────┤├─ verse 2 ───┤
//! introduction:  "First paragraph\n\nSecond paragraph"
//! ```
//!
//! All offsets are counted in `char`s of that string, never bytes.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::verses::{self, VerseMarker, VersePosition};

/// Separator placed between consecutive segments.
pub const SEPARATOR: &str = "\n\n";

/// Length of [`SEPARATOR`] in characters.
pub const SEPARATOR_LEN: usize = 2;

/// What a document's segments are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Numbered verses, rendered as `"<n> <text>"`.
    Chapter,
    /// Plain paragraphs, rendered verbatim.
    Introduction,
}

/// One verse or paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub text: String,
}

impl Segment {
    pub fn new(id: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// Serialized form of a document, as loaded from static content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSource {
    pub key: String,
    pub kind: DocumentKind,
    pub segments: Vec<Segment>,
}

/// An immutable, linearized document.
#[derive(Debug, Clone)]
pub struct Document {
    key: String,
    kind: DocumentKind,
    segments: Vec<Segment>,
    text: String,
    /// Byte index of every char boundary, plus the final `text.len()`.
    boundaries: Vec<usize>,
    positions: Vec<VersePosition>,
}

impl Document {
    /// Build a chapter from numbered verses.
    pub fn chapter(key: impl Into<String>, verses: Vec<Segment>) -> Self {
        let text = verses
            .iter()
            .map(|v| format!("{} {}", v.id, v.text))
            .collect::<Vec<_>>()
            .join(SEPARATOR);
        let positions = verses::positions(&verses);
        Self::assemble(key.into(), DocumentKind::Chapter, verses, text, positions)
    }

    /// Build an introduction from paragraphs; ids are assigned from 1.
    pub fn introduction<I, S>(key: impl Into<String>, paragraphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<Segment> = paragraphs
            .into_iter()
            .enumerate()
            .map(|(i, p)| Segment::new(i as u32 + 1, p))
            .collect();
        Self::from_paragraphs(key, segments)
    }

    fn from_paragraphs(key: impl Into<String>, segments: Vec<Segment>) -> Self {
        let text = segments
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(SEPARATOR);
        let positions = verses::paragraph_positions(&segments);
        Self::assemble(
            key.into(),
            DocumentKind::Introduction,
            segments,
            text,
            positions,
        )
    }

    /// Build from the serialized source form.
    pub fn from_source(source: DocumentSource) -> Self {
        match source.kind {
            DocumentKind::Chapter => Self::chapter(source.key, source.segments),
            DocumentKind::Introduction => Self::from_paragraphs(source.key, source.segments),
        }
    }

    /// Parse a JSON [`DocumentSource`].
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let source: DocumentSource = serde_json::from_str(json)?;
        Ok(Self::from_source(source))
    }

    fn assemble(
        key: String,
        kind: DocumentKind,
        segments: Vec<Segment>,
        text: String,
        positions: Vec<VersePosition>,
    ) -> Self {
        let boundaries = char_boundaries(&text);
        Self {
            key,
            kind,
            segments,
            text,
            boundaries,
            positions,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The linearized text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spans of every segment, in document order.
    pub fn positions(&self) -> &[VersePosition] {
        &self.positions
    }

    /// Verse-number tokens. Empty for introductions.
    pub fn verse_markers(&self) -> Vec<VerseMarker> {
        match self.kind {
            DocumentKind::Chapter => self.positions.iter().map(VersePosition::marker).collect(),
            DocumentKind::Introduction => Vec::new(),
        }
    }

    /// Segment ids touched by `[start, end)`.
    pub fn touched_by(&self, start: usize, end: usize) -> Vec<u32> {
        verses::verses_touched_by(start, end, &self.positions)
    }

    /// Text of the char range `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Result<&str, CoreError> {
        if start > end || end > self.len() {
            return Err(CoreError::InvalidRange {
                start,
                end,
                len: self.len(),
            });
        }
        Ok(&self.text[self.boundaries[start]..self.boundaries[end]])
    }
}

/// Byte offsets of each char in `text`, followed by `text.len()`.
pub(crate) fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}
