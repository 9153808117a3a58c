//! Verse locator.
//!
//! Each verse occupies `len(n) + 1 + len(text) + 2` characters of the
//! linearized chapter: its number, a space, its text and the trailing
//! separator. Spans therefore tile the document with no gaps, so any
//! non-empty selection inside the document touches at least one verse.

use serde::{Deserialize, Serialize};

use crate::document::{Segment, SEPARATOR_LEN};

/// Absolute span `[start, end)` of one verse (or paragraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersePosition {
    pub start: usize,
    pub end: usize,
    pub verse: u32,
    /// Length of the verse-number token; zero for paragraphs.
    pub marker_len: usize,
}

impl VersePosition {
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    /// The verse-number token at the head of this span.
    pub fn marker(&self) -> VerseMarker {
        VerseMarker {
            start: self.start,
            end: self.start + self.marker_len,
            verse: self.verse,
        }
    }
}

/// A verse-number token, rendered as its own overlay segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseMarker {
    pub start: usize,
    pub end: usize,
    pub verse: u32,
}

/// Spans of numbered verses.
pub fn positions(verses: &[Segment]) -> Vec<VersePosition> {
    let mut cursor = 0;
    verses
        .iter()
        .map(|v| {
            let marker_len = v.id.to_string().chars().count();
            let len = marker_len + 1 + v.text.chars().count() + SEPARATOR_LEN;
            let pos = VersePosition {
                start: cursor,
                end: cursor + len,
                verse: v.id,
                marker_len,
            };
            cursor += len;
            pos
        })
        .collect()
}

/// Spans of unnumbered paragraphs.
pub fn paragraph_positions(paragraphs: &[Segment]) -> Vec<VersePosition> {
    let mut cursor = 0;
    paragraphs
        .iter()
        .map(|p| {
            let len = p.text.chars().count() + SEPARATOR_LEN;
            let pos = VersePosition {
                start: cursor,
                end: cursor + len,
                verse: p.id,
                marker_len: 0,
            };
            cursor += len;
            pos
        })
        .collect()
}

/// Verse numbers whose span overlaps the selection `[start, end)`.
///
/// A verse is touched when the selection starts inside it, ends inside it,
/// or covers it entirely. Result is in verse order.
pub fn verses_touched_by(start: usize, end: usize, positions: &[VersePosition]) -> Vec<u32> {
    if start >= end {
        return Vec::new();
    }
    positions
        .iter()
        .filter(|p| {
            let starts_inside = p.contains(start);
            let ends_inside = p.start < end && end <= p.end;
            let contained = start <= p.start && p.end <= end;
            starts_inside || ends_inside || contained
        })
        .map(|p| p.verse)
        .collect()
}
