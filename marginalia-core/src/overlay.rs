//! Interval overlay engine.
//!
//! Turns a linearized text plus any number of possibly overlapping or
//! nested highlights into a flat run of render segments:
//!
//! ```text
//! text:      0 1 2 3 4 5 6 7 8 9 . . . . . 15
//! A [0,10):  ████████████████████
//! B [5,15):            ████████████████████
//!
//! segments:  ├── A ───┤├─ A,B ─┤├─── B ────┤
//! innermost:      A        B         B
//! ```
//!
//! The sweep visits every boundary in ascending order. At a boundary the
//! accumulated run is flushed, then all closes are applied, then all
//! opens (in input order). The innermost annotation is the top of the
//! stack, i.e. whichever opened last.
//!
//! Verse-number markers and the transient live selection add boundaries
//! of their own but never touch the stack.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::annotation::HighlightColor;
use crate::document::{char_boundaries, Document};
use crate::verses::VerseMarker;

/// CSS class for the transient live selection.
pub const SELECTION_CLASS: &str = "highlight-selection";

/// One highlighted interval as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: String,
    pub start: usize,
    pub end: usize,
    pub color: HighlightColor,
}

impl Highlight {
    pub fn new(id: impl Into<String>, start: usize, end: usize, color: HighlightColor) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            color,
        }
    }
}

/// A maximal run of text sharing the same overlay state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySegment {
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// Innermost open annotation.
    pub active: Option<String>,
    /// Color of the innermost open annotation.
    pub color: Option<HighlightColor>,
    /// Every open annotation, outermost first.
    pub covering: Vec<String>,
    /// Inside the transient live selection.
    pub selected: bool,
    /// Set when this segment is a verse-number token.
    pub verse: Option<u32>,
}

impl OverlaySegment {
    /// Class the rendering layer should apply. The live selection wins.
    pub fn css_class(&self) -> Option<&'static str> {
        if self.selected {
            Some(SELECTION_CLASS)
        } else {
            self.color.map(|c| c.css_class())
        }
    }

    pub fn is_marker(&self) -> bool {
        self.verse.is_some()
    }

    fn continues(&self, other: &OverlaySegment) -> bool {
        self.verse.is_none()
            && other.verse.is_none()
            && self.end == other.start
            && self.selected == other.selected
            && self.active == other.active
            && self.covering == other.covering
    }
}

#[derive(Default)]
struct Events {
    closes: Vec<usize>,
    opens: Vec<usize>,
}

/// Builder for one overlay pass.
///
/// ```
/// use marginalia_core::{HighlightColor, Overlay};
///
/// let segments = Overlay::new("hello world")
///     .highlight("a", 6, 11, HighlightColor::Green)
///     .render();
/// assert_eq!(segments.len(), 2);
/// assert_eq!(segments[1].active.as_deref(), Some("a"));
/// ```
#[derive(Debug, Clone)]
pub struct Overlay<'a> {
    text: &'a str,
    highlights: Vec<Highlight>,
    markers: Vec<VerseMarker>,
    selection: Option<(usize, usize)>,
}

impl<'a> Overlay<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            highlights: Vec::new(),
            markers: Vec::new(),
            selection: None,
        }
    }

    /// Start from a document: its text and verse markers.
    pub fn for_document(document: &'a Document) -> Self {
        Self::new(document.text()).markers(document.verse_markers())
    }

    pub fn highlight(
        mut self,
        id: impl Into<String>,
        start: usize,
        end: usize,
        color: HighlightColor,
    ) -> Self {
        self.highlights.push(Highlight::new(id, start, end, color));
        self
    }

    pub fn highlights(mut self, highlights: impl IntoIterator<Item = Highlight>) -> Self {
        self.highlights.extend(highlights);
        self
    }

    pub fn markers(mut self, markers: impl IntoIterator<Item = VerseMarker>) -> Self {
        self.markers.extend(markers);
        self
    }

    /// Overlay the user's in-progress selection.
    pub fn selection(mut self, start: usize, end: usize) -> Self {
        self.selection = Some((start, end));
        self
    }

    /// Run the sweep.
    pub fn render(&self) -> Vec<OverlaySegment> {
        let bounds = char_boundaries(self.text);
        let len = bounds.len() - 1;

        let highlights: Vec<&Highlight> = self
            .highlights
            .iter()
            .filter(|h| {
                let ok = h.start < h.end && h.end <= len;
                if !ok {
                    log::debug!(
                        "Dropping highlight {} [{}, {}) outside text of {len} chars",
                        h.id,
                        h.start,
                        h.end
                    );
                }
                ok
            })
            .collect();

        let mut markers: Vec<VerseMarker> = self
            .markers
            .iter()
            .copied()
            .filter(|m| m.start < m.end && m.end <= len)
            .collect();
        markers.sort_by_key(|m| m.start);

        let selection = self.selection.filter(|&(s, e)| s < e && e <= len);

        let mut events: BTreeMap<usize, Events> = BTreeMap::new();
        for (idx, h) in highlights.iter().enumerate() {
            events.entry(h.start).or_default().opens.push(idx);
            events.entry(h.end).or_default().closes.push(idx);
        }

        let mut cuts: BTreeSet<usize> = events.keys().copied().collect();
        for m in &markers {
            cuts.insert(m.start);
            cuts.insert(m.end);
        }
        if let Some((s, e)) = selection {
            cuts.insert(s);
            cuts.insert(e);
        }
        cuts.insert(len);

        let mut stack: Vec<usize> = Vec::new();
        let mut segments: Vec<OverlaySegment> = Vec::new();
        let mut cursor = 0;

        for cut in cuts {
            if cut > cursor {
                let segment = OverlaySegment {
                    start: cursor,
                    end: cut,
                    text: self.text[bounds[cursor]..bounds[cut]].to_string(),
                    active: stack.last().map(|&i| highlights[i].id.clone()),
                    color: stack.last().map(|&i| highlights[i].color),
                    covering: stack.iter().map(|&i| highlights[i].id.clone()).collect(),
                    selected: selection.is_some_and(|(s, e)| s <= cursor && cut <= e),
                    verse: markers
                        .iter()
                        .find(|m| m.start <= cursor && cut <= m.end)
                        .map(|m| m.verse),
                };
                push_merged(&mut segments, segment);
                cursor = cut;
            }

            if let Some(ev) = events.get(&cut) {
                for idx in &ev.closes {
                    if let Some(pos) = stack.iter().rposition(|i| i == idx) {
                        stack.remove(pos);
                    }
                }
                stack.extend(ev.opens.iter().copied());
            }
        }

        segments
    }
}

fn push_merged(segments: &mut Vec<OverlaySegment>, segment: OverlaySegment) {
    if let Some(last) = segments.last_mut() {
        if last.continues(&segment) {
            last.end = segment.end;
            last.text.push_str(&segment.text);
            return;
        }
    }
    segments.push(segment);
}

/// Render `text` with `highlights` and nothing else.
pub fn render(text: &str, highlights: &[Highlight]) -> Vec<OverlaySegment> {
    Overlay::new(text)
        .highlights(highlights.iter().cloned())
        .render()
}
