//! `marginalia render`: overlay a document with annotations from disk.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use marginalia_core::{Annotation, Document, Overlay, OverlaySegment};

pub fn load_document(path: &Path) -> Result<Document> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Document::from_json(&json).with_context(|| format!("parsing document {}", path.display()))
}

/// Annotations for every document; filtering happens at render time.
pub fn load_annotations(path: &Path) -> Result<Vec<Annotation>> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing annotations {}", path.display()))
}

/// Parse `START:END`.
pub fn parse_range(raw: &str) -> Result<(usize, usize)> {
    let Some((start, end)) = raw.split_once(':') else {
        bail!("expected START:END, got {raw:?}");
    };
    let start = start.trim().parse().context("selection start")?;
    let end = end.trim().parse().context("selection end")?;
    Ok((start, end))
}

pub fn overlay(
    document: &Document,
    annotations: &[Annotation],
    selection: Option<(usize, usize)>,
    markers: bool,
) -> Vec<OverlaySegment> {
    let highlights = annotations
        .iter()
        .filter(|a| a.document_key == document.key())
        .map(Annotation::highlight);

    let mut pass = if markers {
        Overlay::for_document(document)
    } else {
        Overlay::new(document.text())
    }
    .highlights(highlights);
    if let Some((start, end)) = selection {
        pass = pass.selection(start, end);
    }
    pass.render()
}

/// One line per segment: `[start, end) class "text"`.
pub fn format_segment(segment: &OverlaySegment) -> String {
    let class = match (segment.verse, segment.css_class()) {
        (Some(n), Some(class)) => format!("verse-{n} {class}"),
        (Some(n), None) => format!("verse-{n}"),
        (None, Some(class)) => class.to_string(),
        (None, None) => "-".to_string(),
    };
    format!("[{}, {}) {class} {:?}", segment.start, segment.end, segment.text)
}
