//! Offset mapper: rendered selections → logical offsets.
//!
//! The rendering layer splits the linearized text into text nodes
//! (overlay segments, verse markers, …). A raw selection names a node and
//! a char offset within it for each end. Mapping walks every node in order
//! with a running counter; the rendered markup between nodes contributes
//! nothing, so the result is an offset pair in the logical text.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::overlay::OverlaySegment;

/// Default quiet period before a selection is mapped.
pub const DEFAULT_SELECTION_DEBOUNCE: Duration = Duration::from_millis(10);

/// A position inside one rendered text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoint {
    pub node: usize,
    pub offset: usize,
}

impl NodePoint {
    pub fn new(node: usize, offset: usize) -> Self {
        Self { node, offset }
    }
}

/// A selection as reported by the rendering layer. `anchor` may come
/// after `focus` when the user dragged backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSelection {
    pub anchor: NodePoint,
    pub focus: NodePoint,
}

impl RawSelection {
    pub fn new(anchor: NodePoint, focus: NodePoint) -> Self {
        Self { anchor, focus }
    }
}

/// A selection in logical coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedSelection {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Map a raw selection over `nodes` to logical offsets.
///
/// Returns `None` for empty selections and for points naming a node that
/// does not exist. Offsets past the end of a node are clamped to it.
pub fn map_selection<S: AsRef<str>>(
    nodes: &[S],
    selection: &RawSelection,
) -> Option<MappedSelection> {
    let mut counter = 0;
    let mut anchor = None;
    let mut focus = None;

    for (i, node) in nodes.iter().enumerate() {
        let len = node.as_ref().chars().count();
        if i == selection.anchor.node {
            anchor = Some(counter + selection.anchor.offset.min(len));
        }
        if i == selection.focus.node {
            focus = Some(counter + selection.focus.offset.min(len));
        }
        counter += len;
    }

    let (anchor, focus) = match (anchor, focus) {
        (Some(a), Some(f)) => (a, f),
        _ => {
            log::debug!("Selection points at a node outside the rendered view");
            return None;
        }
    };

    let start = anchor.min(focus);
    let end = anchor.max(focus);
    if start == end {
        return None;
    }

    let text = nodes
        .iter()
        .flat_map(|n| n.as_ref().chars())
        .skip(start)
        .take(end - start)
        .collect();

    Some(MappedSelection {
        text,
        start_offset: start,
        end_offset: end,
    })
}

/// Text nodes of a rendered overlay, in order.
pub fn segment_nodes(segments: &[OverlaySegment]) -> Vec<&str> {
    segments.iter().map(|s| s.text.as_str()).collect()
}

/// Trailing-edge debounce for selection events.
///
/// Every [`push`](Self::push) restarts the quiet period; [`poll`](Self::poll)
/// hands back the latest value once the period has elapsed.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Record a new event, replacing and re-arming any pending one.
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    /// When the pending value becomes ready.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, at)| *at + self.delay)
    }

    /// Take the pending value if its quiet period is over.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.pending.take().map(|(v, _)| v),
            _ => None,
        }
    }

    /// Take the pending value without waiting out the quiet period.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(v, _)| v)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl<T> Default for Debouncer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_SELECTION_DEBOUNCE)
    }
}
