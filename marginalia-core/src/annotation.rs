//! Annotation model: highlighted ranges with their comments and likes.
//!
//! Field names serialize in camelCase to match the live-update wire
//! contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::overlay::Highlight;

/// What an annotation carries besides its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Note,
    Link,
    Photo,
    /// Note, link and photo together.
    Combo,
}

/// Highlight colors offered to readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    Yellow,
    Green,
    Blue,
    Pink,
    Purple,
}

impl HighlightColor {
    pub const ALL: [HighlightColor; 5] = [
        HighlightColor::Yellow,
        HighlightColor::Green,
        HighlightColor::Blue,
        HighlightColor::Pink,
        HighlightColor::Purple,
    ];

    /// CSS class used by the rendering layer.
    pub fn css_class(&self) -> &'static str {
        match self {
            HighlightColor::Yellow => "highlight-yellow",
            HighlightColor::Green => "highlight-green",
            HighlightColor::Blue => "highlight-blue",
            HighlightColor::Pink => "highlight-pink",
            HighlightColor::Purple => "highlight-purple",
        }
    }
}

/// The acting reader. Always present once the core is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: String,
    pub name: String,
}

impl Author {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

impl Comment {
    pub fn new(author: &Author, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: author.id.clone(),
            author_name: author.name.clone(),
            timestamp: Utc::now(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub timestamp: DateTime<Utc>,
}

impl Like {
    pub fn new(author: &Author) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: author.id.clone(),
            author_name: author.name.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// A persisted highlight over `[start_offset, end_offset)` of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(alias = "_id")]
    pub id: String,
    pub document_key: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub kind: AnnotationKind,
    pub color: HighlightColor,
    /// Body text. The only field that is ever edited.
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub likes: Vec<Like>,
    /// Segments intersecting the range, fixed at creation.
    #[serde(default, alias = "touchedSegments")]
    pub verse_numbers: Vec<u32>,
}

impl Annotation {
    /// Whether the range is valid for a document of `len` characters.
    pub fn fits(&self, len: usize) -> bool {
        self.start_offset < self.end_offset && self.end_offset <= len
    }

    pub fn highlight(&self) -> Highlight {
        Highlight {
            id: self.id.clone(),
            start: self.start_offset,
            end: self.end_offset,
            color: self.color,
        }
    }

    pub fn like_by(&self, author_id: &str) -> Option<&Like> {
        self.likes.iter().find(|l| l.author_id == author_id)
    }

    pub fn is_liked_by(&self, author_id: &str) -> bool {
        self.like_by(author_id).is_some()
    }

    /// Add a like, replacing any previous like by the same author.
    pub fn add_like(&mut self, like: Like) {
        self.likes.retain(|l| l.author_id != like.author_id);
        self.likes.push(like);
    }

    /// Remove every like by `author_id`. Returns how many were removed.
    pub fn remove_likes_by(&mut self, author_id: &str) -> usize {
        let before = self.likes.len();
        self.likes.retain(|l| l.author_id != author_id);
        before - self.likes.len()
    }
}
