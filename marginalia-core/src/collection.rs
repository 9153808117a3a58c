//! Local annotation collection.
//!
//! Owned by exactly one live-update client and mutated only from its
//! task queue. Rendering works on snapshots taken from here.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, Author, Comment, Like};
use crate::error::CoreError;
use crate::overlay::Highlight;

/// How new annotations are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMode {
    /// Newest first.
    Feed,
    /// Ordered by start offset.
    Document,
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
}

/// Bookkeeping for an in-flight optimistic like/unlike.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLike {
    pub annotation_id: String,
    /// Like set before the flip, restored on failure.
    pub prior: Vec<Like>,
    /// The actor's like before the flip, if any. Sent to the store.
    pub current: Option<Like>,
    /// State after the flip.
    pub liked: bool,
}

#[derive(Debug, Clone)]
pub struct AnnotationSet {
    mode: CollectionMode,
    items: Vec<Annotation>,
}

impl AnnotationSet {
    pub fn new(mode: CollectionMode) -> Self {
        Self {
            mode,
            items: Vec::new(),
        }
    }

    /// Seed from a full fetch, replacing everything held locally.
    pub fn replace_all(&mut self, annotations: Vec<Annotation>) {
        self.items = annotations;
        if self.mode == CollectionMode::Document {
            self.sort();
        }
    }

    pub fn mode(&self) -> CollectionMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Annotation> {
        self.items.iter().find(|a| a.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Annotation> {
        self.items.iter_mut().find(|a| a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.items.iter()
    }

    /// Owned copy for rendering.
    pub fn snapshot(&self) -> Vec<Annotation> {
        self.items.clone()
    }

    /// Highlights for one document, in collection order.
    pub fn highlights(&self, document_key: &str) -> Vec<Highlight> {
        self.items
            .iter()
            .filter(|a| a.document_key == document_key)
            .map(Annotation::highlight)
            .collect()
    }

    /// Insert or replace by id.
    pub fn upsert(&mut self, annotation: Annotation) -> Upsert {
        if let Some(existing) = self.get_mut(&annotation.id) {
            *existing = annotation;
            if self.mode == CollectionMode::Document {
                self.sort();
            }
            return Upsert::Replaced;
        }

        match self.mode {
            CollectionMode::Feed => self.items.insert(0, annotation),
            CollectionMode::Document => {
                self.items.push(annotation);
                self.sort();
            }
        }
        Upsert::Inserted
    }

    fn sort(&mut self) {
        self.items.sort_by_key(|a| a.start_offset);
    }

    /// Append a comment. Repeated delivery appends again.
    pub fn append_comment(
        &mut self,
        annotation_id: &str,
        comment: Comment,
    ) -> Result<(), CoreError> {
        let annotation = self
            .get_mut(annotation_id)
            .ok_or_else(|| CoreError::AnnotationNotFound(annotation_id.to_string()))?;
        annotation.comments.push(comment);
        Ok(())
    }

    /// Apply a like (`liked == true`) or remove every like by the acting
    /// author (`liked == false`).
    pub fn apply_like(
        &mut self,
        annotation_id: &str,
        liked: bool,
        like: Like,
    ) -> Result<(), CoreError> {
        let annotation = self
            .get_mut(annotation_id)
            .ok_or_else(|| CoreError::AnnotationNotFound(annotation_id.to_string()))?;
        if liked {
            annotation.add_like(like);
        } else {
            annotation.remove_likes_by(&like.author_id);
        }
        Ok(())
    }

    /// Replace the body text. Last write wins.
    pub fn edit_text(
        &mut self,
        annotation_id: &str,
        text: impl Into<String>,
    ) -> Result<(), CoreError> {
        let annotation = self
            .get_mut(annotation_id)
            .ok_or_else(|| CoreError::AnnotationNotFound(annotation_id.to_string()))?;
        annotation.text = text.into();
        Ok(())
    }

    /// Flip `actor`'s like on an annotation immediately.
    ///
    /// The returned [`PendingLike`] must be handed to
    /// [`rollback_like`](Self::rollback_like) if the store rejects it.
    pub fn begin_like_toggle(
        &mut self,
        annotation_id: &str,
        actor: &Author,
    ) -> Result<PendingLike, CoreError> {
        let annotation = self
            .get_mut(annotation_id)
            .ok_or_else(|| CoreError::AnnotationNotFound(annotation_id.to_string()))?;

        let prior = annotation.likes.clone();
        let current = annotation.like_by(&actor.id).cloned();
        let liked = current.is_none();
        if liked {
            annotation.add_like(Like {
                id: format!("pending-{}", uuid::Uuid::new_v4()),
                author_id: actor.id.clone(),
                author_name: actor.name.clone(),
                timestamp: Utc::now(),
            });
        } else {
            annotation.remove_likes_by(&actor.id);
        }

        Ok(PendingLike {
            annotation_id: annotation_id.to_string(),
            prior,
            current,
            liked,
        })
    }

    /// Restore the like set captured by `pending`.
    pub fn rollback_like(&mut self, pending: PendingLike) -> Result<(), CoreError> {
        let annotation = self
            .get_mut(&pending.annotation_id)
            .ok_or(CoreError::AnnotationNotFound(pending.annotation_id))?;
        annotation.likes = pending.prior;
        Ok(())
    }
}

impl Default for AnnotationSet {
    fn default() -> Self {
        Self::new(CollectionMode::Document)
    }
}
