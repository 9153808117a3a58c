//! In-memory [`StoreFacade`] that publishes through a [`BroadcastGroup`].
//!
//! ```text
//! submit / edit / comment / like
//!         │
//!         ▼
//!   MemoryStore ──► HashMap<id, Annotation>
//!         │
//!         └──► BroadcastGroup::publish ──► every connected client
//! ```
//!
//! Persistence and publish happen under one write lock so readers never
//! observe a stored change whose message was not yet sent. Messages are
//! encoded before anything is stored; a change that cannot be published is
//! not kept.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use marginalia_core::{Annotation, AnnotationDraft, Author, Comment, FieldErrors, Like};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::broadcast::BroadcastGroup;
use crate::facade::{
    CommentResponse, EditResponse, FacadeError, LikeResponse, StoreFacade, SubmitResponse,
};
use crate::protocol::{Channel, ChannelMessage};

type Frame = (Channel, Arc<String>);

#[derive(Default)]
pub struct MemoryStore {
    annotations: RwLock<HashMap<String, Annotation>>,
    publisher: Option<Arc<BroadcastGroup>>,
}

impl MemoryStore {
    /// A store that persists but publishes nowhere.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publisher(publisher: Arc<BroadcastGroup>) -> Self {
        Self {
            annotations: RwLock::new(HashMap::new()),
            publisher: Some(publisher),
        }
    }

    /// Encode `msg` for the publisher, if there is one.
    fn encode(&self, msg: &ChannelMessage) -> Result<Option<Frame>, FacadeError> {
        match &self.publisher {
            Some(_) => Ok(Some((msg.channel(), Arc::new(msg.encode()?)))),
            None => Ok(None),
        }
    }

    fn publish(&self, frame: Option<Frame>) {
        if let (Some(group), Some((channel, encoded))) = (&self.publisher, frame) {
            let delivered = group.publish_raw(encoded);
            log::debug!("Published {channel} message to {delivered} readers");
        }
    }

    /// Full fetch of one document's annotations, oldest first.
    pub async fn list(&self, document_key: &str) -> Vec<Annotation> {
        let mut found: Vec<Annotation> = self
            .annotations
            .read()
            .await
            .values()
            .filter(|a| a.document_key == document_key)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        found
    }

    pub async fn get(&self, annotation_id: &str) -> Option<Annotation> {
        self.annotations.read().await.get(annotation_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.annotations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.annotations.read().await.is_empty()
    }
}

#[async_trait]
impl StoreFacade for MemoryStore {
    async fn submit_annotation(
        &self,
        draft: AnnotationDraft,
    ) -> Result<SubmitResponse, FacadeError> {
        let errors = draft.validate();
        if !errors.is_empty() {
            log::debug!("Rejected draft with {} field errors", errors.len());
            return Ok(SubmitResponse {
                inserted_id: None,
                errors,
                message: "Please correct the highlighted fields".into(),
            });
        }

        let id = Uuid::new_v4().simple().to_string();
        let annotation = draft.into_annotation(id.clone(), Utc::now());
        let frame = self.encode(&ChannelMessage::annotation(annotation.clone()))?;

        let mut annotations = self.annotations.write().await;
        annotations.insert(id.clone(), annotation);
        self.publish(frame);
        log::info!("Stored annotation {id}");

        Ok(SubmitResponse {
            inserted_id: Some(id),
            errors: FieldErrors::new(),
            message: "Annotation saved".into(),
        })
    }

    async fn edit_annotation(
        &self,
        annotation_id: &str,
        text: &str,
        _actor: &Author,
    ) -> Result<EditResponse, FacadeError> {
        let mut annotations = self.annotations.write().await;
        let annotation = annotations
            .get_mut(annotation_id)
            .ok_or_else(|| FacadeError::NotFound(annotation_id.to_string()))?;
        let mut updated = annotation.clone();
        updated.text = text.to_string();
        let frame = self.encode(&ChannelMessage::annotation(updated.clone()))?;
        *annotation = updated;
        self.publish(frame);

        Ok(EditResponse {
            message: "Annotation updated".into(),
        })
    }

    async fn add_comment(
        &self,
        annotation_id: &str,
        content: &str,
        actor: &Author,
    ) -> Result<CommentResponse, FacadeError> {
        if content.trim().is_empty() {
            let mut errors = FieldErrors::new();
            errors.insert("content".into(), "Comment cannot be empty".into());
            return Ok(CommentResponse {
                new_comment: None,
                errors,
                message: "Please correct the highlighted fields".into(),
            });
        }

        let mut annotations = self.annotations.write().await;
        let annotation = annotations
            .get_mut(annotation_id)
            .ok_or_else(|| FacadeError::NotFound(annotation_id.to_string()))?;
        let comment = Comment::new(actor, content);
        let frame = self.encode(&ChannelMessage::comment(annotation_id, comment.clone()))?;
        annotation.comments.push(comment.clone());
        self.publish(frame);

        Ok(CommentResponse {
            new_comment: Some(comment),
            errors: FieldErrors::new(),
            message: "Comment added".into(),
        })
    }

    async fn toggle_like(
        &self,
        annotation_id: &str,
        current: Option<Like>,
        actor: &Author,
    ) -> Result<LikeResponse, FacadeError> {
        let mut annotations = self.annotations.write().await;
        let annotation = annotations
            .get_mut(annotation_id)
            .ok_or_else(|| FacadeError::NotFound(annotation_id.to_string()))?;

        match current {
            Some(like) => {
                let frame = self.encode(&ChannelMessage::like(annotation_id, false, like))?;
                annotation.remove_likes_by(&actor.id);
                self.publish(frame);
                Ok(LikeResponse {
                    new_like: None,
                    message: "Like removed".into(),
                })
            }
            None => {
                let like = Like::new(actor);
                let frame = self.encode(&ChannelMessage::like(annotation_id, true, like.clone()))?;
                annotation.add_like(like.clone());
                self.publish(frame);
                Ok(LikeResponse {
                    new_like: Some(like),
                    message: "Liked".into(),
                })
            }
        }
    }
}
