//! Store facade: durable CRUD plus fan-out publish.
//!
//! The live-update client only depends on this request/response contract.
//! Every successful call is expected to persist *and* publish the matching
//! channel message; the client never publishes on its own.

use async_trait::async_trait;
use marginalia_core::{AnnotationDraft, Author, Comment, FieldErrors, Like};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::ProtocolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// Set when the draft was stored.
    pub inserted_id: Option<String>,
    /// Field-level validation problems; empty on success.
    #[serde(default)]
    pub errors: FieldErrors,
    pub message: String,
}

impl SubmitResponse {
    pub fn is_success(&self) -> bool {
        self.inserted_id.is_some() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResponse {
    pub new_comment: Option<Comment>,
    #[serde(default)]
    pub errors: FieldErrors,
    pub message: String,
}

impl CommentResponse {
    pub fn is_success(&self) -> bool {
        self.new_comment.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    /// The stored like when liking; `None` after an unlike.
    pub new_like: Option<Like>,
    pub message: String,
}

#[derive(Error, Debug, Clone)]
pub enum FacadeError {
    #[error("Annotation not found: {0}")]
    NotFound(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Publish failed: {0}")]
    Publish(#[from] ProtocolError),
}

#[async_trait]
pub trait StoreFacade: Send + Sync {
    async fn submit_annotation(
        &self,
        draft: AnnotationDraft,
    ) -> Result<SubmitResponse, FacadeError>;

    async fn edit_annotation(
        &self,
        annotation_id: &str,
        text: &str,
        actor: &Author,
    ) -> Result<EditResponse, FacadeError>;

    async fn add_comment(
        &self,
        annotation_id: &str,
        content: &str,
        actor: &Author,
    ) -> Result<CommentResponse, FacadeError>;

    /// Like when `current` is `None`, otherwise remove `current`.
    async fn toggle_like(
        &self,
        annotation_id: &str,
        current: Option<Like>,
        actor: &Author,
    ) -> Result<LikeResponse, FacadeError>;
}

/// A facade for read-only readers: every mutation is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyStore;

#[async_trait]
impl StoreFacade for ReadOnlyStore {
    async fn submit_annotation(&self, _: AnnotationDraft) -> Result<SubmitResponse, FacadeError> {
        Err(read_only())
    }

    async fn edit_annotation(
        &self,
        _: &str,
        _: &str,
        _: &Author,
    ) -> Result<EditResponse, FacadeError> {
        Err(read_only())
    }

    async fn add_comment(
        &self,
        _: &str,
        _: &str,
        _: &Author,
    ) -> Result<CommentResponse, FacadeError> {
        Err(read_only())
    }

    async fn toggle_like(
        &self,
        _: &str,
        _: Option<Like>,
        _: &Author,
    ) -> Result<LikeResponse, FacadeError> {
        Err(read_only())
    }
}

fn read_only() -> FacadeError {
    FacadeError::Unavailable("read-only session".into())
}
