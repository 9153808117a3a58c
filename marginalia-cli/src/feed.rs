//! Request feed for `marginalia broker`.
//!
//! The broker's stream is one-way, so writes reach its in-memory store
//! through standard input instead: one JSON request per line.
//!
//! ```text
//! {"op":"submit","documentKey":"genesis-1","startOffset":9,"endOffset":18,"kind":"note",
//!  "color":"yellow","text":"in principio","authorId":"ada","authorName":"Ada"}
//! {"op":"comment","annotationId":"…","content":"nice","author":{"id":"grace","name":"Grace"}}
//! {"op":"like","annotationId":"…","author":{"id":"grace","name":"Grace"}}
//! ```
//!
//! Every accepted request is stored and published to connected readers.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use marginalia_collab::{MemoryStore, StoreFacade};
use marginalia_core::{AnnotationDraft, Author};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FeedRequest {
    Submit(AnnotationDraft),
    #[serde(rename_all = "camelCase")]
    Comment {
        annotation_id: String,
        content: String,
        author: Author,
    },
    /// Flips the author's like.
    #[serde(rename_all = "camelCase")]
    Like {
        annotation_id: String,
        author: Author,
    },
}

pub fn parse_request(line: &str) -> Result<FeedRequest> {
    serde_json::from_str(line).context("malformed request")
}

/// Apply one request, returning a line for the log.
pub async fn apply(store: &MemoryStore, request: FeedRequest) -> Result<String> {
    match request {
        FeedRequest::Submit(draft) => {
            let response = store.submit_annotation(draft).await?;
            match response.inserted_id {
                Some(id) => Ok(format!("stored annotation {id}")),
                None => bail!("{}: {:?}", response.message, response.errors),
            }
        }
        FeedRequest::Comment {
            annotation_id,
            content,
            author,
        } => {
            let response = store.add_comment(&annotation_id, &content, &author).await?;
            match response.new_comment {
                Some(comment) => Ok(format!("comment {} on {annotation_id}", comment.id)),
                None => bail!("{}: {:?}", response.message, response.errors),
            }
        }
        FeedRequest::Like {
            annotation_id,
            author,
        } => {
            let current = store
                .get(&annotation_id)
                .await
                .and_then(|a| a.like_by(&author.id).cloned());
            let response = store.toggle_like(&annotation_id, current, &author).await?;
            Ok(format!("{} on {annotation_id}", response.message))
        }
    }
}

/// Apply every line of `reader` until it ends. Bad lines are logged and
/// skipped. Returns the number of requests applied.
pub async fn pump<R>(reader: R, store: &MemoryStore) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut applied = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let outcome = match parse_request(line) {
            Ok(request) => apply(store, request).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(summary) => {
                info!("Feed: {summary}");
                applied += 1;
            }
            Err(e) => warn!("Feed request skipped: {e:#}"),
        }
    }
    Ok(applied)
}
