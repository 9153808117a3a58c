//! JSON wire protocol for live annotation updates.
//!
//! Every frame is a text WebSocket message carrying a channel name and a
//! JSON document encoded *as a string*:
//!
//! ```text
//! { "channel": "comments",
//!   "data": "{\"annotationId\":\"a1\",\"comment\":{…}}" }
//! ```
//!
//! | channel       | decoded `data`                                   |
//! |---------------|--------------------------------------------------|
//! | `annotations` | full annotation                                  |
//! | `comments`    | `{ annotationId, comment }`                      |
//! | `likes`       | `{ annotationId, likes: bool, like }`            |
//! | `bookmarks`   | opaque; reserved for reading-along presence      |
//!
//! Delivery is at-most-once with no acknowledgement.

use marginalia_core::{Annotation, Comment, Like};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logical channel of a live-update message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Annotations,
    Comments,
    Likes,
    Bookmarks,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Annotations => "annotations",
            Channel::Comments => "comments",
            Channel::Likes => "likes",
            Channel::Bookmarks => "bookmarks",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outer frame as it travels over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub channel: Channel,
    /// JSON-encoded payload.
    pub data: String,
}

/// Payload of the `comments` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentEvent {
    pub annotation_id: String,
    pub comment: Comment,
}

/// Payload of the `likes` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeEvent {
    pub annotation_id: String,
    /// `true` adds `like`, `false` removes every like by its author.
    pub likes: bool,
    pub like: Like,
}

/// A decoded live-update message.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Annotation(Box<Annotation>),
    Comment(CommentEvent),
    Like(LikeEvent),
    Bookmark(serde_json::Value),
}

impl ChannelMessage {
    pub fn annotation(annotation: Annotation) -> Self {
        Self::Annotation(Box::new(annotation))
    }

    pub fn comment(annotation_id: impl Into<String>, comment: Comment) -> Self {
        Self::Comment(CommentEvent {
            annotation_id: annotation_id.into(),
            comment,
        })
    }

    pub fn like(annotation_id: impl Into<String>, likes: bool, like: Like) -> Self {
        Self::Like(LikeEvent {
            annotation_id: annotation_id.into(),
            likes,
            like,
        })
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Annotation(_) => Channel::Annotations,
            Self::Comment(_) => Channel::Comments,
            Self::Like(_) => Channel::Likes,
            Self::Bookmark(_) => Channel::Bookmarks,
        }
    }

    /// Wrap into a frame with the payload string-encoded.
    pub fn to_wire(&self) -> Result<WireMessage, ProtocolError> {
        let data = match self {
            Self::Annotation(a) => serde_json::to_string(a),
            Self::Comment(c) => serde_json::to_string(c),
            Self::Like(l) => serde_json::to_string(l),
            Self::Bookmark(v) => serde_json::to_string(v),
        }
        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;

        Ok(WireMessage {
            channel: self.channel(),
            data,
        })
    }

    /// Decode the string payload of a frame.
    pub fn from_wire(wire: &WireMessage) -> Result<Self, ProtocolError> {
        let de = |e: serde_json::Error| {
            ProtocolError::Deserialization(format!("{}: {e}", wire.channel))
        };
        match wire.channel {
            Channel::Annotations => Ok(Self::annotation(
                serde_json::from_str(&wire.data).map_err(de)?,
            )),
            Channel::Comments => Ok(Self::Comment(serde_json::from_str(&wire.data).map_err(de)?)),
            Channel::Likes => Ok(Self::Like(serde_json::from_str(&wire.data).map_err(de)?)),
            Channel::Bookmarks => Ok(Self::Bookmark(
                serde_json::from_str(&wire.data)
                    .unwrap_or_else(|_| serde_json::Value::String(wire.data.clone())),
            )),
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(&self.to_wire()?)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let wire: WireMessage =
            serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Self::from_wire(&wire)
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

impl From<url::ParseError> for ProtocolError {
    fn from(e: url::ParseError) -> Self {
        ProtocolError::InvalidUrl(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marginalia_core::{AnnotationKind, Author, HighlightColor};

    fn annotation() -> Annotation {
        Annotation {
            id: "a1".into(),
            document_key: "genesis-1".into(),
            start_offset: 9,
            end_offset: 18,
            kind: AnnotationKind::Note,
            color: HighlightColor::Yellow,
            text: "beginning".into(),
            url: None,
            photo_url: None,
            author_id: "u1".into(),
            author_name: "Ada".into(),
            created_at: Utc::now(),
            comments: Vec::new(),
            likes: Vec::new(),
            verse_numbers: vec![1],
        }
    }

    #[test]
    fn test_data_is_string_encoded() {
        let msg = ChannelMessage::annotation(annotation());
        let frame: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(frame["channel"], "annotations");
        let data = frame["data"].as_str().expect("data must be a string");
        let inner: serde_json::Value = serde_json::from_str(data).unwrap();
        assert_eq!(inner["id"], "a1");
        assert_eq!(inner["startOffset"], 9);
    }

    #[test]
    fn test_decode_comment_frame_from_broker() {
        let frame = r#"{"channel":"comments","data":"{\"annotationId\":\"a1\",\"comment\":{\"id\":\"c1\",\"authorId\":\"u2\",\"authorName\":\"Grace\",\"timestamp\":\"2024-03-01T10:00:00Z\",\"content\":\"nice\"}}"}"#;
        match ChannelMessage::decode(frame).unwrap() {
            ChannelMessage::Comment(ev) => {
                assert_eq!(ev.annotation_id, "a1");
                assert_eq!(ev.comment.content, "nice");
            }
            other => panic!("expected comment, got {other:?}"),
        }
    }

    #[test]
    fn test_like_event_fields() {
        let like = marginalia_core::Like::new(&Author::new("u2", "Grace"));
        let msg = ChannelMessage::like("a1", false, like);
        let wire = msg.to_wire().unwrap();
        assert_eq!(wire.channel, Channel::Likes);
        let inner: serde_json::Value = serde_json::from_str(&wire.data).unwrap();
        assert_eq!(inner["likes"], false);
        assert_eq!(inner["annotationId"], "a1");
        assert_eq!(inner["like"]["authorId"], "u2");
    }

    #[test]
    fn test_bookmarks_payload_is_opaque() {
        let frame = r#"{"channel":"bookmarks","data":"not json at all"}"#;
        assert_eq!(
            ChannelMessage::decode(frame).unwrap(),
            ChannelMessage::Bookmark(serde_json::Value::String("not json at all".into()))
        );
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let frame = r#"{"channel":"presence","data":"{}"}"#;
        assert!(matches!(
            ChannelMessage::decode(frame),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let frame = r#"{"channel":"likes","data":"{\"annotationId\":1}"}"#;
        assert!(ChannelMessage::decode(frame).is_err());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(ChannelMessage::decode("\u{0}\u{1}").is_err());
    }
}
