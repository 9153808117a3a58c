//! Integration tests for end-to-end live updates.
//!
//! These tests start a real broker and connect real clients, verifying the
//! store → broker → client pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use marginalia_collab::facade::{
    CommentResponse, EditResponse, FacadeError, LikeResponse, StoreFacade, SubmitResponse,
};
use marginalia_collab::{
    health_check, Broker, BrokerConfig, ChannelMessage, ClientConfig, ConnectionState, LiveClient,
    LiveEvent, MemoryStore, DEFAULT_PROBE_TIMEOUT,
};
use marginalia_core::{
    render, Annotation, AnnotationDraft, AnnotationKind, Author, Comment, Document, HighlightColor,
    Like, MappedSelection, Segment,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

const WAIT: Duration = Duration::from_secs(5);

/// Start a broker on a free port, return it and its stream URL.
async fn start_broker() -> (Broker, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = Broker::new(BrokerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
    });
    let serving = broker.clone();
    tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });
    (broker, format!("ws://127.0.0.1:{port}/"))
}

/// The broker registers a reader just after the handshake completes.
async fn wait_for_readers(broker: &Broker, n: usize) {
    timeout(WAIT, async {
        while broker.group().reader_count().await != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("readers never registered");
}

async fn connect(
    url: &str,
    user: Author,
    facade: Arc<dyn StoreFacade>,
) -> (LiveClient, mpsc::Receiver<LiveEvent>) {
    let config = ClientConfig::new(url, user)
        .with_backoff(Duration::from_millis(20), Duration::from_millis(200));
    let mut client = LiveClient::spawn(config, facade);
    let events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    let mut state = client.watch_state();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Open))
        .await
        .expect("client never opened")
        .unwrap();
    (client, events)
}

async fn next_matching<F>(events: &mut mpsc::Receiver<LiveEvent>, mut pred: F) -> LiveEvent
where
    F: FnMut(&LiveEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

fn genesis() -> Document {
    Document::chapter(
        "genesis-1",
        vec![
            Segment::new(1, "In the beginning"),
            Segment::new(2, "God created"),
        ],
    )
}

fn note_on_beginning(doc: &Document, author: &Author) -> AnnotationDraft {
    let selection = MappedSelection {
        text: "beginning".into(),
        start_offset: 9,
        end_offset: 18,
    };
    AnnotationDraft::from_selection(
        doc,
        &selection,
        AnnotationKind::Note,
        HighlightColor::Yellow,
        author,
    )
    .unwrap()
    .with_text("in principio")
}

#[tokio::test]
async fn test_health_check_against_broker() {
    let (broker, url) = start_broker().await;
    assert!(health_check(&url, DEFAULT_PROBE_TIMEOUT).await);
    assert_eq!(broker.stats().await.health_checks, 1);
}

#[tokio::test]
async fn test_health_check_closed_port_is_false() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let url = format!("ws://127.0.0.1:{port}/");
    assert!(!health_check(&url, DEFAULT_PROBE_TIMEOUT).await);
}

#[tokio::test]
async fn test_raw_frames_carry_string_encoded_data() {
    let (broker, url) = start_broker().await;
    let store = MemoryStore::with_publisher(broker.group());

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{url}?userId=raw"))
        .await
        .unwrap();
    wait_for_readers(&broker, 1).await;
    assert!(broker.group().is_online("raw").await);

    let doc = genesis();
    store
        .submit_annotation(note_on_beginning(&doc, &Author::new("ada", "Ada")))
        .await
        .unwrap();

    let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let text = frame.into_text().unwrap();
    let outer: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(outer["channel"], "annotations");
    let inner: serde_json::Value = serde_json::from_str(outer["data"].as_str().unwrap()).unwrap();
    assert_eq!(inner["startOffset"], 9);
    assert_eq!(inner["verseNumbers"], serde_json::json!([1]));
}

#[tokio::test]
async fn test_end_to_end_annotation_then_comment() {
    let (broker, url) = start_broker().await;
    let store = Arc::new(MemoryStore::with_publisher(broker.group()));
    let ada = Author::new("ada", "Ada");
    let doc = genesis();
    assert_eq!(doc.text(), "1 In the beginning\n\n2 God created");

    let (client, mut events) = connect(&url, ada.clone(), store.clone()).await;
    wait_for_readers(&broker, 1).await;

    let response = client.submit(note_on_beginning(&doc, &ada)).await.unwrap();
    assert!(response.is_success());
    let id = response.inserted_id.unwrap();
    next_matching(&mut events, |e| matches!(e, LiveEvent::AnnotationUpserted { .. })).await;

    client.comment(&id, "nice").await.unwrap();
    next_matching(&mut events, |e| matches!(e, LiveEvent::CommentAdded { .. })).await;

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].comments.len(), 1);
    assert_eq!(snapshot[0].comments[0].content, "nice");

    let highlights = client.highlights("genesis-1").await.unwrap();
    let segments = render(doc.text(), &highlights);
    let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["1 In the ", "beginning", "\n\n2 God created"]);
    assert_eq!(segments[1].active.as_deref(), Some(id.as_str()));
    assert_eq!(segments[1].css_class(), Some("highlight-yellow"));

    client.close().await;
}

#[tokio::test]
async fn test_other_readers_are_notified() {
    let (broker, url) = start_broker().await;
    let store = Arc::new(MemoryStore::with_publisher(broker.group()));
    let ada = Author::new("ada", "Ada");
    let grace = Author::new("grace", "Grace");

    let (ada_client, mut ada_events) = connect(&url, ada.clone(), store.clone()).await;
    let (_grace_client, mut grace_events) = connect(&url, grace, store.clone()).await;
    wait_for_readers(&broker, 2).await;

    ada_client
        .submit(note_on_beginning(&genesis(), &ada))
        .await
        .unwrap();

    match next_matching(&mut grace_events, |e| matches!(e, LiveEvent::Notification(_))).await {
        LiveEvent::Notification(n) => {
            assert_eq!(n.author_name, "Ada");
            assert_eq!(n.excerpt, "in principio");
            assert_eq!(n.document_key, "genesis-1");
        }
        other => panic!("unexpected {other:?}"),
    }

    // The author's own upsert arrives without a notification.
    next_matching(&mut ada_events, |e| matches!(e, LiveEvent::AnnotationUpserted { .. })).await;
    assert!(!matches!(ada_events.try_recv(), Ok(LiveEvent::Notification(_))));
}

#[tokio::test]
async fn test_duplicate_comment_delivery_appends_twice() {
    let (broker, url) = start_broker().await;
    let store = Arc::new(MemoryStore::new());
    let ada = Author::new("ada", "Ada");

    let seeded = note_on_beginning(&genesis(), &ada).into_annotation("a1", chrono::Utc::now());
    let (client, mut events) = connect(&url, ada.clone(), store).await;
    client.seed(vec![seeded]).await.unwrap();
    assert_eq!(client.snapshot().await.unwrap().len(), 1);
    wait_for_readers(&broker, 1).await;

    let frame = Arc::new(
        ChannelMessage::comment("a1", Comment::new(&ada, "nice"))
            .encode()
            .unwrap(),
    );
    broker.group().publish_raw(frame.clone());
    broker.group().publish_raw(frame);

    for _ in 0..2 {
        next_matching(&mut events, |e| matches!(e, LiveEvent::CommentAdded { .. })).await;
    }
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot[0].comments.len(), 2);
    assert_eq!(snapshot[0].comments[0], snapshot[0].comments[1]);
}

#[tokio::test]
async fn test_reconnects_after_broker_drops_connection() {
    let (broker, url) = start_broker().await;
    let store = Arc::new(MemoryStore::with_publisher(broker.group()));
    let ada = Author::new("ada", "Ada");

    let (client, mut events) = connect(&url, ada.clone(), store.clone()).await;
    wait_for_readers(&broker, 1).await;

    assert_eq!(broker.disconnect_all(), 1);
    match next_matching(&mut events, |e| matches!(e, LiveEvent::ReconnectScheduled { .. })).await {
        LiveEvent::ReconnectScheduled { attempt, delay } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay, Duration::from_millis(20));
        }
        other => panic!("unexpected {other:?}"),
    }

    let mut state = client.watch_state();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Open))
        .await
        .unwrap()
        .unwrap();
    timeout(WAIT, async {
        while broker.stats().await.total_connections < 2
            || broker.group().reader_count().await != 1
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Nothing is replayed, but new publishes arrive on the fresh connection.
    client.submit(note_on_beginning(&genesis(), &ada)).await.unwrap();
    next_matching(&mut events, |e| matches!(e, LiveEvent::AnnotationUpserted { .. })).await;
    assert_eq!(broker.stats().await.total_connections, 2);

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_unreachable_broker_keeps_retrying() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = ClientConfig::new(format!("ws://127.0.0.1:{port}/"), Author::new("ada", "Ada"))
        .with_backoff(Duration::from_millis(5), Duration::from_millis(20));
    let mut client = LiveClient::spawn(config, Arc::new(MemoryStore::new()));
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();

    let mut attempts = Vec::new();
    while attempts.len() < 4 {
        if let LiveEvent::ReconnectScheduled { attempt, delay } =
            next_matching(&mut events, |e| matches!(e, LiveEvent::ReconnectScheduled { .. })).await
        {
            attempts.push((attempt, delay.as_millis()));
        }
    }
    assert_eq!(attempts, vec![(1, 5), (2, 10), (3, 20), (4, 20)]);
    client.close().await;
}

#[tokio::test]
async fn test_like_confirmed_by_store_publish() {
    let (broker, url) = start_broker().await;
    let store = Arc::new(MemoryStore::with_publisher(broker.group()));
    let ada = Author::new("ada", "Ada");

    let (client, mut events) = connect(&url, ada.clone(), store.clone()).await;
    wait_for_readers(&broker, 1).await;
    let id = client
        .submit(note_on_beginning(&genesis(), &ada))
        .await
        .unwrap()
        .inserted_id
        .unwrap();
    next_matching(&mut events, |e| matches!(e, LiveEvent::AnnotationUpserted { .. })).await;

    assert!(client.toggle_like(&id).await.unwrap());
    // Local flip, then the store's publish.
    for _ in 0..2 {
        next_matching(&mut events, |e| matches!(e, LiveEvent::LikeChanged { likes: 1, .. })).await;
    }
    let local = client.snapshot().await.unwrap()[0].likes.clone();
    let stored = store.get(&id).await.unwrap().likes;
    assert_eq!(local, stored);

    assert!(!client.toggle_like(&id).await.unwrap());
    next_matching(&mut events, |e| matches!(e, LiveEvent::LikeChanged { likes: 0, .. })).await;
    client.close().await;
}

/// Persists nothing and refuses every like.
struct FlakyStore;

#[async_trait]
impl StoreFacade for FlakyStore {
    async fn submit_annotation(&self, _: AnnotationDraft) -> Result<SubmitResponse, FacadeError> {
        Err(FacadeError::Unavailable("down".into()))
    }

    async fn edit_annotation(
        &self,
        _: &str,
        _: &str,
        _: &Author,
    ) -> Result<EditResponse, FacadeError> {
        Ok(EditResponse {
            message: "Annotation updated".into(),
        })
    }

    async fn add_comment(
        &self,
        _: &str,
        _: &str,
        _: &Author,
    ) -> Result<CommentResponse, FacadeError> {
        Err(FacadeError::Rejected("comments closed".into()))
    }

    async fn toggle_like(
        &self,
        _: &str,
        _: Option<Like>,
        _: &Author,
    ) -> Result<LikeResponse, FacadeError> {
        Err(FacadeError::Unavailable("timeout".into()))
    }
}

fn seeded_with_likes(likes: Vec<Like>) -> Annotation {
    let mut a = note_on_beginning(&genesis(), &Author::new("grace", "Grace"))
        .into_annotation("a1", chrono::Utc::now());
    a.likes = likes;
    a
}

#[tokio::test]
async fn test_failed_unlike_restores_exact_prior_likes() {
    let (_broker, url) = start_broker().await;
    let ada = Author::new("ada", "Ada");
    let prior = vec![Like::new(&ada), Like::new(&Author::new("grace", "Grace"))];

    let (client, mut events) = connect(&url, ada.clone(), Arc::new(FlakyStore)).await;
    client.seed(vec![seeded_with_likes(prior.clone())]).await.unwrap();

    assert!(!client.toggle_like("a1").await.unwrap());
    next_matching(&mut events, |e| matches!(e, LiveEvent::Warning(_))).await;
    assert_eq!(client.snapshot().await.unwrap()[0].likes, prior);
    client.close().await;
}

#[tokio::test]
async fn test_facade_failures_surface_as_warnings() {
    let (_broker, url) = start_broker().await;
    let ada = Author::new("ada", "Ada");
    let (client, mut events) = connect(&url, ada.clone(), Arc::new(FlakyStore)).await;
    client.seed(vec![seeded_with_likes(Vec::new())]).await.unwrap();

    assert!(client.submit(note_on_beginning(&genesis(), &ada)).await.is_err());
    next_matching(&mut events, |e| matches!(e, LiveEvent::Warning(_))).await;

    assert!(client.comment("a1", "hello").await.is_err());
    match next_matching(&mut events, |e| matches!(e, LiveEvent::Warning(_))).await {
        LiveEvent::Warning(message) => assert!(message.contains("comments closed")),
        other => panic!("unexpected {other:?}"),
    }

    // Edits apply locally once the store accepts them.
    client.edit("a1", "rewritten").await.unwrap();
    assert_eq!(client.snapshot().await.unwrap()[0].text, "rewritten");
    client.close().await;
}
