//! `marginalia demo`: two readers annotating Genesis 1 against a local broker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;
use marginalia_collab::{
    settle, Broker, BrokerConfig, ClientConfig, ConnectionState, LiveClient, LiveEvent,
    MemoryStore,
};
use marginalia_core::{
    map_selection, AnnotationDraft, AnnotationKind, Author, Debouncer, Document, HighlightColor,
    NodePoint, Overlay, RawSelection, Segment,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::render::format_segment;

const STEP: Duration = Duration::from_secs(5);

fn genesis() -> Document {
    Document::chapter(
        "genesis-1",
        vec![
            Segment::new(1, "In the beginning God created the heaven and the earth."),
            Segment::new(2, "And the earth was without form, and void."),
            Segment::new(3, "And God said, Let there be light: and there was light."),
        ],
    )
}

async fn open(
    url: &str,
    user: Author,
    store: Arc<MemoryStore>,
) -> Result<(LiveClient, mpsc::Receiver<LiveEvent>)> {
    let mut client = LiveClient::spawn(ClientConfig::new(url, user), store);
    let events = client
        .take_event_rx()
        .context("event receiver already taken")?;
    client.connect().await?;
    let mut state = client.watch_state();
    timeout(STEP, state.wait_for(|s| *s == ConnectionState::Open))
        .await
        .context("timed out connecting")??;
    Ok((client, events))
}

async fn wait_for<F>(
    events: &mut mpsc::Receiver<LiveEvent>,
    what: &str,
    mut pred: F,
) -> Result<LiveEvent>
where
    F: FnMut(&LiveEvent) -> bool,
{
    let found = timeout(STEP, async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .with_context(|| format!("timed out waiting for {what}"))?;
    found.with_context(|| format!("event stream ended before {what}"))
}

pub async fn run() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let broker = Broker::new(BrokerConfig {
        bind_addr: addr.to_string(),
        ..BrokerConfig::default()
    });
    let serving = broker.clone();
    tokio::spawn(async move {
        if let Err(e) = serving.serve(listener).await {
            log::error!("Broker stopped: {e}");
        }
    });

    let url = format!("ws://{addr}/");
    let store = Arc::new(MemoryStore::with_publisher(broker.group()));
    let ada = Author::new("ada", "Ada");
    let grace = Author::new("grace", "Grace");

    let (ada_client, mut ada_events) = open(&url, ada.clone(), store.clone()).await?;
    let (grace_client, mut grace_events) = open(&url, grace.clone(), store.clone()).await?;
    while broker.group().reader_count().await < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    info!("Two readers connected to {url}");

    // Ada drags across "God created the heaven" in the first verse; only
    // the selection she stops on gets mapped.
    let document = genesis();
    let nodes = [document.text()];
    let (drag_tx, mut drag_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        for focus in (23..=41).step_by(6) {
            let raw = RawSelection::new(NodePoint::new(0, 19), NodePoint::new(0, focus));
            if drag_tx.send(raw).await.is_err() {
                break;
            }
        }
    });
    let raw = settle(&mut drag_rx, &mut Debouncer::default())
        .await
        .context("drag ended without a selection")?;
    let selection = map_selection(&nodes, &raw).context("selection outside the document")?;
    println!(
        "Ada selected {:?} [{}, {})",
        selection.text, selection.start_offset, selection.end_offset
    );

    let draft = AnnotationDraft::from_selection(
        &document,
        &selection,
        AnnotationKind::Note,
        HighlightColor::Blue,
        &ada,
    )?
    .with_text("Creation ex nihilo");
    let response = ada_client.submit(draft).await?;
    let Some(id) = response.inserted_id else {
        bail!("submission rejected: {:?}", response.errors);
    };

    let notified = wait_for(&mut grace_events, "notification", |e| {
        matches!(e, LiveEvent::Notification(_))
    })
    .await?;
    if let LiveEvent::Notification(n) = notified {
        println!("Grace was notified: {} wrote {:?}", n.author_name, n.excerpt);
    }

    grace_client.comment(&id, "Beautiful opening").await?;
    grace_client.toggle_like(&id).await?;
    wait_for(&mut ada_events, "comment", |e| matches!(e, LiveEvent::CommentAdded { .. })).await?;
    wait_for(&mut ada_events, "like", |e| matches!(e, LiveEvent::LikeChanged { .. })).await?;

    let snapshot = ada_client.snapshot().await?;
    for annotation in &snapshot {
        println!(
            "{} by {} on verses {:?}: {} comment(s), {} like(s)",
            annotation.id,
            annotation.author_name,
            annotation.verse_numbers,
            annotation.comments.len(),
            annotation.likes.len()
        );
    }

    let segments = Overlay::for_document(&document)
        .highlights(ada_client.highlights(document.key()).await?)
        .render();
    for segment in &segments {
        println!("{}", format_segment(segment));
    }

    ada_client.close().await;
    grace_client.close().await;
    let stats = broker.stats().await;
    info!(
        "Demo finished: {} connections, {} frames delivered",
        stats.total_connections, stats.frames_delivered
    );
    Ok(())
}
