//! Live-update client.
//!
//! One driver task owns the local [`AnnotationSet`], the WebSocket and the
//! reconnect [`Backoff`]. [`LiveClient`] is a cheap handle that talks to it
//! over channels:
//!
//! ```text
//!  LiveClient ──Command──►┐
//!                         │   ┌──────────── driver task ────────────┐
//!  facade task ─Settled──►├──►│ AnnotationSet   Backoff   ws stream │──► LiveEvent
//!                         │   └─────────────────────────────────────┘
//!  broker ──text frame───►┘                 │
//!                                           └──► watch<ConnectionState>
//! ```
//!
//! State machine: `disconnected → connecting → open → closed → connecting …`.
//! Reconnects are scheduled only from a close and never give up while the
//! client lives. [`LiveClient::close`] disposes of the driver.

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use marginalia_core::{
    Annotation, AnnotationDraft, AnnotationKind, AnnotationSet, Author, CollectionMode, Comment,
    CoreError, Highlight, PendingLike, Upsert,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::backoff::{Backoff, DEFAULT_BASE, DEFAULT_CEILING};
use crate::facade::{FacadeError, LikeResponse, StoreFacade, SubmitResponse};
use crate::protocol::{ChannelMessage, ProtocolError};

const EXCERPT_CHARS: usize = 80;

/// Upper bound on one health request, connect included.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Streaming endpoint, `ws://` or `wss://`.
    pub url: String,
    /// The reader this client acts for.
    pub user: Author,
    pub mode: CollectionMode,
    pub backoff_base: Duration,
    pub backoff_ceiling: Duration,
    /// Events buffered before new ones are dropped.
    pub event_capacity: usize,
    pub probe_timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, user: Author) -> Self {
        Self {
            url: url.into(),
            user,
            mode: CollectionMode::Document,
            backoff_base: DEFAULT_BASE,
            backoff_ceiling: DEFAULT_CEILING,
            event_capacity: 256,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_mode(mut self, mode: CollectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_backoff(mut self, base: Duration, ceiling: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_ceiling = ceiling;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }
}

/// Raised when someone else's annotation arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub annotation_id: String,
    pub author_name: String,
    pub kind: AnnotationKind,
    pub excerpt: String,
    pub document_key: String,
}

impl Notification {
    fn from_annotation(annotation: &Annotation) -> Self {
        Self {
            annotation_id: annotation.id.clone(),
            author_name: annotation.author_name.clone(),
            kind: annotation.kind,
            excerpt: annotation.text.chars().take(EXCERPT_CHARS).collect(),
            document_key: annotation.document_key.clone(),
        }
    }
}

/// Events emitted by the live-update client.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    StateChanged(ConnectionState),
    AnnotationUpserted { annotation_id: String, inserted: bool },
    CommentAdded { annotation_id: String, comment: Comment },
    LikeChanged { annotation_id: String, likes: usize },
    Notification(Notification),
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Non-fatal, user-visible problem.
    Warning(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Client is closed")]
    Closed,
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Facade(#[from] FacadeError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Apply one decoded message to `set`, returning the events it raises.
///
/// Comments and likes for annotations not held locally are ignored.
pub fn apply_message(
    set: &mut AnnotationSet,
    user: &Author,
    msg: ChannelMessage,
) -> Vec<LiveEvent> {
    let mut events = Vec::new();
    match msg {
        ChannelMessage::Annotation(annotation) => {
            let notification = (annotation.author_id != user.id)
                .then(|| Notification::from_annotation(&annotation));
            let annotation_id = annotation.id.clone();
            let inserted = set.upsert(*annotation) == Upsert::Inserted;
            events.push(LiveEvent::AnnotationUpserted {
                annotation_id,
                inserted,
            });
            if let Some(n) = notification {
                events.push(LiveEvent::Notification(n));
            }
        }
        ChannelMessage::Comment(ev) => {
            match set.append_comment(&ev.annotation_id, ev.comment.clone()) {
                Ok(()) => events.push(LiveEvent::CommentAdded {
                    annotation_id: ev.annotation_id,
                    comment: ev.comment,
                }),
                Err(e) => log::debug!("Dropping comment: {e}"),
            }
        }
        ChannelMessage::Like(ev) => match set.apply_like(&ev.annotation_id, ev.likes, ev.like) {
            Ok(()) => {
                let likes = set.get(&ev.annotation_id).map_or(0, |a| a.likes.len());
                events.push(LiveEvent::LikeChanged {
                    annotation_id: ev.annotation_id,
                    likes,
                });
            }
            Err(e) => log::debug!("Dropping like: {e}"),
        },
        ChannelMessage::Bookmark(_) => {}
    }
    events
}

/// Streaming URL with the `userId` query parameter set.
pub fn stream_url(base: &str, user_id: &str) -> Result<Url, ProtocolError> {
    let mut url = Url::parse(base)?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(ProtocolError::InvalidUrl(format!("unsupported scheme {other}"))),
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "userId")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("userId", user_id);
    Ok(url)
}

/// Health endpoint for a streaming URL: `ws→http`, `wss→https`, path `/health`.
pub fn health_url(stream: &str) -> Result<Url, ProtocolError> {
    let parsed = Url::parse(stream)?;
    let scheme = match parsed.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => return Err(ProtocolError::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    let host = parsed
        .host_str()
        .ok_or_else(|| ProtocolError::InvalidUrl("missing host".into()))?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(Url::parse(&format!("{scheme}://{authority}/health"))?)
}

/// Single request to the derived health endpoint, bounded by
/// `probe_timeout`. Any failure is `false`.
pub async fn health_check(stream: &str, probe_timeout: Duration) -> bool {
    let url = match health_url(stream) {
        Ok(url) => url,
        Err(e) => {
            log::warn!("Health check skipped: {e}");
            return false;
        }
    };
    let http = match reqwest::Client::builder().timeout(probe_timeout).build() {
        Ok(http) => http,
        Err(e) => {
            log::warn!("Health check skipped, no HTTP client: {e}");
            return false;
        }
    };
    match http.get(url.clone()).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            log::debug!("Health check against {url} failed: {e}");
            false
        }
    }
}

enum Command {
    Connect,
    Snapshot(oneshot::Sender<Vec<Annotation>>),
    Highlights(String, oneshot::Sender<Vec<Highlight>>),
    Seed(Vec<Annotation>),
    ToggleLike {
        annotation_id: String,
        reply: oneshot::Sender<Result<bool, CoreError>>,
    },
    ApplyEdit {
        annotation_id: String,
        text: String,
    },
    Warn(String),
    Close(oneshot::Sender<()>),
}

/// Results of facade calls made off the driver task.
enum Settled {
    Like {
        pending: PendingLike,
        result: Result<LikeResponse, FacadeError>,
    },
}

/// Handle to a running live-update client.
pub struct LiveClient {
    config: ClientConfig,
    facade: Arc<dyn StoreFacade>,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    event_rx: Option<mpsc::Receiver<LiveEvent>>,
}

impl LiveClient {
    /// Start the driver task in the `Disconnected` state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: ClientConfig, facade: Arc<dyn StoreFacade>) -> Self {
        let (commands, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            user: config.user.clone(),
            url: config.url.clone(),
            set: AnnotationSet::new(config.mode),
            backoff: Backoff::new(config.backoff_base, config.backoff_ceiling),
            facade: facade.clone(),
            likes_in_flight: HashMap::new(),
            state: state_tx,
            events: event_tx,
            commands: command_rx,
            settle_tx,
            settle_rx,
        };
        tokio::spawn(driver.run());

        Self {
            config,
            facade,
            commands,
            state,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<LiveEvent>> {
        self.event_rx.take()
    }

    /// Open the stream. Repeated calls while connected are ignored.
    pub async fn connect(&self) -> Result<(), ClientError> {
        stream_url(&self.config.url, &self.config.user.id)?;
        self.send(Command::Connect).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn user(&self) -> &Author {
        &self.config.user
    }

    /// Owned copy of the local collection.
    pub async fn snapshot(&self) -> Result<Vec<Annotation>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Overlay input for one document.
    pub async fn highlights(&self, document_key: &str) -> Result<Vec<Highlight>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Highlights(document_key.to_string(), tx)).await?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Replace the local collection with a full fetch.
    pub async fn seed(&self, annotations: Vec<Annotation>) -> Result<(), ClientError> {
        self.send(Command::Seed(annotations)).await
    }

    /// Optimistically flip the user's like. Returns the new local state.
    ///
    /// A store failure rolls the flip back and raises a warning event.
    pub async fn toggle_like(&self, annotation_id: &str) -> Result<bool, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ToggleLike {
            annotation_id: annotation_id.to_string(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| ClientError::Closed)??)
    }

    /// Submit a draft. Validation problems come back in the response and
    /// are also raised as a warning.
    pub async fn submit(&self, draft: AnnotationDraft) -> Result<SubmitResponse, ClientError> {
        match self.facade.submit_annotation(draft).await {
            Ok(response) => {
                if !response.is_success() {
                    self.send(Command::Warn(response.message.clone())).await?;
                }
                Ok(response)
            }
            Err(e) => {
                self.send(Command::Warn(e.to_string())).await?;
                Err(e.into())
            }
        }
    }

    /// Edit an annotation's body. Applied locally once the store accepts it.
    pub async fn edit(&self, annotation_id: &str, text: &str) -> Result<(), ClientError> {
        match self
            .facade
            .edit_annotation(annotation_id, text, &self.config.user)
            .await
        {
            Ok(_) => {
                self.send(Command::ApplyEdit {
                    annotation_id: annotation_id.to_string(),
                    text: text.to_string(),
                })
                .await
            }
            Err(e) => {
                self.send(Command::Warn(e.to_string())).await?;
                Err(e.into())
            }
        }
    }

    /// Post a comment. The comment shows up locally when the store's
    /// publish arrives.
    pub async fn comment(
        &self,
        annotation_id: &str,
        content: &str,
    ) -> Result<Option<Comment>, ClientError> {
        match self
            .facade
            .add_comment(annotation_id, content, &self.config.user)
            .await
        {
            Ok(response) => {
                if !response.is_success() {
                    self.send(Command::Warn(response.message.clone())).await?;
                }
                Ok(response.new_comment)
            }
            Err(e) => {
                self.send(Command::Warn(e.to_string())).await?;
                Err(e.into())
            }
        }
    }

    /// Probe the health endpoint derived from the configured URL.
    pub async fn health_check(&self) -> bool {
        health_check(&self.config.url, self.config.probe_timeout).await
    }

    /// Dispose of the client: close the socket and stop reconnecting.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, cmd: Command) -> Result<(), ClientError> {
        self.commands.send(cmd).await.map_err(|_| ClientError::Closed)
    }
}

struct Driver {
    user: Author,
    url: String,
    set: AnnotationSet,
    backoff: Backoff,
    facade: Arc<dyn StoreFacade>,
    /// One like request per annotation is with the store at a time; later
    /// toggles wait here in order.
    likes_in_flight: HashMap<String, VecDeque<PendingLike>>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::Sender<LiveEvent>,
    commands: mpsc::Receiver<Command>,
    settle_tx: mpsc::UnboundedSender<Settled>,
    settle_rx: mpsc::UnboundedReceiver<Settled>,
}

impl Driver {
    async fn run(mut self) {
        if let Some(done) = self.idle().await {
            self.dispose(done);
            return;
        }

        let url = match stream_url(&self.url, &self.user.id) {
            Ok(url) => url,
            Err(e) => {
                log::error!("Cannot connect: {e}");
                self.emit(LiveEvent::Warning(e.to_string()));
                self.dispose(None);
                return;
            }
        };

        loop {
            self.set_state(ConnectionState::Connecting);
            if let ControlFlow::Break(done) = self.connection(&url).await {
                self.dispose(done);
                return;
            }

            self.set_state(ConnectionState::Closed);
            let delay = self.backoff.next_delay();
            log::info!("Reconnecting in {delay:?} (attempt {})", self.backoff.retries());
            self.emit(LiveEvent::ReconnectScheduled {
                attempt: self.backoff.retries(),
                delay,
            });

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    cmd = self.commands.recv() => {
                        if let ControlFlow::Break(done) = self.command(cmd) {
                            self.dispose(done);
                            return;
                        }
                    }
                    Some(settled) = self.settle_rx.recv() => self.settle(settled),
                }
            }
        }
    }

    /// Serve commands until `Connect`. `Some` means the client went away.
    async fn idle(&mut self) -> Option<Option<oneshot::Sender<()>>> {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Connect) => return None,
                    other => {
                        if let ControlFlow::Break(done) = self.command(other) {
                            return Some(done);
                        }
                    }
                },
                Some(settled) = self.settle_rx.recv() => self.settle(settled),
            }
        }
    }

    /// One connection attempt, pumped until the stream closes.
    async fn connection(&mut self, url: &Url) -> ControlFlow<Option<oneshot::Sender<()>>> {
        let connecting = tokio_tungstenite::connect_async(url.as_str());
        tokio::pin!(connecting);

        let attempt = loop {
            tokio::select! {
                res = &mut connecting => break res,
                cmd = self.commands.recv() => self.command(cmd)?,
                Some(settled) = self.settle_rx.recv() => self.settle(settled),
            }
        };

        let mut ws = match attempt {
            Ok((ws, _)) => ws,
            Err(e) => {
                log::warn!("Connection to {url} failed: {e}");
                return ControlFlow::Continue(());
            }
        };

        self.backoff.reset();
        self.set_state(ConnectionState::Open);
        log::info!("Connected to {url}");

        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.frame(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        log::warn!("Stream error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
                cmd = self.commands.recv() => {
                    if let ControlFlow::Break(done) = self.command(cmd) {
                        let _ = ws.close(None).await;
                        return ControlFlow::Break(done);
                    }
                }
                Some(settled) = self.settle_rx.recv() => self.settle(settled),
            }
        }

        log::info!("Connection to {url} closed");
        ControlFlow::Continue(())
    }

    fn frame(&mut self, text: &str) {
        match ChannelMessage::decode(text) {
            Ok(msg) => {
                for event in apply_message(&mut self.set, &self.user, msg) {
                    self.emit(event);
                }
            }
            Err(e) => log::warn!("Discarding frame: {e}"),
        }
    }

    /// `Break` carries the close acknowledgement, `None` when every handle
    /// was dropped.
    fn command(&mut self, cmd: Option<Command>) -> ControlFlow<Option<oneshot::Sender<()>>> {
        let Some(cmd) = cmd else {
            return ControlFlow::Break(None);
        };
        match cmd {
            Command::Connect => log::debug!("Already connecting"),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.set.snapshot());
            }
            Command::Highlights(key, reply) => {
                let _ = reply.send(self.set.highlights(&key));
            }
            Command::Seed(annotations) => {
                log::debug!("Seeding {} annotations", annotations.len());
                self.set.replace_all(annotations);
            }
            Command::ToggleLike {
                annotation_id,
                reply,
            } => {
                let outcome = self.begin_like(&annotation_id);
                let _ = reply.send(outcome);
            }
            Command::ApplyEdit {
                annotation_id,
                text,
            } => {
                if let Err(e) = self.set.edit_text(&annotation_id, text) {
                    log::debug!("Edit not applied locally: {e}");
                }
            }
            Command::Warn(message) => self.emit(LiveEvent::Warning(message)),
            Command::Close(done) => return ControlFlow::Break(Some(done)),
        }
        ControlFlow::Continue(())
    }

    fn begin_like(&mut self, annotation_id: &str) -> Result<bool, CoreError> {
        let pending = self.set.begin_like_toggle(annotation_id, &self.user)?;
        let liked = pending.liked;
        self.emit_like_count(annotation_id);

        match self.likes_in_flight.get_mut(annotation_id) {
            Some(waiting) => {
                let ahead = waiting.len() + 1;
                log::debug!("Like on {annotation_id} queued behind {ahead} request(s)");
                waiting.push_back(pending);
            }
            None => {
                self.likes_in_flight.insert(annotation_id.to_string(), VecDeque::new());
                self.dispatch_like(pending);
            }
        }
        Ok(liked)
    }

    fn dispatch_like(&self, pending: PendingLike) {
        let facade = self.facade.clone();
        let actor = self.user.clone();
        let settle = self.settle_tx.clone();
        tokio::spawn(async move {
            let result = facade
                .toggle_like(&pending.annotation_id, pending.current.clone(), &actor)
                .await;
            let _ = settle.send(Settled::Like { pending, result });
        });
    }

    fn settle(&mut self, settled: Settled) {
        match settled {
            Settled::Like {
                pending,
                result: Ok(_),
            } => {
                let next = self
                    .likes_in_flight
                    .get_mut(&pending.annotation_id)
                    .and_then(VecDeque::pop_front);
                match next {
                    Some(next) => self.dispatch_like(next),
                    None => {
                        self.likes_in_flight.remove(&pending.annotation_id);
                    }
                }
            }
            Settled::Like {
                pending,
                result: Err(e),
            } => {
                // Queued toggles were built on the failed flip and go with it.
                let annotation_id = pending.annotation_id.clone();
                let dropped = self
                    .likes_in_flight
                    .remove(&annotation_id)
                    .map_or(0, |waiting| waiting.len());
                log::warn!("Like on {annotation_id} failed, {dropped} queued dropped: {e}");
                if let Err(e) = self.set.rollback_like(pending) {
                    log::debug!("Rollback skipped: {e}");
                }
                self.emit_like_count(&annotation_id);
                self.emit(LiveEvent::Warning(format!("Could not update like: {e}")));
            }
        }
    }

    fn emit_like_count(&self, annotation_id: &str) {
        if let Some(a) = self.set.get(annotation_id) {
            self.emit(LiveEvent::LikeChanged {
                annotation_id: annotation_id.to_string(),
                likes: a.likes.len(),
            });
        }
    }

    fn set_state(&self, next: ConnectionState) {
        if self.state.send_replace(next) != next {
            self.emit(LiveEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: LiveEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            log::debug!("Event queue full, dropping {event:?}");
        }
    }

    fn dispose(&mut self, done: Option<oneshot::Sender<()>>) {
        self.set_state(ConnectionState::Closed);
        log::info!("Live client for {} closed", self.user.id);
        if let Some(done) = done {
            let _ = done.send(());
        }
    }
}
