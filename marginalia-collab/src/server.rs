//! WebSocket broker: fans published channel messages out to every reader.
//!
//! ```text
//! MemoryStore ──publish──► BroadcastGroup ──┬──► ws  ?userId=ada
//!                                           ├──► ws  ?userId=grace
//!                                           └──► ws  ?userId=linus
//!
//! GET /health ──► 200 ok   (same port, plain HTTP)
//! ```
//!
//! Readers connect to `ws://host:port/?userId=<id>`. The broker never
//! reads application data from clients; the stream is one-directional.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::{BroadcastGroup, ReaderInfo};

const HEALTH_REQUEST: &[u8] = b"GET /health";
const HEALTH_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok";

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per reader before it lags
    pub broadcast_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// Broker statistics.
#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub frames_delivered: u64,
    pub health_checks: u64,
}

#[derive(Clone)]
pub struct Broker {
    config: BrokerConfig,
    group: Arc<BroadcastGroup>,
    stats: Arc<RwLock<BrokerStats>>,
    /// Fired to make every open connection close.
    kick: broadcast::Sender<()>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let group = Arc::new(BroadcastGroup::new(config.broadcast_capacity));
        let (kick, _) = broadcast::channel(4);
        Self {
            config,
            group,
            stats: Arc::new(RwLock::new(BrokerStats::default())),
            kick,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BrokerConfig::default())
    }

    /// The group a store publishes into.
    pub fn group(&self) -> Arc<BroadcastGroup> {
        self.group.clone()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub async fn stats(&self) -> BrokerStats {
        self.stats.read().await.clone()
    }

    /// Close every open connection. Readers will reconnect on their own.
    pub fn disconnect_all(&self) -> usize {
        self.kick.send(()).unwrap_or(0)
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        log::info!("Broker listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let group = self.group.clone();
            let stats = self.stats.clone();
            let kick = self.kick.subscribe();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, group, stats, kick).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        group: Arc<BroadcastGroup>,
        stats: Arc<RwLock<BrokerStats>>,
        mut kick: broadcast::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut head = [0u8; 16];
        let n = stream.peek(&mut head).await?;
        if head[..n].starts_with(HEALTH_REQUEST) {
            stats.write().await.health_checks += 1;
            // Drain the request head so closing does not reset the socket.
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request).await?;
            stream.write_all(HEALTH_RESPONSE).await?;
            stream.shutdown().await?;
            return Ok(());
        }

        let mut user_id: Option<String> = None;
        let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            user_id = user_id_from_query(req.uri().query());
            Ok(resp)
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, capture).await?;
        let user_id = user_id.unwrap_or_else(|| "anonymous".to_string());
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let reader = ReaderInfo::new(user_id.clone());
        let connection_id = reader.connection_id;
        let mut rx = group.add_reader(reader).await;

        log::info!("Reader {user_id} connected from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::warn!("Stream error from {user_id}: {e}");
                            break;
                        }
                        Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                            log::debug!("Ignoring client frame from {user_id}");
                        }
                        Some(Ok(_)) => {}
                    }
                }

                frame = rx.recv() => {
                    match frame {
                        Ok(encoded) => {
                            ws_sender.send(Message::text(encoded.as_str().to_owned())).await?;
                            stats.write().await.frames_delivered += 1;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("Reader {user_id} lagged, {skipped} frames dropped");
                            group.record_dropped(skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                _ = kick.recv() => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        group.remove_reader(&connection_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Reader {user_id} disconnected");
        Ok(())
    }
}

/// Extract `userId` from a query string.
fn user_id_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == "userId")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
