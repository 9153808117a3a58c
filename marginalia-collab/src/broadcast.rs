//! Fan-out of encoded channel messages to every connected reader.
//!
//! Uses a tokio broadcast channel so one publish reaches all subscribers.
//! Each reader gets an independent receiver that buffers up to `capacity`
//! frames; a reader that falls further behind loses frames, which the
//! protocol tolerates (at-most-once delivery).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ChannelMessage, ProtocolError};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_readers: usize,
}

/// One connected reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderInfo {
    pub connection_id: Uuid,
    pub user_id: String,
}

impl ReaderInfo {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            user_id: user_id.into(),
        }
    }
}

/// Stats kept in atomics so publishing never takes a lock.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<String>>,
    readers: Arc<RwLock<HashMap<Uuid, ReaderInfo>>>,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` frames are buffered per reader before it starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            readers: Arc::new(RwLock::new(HashMap::new())),
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Register a reader and return its receiver.
    pub async fn add_reader(&self, info: ReaderInfo) -> broadcast::Receiver<Arc<String>> {
        let mut readers = self.readers.write().await;
        readers.insert(info.connection_id, info);
        self.sender.subscribe()
    }

    pub async fn remove_reader(&self, connection_id: &Uuid) -> Option<ReaderInfo> {
        self.readers.write().await.remove(connection_id)
    }

    /// Encode once and send to every reader, the author's own included.
    ///
    /// Returns the number of receivers that got the frame.
    pub fn publish(&self, msg: &ChannelMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.publish_raw(Arc::new(encoded)))
    }

    /// Send a pre-encoded frame.
    pub fn publish_raw(&self, encoded: Arc<String>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for frames a lagging reader skipped.
    pub fn record_dropped(&self, skipped: u64) {
        self.atomic_stats
            .messages_dropped
            .fetch_add(skipped, Ordering::Relaxed);
    }

    pub async fn reader_count(&self) -> usize {
        self.readers.read().await.len()
    }

    /// Whether `user_id` has at least one open connection.
    pub async fn is_online(&self, user_id: &str) -> bool {
        self.readers
            .read()
            .await
            .values()
            .any(|r| r.user_id == user_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        let readers = self.readers.read().await;
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_readers: readers.len(),
        }
    }

    /// Raw receiver not tracked as a reader.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<String>> {
        self.sender.subscribe()
    }
}
