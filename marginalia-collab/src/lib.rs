//! # marginalia-collab: live annotation updates for Marginalia
//!
//! Keeps every reader's local annotation collection in step with the store
//! over a one-way WebSocket stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  StoreFacade calls   ┌─────────────┐
//! │ LiveClient  │ ───────────────────► │ MemoryStore │
//! │ (per reader)│                      │ (persist)   │
//! └──────▲──────┘                      └──────┬──────┘
//!        │                                    │ publish
//!        │   JSON text frames                 ▼
//!        │   {channel, data}          ┌───────────────┐
//!        └─────────────────────────── │ Broker        │
//!                                     │ BroadcastGroup│
//!                                     └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: channel messages and their string-in-JSON framing
//! - [`backoff`]: exponential reconnect delay
//! - [`client`]: the live-update client and its driver task
//! - [`debounce`]: async settling of rapid selection changes
//! - [`facade`]: the store request/response contract
//! - [`store`]: in-memory store that publishes every mutation
//! - [`broadcast`]: fan-out to connected readers
//! - [`server`]: WebSocket broker with a `/health` endpoint

pub mod backoff;
pub mod broadcast;
pub mod client;
pub mod debounce;
pub mod facade;
pub mod protocol;
pub mod server;
pub mod store;

pub use backoff::Backoff;
pub use broadcast::{BroadcastGroup, BroadcastStats, ReaderInfo};
pub use client::{
    apply_message, health_check, health_url, stream_url, ClientConfig, ClientError,
    ConnectionState, LiveClient, LiveEvent, Notification, DEFAULT_PROBE_TIMEOUT,
};
pub use debounce::settle;
pub use facade::{
    CommentResponse, EditResponse, FacadeError, LikeResponse, ReadOnlyStore, StoreFacade,
    SubmitResponse,
};
pub use protocol::{Channel, ChannelMessage, CommentEvent, LikeEvent, ProtocolError, WireMessage};
pub use server::{Broker, BrokerConfig, BrokerStats};
pub use store::MemoryStore;
