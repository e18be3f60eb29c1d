//! Media engine binding.
//!
//! The controller never touches codecs, ICE or RTP itself. It drives an
//! engine through the traits below, and the engine calls back into the
//! controller through [`TransportEvents`] when a transport needs the
//! signaling channel (DTLS connect, producer registration) or changes
//! connection state.
//!
//! Engine objects are owned by the session actor. Implementations must be
//! cheap to query (`connection_state`, `is_paused`) because the readiness
//! gate polls them.

use crate::errors::{EngineError, SessionError};
use async_trait::async_trait;
use common::types::{ConsumerId, MediaKind, MediaTag, PeerId, ProducerId, TransportId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Direction of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

impl TransportDirection {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Send => "send",
            TransportDirection::Recv => "recv",
        }
    }
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport connection state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }

    /// States after which the transport is never usable again.
    ///
    /// `disconnected` is included: there is no reconnect path.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a capture track supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
        }
    }
}

/// One simulcast encoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncoding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
}

/// Application data attached to a local producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerAppData {
    pub media_tag: MediaTag,
}

/// Application data attached to a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerAppData {
    pub peer_id: PeerId,
    pub media_tag: MediaTag,
}

/// Server-issued transport parameters (`transportOptions`).
///
/// Only the id is interpreted here; the rest is handed to the engine as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    pub id: TransportId,
    pub raw: Value,
}

impl TransportOptions {
    /// Extract options from the `transportOptions` object.
    pub fn from_value(raw: Value) -> Option<Self> {
        let id = raw.get("id")?.as_str()?.to_string();
        Some(Self {
            id: TransportId(id),
            raw,
        })
    }
}

/// Server-issued consumer parameters (`recv-track` response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParameters {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    #[serde(default)]
    pub rtp_parameters: Value,
}

/// Arguments to [`EngineTransport::produce`].
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub track: MediaTrack,
    /// Empty means a single unconstrained encoding.
    pub encodings: Vec<RtpEncoding>,
    pub app_data: ProducerAppData,
}

/// Arguments to [`EngineTransport::consume`].
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub parameters: ConsumerParameters,
    pub app_data: ConsumerAppData,
}

/// What the engine hands over when a send transport wants to register a
/// producer with the server.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub app_data: ProducerAppData,
}

/// Callbacks from an engine transport into the controller.
///
/// The engine awaits `on_negotiation_needed` and `on_produce_requested`
/// before completing `connect`/`produce`; an `Err` must fail that operation.
#[async_trait]
pub trait TransportEvents: Send + Sync {
    async fn on_negotiation_needed(&self, dtls_parameters: Value) -> Result<(), SessionError>;

    async fn on_produce_requested(&self, request: ProduceRequest)
        -> Result<ProducerId, SessionError>;

    /// Must not block; the implementation only queues the change.
    fn on_connection_state_changed(&self, state: ConnectionState);
}

/// Device-level engine: loads server capabilities and builds transports.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn is_loaded(&self) -> bool;

    async fn load(&self, router_rtp_capabilities: Value) -> Result<(), EngineError>;

    /// Local receive capabilities, sent along with `recv-track`.
    fn rtp_capabilities(&self) -> Result<Value, EngineError>;

    async fn create_transport(
        &self,
        direction: TransportDirection,
        options: &TransportOptions,
        events: Arc<dyn TransportEvents>,
    ) -> Result<Box<dyn EngineTransport>, EngineError>;
}

#[async_trait]
pub trait EngineTransport: Send + Sync {
    fn id(&self) -> &TransportId;

    fn direction(&self) -> TransportDirection;

    fn connection_state(&self) -> ConnectionState;

    async fn produce(&self, options: ProduceOptions) -> Result<Box<dyn EngineProducer>, EngineError>;

    async fn consume(&self, options: ConsumeOptions) -> Result<Box<dyn EngineConsumer>, EngineError>;

    /// Closes the transport and every producer/consumer riding it.
    async fn close(&self);
}

#[async_trait]
pub trait EngineProducer: Send + Sync {
    fn id(&self) -> &ProducerId;

    fn kind(&self) -> MediaKind;

    fn is_paused(&self) -> bool;

    fn is_closed(&self) -> bool;

    async fn pause(&self) -> Result<(), EngineError>;

    async fn resume(&self) -> Result<(), EngineError>;

    async fn replace_track(&self, track: MediaTrack) -> Result<(), EngineError>;

    async fn set_max_spatial_layer(&self, spatial_layer: u8) -> Result<(), EngineError>;

    async fn close(&self);
}

#[async_trait]
pub trait EngineConsumer: Send + Sync {
    fn id(&self) -> &ConsumerId;

    fn producer_id(&self) -> &ProducerId;

    fn kind(&self) -> MediaKind;

    fn is_paused(&self) -> bool;

    fn is_closed(&self) -> bool;

    async fn pause(&self) -> Result<(), EngineError>;

    async fn resume(&self) -> Result<(), EngineError>;

    async fn close(&self);
}
