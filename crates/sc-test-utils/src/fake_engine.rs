//! In-memory media engine.
//!
//! Behaves like a browser-side SFU client library closely enough for the
//! session controller:
//!
//! - transports start in `new`; the first `produce`/`consume` runs the
//!   negotiation callback, then (with auto-connect) moves to `connected`
//! - `produce` asks the controller for the server-side producer id
//! - consumers start paused, like server-created consumers do
//! - closing a transport closes everything riding it and emits `closed`
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = FakeEngine::builder().auto_connect(false).build();
//! // ... subscribe from another task, then:
//! engine.set_connection_state(TransportDirection::Recv, ConnectionState::Connected);
//! ```

use async_trait::async_trait;
use common::types::{ConsumerId, MediaKind, MediaTag, PeerId, ProducerId, TransportId};
use serde_json::{json, Value};
use session_controller::engine::{
    ConnectionState, ConsumeOptions, EngineConsumer, EngineProducer, EngineTransport,
    MediaEngine, MediaTrack, ProduceOptions, ProduceRequest, RtpEncoding, TransportDirection,
    TransportEvents, TransportOptions,
};
use session_controller::errors::EngineError;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

// ===== Engine =====

#[derive(Default)]
struct EngineState {
    loaded: bool,
    load_count: u32,
    router_rtp_capabilities: Option<Value>,
    transports: Vec<Arc<FakeTransport>>,
}

/// Fake media engine. Clones share state, so a test can keep one clone and
/// hand another to the session.
#[derive(Clone)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
    auto_connect: bool,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FakeEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> FakeEngineBuilder {
        FakeEngineBuilder { auto_connect: true }
    }

    #[must_use]
    pub fn load_count(&self) -> u32 {
        self.state.lock().unwrap().load_count
    }

    #[must_use]
    pub fn router_rtp_capabilities(&self) -> Option<Value> {
        self.state.lock().unwrap().router_rtp_capabilities.clone()
    }

    /// Every transport ever created, oldest first.
    #[must_use]
    pub fn transports(&self) -> Vec<Arc<FakeTransport>> {
        self.state.lock().unwrap().transports.clone()
    }

    /// Most recently created transport for `direction`.
    #[must_use]
    pub fn transport(&self, direction: TransportDirection) -> Option<Arc<FakeTransport>> {
        self.transports()
            .into_iter()
            .rev()
            .find(|t| t.direction == direction)
    }

    /// Every producer ever created, oldest first.
    #[must_use]
    pub fn producers(&self) -> Vec<Arc<FakeProducer>> {
        self.transports()
            .iter()
            .flat_map(|t| t.producers.lock().unwrap().clone())
            .collect()
    }

    /// Most recent producer for `tag`, open or not.
    #[must_use]
    pub fn producer(&self, tag: MediaTag) -> Option<Arc<FakeProducer>> {
        self.producers().into_iter().rev().find(|p| p.media_tag == tag)
    }

    /// Every consumer ever created, oldest first.
    #[must_use]
    pub fn consumers(&self) -> Vec<Arc<FakeConsumer>> {
        self.transports()
            .iter()
            .flat_map(|t| t.consumers.lock().unwrap().clone())
            .collect()
    }

    /// Most recent consumer for `(peer_id, tag)`, open or not.
    #[must_use]
    pub fn consumer(&self, peer_id: &str, tag: MediaTag) -> Option<Arc<FakeConsumer>> {
        self.consumers()
            .into_iter()
            .rev()
            .find(|c| c.peer_id.as_str() == peer_id && c.media_tag == tag)
    }

    /// Consumers that are not closed.
    #[must_use]
    pub fn open_consumers(&self) -> Vec<Arc<FakeConsumer>> {
        self.consumers()
            .into_iter()
            .filter(|c| !c.closed.load(Ordering::SeqCst))
            .collect()
    }

    /// Drive the latest transport for `direction` into `state`.
    ///
    /// Panics when no such transport exists.
    pub fn set_connection_state(&self, direction: TransportDirection, state: ConnectionState) {
        self.transport(direction)
            .unwrap_or_else(|| panic!("no {direction} transport"))
            .set_state(state);
    }
}

#[derive(Debug)]
pub struct FakeEngineBuilder {
    auto_connect: bool,
}

impl FakeEngineBuilder {
    /// Whether transports reach `connected` right after negotiation
    /// (default `true`). When off, tests drive the state by hand.
    #[must_use]
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    #[must_use]
    pub fn build(self) -> FakeEngine {
        FakeEngine {
            state: Arc::new(Mutex::new(EngineState::default())),
            auto_connect: self.auto_connect,
        }
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    fn is_loaded(&self) -> bool {
        self.state.lock().unwrap().loaded
    }

    async fn load(&self, router_rtp_capabilities: Value) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.loaded = true;
        state.load_count += 1;
        state.router_rtp_capabilities = Some(router_rtp_capabilities);
        Ok(())
    }

    fn rtp_capabilities(&self) -> Result<Value, EngineError> {
        if !self.is_loaded() {
            return Err(EngineError::Rejected("device not loaded".to_string()));
        }
        Ok(json!({"codecs": [{"mimeType": "video/VP8"}, {"mimeType": "audio/opus"}]}))
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
        options: &TransportOptions,
        events: Arc<dyn TransportEvents>,
    ) -> Result<Box<dyn EngineTransport>, EngineError> {
        let transport = Arc::new(FakeTransport {
            id: options.id.clone(),
            direction,
            auto_connect: self.auto_connect,
            events,
            state: Mutex::new(ConnectionState::New),
            negotiated: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            connect_count: AtomicU32::new(0),
        });
        self.state
            .lock()
            .unwrap()
            .transports
            .push(Arc::clone(&transport));
        Ok(Box::new(Shared(transport)))
    }
}

/// Engine objects handed to the session are thin wrappers around the
/// shared state the test inspects.
struct Shared<T>(Arc<T>);

// ===== Transport =====

pub struct FakeTransport {
    pub id: TransportId,
    pub direction: TransportDirection,
    auto_connect: bool,
    events: Arc<dyn TransportEvents>,
    state: Mutex<ConnectionState>,
    negotiated: AtomicBool,
    producers: Mutex<Vec<Arc<FakeProducer>>>,
    consumers: Mutex<Vec<Arc<FakeConsumer>>>,
    connect_count: AtomicU32,
}

impl FakeTransport {
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// How many times the negotiation callback ran.
    #[must_use]
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Change state and notify the controller (no-op if unchanged).
    pub fn set_state(&self, state: ConnectionState) {
        {
            let mut current = self.state.lock().unwrap();
            if *current == state {
                return;
            }
            *current = state;
        }
        self.events.on_connection_state_changed(state);
    }

    async fn negotiate(&self) -> Result<(), EngineError> {
        if self.negotiated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.connect_count.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);
        let dtls_parameters = json!({"role": "client", "fingerprints": []});
        if let Err(e) = self.events.on_negotiation_needed(dtls_parameters).await {
            self.negotiated.store(false, Ordering::SeqCst);
            return Err(EngineError::Rejected(e.to_string()));
        }

        if self.auto_connect {
            self.set_state(ConnectionState::Connected);
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed(format!("transport {}", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineTransport for Shared<FakeTransport> {
    fn id(&self) -> &TransportId {
        &self.0.id
    }

    fn direction(&self) -> TransportDirection {
        self.0.direction
    }

    fn connection_state(&self) -> ConnectionState {
        self.0.state()
    }

    async fn produce(&self, options: ProduceOptions) -> Result<Box<dyn EngineProducer>, EngineError> {
        let transport = &self.0;
        transport.ensure_open()?;
        if transport.direction != TransportDirection::Send {
            return Err(EngineError::Unsupported("produce on recv transport".to_string()));
        }
        transport.negotiate().await?;

        let ProduceOptions {
            track,
            encodings,
            app_data,
        } = options;
        let id = transport
            .events
            .on_produce_requested(ProduceRequest {
                kind: track.kind,
                rtp_parameters: json!({ "encodings": encodings }),
                app_data,
            })
            .await
            .map_err(|e| EngineError::Rejected(e.to_string()))?;

        let producer = Arc::new(FakeProducer {
            id,
            kind: track.kind,
            media_tag: app_data.media_tag,
            encodings,
            track: Mutex::new(track),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            max_spatial_layer: Mutex::new(None),
        });
        transport.producers.lock().unwrap().push(Arc::clone(&producer));
        Ok(Box::new(Shared(producer)))
    }

    async fn consume(&self, options: ConsumeOptions) -> Result<Box<dyn EngineConsumer>, EngineError> {
        let transport = &self.0;
        transport.ensure_open()?;
        if transport.direction != TransportDirection::Recv {
            return Err(EngineError::Unsupported("consume on send transport".to_string()));
        }
        transport.negotiate().await?;

        let consumer = Arc::new(FakeConsumer {
            id: options.parameters.id,
            producer_id: options.parameters.producer_id,
            kind: options.parameters.kind,
            peer_id: options.app_data.peer_id,
            media_tag: options.app_data.media_tag,
            paused: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        transport.consumers.lock().unwrap().push(Arc::clone(&consumer));
        Ok(Box::new(Shared(consumer)))
    }

    async fn close(&self) {
        let transport = &self.0;
        if transport.is_closed() {
            return;
        }
        for producer in transport.producers.lock().unwrap().iter() {
            producer.closed.store(true, Ordering::SeqCst);
        }
        for consumer in transport.consumers.lock().unwrap().iter() {
            consumer.closed.store(true, Ordering::SeqCst);
        }
        transport.set_state(ConnectionState::Closed);
    }
}

// ===== Producer =====

pub struct FakeProducer {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub media_tag: MediaTag,
    pub encodings: Vec<RtpEncoding>,
    track: Mutex<MediaTrack>,
    paused: AtomicBool,
    closed: AtomicBool,
    max_spatial_layer: Mutex<Option<u8>>,
}

impl FakeProducer {
    #[must_use]
    pub fn track(&self) -> MediaTrack {
        self.track.lock().unwrap().clone()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn max_spatial_layer(&self) -> Option<u8> {
        *self.max_spatial_layer.lock().unwrap()
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed(format!("producer {}", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineProducer for Shared<FakeProducer> {
    fn id(&self) -> &ProducerId {
        &self.0.id
    }

    fn kind(&self) -> MediaKind {
        self.0.kind
    }

    fn is_paused(&self) -> bool {
        self.0.is_paused()
    }

    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.0.ensure_open()?;
        self.0.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), EngineError> {
        self.0.ensure_open()?;
        self.0.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn replace_track(&self, track: MediaTrack) -> Result<(), EngineError> {
        self.0.ensure_open()?;
        *self.0.track.lock().unwrap() = track;
        Ok(())
    }

    async fn set_max_spatial_layer(&self, spatial_layer: u8) -> Result<(), EngineError> {
        self.0.ensure_open()?;
        let rungs = self.0.encodings.len().max(1);
        if usize::from(spatial_layer) >= rungs {
            return Err(EngineError::Rejected(format!(
                "spatial layer {spatial_layer} out of range"
            )));
        }
        *self.0.max_spatial_layer.lock().unwrap() = Some(spatial_layer);
        Ok(())
    }

    async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

// ===== Consumer =====

pub struct FakeConsumer {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub peer_id: PeerId,
    pub media_tag: MediaTag,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl FakeConsumer {
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed(format!("consumer {}", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineConsumer for Shared<FakeConsumer> {
    fn id(&self) -> &ConsumerId {
        &self.0.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.0.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.0.kind
    }

    fn is_paused(&self) -> bool {
        self.0.is_paused()
    }

    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.0.ensure_open()?;
        self.0.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), EngineError> {
        self.0.ensure_open()?;
        self.0.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}
