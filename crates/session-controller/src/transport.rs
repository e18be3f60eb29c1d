//! Transport Manager.
//!
//! Owns at most one send and one recv transport. Each transport gets a
//! [`TransportEventHandler`] that answers the engine's signaling needs
//! directly (DTLS connect, producer registration) and forwards connection
//! state changes to the session actor's queue. The handler never touches
//! session state itself.

use crate::engine::{
    ConnectionState, EngineTransport, MediaEngine, ProduceRequest, TransportDirection,
    TransportEvents, TransportOptions,
};
use crate::errors::{EngineError, SessionError, SignalingError};
use crate::producers::LocalMediaPrefs;
use crate::signaling::{Endpoint, Signaling};
use async_trait::async_trait;
use common::types::{ProducerId, TransportId};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connection state change reported by an engine transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStateEvent {
    pub direction: TransportDirection,
    pub transport_id: TransportId,
    pub state: ConnectionState,
}

/// Engine callbacks for one transport.
pub struct TransportEventHandler {
    direction: TransportDirection,
    transport_id: TransportId,
    signaling: Signaling,
    prefs: LocalMediaPrefs,
    state_tx: mpsc::UnboundedSender<TransportStateEvent>,
}

impl TransportEventHandler {
    pub fn new(
        direction: TransportDirection,
        transport_id: TransportId,
        signaling: Signaling,
        prefs: LocalMediaPrefs,
        state_tx: mpsc::UnboundedSender<TransportStateEvent>,
    ) -> Self {
        Self {
            direction,
            transport_id,
            signaling,
            prefs,
            state_tx,
        }
    }
}

#[async_trait]
impl TransportEvents for TransportEventHandler {
    async fn on_negotiation_needed(&self, dtls_parameters: Value) -> Result<(), SessionError> {
        debug!(
            target: "sc.transport",
            direction = %self.direction,
            transport_id = %self.transport_id,
            "Transport connect event"
        );
        self.signaling
            .connect_transport(&self.transport_id, dtls_parameters)
            .await
            .map_err(|e| {
                warn!(
                    target: "sc.transport",
                    direction = %self.direction,
                    transport_id = %self.transport_id,
                    error = %e,
                    "Error connecting transport"
                );
                SessionError::from(e)
            })
    }

    async fn on_produce_requested(
        &self,
        request: ProduceRequest,
    ) -> Result<ProducerId, SessionError> {
        if self.direction != TransportDirection::Send {
            return Err(EngineError::Unsupported(
                "produce on a recv transport".to_string(),
            )
            .into());
        }

        let media_tag = request.app_data.media_tag;
        let paused = self.prefs.initial_paused(media_tag);

        debug!(
            target: "sc.transport",
            transport_id = %self.transport_id,
            media_tag = %media_tag,
            paused,
            "Transport produce event"
        );

        let id = self
            .signaling
            .send_track(
                &self.transport_id,
                request.kind,
                request.rtp_parameters,
                paused,
                request.app_data,
            )
            .await?;
        Ok(id)
    }

    fn on_connection_state_changed(&self, state: ConnectionState) {
        debug!(
            target: "sc.transport",
            direction = %self.direction,
            transport_id = %self.transport_id,
            state = %state,
            "Transport connection state changed"
        );

        let event = TransportStateEvent {
            direction: self.direction,
            transport_id: self.transport_id.clone(),
            state,
        };
        // Unbounded so a terminal state always reaches the actor.
        if self.state_tx.send(event).is_err() {
            debug!(
                target: "sc.transport",
                transport_id = %self.transport_id,
                state = %state,
                "Session gone, transport state event dropped"
            );
        }
    }
}

/// Owner of the send/recv transport pair.
pub struct TransportManager {
    engine: Arc<dyn MediaEngine>,
    signaling: Signaling,
    prefs: LocalMediaPrefs,
    state_tx: mpsc::UnboundedSender<TransportStateEvent>,
    send: Option<Box<dyn EngineTransport>>,
    recv: Option<Box<dyn EngineTransport>>,
}

impl TransportManager {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        signaling: Signaling,
        prefs: LocalMediaPrefs,
        state_tx: mpsc::UnboundedSender<TransportStateEvent>,
    ) -> Self {
        Self {
            engine,
            signaling,
            prefs,
            state_tx,
            send: None,
            recv: None,
        }
    }

    fn slot_mut(&mut self, direction: TransportDirection) -> &mut Option<Box<dyn EngineTransport>> {
        match direction {
            TransportDirection::Send => &mut self.send,
            TransportDirection::Recv => &mut self.recv,
        }
    }

    pub fn get(&self, direction: TransportDirection) -> Option<&dyn EngineTransport> {
        match direction {
            TransportDirection::Send => self.send.as_deref(),
            TransportDirection::Recv => self.recv.as_deref(),
        }
    }

    pub fn id(&self, direction: TransportDirection) -> Option<TransportId> {
        self.get(direction).map(|t| t.id().clone())
    }

    pub fn connection_state(&self, direction: TransportDirection) -> Option<ConnectionState> {
        self.get(direction).map(|t| t.connection_state())
    }

    /// Whether `transport_id` is the live transport for `direction`.
    pub fn is_current(&self, direction: TransportDirection, transport_id: &TransportId) -> bool {
        self.get(direction).is_some_and(|t| t.id() == transport_id)
    }

    /// Create a transport, replacing (and closing) any existing one.
    ///
    /// On failure no transport is retained for `direction`.
    pub async fn create(&mut self, direction: TransportDirection) -> Result<TransportId, SessionError> {
        if let Some(old) = self.slot_mut(direction).take() {
            debug!(target: "sc.transport", direction = %direction, transport_id = %old.id(), "Replacing transport");
            old.close().await;
        }

        let raw = self.signaling.create_transport(direction).await?;
        let options = TransportOptions::from_value(raw).ok_or_else(|| {
            SessionError::from(SignalingError::InvalidResponse {
                endpoint: Endpoint::CreateTransport,
                message: "transportOptions has no id".to_string(),
            })
        })?;

        let handler = Arc::new(TransportEventHandler::new(
            direction,
            options.id.clone(),
            self.signaling.clone(),
            self.prefs.clone(),
            self.state_tx.clone(),
        ));

        let transport = self
            .engine
            .create_transport(direction, &options, handler)
            .await?;
        let id = transport.id().clone();

        info!(target: "sc.transport", direction = %direction, transport_id = %id, "Transport created");
        *self.slot_mut(direction) = Some(transport);
        Ok(id)
    }

    /// Return the live transport for `direction`, creating it if absent.
    pub async fn ensure(&mut self, direction: TransportDirection) -> Result<&dyn EngineTransport, SessionError> {
        if self.get(direction).is_none() {
            self.create(direction).await?;
        }
        self.get(direction)
            .ok_or(SessionError::TransportClosed(direction))
    }

    /// Close and forget one transport. The engine closes everything riding
    /// it. Returns the id of the closed transport.
    pub async fn close(&mut self, direction: TransportDirection) -> Option<TransportId> {
        let transport = self.slot_mut(direction).take()?;
        let id = transport.id().clone();
        transport.close().await;
        info!(target: "sc.transport", direction = %direction, transport_id = %id, "Transport closed");
        Some(id)
    }

    pub async fn close_all(&mut self) {
        self.close(TransportDirection::Send).await;
        self.close(TransportDirection::Recv).await;
    }
}

/// Wait until `transport` reports `connected`.
///
/// Polls every `poll_interval`. Fails immediately on a terminal state and
/// after `timeout` otherwise.
pub async fn await_connected(
    transport: &dyn EngineTransport,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<(), SessionError> {
    let deadline = Instant::now() + timeout;

    loop {
        let state = transport.connection_state();
        if state == ConnectionState::Connected {
            return Ok(());
        }
        if state.is_terminal() || Instant::now() >= deadline {
            return Err(SessionError::TransportNotReady {
                direction: transport.direction(),
                state,
            });
        }

        debug!(
            target: "sc.transport",
            transport_id = %transport.id(),
            state = %state,
            "Waiting for transport to connect"
        );
        tokio::time::sleep(poll_interval).await;
    }
}
