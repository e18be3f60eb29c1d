//! Session Controller error types.
//!
//! Three layers of failure are distinguished:
//! - [`SignalingError`]: the request/response channel to the server failed or
//!   the server answered with an `error` field.
//! - [`EngineError`]: the media engine refused an operation.
//! - [`SessionError`]: what callers of the session handle see.

use crate::engine::{ConnectionState, TransportDirection};
use crate::signaling::Endpoint;
use common::types::MediaTag;
use thiserror::Error;

/// Signaling channel failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    /// Transport-level failure (connection refused, timeout, bad status).
    #[error("Signaling HTTP error: {0}")]
    Http(String),

    /// Server answered with an `error` field.
    #[error("Signaling endpoint {endpoint} returned error: {message}")]
    Server { endpoint: Endpoint, message: String },

    /// Response body could not be interpreted.
    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: Endpoint, message: String },
}

impl SignalingError {
    /// Returns the metrics label for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingError::Http(_) => "http",
            SignalingError::Server { .. } => "server",
            SignalingError::InvalidResponse { .. } => "invalid_response",
        }
    }
}

/// Media engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Engine rejected the call (bad parameters, negotiation failure).
    #[error("Engine rejected operation: {0}")]
    Rejected(String),

    /// Target object was already closed.
    #[error("Engine object closed: {0}")]
    Closed(String),

    /// Engine does not support the requested operation.
    #[error("Engine operation unsupported: {0}")]
    Unsupported(String),
}

/// Error surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Produce/consume attempted before the join handshake completed.
    #[error("Session not joined")]
    NotJoined,

    /// Transport did not reach `connected` within the readiness window.
    #[error("{direction} transport not ready (state: {state})")]
    TransportNotReady {
        direction: TransportDirection,
        state: ConnectionState,
    },

    /// Transport is missing or was torn down mid-operation.
    #[error("{0} transport closed")]
    TransportClosed(TransportDirection),

    /// Camera track replacement requested with no camera producer.
    #[error("No camera producer")]
    NoCameraProducer,

    /// Operation targets an empty producer slot.
    #[error("No producer for {0}")]
    NoProducer(MediaTag),

    /// Operation targets a consumer that is not registered.
    #[error("No consumer for {peer_id}/{media_tag}")]
    NoConsumer { peer_id: String, media_tag: MediaTag },

    /// Slot already holds a live producer.
    #[error("Already sending {0}")]
    AlreadySending(MediaTag),

    /// Session actor is gone or dropped the reply.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether this error means the session cannot continue and has been
    /// (or is about to be) torn down.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::TransportNotReady { state, .. } => state.is_terminal(),
            SessionError::TransportClosed(_) | SessionError::Internal(_) => true,
            SessionError::Signaling(_)
            | SessionError::Engine(_)
            | SessionError::NotJoined
            | SessionError::NoCameraProducer
            | SessionError::NoProducer(_)
            | SessionError::NoConsumer { .. }
            | SessionError::AlreadySending(_) => false,
        }
    }
}
