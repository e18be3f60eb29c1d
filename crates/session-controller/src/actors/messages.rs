//! Message types for actor communication.
//!
//! Handle methods send one message and await the `oneshot` reply. The actor
//! processes messages strictly one at a time.

use crate::consumers::ConsumerKey;
use crate::engine::MediaTrack;
use crate::errors::SessionError;
use common::types::{ConsumerId, MediaTag};
use tokio::sync::oneshot;

/// Result of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new consumer was created and resumed.
    Subscribed(ConsumerId),
    /// A consumer for this `(peer, tag)` already exists; nothing was done.
    AlreadySubscribed,
}

/// What started a full session teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownTrigger {
    /// Explicit `leave()`.
    User,
    /// A transport reached a terminal connection state.
    TransportState,
    /// The actor is shutting down (cancelled or all handles dropped).
    Shutdown,
}

impl TeardownTrigger {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TeardownTrigger::User => "user",
            TeardownTrigger::TransportState => "transport_state",
            TeardownTrigger::Shutdown => "shutdown",
        }
    }
}

/// Messages sent to `SessionControllerActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Perform the join handshake and start polling.
    Join {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Start sending camera video (simulcast) and microphone audio.
    SendCamera {
        video: MediaTrack,
        audio: MediaTrack,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Start sending a screen capture, with optional audio.
    StartScreenShare {
        video: MediaTrack,
        audio: Option<MediaTrack>,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Screen capture ended: close screen producers.
    StopScreenShare { respond_to: oneshot::Sender<()> },

    /// Swap camera/microphone tracks (device switch).
    ReplaceCameraTracks {
        video: MediaTrack,
        audio: MediaTrack,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Close the send transport and drop all local producers.
    StopStreams { respond_to: oneshot::Sender<()> },

    /// Record a pause preference and apply it to the slot's producer.
    SetMediaPaused {
        media_tag: MediaTag,
        paused: bool,
        respond_to: oneshot::Sender<()>,
    },

    SetProducerMaxLayer {
        media_tag: MediaTag,
        spatial_layer: u8,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    Subscribe {
        key: ConsumerKey,
        respond_to: oneshot::Sender<Result<SubscribeOutcome, SessionError>>,
    },

    Unsubscribe {
        key: ConsumerKey,
        respond_to: oneshot::Sender<()>,
    },

    SetConsumerPaused {
        key: ConsumerKey,
        paused: bool,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Ask the server to forward a specific spatial layer.
    SetConsumerLayer {
        key: ConsumerKey,
        spatial_layer: u8,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Full teardown. No-op when not joined.
    Leave { respond_to: oneshot::Sender<()> },
}
