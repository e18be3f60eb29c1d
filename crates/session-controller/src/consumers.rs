//! Consumer Registry.
//!
//! Remote consumers keyed by `(peerId, mediaTag)`. At most one consumer
//! exists per key; [`ConsumerRegistry::insert`] refuses a second one.
//!
//! Lifecycle of a consumer:
//!
//! ```text
//! requested -> paused (server default) -> resuming -> active <-> paused (user)
//!                                                          \-> closing -> closed
//! ```
//!
//! Only registered consumers are visible to reconciliation; a consumer that
//! fails the readiness gate is closed before it ever reaches the registry.

use crate::engine::EngineConsumer;
use crate::observability::metrics;
use crate::signaling::Signaling;
use common::types::{ConsumerId, MediaKind, MediaTag, PeerId, ProducerId};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Identity of a remote track: one consumer per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerKey {
    pub peer_id: PeerId,
    pub media_tag: MediaTag,
}

impl ConsumerKey {
    pub fn new(peer_id: impl Into<PeerId>, media_tag: MediaTag) -> Self {
        Self {
            peer_id: peer_id.into(),
            media_tag,
        }
    }
}

impl fmt::Display for ConsumerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.peer_id, self.media_tag)
    }
}

/// Why a consumer was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Owning peer vanished from the snapshot.
    PeerDeparted,
    /// Peer is present but no longer publishes the track.
    TrackStopped,
    /// Local user unsubscribed.
    Unsubscribed,
}

impl CloseReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerDeparted => "peer_departed",
            CloseReason::TrackStopped => "track_stopped",
            CloseReason::Unsubscribed => "unsubscribed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered consumer and the key it was created for.
pub struct RemoteConsumer {
    key: ConsumerKey,
    consumer: Box<dyn EngineConsumer>,
}

impl RemoteConsumer {
    pub fn new(key: ConsumerKey, consumer: Box<dyn EngineConsumer>) -> Self {
        Self { key, consumer }
    }

    pub fn key(&self) -> &ConsumerKey {
        &self.key
    }

    pub fn id(&self) -> &ConsumerId {
        self.consumer.id()
    }

    pub fn producer_id(&self) -> &ProducerId {
        self.consumer.producer_id()
    }

    pub fn kind(&self) -> MediaKind {
        self.consumer.kind()
    }

    pub fn is_paused(&self) -> bool {
        self.consumer.is_paused()
    }

    pub fn engine(&self) -> &dyn EngineConsumer {
        self.consumer.as_ref()
    }
}

impl fmt::Debug for RemoteConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConsumer")
            .field("key", &self.key)
            .field("id", self.consumer.id())
            .field("producer_id", self.consumer.producer_id())
            .field("paused", &self.consumer.is_paused())
            .finish()
    }
}

#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: HashMap<ConsumerKey, RemoteConsumer>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &ConsumerKey) -> bool {
        self.consumers.contains_key(key)
    }

    pub fn get(&self, key: &ConsumerKey) -> Option<&RemoteConsumer> {
        self.consumers.get(key)
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Register a consumer. A duplicate key hands the consumer back.
    pub fn insert(&mut self, consumer: RemoteConsumer) -> Result<(), RemoteConsumer> {
        if self.consumers.contains_key(consumer.key()) {
            return Err(consumer);
        }
        self.consumers.insert(consumer.key().clone(), consumer);
        Ok(())
    }

    pub fn remove(&mut self, key: &ConsumerKey) -> Option<RemoteConsumer> {
        self.consumers.remove(key)
    }

    /// Registered keys in key order.
    pub fn keys(&self) -> Vec<ConsumerKey> {
        let mut keys: Vec<_> = self.consumers.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Registered consumers in key order.
    pub fn iter_sorted(&self) -> Vec<&RemoteConsumer> {
        let mut consumers: Vec<_> = self.consumers.values().collect();
        consumers.sort_by(|a, b| a.key().cmp(b.key()));
        consumers
    }

    /// Forget every consumer without signaling. Used when the transport
    /// that carried them is already gone.
    pub fn clear(&mut self) {
        self.consumers.clear();
    }

    /// Pause or resume a consumer: signal first, then the engine.
    ///
    /// A signaling failure leaves local state untouched; an engine failure
    /// after a successful signal is logged and not rolled back. Returns
    /// whether the server accepted the change.
    pub async fn set_paused(
        &self,
        key: &ConsumerKey,
        paused: bool,
        signaling: &Signaling,
    ) -> bool {
        let Some(consumer) = self.consumers.get(key) else {
            debug!(target: "sc.consumers", key = %key, "No consumer to pause/resume");
            return false;
        };

        let signaled = if paused {
            signaling.pause_consumer(consumer.id()).await
        } else {
            signaling.resume_consumer(consumer.id()).await
        };
        if let Err(e) = signaled {
            warn!(
                target: "sc.consumers",
                key = %key,
                consumer_id = %consumer.id(),
                paused,
                error = %e,
                "Server refused consumer pause state change"
            );
            return false;
        }

        let applied = if paused {
            consumer.engine().pause().await
        } else {
            consumer.engine().resume().await
        };
        if let Err(e) = applied {
            warn!(
                target: "sc.consumers",
                key = %key,
                consumer_id = %consumer.id(),
                paused,
                error = %e,
                "Engine failed to apply consumer pause state"
            );
        }
        true
    }

    /// Close and forget a consumer. No-op when the key is not registered.
    ///
    /// Returns whether a consumer was closed.
    pub async fn close(
        &mut self,
        key: &ConsumerKey,
        reason: CloseReason,
        signaling: &Signaling,
    ) -> bool {
        let Some(consumer) = self.consumers.remove(key) else {
            return false;
        };

        info!(
            target: "sc.consumers",
            key = %key,
            consumer_id = %consumer.id(),
            reason = %reason,
            "Closing consumer"
        );

        if let Err(e) = signaling.close_consumer(consumer.id()).await {
            warn!(
                target: "sc.consumers",
                consumer_id = %consumer.id(),
                error = %e,
                "close-consumer signaling failed, closing locally"
            );
        }
        consumer.engine().close().await;
        metrics::record_consumer_closed(reason.as_str());
        true
    }
}
