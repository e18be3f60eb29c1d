//! Read-only session view.
//!
//! The session actor rebuilds a [`SessionView`] after every state change and
//! publishes it on a `watch` channel. Renderers only read it; every user
//! action goes back through the session handle.

use crate::consumers::{ConsumerKey, ConsumerRegistry};
use crate::producers::ProducerRegistry;
use crate::snapshot::{kbps, layer_options, LayerOption, LayerSelection, PeerTable, RosterEntry};
use common::types::{ConsumerId, MediaKind, MediaTag, PeerId, ProducerId};
use serde::Serialize;

/// State of the reconciliation loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum PollStatus {
    /// Not joined, or not started yet.
    #[default]
    Idle,
    Running,
    /// Stopped after a failed fetch; not retried.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerView {
    pub media_tag: MediaTag,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub paused: bool,
    pub max_spatial_layer: Option<u8>,
    /// Encodings as seen by the server; empty while paused.
    pub layers: Vec<LayerOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerView {
    pub peer_id: PeerId,
    pub media_tag: MediaTag,
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub paused: bool,
    /// Receive rate; `None` while paused or before the server reports it.
    pub kbps: Option<u64>,
    /// Whether the remote producer is paused at the source.
    pub remote_paused: bool,
    pub current_layer: Option<u8>,
    /// Selectable layers of the remote producer; empty when not selectable.
    pub layers: Vec<LayerOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub peer_id: PeerId,
    pub joined: bool,
    pub poll_status: PollStatus,
    pub active_speaker: Option<PeerId>,
    /// Peers sorted by join time.
    pub roster: Vec<RosterEntry>,
    pub producers: Vec<ProducerView>,
    pub consumers: Vec<ConsumerView>,
}

impl SessionView {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            joined: false,
            poll_status: PollStatus::Idle,
            active_speaker: None,
            roster: Vec::new(),
            producers: Vec::new(),
            consumers: Vec::new(),
        }
    }

    pub fn producer(&self, tag: MediaTag) -> Option<&ProducerView> {
        self.producers.iter().find(|p| p.media_tag == tag)
    }

    pub fn consumer(&self, key: &ConsumerKey) -> Option<&ConsumerView> {
        self.consumers
            .iter()
            .find(|c| c.peer_id == key.peer_id && c.media_tag == key.media_tag)
    }
}

/// Producer rows with layer options from the local peer's stats.
pub fn producer_views(
    producers: &ProducerRegistry,
    snapshot: &PeerTable,
    local_peer: &PeerId,
) -> Vec<ProducerView> {
    let me = snapshot.get(local_peer);

    producers
        .iter()
        .map(|producer| {
            let paused = producer.is_paused();
            let layers = if paused {
                Vec::new()
            } else {
                me.and_then(|peer| peer.stats_for(producer.id().as_str()))
                    .map(|stats| layer_options(stats, producer.max_spatial_layer().into()))
                    .unwrap_or_default()
            };

            ProducerView {
                media_tag: producer.media_tag(),
                producer_id: producer.id().clone(),
                kind: producer.kind(),
                paused,
                max_spatial_layer: producer.max_spatial_layer(),
                layers,
            }
        })
        .collect()
}

/// Consumer rows.
///
/// Receive rate and layer state come from the local peer's entry; the
/// selectable layers come from the remote producer's stats and are only
/// offered while the remote track is live.
pub fn consumer_views(
    consumers: &ConsumerRegistry,
    snapshot: &PeerTable,
    local_peer: &PeerId,
) -> Vec<ConsumerView> {
    let me = snapshot.get(local_peer);

    consumers
        .iter_sorted()
        .into_iter()
        .map(|consumer| {
            let key = consumer.key();
            let paused = consumer.is_paused();

            let kbps = if paused {
                None
            } else {
                me.and_then(|peer| peer.stats_for(consumer.id().as_str()))
                    .map(|stats| kbps(stats.bitrate()))
            };

            let layer_info = me.and_then(|peer| peer.consumer_layers.get(consumer.id()));
            let selection = layer_info.map_or(LayerSelection::Unknown, |info| info.current_layer);

            let remote = snapshot.get(&key.peer_id);
            let track = remote.and_then(|peer| peer.media.get(&key.media_tag));
            let remote_paused = track.map_or(true, |info| info.paused);

            let layers = match (remote, layer_info) {
                (Some(peer), Some(_)) if !remote_paused => peer
                    .stats_for(consumer.producer_id().as_str())
                    .map(|stats| layer_options(stats, selection))
                    .unwrap_or_default(),
                _ => Vec::new(),
            };

            ConsumerView {
                peer_id: key.peer_id.clone(),
                media_tag: key.media_tag,
                consumer_id: consumer.id().clone(),
                producer_id: consumer.producer_id().clone(),
                kind: consumer.kind(),
                paused,
                kbps,
                remote_paused,
                current_layer: selection.layer(),
                layers,
            }
        })
        .collect()
}
