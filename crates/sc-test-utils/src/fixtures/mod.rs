//! Pre-configured test data fixtures for session testing.
//!
//! Builders for `sync` response bodies and capture tracks.

use common::types::{MediaKind, MediaTag};
use serde_json::{json, Map, Value};
use session_controller::engine::MediaTrack;

/// Camera/screen video capture track.
#[must_use]
pub fn video_track(id: &str) -> MediaTrack {
    MediaTrack::new(id, MediaKind::Video, format!("{id} video"))
}

/// Microphone/system audio capture track.
#[must_use]
pub fn audio_track(id: &str) -> MediaTrack {
    MediaTrack::new(id, MediaKind::Audio, format!("{id} audio"))
}

/// One peer entry of a room snapshot.
#[derive(Debug, Clone)]
pub struct TestPeer {
    /// Peer ID.
    pub id: String,
    /// Join timestamp (ms).
    pub join_ts: u64,
    media: Map<String, Value>,
    stats: Map<String, Value>,
    consumer_layers: Map<String, Value>,
}

impl TestPeer {
    /// Peer with no tracks that joined at t=0.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            join_ts: 0,
            media: Map::new(),
            stats: Map::new(),
            consumer_layers: Map::new(),
        }
    }

    #[must_use]
    pub fn joined_at(mut self, join_ts: u64) -> Self {
        self.join_ts = join_ts;
        self
    }

    /// Publish a live track.
    #[must_use]
    pub fn with_track(mut self, tag: MediaTag) -> Self {
        self.media
            .insert(tag.as_str().to_string(), json!({"paused": false}));
        self
    }

    /// Publish a track that is paused at the source.
    #[must_use]
    pub fn with_paused_track(mut self, tag: MediaTag) -> Self {
        self.media
            .insert(tag.as_str().to_string(), json!({"paused": true}));
        self
    }

    /// Single-record stats for a producer or consumer id.
    #[must_use]
    pub fn with_bitrate(mut self, object_id: &str, bitrate: f64) -> Self {
        self.stats
            .insert(object_id.to_string(), json!([{"bitrate": bitrate}]));
        self
    }

    /// Per-layer stats: `(rid, bitrate)` pairs.
    #[must_use]
    pub fn with_layer_stats(mut self, object_id: &str, layers: &[(&str, f64)]) -> Self {
        let records: Vec<Value> = layers
            .iter()
            .map(|(rid, bitrate)| json!({"rid": rid, "bitrate": bitrate}))
            .collect();
        self.stats.insert(object_id.to_string(), Value::Array(records));
        self
    }

    /// Layer the server currently forwards to one of this peer's consumers.
    /// `-1` means none.
    #[must_use]
    pub fn with_consumer_layer(mut self, consumer_id: &str, current_layer: i64) -> Self {
        self.consumer_layers.insert(
            consumer_id.to_string(),
            json!({"currentLayer": current_layer, "clientSelectedLayer": null}),
        );
        self
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "joinTs": self.join_ts,
            "lastSeenTs": self.join_ts,
            "media": self.media,
            "stats": self.stats,
            "consumerLayers": self.consumer_layers,
        })
    }
}

/// A whole room snapshot.
#[derive(Debug, Clone, Default)]
pub struct TestRoom {
    peers: Vec<TestPeer>,
    active_speaker: Option<String>,
}

impl TestRoom {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_peer(mut self, peer: TestPeer) -> Self {
        self.peers.push(peer);
        self
    }

    #[must_use]
    pub fn with_active_speaker(mut self, peer_id: impl Into<String>) -> Self {
        self.active_speaker = Some(peer_id.into());
        self
    }

    /// Body of a `sync` response; peers keep insertion order.
    #[must_use]
    pub fn to_sync_json(&self) -> Value {
        let peers: Map<String, Value> = self
            .peers
            .iter()
            .map(|peer| (peer.id.clone(), peer.to_json()))
            .collect();
        let active_speaker = match &self.active_speaker {
            Some(peer_id) => json!({"peerId": peer_id, "producerId": null, "volume": -30.0}),
            None => json!({}),
        };
        json!({"peers": peers, "activeSpeaker": active_speaker})
    }
}
