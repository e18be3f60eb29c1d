//! Room snapshot model and reconciliation diff.
//!
//! The server's `sync` response is the whole truth about the room at one
//! instant. It is never patched: every poll replaces the previous
//! [`PeerTable`] wholesale. The functions here compare two tables and decide
//! what the local side must tear down. They are pure; the session actor
//! applies the results.

use crate::consumers::{CloseReason, ConsumerKey};
use common::types::{ConsumerId, MediaTag, PeerId, ProducerId};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::debug;

// ===== Wire model =====

/// Published track state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    #[serde(default)]
    pub paused: bool,
}

/// One RTP stream statistic as reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatRecord {
    #[serde(default)]
    pub bitrate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraction_lost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Stats for one object: a single record for consumers and plain
/// producers, one record per encoding for simulcast producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatEntry {
    Layers(Vec<StatRecord>),
    Single(StatRecord),
}

impl StatEntry {
    pub fn records(&self) -> &[StatRecord] {
        match self {
            StatEntry::Layers(records) => records,
            StatEntry::Single(record) => std::slice::from_ref(record),
        }
    }

    /// Total bitrate across encodings.
    pub fn bitrate(&self) -> f64 {
        self.records().iter().map(|r| r.bitrate).sum()
    }
}

/// Which simulcast layer is in use, as far as the client knows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LayerSelection {
    /// Nothing reported; treat the highest layer as the one in use.
    #[default]
    Unknown,
    /// The server reported `-1`: no layer is flowing.
    Idle,
    Layer(u8),
}

impl LayerSelection {
    pub fn is_unknown(&self) -> bool {
        *self == LayerSelection::Unknown
    }

    pub fn layer(self) -> Option<u8> {
        match self {
            LayerSelection::Layer(layer) => Some(layer),
            LayerSelection::Unknown | LayerSelection::Idle => None,
        }
    }
}

// Written back the way the server reports it.
impl Serialize for LayerSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LayerSelection::Unknown => serializer.serialize_none(),
            LayerSelection::Idle => serializer.serialize_i64(-1),
            LayerSelection::Layer(layer) => serializer.serialize_u8(*layer),
        }
    }
}

impl From<Option<u8>> for LayerSelection {
    fn from(layer: Option<u8>) -> Self {
        layer.map_or(LayerSelection::Unknown, LayerSelection::Layer)
    }
}

/// Layer state of a consumer as seen by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayerInfo {
    #[serde(default, deserialize_with = "reported_layer")]
    pub current_layer: LayerSelection,
    #[serde(
        default,
        deserialize_with = "reported_layer",
        skip_serializing_if = "LayerSelection::is_unknown"
    )]
    pub client_selected_layer: LayerSelection,
}

// Negative means idle; null, absent or out of range means unknown.
fn reported_layer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LayerSelection, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value.as_ref().and_then(Value::as_i64) {
        Some(layer) if layer < 0 => LayerSelection::Idle,
        Some(layer) => u8::try_from(layer).map_or(LayerSelection::Unknown, LayerSelection::Layer),
        None => LayerSelection::Unknown,
    })
}

/// One peer in the room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub join_ts: u64,
    pub last_seen_ts: Option<u64>,
    pub media: BTreeMap<MediaTag, TrackInfo>,
    /// Keyed by producer or consumer id.
    pub stats: HashMap<String, StatEntry>,
    /// Layer state of the consumers this peer owns.
    pub consumer_layers: HashMap<ConsumerId, ConsumerLayerInfo>,
}

impl PeerSnapshot {
    pub fn publishes(&self, tag: MediaTag) -> bool {
        self.media.contains_key(&tag)
    }

    pub fn stats_for(&self, object_id: &str) -> Option<&StatEntry> {
        self.stats.get(object_id)
    }

    fn from_record(id: PeerId, record: PeerRecord) -> Self {
        let mut media = BTreeMap::new();
        for (tag, info) in record.media {
            match tag.parse::<MediaTag>() {
                Ok(tag) => {
                    media.insert(tag, info);
                }
                Err(e) => {
                    debug!(target: "sc.snapshot", peer_id = %id, error = %e, "Ignoring unknown media tag");
                }
            }
        }

        Self {
            id,
            join_ts: record.join_ts,
            last_seen_ts: record.last_seen_ts,
            media,
            stats: record.stats,
            consumer_layers: record.consumer_layers,
        }
    }

    fn to_record(&self) -> PeerRecord {
        PeerRecord {
            join_ts: self.join_ts,
            last_seen_ts: self.last_seen_ts,
            media: self
                .media
                .iter()
                .map(|(tag, info)| (tag.as_str().to_string(), info.clone()))
                .collect(),
            stats: self.stats.clone(),
            consumer_layers: self.consumer_layers.clone(),
        }
    }
}

/// Peer entry as it appears under `peers.<peerId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerRecord {
    #[serde(default)]
    join_ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_seen_ts: Option<u64>,
    #[serde(default)]
    media: BTreeMap<String, TrackInfo>,
    #[serde(default)]
    stats: HashMap<String, StatEntry>,
    #[serde(default)]
    consumer_layers: HashMap<ConsumerId, ConsumerLayerInfo>,
}

/// All peers of one snapshot, in server document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerTable {
    peers: Vec<PeerSnapshot>,
    index: HashMap<PeerId, usize>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a peer, replacing in place when the id is already present.
    pub fn insert(&mut self, peer: PeerSnapshot) {
        match self.index.get(&peer.id) {
            Some(&pos) => {
                if let Some(slot) = self.peers.get_mut(pos) {
                    *slot = peer;
                }
            }
            None => {
                self.index.insert(peer.id.clone(), self.peers.len());
                self.peers.push(peer);
            }
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerSnapshot> {
        self.index.get(peer_id).and_then(|&pos| self.peers.get(pos))
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.index.contains_key(peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerSnapshot> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Whether `peer_id` currently publishes `tag`.
    pub fn has_track(&self, peer_id: &PeerId, tag: MediaTag) -> bool {
        self.get(peer_id).is_some_and(|peer| peer.publishes(tag))
    }

    /// Roster summaries sorted by join time. Stable: peers that joined at
    /// the same instant keep server order.
    pub fn sorted_roster(&self) -> Vec<RosterEntry> {
        let mut roster: Vec<RosterEntry> = self.peers.iter().map(RosterEntry::from).collect();
        roster.sort_by_key(|entry| entry.join_ts);
        roster
    }
}

impl FromIterator<PeerSnapshot> for PeerTable {
    fn from_iter<I: IntoIterator<Item = PeerSnapshot>>(iter: I) -> Self {
        let mut table = PeerTable::new();
        for peer in iter {
            table.insert(peer);
        }
        table
    }
}

impl<'de> Deserialize<'de> for PeerTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PeerTableVisitor;

        impl<'de> Visitor<'de> for PeerTableVisitor {
            type Value = PeerTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of peer id to peer state")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<PeerTable, A::Error> {
                let mut table = PeerTable::new();
                while let Some((id, record)) = map.next_entry::<PeerId, PeerRecord>()? {
                    table.insert(PeerSnapshot::from_record(id, record));
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(PeerTableVisitor)
    }
}

impl Serialize for PeerTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.peers.len()))?;
        for peer in &self.peers {
            map.serialize_entry(&peer.id, &peer.to_record())?;
        }
        map.end()
    }
}

/// Loudest producer in the room, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSpeaker {
    #[serde(default)]
    pub peer_id: Option<PeerId>,
    #[serde(default)]
    pub producer_id: Option<ProducerId>,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Body of the `sync` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    #[serde(default)]
    pub peers: PeerTable,
    #[serde(default)]
    pub active_speaker: ActiveSpeaker,
}

// ===== Roster =====

/// Summary used to detect roster changes: `{id, joinTs, media}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: PeerId,
    pub join_ts: u64,
    pub media: BTreeMap<MediaTag, TrackInfo>,
}

impl From<&PeerSnapshot> for RosterEntry {
    fn from(peer: &PeerSnapshot) -> Self {
        Self {
            id: peer.id.clone(),
            join_ts: peer.join_ts,
            media: peer.media.clone(),
        }
    }
}

/// Keyed difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    /// Present now, absent before (new snapshot order).
    pub joined: Vec<PeerId>,
    /// Present before, absent now (previous snapshot order).
    pub departed: Vec<PeerId>,
    /// Present in both with a different join time or media set.
    pub updated: Vec<PeerId>,
    /// Sorted roster summaries differ.
    pub roster_changed: bool,
}

impl RosterDiff {
    pub fn between(prev: &PeerTable, next: &PeerTable) -> Self {
        let departed = prev
            .iter()
            .filter(|peer| !next.contains(&peer.id))
            .map(|peer| peer.id.clone())
            .collect();

        let mut joined = Vec::new();
        let mut updated = Vec::new();
        for peer in next.iter() {
            match prev.get(&peer.id) {
                None => joined.push(peer.id.clone()),
                Some(before) => {
                    if before.join_ts != peer.join_ts || before.media != peer.media {
                        updated.push(peer.id.clone());
                    }
                }
            }
        }

        Self {
            joined,
            departed,
            updated,
            roster_changed: prev.sorted_roster() != next.sorted_roster(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.roster_changed
            && self.joined.is_empty()
            && self.departed.is_empty()
            && self.updated.is_empty()
    }
}

// ===== Reconciliation =====

/// Decide which consumers must be closed when `next` replaces `prev`.
///
/// 1. Consumers of peers present in `prev` and absent from `next` close
///    with [`CloseReason::PeerDeparted`].
/// 2. Every other consumer whose `(peer, tag)` has no media entry in `next`
///    closes with [`CloseReason::TrackStopped`].
///
/// A paused track keeps its media entry and is never closed. Each key
/// appears at most once; the result is in key order.
pub fn plan_consumer_closures<'a>(
    prev: &PeerTable,
    next: &PeerTable,
    consumers: impl IntoIterator<Item = &'a ConsumerKey>,
) -> Vec<(ConsumerKey, CloseReason)> {
    let mut seen = HashSet::new();
    let mut plan = Vec::new();

    for key in consumers {
        if !seen.insert(key) {
            continue;
        }
        if prev.contains(&key.peer_id) && !next.contains(&key.peer_id) {
            plan.push((key.clone(), CloseReason::PeerDeparted));
        } else if !next.has_track(&key.peer_id, key.media_tag) {
            plan.push((key.clone(), CloseReason::TrackStopped));
        }
    }

    plan.sort_by(|a, b| a.0.cmp(&b.0));
    plan
}

// ===== Layer display =====

/// One selectable simulcast layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerOption {
    pub spatial_layer: u8,
    pub rid: Option<String>,
    pub kbps: u64,
    pub selected: bool,
}

/// Selectable layers for a producer's stats, ordered by RTP stream id.
///
/// With an unknown current layer the highest is marked selected; an idle
/// consumer has none selected.
pub fn layer_options(stats: &StatEntry, current: LayerSelection) -> Vec<LayerOption> {
    let mut records: Vec<&StatRecord> = stats.records().iter().collect();
    records.sort_by(|a, b| a.rid.cmp(&b.rid));

    let last = records.len().saturating_sub(1);
    records
        .into_iter()
        .enumerate()
        .filter_map(|(i, record)| {
            let spatial_layer = u8::try_from(i).ok()?;
            let selected = match current {
                LayerSelection::Layer(layer) => layer == spatial_layer,
                LayerSelection::Unknown => i == last,
                LayerSelection::Idle => false,
            };
            Some(LayerOption {
                spatial_layer,
                rid: record.rid.clone(),
                kbps: kbps(record.bitrate),
                selected,
            })
        })
        .collect()
}

/// Bits per second to whole kilobits per second, rounded down.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn kbps(bitrate: f64) -> u64 {
    if bitrate.is_finite() && bitrate > 0.0 {
        (bitrate / 1000.0).floor() as u64
    } else {
        0
    }
}
