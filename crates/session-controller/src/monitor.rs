//! Room monitor.
//!
//! Tracks the room without media: each snapshot is diffed against the
//! previous one and roster and speaker changes are logged.

use crate::snapshot::{PeerTable, RosterDiff, SyncResponse};
use common::types::PeerId;
use tracing::{debug, info};

/// What changed between two observations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub diff: RosterDiff,
    /// `Some(new)` when the active speaker changed; the inner `None` means
    /// nobody is speaking.
    pub speaker_changed: Option<Option<PeerId>>,
}

impl MonitorReport {
    pub fn is_quiet(&self) -> bool {
        self.diff.is_empty() && self.speaker_changed.is_none()
    }
}

#[derive(Debug, Default)]
pub struct RoomMonitor {
    peers: PeerTable,
    active_speaker: Option<PeerId>,
    observations: u64,
}

impl RoomMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn active_speaker(&self) -> Option<&PeerId> {
        self.active_speaker.as_ref()
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Apply a snapshot and log what changed.
    pub fn observe(&mut self, sync: SyncResponse) -> MonitorReport {
        self.observations += 1;
        let diff = RosterDiff::between(&self.peers, &sync.peers);

        for peer_id in &diff.joined {
            let media = sync
                .peers
                .get(peer_id)
                .map(|peer| {
                    peer.media
                        .keys()
                        .map(|tag| tag.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            info!(target: "sc.monitor", peer_id = %peer_id, media = %media, "Peer joined");
        }
        for peer_id in &diff.departed {
            info!(target: "sc.monitor", peer_id = %peer_id, "Peer left");
        }
        for peer_id in &diff.updated {
            info!(target: "sc.monitor", peer_id = %peer_id, "Peer media changed");
        }

        let speaker = sync.active_speaker.peer_id;
        let speaker_changed = if speaker == self.active_speaker {
            None
        } else {
            match &speaker {
                Some(peer_id) => info!(target: "sc.monitor", peer_id = %peer_id, "Active speaker changed"),
                None => debug!(target: "sc.monitor", "No active speaker"),
            }
            self.active_speaker = speaker.clone();
            Some(speaker)
        };

        if diff.roster_changed {
            info!(target: "sc.monitor", peers = sync.peers.len(), "Roster changed");
        }
        self.peers = sync.peers;

        MonitorReport {
            diff,
            speaker_changed,
        }
    }
}
