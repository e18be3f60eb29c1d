//! Producer Registry.
//!
//! Local producers live in four fixed slots, one per [`MediaTag`]. Pausing
//! is server-first: the server is told before the engine stops sending, so
//! a refused pause leaves the local producer untouched.

use crate::config::SimulcastLadder;
use crate::engine::{EngineProducer, MediaTrack, RtpEncoding};
use crate::errors::SessionError;
use crate::signaling::Signaling;
use common::types::{MediaKind, MediaTag, ProducerId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Encodings for a new producer in `tag`'s slot.
///
/// Camera video gets the two-rung ladder (low rung first). Everything else
/// gets a single unconstrained encoding, expressed as an empty list.
pub fn encodings_for(tag: MediaTag, ladder: &SimulcastLadder) -> Vec<RtpEncoding> {
    match tag {
        MediaTag::CamVideo => vec![
            RtpEncoding {
                max_bitrate: Some(ladder.low_max_bitrate),
                scale_resolution_down_by: Some(4.0),
            },
            RtpEncoding {
                max_bitrate: Some(ladder.high_max_bitrate),
                scale_resolution_down_by: Some(1.0),
            },
        ],
        MediaTag::CamAudio | MediaTag::ScreenVideo | MediaTag::ScreenAudio => Vec::new(),
    }
}

/// User's wish to keep a local track paused, per slot.
///
/// Shared with the send transport's event handler, which reads it when the
/// engine registers a new producer with the server.
#[derive(Debug, Clone, Default)]
pub struct LocalMediaPrefs {
    flags: Arc<[AtomicBool; 4]>,
}

impl LocalMediaPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(tag: MediaTag) -> usize {
        match tag {
            MediaTag::CamVideo => 0,
            MediaTag::CamAudio => 1,
            MediaTag::ScreenVideo => 2,
            MediaTag::ScreenAudio => 3,
        }
    }

    pub fn is_paused(&self, tag: MediaTag) -> bool {
        self.flags
            .get(Self::slot(tag))
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn set_paused(&self, tag: MediaTag, paused: bool) {
        if let Some(flag) = self.flags.get(Self::slot(tag)) {
            flag.store(paused, Ordering::Release);
        }
    }

    /// Initial paused flag for a producer being created in `tag`'s slot.
    ///
    /// Only the camera pair honors the preference; screen tracks always start
    /// live.
    pub fn initial_paused(&self, tag: MediaTag) -> bool {
        tag.is_camera() && self.is_paused(tag)
    }
}

/// A producer occupying one slot.
pub struct LocalProducer {
    media_tag: MediaTag,
    producer: Box<dyn EngineProducer>,
    max_spatial_layer: Option<u8>,
}

impl LocalProducer {
    pub fn new(media_tag: MediaTag, producer: Box<dyn EngineProducer>) -> Self {
        Self {
            media_tag,
            producer,
            max_spatial_layer: None,
        }
    }

    pub fn media_tag(&self) -> MediaTag {
        self.media_tag
    }

    pub fn id(&self) -> &ProducerId {
        self.producer.id()
    }

    pub fn kind(&self) -> MediaKind {
        self.producer.kind()
    }

    pub fn is_paused(&self) -> bool {
        self.producer.is_paused()
    }

    /// Locally selected max spatial layer; `None` until one is chosen.
    pub fn max_spatial_layer(&self) -> Option<u8> {
        self.max_spatial_layer
    }

    pub fn engine(&self) -> &dyn EngineProducer {
        self.producer.as_ref()
    }
}

impl fmt::Debug for LocalProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProducer")
            .field("media_tag", &self.media_tag)
            .field("id", self.producer.id())
            .field("paused", &self.producer.is_paused())
            .field("max_spatial_layer", &self.max_spatial_layer)
            .finish()
    }
}

#[derive(Default)]
pub struct ProducerRegistry {
    slots: BTreeMap<MediaTag, LocalProducer>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tag: MediaTag) -> bool {
        self.slots.contains_key(&tag)
    }

    pub fn get(&self, tag: MediaTag) -> Option<&LocalProducer> {
        self.slots.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Producers in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &LocalProducer> {
        self.slots.values()
    }

    /// Occupy a slot, returning the previous occupant if any.
    pub fn insert(&mut self, producer: LocalProducer) -> Option<LocalProducer> {
        self.slots.insert(producer.media_tag(), producer)
    }

    /// Empty all four slots without signaling.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Pause or resume the producer in `tag`'s slot.
    ///
    /// Returns whether the server accepted the change. No-op (`false`) for
    /// an empty slot.
    pub async fn set_paused(&self, tag: MediaTag, paused: bool, signaling: &Signaling) -> bool {
        let Some(producer) = self.slots.get(&tag) else {
            debug!(target: "sc.producers", media_tag = %tag, "No producer to pause/resume");
            return false;
        };

        let signaled = if paused {
            signaling.pause_producer(producer.id()).await
        } else {
            signaling.resume_producer(producer.id()).await
        };
        if let Err(e) = signaled {
            warn!(
                target: "sc.producers",
                media_tag = %tag,
                producer_id = %producer.id(),
                paused,
                error = %e,
                "Server refused producer pause state change"
            );
            return false;
        }

        let applied = if paused {
            producer.engine().pause().await
        } else {
            producer.engine().resume().await
        };
        if let Err(e) = applied {
            warn!(
                target: "sc.producers",
                media_tag = %tag,
                producer_id = %producer.id(),
                paused,
                error = %e,
                "Engine failed to apply producer pause state"
            );
        }
        true
    }

    /// Stop sending one track: pause locally, tell the server, close.
    ///
    /// Returns whether the slot held a producer.
    pub async fn close(&mut self, tag: MediaTag, signaling: &Signaling) -> bool {
        let Some(producer) = self.slots.remove(&tag) else {
            return false;
        };

        info!(
            target: "sc.producers",
            media_tag = %tag,
            producer_id = %producer.id(),
            "Closing producer"
        );

        if let Err(e) = producer.engine().pause().await {
            debug!(target: "sc.producers", media_tag = %tag, error = %e, "Pause before close failed");
        }
        if let Err(e) = signaling.close_producer(producer.id()).await {
            warn!(
                target: "sc.producers",
                producer_id = %producer.id(),
                error = %e,
                "close-producer signaling failed, closing locally"
            );
        }
        producer.engine().close().await;
        true
    }

    /// Swap the source track of the producer in `tag`'s slot.
    pub async fn replace_track(&self, tag: MediaTag, track: MediaTrack) -> Result<(), SessionError> {
        let producer = self.slots.get(&tag).ok_or(SessionError::NoProducer(tag))?;
        producer.engine().replace_track(track).await?;
        Ok(())
    }

    /// Cap the spatial layer the engine sends for `tag`.
    pub async fn set_max_spatial_layer(
        &mut self,
        tag: MediaTag,
        spatial_layer: u8,
    ) -> Result<(), SessionError> {
        let producer = self
            .slots
            .get_mut(&tag)
            .ok_or(SessionError::NoProducer(tag))?;
        producer.engine().set_max_spatial_layer(spatial_layer).await?;
        producer.max_spatial_layer = Some(spatial_layer);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubProducer {
        id: ProducerId,
        kind: MediaKind,
        layer: Mutex<Option<u8>>,
        reject_layers: bool,
    }

    impl StubProducer {
        fn boxed(id: &str, kind: MediaKind) -> Box<dyn EngineProducer> {
            Box::new(Self {
                id: ProducerId::from(id),
                kind,
                layer: Mutex::new(None),
                reject_layers: false,
            })
        }
    }

    #[async_trait]
    impl EngineProducer for StubProducer {
        fn id(&self) -> &ProducerId {
            &self.id
        }
        fn kind(&self) -> MediaKind {
            self.kind
        }
        fn is_paused(&self) -> bool {
            false
        }
        fn is_closed(&self) -> bool {
            false
        }
        async fn pause(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn resume(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn replace_track(&self, _track: MediaTrack) -> Result<(), EngineError> {
            Ok(())
        }
        async fn set_max_spatial_layer(&self, spatial_layer: u8) -> Result<(), EngineError> {
            if self.reject_layers {
                return Err(EngineError::Unsupported("no simulcast".into()));
            }
            *self.layer.lock().unwrap() = Some(spatial_layer);
            Ok(())
        }
        async fn close(&self) {}
    }

    #[test]
    fn test_camera_video_ladder() {
        let encodings = encodings_for(MediaTag::CamVideo, &SimulcastLadder::default());
        assert_eq!(encodings.len(), 2);
        assert_eq!(encodings[0].max_bitrate, Some(96_000));
        assert_eq!(encodings[0].scale_resolution_down_by, Some(4.0));
        assert_eq!(encodings[1].max_bitrate, Some(680_000));
        assert_eq!(encodings[1].scale_resolution_down_by, Some(1.0));
    }

    #[test]
    fn test_screen_video_unconstrained() {
        let ladder = SimulcastLadder::default();
        assert!(encodings_for(MediaTag::ScreenVideo, &ladder).is_empty());
        assert!(encodings_for(MediaTag::CamAudio, &ladder).is_empty());
        assert!(encodings_for(MediaTag::ScreenAudio, &ladder).is_empty());
    }

    #[test]
    fn test_prefs_default_live_and_shared() {
        let prefs = LocalMediaPrefs::new();
        for tag in MediaTag::ALL {
            assert!(!prefs.is_paused(tag));
        }

        let shared = prefs.clone();
        shared.set_paused(MediaTag::CamAudio, true);
        assert!(prefs.is_paused(MediaTag::CamAudio));
        assert!(prefs.initial_paused(MediaTag::CamAudio));
    }

    #[test]
    fn test_screen_prefs_do_not_start_paused() {
        let prefs = LocalMediaPrefs::new();
        prefs.set_paused(MediaTag::ScreenVideo, true);
        assert!(prefs.is_paused(MediaTag::ScreenVideo));
        assert!(!prefs.initial_paused(MediaTag::ScreenVideo));
    }

    #[test]
    fn test_slots_are_per_tag() {
        let mut registry = ProducerRegistry::new();
        assert!(registry
            .insert(LocalProducer::new(
                MediaTag::CamVideo,
                StubProducer::boxed("p-1", MediaKind::Video)
            ))
            .is_none());
        registry.insert(LocalProducer::new(
            MediaTag::ScreenVideo,
            StubProducer::boxed("p-2", MediaKind::Video),
        ));

        let previous = registry
            .insert(LocalProducer::new(
                MediaTag::CamVideo,
                StubProducer::boxed("p-3", MediaKind::Video),
            ))
            .unwrap();
        assert_eq!(previous.id().as_str(), "p-1");
        assert_eq!(registry.len(), 2);

        let order: Vec<_> = registry.iter().map(LocalProducer::media_tag).collect();
        assert_eq!(order, vec![MediaTag::CamVideo, MediaTag::ScreenVideo]);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_set_max_spatial_layer_remembered() {
        let mut registry = ProducerRegistry::new();
        registry.insert(LocalProducer::new(
            MediaTag::CamVideo,
            StubProducer::boxed("p-1", MediaKind::Video),
        ));

        registry
            .set_max_spatial_layer(MediaTag::CamVideo, 0)
            .await
            .unwrap();
        assert_eq!(
            registry.get(MediaTag::CamVideo).unwrap().max_spatial_layer(),
            Some(0)
        );

        let err = registry
            .set_max_spatial_layer(MediaTag::ScreenVideo, 1)
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::NoProducer(MediaTag::ScreenVideo));
    }

    #[tokio::test]
    async fn test_rejected_layer_not_remembered() {
        let mut registry = ProducerRegistry::new();
        registry.insert(LocalProducer::new(
            MediaTag::CamVideo,
            Box::new(StubProducer {
                id: ProducerId::from("p-1"),
                kind: MediaKind::Video,
                layer: Mutex::new(None),
                reject_layers: true,
            }),
        ));

        let err = registry
            .set_max_spatial_layer(MediaTag::CamVideo, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Engine(EngineError::Unsupported(_))));
        assert_eq!(
            registry.get(MediaTag::CamVideo).unwrap().max_spatial_layer(),
            None
        );
    }

    #[tokio::test]
    async fn test_replace_track_requires_producer() {
        let registry = ProducerRegistry::new();
        let err = registry
            .replace_track(
                MediaTag::CamVideo,
                MediaTrack::new("t", MediaKind::Video, "cam"),
            )
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::NoProducer(MediaTag::CamVideo));
    }
}
