//! Integration tests for local producers.
//!
//! Camera and screen sending, pause preferences, simulcast ladder, track
//! replacement and `stop_streams`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use common::types::{MediaTag, ProducerId};
use sc_test_utils::{audio_track, video_track, TestPeer, TestRoom, TestSession};
use serde_json::json;
use session_controller::engine::{RtpEncoding, TransportDirection};
use session_controller::errors::{EngineError, SessionError, SignalingError};
use session_controller::signaling::Endpoint;

async fn sending_camera() -> TestSession {
    let session = TestSession::spawn("peer-a");
    session
        .handle
        .send_camera(video_track("cam-1"), audio_track("mic-1"))
        .await
        .unwrap();
    session
}

// ============================================================================
// Camera
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_send_camera_joins_and_produces() {
    let session = sending_camera().await;

    assert_eq!(
        session.gate.endpoints(false),
        vec![
            Endpoint::JoinAsNewPeer,
            Endpoint::CreateTransport,
            Endpoint::ConnectTransport,
            Endpoint::SendTrack,
            Endpoint::SendTrack,
        ]
    );

    let sends = session.gate.calls_to(Endpoint::SendTrack);
    assert_eq!(sends[0]["transportId"], "send-transport-1");
    assert_eq!(sends[0]["kind"], "video");
    assert_eq!(sends[0]["paused"], false);
    assert_eq!(sends[0]["appData"], json!({"mediaTag": "cam-video"}));
    assert_eq!(sends[1]["kind"], "audio");
    assert_eq!(sends[1]["appData"], json!({"mediaTag": "cam-audio"}));

    let view = session.view();
    assert!(view.joined);
    let tags: Vec<MediaTag> = view.producers.iter().map(|p| p.media_tag).collect();
    assert_eq!(tags, vec![MediaTag::CamVideo, MediaTag::CamAudio]);
    assert_eq!(
        view.producer(MediaTag::CamVideo).unwrap().producer_id,
        ProducerId::from("producer-1")
    );

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_camera_uses_simulcast_ladder() {
    let session = sending_camera().await;

    let video = session.engine.producer(MediaTag::CamVideo).unwrap();
    assert_eq!(
        video.encodings,
        vec![
            RtpEncoding {
                max_bitrate: Some(96_000),
                scale_resolution_down_by: Some(4.0),
            },
            RtpEncoding {
                max_bitrate: Some(680_000),
                scale_resolution_down_by: Some(1.0),
            },
        ]
    );
    let audio = session.engine.producer(MediaTag::CamAudio).unwrap();
    assert!(audio.encodings.is_empty());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_custom_ladder_from_settings() {
    let session = TestSession::spawn_with("peer-a", sc_test_utils::FakeEngine::new(), |s| {
        s.simulcast.low_max_bitrate = 150_000;
        s.simulcast.high_max_bitrate = 1_200_000;
    });
    session
        .handle
        .send_camera(video_track("cam-1"), audio_track("mic-1"))
        .await
        .unwrap();

    let video = session.engine.producer(MediaTag::CamVideo).unwrap();
    assert_eq!(video.encodings[0].max_bitrate, Some(150_000));
    assert_eq!(video.encodings[1].max_bitrate, Some(1_200_000));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_camera_twice_is_refused() {
    let session = sending_camera().await;

    let err = session
        .handle
        .send_camera(video_track("cam-2"), audio_track("mic-2"))
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::AlreadySending(MediaTag::CamVideo));
    assert_eq!(session.gate.count(Endpoint::SendTrack), 2);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_track_rejection_fails_send_camera() {
    let session = TestSession::spawn("peer-a");
    session
        .gate
        .fail_with_server_error(Endpoint::SendTrack, "transport not found");

    let err = session
        .handle
        .send_camera(video_track("cam-1"), audio_track("mic-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Engine(EngineError::Rejected(_))));
    assert!(session.view().producers.is_empty());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_microphone_rolls_back_camera() {
    let session = TestSession::spawn("peer-a");
    session.gate.fail_matching(
        Endpoint::SendTrack,
        "kind",
        json!("audio"),
        SignalingError::Server {
            endpoint: Endpoint::SendTrack,
            message: "audio codec unsupported".to_string(),
        },
    );

    let err = session
        .handle
        .send_camera(video_track("cam-1"), audio_track("mic-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Engine(EngineError::Rejected(_))));
    assert!(session.view().producers.is_empty());
    assert!(session.engine.producer(MediaTag::CamVideo).unwrap().is_closed());
    assert_eq!(
        session.gate.calls_to(Endpoint::CloseProducer),
        vec![json!({"producerId": "producer-1", "peerId": "peer-a"})]
    );

    // Nothing left half-started, so a retry goes through.
    session.gate.clear_failure(Endpoint::SendTrack);
    session
        .handle
        .send_camera(video_track("cam-1"), audio_track("mic-1"))
        .await
        .unwrap();

    let tags: Vec<MediaTag> = session.view().producers.iter().map(|p| p.media_tag).collect();
    assert_eq!(tags, vec![MediaTag::CamVideo, MediaTag::CamAudio]);
    assert_eq!(session.gate.count(Endpoint::CreateTransport), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_screen_audio_rolls_back_screen_video() {
    let session = sending_camera().await;
    session.gate.fail_matching(
        Endpoint::SendTrack,
        "kind",
        json!("audio"),
        SignalingError::Http("connection reset".to_string()),
    );

    assert!(session
        .handle
        .start_screen_share(video_track("screen-1"), Some(audio_track("screen-audio-1")))
        .await
        .is_err());

    let tags: Vec<MediaTag> = session.view().producers.iter().map(|p| p.media_tag).collect();
    assert_eq!(tags, vec![MediaTag::CamVideo, MediaTag::CamAudio]);
    assert!(session.engine.producer(MediaTag::ScreenVideo).unwrap().is_closed());
    assert!(!session.engine.producer(MediaTag::CamVideo).unwrap().is_closed());

    session.gate.clear_failure(Endpoint::SendTrack);
    session
        .handle
        .start_screen_share(video_track("screen-1"), Some(audio_track("screen-audio-1")))
        .await
        .unwrap();
    assert_eq!(session.view().producers.len(), 4);

    session.shutdown().await;
}

// ============================================================================
// Pause preferences
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_paused_preference_applies_to_new_camera() {
    let session = TestSession::spawn("peer-a");

    session
        .handle
        .pause_producer(MediaTag::CamVideo)
        .await
        .unwrap();
    assert_eq!(session.gate.count(Endpoint::PauseProducer), 0);

    session
        .handle
        .send_camera(video_track("cam-1"), audio_track("mic-1"))
        .await
        .unwrap();

    let sends = session.gate.calls_to(Endpoint::SendTrack);
    assert_eq!(sends[0]["paused"], true);
    assert_eq!(sends[1]["paused"], false);
    assert!(session.engine.producer(MediaTag::CamVideo).unwrap().is_paused());
    assert!(session.view().producer(MediaTag::CamVideo).unwrap().paused);

    session
        .handle
        .resume_producer(MediaTag::CamVideo)
        .await
        .unwrap();

    assert_eq!(
        session.gate.calls_to(Endpoint::ResumeProducer),
        vec![json!({"producerId": "producer-1", "peerId": "peer-a"})]
    );
    assert!(!session.engine.producer(MediaTag::CamVideo).unwrap().is_paused());
    assert!(!session.view().producer(MediaTag::CamVideo).unwrap().paused);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_screen_ignores_pause_preference_at_creation() {
    let session = TestSession::spawn("peer-a");
    session
        .handle
        .set_media_paused(MediaTag::ScreenVideo, true)
        .await
        .unwrap();

    session
        .handle
        .start_screen_share(video_track("screen-1"), None)
        .await
        .unwrap();

    assert_eq!(session.gate.calls_to(Endpoint::SendTrack)[0]["paused"], false);
    assert!(!session.engine.producer(MediaTag::ScreenVideo).unwrap().is_paused());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_producer_pause_keeps_sending() {
    let session = sending_camera().await;
    session
        .gate
        .fail_with_server_error(Endpoint::PauseProducer, "not allowed");

    session
        .handle
        .pause_producer(MediaTag::CamAudio)
        .await
        .unwrap();

    assert!(!session.engine.producer(MediaTag::CamAudio).unwrap().is_paused());
    session.shutdown().await;
}

// ============================================================================
// Screen share
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_screen_share_start_and_stop() {
    let session = sending_camera().await;

    session
        .handle
        .start_screen_share(video_track("screen-1"), Some(audio_track("screen-audio-1")))
        .await
        .unwrap();

    let screen = session.engine.producer(MediaTag::ScreenVideo).unwrap();
    assert!(screen.encodings.is_empty());
    assert_eq!(session.view().producers.len(), 4);
    // Shares the camera's send transport.
    assert_eq!(session.gate.count(Endpoint::CreateTransport), 1);

    let err = session
        .handle
        .start_screen_share(video_track("screen-2"), None)
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::AlreadySending(MediaTag::ScreenVideo));

    session.handle.stop_screen_share().await.unwrap();

    let closed: Vec<_> = session
        .gate
        .calls_to(Endpoint::CloseProducer)
        .into_iter()
        .map(|body| body["producerId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(closed, vec!["producer-3", "producer-4"]);
    assert!(session.engine.producer(MediaTag::ScreenVideo).unwrap().is_closed());
    assert!(session.engine.producer(MediaTag::ScreenAudio).unwrap().is_closed());
    assert!(!session.engine.producer(MediaTag::CamVideo).unwrap().is_closed());

    let tags: Vec<MediaTag> = session.view().producers.iter().map(|p| p.media_tag).collect();
    assert_eq!(tags, vec![MediaTag::CamVideo, MediaTag::CamAudio]);

    session.shutdown().await;
}

// ============================================================================
// Track replacement and layers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_replace_camera_tracks() {
    let session = sending_camera().await;

    session
        .handle
        .replace_camera_tracks(video_track("cam-2"), audio_track("mic-2"))
        .await
        .unwrap();

    assert_eq!(session.engine.producer(MediaTag::CamVideo).unwrap().track().id, "cam-2");
    assert_eq!(session.engine.producer(MediaTag::CamAudio).unwrap().track().id, "mic-2");
    // Local swap only.
    assert_eq!(session.gate.count(Endpoint::SendTrack), 2);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_replace_without_camera_is_refused() {
    let session = TestSession::spawn("peer-a");
    session.handle.join().await.unwrap();

    let err = session
        .handle
        .replace_camera_tracks(video_track("cam-2"), audio_track("mic-2"))
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::NoCameraProducer);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_producer_max_layer() {
    let session = sending_camera().await;

    session
        .handle
        .set_producer_max_layer(MediaTag::CamVideo, 0)
        .await
        .unwrap();
    assert_eq!(
        session.engine.producer(MediaTag::CamVideo).unwrap().max_spatial_layer(),
        Some(0)
    );
    assert_eq!(
        session.view().producer(MediaTag::CamVideo).unwrap().max_spatial_layer,
        Some(0)
    );

    let err = session
        .handle
        .set_producer_max_layer(MediaTag::CamVideo, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Engine(EngineError::Rejected(_))));
    assert_eq!(
        session.view().producer(MediaTag::CamVideo).unwrap().max_spatial_layer,
        Some(0)
    );

    let err = session
        .handle
        .set_producer_max_layer(MediaTag::ScreenVideo, 0)
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::NoProducer(MediaTag::ScreenVideo));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_producer_layers_from_own_stats() {
    let session = sending_camera().await;
    session.gate.set_sync(
        TestRoom::new()
            .with_peer(
                TestPeer::new("peer-a")
                    .with_track(MediaTag::CamVideo)
                    .with_layer_stats("producer-1", &[("r0", 95_000.0), ("r1", 650_000.0)]),
            )
            .to_sync_json(),
    );
    session.tick().await;

    let view = session.view();
    let video = view.producer(MediaTag::CamVideo).unwrap();
    assert_eq!(video.layers.len(), 2);
    assert_eq!(video.layers[1].kbps, 650);
    // No cap set: top layer is the selected one.
    assert!(video.layers[1].selected);

    session.shutdown().await;
}

// ============================================================================
// stop_streams
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_streams_closes_send_transport() {
    let session = sending_camera().await;

    session.handle.stop_streams().await.unwrap();

    assert_eq!(
        session.gate.calls_to(Endpoint::CloseTransport),
        vec![json!({"transportId": "send-transport-1", "peerId": "peer-a"})]
    );
    assert!(session
        .engine
        .transport(TransportDirection::Send)
        .unwrap()
        .is_closed());
    assert!(session.engine.producers().iter().all(|p| p.is_closed()));
    assert!(session.view().producers.is_empty());

    // Sending again builds a new send transport.
    session
        .handle
        .send_camera(video_track("cam-1"), audio_track("mic-1"))
        .await
        .unwrap();
    assert_eq!(session.gate.count(Endpoint::CreateTransport), 2);
    assert_eq!(
        session.engine.transport(TransportDirection::Send).unwrap().id.as_str(),
        "send-transport-2"
    );

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_streams_without_transport_is_noop() {
    let session = TestSession::spawn("peer-a");
    session.handle.join().await.unwrap();

    session.handle.stop_streams().await.unwrap();

    assert_eq!(session.gate.count(Endpoint::CloseTransport), 0);
    session.shutdown().await;
}
