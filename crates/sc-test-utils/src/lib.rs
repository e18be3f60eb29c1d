//! # SC Test Utilities
//!
//! Shared test utilities for the Session Controller.
//!
//! This crate provides in-memory stand-ins for the two collaborators the
//! session drives, so actor-level tests run without a signaling server or a
//! media stack.
//!
//! ## Modules
//!
//! - `fake_engine` - In-memory media engine with scriptable connection state
//! - `mock_signaling` - Recording signaling gate with canned responses
//! - `fixtures` - Room snapshot builders (peers, tracks, stats)
//! - `harness` - Spawns a session actor wired to the fakes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let session = TestSession::spawn("peer-a");
//!     session.gate.set_sync(
//!         TestRoom::new()
//!             .with_peer(TestPeer::new("peer-b").with_track(MediaTag::CamVideo))
//!             .to_sync_json(),
//!     );
//!
//!     session.handle.join().await.unwrap();
//!     session.wait_for_roster(2).await;
//! }
//! ```

pub mod fake_engine;
pub mod fixtures;
pub mod harness;
pub mod mock_signaling;

pub use fake_engine::{FakeConsumer, FakeEngine, FakeProducer, FakeTransport};
pub use fixtures::{audio_track, video_track, TestPeer, TestRoom};
pub use harness::{settle, TestSession, TEST_POLL_INTERVAL};
pub use mock_signaling::{MockSignalingGate, RecordedCall};

pub use common::types::MediaTag;
