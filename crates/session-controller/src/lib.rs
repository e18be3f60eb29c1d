//! Session Controller Library
//!
//! Participant-side session engine for an SFU-based video call. It keeps a
//! local set of media objects consistent with a server-side room by polling
//! the room state:
//!
//! - Join/leave handshake over a request/response signaling channel
//! - One send and one receive transport per session, built by a media engine
//! - Local producers per media tag, with a two-rung simulcast ladder for the
//!   camera
//! - Remote consumers per `(peer, media tag)`, closed when the peer departs
//!   or stops publishing the track
//! - A read-only [`view::SessionView`] rebuilt after every change
//!
//! # Architecture
//!
//! ```text
//! SessionControllerActor (one per participant session)
//! ├── TransportManager (send + recv engine transports)
//! ├── ProducerRegistry (cam-video, cam-audio, screen-video, screen-audio)
//! ├── ConsumerRegistry ((peer, tag) -> consumer)
//! └── sync poller (one per join, epoch-tagged results)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Poll, don't push**: the room snapshot is fetched on a fixed interval
//!   and replaces the previous one wholesale
//! - **Single owner**: all session state lives in one actor; engine
//!   callbacks never re-enter it
//! - **No reconnect**: a lost transport tears the whole session down
//!
//! # Modules
//!
//! - [`actors`] - Session actor, handle and poller
//! - [`config`] - Configuration from environment
//! - [`engine`] - Media engine traits
//! - [`signaling`] - Signaling gate and typed client
//! - [`snapshot`] - Room snapshot model, diffing and reconciliation planning
//! - [`monitor`] - Media-less room observer used by `session-monitor`

pub mod actors;
pub mod config;
pub mod consumers;
pub mod engine;
pub mod errors;
pub mod monitor;
pub mod observability;
pub mod producers;
pub mod signaling;
pub mod snapshot;
pub mod transport;
pub mod view;
