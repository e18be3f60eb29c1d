//! Actor model implementation for the Session Controller.
//!
//! ```text
//! SessionControllerActor (one per participant session)
//! ├── owns transports, producer/consumer registries, last snapshot
//! ├── receives engine connection-state events (queued, never re-entrant)
//! └── supervises the sync poller (child cancellation token per join)
//! ```
//!
//! # Modules
//!
//! - [`session`] - `SessionControllerActor` and its handle
//! - [`poller`] - background `sync` polling task
//! - [`messages`] - message types for actor communication

pub mod messages;
pub mod poller;
pub mod session;

pub use messages::*;
pub use poller::{spawn_sync_loop, PollEvent};
pub use session::{SessionControllerActor, SessionControllerHandle};
