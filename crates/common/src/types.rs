//! Common data types for session controller components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a peer in the room
    #[derive(Default)]
    PeerId
);

string_id!(
    /// Server-assigned identifier for a producer
    ProducerId
);

string_id!(
    /// Server-assigned identifier for a consumer
    ConsumerId
);

string_id!(
    /// Server-assigned identifier for a transport
    TransportId
);

impl PeerId {
    /// Create a new random peer ID
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical track identifier.
///
/// Every peer publishes at most one track per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MediaTag {
    #[serde(rename = "cam-video")]
    CamVideo,
    #[serde(rename = "cam-audio")]
    CamAudio,
    #[serde(rename = "screen-video")]
    ScreenVideo,
    #[serde(rename = "screen-audio")]
    ScreenAudio,
}

impl MediaTag {
    /// All well-known tags, in slot order.
    pub const ALL: [MediaTag; 4] = [
        MediaTag::CamVideo,
        MediaTag::CamAudio,
        MediaTag::ScreenVideo,
        MediaTag::ScreenAudio,
    ];

    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaTag::CamVideo => "cam-video",
            MediaTag::CamAudio => "cam-audio",
            MediaTag::ScreenVideo => "screen-video",
            MediaTag::ScreenAudio => "screen-audio",
        }
    }

    /// Media kind carried by tracks with this tag.
    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        match self {
            MediaTag::CamVideo | MediaTag::ScreenVideo => MediaKind::Video,
            MediaTag::CamAudio | MediaTag::ScreenAudio => MediaKind::Audio,
        }
    }

    /// Whether this tag belongs to the camera/microphone pair.
    #[must_use]
    pub const fn is_camera(&self) -> bool {
        matches!(self, MediaTag::CamVideo | MediaTag::CamAudio)
    }
}

impl fmt::Display for MediaTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown media tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown media tag: {0}")]
pub struct UnknownMediaTag(pub String);

impl FromStr for MediaTag {
    type Err = UnknownMediaTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| UnknownMediaTag(s.to_string()))
    }
}
