//! Mock signaling gate.
//!
//! Answers every endpoint with a plausible canned response, records every
//! request (with `peerId` merged in, as the HTTP gate sends it) and can be
//! told to fail individual endpoints.
//!
//! Generated ids are deterministic:
//!
//! | endpoint | response |
//! |----------|----------|
//! | `join-as-new-peer` | `routerRtpCapabilities` |
//! | `create-transport` | `transportOptions.id = "{direction}-transport-{n}"` |
//! | `send-track` | `id = "producer-{n}"` |
//! | `recv-track` | `id = "consumer-{n}"`, `producerId = "{peer}-{tag}"` |
//! | `sync` | whatever [`MockSignalingGate::set_sync`] stored |
//! | everything else | `{}` |

use async_trait::async_trait;
use common::types::{MediaTag, PeerId};
use serde_json::{json, Value};
use session_controller::errors::SignalingError;
use session_controller::signaling::{with_peer_id, Endpoint, SignalingGate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One request as the server would have received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: Endpoint,
    pub body: Value,
}

struct MatchingFailure {
    endpoint: Endpoint,
    field: String,
    value: Value,
    error: SignalingError,
}

struct Inner {
    calls: Vec<RecordedCall>,
    beacons: Vec<RecordedCall>,
    sync: Value,
    failures: HashMap<Endpoint, SignalingError>,
    /// Failures that apply only when `body[field] == value`.
    matching_failures: Vec<MatchingFailure>,
    transports: u32,
    producers: u32,
    consumers: u32,
}

/// Recording signaling gate. Clones share state.
#[derive(Clone)]
pub struct MockSignalingGate {
    peer_id: PeerId,
    inner: Arc<Mutex<Inner>>,
}

impl MockSignalingGate {
    #[must_use]
    pub fn new(peer_id: impl Into<PeerId>) -> Self {
        Self {
            peer_id: peer_id.into(),
            inner: Arc::new(Mutex::new(Inner {
                calls: Vec::new(),
                beacons: Vec::new(),
                sync: json!({"peers": {}, "activeSpeaker": {}}),
                failures: HashMap::new(),
                matching_failures: Vec::new(),
                transports: 0,
                producers: 0,
                consumers: 0,
            })),
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Body returned by every subsequent `sync`.
    pub fn set_sync(&self, body: Value) {
        self.inner.lock().unwrap().sync = body;
    }

    /// Fail every subsequent call to `endpoint` with `error`.
    pub fn fail(&self, endpoint: Endpoint, error: SignalingError) {
        self.inner.lock().unwrap().failures.insert(endpoint, error);
    }

    /// Answer `endpoint` with an `error` field.
    pub fn fail_with_server_error(&self, endpoint: Endpoint, message: &str) {
        self.fail(
            endpoint,
            SignalingError::Server {
                endpoint,
                message: message.to_string(),
            },
        );
    }

    /// Fail `endpoint` at the transport level.
    pub fn fail_with_http_error(&self, endpoint: Endpoint, message: &str) {
        self.fail(endpoint, SignalingError::Http(message.to_string()));
    }

    /// Fail calls to `endpoint` whose body has `field` equal to `value`,
    /// e.g. only the audio `send-track`.
    pub fn fail_matching(&self, endpoint: Endpoint, field: &str, value: Value, error: SignalingError) {
        self.inner.lock().unwrap().matching_failures.push(MatchingFailure {
            endpoint,
            field: field.to_string(),
            value,
            error,
        });
    }

    /// Drop every failure configured for `endpoint`.
    pub fn clear_failure(&self, endpoint: Endpoint) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.remove(&endpoint);
        inner.matching_failures.retain(|f| f.endpoint != endpoint);
    }

    /// Every request so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Endpoints called so far, in order, optionally skipping `sync`.
    #[must_use]
    pub fn endpoints(&self, include_sync: bool) -> Vec<Endpoint> {
        self.calls()
            .into_iter()
            .map(|call| call.endpoint)
            .filter(|endpoint| include_sync || *endpoint != Endpoint::Sync)
            .collect()
    }

    /// Request bodies sent to `endpoint`, in order.
    #[must_use]
    pub fn calls_to(&self, endpoint: Endpoint) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|call| call.endpoint == endpoint)
            .map(|call| call.body)
            .collect()
    }

    #[must_use]
    pub fn count(&self, endpoint: Endpoint) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .count()
    }

    #[must_use]
    pub fn beacons(&self) -> Vec<RecordedCall> {
        self.inner.lock().unwrap().beacons.clone()
    }

    fn respond(inner: &mut Inner, endpoint: Endpoint, body: &Value) -> Value {
        match endpoint {
            Endpoint::JoinAsNewPeer => json!({
                "routerRtpCapabilities": {
                    "codecs": [
                        {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000},
                        {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000}
                    ]
                }
            }),
            Endpoint::CreateTransport => {
                inner.transports += 1;
                let direction = body.get("direction").and_then(Value::as_str).unwrap_or("unknown");
                json!({
                    "transportOptions": {
                        "id": format!("{direction}-transport-{}", inner.transports),
                        "iceParameters": {},
                        "iceCandidates": [],
                        "dtlsParameters": {}
                    }
                })
            }
            Endpoint::SendTrack => {
                inner.producers += 1;
                json!({ "id": format!("producer-{}", inner.producers) })
            }
            Endpoint::RecvTrack => {
                inner.consumers += 1;
                let peer = body.get("mediaPeerId").and_then(Value::as_str).unwrap_or("");
                let tag = body.get("mediaTag").and_then(Value::as_str).unwrap_or("");
                let kind = tag
                    .parse::<MediaTag>()
                    .map_or("video", |tag| tag.kind().as_str());
                json!({
                    "id": format!("consumer-{}", inner.consumers),
                    "producerId": format!("{peer}-{tag}"),
                    "kind": kind,
                    "rtpParameters": {},
                    "type": "simulcast",
                    "producerPaused": false
                })
            }
            Endpoint::Sync => inner.sync.clone(),
            _ => json!({}),
        }
    }
}

#[async_trait]
impl SignalingGate for MockSignalingGate {
    async fn signal(&self, endpoint: Endpoint, payload: Value) -> Result<Value, SignalingError> {
        let body = with_peer_id(payload, &self.peer_id);
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RecordedCall {
            endpoint,
            body: body.clone(),
        });

        if let Some(error) = inner.failures.get(&endpoint) {
            return Err(error.clone());
        }
        if let Some(failure) = inner
            .matching_failures
            .iter()
            .find(|f| f.endpoint == endpoint && body.get(&f.field) == Some(&f.value))
        {
            return Err(failure.error.clone());
        }
        Ok(Self::respond(&mut inner, endpoint, &body))
    }

    fn beacon(&self, endpoint: Endpoint, payload: Value) {
        let body = with_peer_id(payload, &self.peer_id);
        self.inner
            .lock()
            .unwrap()
            .beacons
            .push(RecordedCall { endpoint, body });
    }
}
