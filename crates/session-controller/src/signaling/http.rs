//! HTTP signaling gate.
//!
//! Every endpoint is a JSON POST to `{base}/signaling/{endpoint}`. The body
//! is the request payload with the caller's `peerId` merged in. Responses
//! are JSON objects; an empty body is treated as `{}`.

use super::{Endpoint, SignalingGate};
use crate::errors::SignalingError;
use async_trait::async_trait;
use common::types::PeerId;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default connection timeout for the HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Signaling gate backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSignalingGate {
    client: reqwest::Client,
    base_url: String,
    peer_id: PeerId,
}

impl HttpSignalingGate {
    /// Build a gate for `peer_id` against the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `SignalingError::Http` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        peer_id: PeerId,
        request_timeout: Duration,
    ) -> Result<Self, SignalingError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SignalingError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            peer_id,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}/signaling/{}", self.base_url, endpoint.as_str())
    }
}

/// Merge `peerId` into a request payload.
///
/// Non-object payloads are wrapped as `{"data": payload}`; `null` becomes an
/// empty object.
pub fn with_peer_id(payload: Value, peer_id: &PeerId) -> Value {
    let mut body = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    body.insert("peerId".to_string(), Value::String(peer_id.to_string()));
    Value::Object(body)
}

#[async_trait]
impl SignalingGate for HttpSignalingGate {
    async fn signal(&self, endpoint: Endpoint, payload: Value) -> Result<Value, SignalingError> {
        let url = self.url(endpoint);
        trace!(target: "sc.signaling.http", endpoint = %endpoint, "Sending signaling request");

        let response = self
            .client
            .post(&url)
            .json(&with_peer_id(payload, &self.peer_id))
            .send()
            .await
            .map_err(|e| {
                debug!(target: "sc.signaling.http", endpoint = %endpoint, error = %e, "HTTP request failed");
                SignalingError::Http(e.to_string())
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            debug!(target: "sc.signaling.http", endpoint = %endpoint, error = %e, "Failed to read response body");
            SignalingError::Http(e.to_string())
        })?;

        if text.trim().is_empty() {
            if status.is_success() {
                return Ok(Value::Object(Map::new()));
            }
            return Err(SignalingError::Http(format!("Unexpected status {status}")));
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| {
            warn!(target: "sc.signaling.http", endpoint = %endpoint, status = %status, "Response is not JSON");
            SignalingError::InvalidResponse {
                endpoint,
                message: e.to_string(),
            }
        })?;

        // An error status with an `error` body is a server-level failure and
        // is reported through the body.
        if !status.is_success() && body.get("error").is_none() {
            return Err(SignalingError::Http(format!("Unexpected status {status}")));
        }

        Ok(body)
    }

    fn beacon(&self, endpoint: Endpoint, payload: Value) {
        let request = self
            .client
            .post(self.url(endpoint))
            .json(&with_peer_id(payload, &self.peer_id));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = request.send().await {
                        debug!(target: "sc.signaling.http", endpoint = %endpoint, error = %e, "Beacon delivery failed");
                    }
                });
            }
            Err(_) => {
                warn!(target: "sc.signaling.http", endpoint = %endpoint, "No runtime available, beacon dropped");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gate(server: &MockServer) -> HttpSignalingGate {
        HttpSignalingGate::new(
            format!("{}/", server.uri()),
            PeerId::from("peer-a"),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[test]
    fn test_with_peer_id_merges_into_object() {
        let peer = PeerId::from("peer-a");
        assert_eq!(
            with_peer_id(json!({"direction": "send"}), &peer),
            json!({"direction": "send", "peerId": "peer-a"})
        );
        assert_eq!(with_peer_id(Value::Null, &peer), json!({"peerId": "peer-a"}));
        assert_eq!(
            with_peer_id(json!(3), &peer),
            json!({"data": 3, "peerId": "peer-a"})
        );
    }

    #[test]
    fn test_with_peer_id_overrides_payload_peer() {
        let peer = PeerId::from("peer-a");
        assert_eq!(
            with_peer_id(json!({"peerId": "spoofed"}), &peer),
            json!({"peerId": "peer-a"})
        );
    }

    #[tokio::test]
    async fn test_signal_posts_json_with_peer_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/signaling/create-transport"))
            .and(body_json(json!({"direction": "recv", "peerId": "peer-a"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "transportOptions": {"id": "t-1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let body = gate(&server)
            .signal(Endpoint::CreateTransport, json!({"direction": "recv"}))
            .await
            .unwrap();
        assert_eq!(body["transportOptions"]["id"], "t-1");
    }

    #[tokio::test]
    async fn test_empty_body_is_empty_object() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/signaling/leave"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let body = gate(&server).signal(Endpoint::Leave, json!({})).await.unwrap();
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn test_error_body_passed_through() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/signaling/recv-track"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"error": "peer not found"})),
            )
            .mount(&server)
            .await;

        let body = gate(&server)
            .signal(Endpoint::RecvTrack, json!({}))
            .await
            .unwrap();
        assert_eq!(body["error"], "peer not found");
    }

    #[tokio::test]
    async fn test_bad_status_without_error_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/signaling/sync"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = gate(&server)
            .signal(Endpoint::Sync, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::InvalidResponse { .. }));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/signaling/sync"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = gate(&server)
            .signal(Endpoint::Sync, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::Http(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_http_error() {
        // Port 9 (discard) is never served in test environments.
        let gate = HttpSignalingGate::new(
            "http://127.0.0.1:9",
            PeerId::from("peer-a"),
            Duration::from_millis(500),
        )
        .unwrap();
        let err = gate.signal(Endpoint::Sync, json!({})).await.unwrap_err();
        assert!(matches!(err, SignalingError::Http(_)));
    }

    #[tokio::test]
    async fn test_beacon_delivers_in_background() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/signaling/leave"))
            .and(body_json(json!({"peerId": "peer-a"})))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        gate(&server).beacon(Endpoint::Leave, json!({}));

        let mut delivered = false;
        for _ in 0..50 {
            if !server.received_requests().await.unwrap_or_default().is_empty() {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(delivered, "beacon should reach the server");
    }
}
