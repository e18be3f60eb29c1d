//! Signaling channel to the room server.
//!
//! Two layers:
//! - [`SignalingGate`]: untyped `signal(endpoint, payload) -> JSON` transport.
//!   [`HttpSignalingGate`] is the production implementation.
//! - [`Signaling`]: typed client with one method per endpoint. It applies the
//!   server's error convention (any response carrying `error` is a failure)
//!   and records metrics for every round trip.

mod http;
pub mod messages;

pub use http::{with_peer_id, HttpSignalingGate};

use crate::engine::{ConsumerParameters, ProducerAppData, TransportDirection};
use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::snapshot::SyncResponse;
use async_trait::async_trait;
use common::types::{ConsumerId, MediaKind, MediaTag, PeerId, ProducerId, TransportId};
use messages::{
    CloseTransportRequest, ConnectTransportRequest, ConsumerRequest, ConsumerSetLayersRequest,
    CreateTransportRequest, CreateTransportResponse, JoinResponse, ProducerRequest,
    RecvTrackRequest, SendTrackRequest, SendTrackResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Signaling endpoints exposed by the room server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    JoinAsNewPeer,
    Sync,
    Leave,
    CreateTransport,
    ConnectTransport,
    CloseTransport,
    SendTrack,
    RecvTrack,
    PauseProducer,
    ResumeProducer,
    CloseProducer,
    PauseConsumer,
    ResumeConsumer,
    CloseConsumer,
    ConsumerSetLayers,
}

impl Endpoint {
    /// Path segment under `/signaling/`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Endpoint::JoinAsNewPeer => "join-as-new-peer",
            Endpoint::Sync => "sync",
            Endpoint::Leave => "leave",
            Endpoint::CreateTransport => "create-transport",
            Endpoint::ConnectTransport => "connect-transport",
            Endpoint::CloseTransport => "close-transport",
            Endpoint::SendTrack => "send-track",
            Endpoint::RecvTrack => "recv-track",
            Endpoint::PauseProducer => "pause-producer",
            Endpoint::ResumeProducer => "resume-producer",
            Endpoint::CloseProducer => "close-producer",
            Endpoint::PauseConsumer => "pause-consumer",
            Endpoint::ResumeConsumer => "resume-consumer",
            Endpoint::CloseConsumer => "close-consumer",
            Endpoint::ConsumerSetLayers => "consumer-set-layers",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response channel to the room server.
///
/// Implementations add the caller's `peerId` to every payload. A response
/// with an `error` field is returned as `Ok`; interpreting it is left to
/// [`Signaling`].
#[async_trait]
pub trait SignalingGate: Send + Sync {
    async fn signal(&self, endpoint: Endpoint, payload: Value) -> Result<Value, SignalingError>;

    /// Fire-and-forget delivery that must survive the caller going away
    /// (page unload, process exit). Never blocks and never reports failure.
    fn beacon(&self, endpoint: Endpoint, payload: Value);
}

/// Typed signaling client.
#[derive(Clone)]
pub struct Signaling {
    gate: Arc<dyn SignalingGate>,
}

impl Signaling {
    pub fn new(gate: Arc<dyn SignalingGate>) -> Self {
        Self { gate }
    }

    pub async fn join_as_new_peer(&self) -> Result<JoinResponse, SignalingError> {
        self.call(Endpoint::JoinAsNewPeer, &Empty {}).await
    }

    pub async fn sync(&self) -> Result<SyncResponse, SignalingError> {
        self.call(Endpoint::Sync, &Empty {}).await
    }

    pub async fn leave(&self) -> Result<(), SignalingError> {
        self.call_ignoring_body(Endpoint::Leave, &Empty {}).await
    }

    /// Best-effort `leave` for when the process is going away.
    pub fn beacon_leave(&self) {
        self.gate
            .beacon(Endpoint::Leave, Value::Object(serde_json::Map::new()));
    }

    /// Returns the server's `transportOptions` object.
    pub async fn create_transport(
        &self,
        direction: TransportDirection,
    ) -> Result<Value, SignalingError> {
        let resp: CreateTransportResponse = self
            .call(Endpoint::CreateTransport, &CreateTransportRequest { direction })
            .await?;
        Ok(resp.transport_options)
    }

    pub async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: Value,
    ) -> Result<(), SignalingError> {
        self.call_ignoring_body(
            Endpoint::ConnectTransport,
            &ConnectTransportRequest {
                transport_id: transport_id.clone(),
                dtls_parameters,
            },
        )
        .await
    }

    pub async fn close_transport(&self, transport_id: &TransportId) -> Result<(), SignalingError> {
        self.call_ignoring_body(
            Endpoint::CloseTransport,
            &CloseTransportRequest {
                transport_id: transport_id.clone(),
            },
        )
        .await
    }

    pub async fn send_track(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
        paused: bool,
        app_data: ProducerAppData,
    ) -> Result<ProducerId, SignalingError> {
        let resp: SendTrackResponse = self
            .call(
                Endpoint::SendTrack,
                &SendTrackRequest {
                    transport_id: transport_id.clone(),
                    kind,
                    rtp_parameters,
                    paused,
                    app_data,
                },
            )
            .await?;
        Ok(resp.id)
    }

    pub async fn recv_track(
        &self,
        media_tag: MediaTag,
        media_peer_id: &PeerId,
        rtp_capabilities: Value,
    ) -> Result<ConsumerParameters, SignalingError> {
        self.call(
            Endpoint::RecvTrack,
            &RecvTrackRequest {
                media_tag,
                media_peer_id: media_peer_id.clone(),
                rtp_capabilities,
            },
        )
        .await
    }

    pub async fn pause_producer(&self, producer_id: &ProducerId) -> Result<(), SignalingError> {
        self.producer_call(Endpoint::PauseProducer, producer_id).await
    }

    pub async fn resume_producer(&self, producer_id: &ProducerId) -> Result<(), SignalingError> {
        self.producer_call(Endpoint::ResumeProducer, producer_id).await
    }

    pub async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), SignalingError> {
        self.producer_call(Endpoint::CloseProducer, producer_id).await
    }

    pub async fn pause_consumer(&self, consumer_id: &ConsumerId) -> Result<(), SignalingError> {
        self.consumer_call(Endpoint::PauseConsumer, consumer_id).await
    }

    pub async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), SignalingError> {
        self.consumer_call(Endpoint::ResumeConsumer, consumer_id).await
    }

    pub async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), SignalingError> {
        self.consumer_call(Endpoint::CloseConsumer, consumer_id).await
    }

    pub async fn consumer_set_layers(
        &self,
        consumer_id: &ConsumerId,
        spatial_layer: u8,
    ) -> Result<(), SignalingError> {
        self.call_ignoring_body(
            Endpoint::ConsumerSetLayers,
            &ConsumerSetLayersRequest {
                consumer_id: consumer_id.clone(),
                spatial_layer,
            },
        )
        .await
    }

    async fn producer_call(
        &self,
        endpoint: Endpoint,
        producer_id: &ProducerId,
    ) -> Result<(), SignalingError> {
        self.call_ignoring_body(
            endpoint,
            &ProducerRequest {
                producer_id: producer_id.clone(),
            },
        )
        .await
    }

    async fn consumer_call(
        &self,
        endpoint: Endpoint,
        consumer_id: &ConsumerId,
    ) -> Result<(), SignalingError> {
        self.call_ignoring_body(
            endpoint,
            &ConsumerRequest {
                consumer_id: consumer_id.clone(),
            },
        )
        .await
    }

    async fn call_ignoring_body<Req: Serialize>(
        &self,
        endpoint: Endpoint,
        request: &Req,
    ) -> Result<(), SignalingError> {
        self.raw(endpoint, request).await.map(|_| ())
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        request: &Req,
    ) -> Result<Resp, SignalingError> {
        let body = self.raw(endpoint, request).await?;
        serde_json::from_value(body).map_err(|e| SignalingError::InvalidResponse {
            endpoint,
            message: e.to_string(),
        })
    }

    /// One round trip: serialize, send, apply the `error` convention.
    async fn raw<Req: Serialize>(
        &self,
        endpoint: Endpoint,
        request: &Req,
    ) -> Result<Value, SignalingError> {
        let payload = serde_json::to_value(request).map_err(|e| SignalingError::InvalidResponse {
            endpoint,
            message: format!("Failed to encode request: {e}"),
        })?;

        let start = Instant::now();
        let result = self
            .gate
            .signal(endpoint, payload)
            .await
            .and_then(|body| check_error_field(endpoint, body));
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                metrics::record_signaling_request(endpoint.as_str(), "success", None, duration);
            }
            Err(e) => {
                metrics::record_signaling_request(
                    endpoint.as_str(),
                    "error",
                    Some(e.kind()),
                    duration,
                );
                if matches!(endpoint, Endpoint::Sync) {
                    debug!(target: "sc.signaling", endpoint = %endpoint, error = %e, "Signaling request failed");
                } else {
                    warn!(target: "sc.signaling", endpoint = %endpoint, error = %e, "Signaling request failed");
                }
            }
        }

        result
    }
}

#[derive(Serialize)]
struct Empty {}

/// Any response carrying a truthy `error` is a failure. `null`, `false`,
/// `0` and `""` mean no error.
fn check_error_field(endpoint: Endpoint, body: Value) -> Result<Value, SignalingError> {
    match body.get("error") {
        None | Some(Value::Null | Value::Bool(false)) => Ok(body),
        Some(Value::String(message)) if message.is_empty() => Ok(body),
        Some(Value::Number(n)) if n.as_f64().is_some_and(|v| v.abs() < f64::EPSILON) => Ok(body),
        Some(Value::String(message)) => Err(SignalingError::Server {
            endpoint,
            message: message.clone(),
        }),
        Some(other) => Err(SignalingError::Server {
            endpoint,
            message: other.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Gate that replays one canned response and records requests.
    struct CannedGate {
        response: Result<Value, SignalingError>,
        requests: Mutex<Vec<(Endpoint, Value)>>,
    }

    impl CannedGate {
        fn new(response: Result<Value, SignalingError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SignalingGate for CannedGate {
        async fn signal(&self, endpoint: Endpoint, payload: Value) -> Result<Value, SignalingError> {
            self.requests.lock().unwrap().push((endpoint, payload));
            self.response.clone()
        }

        fn beacon(&self, endpoint: Endpoint, payload: Value) {
            self.requests.lock().unwrap().push((endpoint, payload));
        }
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(Endpoint::JoinAsNewPeer.as_str(), "join-as-new-peer");
        assert_eq!(Endpoint::ConsumerSetLayers.to_string(), "consumer-set-layers");
        assert_eq!(Endpoint::CloseTransport.as_str(), "close-transport");
    }

    #[tokio::test]
    async fn test_error_field_is_failure() {
        let gate = CannedGate::new(Ok(json!({"error": "no such consumer"})));
        let signaling = Signaling::new(gate.clone());

        let err = signaling
            .resume_consumer(&ConsumerId::from("c-1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SignalingError::Server {
                endpoint: Endpoint::ResumeConsumer,
                message: "no such consumer".to_string()
            }
        );

        let requests = gate.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, Endpoint::ResumeConsumer);
        assert_eq!(requests[0].1, json!({"consumerId": "c-1"}));
    }

    #[tokio::test]
    async fn test_structured_error_field_is_failure() {
        let gate = CannedGate::new(Ok(json!({"error": {"code": 3}})));
        let signaling = Signaling::new(gate);
        let err = signaling.leave().await.unwrap_err();
        assert!(matches!(err, SignalingError::Server { ref message, .. } if message.contains("code")));
    }

    #[tokio::test]
    async fn test_falsy_error_fields_are_success() {
        for body in [
            json!({"error": "", "routerRtpCapabilities": {}}),
            json!({"error": false, "routerRtpCapabilities": {}}),
            json!({"error": 0, "routerRtpCapabilities": {}}),
        ] {
            let signaling = Signaling::new(CannedGate::new(Ok(body.clone())));
            assert!(signaling.join_as_new_peer().await.is_ok(), "{body} rejected");
        }
    }

    #[tokio::test]
    async fn test_true_error_field_is_failure() {
        let signaling = Signaling::new(CannedGate::new(Ok(json!({"error": true}))));
        let err = signaling.close_transport(&TransportId::from("t-1")).await.unwrap_err();
        assert_eq!(
            err,
            SignalingError::Server {
                endpoint: Endpoint::CloseTransport,
                message: "true".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_null_error_field_is_success() {
        let gate = CannedGate::new(Ok(json!({"error": null, "id": "p-7"})));
        let signaling = Signaling::new(gate);
        let id = signaling
            .send_track(
                &TransportId::from("t-1"),
                MediaKind::Audio,
                json!({}),
                false,
                ProducerAppData {
                    media_tag: MediaTag::CamAudio,
                },
            )
            .await
            .unwrap();
        assert_eq!(id.as_str(), "p-7");
    }

    #[tokio::test]
    async fn test_missing_field_is_invalid_response() {
        let gate = CannedGate::new(Ok(json!({})));
        let signaling = Signaling::new(gate);
        let err = signaling
            .create_transport(TransportDirection::Send)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalingError::InvalidResponse {
                endpoint: Endpoint::CreateTransport,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_gate_error_propagates() {
        let gate = CannedGate::new(Err(SignalingError::Http("connection refused".into())));
        let signaling = Signaling::new(gate);
        let err = signaling.sync().await.unwrap_err();
        assert_eq!(err, SignalingError::Http("connection refused".into()));
    }

    #[tokio::test]
    async fn test_recv_track_parses_consumer_parameters() {
        let gate = CannedGate::new(Ok(json!({
            "id": "c-1",
            "producerId": "p-1",
            "kind": "audio",
            "rtpParameters": {}
        })));
        let signaling = Signaling::new(gate.clone());
        let params = signaling
            .recv_track(MediaTag::CamAudio, &PeerId::from("peer-b"), json!({"codecs": []}))
            .await
            .unwrap();
        assert_eq!(params.producer_id.as_str(), "p-1");
        assert_eq!(
            gate.requests.lock().unwrap()[0].1,
            json!({"mediaTag": "cam-audio", "mediaPeerId": "peer-b", "rtpCapabilities": {"codecs": []}})
        );
    }

    #[test]
    fn test_beacon_leave_uses_gate_beacon() {
        let gate = CannedGate::new(Ok(json!({})));
        let signaling = Signaling::new(gate.clone());
        signaling.beacon_leave();
        let requests = gate.requests.lock().unwrap();
        assert_eq!(requests[0], (Endpoint::Leave, json!({})));
    }
}
