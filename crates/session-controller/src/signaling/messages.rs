//! Request and response bodies for the signaling endpoints.
//!
//! Field names are camelCase on the wire. `peerId` is never part of these
//! structs; the gate adds it to every body.

use crate::engine::{ProducerAppData, TransportDirection};
use common::types::{ConsumerId, MediaKind, MediaTag, PeerId, ProducerId, TransportId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ===== Requests =====

#[derive(Debug, Clone, Serialize)]
pub struct CreateTransportRequest {
    pub direction: TransportDirection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: TransportId,
    pub dtls_parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTrackRequest {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub paused: bool,
    pub app_data: ProducerAppData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecvTrackRequest {
    pub media_tag: MediaTag,
    pub media_peer_id: PeerId,
    pub rtp_capabilities: Value,
}

/// Body for pause/resume/close of a producer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRequest {
    pub producer_id: ProducerId,
}

/// Body for pause/resume/close of a consumer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRequest {
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTransportRequest {
    pub transport_id: TransportId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSetLayersRequest {
    pub consumer_id: ConsumerId,
    pub spatial_layer: u8,
}

// ===== Responses =====

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub router_rtp_capabilities: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportResponse {
    pub transport_options: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendTrackResponse {
    pub id: ProducerId,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_track_request_wire_format() {
        let req = SendTrackRequest {
            transport_id: TransportId::from("t-1"),
            kind: MediaKind::Video,
            rtp_parameters: json!({"codecs": []}),
            paused: true,
            app_data: ProducerAppData {
                media_tag: MediaTag::CamVideo,
            },
        };

        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "transportId": "t-1",
                "kind": "video",
                "rtpParameters": {"codecs": []},
                "paused": true,
                "appData": {"mediaTag": "cam-video"}
            })
        );
    }

    #[test]
    fn test_recv_track_request_wire_format() {
        let req = RecvTrackRequest {
            media_tag: MediaTag::ScreenVideo,
            media_peer_id: PeerId::from("peer-b"),
            rtp_capabilities: json!({}),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"mediaTag": "screen-video", "mediaPeerId": "peer-b", "rtpCapabilities": {}})
        );
    }

    #[test]
    fn test_set_layers_request_wire_format() {
        let req = ConsumerSetLayersRequest {
            consumer_id: ConsumerId::from("c-9"),
            spatial_layer: 1,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"consumerId": "c-9", "spatialLayer": 1})
        );
    }

    #[test]
    fn test_join_response_parse() {
        let resp: JoinResponse = serde_json::from_value(json!({
            "routerRtpCapabilities": {"codecs": [{"mimeType": "video/VP8"}]}
        }))
        .unwrap();
        assert!(resp.router_rtp_capabilities.get("codecs").is_some());
    }

    #[test]
    fn test_create_transport_request_wire_format() {
        let req = CreateTransportRequest {
            direction: TransportDirection::Recv,
        };
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"direction": "recv"}));
    }
}
