//! Wire shapes for the signaling protocol the room orchestrator speaks over the "protoo"
//! sub-protocol websocket (`spec.md` §6). Transport-agnostic: this module knows nothing about
//! websockets, only about the request/response/notification envelopes an outer binary reads off
//! whatever socket library it picked.

use crate::data_structures::AppData;
use crate::router::consumer::{ConsumerId, ConsumerLayers, ConsumerScore, ConsumerType};
use crate::router::data_consumer::DataConsumerId;
use crate::router::data_producer::DataProducerId;
use crate::router::producer::{ProducerId, ProducerScore};
use crate::rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters};
use crate::sctp_parameters::{SctpCapabilities, SctpStreamParameters};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Peer identifier, assigned by the signaling layer (not mediasoup) — a `roomId`/`peerId` query
/// parameter pair identifies a websocket connection (`spec.md` §6).
pub type PeerId = String;

/// A request from peer to server, tagged by `method` the way protoo frames it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum ClientRequest {
    GetRouterRtpCapabilities,
    Join {
        display_name: String,
        device: Value,
        rtp_capabilities: RtpCapabilities,
        sctp_capabilities: Option<SctpCapabilities>,
    },
    CreateWebRtcTransport {
        #[serde(default)]
        force_tcp: bool,
        producing: bool,
        consuming: bool,
        #[serde(default)]
        sctp_capabilities: Option<SctpCapabilities>,
    },
    ConnectWebRtcTransport {
        transport_id: crate::router::transport::TransportId,
        dtls_parameters: crate::router::webrtc_transport::DtlsParameters,
    },
    RestartIce {
        transport_id: crate::router::transport::TransportId,
    },
    Produce {
        transport_id: crate::router::transport::TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        #[serde(default)]
        app_data: AppData,
    },
    ProduceData {
        transport_id: crate::router::transport::TransportId,
        sctp_stream_parameters: SctpStreamParameters,
        label: String,
        protocol: String,
        #[serde(default)]
        app_data: AppData,
    },
    CloseProducer {
        producer_id: ProducerId,
    },
    PauseProducer {
        producer_id: ProducerId,
    },
    ResumeProducer {
        producer_id: ProducerId,
    },
    PauseConsumer {
        consumer_id: ConsumerId,
    },
    ResumeConsumer {
        consumer_id: ConsumerId,
    },
    SetConsumerPreferredLayers {
        consumer_id: ConsumerId,
        spatial_layer: u8,
        temporal_layer: Option<u8>,
    },
    SetConsumerPriority {
        consumer_id: ConsumerId,
        priority: u8,
    },
    RequestConsumerKeyFrame {
        consumer_id: ConsumerId,
    },
    ChangeDisplayName {
        display_name: String,
    },
    GetTransportStats {
        transport_id: crate::router::transport::TransportId,
    },
    GetProducerStats {
        producer_id: ProducerId,
    },
    GetConsumerStats {
        consumer_id: ConsumerId,
    },
    GetDataProducerStats {
        data_producer_id: DataProducerId,
    },
    GetDataConsumerStats {
        data_consumer_id: DataConsumerId,
    },
    /// Operator/demo tooling: simulated uplink/downlink network conditions. Enforcement (actual
    /// traffic shaping) is environment-specific and left to the outer binary; the room only
    /// tracks and acknowledges the request (`spec.md` §6).
    ApplyNetworkThrottle {
        uplink: u32,
        downlink: u32,
        #[serde(default)]
        rtt: Option<u32>,
        #[serde(default)]
        packet_loss: Option<f64>,
    },
    ResetNetworkThrottle,
}

/// A request issued by the server to a peer (`spec.md` §4.7 — answered by a matching response
/// keyed on a locally allocated request id, tracked outside this module).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum ServerRequest {
    NewConsumer {
        peer_id: PeerId,
        producer_id: ProducerId,
        consumer_id: ConsumerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        r#type: ConsumerType,
        app_data: AppData,
        producer_paused: bool,
    },
    NewDataConsumer {
        peer_id: PeerId,
        data_producer_id: DataProducerId,
        data_consumer_id: DataConsumerId,
        sctp_stream_parameters: Option<SctpStreamParameters>,
        label: String,
        protocol: String,
        app_data: AppData,
    },
}

/// A one-way notification from server to peer; never answered.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum ServerNotification {
    /// Sent once right after websocket accept, before `join` (`SPEC_FULL.md` §B).
    MediasoupVersion { version: &'static str },
    NewPeer { id: PeerId, display_name: String, device: Value },
    PeerClosed { peer_id: PeerId },
    PeerDisplayNameChanged { peer_id: PeerId, display_name: String },
    ConsumerClosed { consumer_id: ConsumerId, app_data: AppData },
    ConsumerPaused { consumer_id: ConsumerId },
    ConsumerResumed { consumer_id: ConsumerId },
    ConsumerScore { consumer_id: ConsumerId, score: ConsumerScore },
    ConsumerLayersChanged { consumer_id: ConsumerId, layers: Option<ConsumerLayers> },
    ProducerScore { producer_id: ProducerId, score: Vec<ProducerScore> },
    /// Feedback loop driving simulcast layer pruning (`spec.md` §4.8).
    VideoProducerQualityChanged { producer_id: ProducerId, paused: bool, desired_q: i8 },
    ActiveSpeaker { producer_id: Option<ProducerId> },
}
