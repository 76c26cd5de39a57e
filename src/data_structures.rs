//! Small data types shared across workers, routers and transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use std::ops::{Deref, DerefMut};

use crate::router::consumer::ConsumerId;
use crate::router::data_consumer::DataConsumerId;
use crate::router::data_producer::DataProducerId;
use crate::router::producer::ProducerId;
use crate::router::rtp_observer::RtpObserverId;
use crate::router::transport::TransportId;
use crate::router::webrtc_server::WebRtcServerId;
use crate::router::RouterId;

/// Opaque caller-defined data bag carried by transports, producers, consumers and routers.
///
/// mediasoup never inspects the contents; the room orchestrator reads caller-defined flags out
/// of it (e.g. `producing`/`consuming` on a transport, `sharing` on a producer).
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AppData(Value);

impl Deref for AppData {
    type Target = Value;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for AppData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AppData {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Reads a boolean flag out of an object-shaped app data bag, defaulting to `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.0
            .as_object()
            .and_then(|object| object.get(name))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A listen IP plus an optional announced IP (the address advertised in ICE candidates, useful
/// behind NAT).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportListenIp {
    /// Local IPv4 or IPv6 to bind on.
    pub ip: String,
    /// Announced IPv4 or IPv6. If unset, `ip` is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<IpAddr>,
}

/// A listen IP plus an explicit listen port, used by [`crate::router::WebRtcServer`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenInfo {
    pub protocol: TransportProtocol,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Udp,
    Tcp,
}

/// Internal identifiers threaded through worker requests for router-scoped entities.
#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterInternal {
    pub router_id: RouterId,
}

#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcServerInternal {
    pub webrtc_server_id: WebRtcServerId,
}

#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInternal {
    pub router_id: RouterId,
    pub transport_id: TransportId,
}

#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpObserverInternal {
    pub router_id: RouterId,
    pub rtp_observer_id: RtpObserverId,
}

#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInternal {
    pub router_id: RouterId,
    pub transport_id: TransportId,
    pub producer_id: ProducerId,
}

#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInternal {
    pub router_id: RouterId,
    pub transport_id: TransportId,
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProducerInternal {
    pub router_id: RouterId,
    pub transport_id: TransportId,
    pub data_producer_id: DataProducerId,
}

#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConsumerInternal {
    pub router_id: RouterId,
    pub transport_id: TransportId,
    pub data_consumer_id: DataConsumerId,
}

/// Marker used with `request_response_generic!` for requests whose response shape is entirely
/// determined by the entity kind being dumped (transport/producer/consumer dumps all differ).
pub type Dump = HashMap<String, Value>;
/// Marker used the same way for `getStats` responses (worker returns an array of stat objects).
pub type Stats = Vec<HashMap<String, Value>>;

/// A message received by a [`crate::router::data_consumer::DataConsumer`] on a
/// [`crate::router::direct_transport::DirectTransport`], or sent directly by a
/// [`crate::router::data_producer::DataProducer`] on one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebRtcMessage {
    String(String),
    Binary(Vec<u8>),
    EmptyString,
    EmptyBinary,
}

// SCTP PPID values used by the worker to tag WebRTC DataChannel payloads (RFC 8831 §8).
const PPID_WEBRTC_STRING: u32 = 51;
const PPID_WEBRTC_BINARY: u32 = 53;
const PPID_WEBRTC_STRING_EMPTY: u32 = 56;
const PPID_WEBRTC_BINARY_EMPTY: u32 = 57;

impl WebRtcMessage {
    pub fn new(ppid: u32, payload: Vec<u8>) -> Self {
        match ppid {
            PPID_WEBRTC_STRING_EMPTY => Self::EmptyString,
            PPID_WEBRTC_BINARY_EMPTY => Self::EmptyBinary,
            PPID_WEBRTC_BINARY => Self::Binary(payload),
            // PPID_WEBRTC_STRING and anything unrecognized: treat as UTF-8 text, matching the
            // worker's own fallback for legacy PPID 50.
            _ => Self::String(String::from_utf8_lossy(&payload).into_owned()),
        }
    }

    pub fn into_ppid_and_payload(self) -> (u32, Vec<u8>) {
        match self {
            Self::String(text) => (PPID_WEBRTC_STRING, text.into_bytes()),
            Self::Binary(bytes) => (PPID_WEBRTC_BINARY, bytes),
            Self::EmptyString => (PPID_WEBRTC_STRING_EMPTY, vec![0]),
            Self::EmptyBinary => (PPID_WEBRTC_BINARY_EMPTY, vec![0]),
        }
    }
}
