//! Worker wire request/response pairs (`spec.md` §4). Each entity module owns the wire `*Data`
//! structs specific to it; this module only defines the `method` name, the request envelope, and
//! (where the worker doesn't already have a typed response elsewhere) the response shape.

use crate::data_structures::*;
use crate::rtp_parameters::{RtpEncodingParameters, RtpParameters};
use crate::router::consumer::{ConsumerLayers, ConsumerTraceEventType};
use crate::router::producer::ProducerTraceEventType;
use crate::router::transport::TransportTraceEventType;
use crate::sctp_parameters::{SctpParameters, SctpStreamParameters};
use crate::worker::channel::Request;
use crate::worker::{WorkerDump, WorkerResourceUsage, WorkerUpdateSettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::marker::PhantomData;

macro_rules! request_response {
    (
        $method: literal,
        $request_struct_name: ident { $( $field_name: ident: $field_type: ty, )* },
        $existing_response_type: ty $(,)?
    ) => {
        #[derive(Debug, Serialize)]
        pub(crate) struct $request_struct_name {
            $( pub(crate) $field_name: $field_type, )*
        }

        impl Request for $request_struct_name {
            type Response = $existing_response_type;

            fn as_method(&self) -> &'static str {
                $method
            }
        }
    };
    (
        $method: literal,
        $request_struct_name: ident $request_struct_impl: tt $(,)?
    ) => {
        request_response!($method, $request_struct_name $request_struct_impl, ());
    };
    (
        $method: literal,
        $request_struct_name: ident { $( $field_name: ident: $field_type: ty, )* },
        $response_struct_name: ident $response_struct_impl: tt,
    ) => {
        #[derive(Debug, Serialize)]
        pub(crate) struct $request_struct_name {
            $( pub(crate) $field_name: $field_type, )*
        }

        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub(crate) struct $response_struct_name $response_struct_impl

        impl Request for $request_struct_name {
            type Response = $response_struct_name;

            fn as_method(&self) -> &'static str {
                $method
            }
        }
    };
}

macro_rules! request_response_generic {
    (
        $method: literal,
        $request_struct_name: ident { $( $field_name: ident: $field_type: ty, )* },
        $generic_response: ident,
    ) => {
        #[derive(Debug, Serialize)]
        pub(crate) struct $request_struct_name<$generic_response>
        where
            $generic_response: Debug + DeserializeOwned,
        {
            $( pub(crate) $field_name: $field_type, )*
            #[serde(skip)]
            pub(crate) phantom_data: PhantomData<$generic_response>,
        }

        impl<$generic_response: Debug + DeserializeOwned> Request for $request_struct_name<$generic_response> {
            type Response = $generic_response;

            fn as_method(&self) -> &'static str {
                $method
            }
        }
    };
}

// --- Worker-scoped ---

request_response!("worker.dump", WorkerDumpRequest {}, WorkerDump);

request_response!(
    "worker.getResourceUsage",
    WorkerGetResourceRequest {},
    WorkerResourceUsage,
);

request_response!(
    "worker.updateSettings",
    WorkerUpdateSettingsRequest {
        data: WorkerUpdateSettings,
    },
);

request_response!(
    "worker.createRouter",
    WorkerCreateRouterRequest {
        internal: RouterInternal,
    },
);

request_response!(
    "worker.createWebRtcServer",
    WorkerCreateWebRtcServerRequest {
        internal: WebRtcServerInternal,
        data: crate::router::webrtc_server::WebRtcServerData,
    },
);

// --- WebRtcServer-scoped ---

request_response!(
    "webRtcServer.close",
    WebRtcServerCloseRequest {
        internal: WebRtcServerInternal,
    },
);

request_response_generic!(
    "webRtcServer.dump",
    WebRtcServerDumpRequest {
        internal: WebRtcServerInternal,
    },
    Dump,
);

// --- Router-scoped ---

request_response!(
    "router.close",
    RouterCloseRequest {
        internal: RouterInternal,
    },
);

request_response_generic!(
    "router.dump",
    RouterDumpRequest {
        internal: RouterInternal,
    },
    Dump,
);

request_response!(
    "router.createWebRtcTransport",
    RouterCreateWebrtcTransportRequest {
        internal: TransportInternal,
        data: crate::router::webrtc_transport::WebRtcTransportData,
    },
    crate::router::webrtc_transport::WebRtcTransportDump,
);

request_response!(
    "router.createPlainTransport",
    RouterCreatePlainTransportRequest {
        internal: TransportInternal,
        data: crate::router::plain_transport::PlainTransportData,
    },
    crate::router::plain_transport::PlainTransportDump,
);

request_response!(
    "router.createPipeTransport",
    RouterCreatePipeTransportRequest {
        internal: TransportInternal,
        data: crate::router::pipe_transport::PipeTransportData,
    },
    crate::router::pipe_transport::PipeTransportDump,
);

request_response!(
    "router.createDirectTransport",
    RouterCreateDirectTransportRequest {
        internal: TransportInternal,
        data: crate::router::direct_transport::DirectTransportData,
    },
);

request_response!(
    "router.createAudioLevelObserver",
    RouterCreateAudioLevelObserverRequest {
        internal: RtpObserverInternal,
        data: crate::router::audio_level_observer::AudioLevelObserverOptionsData,
    },
);

request_response!(
    "router.createActiveSpeakerObserver",
    RouterCreateActiveSpeakerObserverRequest {
        internal: RtpObserverInternal,
        data: crate::router::active_speaker_observer::ActiveSpeakerObserverOptionsData,
    },
);

// --- Transport-scoped ---

request_response!(
    "transport.close",
    TransportCloseRequest {
        internal: TransportInternal,
    },
);

request_response_generic!(
    "transport.dump",
    TransportDumpRequest {
        internal: TransportInternal,
    },
    Dump,
);

request_response_generic!(
    "transport.getStats",
    TransportGetStatsRequest {
        internal: TransportInternal,
    },
    Stats,
);

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum TransportConnectData {
    WebRtc {
        dtls_parameters: crate::router::webrtc_transport::DtlsParameters,
    },
    Plain {
        ip: Option<String>,
        port: Option<u16>,
        rtcp_port: Option<u16>,
        srtp_parameters: Option<crate::router::plain_transport::SrtpParameters>,
    },
    Pipe {
        ip: String,
        port: u16,
        srtp_parameters: Option<crate::router::plain_transport::SrtpParameters>,
    },
}

request_response!(
    "transport.connect",
    TransportConnectRequest {
        internal: TransportInternal,
        data: TransportConnectData,
    },
    TransportConnectResponse {
        #[serde(default)]
        tuple: Option<serde_json::Value>,
    },
);

request_response!(
    "transport.setMaxIncomingBitrate",
    TransportSetMaxIncomingBitrateRequest {
        internal: TransportInternal,
        data: TransportSetMaxIncomingBitrateData,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct TransportSetMaxIncomingBitrateData {
    pub(crate) bitrate: u32,
}

request_response!(
    "transport.restartIce",
    TransportRestartIceRequest {
        internal: TransportInternal,
    },
    TransportRestartIceResponse {
        pub(crate) ice_parameters: crate::router::webrtc_transport::IceParameters,
    },
);

request_response!(
    "transport.enableTraceEvent",
    TransportEnableTraceEventRequest {
        internal: TransportInternal,
        data: TransportEnableTraceEventData,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct TransportEnableTraceEventData {
    pub(crate) types: Vec<TransportTraceEventType>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TransportProduceData {
    pub(crate) kind: crate::rtp_parameters::MediaKind,
    pub(crate) rtp_parameters: RtpParameters,
    pub(crate) rtp_mapping: serde_json::Value,
    pub(crate) key_frame_request_delay: u32,
    pub(crate) paused: bool,
}

request_response!(
    "transport.produce",
    TransportProduceRequest {
        internal: ProducerInternal,
        data: TransportProduceData,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct TransportConsumeData {
    pub(crate) producer_id: crate::router::producer::ProducerId,
    pub(crate) kind: crate::rtp_parameters::MediaKind,
    pub(crate) rtp_parameters: RtpParameters,
    pub(crate) r#type: crate::router::consumer::ConsumerType,
    pub(crate) consumable_rtp_encodings: Vec<RtpEncodingParameters>,
    pub(crate) paused: bool,
    pub(crate) producer_paused: bool,
}

request_response!(
    "transport.consume",
    TransportConsumeRequest {
        internal: ConsumerInternal,
        data: TransportConsumeData,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct TransportProduceDataData {
    pub(crate) r#type: crate::router::data_producer::DataProducerType,
    pub(crate) sctp_stream_parameters: Option<SctpStreamParameters>,
    pub(crate) label: String,
    pub(crate) protocol: String,
}

request_response!(
    "transport.produceData",
    TransportProduceDataRequest {
        internal: DataProducerInternal,
        data: TransportProduceDataData,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct TransportConsumeDataData {
    pub(crate) data_producer_id: crate::router::data_producer::DataProducerId,
    pub(crate) r#type: crate::router::data_consumer::DataConsumerType,
    pub(crate) sctp_stream_parameters: Option<SctpStreamParameters>,
    pub(crate) label: String,
    pub(crate) protocol: String,
}

request_response!(
    "transport.consumeData",
    TransportConsumeDataRequest {
        internal: DataConsumerInternal,
        data: TransportConsumeDataData,
    },
);

// --- Producer-scoped ---

request_response!(
    "producer.close",
    ProducerCloseRequest {
        internal: ProducerInternal,
    },
);

request_response_generic!(
    "producer.dump",
    ProducerDumpRequest {
        internal: ProducerInternal,
    },
    Dump,
);

request_response_generic!(
    "producer.getStats",
    ProducerGetStatsRequest {
        internal: ProducerInternal,
    },
    Stats,
);

request_response!(
    "producer.pause",
    ProducerPauseRequest {
        internal: ProducerInternal,
    },
);

request_response!(
    "producer.resume",
    ProducerResumeRequest {
        internal: ProducerInternal,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct ProducerEnableTraceEventData {
    pub(crate) types: Vec<ProducerTraceEventType>,
}

request_response!(
    "producer.enableTraceEvent",
    ProducerEnableTraceEventRequest {
        internal: ProducerInternal,
        data: ProducerEnableTraceEventData,
    },
);

// --- Consumer-scoped ---

request_response!(
    "consumer.close",
    ConsumerCloseRequest {
        internal: ConsumerInternal,
    },
);

request_response_generic!(
    "consumer.dump",
    ConsumerDumpRequest {
        internal: ConsumerInternal,
    },
    Dump,
);

request_response_generic!(
    "consumer.getStats",
    ConsumerGetStatsRequest {
        internal: ConsumerInternal,
    },
    Stats,
);

request_response!(
    "consumer.pause",
    ConsumerPauseRequest {
        internal: ConsumerInternal,
    },
);

request_response!(
    "consumer.resume",
    ConsumerResumeRequest {
        internal: ConsumerInternal,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct ConsumerSetPreferredLayersData {
    pub(crate) layers: Option<ConsumerLayers>,
}

request_response!(
    "consumer.setPreferredLayers",
    ConsumerSetPreferredLayersRequest {
        internal: ConsumerInternal,
        data: ConsumerSetPreferredLayersData,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct ConsumerSetPriorityData {
    pub(crate) priority: u8,
}

request_response!(
    "consumer.setPriority",
    ConsumerSetPriorityRequest {
        internal: ConsumerInternal,
        data: ConsumerSetPriorityData,
    },
);

request_response!(
    "consumer.requestKeyFrame",
    ConsumerRequestKeyFrameRequest {
        internal: ConsumerInternal,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct ConsumerEnableTraceEventData {
    pub(crate) types: Vec<ConsumerTraceEventType>,
}

request_response!(
    "consumer.enableTraceEvent",
    ConsumerEnableTraceEventRequest {
        internal: ConsumerInternal,
        data: ConsumerEnableTraceEventData,
    },
);

// --- DataProducer-scoped ---

request_response!(
    "dataProducer.close",
    DataProducerCloseRequest {
        internal: DataProducerInternal,
    },
);

request_response_generic!(
    "dataProducer.dump",
    DataProducerDumpRequest {
        internal: DataProducerInternal,
    },
    Dump,
);

request_response_generic!(
    "dataProducer.getStats",
    DataProducerGetStatsRequest {
        internal: DataProducerInternal,
    },
    Stats,
);

#[derive(Debug, Serialize)]
pub(crate) struct DataProducerSendData {
    pub(crate) ppid: u32,
}

request_response!(
    "dataProducer.send",
    DataProducerSendRequest {
        internal: DataProducerInternal,
        data: DataProducerSendData,
        payload: Vec<u8>,
    },
);

// --- DataConsumer-scoped ---

request_response!(
    "dataConsumer.close",
    DataConsumerCloseRequest {
        internal: DataConsumerInternal,
    },
);

request_response_generic!(
    "dataConsumer.dump",
    DataConsumerDumpRequest {
        internal: DataConsumerInternal,
    },
    Dump,
);

request_response_generic!(
    "dataConsumer.getStats",
    DataConsumerGetStatsRequest {
        internal: DataConsumerInternal,
    },
    Stats,
);

request_response!(
    "dataConsumer.getBufferedAmount",
    DataConsumerGetBufferedAmountRequest {
        internal: DataConsumerInternal,
    },
    DataConsumerGetBufferedAmountResponse {
        pub(crate) buffered_amount: u32,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct DataConsumerSetBufferedAmountLowThresholdData {
    pub(crate) threshold: u32,
}

request_response!(
    "dataConsumer.setBufferedAmountLowThreshold",
    DataConsumerSetBufferedAmountLowThresholdRequest {
        internal: DataConsumerInternal,
        data: DataConsumerSetBufferedAmountLowThresholdData,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct DataConsumerSendData {
    pub(crate) ppid: u32,
}

request_response!(
    "dataConsumer.send",
    DataConsumerSendRequest {
        internal: DataConsumerInternal,
        data: DataConsumerSendData,
        payload: Vec<u8>,
    },
);

// --- RtpObserver-scoped ---

request_response!(
    "rtpObserver.close",
    RtpObserverCloseRequest {
        internal: RtpObserverInternal,
    },
);

request_response!(
    "rtpObserver.pause",
    RtpObserverPauseRequest {
        internal: RtpObserverInternal,
    },
);

request_response!(
    "rtpObserver.resume",
    RtpObserverResumeRequest {
        internal: RtpObserverInternal,
    },
);

#[derive(Debug, Serialize)]
pub(crate) struct RtpObserverAddRemoveProducerData {
    pub(crate) producer_id: crate::router::producer::ProducerId,
}

request_response!(
    "rtpObserver.addProducer",
    RtpObserverAddProducerRequest {
        internal: RtpObserverInternal,
        data: RtpObserverAddRemoveProducerData,
    },
);

request_response!(
    "rtpObserver.removeProducer",
    RtpObserverRemoveProducerRequest {
        internal: RtpObserverInternal,
        data: RtpObserverAddRemoveProducerData,
    },
);
