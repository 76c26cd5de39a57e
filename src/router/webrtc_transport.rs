//! WebRTC transport: ICE + DTLS transport used by browser/native WebRTC endpoints (`spec.md`
//! §4.4). Grounded on the reference pack's `router/webrtc_transport.rs`, adapted from its dual
//! channel/payload-channel design to this crate's single `Channel`.

use crate::data_structures::{AppData, ListenInfo, TransportInternal};
use crate::error::{ChannelError, ConsumeDataError, ConsumeError, ProduceDataError, ProduceError};
use crate::messages::{
    RouterCreateWebrtcTransportRequest, TransportConnectData, TransportConnectRequest,
    TransportRestartIceRequest, TransportSetMaxIncomingBitrateData,
    TransportSetMaxIncomingBitrateRequest,
};
use crate::router::consumer::{Consumer, ConsumerOptions};
use crate::router::data_consumer::{DataConsumer, DataConsumerOptions};
use crate::router::data_producer::{DataProducer, DataProducerOptions};
use crate::router::producer::{Producer, ProducerOptions};
use crate::router::transport::{Transport, TransportId, TransportImpl, WeakTransport};
use crate::router::Router;
use crate::sctp_parameters::{NumSctpStreams, SctpParameters};
use crate::worker::channel::{Channel, SubscriptionHandler};
use async_executor::Executor;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceRole {
    Controlled,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    New,
    Connected,
    Completed,
    Disconnected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceCandidateType {
    Host,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceCandidateTcpType {
    Passive,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: IpAddr,
    pub protocol: crate::data_structures::TransportProtocol,
    pub port: u16,
    pub r#type: IceCandidateType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<IceCandidateTcpType>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    Auto,
    Client,
    Server,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsFingerprintAlgorithm {
    #[serde(rename = "sha-1")]
    Sha1,
    #[serde(rename = "sha-224")]
    Sha224,
    #[serde(rename = "sha-256")]
    Sha256,
    #[serde(rename = "sha-384")]
    Sha384,
    #[serde(rename = "sha-512")]
    Sha512,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DtlsFingerprint {
    pub algorithm: DtlsFingerprintAlgorithm,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    #[serde(default = "default_dtls_role", skip_serializing_if = "Option::is_none")]
    pub role: Option<DtlsRole>,
    pub fingerprints: Vec<DtlsFingerprint>,
}

fn default_dtls_role() -> Option<DtlsRole> {
    None
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SctpState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct WebRtcTransportOptions {
    pub listen_infos: Vec<ListenInfo>,
    pub initial_available_outgoing_bitrate: u32,
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    pub max_sctp_message_size: u32,
    pub sctp_send_buffer_size: u32,
    pub app_data: AppData,
}

impl WebRtcTransportOptions {
    pub fn new(listen_infos: Vec<ListenInfo>) -> Self {
        Self {
            listen_infos,
            initial_available_outgoing_bitrate: 600_000,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            sctp_send_buffer_size: 262_144,
            app_data: AppData::default(),
        }
    }

    pub(crate) fn to_data(&self) -> WebRtcTransportData {
        WebRtcTransportData {
            listen_infos: self.listen_infos.clone(),
            initial_available_outgoing_bitrate: self.initial_available_outgoing_bitrate,
            enable_sctp: self.enable_sctp,
            num_sctp_streams: self.num_sctp_streams,
            max_sctp_message_size: self.max_sctp_message_size,
            sctp_send_buffer_size: self.sctp_send_buffer_size,
            is_data_channel: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebRtcTransportData {
    listen_infos: Vec<ListenInfo>,
    initial_available_outgoing_bitrate: u32,
    enable_sctp: bool,
    num_sctp_streams: NumSctpStreams,
    max_sctp_message_size: u32,
    sctp_send_buffer_size: u32,
    is_data_channel: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebRtcTransportDump {
    pub(crate) ice_role: IceRole,
    pub(crate) ice_parameters: IceParameters,
    pub(crate) ice_candidates: Vec<IceCandidate>,
    pub(crate) ice_state: IceState,
    #[serde(default)]
    pub(crate) ice_selected_tuple: Option<serde_json::Value>,
    pub(crate) dtls_parameters: DtlsParameters,
    pub(crate) dtls_state: DtlsState,
    #[serde(default)]
    pub(crate) sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    pub(crate) sctp_state: Option<SctpState>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    #[serde(rename_all = "camelCase")]
    IceStateChange {
        ice_state: IceState,
    },
    #[serde(rename_all = "camelCase")]
    IceSelectedTupleChange {
        ice_selected_tuple: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    DtlsStateChange {
        dtls_state: DtlsState,
    },
    #[serde(rename_all = "camelCase")]
    SctpStateChange {
        sctp_state: SctpState,
    },
}

#[derive(Default)]
struct Handlers {
    ice_state_change: Bag<Box<dyn Fn(IceState) + Send + Sync>>,
    dtls_state_change: Bag<Box<dyn Fn(DtlsState) + Send + Sync>>,
    sctp_state_change: Bag<Box<dyn Fn(SctpState) + Send + Sync>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: TransportId,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    ice_parameters: IceParameters,
    ice_candidates: Vec<IceCandidate>,
    ice_state: Mutex<IceState>,
    dtls_parameters: Mutex<DtlsParameters>,
    dtls_state: Mutex<DtlsState>,
    sctp_parameters: Option<SctpParameters>,
    app_data: AppData,
    router: Router,
    closed: AtomicBool,
    _subscription_handler: SubscriptionHandler,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("close()");
            self.handlers.close.call_simple();

            let channel = self.channel.clone();
            let internal = TransportInternal {
                router_id: self.router.id(),
                transport_id: self.id,
            };
            self.executor
                .spawn(async move {
                    if let Err(error) = crate::router::transport::close(&channel, internal).await {
                        error!("webrtc transport closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// An ICE + DTLS transport, the kind used by browser and native WebRTC endpoints.
#[derive(Clone)]
pub struct WebRtcTransport {
    inner: Arc<Inner>,
}

impl WebRtcTransport {
    pub(crate) async fn new(
        router: Router,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        options: WebRtcTransportOptions,
    ) -> Result<Self, ChannelError> {
        let id = TransportId::new();
        let internal = TransportInternal {
            router_id: router.id(),
            transport_id: id,
        };

        let dump: WebRtcTransportDump = channel
            .request(
                id.to_string(),
                RouterCreateWebrtcTransportRequest {
                    internal,
                    data: options.to_data(),
                },
            )
            .await?;

        let handlers = Arc::<Handlers>::default();

        let subscription_handler = {
            let handlers = Arc::clone(&handlers);
            channel.subscribe_to_notifications(id.to_string(), move |notification| {
                let envelope =
                    serde_json::json!({ "event": notification.event, "data": notification.data });
                match serde_json::from_value::<Notification>(envelope) {
                    Ok(Notification::IceStateChange { ice_state }) => {
                        handlers.ice_state_change.call(|callback| callback(ice_state));
                    }
                    Ok(Notification::IceSelectedTupleChange { .. }) => {}
                    Ok(Notification::DtlsStateChange { dtls_state }) => {
                        handlers.dtls_state_change.call(|callback| callback(dtls_state));
                    }
                    Ok(Notification::SctpStateChange { sctp_state }) => {
                        handlers.sctp_state_change.call(|callback| callback(sctp_state));
                    }
                    Err(error) => error!("failed to parse webrtc transport notification: {}", error),
                }
            })
        };

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                executor,
                channel,
                handlers,
                ice_parameters: dump.ice_parameters,
                ice_candidates: dump.ice_candidates,
                ice_state: Mutex::new(dump.ice_state),
                dtls_parameters: Mutex::new(dump.dtls_parameters),
                dtls_state: Mutex::new(dump.dtls_state),
                sctp_parameters: dump.sctp_parameters,
                app_data: options.app_data,
                router,
                closed: AtomicBool::new(false),
                _subscription_handler: subscription_handler,
            }),
        })
    }

    pub fn ice_parameters(&self) -> &IceParameters {
        &self.inner.ice_parameters
    }

    pub fn ice_candidates(&self) -> &[IceCandidate] {
        &self.inner.ice_candidates
    }

    pub fn ice_state(&self) -> IceState {
        *self.inner.ice_state.lock()
    }

    pub fn dtls_parameters(&self) -> DtlsParameters {
        self.inner.dtls_parameters.lock().clone()
    }

    pub fn dtls_state(&self) -> DtlsState {
        *self.inner.dtls_state.lock()
    }

    pub fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.inner.sctp_parameters
    }

    /// Provides the transport with the client's DTLS parameters, completing the handshake setup.
    pub async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), ChannelError> {
        debug!("connect()");
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                TransportConnectRequest {
                    internal: self.internal(),
                    data: TransportConnectData::WebRtc { dtls_parameters: dtls_parameters.clone() },
                },
            )
            .await?;
        *self.inner.dtls_parameters.lock() = dtls_parameters;
        Ok(())
    }

    pub async fn restart_ice(&self) -> Result<IceParameters, ChannelError> {
        let response = self
            .inner
            .channel
            .request(self.inner.id.to_string(), TransportRestartIceRequest { internal: self.internal() })
            .await?;
        Ok(response.ice_parameters)
    }

    pub async fn get_stats(&self) -> Result<crate::data_structures::Stats, ChannelError> {
        crate::router::transport::get_stats(&self.inner.channel, self.internal()).await
    }

    pub async fn set_max_incoming_bitrate(&self, bitrate: u32) -> Result<(), ChannelError> {
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                TransportSetMaxIncomingBitrateRequest {
                    internal: self.internal(),
                    data: TransportSetMaxIncomingBitrateData { bitrate },
                },
            )
            .await
    }

    pub async fn produce(&self, options: ProducerOptions) -> Result<Producer, ProduceError> {
        debug!("produce()");
        self.produce_impl(options).await
    }

    pub async fn consume(&self, options: ConsumerOptions) -> Result<Consumer, ConsumeError> {
        debug!("consume()");
        self.consume_impl(options).await
    }

    pub async fn produce_data(&self, options: DataProducerOptions) -> Result<DataProducer, ProduceDataError> {
        debug!("produce_data()");
        crate::router::data_producer::produce_sctp(
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            Box::new(self.clone()),
            options,
        )
        .await
    }

    pub async fn consume_data(&self, options: DataConsumerOptions) -> Result<DataConsumer, ConsumeDataError> {
        debug!("consume_data()");
        crate::router::data_consumer::consume_sctp(
            &self.inner.router,
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            Box::new(self.clone()),
            options,
        )
        .await
    }

    pub fn on_ice_state_change<F: Fn(IceState) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.ice_state_change.add(Box::new(callback))
    }

    pub fn on_dtls_state_change<F: Fn(DtlsState) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.dtls_state_change.add(Box::new(callback))
    }

    pub fn on_sctp_state_change<F: Fn(SctpState) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.sctp_state_change.add(Box::new(callback))
    }

    fn internal(&self) -> TransportInternal {
        TransportInternal {
            router_id: self.inner.router.id(),
            transport_id: self.inner.id,
        }
    }

    pub fn id(&self) -> TransportId {
        self.inner.id
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(Box::new(callback));
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }

    pub fn downgrade(&self) -> WeakWebRtcTransport {
        WeakWebRtcTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport").field("id", &self.inner.id).finish()
    }
}

impl Transport for WebRtcTransport {
    fn id(&self) -> TransportId {
        self.inner.id
    }

    fn router_id(&self) -> crate::router::RouterId {
        self.inner.router.id()
    }

    fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn on_close(&self, callback: Box<dyn FnOnce() + Send>) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(callback);
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }

    fn clone_boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }
}

impl TransportImpl for WebRtcTransport {
    fn router(&self) -> &Router {
        &self.inner.router
    }

    fn executor(&self) -> &Arc<Executor<'static>> {
        &self.inner.executor
    }
}

#[derive(Clone)]
pub struct WeakWebRtcTransport {
    inner: Weak<Inner>,
}

impl WeakWebRtcTransport {
    pub fn upgrade(&self) -> Option<WebRtcTransport> {
        Some(WebRtcTransport { inner: self.inner.upgrade()? })
    }
}

impl std::fmt::Debug for WeakWebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakWebRtcTransport").finish()
    }
}

impl WeakTransport for WeakWebRtcTransport {
    fn upgrade(&self) -> Option<Box<dyn Transport>> {
        Some(Box::new(self.upgrade()?))
    }
}
