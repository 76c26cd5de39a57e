//! Plain (RTP-over-UDP) transport: no ICE, no DTLS, optionally SRTP-protected
//! (`spec.md` §4.4). Used for piping media to/from non-WebRTC endpoints (an RTSP gateway, a
//! recording box) that speak raw RTP/RTCP.

use crate::data_structures::{AppData, ListenInfo, TransportInternal, TransportProtocol};
use crate::error::{ChannelError, ConsumeDataError, ConsumeError, ProduceDataError, ProduceError};
use crate::messages::{
    RouterCreatePlainTransportRequest, TransportConnectData, TransportConnectRequest,
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
#[serde(rename_all = "UPPERCASE")]
pub enum SrtpCryptoSuite {
    #[serde(rename = "AES_CM_128_HMAC_SHA1_80")]
    AesCm128HmacSha1_80,
    #[serde(rename = "AES_CM_128_HMAC_SHA1_32")]
    AesCm128HmacSha1_32,
}

impl Default for SrtpCryptoSuite {
    fn default() -> Self {
        Self::AesCm128HmacSha1_80
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SrtpParameters {
    pub crypto_suite: SrtpCryptoSuite,
    pub key_base64: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportTuple {
    pub local_ip: IpAddr,
    pub local_port: u16,
    pub remote_ip: Option<IpAddr>,
    pub remote_port: Option<u16>,
    pub protocol: TransportProtocol,
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
pub struct PlainTransportOptions {
    pub listen_info: ListenInfo,
    pub rtcp_listen_info: Option<ListenInfo>,
    pub rtcp_mux: bool,
    pub comedia: bool,
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    pub max_sctp_message_size: u32,
    pub sctp_send_buffer_size: u32,
    pub enable_srtp: bool,
    pub srtp_crypto_suite: SrtpCryptoSuite,
    pub app_data: AppData,
}

impl PlainTransportOptions {
    pub fn new(listen_info: ListenInfo) -> Self {
        Self {
            listen_info,
            rtcp_listen_info: None,
            rtcp_mux: true,
            comedia: false,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            sctp_send_buffer_size: 262_144,
            enable_srtp: false,
            srtp_crypto_suite: SrtpCryptoSuite::AesCm128HmacSha1_80,
            app_data: AppData::default(),
        }
    }

    pub(crate) fn to_data(&self) -> PlainTransportData {
        PlainTransportData {
            listen_info: self.listen_info.clone(),
            rtcp_listen_info: self.rtcp_listen_info.clone(),
            rtcp_mux: self.rtcp_mux,
            comedia: self.comedia,
            enable_sctp: self.enable_sctp,
            num_sctp_streams: self.num_sctp_streams,
            max_sctp_message_size: self.max_sctp_message_size,
            sctp_send_buffer_size: self.sctp_send_buffer_size,
            enable_srtp: self.enable_srtp,
            srtp_crypto_suite: self.srtp_crypto_suite,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlainTransportData {
    listen_info: ListenInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    rtcp_listen_info: Option<ListenInfo>,
    rtcp_mux: bool,
    comedia: bool,
    enable_sctp: bool,
    num_sctp_streams: NumSctpStreams,
    max_sctp_message_size: u32,
    sctp_send_buffer_size: u32,
    enable_srtp: bool,
    srtp_crypto_suite: SrtpCryptoSuite,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlainTransportDump {
    pub(crate) tuple: TransportTuple,
    #[serde(default)]
    pub(crate) rtcp_tuple: Option<TransportTuple>,
    #[serde(default)]
    pub(crate) sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    pub(crate) sctp_state: Option<SctpState>,
    #[serde(default)]
    pub(crate) srtp_parameters: Option<SrtpParameters>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    #[serde(rename_all = "camelCase")]
    Tuple {
        tuple: TransportTuple,
    },
    #[serde(rename_all = "camelCase")]
    RtcpTuple {
        rtcp_tuple: TransportTuple,
    },
    #[serde(rename_all = "camelCase")]
    SctpStateChange {
        sctp_state: SctpState,
    },
}

#[derive(Default)]
struct Handlers {
    tuple: Bag<Box<dyn Fn(&TransportTuple) + Send + Sync>>,
    rtcp_tuple: Bag<Box<dyn Fn(&TransportTuple) + Send + Sync>>,
    sctp_state_change: Bag<Box<dyn Fn(SctpState) + Send + Sync>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: TransportId,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    tuple: Mutex<TransportTuple>,
    rtcp_tuple: Mutex<Option<TransportTuple>>,
    sctp_parameters: Option<SctpParameters>,
    sctp_state: Mutex<Option<SctpState>>,
    srtp_parameters: Mutex<Option<SrtpParameters>>,
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
                        error!("plain transport closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// A plain RTP-over-UDP transport, optionally SRTP-protected, without ICE or DTLS.
#[derive(Clone)]
pub struct PlainTransport {
    inner: Arc<Inner>,
}

impl PlainTransport {
    pub(crate) async fn new(
        router: Router,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        options: PlainTransportOptions,
    ) -> Result<Self, ChannelError> {
        let id = TransportId::new();
        let internal = TransportInternal {
            router_id: router.id(),
            transport_id: id,
        };

        let dump: PlainTransportDump = channel
            .request(
                id.to_string(),
                RouterCreatePlainTransportRequest {
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
                    Ok(Notification::Tuple { tuple }) => {
                        handlers.tuple.call(|callback| callback(&tuple));
                    }
                    Ok(Notification::RtcpTuple { rtcp_tuple }) => {
                        handlers.rtcp_tuple.call(|callback| callback(&rtcp_tuple));
                    }
                    Ok(Notification::SctpStateChange { sctp_state }) => {
                        handlers.sctp_state_change.call(|callback| callback(sctp_state));
                    }
                    Err(error) => error!("failed to parse plain transport notification: {}", error),
                }
            })
        };

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                executor,
                channel,
                handlers,
                tuple: Mutex::new(dump.tuple),
                rtcp_tuple: Mutex::new(dump.rtcp_tuple),
                sctp_parameters: dump.sctp_parameters,
                sctp_state: Mutex::new(dump.sctp_state),
                srtp_parameters: Mutex::new(dump.srtp_parameters),
                app_data: options.app_data,
                router,
                closed: AtomicBool::new(false),
                _subscription_handler: subscription_handler,
            }),
        })
    }

    pub fn tuple(&self) -> TransportTuple {
        *self.inner.tuple.lock()
    }

    pub fn rtcp_tuple(&self) -> Option<TransportTuple> {
        *self.inner.rtcp_tuple.lock()
    }

    pub fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.inner.sctp_parameters
    }

    pub fn srtp_parameters(&self) -> Option<SrtpParameters> {
        self.inner.srtp_parameters.lock().clone()
    }

    /// Provides the remote endpoint's address (when not using `comedia`) and, if SRTP is
    /// enabled, its key.
    pub async fn connect(
        &self,
        ip: Option<String>,
        port: Option<u16>,
        rtcp_port: Option<u16>,
        srtp_parameters: Option<SrtpParameters>,
    ) -> Result<(), ChannelError> {
        debug!("connect()");
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                TransportConnectRequest {
                    internal: self.internal(),
                    data: TransportConnectData::Plain {
                        ip,
                        port,
                        rtcp_port,
                        srtp_parameters: srtp_parameters.clone(),
                    },
                },
            )
            .await?;
        if srtp_parameters.is_some() {
            *self.inner.srtp_parameters.lock() = srtp_parameters;
        }
        Ok(())
    }

    pub async fn produce(&self, options: ProducerOptions) -> Result<Producer, ProduceError> {
        self.produce_impl(options).await
    }

    pub async fn consume(&self, options: ConsumerOptions) -> Result<Consumer, ConsumeError> {
        self.consume_impl(options).await
    }

    pub async fn produce_data(&self, options: DataProducerOptions) -> Result<DataProducer, ProduceDataError> {
        crate::router::data_producer::produce_sctp(
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            Box::new(self.clone()),
            options,
        )
        .await
    }

    pub async fn consume_data(&self, options: DataConsumerOptions) -> Result<DataConsumer, ConsumeDataError> {
        crate::router::data_consumer::consume_sctp(
            &self.inner.router,
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            Box::new(self.clone()),
            options,
        )
        .await
    }

    pub fn on_tuple<F: Fn(&TransportTuple) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.tuple.add(Box::new(callback))
    }

    pub fn on_rtcp_tuple<F: Fn(&TransportTuple) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.rtcp_tuple.add(Box::new(callback))
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

    pub fn downgrade(&self) -> WeakPlainTransport {
        WeakPlainTransport { inner: Arc::downgrade(&self.inner) }
    }
}

impl std::fmt::Debug for PlainTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainTransport").field("id", &self.inner.id).finish()
    }
}

impl Transport for PlainTransport {
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

impl TransportImpl for PlainTransport {
    fn router(&self) -> &Router {
        &self.inner.router
    }

    fn executor(&self) -> &Arc<Executor<'static>> {
        &self.inner.executor
    }
}

#[derive(Clone)]
pub struct WeakPlainTransport {
    inner: Weak<Inner>,
}

impl WeakPlainTransport {
    pub fn upgrade(&self) -> Option<PlainTransport> {
        Some(PlainTransport { inner: self.inner.upgrade()? })
    }
}

impl std::fmt::Debug for WeakPlainTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakPlainTransport").finish()
    }
}

impl WeakTransport for WeakPlainTransport {
    fn upgrade(&self) -> Option<Box<dyn Transport>> {
        Some(Box::new(self.upgrade()?))
    }
}
