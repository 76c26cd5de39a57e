//! Pipe transport: relays RTP/data between two routers (possibly on two different workers),
//! always producing pipe consumers (every stream layer forwarded, no simulcast/SVC selection)
//! (`spec.md` §4.4). Grounded on the same wire shape as [`crate::router::plain_transport`], with
//! an `enable_rtx` flag and no `comedia`/`rtcp_mux` (a pipe always multiplexes RTP+RTCP and never
//! waits for the remote side to dial in first).

use crate::data_structures::{AppData, ListenInfo, TransportInternal};
use crate::error::{ChannelError, ConsumeDataError, ConsumeError, ProduceDataError, ProduceError};
use crate::messages::{RouterCreatePipeTransportRequest, TransportConnectData, TransportConnectRequest};
use crate::router::consumer::{Consumer, ConsumerOptions};
use crate::router::data_consumer::{DataConsumer, DataConsumerOptions};
use crate::router::data_producer::{DataProducer, DataProducerOptions};
use crate::router::plain_transport::{SrtpCryptoSuite, SrtpParameters, TransportTuple};
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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

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
pub struct PipeTransportOptions {
    pub listen_info: ListenInfo,
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    pub max_sctp_message_size: u32,
    pub sctp_send_buffer_size: u32,
    pub enable_rtx: bool,
    pub enable_srtp: bool,
    pub app_data: AppData,
}

impl PipeTransportOptions {
    pub fn new(listen_info: ListenInfo) -> Self {
        Self {
            listen_info,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            sctp_send_buffer_size: 262_144,
            enable_rtx: false,
            enable_srtp: false,
            app_data: AppData::default(),
        }
    }

    pub(crate) fn to_data(&self) -> PipeTransportData {
        PipeTransportData {
            listen_info: self.listen_info.clone(),
            enable_sctp: self.enable_sctp,
            num_sctp_streams: self.num_sctp_streams,
            max_sctp_message_size: self.max_sctp_message_size,
            sctp_send_buffer_size: self.sctp_send_buffer_size,
            enable_rtx: self.enable_rtx,
            enable_srtp: self.enable_srtp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PipeTransportData {
    listen_info: ListenInfo,
    enable_sctp: bool,
    num_sctp_streams: NumSctpStreams,
    max_sctp_message_size: u32,
    sctp_send_buffer_size: u32,
    enable_rtx: bool,
    enable_srtp: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PipeTransportDump {
    pub(crate) tuple: TransportTuple,
    #[serde(default)]
    pub(crate) sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    pub(crate) sctp_state: Option<SctpState>,
    #[serde(default)]
    pub(crate) rtx: bool,
    #[serde(default)]
    pub(crate) srtp_parameters: Option<SrtpParameters>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    #[serde(rename_all = "camelCase")]
    Tuple { tuple: TransportTuple },
    #[serde(rename_all = "camelCase")]
    SctpStateChange { sctp_state: SctpState },
}

#[derive(Default)]
struct Handlers {
    tuple: Bag<Box<dyn Fn(&TransportTuple) + Send + Sync>>,
    sctp_state_change: Bag<Box<dyn Fn(SctpState) + Send + Sync>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: TransportId,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    tuple: Mutex<TransportTuple>,
    sctp_parameters: Option<SctpParameters>,
    sctp_state: Mutex<Option<SctpState>>,
    rtx: bool,
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
            let internal = TransportInternal { router_id: self.router.id(), transport_id: self.id };
            self.executor
                .spawn(async move {
                    if let Err(error) = crate::router::transport::close(&channel, internal).await {
                        error!("pipe transport closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// A transport that relays RTP/data between two routers without ICE/DTLS.
#[derive(Clone)]
pub struct PipeTransport {
    inner: Arc<Inner>,
}

impl PipeTransport {
    pub(crate) async fn new(
        router: Router,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        options: PipeTransportOptions,
    ) -> Result<Self, ChannelError> {
        let id = TransportId::new();
        let internal = TransportInternal { router_id: router.id(), transport_id: id };

        let dump: PipeTransportDump = channel
            .request(
                id.to_string(),
                RouterCreatePipeTransportRequest { internal, data: options.to_data() },
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
                    Ok(Notification::SctpStateChange { sctp_state }) => {
                        handlers.sctp_state_change.call(|callback| callback(sctp_state));
                    }
                    Err(error) => error!("failed to parse pipe transport notification: {}", error),
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
                sctp_parameters: dump.sctp_parameters,
                sctp_state: Mutex::new(dump.sctp_state),
                rtx: dump.rtx,
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

    pub fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.inner.sctp_parameters
    }

    pub fn rtx(&self) -> bool {
        self.inner.rtx
    }

    pub fn srtp_parameters(&self) -> Option<SrtpParameters> {
        self.inner.srtp_parameters.lock().clone()
    }

    pub async fn connect(
        &self,
        ip: String,
        port: u16,
        srtp_parameters: Option<SrtpParameters>,
    ) -> Result<(), ChannelError> {
        debug!("connect()");
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                TransportConnectRequest {
                    internal: self.internal(),
                    data: TransportConnectData::Pipe { ip, port, srtp_parameters: srtp_parameters.clone() },
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

    /// Every consumer a pipe transport creates is a pipe consumer, regardless of the caller's
    /// `options.pipe` value, since a pipe transport never selects a single simulcast/SVC layer.
    pub async fn consume(&self, mut options: ConsumerOptions) -> Result<Consumer, ConsumeError> {
        options.pipe = true;
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

    fn internal(&self) -> TransportInternal {
        TransportInternal { router_id: self.inner.router.id(), transport_id: self.inner.id }
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

    pub fn downgrade(&self) -> WeakPipeTransport {
        WeakPipeTransport { inner: Arc::downgrade(&self.inner) }
    }
}

impl std::fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeTransport").field("id", &self.inner.id).finish()
    }
}

impl Transport for PipeTransport {
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

impl TransportImpl for PipeTransport {
    fn router(&self) -> &Router {
        &self.inner.router
    }

    fn executor(&self) -> &Arc<Executor<'static>> {
        &self.inner.executor
    }
}

#[derive(Clone)]
pub struct WeakPipeTransport {
    inner: Weak<Inner>,
}

impl WeakPipeTransport {
    pub fn upgrade(&self) -> Option<PipeTransport> {
        Some(PipeTransport { inner: self.inner.upgrade()? })
    }
}

impl std::fmt::Debug for WeakPipeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakPipeTransport").finish()
    }
}

impl WeakTransport for WeakPipeTransport {
    fn upgrade(&self) -> Option<Box<dyn Transport>> {
        Some(Box::new(self.upgrade()?))
    }
}
