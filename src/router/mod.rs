//! Router (C5/C6): one per call/session namespace within a worker. Owns the router-wide RTP
//! capabilities negotiated from operator-supplied codecs and a weak-referenced registry of every
//! transport, producer, consumer, data entity and RTP observer created under it (`spec.md` §4.3,
//! §4.5-4.8). Strong references flow child→parent (a producer holds its transport, a transport
//! holds its router); the router only holds weak handles back, so closing every child drops the
//! router's own strong count to zero without a manual teardown pass.

pub mod active_speaker_observer;
pub mod audio_level_observer;
pub mod consumer;
pub mod data_consumer;
pub mod data_producer;
pub mod direct_transport;
pub mod pipe_transport;
pub mod plain_transport;
pub mod producer;
pub mod rtp_observer;
pub mod transport;
pub mod webrtc_server;
pub mod webrtc_transport;

pub use webrtc_server::WebRtcServer;

use crate::data_structures::{AppData, Dump, RouterInternal, RtpObserverInternal, TransportInternal};
use crate::error::{ChannelError, RtpCapabilitiesError};
use crate::messages::{
    RouterCloseRequest, RouterCreateActiveSpeakerObserverRequest,
    RouterCreateAudioLevelObserverRequest, RouterCreateDirectTransportRequest,
    RouterCreatePipeTransportRequest, RouterCreatePlainTransportRequest,
    RouterCreateWebrtcTransportRequest, RouterDumpRequest, WorkerCreateRouterRequest,
};
use crate::ortc;
use crate::router::active_speaker_observer::{
    ActiveSpeakerObserver, ActiveSpeakerObserverOptions, WeakActiveSpeakerObserver,
};
use crate::router::audio_level_observer::{
    AudioLevelObserver, AudioLevelObserverOptions, WeakAudioLevelObserver,
};
use crate::router::consumer::{Consumer, ConsumerId, WeakConsumer};
use crate::router::data_consumer::{DataConsumer, DataConsumerId, WeakDataConsumer};
use crate::router::data_producer::{DataProducer, DataProducerId, WeakDataProducer};
use crate::router::direct_transport::{DirectTransport, DirectTransportOptions};
use crate::router::pipe_transport::{PipeTransport, PipeTransportOptions};
use crate::router::plain_transport::{PlainTransport, PlainTransportOptions};
use crate::router::producer::{Producer, ProducerId, WeakProducer};
use crate::router::rtp_observer::{RtpObserverId, WeakRtpObserver};
use crate::router::transport::{TransportId, WeakTransport};
use crate::router::webrtc_transport::{WebRtcTransport, WebRtcTransportOptions};
use crate::rtp_parameters::{RtpCapabilities, RtpCodecCapability};
use crate::uuid_based_wrapper_type;
use crate::worker::channel::Channel;
use async_executor::Executor;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

uuid_based_wrapper_type!(
    /// Router identifier, unique within its worker.
    RouterId
);

/// Codecs the router should be willing to negotiate; forwarded to
/// [`crate::ortc::generate_router_rtp_capabilities`] at creation time.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RouterOptions {
    pub media_codecs: Vec<RtpCodecCapability>,
    pub app_data: AppData,
}

impl RouterOptions {
    pub fn new(media_codecs: Vec<RtpCodecCapability>) -> Self {
        Self {
            media_codecs,
            app_data: AppData::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CreateRouterError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    RtpCapabilities(#[from] RtpCapabilitiesError),
}

/// A router's weak-referenced view of every entity created under it. Registration happens as
/// soon as an entity is constructed; a closed entity is lazily dropped out on next lookup rather
/// than eagerly swept, since `upgrade()` failing is enough to tell it's gone.
#[derive(Default)]
struct Registry {
    transports: HashMap<TransportId, Box<dyn WeakTransport>>,
    producers: HashMap<ProducerId, WeakProducer>,
    consumers: HashMap<ConsumerId, WeakConsumer>,
    data_producers: HashMap<DataProducerId, WeakDataProducer>,
    data_consumers: HashMap<DataConsumerId, WeakDataConsumer>,
    rtp_observers: HashMap<RtpObserverId, Box<dyn WeakRtpObserver>>,
}

#[derive(Default)]
struct Handlers {
    close: BagOnce<Box<dyn FnOnce() + Send>>,
    new_transport: Bag<Box<dyn Fn(TransportId) + Send + Sync>>,
}

struct Inner {
    id: RouterId,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    rtp_capabilities: RtpCapabilities,
    app_data: AppData,
    registry: Mutex<Registry>,
    handlers: Arc<Handlers>,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("close()");
            self.handlers.close.call_simple();

            let channel = self.channel.clone();
            let internal = RouterInternal { router_id: self.id };
            self.executor
                .spawn(async move {
                    if let Err(error) = channel
                        .request(internal.router_id.to_string(), RouterCloseRequest { internal })
                        .await
                    {
                        error!("router closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// A router: one per call/session namespace, holding its own RTP capability set and every
/// transport/producer/consumer/observer created to route media within it.
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

impl Router {
    pub(crate) async fn new(
        executor: Arc<Executor<'static>>,
        channel: Channel,
        options: RouterOptions,
    ) -> Result<Self, CreateRouterError> {
        let rtp_capabilities = ortc::generate_router_rtp_capabilities(&options.media_codecs)?;

        let id = RouterId::new();
        let internal = RouterInternal { router_id: id };
        channel
            .request(id.to_string(), WorkerCreateRouterRequest { internal })
            .await?;

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                executor,
                channel,
                rtp_capabilities,
                app_data: options.app_data,
                registry: Mutex::new(Registry::default()),
                handlers: Arc::default(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn id(&self) -> RouterId {
        self.inner.id
    }

    pub fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.inner.rtp_capabilities
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn internal(&self) -> RouterInternal {
        RouterInternal { router_id: self.inner.id }
    }

    pub(crate) fn executor(&self) -> &Arc<Executor<'static>> {
        &self.inner.executor
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    pub async fn dump(&self) -> Result<Dump, ChannelError> {
        self.inner
            .channel
            .request(self.inner.id.to_string(), RouterDumpRequest { internal: self.internal() })
            .await
    }

    pub async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> Result<WebRtcTransport, ChannelError> {
        let transport = WebRtcTransport::new(
            self.clone(),
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            options,
        )
        .await?;
        self.register_transport(transport.id(), Box::new(transport.downgrade()));
        Ok(transport)
    }

    pub async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<PlainTransport, ChannelError> {
        let transport = PlainTransport::new(
            self.clone(),
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            options,
        )
        .await?;
        self.register_transport(transport.id(), Box::new(transport.downgrade()));
        Ok(transport)
    }

    pub async fn create_pipe_transport(
        &self,
        options: PipeTransportOptions,
    ) -> Result<PipeTransport, ChannelError> {
        let transport = PipeTransport::new(
            self.clone(),
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            options,
        )
        .await?;
        self.register_transport(transport.id(), Box::new(transport.downgrade()));
        Ok(transport)
    }

    pub async fn create_direct_transport(
        &self,
        options: DirectTransportOptions,
    ) -> Result<DirectTransport, ChannelError> {
        let transport = DirectTransport::new(
            self.clone(),
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            options,
        )
        .await?;
        self.register_transport(transport.id(), Box::new(transport.downgrade()));
        Ok(transport)
    }

    pub async fn create_audio_level_observer(
        &self,
        options: AudioLevelObserverOptions,
    ) -> Result<AudioLevelObserver, ChannelError> {
        let id = RtpObserverId::new();
        let internal = RtpObserverInternal { router_id: self.inner.id, rtp_observer_id: id };
        self.inner
            .channel
            .request(
                id.to_string(),
                RouterCreateAudioLevelObserverRequest { internal, data: options.to_data() },
            )
            .await?;

        let observer = AudioLevelObserver::new(
            id,
            self.inner.id,
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            options.app_data,
        );
        self.register_rtp_observer(id, Box::new(observer.downgrade()));
        Ok(observer)
    }

    pub async fn create_active_speaker_observer(
        &self,
        options: ActiveSpeakerObserverOptions,
    ) -> Result<ActiveSpeakerObserver, ChannelError> {
        let id = RtpObserverId::new();
        let internal = RtpObserverInternal { router_id: self.inner.id, rtp_observer_id: id };
        self.inner
            .channel
            .request(
                id.to_string(),
                RouterCreateActiveSpeakerObserverRequest { internal, data: options.to_data() },
            )
            .await?;

        let observer = ActiveSpeakerObserver::new(
            id,
            self.inner.id,
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            options.app_data,
        );
        self.register_rtp_observer(id, Box::new(observer.downgrade()));
        Ok(observer)
    }

    pub(crate) fn get_producer(&self, producer_id: ProducerId) -> Option<Producer> {
        self.inner.registry.lock().producers.get(&producer_id)?.upgrade()
    }

    /// True iff `producer_id` is still live on this router and `rtp_capabilities` can decode at
    /// least one of its consumable codecs (`spec.md` §4.5 can-consume check, §4.8 step 2).
    pub fn can_consume(&self, producer_id: ProducerId, rtp_capabilities: &RtpCapabilities) -> bool {
        match self.get_producer(producer_id) {
            Some(producer) => ortc::can_consume(producer.consumable_rtp_parameters(), rtp_capabilities),
            None => false,
        }
    }

    pub(crate) fn get_data_producer(&self, data_producer_id: DataProducerId) -> Option<DataProducer> {
        self.inner
            .registry
            .lock()
            .data_producers
            .get(&data_producer_id)?
            .upgrade()
    }

    pub(crate) fn register_transport(&self, id: TransportId, transport: Box<dyn WeakTransport>) {
        self.inner.registry.lock().transports.insert(id, transport);
        self.inner.handlers.new_transport.call(|callback| callback(id));
    }

    pub(crate) fn register_producer(&self, producer: WeakProducer) {
        self.inner.registry.lock().producers.insert(producer.id(), producer);
    }

    pub(crate) fn register_consumer(&self, consumer: WeakConsumer) {
        self.inner.registry.lock().consumers.insert(consumer.id(), consumer);
    }

    pub(crate) fn register_data_producer(&self, data_producer: WeakDataProducer) {
        self.inner
            .registry
            .lock()
            .data_producers
            .insert(data_producer.id(), data_producer);
    }

    pub(crate) fn register_data_consumer(&self, data_consumer: WeakDataConsumer) {
        self.inner
            .registry
            .lock()
            .data_consumers
            .insert(data_consumer.id(), data_consumer);
    }

    fn register_rtp_observer(&self, id: RtpObserverId, observer: Box<dyn WeakRtpObserver>) {
        self.inner.registry.lock().rtp_observers.insert(id, observer);
    }

    pub fn on_new_transport<F: Fn(TransportId) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.new_transport.add(Box::new(callback))
    }

    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(Box::new(callback));
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }

    pub fn downgrade(&self) -> WeakRouter {
        WeakRouter { inner: Arc::downgrade(&self.inner) }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("id", &self.inner.id).finish()
    }
}

/// Doesn't own the underlying router; used by the worker manager's call table to avoid a
/// reference cycle against the router's own children.
#[derive(Clone)]
pub struct WeakRouter {
    inner: Weak<Inner>,
}

impl WeakRouter {
    pub fn upgrade(&self) -> Option<Router> {
        Some(Router { inner: self.inner.upgrade()? })
    }
}

impl std::fmt::Debug for WeakRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakRouter").finish()
    }
}
