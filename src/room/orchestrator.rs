//! Room Orchestrator (C8): one [`Room`] per conference, holding a single [`Router`], the two
//! room-wide RTP observers, the peer map, and the sharing-producer slot. `spec.md` §4.8.

use crate::data_structures::{AppData, TransportProtocol};
use crate::error::PeerError;
use crate::room::peer::PeerSession;
use crate::room::protocol::{ClientRequest, PeerId, ServerNotification, ServerRequest};
use crate::router::active_speaker_observer::{ActiveSpeakerObserver, ActiveSpeakerObserverOptions};
use crate::router::audio_level_observer::{AudioLevelObserver, AudioLevelObserverOptions};
use crate::router::consumer::{Consumer, ConsumerId, ConsumerLayers, ConsumerOptions, ConsumerScore};
use crate::router::data_consumer::DataConsumerOptions;
use crate::router::data_producer::{DataProducer, DataProducerOptions};
use crate::router::producer::{Producer, ProducerId, ProducerOptions};
use crate::router::transport::Transport;
use crate::router::webrtc_transport::{WebRtcTransport, WebRtcTransportOptions};
use crate::router::Router;
use crate::rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters};
use crate::sctp_parameters::SctpCapabilities;
use async_executor::Executor;
use async_trait::async_trait;
use event_listener_primitives::HandlerId;
use log::*;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Abstracts the signaling socket so the orchestrator never depends on a specific websocket
/// library (`spec.md` §1 Non-goals). An outer binary implements this over its own socket type
/// and hands a `Room` an `Arc<dyn PeerTransport>` at construction time.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn notify(&self, peer_id: &PeerId, notification: ServerNotification);
    /// Issues a server-to-peer request and awaits the matching response
    /// (`spec.md` §4.7's request-id matching on the peer side).
    async fn request(&self, peer_id: &PeerId, request: ServerRequest) -> Result<Value, PeerError>;
}

/// Per-video-producer desired-quality recomputation (`SPEC_FULL.md` §B). One instance per video
/// producer, created alongside it and destroyed with it.
pub struct VideoProducerQualityController {
    producer_id: ProducerId,
    owner_peer_id: PeerId,
    consumers: Mutex<HashMap<ConsumerId, ConsumerQualityState>>,
}

#[derive(Clone, Copy)]
struct ConsumerQualityState {
    paused: bool,
    preferred_spatial_layer: u8,
}

pub struct DesiredQuality {
    pub paused: bool,
    pub desired_q: i8,
}

impl VideoProducerQualityController {
    fn new(producer_id: ProducerId, owner_peer_id: PeerId) -> Self {
        Self { producer_id, owner_peer_id, consumers: Mutex::new(HashMap::new()) }
    }

    pub fn producer_id(&self) -> ProducerId {
        self.producer_id
    }

    pub fn owner_peer_id(&self) -> &PeerId {
        &self.owner_peer_id
    }

    fn register_consumer(&self, consumer_id: ConsumerId, paused: bool) {
        self.consumers.lock().insert(consumer_id, ConsumerQualityState { paused, preferred_spatial_layer: 0 });
    }

    fn remove_consumer(&self, consumer_id: ConsumerId) {
        self.consumers.lock().remove(&consumer_id);
    }

    fn update_consumer(&self, consumer_id: ConsumerId, paused: bool, preferred_spatial_layer: Option<u8>) {
        let mut consumers = self.consumers.lock();
        if let Some(state) = consumers.get_mut(&consumer_id) {
            state.paused = paused;
            if let Some(layer) = preferred_spatial_layer {
                state.preferred_spatial_layer = layer;
            }
        }
    }

    /// Walks every consumer bound to this producer and takes the maximum preferred spatial layer
    /// over the unpaused ones; `-1` if all are paused (`spec.md` §4.8).
    fn recompute(&self) -> DesiredQuality {
        let consumers = self.consumers.lock();
        if consumers.is_empty() || consumers.values().all(|state| state.paused) {
            return DesiredQuality { paused: true, desired_q: -1 };
        }
        let max_layer =
            consumers.values().filter(|state| !state.paused).map(|state| state.preferred_spatial_layer).max().unwrap_or(0);
        DesiredQuality { paused: false, desired_q: max_layer as i8 }
    }
}

/// The "sharing" producer slot: at most one video producer per room gets priority over normal
/// producers when present (`spec.md` §4.8; `SPEC_FULL.md` §B's `VideoSharingController` analogue).
#[derive(Default)]
pub struct SharingSlot {
    current: Mutex<Option<(PeerId, ProducerId)>>,
}

impl SharingSlot {
    pub fn get(&self) -> Option<(PeerId, ProducerId)> {
        self.current.lock().clone()
    }

    /// Installs a new sharing producer, returning the one it replaced (if any), so the caller can
    /// close it.
    fn set(&self, peer_id: PeerId, producer_id: ProducerId) -> Option<(PeerId, ProducerId)> {
        self.current.lock().replace((peer_id, producer_id))
    }

    fn clear_if(&self, producer_id: ProducerId) {
        let mut current = self.current.lock();
        if matches!(&*current, Some((_, id)) if *id == producer_id) {
            *current = None;
        }
    }
}

/// Snapshot for the operational dashboard (`SPEC_FULL.md` §B); polled on an interval by the
/// background timer thread described in `spec.md` §5, not pushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub peer_count: usize,
    pub producer_count: usize,
    pub consumer_count: usize,
    pub data_producer_count: usize,
    pub data_consumer_count: usize,
}

pub struct Room {
    executor: Arc<Executor<'static>>,
    transport: Arc<dyn PeerTransport>,
    router: Router,
    /// Template handed to `router.create_webrtc_transport()` for every `createWebRtcTransport`
    /// request; per-request fields (`forceTcp`, sctp enablement, `appData`) are overlaid on a
    /// clone (`SPEC_FULL.md` §B).
    webrtc_transport_options: WebRtcTransportOptions,
    audio_level_observer: AudioLevelObserver,
    active_speaker_observer: ActiveSpeakerObserver,
    peers: Mutex<HashMap<PeerId, Arc<PeerSession>>>,
    sharing: SharingSlot,
    closed: AtomicBool,
    /// Keeps event subscriptions registered by [`Room::wire_consumer_events`] and
    /// [`Room::produce`] alive; a [`HandlerId`] deregisters its callback when dropped, so these
    /// must outlive the consumer/producer they were registered against.
    consumer_handlers: Mutex<HashMap<ConsumerId, Vec<HandlerId>>>,
    producer_handlers: Mutex<HashMap<ProducerId, Vec<HandlerId>>>,
    /// Forwards the active speaker observer's dominant-speaker notification to every peer
    /// (`spec.md` §6's `activeSpeaker`). Held only to keep the subscription alive.
    _active_speaker_handler: HandlerId,
}

impl Room {
    /// Built with [`Arc::new_cyclic`] so the active speaker observer's callback can hold a
    /// [`Weak`] reference back to the room without creating a reference cycle.
    pub async fn new(
        executor: Arc<Executor<'static>>,
        transport: Arc<dyn PeerTransport>,
        router: Router,
        webrtc_transport_options: WebRtcTransportOptions,
    ) -> Result<Arc<Self>, crate::error::ChannelError> {
        let audio_level_observer = router.create_audio_level_observer(AudioLevelObserverOptions::default()).await?;
        let active_speaker_observer = router.create_active_speaker_observer(ActiveSpeakerObserverOptions::default()).await?;

        Ok(Arc::new_cyclic(|weak: &Weak<Room>| {
            let weak = weak.clone();
            let active_speaker_handler = active_speaker_observer.on_dominant_speaker(move |producer_id| {
                if let Some(room) = weak.upgrade() {
                    room.broadcast_active_speaker(producer_id);
                }
            });

            Self {
                executor,
                transport,
                router,
                webrtc_transport_options,
                audio_level_observer,
                active_speaker_observer,
                peers: Mutex::new(HashMap::new()),
                sharing: SharingSlot::default(),
                closed: AtomicBool::new(false),
                consumer_handlers: Mutex::new(HashMap::new()),
                producer_handlers: Mutex::new(HashMap::new()),
                _active_speaker_handler: active_speaker_handler,
            }
        }))
    }

    fn broadcast_active_speaker(&self, producer_id: ProducerId) {
        let peer_ids: Vec<PeerId> = self.peers.lock().keys().cloned().collect();
        let transport = Arc::clone(&self.transport);
        self.executor
            .spawn(async move {
                for peer_id in peer_ids {
                    transport.notify(&peer_id, ServerNotification::ActiveSpeaker { producer_id: Some(producer_id) }).await;
                }
            })
            .detach();
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn audio_level_observer(&self) -> &AudioLevelObserver {
        &self.audio_level_observer
    }

    pub fn active_speaker_observer(&self) -> &ActiveSpeakerObserver {
        &self.active_speaker_observer
    }

    pub fn sharing(&self) -> &SharingSlot {
        &self.sharing
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn peer(&self, peer_id: &PeerId) -> Option<Arc<PeerSession>> {
        self.peers.lock().get(peer_id).cloned()
    }

    fn other_peers(&self, except: &PeerId) -> Vec<Arc<PeerSession>> {
        self.peers.lock().values().filter(|peer| peer.id() != except).cloned().collect()
    }

    fn quality_controller_for(&self, producer_id: ProducerId) -> Option<Arc<VideoProducerQualityController>> {
        self.peers.lock().values().find_map(|peer| peer.quality_controller(producer_id))
    }

    pub fn router_rtp_capabilities(&self) -> &RtpCapabilities {
        self.router.rtp_capabilities()
    }

    /// Registers a newly accepted websocket as a peer and sends it the one-shot
    /// `mediasoup-version` handshake notification (`SPEC_FULL.md` §B).
    pub async fn accept_peer(&self, peer_id: PeerId) -> Arc<PeerSession> {
        let peer = Arc::new(PeerSession::new(peer_id.clone()));
        self.peers.lock().insert(peer_id.clone(), Arc::clone(&peer));
        self.transport.notify(&peer_id, ServerNotification::MediasoupVersion { version: env!("CARGO_PKG_VERSION") }).await;
        peer
    }

    /// The join handler (`spec.md` §4.8 steps 1-7).
    pub async fn join(
        &self,
        peer_id: &PeerId,
        display_name: String,
        device: Value,
        rtp_capabilities: RtpCapabilities,
        sctp_capabilities: Option<crate::sctp_parameters::SctpCapabilities>,
    ) -> Result<Vec<(PeerId, String, Value)>, PeerError> {
        let peer = self.peer(peer_id).ok_or_else(|| PeerError::BadMessage("unknown peer".to_string()))?;

        // Step 1: refuse if already joined.
        if peer.joined() {
            return Err(PeerError::BadMessage("already joined".to_string()));
        }

        // Step 2.
        peer.set_joining_fields(display_name, device, rtp_capabilities, sctp_capabilities);

        // Step 3: build the accept payload before mutating anyone else's view of this peer.
        let other_peers = self.other_peers(peer_id);
        let accept_payload: Vec<_> =
            other_peers.iter().map(|other| (other.id().clone(), other.display_name(), other.device())).collect();

        // Step 4.
        peer.mark_joined();

        // Step 5: mirror every other peer's existing producers/dataProducers onto this peer.
        for other in &other_peers {
            for producer in other.producers() {
                if let Err(error) = self.create_consumer(&peer, other.id(), &producer).await {
                    warn!("failed to create mirrored consumer during join: {}", error);
                }
            }
            for data_producer in other.data_producers() {
                if data_producer.label() != "bot" {
                    if let Err(error) = self.create_data_consumer(&peer, &data_producer).await {
                        warn!("failed to create mirrored data consumer during join: {}", error);
                    }
                }
            }
        }

        // Step 6: the sharing producer, if any, is consumed by every joiner regardless of owner.
        if let Some((owner_id, producer_id)) = self.sharing.get() {
            if let Some(owner) = self.peer(&owner_id) {
                if let Some(producer) = owner.producers().into_iter().find(|producer| producer.id() == producer_id) {
                    if let Err(error) = self.create_consumer(&peer, &owner_id, &producer).await {
                        warn!("failed to create sharing consumer during join: {}", error);
                    }
                }
            }
        }

        // Step 7.
        for other in &other_peers {
            self.transport
                .notify(
                    other.id(),
                    ServerNotification::NewPeer { id: peer_id.clone(), display_name: peer.display_name(), device: peer.device() },
                )
                .await;
        }

        Ok(accept_payload)
    }

    /// The createWebRtcTransport handler (`spec.md` §6): overlays the per-request `forceTcp`,
    /// sctp enablement, and `producing`/`consuming` `appData` flags onto the room's configured
    /// listen options.
    pub async fn create_webrtc_transport(
        &self,
        peer_id: &PeerId,
        force_tcp: bool,
        producing: bool,
        consuming: bool,
        sctp_capabilities: Option<SctpCapabilities>,
    ) -> Result<WebRtcTransport, PeerError> {
        let peer = self.peer(peer_id).ok_or_else(|| PeerError::BadMessage("unknown peer".to_string()))?;

        let mut options = self.webrtc_transport_options.clone();
        if force_tcp {
            options.listen_infos.retain(|info| info.protocol == TransportProtocol::Tcp);
        }
        options.enable_sctp = sctp_capabilities.is_some();
        options.app_data = AppData::new(serde_json::json!({ "producing": producing, "consuming": consuming }));

        let webrtc_transport = self
            .router
            .create_webrtc_transport(options)
            .await
            .map_err(|error| PeerError::Internal(error.to_string()))?;
        peer.add_transport(webrtc_transport.clone());
        Ok(webrtc_transport)
    }

    /// The produce handler (`spec.md` §4.8 "Produce handler").
    pub async fn produce(
        &self,
        peer_id: &PeerId,
        producer_transport: &WebRtcTransport,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: AppData,
    ) -> Result<Producer, crate::error::ProduceError> {
        let sharing = kind == MediaKind::Video && app_data.flag("sharing");
        let mut options = ProducerOptions::new(kind, rtp_parameters);
        options.app_data = app_data;

        let producer = producer_transport.produce(options).await?;

        let Some(peer) = self.peer(peer_id) else {
            return Ok(producer);
        };
        peer.add_producer(producer.clone());

        if kind == MediaKind::Audio {
            if let Err(error) = self.audio_level_observer.add_producer(producer.id()).await {
                warn!("failed to register producer with audio level observer: {}", error);
            }
            if let Err(error) = self.active_speaker_observer.add_producer(producer.id()).await {
                warn!("failed to register producer with active speaker observer: {}", error);
            }
        }

        if kind == MediaKind::Video {
            let controller = Arc::new(VideoProducerQualityController::new(producer.id(), peer_id.clone()));
            peer.set_quality_controller(producer.id(), Arc::clone(&controller));

            if sharing {
                if let Some((old_peer_id, old_producer_id)) = self.sharing.set(peer_id.clone(), producer.id()) {
                    if let Some(old_peer) = self.peer(&old_peer_id) {
                        if let Some(old_producer) = old_peer.remove_producer(old_producer_id) {
                            self.close_producer(&old_peer_id, &old_producer).await;
                        }
                    }
                }
            }
        }

        {
            let peer_id = peer_id.clone();
            let executor = Arc::clone(&self.executor);
            let transport = Arc::clone(&self.transport);
            let handler_id = producer.on_score(move |score| {
                let transport = Arc::clone(&transport);
                let peer_id = peer_id.clone();
                let score = score.to_vec();
                executor
                    .spawn(async move {
                        transport
                            .notify(&peer_id, ServerNotification::ProducerScore { producer_id, score })
                            .await
                    })
                    .detach();
            });
            self.producer_handlers.lock().entry(producer.id()).or_default().push(handler_id);
        }

        for other in self.other_peers(peer_id) {
            if let Err(error) = self.create_consumer(&other, peer_id, &producer).await {
                warn!("failed to create consumer for new producer: {}", error);
            }
        }

        Ok(producer)
    }

    /// Consumer creation algorithm (`spec.md` §4.8, "critical correctness").
    pub async fn create_consumer(
        &self,
        consumer_peer: &Arc<PeerSession>,
        producer_peer_id: &PeerId,
        producer: &Producer,
    ) -> Result<(), crate::error::ConsumeError> {
        // Step 1.
        let Some(rtp_capabilities) = consumer_peer.rtp_capabilities() else {
            return Ok(());
        };

        // Step 2.
        if !self.router.can_consume(producer.id(), &rtp_capabilities) {
            return Ok(());
        }

        // Step 3.
        let Some(consuming_transport) = consumer_peer.consuming_transport() else {
            warn!("peer {} has no consuming transport yet, skipping consumer creation", consumer_peer.id());
            return Ok(());
        };

        // Step 4: always created paused.
        let mut options = ConsumerOptions::new(producer.id(), rtp_capabilities);
        options.paused = true;
        let consumer = consuming_transport.consume(options).await?;

        // Step 5.
        consumer_peer.add_consumer(consumer.clone());
        if let Some(controller) = self.quality_controller_for(producer.id()) {
            controller.register_consumer(consumer.id(), true);
        }

        // Step 6: wire consumer events to outbound notifications.
        self.wire_consumer_events(consumer_peer.id().clone(), &consumer);

        // Step 7.
        let response = self
            .transport
            .request(
                consumer_peer.id(),
                ServerRequest::NewConsumer {
                    peer_id: producer_peer_id.clone(),
                    producer_id: producer.id(),
                    consumer_id: consumer.id(),
                    kind: consumer.kind(),
                    rtp_parameters: consumer.rtp_parameters().clone(),
                    r#type: consumer.r#type(),
                    app_data: producer.app_data().clone(),
                    producer_paused: producer.paused(),
                },
            )
            .await;

        match response {
            Ok(_) => {
                // Resuming after the peer confirms local demux setup; a race with the consumer's
                // own close is a no-op, not an error (Open Question #2).
                match consumer.resume().await {
                    Ok(()) => {
                        self.transport
                            .notify(
                                consumer_peer.id(),
                                ServerNotification::ConsumerScore {
                                    consumer_id: consumer.id(),
                                    score: ConsumerScore { score: 10, producer_score: 10 },
                                },
                            )
                            .await;
                    }
                    Err(error) => warn!("failed to resume consumer after ack: {}", error),
                }
            }
            Err(error) => warn!("peer rejected newConsumer: {:?}", error),
        }

        Ok(())
    }

    /// Subscribes to every consumer event the room forwards to the owning peer (`spec.md` §4.8
    /// step 6). The returned [`HandlerId`]s are stashed in `self.consumer_handlers`, since
    /// dropping one deregisters its callback immediately.
    fn wire_consumer_events(&self, consumer_peer_id: PeerId, consumer: &Consumer) {
        let app_data = consumer.app_data().clone();
        let consumer_id = consumer.id();
        let mut handler_ids = Vec::with_capacity(5);

        {
            let peer_id = consumer_peer_id.clone();
            let transport = Arc::clone(&self.transport);
            let executor = Arc::clone(&self.executor);
            handler_ids.push(consumer.on_producer_close(move || {
                executor
                    .spawn(async move { transport.notify(&peer_id, ServerNotification::ConsumerClosed { consumer_id, app_data }).await })
                    .detach();
            }));
        }
        {
            let peer_id = consumer_peer_id.clone();
            let transport = Arc::clone(&self.transport);
            let executor = Arc::clone(&self.executor);
            handler_ids.push(consumer.on_producer_pause(move || {
                let transport = Arc::clone(&transport);
                let peer_id = peer_id.clone();
                executor.spawn(async move { transport.notify(&peer_id, ServerNotification::ConsumerPaused { consumer_id }).await }).detach();
            }));
        }
        {
            let peer_id = consumer_peer_id.clone();
            let transport = Arc::clone(&self.transport);
            let executor = Arc::clone(&self.executor);
            handler_ids.push(consumer.on_producer_resume(move || {
                let transport = Arc::clone(&transport);
                let peer_id = peer_id.clone();
                executor.spawn(async move { transport.notify(&peer_id, ServerNotification::ConsumerResumed { consumer_id }).await }).detach();
            }));
        }
        {
            let peer_id = consumer_peer_id.clone();
            let transport = Arc::clone(&self.transport);
            let executor = Arc::clone(&self.executor);
            handler_ids.push(consumer.on_score(move |score| {
                let transport = Arc::clone(&transport);
                let peer_id = peer_id.clone();
                executor.spawn(async move { transport.notify(&peer_id, ServerNotification::ConsumerScore { consumer_id, score }).await }).detach();
            }));
        }
        {
            let peer_id = consumer_peer_id;
            let transport = Arc::clone(&self.transport);
            let executor = Arc::clone(&self.executor);
            handler_ids.push(consumer.on_layers_change(move |layers| {
                let transport = Arc::clone(&transport);
                let peer_id = peer_id.clone();
                executor
                    .spawn(async move { transport.notify(&peer_id, ServerNotification::ConsumerLayersChanged { consumer_id, layers }).await })
                    .detach();
            }));
        }

        self.consumer_handlers.lock().insert(consumer_id, handler_ids);
    }

    /// Recomputes and reports a video producer's desired quality after a consumer state change
    /// (`spec.md` §4.8 "Consumer state change propagation"). Callers invoke this after pausing,
    /// resuming, or setting preferred layers on a consumer.
    pub async fn on_consumer_state_changed(
        &self,
        producer_owner_peer_id: &PeerId,
        producer_id: ProducerId,
        consumer_id: ConsumerId,
        paused: bool,
        preferred_layers: Option<ConsumerLayers>,
    ) {
        let Some(owner) = self.peer(producer_owner_peer_id) else { return };
        let Some(controller) = owner.quality_controller(producer_id) else { return };

        controller.update_consumer(consumer_id, paused, preferred_layers.map(|layers| layers.spatial_layer));
        let desired = controller.recompute();

        self.transport
            .notify(
                producer_owner_peer_id,
                ServerNotification::VideoProducerQualityChanged { producer_id, paused: desired.paused, desired_q: desired.desired_q },
            )
            .await;
    }

    pub async fn create_data_consumer(
        &self,
        consumer_peer: &Arc<PeerSession>,
        data_producer: &DataProducer,
    ) -> Result<(), crate::error::ConsumeDataError> {
        let Some(consuming_transport) = consumer_peer.consuming_transport() else {
            return Ok(());
        };

        let options = DataConsumerOptions::new_sctp(data_producer.id());
        let data_consumer = consuming_transport.consume_data(options).await?;
        consumer_peer.add_data_consumer(data_consumer.clone());

        let _ = self
            .transport
            .request(
                consumer_peer.id(),
                ServerRequest::NewDataConsumer {
                    peer_id: consumer_peer.id().clone(),
                    data_producer_id: data_producer.id(),
                    data_consumer_id: data_consumer.id(),
                    sctp_stream_parameters: data_consumer.sctp_stream_parameters(),
                    label: data_consumer.label().to_string(),
                    protocol: data_consumer.protocol().to_string(),
                    app_data: data_producer.app_data().clone(),
                },
            )
            .await;

        Ok(())
    }

    /// The produceData handler: mirrors `produce()`'s fan-out, creating a data consumer on every
    /// other joined peer's consuming transport (`spec.md` §4.8).
    pub async fn produce_data(
        &self,
        peer_id: &PeerId,
        producer_transport: &WebRtcTransport,
        options: DataProducerOptions,
    ) -> Result<DataProducer, crate::error::ProduceDataError> {
        let data_producer = producer_transport.produce_data(options).await?;

        let Some(peer) = self.peer(peer_id) else {
            return Ok(data_producer);
        };
        peer.add_data_producer(data_producer.clone());

        for other in self.other_peers(peer_id) {
            if let Err(error) = self.create_data_consumer(&other, &data_producer).await {
                warn!("failed to create data consumer for new data producer: {}", error);
            }
        }

        Ok(data_producer)
    }

    async fn close_producer(&self, owner_peer_id: &PeerId, producer: &Producer) {
        self.sharing.clear_if(producer.id());
        if let Some(owner) = self.peer(owner_peer_id) {
            owner.remove_quality_controller(producer.id());
        }
        self.producer_handlers.lock().remove(&producer.id());
        for peer in self.peers.lock().values().cloned().collect::<Vec<_>>() {
            for consumer in peer.consumers() {
                if consumer.producer_id() == producer.id() {
                    peer.remove_consumer(consumer.id());
                    self.consumer_handlers.lock().remove(&consumer.id());
                    self.transport
                        .notify(
                            peer.id(),
                            ServerNotification::ConsumerClosed { consumer_id: consumer.id(), app_data: consumer.app_data().clone() },
                        )
                        .await;
                }
            }
        }
    }

    /// Close cascade (`spec.md` §4.8 "Close cascade"): closes the peer's producers/consumers,
    /// notifies remaining peers, and marks the room closed once the last peer has left (closing
    /// the room's `Router` itself is the caller's responsibility, since `Room` only borrows it).
    pub async fn close_peer(&self, peer_id: &PeerId) {
        let Some(peer) = self.peers.lock().remove(peer_id) else { return };
        peer.mark_closed();

        for producer in peer.producers() {
            self.close_producer(peer_id, &producer).await;
        }
        for consumer in peer.consumers() {
            self.consumer_handlers.lock().remove(&consumer.id());
            if let Some(controller) = self.quality_controller_for(consumer.producer_id()) {
                controller.remove_consumer(consumer.id());
            }
        }

        for other in self.peers.lock().values().cloned().collect::<Vec<_>>() {
            self.transport.notify(other.id(), ServerNotification::PeerClosed { peer_id: peer_id.clone() }).await;
        }

        if self.peers.lock().is_empty() {
            self.closed.store(true, Ordering::SeqCst);
            debug!("last peer left room with router {}", self.router.id());
        }
    }

    fn producer_owner_peer_id(&self, producer_id: ProducerId) -> Option<PeerId> {
        self.peers
            .lock()
            .values()
            .find(|peer| peer.producers().iter().any(|producer| producer.id() == producer_id))
            .map(|peer| peer.id().clone())
    }

    /// Demultiplexes a peer's signaling request into the topology operation it names
    /// (`spec.md` §6, C7→C8). The returned `Value` is the request's ack payload; the caller
    /// (the outer binary's websocket loop) wraps it in the response envelope.
    pub async fn handle_client_request(&self, peer_id: &PeerId, request: ClientRequest) -> Result<Value, PeerError> {
        let peer = || self.peer(peer_id).ok_or_else(|| PeerError::BadMessage("unknown peer".to_string()));

        match request {
            ClientRequest::GetRouterRtpCapabilities => {
                Ok(serde_json::to_value(self.router_rtp_capabilities()).expect("RtpCapabilities always serializes"))
            }

            ClientRequest::Join { display_name, device, rtp_capabilities, sctp_capabilities } => {
                let other_peers = self.join(peer_id, display_name, device, rtp_capabilities, sctp_capabilities).await?;
                let peers: Vec<Value> = other_peers
                    .into_iter()
                    .map(|(id, display_name, device)| serde_json::json!({ "id": id, "displayName": display_name, "device": device }))
                    .collect();
                Ok(serde_json::json!({ "peers": peers }))
            }

            ClientRequest::CreateWebRtcTransport { force_tcp, producing, consuming, sctp_capabilities } => {
                let transport = self.create_webrtc_transport(peer_id, force_tcp, producing, consuming, sctp_capabilities).await?;
                Ok(serde_json::json!({
                    "id": transport.id(),
                    "iceParameters": transport.ice_parameters(),
                    "iceCandidates": transport.ice_candidates(),
                    "dtlsParameters": transport.dtls_parameters(),
                    "sctpParameters": transport.sctp_parameters(),
                }))
            }

            ClientRequest::ConnectWebRtcTransport { transport_id, dtls_parameters } => {
                let transport = peer()?
                    .get_transport(transport_id)
                    .ok_or_else(|| PeerError::NotFound(format!("transport {transport_id}")))?;
                transport.connect(dtls_parameters).await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(Value::Null)
            }

            ClientRequest::RestartIce { transport_id } => {
                let transport = peer()?
                    .get_transport(transport_id)
                    .ok_or_else(|| PeerError::NotFound(format!("transport {transport_id}")))?;
                let ice_parameters =
                    transport.restart_ice().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(serde_json::to_value(ice_parameters).expect("IceParameters always serializes"))
            }

            ClientRequest::Produce { transport_id, kind, rtp_parameters, app_data } => {
                let transport = peer()?
                    .get_transport(transport_id)
                    .ok_or_else(|| PeerError::NotFound(format!("transport {transport_id}")))?;
                let producer = self
                    .produce(peer_id, &transport, kind, rtp_parameters, app_data)
                    .await
                    .map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(serde_json::json!({ "id": producer.id() }))
            }

            ClientRequest::ProduceData { transport_id, sctp_stream_parameters, label, protocol, app_data } => {
                let transport = peer()?
                    .get_transport(transport_id)
                    .ok_or_else(|| PeerError::NotFound(format!("transport {transport_id}")))?;
                let mut options = DataProducerOptions::new_sctp(sctp_stream_parameters);
                options.label = label;
                options.protocol = protocol;
                options.app_data = app_data;
                let data_producer = self
                    .produce_data(peer_id, &transport, options)
                    .await
                    .map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(serde_json::json!({ "id": data_producer.id() }))
            }

            ClientRequest::CloseProducer { producer_id } => {
                let producer = peer()?
                    .remove_producer(producer_id)
                    .ok_or_else(|| PeerError::NotFound(format!("producer {producer_id}")))?;
                self.close_producer(peer_id, &producer).await;
                Ok(Value::Null)
            }

            ClientRequest::PauseProducer { producer_id } => {
                let producer = peer()?.get_producer(producer_id).ok_or_else(|| PeerError::NotFound(format!("producer {producer_id}")))?;
                producer.pause().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(Value::Null)
            }

            ClientRequest::ResumeProducer { producer_id } => {
                let producer = peer()?.get_producer(producer_id).ok_or_else(|| PeerError::NotFound(format!("producer {producer_id}")))?;
                producer.resume().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(Value::Null)
            }

            ClientRequest::PauseConsumer { consumer_id } => {
                let consumer = peer()?.get_consumer(consumer_id).ok_or_else(|| PeerError::NotFound(format!("consumer {consumer_id}")))?;
                consumer.pause().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                if let Some(owner_peer_id) = self.producer_owner_peer_id(consumer.producer_id()) {
                    self.on_consumer_state_changed(&owner_peer_id, consumer.producer_id(), consumer_id, true, None).await;
                }
                Ok(Value::Null)
            }

            ClientRequest::ResumeConsumer { consumer_id } => {
                let consumer = peer()?.get_consumer(consumer_id).ok_or_else(|| PeerError::NotFound(format!("consumer {consumer_id}")))?;
                consumer.resume().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                if let Some(owner_peer_id) = self.producer_owner_peer_id(consumer.producer_id()) {
                    self.on_consumer_state_changed(&owner_peer_id, consumer.producer_id(), consumer_id, false, None).await;
                }
                Ok(Value::Null)
            }

            ClientRequest::SetConsumerPreferredLayers { consumer_id, spatial_layer, temporal_layer } => {
                let consumer = peer()?.get_consumer(consumer_id).ok_or_else(|| PeerError::NotFound(format!("consumer {consumer_id}")))?;
                let layers = ConsumerLayers { spatial_layer, temporal_layer };
                consumer.set_preferred_layers(layers).await.map_err(|error| PeerError::Internal(error.to_string()))?;
                if let Some(owner_peer_id) = self.producer_owner_peer_id(consumer.producer_id()) {
                    self.on_consumer_state_changed(&owner_peer_id, consumer.producer_id(), consumer_id, consumer.paused(), Some(layers)).await;
                }
                Ok(Value::Null)
            }

            ClientRequest::SetConsumerPriority { consumer_id, priority } => {
                let consumer = peer()?.get_consumer(consumer_id).ok_or_else(|| PeerError::NotFound(format!("consumer {consumer_id}")))?;
                consumer.set_priority(priority).await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(Value::Null)
            }

            ClientRequest::RequestConsumerKeyFrame { consumer_id } => {
                let consumer = peer()?.get_consumer(consumer_id).ok_or_else(|| PeerError::NotFound(format!("consumer {consumer_id}")))?;
                consumer.request_key_frame().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(Value::Null)
            }

            ClientRequest::ChangeDisplayName { display_name } => {
                let peer = peer()?;
                peer.set_display_name(display_name.clone());
                for other in self.other_peers(peer_id) {
                    self.transport
                        .notify(other.id(), ServerNotification::PeerDisplayNameChanged { peer_id: peer_id.clone(), display_name: display_name.clone() })
                        .await;
                }
                Ok(Value::Null)
            }

            ClientRequest::GetTransportStats { transport_id } => {
                let transport = peer()?
                    .get_transport(transport_id)
                    .ok_or_else(|| PeerError::NotFound(format!("transport {transport_id}")))?;
                let stats = transport.get_stats().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(serde_json::to_value(stats).expect("Stats always serializes"))
            }

            ClientRequest::GetProducerStats { producer_id } => {
                let producer = peer()?.get_producer(producer_id).ok_or_else(|| PeerError::NotFound(format!("producer {producer_id}")))?;
                let stats = producer.get_stats().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(serde_json::to_value(stats).expect("Stats always serializes"))
            }

            ClientRequest::GetConsumerStats { consumer_id } => {
                let consumer = peer()?.get_consumer(consumer_id).ok_or_else(|| PeerError::NotFound(format!("consumer {consumer_id}")))?;
                let stats = consumer.get_stats().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(serde_json::to_value(stats).expect("Stats always serializes"))
            }

            ClientRequest::GetDataProducerStats { data_producer_id } => {
                let data_producer = peer()?
                    .get_data_producer(data_producer_id)
                    .ok_or_else(|| PeerError::NotFound(format!("data producer {data_producer_id}")))?;
                let stats = data_producer.get_stats().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(serde_json::to_value(stats).expect("Stats always serializes"))
            }

            ClientRequest::GetDataConsumerStats { data_consumer_id } => {
                let data_consumer = peer()?
                    .get_data_consumer(data_consumer_id)
                    .ok_or_else(|| PeerError::NotFound(format!("data consumer {data_consumer_id}")))?;
                let stats = data_consumer.get_stats().await.map_err(|error| PeerError::Internal(error.to_string()))?;
                Ok(serde_json::to_value(stats).expect("Stats always serializes"))
            }

            // Traffic shaping is environment-specific (requires shelling out to the host's `tc`
            // or equivalent); the room acknowledges the request but enforcement is left to the
            // outer binary/operator tooling.
            ClientRequest::ApplyNetworkThrottle { .. } | ClientRequest::ResetNetworkThrottle => Ok(Value::Null),
        }
    }

    pub fn stats_snapshot(&self) -> RoomStats {
        let peers = self.peers.lock();
        let mut stats = RoomStats { peer_count: peers.len(), ..RoomStats::default() };
        for peer in peers.values() {
            stats.producer_count += peer.producers().len();
            stats.consumer_count += peer.consumers().len();
            stats.data_producer_count += peer.data_producers().len();
            stats.data_consumer_count += peer.data_consumers().len();
        }
        stats
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room").field("router", &self.router.id()).field("peers", &self.peers.lock().len()).finish()
    }
}
