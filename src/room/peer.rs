//! Peer Session (C7): per-websocket state held by the room orchestrator. One [`PeerSession`] per
//! joined `peerId`; `spec.md` §4.7.

use crate::room::orchestrator::VideoProducerQualityController;
use crate::room::protocol::PeerId;
use crate::router::consumer::{Consumer, ConsumerId};
use crate::router::data_consumer::{DataConsumer, DataConsumerId};
use crate::router::data_producer::{DataProducer, DataProducerId};
use crate::router::producer::{Producer, ProducerId};
use crate::router::webrtc_transport::WebRtcTransport;
use crate::router::transport::{Transport, TransportId};
use crate::rtp_parameters::RtpCapabilities;
use crate::sctp_parameters::SctpCapabilities;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Protocol state machine described in `spec.md` §4.7: `Disconnected` never appears here (a
/// `PeerSession` is only constructed on websocket accept, i.e. already `Connected`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PeerState {
    Connected,
    Joined,
    Closed,
}

#[derive(Default)]
struct Fields {
    display_name: String,
    device: Value,
    rtp_capabilities: Option<RtpCapabilities>,
    sctp_capabilities: Option<SctpCapabilities>,
}

/// Maps the peer owns, keyed by entity id, guarded together since the room orchestrator and the
/// peer's own socket coroutine touch them concurrently (`spec.md` §5 shared resource policy).
#[derive(Default)]
struct Maps {
    transports: HashMap<TransportId, WebRtcTransport>,
    producers: HashMap<ProducerId, Producer>,
    consumers: HashMap<ConsumerId, Consumer>,
    data_producers: HashMap<DataProducerId, DataProducer>,
    data_consumers: HashMap<DataConsumerId, DataConsumer>,
    quality_controllers: HashMap<ProducerId, Arc<VideoProducerQualityController>>,
}

pub struct PeerSession {
    id: PeerId,
    state: Mutex<PeerState>,
    fields: Mutex<Fields>,
    maps: Mutex<Maps>,
}

impl PeerSession {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            state: Mutex::new(PeerState::Connected),
            fields: Mutex::new(Fields::default()),
            maps: Mutex::new(Maps::default()),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    pub fn joined(&self) -> bool {
        self.state() == PeerState::Joined
    }

    pub fn display_name(&self) -> String {
        self.fields.lock().display_name.clone()
    }

    pub fn device(&self) -> Value {
        self.fields.lock().device.clone()
    }

    pub fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.fields.lock().rtp_capabilities.clone()
    }

    pub fn sctp_capabilities(&self) -> Option<SctpCapabilities> {
        self.fields.lock().sctp_capabilities.clone()
    }

    /// Step 2 of the join handler (`spec.md` §4.8): stores the peer's declared identity and
    /// capabilities. Does not mark the peer joined; that's a separate step once the accept
    /// response has been sent.
    pub fn set_joining_fields(
        &self,
        display_name: String,
        device: Value,
        rtp_capabilities: RtpCapabilities,
        sctp_capabilities: Option<SctpCapabilities>,
    ) {
        let mut fields = self.fields.lock();
        fields.display_name = display_name;
        fields.device = device;
        fields.rtp_capabilities = Some(rtp_capabilities);
        fields.sctp_capabilities = sctp_capabilities;
    }

    /// `changeDisplayName` handler (`spec.md` §6): updates the stored identity after join.
    pub fn set_display_name(&self, display_name: String) {
        self.fields.lock().display_name = display_name;
    }

    pub fn mark_joined(&self) {
        *self.state.lock() = PeerState::Joined;
    }

    pub fn mark_closed(&self) {
        *self.state.lock() = PeerState::Closed;
    }

    pub fn add_transport(&self, transport: WebRtcTransport) {
        self.maps.lock().transports.insert(transport.id(), transport);
    }

    pub fn transports(&self) -> Vec<WebRtcTransport> {
        self.maps.lock().transports.values().cloned().collect()
    }

    pub fn get_transport(&self, transport_id: TransportId) -> Option<WebRtcTransport> {
        self.maps.lock().transports.get(&transport_id).cloned()
    }

    /// The transport marked `appData.consuming == true` (`spec.md` §4.8 step 3); a peer has at
    /// most one.
    pub fn consuming_transport(&self) -> Option<WebRtcTransport> {
        self.maps.lock().transports.values().find(|transport| transport.app_data().flag("consuming")).cloned()
    }

    /// The transport marked `appData.producing == true`.
    pub fn producing_transport(&self) -> Option<WebRtcTransport> {
        self.maps.lock().transports.values().find(|transport| transport.app_data().flag("producing")).cloned()
    }

    pub fn add_producer(&self, producer: Producer) {
        self.maps.lock().producers.insert(producer.id(), producer);
    }

    pub fn producers(&self) -> Vec<Producer> {
        self.maps.lock().producers.values().cloned().collect()
    }

    pub fn remove_producer(&self, producer_id: ProducerId) -> Option<Producer> {
        self.maps.lock().producers.remove(&producer_id)
    }

    pub fn add_consumer(&self, consumer: Consumer) {
        self.maps.lock().consumers.insert(consumer.id(), consumer);
    }

    pub fn consumers(&self) -> Vec<Consumer> {
        self.maps.lock().consumers.values().cloned().collect()
    }

    pub fn get_consumer(&self, consumer_id: ConsumerId) -> Option<Consumer> {
        self.maps.lock().consumers.get(&consumer_id).cloned()
    }

    pub fn remove_consumer(&self, consumer_id: ConsumerId) -> Option<Consumer> {
        self.maps.lock().consumers.remove(&consumer_id)
    }

    pub fn add_data_producer(&self, data_producer: DataProducer) {
        self.maps.lock().data_producers.insert(data_producer.id(), data_producer);
    }

    pub fn data_producers(&self) -> Vec<DataProducer> {
        self.maps.lock().data_producers.values().cloned().collect()
    }

    pub fn add_data_consumer(&self, data_consumer: DataConsumer) {
        self.maps.lock().data_consumers.insert(data_consumer.id(), data_consumer);
    }

    pub fn data_consumers(&self) -> Vec<DataConsumer> {
        self.maps.lock().data_consumers.values().cloned().collect()
    }

    pub fn get_data_consumer(&self, data_consumer_id: DataConsumerId) -> Option<DataConsumer> {
        self.maps.lock().data_consumers.get(&data_consumer_id).cloned()
    }

    pub fn get_producer(&self, producer_id: ProducerId) -> Option<Producer> {
        self.maps.lock().producers.get(&producer_id).cloned()
    }

    pub fn get_data_producer(&self, data_producer_id: DataProducerId) -> Option<DataProducer> {
        self.maps.lock().data_producers.get(&data_producer_id).cloned()
    }

    pub fn set_quality_controller(&self, producer_id: ProducerId, controller: Arc<VideoProducerQualityController>) {
        self.maps.lock().quality_controllers.insert(producer_id, controller);
    }

    pub fn quality_controller(&self, producer_id: ProducerId) -> Option<Arc<VideoProducerQualityController>> {
        self.maps.lock().quality_controllers.get(&producer_id).cloned()
    }

    pub fn remove_quality_controller(&self, producer_id: ProducerId) {
        self.maps.lock().quality_controllers.remove(&producer_id);
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession").field("id", &self.id).field("state", &self.state()).finish()
    }
}
