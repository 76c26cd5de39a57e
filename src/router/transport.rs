//! Shared transport surface (C4): every transport kind (WebRTC/Plain/Pipe/Direct) implements
//! [`Transport`] so producers, consumers, and data entities can hold one regardless of which
//! concrete transport created them (`spec.md` §4.4).

use crate::data_structures::{AppData, ConsumerInternal, Dump, ProducerInternal, Stats, TransportInternal};
use crate::error::{ChannelError, ConsumeError, ProduceError};
use crate::messages::{
    TransportCloseRequest, TransportConsumeData, TransportConsumeRequest, TransportDumpRequest,
    TransportGetStatsRequest, TransportProduceData, TransportProduceRequest,
};
use crate::ortc;
use crate::router::consumer::{Consumer, ConsumerId, ConsumerOptions, ConsumerType};
use crate::router::producer::{Producer, ProducerId, ProducerOptions};
use crate::router::{Router, RouterId};
use crate::uuid_based_wrapper_type;
use crate::worker::channel::Channel;
use async_executor::Executor;
use async_trait::async_trait;
use event_listener_primitives::HandlerId;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

uuid_based_wrapper_type!(
    /// Transport identifier, unique within its router.
    TransportId
);

/// Mirrors the worker's trace event taxonomy for transports (`spec.md` §4.4's `enable_trace_event`
/// operation).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportTraceEventType {
    Probation,
    Bwe,
}

/// Common operations every transport kind exposes, object-safe so producers/consumers/data
/// entities can hold `Box<dyn Transport>` without knowing which concrete kind they sit on.
pub(crate) trait Transport: Debug + Send + Sync {
    fn id(&self) -> TransportId;
    fn router_id(&self) -> RouterId;
    fn channel(&self) -> &Channel;
    fn app_data(&self) -> &AppData;
    fn closed(&self) -> bool;
    fn on_close(&self, callback: Box<dyn FnOnce() + Send>) -> HandlerId;
    fn clone_boxed(&self) -> Box<dyn Transport>;

    fn internal(&self) -> TransportInternal {
        TransportInternal {
            router_id: self.router_id(),
            transport_id: self.id(),
        }
    }
}

impl Clone for Box<dyn Transport> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// What a router's transport registry stores: each concrete transport kind's `WeakX` handle
/// implements this so the registry can hold them behind one object-safe type without knowing
/// which kind it's holding (`spec.md` §4.3's topology graph, weak-parent side of the ownership
/// pattern).
pub(crate) trait WeakTransport: Debug + Send + Sync {
    fn upgrade(&self) -> Option<Box<dyn Transport>>;
}

pub(crate) async fn close(channel: &Channel, internal: TransportInternal) -> Result<(), ChannelError> {
    channel
        .request(internal.transport_id.to_string(), TransportCloseRequest { internal })
        .await
}

/// Shared dump/getStats helpers: every transport kind's worker-side dump/stats shape differs, so
/// callers deserialize the returned [`Dump`]/[`Stats`] maps into their own typed view.
pub(crate) async fn dump(channel: &Channel, internal: TransportInternal) -> Result<Dump, ChannelError> {
    channel
        .request(internal.transport_id.to_string(), TransportDumpRequest { internal })
        .await
}

pub(crate) async fn get_stats(channel: &Channel, internal: TransportInternal) -> Result<Stats, ChannelError> {
    channel
        .request(internal.transport_id.to_string(), TransportGetStatsRequest { internal })
        .await
}

/// `produce()`/`consume()` share the same shape across every transport kind; a concrete transport
/// only needs to expose its router and executor to get both for free (`spec.md` §4.4, §4.6-4.7).
#[async_trait(?Send)]
pub(crate) trait TransportImpl: Transport + Clone + 'static {
    fn router(&self) -> &Router;
    fn executor(&self) -> &Arc<Executor<'static>>;

    async fn produce_impl(&self, options: ProducerOptions) -> Result<Producer, ProduceError> {
        let producer_id = options.id.unwrap_or_else(ProducerId::new);
        let rtp_mapping =
            ortc::get_producer_rtp_parameters_mapping(&options.rtp_parameters, self.router().rtp_capabilities())?;
        let consumable_rtp_parameters = ortc::get_consumable_rtp_parameters(
            &options.rtp_parameters,
            self.router().rtp_capabilities(),
            &rtp_mapping,
        );

        let internal = ProducerInternal {
            router_id: self.router_id(),
            transport_id: self.id(),
            producer_id,
        };

        self.channel()
            .request(
                internal.producer_id.to_string(),
                TransportProduceRequest {
                    internal,
                    data: TransportProduceData {
                        kind: options.kind,
                        rtp_parameters: options.rtp_parameters.clone(),
                        rtp_mapping: rtp_mapping.to_wire_value(),
                        key_frame_request_delay: options.key_frame_request_delay,
                        paused: options.paused,
                    },
                },
            )
            .await?;

        let producer = Producer::new(
            producer_id,
            options.kind,
            options.rtp_parameters,
            consumable_rtp_parameters,
            options.paused,
            Arc::clone(self.executor()),
            self.channel().clone(),
            options.app_data,
            Box::new(self.clone()),
        );

        self.router().register_producer(producer.downgrade());

        Ok(producer)
    }

    async fn consume_impl(&self, options: ConsumerOptions) -> Result<Consumer, ConsumeError> {
        let producer = self
            .router()
            .get_producer(options.producer_id)
            .ok_or(ConsumeError::ProducerNotFound(options.producer_id))?;

        if !ortc::can_consume(producer.consumable_rtp_parameters(), &options.rtp_capabilities) {
            return Err(ConsumeError::IncompatibleCapabilities);
        }

        let consumer_id = options.id.unwrap_or_else(ConsumerId::new);
        let consumer_type = if options.pipe { ConsumerType::Pipe } else { ConsumerType::Simple };
        let rtp_parameters = if options.pipe {
            ortc::get_pipe_consumer_rtp_parameters(producer.consumable_rtp_parameters(), false)
        } else {
            ortc::get_consumer_rtp_parameters(producer.consumable_rtp_parameters(), &options.rtp_capabilities)?
        };

        let internal = ConsumerInternal {
            router_id: self.router_id(),
            transport_id: self.id(),
            consumer_id,
        };

        self.channel()
            .request(
                internal.consumer_id.to_string(),
                TransportConsumeRequest {
                    internal,
                    data: TransportConsumeData {
                        producer_id: options.producer_id,
                        kind: producer.kind(),
                        rtp_parameters: rtp_parameters.clone(),
                        r#type: consumer_type,
                        consumable_rtp_encodings: producer.consumable_rtp_parameters().encodings.clone(),
                        paused: options.paused,
                        producer_paused: producer.paused(),
                    },
                },
            )
            .await?;

        let consumer = Consumer::new(
            consumer_id,
            options.producer_id,
            producer.kind(),
            rtp_parameters,
            consumer_type,
            options.paused,
            producer.paused(),
            Arc::clone(self.executor()),
            self.channel().clone(),
            options.app_data,
            Box::new(self.clone()),
        );

        self.router().register_consumer(consumer.downgrade());

        Ok(consumer)
    }
}
