//! Application data consumer: the receiving side of an SCTP DataChannel (or, on a
//! [`crate::router::direct_transport::DirectTransport`], an in-process message sink) (`spec.md`
//! §4.7). Grounded on the reference pack's `router/data_consumer.rs`.

use crate::data_structures::{AppData, DataConsumerInternal, Dump, Stats, WebRtcMessage};
use crate::error::{ChannelError, ConsumeDataError};
use crate::messages::{
    DataConsumerCloseRequest, DataConsumerDumpRequest, DataConsumerGetBufferedAmountRequest,
    DataConsumerGetStatsRequest, DataConsumerSendData, DataConsumerSendRequest,
    DataConsumerSetBufferedAmountLowThresholdData, DataConsumerSetBufferedAmountLowThresholdRequest,
    TransportConsumeDataData, TransportConsumeDataRequest,
};
use crate::router::data_producer::{DataProducerId, DataProducerType};
use crate::router::transport::Transport;
use crate::router::Router;
use crate::sctp_parameters::SctpStreamParameters;
use crate::uuid_based_wrapper_type;
use crate::worker::channel::{Channel, SubscriptionHandler};
use async_executor::Executor;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::*;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

uuid_based_wrapper_type!(
    /// DataConsumer identifier, unique within its transport.
    DataConsumerId
);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataConsumerType {
    Sctp,
    Direct,
}

/// Consumes a [`crate::router::data_producer::DataProducer`]. SCTP-specific fields apply only
/// when consuming over an SCTP-capable transport; on a direct transport they're ignored.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DataConsumerOptions {
    pub data_producer_id: DataProducerId,
    pub ordered: Option<bool>,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub app_data: AppData,
}

impl DataConsumerOptions {
    pub fn new_sctp(data_producer_id: DataProducerId) -> Self {
        Self {
            data_producer_id,
            ordered: None,
            max_packet_life_time: None,
            max_retransmits: None,
            app_data: AppData::default(),
        }
    }

    pub fn new_direct(data_producer_id: DataProducerId) -> Self {
        Self {
            data_producer_id,
            ordered: Some(true),
            max_packet_life_time: None,
            max_retransmits: None,
            app_data: AppData::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    Dataproducerclose,
    Sctpsendbufferfull,
    Bufferedamountlow,
}

#[derive(Default)]
struct Handlers {
    data_producer_close: BagOnce<Box<dyn FnOnce() + Send>>,
    sctp_send_buffer_full: Bag<Box<dyn Fn() + Send + Sync>>,
    buffered_amount_low: Bag<Box<dyn Fn() + Send + Sync>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: DataConsumerId,
    r#type: DataConsumerType,
    sctp_stream_parameters: Option<SctpStreamParameters>,
    label: String,
    protocol: String,
    data_producer_id: DataProducerId,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    app_data: AppData,
    transport: Box<dyn Transport>,
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
            let internal = DataConsumerInternal {
                router_id: self.transport.router_id(),
                transport_id: self.transport.id(),
                data_consumer_id: self.id,
            };
            self.executor
                .spawn(async move {
                    if let Err(error) = channel
                        .request(internal.data_consumer_id.to_string(), DataConsumerCloseRequest { internal })
                        .await
                    {
                        error!("data consumer closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// The receiving side of an application data channel.
#[derive(Clone)]
pub struct DataConsumer {
    inner: Arc<Inner>,
}

impl DataConsumer {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: DataConsumerId,
        r#type: DataConsumerType,
        sctp_stream_parameters: Option<SctpStreamParameters>,
        label: String,
        protocol: String,
        data_producer_id: DataProducerId,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        app_data: AppData,
        transport: Box<dyn Transport>,
    ) -> Self {
        debug!("new()");

        let handlers = Arc::<Handlers>::default();

        let subscription_handler = {
            let handlers = Arc::clone(&handlers);
            channel.subscribe_to_notifications(id.to_string(), move |notification| {
                let envelope =
                    serde_json::json!({ "event": notification.event, "data": notification.data });
                match serde_json::from_value::<Notification>(envelope) {
                    Ok(Notification::Dataproducerclose) => handlers.data_producer_close.call_simple(),
                    Ok(Notification::Sctpsendbufferfull) => {
                        handlers.sctp_send_buffer_full.call(|callback| callback())
                    }
                    Ok(Notification::Bufferedamountlow) => {
                        handlers.buffered_amount_low.call(|callback| callback())
                    }
                    Err(error) => error!("failed to parse data consumer notification: {}", error),
                }
            })
        };

        Self {
            inner: Arc::new(Inner {
                id,
                r#type,
                sctp_stream_parameters,
                label,
                protocol,
                data_producer_id,
                executor,
                channel,
                handlers,
                app_data,
                transport,
                closed: AtomicBool::new(false),
                _subscription_handler: subscription_handler,
            }),
        }
    }

    pub fn id(&self) -> DataConsumerId {
        self.inner.id
    }

    pub fn data_producer_id(&self) -> DataProducerId {
        self.inner.data_producer_id
    }

    pub fn r#type(&self) -> DataConsumerType {
        self.inner.r#type
    }

    pub fn sctp_stream_parameters(&self) -> Option<SctpStreamParameters> {
        self.inner.sctp_stream_parameters.clone()
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub async fn dump(&self) -> Result<Dump, ChannelError> {
        self.inner
            .channel
            .request(self.inner.id.to_string(), DataConsumerDumpRequest { internal: self.internal() })
            .await
    }

    pub async fn get_stats(&self) -> Result<Stats, ChannelError> {
        self.inner
            .channel
            .request(self.inner.id.to_string(), DataConsumerGetStatsRequest { internal: self.internal() })
            .await
    }

    pub async fn get_buffered_amount(&self) -> Result<u32, ChannelError> {
        let response = self
            .inner
            .channel
            .request(
                self.inner.id.to_string(),
                DataConsumerGetBufferedAmountRequest { internal: self.internal() },
            )
            .await?;
        Ok(response.buffered_amount)
    }

    pub async fn set_buffered_amount_low_threshold(&self, threshold: u32) -> Result<(), ChannelError> {
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                DataConsumerSetBufferedAmountLowThresholdRequest {
                    internal: self.internal(),
                    data: DataConsumerSetBufferedAmountLowThresholdData { threshold },
                },
            )
            .await
    }

    /// Only meaningful for a data consumer created on a direct transport: pushes a message to
    /// the worker for in-process delivery rather than over a real SCTP association.
    pub async fn send(&self, message: WebRtcMessage) -> Result<(), ChannelError> {
        let (ppid, payload) = message.into_ppid_and_payload();
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                DataConsumerSendRequest {
                    internal: self.internal(),
                    data: DataConsumerSendData { ppid },
                    payload,
                },
            )
            .await
    }

    pub fn on_data_producer_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.data_producer_close.add(Box::new(callback))
    }

    pub fn on_sctp_send_buffer_full<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.sctp_send_buffer_full.add(Box::new(callback))
    }

    pub fn on_buffered_amount_low<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.buffered_amount_low.add(Box::new(callback))
    }

    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(Box::new(callback));
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }

    fn internal(&self) -> DataConsumerInternal {
        DataConsumerInternal {
            router_id: self.inner.transport.router_id(),
            transport_id: self.inner.transport.id(),
            data_consumer_id: self.inner.id,
        }
    }

    pub fn downgrade(&self) -> WeakDataConsumer {
        WeakDataConsumer { id: self.inner.id, inner: Arc::downgrade(&self.inner) }
    }
}

impl std::fmt::Debug for DataConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataConsumer").field("id", &self.inner.id).finish()
    }
}

/// Doesn't own the underlying data consumer; used by a router's registry to avoid a reference
/// cycle.
#[derive(Clone)]
pub struct WeakDataConsumer {
    id: DataConsumerId,
    inner: Weak<Inner>,
}

impl WeakDataConsumer {
    pub fn id(&self) -> DataConsumerId {
        self.id
    }

    pub fn upgrade(&self) -> Option<DataConsumer> {
        Some(DataConsumer { inner: self.inner.upgrade()? })
    }
}

/// Creates a data consumer on an SCTP-capable transport (WebRTC, Plain, or Pipe), looking up the
/// producer's own SCTP stream parameters via the router registry to mirror them onto the
/// consumer side (`spec.md` §4.7's "inherits from the producer" invariant).
pub(crate) async fn consume_sctp(
    router: &Router,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    transport: Box<dyn Transport>,
    options: DataConsumerOptions,
) -> Result<DataConsumer, ConsumeDataError> {
    let data_producer = router
        .get_data_producer(options.data_producer_id)
        .ok_or(ConsumeDataError::DataProducerNotFound(options.data_producer_id))?;

    let sctp_stream_parameters = data_producer.sctp_stream_parameters();
    let data_consumer_id = DataConsumerId::new();
    let internal = DataConsumerInternal {
        router_id: transport.router_id(),
        transport_id: transport.id(),
        data_consumer_id,
    };

    channel
        .request(
            data_consumer_id.to_string(),
            TransportConsumeDataRequest {
                internal,
                data: TransportConsumeDataData {
                    data_producer_id: options.data_producer_id,
                    r#type: DataConsumerType::Sctp,
                    sctp_stream_parameters: sctp_stream_parameters.clone(),
                    label: data_producer.label().to_string(),
                    protocol: data_producer.protocol().to_string(),
                },
            },
        )
        .await?;

    Ok(DataConsumer::new(
        data_consumer_id,
        DataConsumerType::Sctp,
        sctp_stream_parameters,
        data_producer.label().to_string(),
        data_producer.protocol().to_string(),
        options.data_producer_id,
        executor,
        channel,
        options.app_data,
        transport,
    ))
}

/// Creates a data consumer directly in-process on a [`crate::router::direct_transport::DirectTransport`].
pub(crate) async fn consume_direct(
    router: &Router,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    transport: Box<dyn Transport>,
    options: DataConsumerOptions,
) -> Result<DataConsumer, ConsumeDataError> {
    let data_producer = router
        .get_data_producer(options.data_producer_id)
        .ok_or(ConsumeDataError::DataProducerNotFound(options.data_producer_id))?;

    debug_assert_eq!(data_producer.r#type(), DataProducerType::Direct);

    let data_consumer_id = DataConsumerId::new();
    let internal = DataConsumerInternal {
        router_id: transport.router_id(),
        transport_id: transport.id(),
        data_consumer_id,
    };

    channel
        .request(
            data_consumer_id.to_string(),
            TransportConsumeDataRequest {
                internal,
                data: TransportConsumeDataData {
                    data_producer_id: options.data_producer_id,
                    r#type: DataConsumerType::Direct,
                    sctp_stream_parameters: None,
                    label: data_producer.label().to_string(),
                    protocol: data_producer.protocol().to_string(),
                },
            },
        )
        .await?;

    Ok(DataConsumer::new(
        data_consumer_id,
        DataConsumerType::Direct,
        None,
        data_producer.label().to_string(),
        data_producer.protocol().to_string(),
        options.data_producer_id,
        executor,
        channel,
        options.app_data,
        transport,
    ))
}
