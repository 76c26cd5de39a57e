//! Application data producer: the sending side of an SCTP DataChannel (or, on a
//! [`crate::router::direct_transport::DirectTransport`], an in-process message source) (`spec.md`
//! §4.7). Grounded on the reference pack's `router/data_producer.rs`, collapsed from its
//! `Regular`/`Direct` enum split down to one struct carrying a [`DataProducerType`] tag, since this
//! crate routes `send()` through the same request/response channel for both kinds rather than a
//! separate payload channel.

use crate::data_structures::{AppData, DataProducerInternal, Dump, Stats, WebRtcMessage};
use crate::error::{ChannelError, ProduceDataError};
use crate::messages::{
    DataProducerCloseRequest, DataProducerDumpRequest, DataProducerGetStatsRequest,
    DataProducerSendData, DataProducerSendRequest, TransportProduceDataData,
    TransportProduceDataRequest,
};
use crate::router::transport::Transport;
use crate::sctp_parameters::SctpStreamParameters;
use crate::uuid_based_wrapper_type;
use crate::worker::channel::Channel;
use async_executor::Executor;
use event_listener_primitives::{BagOnce, HandlerId};
use log::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

uuid_based_wrapper_type!(
    /// DataProducer identifier, unique within its transport.
    DataProducerId
);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataProducerType {
    Sctp,
    Direct,
}

/// SCTP-capable transports require `sctp_stream_parameters`; a producer created on a
/// [`crate::router::direct_transport::DirectTransport`] must leave it unset.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DataProducerOptions {
    pub(crate) id: Option<DataProducerId>,
    pub sctp_stream_parameters: Option<SctpStreamParameters>,
    pub label: String,
    pub protocol: String,
    pub app_data: AppData,
}

impl DataProducerOptions {
    pub fn new_sctp(sctp_stream_parameters: SctpStreamParameters) -> Self {
        Self {
            id: None,
            sctp_stream_parameters: Some(sctp_stream_parameters),
            label: String::new(),
            protocol: String::new(),
            app_data: AppData::default(),
        }
    }

    pub fn new_direct() -> Self {
        Self {
            id: None,
            sctp_stream_parameters: None,
            label: String::new(),
            protocol: String::new(),
            app_data: AppData::default(),
        }
    }
}

#[derive(Default)]
struct Handlers {
    transport_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: DataProducerId,
    r#type: DataProducerType,
    sctp_stream_parameters: Option<SctpStreamParameters>,
    label: String,
    protocol: String,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    app_data: AppData,
    transport: Box<dyn Transport>,
    closed: AtomicBool,
    _on_transport_close_handler: Mutex<HandlerId>,
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
            let internal = DataProducerInternal {
                router_id: self.transport.router_id(),
                transport_id: self.transport.id(),
                data_producer_id: self.id,
            };
            self.executor
                .spawn(async move {
                    if let Err(error) = channel
                        .request(internal.data_producer_id.to_string(), DataProducerCloseRequest { internal })
                        .await
                    {
                        error!("data producer closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// The sending side of an application data channel.
#[derive(Clone)]
pub struct DataProducer {
    inner: Arc<Inner>,
}

impl DataProducer {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: DataProducerId,
        r#type: DataProducerType,
        sctp_stream_parameters: Option<SctpStreamParameters>,
        label: String,
        protocol: String,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        app_data: AppData,
        transport: Box<dyn Transport>,
    ) -> Self {
        debug!("new()");

        let handlers = Arc::<Handlers>::default();
        let inner_weak = Arc::<Mutex<Option<Weak<Inner>>>>::default();

        let on_transport_close_handler = transport.on_close({
            let inner_weak = Arc::clone(&inner_weak);
            Box::new(move || {
                if let Some(inner) = inner_weak.lock().as_ref().and_then(Weak::upgrade) {
                    inner.handlers.transport_close.call_simple();
                    inner.close();
                }
            })
        });

        let inner = Arc::new(Inner {
            id,
            r#type,
            sctp_stream_parameters,
            label,
            protocol,
            executor,
            channel,
            handlers,
            app_data,
            transport,
            closed: AtomicBool::new(false),
            _on_transport_close_handler: Mutex::new(on_transport_close_handler),
        });

        inner_weak.lock().replace(Arc::downgrade(&inner));

        Self { inner }
    }

    pub fn id(&self) -> DataProducerId {
        self.inner.id
    }

    pub fn r#type(&self) -> DataProducerType {
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
            .request(self.inner.id.to_string(), DataProducerDumpRequest { internal: self.internal() })
            .await
    }

    pub async fn get_stats(&self) -> Result<Stats, ChannelError> {
        self.inner
            .channel
            .request(self.inner.id.to_string(), DataProducerGetStatsRequest { internal: self.internal() })
            .await
    }

    pub async fn send(&self, message: WebRtcMessage) -> Result<(), ChannelError> {
        let (ppid, payload) = message.into_ppid_and_payload();
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                DataProducerSendRequest {
                    internal: self.internal(),
                    data: DataProducerSendData { ppid },
                    payload,
                },
            )
            .await
    }

    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.transport_close.add(Box::new(callback))
    }

    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(Box::new(callback));
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }

    fn internal(&self) -> DataProducerInternal {
        DataProducerInternal {
            router_id: self.inner.transport.router_id(),
            transport_id: self.inner.transport.id(),
            data_producer_id: self.inner.id,
        }
    }

    pub fn downgrade(&self) -> WeakDataProducer {
        WeakDataProducer { id: self.inner.id, inner: Arc::downgrade(&self.inner) }
    }
}

impl std::fmt::Debug for DataProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProducer").field("id", &self.inner.id).finish()
    }
}

/// Doesn't own the underlying data producer; used by a router's registry to avoid a reference
/// cycle.
#[derive(Clone)]
pub struct WeakDataProducer {
    id: DataProducerId,
    inner: Weak<Inner>,
}

impl WeakDataProducer {
    pub fn id(&self) -> DataProducerId {
        self.id
    }

    pub fn upgrade(&self) -> Option<DataProducer> {
        Some(DataProducer { inner: self.inner.upgrade()? })
    }
}

/// Creates a data producer on an SCTP-capable transport (WebRTC, Plain, or Pipe).
pub(crate) async fn produce_sctp(
    executor: Arc<Executor<'static>>,
    channel: Channel,
    transport: Box<dyn Transport>,
    options: DataProducerOptions,
) -> Result<DataProducer, ProduceDataError> {
    let sctp_stream_parameters = options
        .sctp_stream_parameters
        .clone()
        .ok_or(ProduceDataError::SctpStreamParametersRequired)?;

    let data_producer_id = options.id.unwrap_or_else(DataProducerId::new);
    let internal = DataProducerInternal {
        router_id: transport.router_id(),
        transport_id: transport.id(),
        data_producer_id,
    };

    channel
        .request(
            data_producer_id.to_string(),
            TransportProduceDataRequest {
                internal,
                data: TransportProduceDataData {
                    r#type: DataProducerType::Sctp,
                    sctp_stream_parameters: Some(sctp_stream_parameters.clone()),
                    label: options.label.clone(),
                    protocol: options.protocol.clone(),
                },
            },
        )
        .await?;

    Ok(DataProducer::new(
        data_producer_id,
        DataProducerType::Sctp,
        Some(sctp_stream_parameters),
        options.label,
        options.protocol,
        executor,
        channel,
        options.app_data,
        transport,
    ))
}

/// Creates a data producer directly in-process on a [`crate::router::direct_transport::DirectTransport`].
pub(crate) async fn produce_direct(
    executor: Arc<Executor<'static>>,
    channel: Channel,
    transport: Box<dyn Transport>,
    options: DataProducerOptions,
) -> Result<DataProducer, ProduceDataError> {
    if options.sctp_stream_parameters.is_some() {
        return Err(ProduceDataError::SctpStreamParametersNotAllowed);
    }

    let data_producer_id = options.id.unwrap_or_else(DataProducerId::new);
    let internal = DataProducerInternal {
        router_id: transport.router_id(),
        transport_id: transport.id(),
        data_producer_id,
    };

    channel
        .request(
            data_producer_id.to_string(),
            TransportProduceDataRequest {
                internal,
                data: TransportProduceDataData {
                    r#type: DataProducerType::Direct,
                    sctp_stream_parameters: None,
                    label: options.label.clone(),
                    protocol: options.protocol.clone(),
                },
            },
        )
        .await?;

    Ok(DataProducer::new(
        data_producer_id,
        DataProducerType::Direct,
        None,
        options.label,
        options.protocol,
        executor,
        channel,
        options.app_data,
        transport,
    ))
}
