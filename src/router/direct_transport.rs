//! Direct transport: no ICE, no DTLS, no real network socket at all. Used to inject/consume
//! application data messages (and, on the worker side, raw RTP) entirely in-process — a recording
//! or transcoding service hosted next to mediasoup itself (`spec.md` §4.4). Only data
//! producers/consumers are meaningful on this transport kind; it has no media `produce()`/`consume()`.

use crate::data_structures::{AppData, TransportInternal};
use crate::error::{ChannelError, ConsumeDataError, ProduceDataError};
use crate::messages::RouterCreateDirectTransportRequest;
use crate::router::data_consumer::{DataConsumer, DataConsumerOptions};
use crate::router::data_producer::{DataProducer, DataProducerOptions};
use crate::router::transport::{Transport, TransportId, WeakTransport};
use crate::router::Router;
use crate::worker::channel::{Channel, SubscriptionHandler};
use async_executor::Executor;
use event_listener_primitives::BagOnce;
use event_listener_primitives::HandlerId;
use log::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DirectTransportOptions {
    pub max_message_size: u32,
    pub app_data: AppData,
}

impl Default for DirectTransportOptions {
    fn default() -> Self {
        Self {
            max_message_size: 262_144,
            app_data: AppData::default(),
        }
    }
}

impl DirectTransportOptions {
    pub(crate) fn to_data(&self) -> DirectTransportData {
        DirectTransportData { direct: true, max_message_size: self.max_message_size }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DirectTransportData {
    direct: bool,
    max_message_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    Rtcp,
}

#[derive(Default)]
struct Handlers {
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: TransportId,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
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
                        error!("direct transport closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// A transport with no underlying network socket, for in-process data injection/consumption.
#[derive(Clone)]
pub struct DirectTransport {
    inner: Arc<Inner>,
}

impl DirectTransport {
    pub(crate) async fn new(
        router: Router,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        options: DirectTransportOptions,
    ) -> Result<Self, ChannelError> {
        let id = TransportId::new();
        let internal = TransportInternal { router_id: router.id(), transport_id: id };

        channel
            .request(
                id.to_string(),
                RouterCreateDirectTransportRequest { internal, data: options.to_data() },
            )
            .await?;

        let handlers = Arc::<Handlers>::default();

        let subscription_handler = {
            channel.subscribe_to_notifications(id.to_string(), move |notification| {
                let envelope =
                    serde_json::json!({ "event": notification.event, "data": notification.data });
                if let Err(error) = serde_json::from_value::<Notification>(envelope) {
                    error!("failed to parse direct transport notification: {}", error);
                }
            })
        };

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                executor,
                channel,
                handlers,
                app_data: options.app_data,
                router,
                closed: AtomicBool::new(false),
                _subscription_handler: subscription_handler,
            }),
        })
    }

    pub async fn produce_data(&self, options: DataProducerOptions) -> Result<DataProducer, ProduceDataError> {
        crate::router::data_producer::produce_direct(
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            Box::new(self.clone()),
            options,
        )
        .await
    }

    pub async fn consume_data(&self, options: DataConsumerOptions) -> Result<DataConsumer, ConsumeDataError> {
        crate::router::data_consumer::consume_direct(
            &self.inner.router,
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            Box::new(self.clone()),
            options,
        )
        .await
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

    pub fn downgrade(&self) -> WeakDirectTransport {
        WeakDirectTransport { inner: Arc::downgrade(&self.inner) }
    }
}

impl std::fmt::Debug for DirectTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectTransport").field("id", &self.inner.id).finish()
    }
}

impl Transport for DirectTransport {
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

#[derive(Clone)]
pub struct WeakDirectTransport {
    inner: Weak<Inner>,
}

impl WeakDirectTransport {
    pub fn upgrade(&self) -> Option<DirectTransport> {
        Some(DirectTransport { inner: self.inner.upgrade()? })
    }
}

impl std::fmt::Debug for WeakDirectTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakDirectTransport").finish()
    }
}

impl WeakTransport for WeakDirectTransport {
    fn upgrade(&self) -> Option<Box<dyn Transport>> {
        Some(Box::new(self.upgrade()?))
    }
}
