//! A consumer represents an audio/video stream being forwarded from a mediasoup
//! [`Router`](crate::router::Router) to an endpoint (`spec.md` §4.7).
//!
//! Resuming a consumer racing against its own close is handled by checking `closed()` before
//! issuing the worker request rather than relying on the worker to reject it gracefully: the
//! worker has already forgotten the id by the time a resume-after-close request would arrive.

use crate::data_structures::{AppData, ConsumerInternal, Dump, Stats};
use crate::error::ChannelError;
use crate::messages::{
    ConsumerCloseRequest, ConsumerDumpRequest, ConsumerEnableTraceEventData,
    ConsumerEnableTraceEventRequest, ConsumerGetStatsRequest, ConsumerPauseRequest,
    ConsumerRequestKeyFrameRequest, ConsumerResumeRequest, ConsumerSetPreferredLayersData,
    ConsumerSetPreferredLayersRequest, ConsumerSetPriorityData, ConsumerSetPriorityRequest,
};
use crate::rtp_parameters::{MediaKind, RtpParameters};
use crate::router::producer::ProducerId;
use crate::router::transport::Transport;
use crate::uuid_based_wrapper_type;
use crate::worker::channel::{Channel, SubscriptionHandler};
use async_executor::Executor;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

uuid_based_wrapper_type!(
    /// Consumer identifier, unique within its router.
    ConsumerId
);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    Simple,
    Simulcast,
    Svc,
    Pipe,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerTraceEventType {
    Rtp,
    Keyframe,
    Nack,
    Pli,
    Fir,
}

/// A layer selection, used both for the consumer's `preferredLayers` and `currentLayers`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayers {
    pub spatial_layer: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_layer: Option<u8>,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConsumerOptions {
    pub id: Option<ConsumerId>,
    pub producer_id: ProducerId,
    pub rtp_capabilities: crate::rtp_parameters::RtpCapabilities,
    pub paused: bool,
    pub preferred_layers: Option<ConsumerLayers>,
    pub pipe: bool,
    pub app_data: AppData,
}

impl ConsumerOptions {
    pub fn new(producer_id: ProducerId, rtp_capabilities: crate::rtp_parameters::RtpCapabilities) -> Self {
        Self {
            id: None,
            producer_id,
            rtp_capabilities,
            paused: false,
            preferred_layers: None,
            pipe: false,
            app_data: AppData::default(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScore {
    pub score: u8,
    pub producer_score: u8,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    ProducerClose,
    ProducerPause,
    ProducerResume,
    Score { score: ConsumerScore },
    LayersChange { layers: Option<ConsumerLayers> },
    Pause,
    Resume,
    Rtp,
}

#[derive(Default)]
struct Handlers {
    producer_pause: Bag<Box<dyn Fn() + Send + Sync>>,
    producer_resume: Bag<Box<dyn Fn() + Send + Sync>>,
    score: Bag<Box<dyn Fn(ConsumerScore) + Send + Sync>>,
    layers_change: Bag<Box<dyn Fn(Option<ConsumerLayers>) + Send + Sync>>,
    pause: Bag<Box<dyn Fn() + Send + Sync>>,
    resume: Bag<Box<dyn Fn() + Send + Sync>>,
    producer_close: BagOnce<Box<dyn FnOnce() + Send>>,
    transport_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    r#type: ConsumerType,
    paused: AtomicBool,
    producer_paused: AtomicBool,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    app_data: AppData,
    transport: Box<dyn Transport>,
    closed: AtomicBool,
    _subscription_handler: SubscriptionHandler,
    _on_transport_close_handler: Mutex<HandlerId>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug!("drop()");
        self.close();
    }
}

impl Inner {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("close()");
            self.handlers.close.call_simple();

            let channel = self.channel.clone();
            let internal = ConsumerInternal {
                router_id: self.transport.router_id(),
                transport_id: self.transport.id(),
                consumer_id: self.id,
            };
            let transport = self.transport.clone();
            self.executor
                .spawn(async move {
                    if let Err(error) = channel
                        .request(internal.consumer_id.to_string(), ConsumerCloseRequest { internal })
                        .await
                    {
                        error!("consumer closing failed on drop: {}", error);
                    }
                    drop(transport);
                })
                .detach();
        }
    }
}

/// A consumer forwards an audio/video stream from a router to an endpoint.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<Inner>,
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ConsumerId,
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        r#type: ConsumerType,
        paused: bool,
        producer_paused: bool,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        app_data: AppData,
        transport: Box<dyn Transport>,
    ) -> Self {
        debug!("new()");

        let handlers = Arc::<Handlers>::default();
        let inner_weak = Arc::<Mutex<Option<Weak<Inner>>>>::default();

        let subscription_handler = {
            let handlers = Arc::clone(&handlers);
            let inner_weak = Arc::clone(&inner_weak);
            channel.subscribe_to_notifications(id.to_string(), move |notification| {
                let envelope =
                    serde_json::json!({ "event": notification.event, "data": notification.data });
                match serde_json::from_value::<Notification>(envelope) {
                    Ok(Notification::ProducerClose) => {
                        handlers.producer_close.call_simple();
                        if let Some(inner) = inner_weak.lock().as_ref().and_then(Weak::upgrade) {
                            inner.close();
                        }
                    }
                    Ok(Notification::ProducerPause) => {
                        if let Some(inner) = inner_weak.lock().as_ref().and_then(Weak::upgrade) {
                            inner.producer_paused.store(true, Ordering::SeqCst);
                        }
                        handlers.producer_pause.call(|callback| callback());
                    }
                    Ok(Notification::ProducerResume) => {
                        if let Some(inner) = inner_weak.lock().as_ref().and_then(Weak::upgrade) {
                            inner.producer_paused.store(false, Ordering::SeqCst);
                        }
                        handlers.producer_resume.call(|callback| callback());
                    }
                    Ok(Notification::Score { score }) => {
                        handlers.score.call(|callback| callback(score));
                    }
                    Ok(Notification::LayersChange { layers }) => {
                        handlers.layers_change.call(|callback| callback(layers));
                    }
                    Ok(Notification::Pause) => handlers.pause.call(|callback| callback()),
                    Ok(Notification::Resume) => handlers.resume.call(|callback| callback()),
                    Ok(Notification::Rtp) => {}
                    Err(error) => error!("failed to parse consumer notification: {}", error),
                }
            })
        };

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
            producer_id,
            kind,
            rtp_parameters,
            r#type,
            paused: AtomicBool::new(paused),
            producer_paused: AtomicBool::new(producer_paused),
            executor,
            channel,
            handlers,
            app_data,
            transport,
            closed: AtomicBool::new(false),
            _subscription_handler: subscription_handler,
            _on_transport_close_handler: Mutex::new(on_transport_close_handler),
        });

        inner_weak.lock().replace(Arc::downgrade(&inner));

        Self { inner }
    }

    pub fn id(&self) -> ConsumerId {
        self.inner.id
    }

    pub fn producer_id(&self) -> ProducerId {
        self.inner.producer_id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    pub fn r#type(&self) -> ConsumerType {
        self.inner.r#type
    }

    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn producer_paused(&self) -> bool {
        self.inner.producer_paused.load(Ordering::SeqCst)
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn internal(&self) -> ConsumerInternal {
        ConsumerInternal {
            router_id: self.inner.transport.router_id(),
            transport_id: self.inner.transport.id(),
            consumer_id: self.inner.id,
        }
    }

    pub async fn dump(&self) -> Result<Dump, ChannelError> {
        self.inner
            .channel
            .request(self.inner.id.to_string(), ConsumerDumpRequest { internal: self.internal() })
            .await
    }

    pub async fn get_stats(&self) -> Result<Stats, ChannelError> {
        self.inner
            .channel
            .request(self.inner.id.to_string(), ConsumerGetStatsRequest { internal: self.internal() })
            .await
    }

    pub async fn pause(&self) -> Result<(), ChannelError> {
        debug!("pause()");
        self.inner
            .channel
            .request(self.inner.id.to_string(), ConsumerPauseRequest { internal: self.internal() })
            .await?;
        let was_paused = self.inner.paused.swap(true, Ordering::SeqCst);
        if !was_paused {
            self.inner.handlers.pause.call(|callback| callback());
        }
        Ok(())
    }

    /// Resumes the consumer. A silent no-op if the consumer already transitioned to closed:
    /// resuming a closed consumer would race the worker, which has already forgotten its id, so
    /// callers don't need to special-case "already closed" as an error.
    pub async fn resume(&self) -> Result<(), ChannelError> {
        debug!("resume()");
        if self.closed() {
            return Ok(());
        }
        self.inner
            .channel
            .request(self.inner.id.to_string(), ConsumerResumeRequest { internal: self.internal() })
            .await?;
        let was_paused = self.inner.paused.swap(false, Ordering::SeqCst);
        if was_paused {
            self.inner.handlers.resume.call(|callback| callback());
        }
        Ok(())
    }

    pub async fn set_preferred_layers(&self, layers: ConsumerLayers) -> Result<(), ChannelError> {
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                ConsumerSetPreferredLayersRequest {
                    internal: self.internal(),
                    data: ConsumerSetPreferredLayersData { layers: Some(layers) },
                },
            )
            .await
    }

    pub async fn set_priority(&self, priority: u8) -> Result<(), ChannelError> {
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                ConsumerSetPriorityRequest {
                    internal: self.internal(),
                    data: ConsumerSetPriorityData { priority },
                },
            )
            .await
    }

    pub async fn request_key_frame(&self) -> Result<(), ChannelError> {
        self.inner
            .channel
            .request(self.inner.id.to_string(), ConsumerRequestKeyFrameRequest { internal: self.internal() })
            .await
    }

    pub async fn enable_trace_event(
        &self,
        types: Vec<ConsumerTraceEventType>,
    ) -> Result<(), ChannelError> {
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                ConsumerEnableTraceEventRequest {
                    internal: self.internal(),
                    data: ConsumerEnableTraceEventData { types },
                },
            )
            .await
    }

    pub fn on_producer_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.producer_pause.add(Box::new(callback))
    }

    pub fn on_producer_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.producer_resume.add(Box::new(callback))
    }

    pub fn on_score<F: Fn(ConsumerScore) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.score.add(Box::new(callback))
    }

    pub fn on_layers_change<F: Fn(Option<ConsumerLayers>) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.layers_change.add(Box::new(callback))
    }

    pub fn on_producer_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.producer_close.add(Box::new(callback))
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

    pub fn downgrade(&self) -> WeakConsumer {
        WeakConsumer {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

#[derive(Clone)]
pub struct WeakConsumer {
    inner: Weak<Inner>,
}

impl WeakConsumer {
    pub fn upgrade(&self) -> Option<Consumer> {
        Some(Consumer {
            inner: self.inner.upgrade()?,
        })
    }
}
