//! A producer represents an audio/video source being injected into a mediasoup
//! [`Router`](crate::router::Router) (`spec.md` §4.6).
//!
//! Every producer's consumable RTP parameters are derived once, at creation time, via
//! [`crate::ortc::get_consumable_rtp_parameters`] and cached: every consumer built on top reuses
//! them rather than re-deriving per consumer.

use crate::data_structures::{AppData, Dump, ProducerInternal, Stats};
use crate::error::ChannelError;
use crate::messages::{
    ProducerCloseRequest, ProducerDumpRequest, ProducerEnableTraceEventData,
    ProducerEnableTraceEventRequest, ProducerGetStatsRequest, ProducerPauseRequest,
    ProducerResumeRequest,
};
use crate::rtp_parameters::{MediaKind, RtpParameters};
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
    /// Producer identifier, unique within its router.
    ProducerId
);

/// Worker-side trace events a producer can be asked to emit (`spec.md` §4.6).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerTraceEventType {
    Rtp,
    Keyframe,
    Nack,
    Pli,
    Fir,
}

/// Options to create a new producer.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProducerOptions {
    pub id: Option<ProducerId>,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
    pub key_frame_request_delay: u32,
    pub app_data: AppData,
}

impl ProducerOptions {
    pub fn new(kind: MediaKind, rtp_parameters: RtpParameters) -> Self {
        Self {
            id: None,
            kind,
            rtp_parameters,
            paused: false,
            key_frame_request_delay: 0,
            app_data: AppData::default(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerScore {
    pub ssrc: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<u32>,
    pub score: u8,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    Score { score: Vec<ProducerScore> },
    VideoOrientationChange { camera: bool, flip: bool, rotation: u16 },
    Pause,
    Resume,
}

#[derive(Default)]
struct Handlers {
    score: Bag<Box<dyn Fn(&[ProducerScore]) + Send + Sync>>,
    pause: Bag<Box<dyn Fn() + Send + Sync>>,
    resume: Bag<Box<dyn Fn() + Send + Sync>>,
    transport_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    consumable_rtp_parameters: RtpParameters,
    paused: AtomicBool,
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
            let internal = ProducerInternal {
                router_id: self.transport.router_id(),
                transport_id: self.transport.id(),
                producer_id: self.id,
            };
            let transport = self.transport.clone();
            self.executor
                .spawn(async move {
                    if let Err(error) = channel.request(internal.producer_id.to_string(), ProducerCloseRequest { internal }).await {
                        error!("producer closing failed on drop: {}", error);
                    }
                    drop(transport);
                })
                .detach();
        }
    }
}

/// A producer represents an audio/video source injected into a router.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<Inner>,
}

impl Producer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        consumable_rtp_parameters: RtpParameters,
        paused: bool,
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
            channel.subscribe_to_notifications(id.to_string(), move |notification| {
                let envelope =
                    serde_json::json!({ "event": notification.event, "data": notification.data });
                match serde_json::from_value::<Notification>(envelope) {
                    Ok(Notification::Score { score }) => {
                        handlers.score.call(|callback| callback(&score));
                    }
                    Ok(Notification::VideoOrientationChange { .. }) => {}
                    Ok(Notification::Pause) => handlers.pause.call(|callback| callback()),
                    Ok(Notification::Resume) => handlers.resume.call(|callback| callback()),
                    Err(error) => error!("failed to parse producer notification: {}", error),
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
            kind,
            rtp_parameters,
            consumable_rtp_parameters,
            paused: AtomicBool::new(paused),
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

    pub fn id(&self) -> ProducerId {
        self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    pub(crate) fn consumable_rtp_parameters(&self) -> &RtpParameters {
        &self.inner.consumable_rtp_parameters
    }

    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn internal(&self) -> ProducerInternal {
        ProducerInternal {
            router_id: self.inner.transport.router_id(),
            transport_id: self.inner.transport.id(),
            producer_id: self.inner.id,
        }
    }

    pub async fn dump(&self) -> Result<Dump, ChannelError> {
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                ProducerDumpRequest {
                    internal: self.internal(),
                },
            )
            .await
    }

    pub async fn get_stats(&self) -> Result<Stats, ChannelError> {
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                ProducerGetStatsRequest {
                    internal: self.internal(),
                },
            )
            .await
    }

    pub async fn pause(&self) -> Result<(), ChannelError> {
        debug!("pause()");
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                ProducerPauseRequest {
                    internal: self.internal(),
                },
            )
            .await?;
        let was_paused = self.inner.paused.swap(true, Ordering::SeqCst);
        if !was_paused {
            self.inner.handlers.pause.call(|callback| callback());
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ChannelError> {
        debug!("resume()");
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                ProducerResumeRequest {
                    internal: self.internal(),
                },
            )
            .await?;
        let was_paused = self.inner.paused.swap(false, Ordering::SeqCst);
        if was_paused {
            self.inner.handlers.resume.call(|callback| callback());
        }
        Ok(())
    }

    pub async fn enable_trace_event(
        &self,
        types: Vec<ProducerTraceEventType>,
    ) -> Result<(), ChannelError> {
        self.inner
            .channel
            .request(
                self.inner.id.to_string(),
                ProducerEnableTraceEventRequest {
                    internal: self.internal(),
                    data: ProducerEnableTraceEventData { types },
                },
            )
            .await
    }

    pub fn on_score<F: Fn(&[ProducerScore]) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.score.add(Box::new(callback))
    }

    pub fn on_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.pause.add(Box::new(callback))
    }

    pub fn on_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.resume.add(Box::new(callback))
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

    pub fn downgrade(&self) -> WeakProducer {
        WeakProducer {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Doesn't own the underlying producer; used by a router's registry to avoid a reference cycle.
#[derive(Clone)]
pub struct WeakProducer {
    inner: Weak<Inner>,
}

impl WeakProducer {
    pub fn upgrade(&self) -> Option<Producer> {
        Some(Producer {
            inner: self.inner.upgrade()?,
        })
    }
}
