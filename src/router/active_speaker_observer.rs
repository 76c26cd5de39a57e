//! Active speaker observer: periodically reports the dominant speaker among a router's
//! producers (`spec.md` §4.8). Literal default `interval = 300` ms.

use crate::data_structures::{AppData, RtpObserverInternal};
use crate::error::ChannelError;
use crate::router::producer::ProducerId;
use crate::router::rtp_observer::{self, RtpObserver, RtpObserverId};
use crate::router::RouterId;
use crate::worker::channel::{Channel, SubscriptionHandler};
use async_executor::Executor;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ActiveSpeakerObserverOptionsData {
    pub(crate) interval: u16,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ActiveSpeakerObserverOptions {
    pub interval: u16,
    pub app_data: AppData,
}

impl Default for ActiveSpeakerObserverOptions {
    fn default() -> Self {
        Self {
            interval: 300,
            app_data: AppData::default(),
        }
    }
}

impl ActiveSpeakerObserverOptions {
    pub(crate) fn to_data(&self) -> ActiveSpeakerObserverOptionsData {
        ActiveSpeakerObserverOptionsData {
            interval: self.interval,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    Dominantspeaker { producer_id: ProducerId },
}

#[derive(Default)]
struct Handlers {
    dominant_speaker: Bag<Box<dyn Fn(ProducerId) + Send + Sync>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: RtpObserverId,
    router_id: RouterId,
    paused: AtomicBool,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    app_data: AppData,
    closed: AtomicBool,
    _subscription_handler: SubscriptionHandler,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close_inner();
    }
}

impl Inner {
    fn close_inner(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("close()");
            self.handlers.close.call_simple();

            let channel = self.channel.clone();
            let internal = RtpObserverInternal {
                router_id: self.router_id,
                rtp_observer_id: self.id,
            };
            self.executor
                .spawn(async move {
                    if let Err(error) = rtp_observer::close(&channel, internal).await {
                        error!("active speaker observer closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// Watches a router's producers and reports which one is currently the dominant speaker.
#[derive(Clone)]
pub struct ActiveSpeakerObserver {
    inner: Arc<Inner>,
}

impl ActiveSpeakerObserver {
    pub(crate) fn new(
        id: RtpObserverId,
        router_id: RouterId,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        app_data: AppData,
    ) -> Self {
        let handlers = Arc::<Handlers>::default();

        let subscription_handler = {
            let handlers = Arc::clone(&handlers);
            channel.subscribe_to_notifications(id.to_string(), move |notification| {
                let envelope =
                    serde_json::json!({ "event": notification.event, "data": notification.data });
                match serde_json::from_value::<Notification>(envelope) {
                    Ok(Notification::Dominantspeaker { producer_id }) => {
                        handlers
                            .dominant_speaker
                            .call(|callback| callback(producer_id));
                    }
                    Err(error) => {
                        error!("failed to parse active speaker observer notification: {}", error)
                    }
                }
            })
        };

        Self {
            inner: Arc::new(Inner {
                id,
                router_id,
                paused: AtomicBool::new(false),
                executor,
                channel,
                handlers,
                app_data,
                closed: AtomicBool::new(false),
                _subscription_handler: subscription_handler,
            }),
        }
    }

    pub fn id(&self) -> RtpObserverId {
        self.inner.id
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

    pub async fn pause(&self) -> Result<(), ChannelError> {
        rtp_observer::pause(&self.inner.channel, self.internal()).await?;
        self.inner.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ChannelError> {
        rtp_observer::resume(&self.inner.channel, self.internal()).await?;
        self.inner.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn add_producer(&self, producer_id: ProducerId) -> Result<(), ChannelError> {
        rtp_observer::add_producer(&self.inner.channel, self.internal(), producer_id).await
    }

    pub async fn remove_producer(&self, producer_id: ProducerId) -> Result<(), ChannelError> {
        rtp_observer::remove_producer(&self.inner.channel, self.internal(), producer_id).await
    }

    pub fn on_dominant_speaker<F: Fn(ProducerId) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.dominant_speaker.add(Box::new(callback))
    }

    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(Box::new(callback));
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }

    fn internal(&self) -> RtpObserverInternal {
        RtpObserverInternal {
            router_id: self.inner.router_id,
            rtp_observer_id: self.inner.id,
        }
    }

    pub fn downgrade(&self) -> WeakActiveSpeakerObserver {
        WeakActiveSpeakerObserver {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Doesn't own the underlying observer; used by a router's registry to avoid a reference cycle.
#[derive(Clone)]
pub struct WeakActiveSpeakerObserver {
    inner: Weak<Inner>,
}

impl WeakActiveSpeakerObserver {
    pub fn upgrade(&self) -> Option<ActiveSpeakerObserver> {
        Some(ActiveSpeakerObserver {
            inner: self.inner.upgrade()?,
        })
    }
}

impl std::fmt::Debug for WeakActiveSpeakerObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakActiveSpeakerObserver").finish()
    }
}

impl rtp_observer::WeakRtpObserver for WeakActiveSpeakerObserver {
    fn upgrade(&self) -> Option<Box<dyn RtpObserver>> {
        Some(Box::new(self.upgrade()?))
    }
}

impl std::fmt::Debug for ActiveSpeakerObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSpeakerObserver")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl RtpObserver for ActiveSpeakerObserver {
    fn id(&self) -> RtpObserverId {
        self.inner.id
    }

    fn router_id(&self) -> RouterId {
        self.inner.router_id
    }

    fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    fn paused(&self) -> bool {
        self.paused()
    }

    fn closed(&self) -> bool {
        self.closed()
    }

    fn on_close(&self, callback: Box<dyn FnOnce() + Send>) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(callback);
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }
}
