//! Audio level observer: periodically reports the loudest producers in a router
//! (`spec.md` §4.8). Literal defaults match the worker's own: `max_entries = 1`,
//! `threshold = -80` dBov, `interval = 800` ms.

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
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AudioLevelObserverOptionsData {
    pub(crate) max_entries: u16,
    pub(crate) threshold: i8,
    pub(crate) interval: u16,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AudioLevelObserverOptions {
    pub max_entries: u16,
    pub threshold: i8,
    pub interval: u16,
    pub app_data: AppData,
}

impl Default for AudioLevelObserverOptions {
    fn default() -> Self {
        Self {
            max_entries: 1,
            threshold: -80,
            interval: 800,
            app_data: AppData::default(),
        }
    }
}

impl AudioLevelObserverOptions {
    pub(crate) fn to_data(&self) -> AudioLevelObserverOptionsData {
        AudioLevelObserverOptionsData {
            max_entries: self.max_entries,
            threshold: self.threshold,
            interval: self.interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioLevelObserverVolume {
    pub producer_id_index: usize,
    pub volume: i8,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    Volumes { volumes: Vec<AudioLevelObserverVolumeEntry> },
    Silence,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioLevelObserverVolumeEntry {
    producer_id: ProducerId,
    volume: i8,
}

#[derive(Default)]
struct Handlers {
    volumes: Bag<Box<dyn Fn(&[(ProducerId, i8)]) + Send + Sync>>,
    silence: Bag<Box<dyn Fn() + Send + Sync>>,
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
                        error!("audio level observer closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// Watches a router's producers for loudness and reports the loudest ones periodically.
#[derive(Clone)]
pub struct AudioLevelObserver {
    inner: Arc<Inner>,
}

impl AudioLevelObserver {
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
                    Ok(Notification::Volumes { volumes }) => {
                        let volumes: Vec<(ProducerId, i8)> =
                            volumes.into_iter().map(|v| (v.producer_id, v.volume)).collect();
                        handlers.volumes.call(|callback| callback(&volumes));
                    }
                    Ok(Notification::Silence) => handlers.silence.call(|callback| callback()),
                    Err(error) => error!("failed to parse audio level observer notification: {}", error),
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

    pub fn on_volumes<F: Fn(&[(ProducerId, i8)]) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.volumes.add(Box::new(callback))
    }

    pub fn on_silence<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.silence.add(Box::new(callback))
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

    pub fn downgrade(&self) -> WeakAudioLevelObserver {
        WeakAudioLevelObserver {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Doesn't own the underlying observer; used by a router's registry to avoid a reference cycle.
#[derive(Clone)]
pub struct WeakAudioLevelObserver {
    inner: std::sync::Weak<Inner>,
}

impl WeakAudioLevelObserver {
    pub fn upgrade(&self) -> Option<AudioLevelObserver> {
        Some(AudioLevelObserver {
            inner: self.inner.upgrade()?,
        })
    }
}

impl std::fmt::Debug for WeakAudioLevelObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakAudioLevelObserver").finish()
    }
}

impl rtp_observer::WeakRtpObserver for WeakAudioLevelObserver {
    fn upgrade(&self) -> Option<Box<dyn RtpObserver>> {
        Some(Box::new(self.upgrade()?))
    }
}

impl std::fmt::Debug for AudioLevelObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioLevelObserver")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl RtpObserver for AudioLevelObserver {
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
