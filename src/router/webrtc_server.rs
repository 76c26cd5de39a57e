//! WebRtcServer: a worker-scoped pool of pre-bound UDP/TCP sockets that WebRtcTransports can
//! share instead of each opening its own (`spec.md` §4.6 — single-port WebRTC mode, one server
//! per worker with its listen port offset by worker ordinal). Lifetime is owned by the
//! [`crate::worker::Worker`] that created it, not by any particular router.

use crate::data_structures::{AppData, Dump, WebRtcServerInternal};
use crate::error::ChannelError;
use crate::messages::{WebRtcServerCloseRequest, WebRtcServerDumpRequest, WorkerCreateWebRtcServerRequest};
use crate::uuid_based_wrapper_type;
use crate::worker::channel::Channel;
use async_executor::Executor;
use event_listener_primitives::BagOnce;
use log::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

uuid_based_wrapper_type!(
    /// WebRtcServer identifier, unique within its worker.
    WebRtcServerId
);

use crate::data_structures::ListenInfo;

/// One entry per protocol/IP the server should pre-bind; the worker opens one socket per entry.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct WebRtcServerOptions {
    pub listen_infos: Vec<ListenInfo>,
    pub app_data: AppData,
}

impl WebRtcServerOptions {
    pub fn new(listen_infos: Vec<ListenInfo>) -> Self {
        Self { listen_infos, app_data: AppData::default() }
    }

    pub(crate) fn to_data(&self) -> WebRtcServerData {
        WebRtcServerData { listen_infos: self.listen_infos.clone() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebRtcServerData {
    listen_infos: Vec<ListenInfo>,
}

#[derive(Default)]
struct Handlers {
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: WebRtcServerId,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    app_data: AppData,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("close()");
            self.handlers.close.call_simple();

            let channel = self.channel.clone();
            let internal = WebRtcServerInternal { webrtc_server_id: self.id };
            self.executor
                .spawn(async move {
                    if let Err(error) =
                        channel.request(internal.webrtc_server_id.to_string(), WebRtcServerCloseRequest { internal }).await
                    {
                        error!("webrtc server closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// A pool of worker sockets that WebRtcTransports created on the same worker can share.
#[derive(Clone)]
pub struct WebRtcServer {
    inner: Arc<Inner>,
}

impl WebRtcServer {
    pub(crate) async fn new(
        executor: Arc<Executor<'static>>,
        channel: Channel,
        options: WebRtcServerOptions,
    ) -> Result<Self, ChannelError> {
        let id = WebRtcServerId::new();
        let internal = WebRtcServerInternal { webrtc_server_id: id };

        channel
            .request(id.to_string(), WorkerCreateWebRtcServerRequest { internal, data: options.to_data() })
            .await?;

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                executor,
                channel,
                handlers: Arc::default(),
                app_data: options.app_data,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn id(&self) -> WebRtcServerId {
        self.inner.id
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub async fn dump(&self) -> Result<Dump, ChannelError> {
        let internal = WebRtcServerInternal { webrtc_server_id: self.inner.id };
        self.inner.channel.request(self.inner.id.to_string(), WebRtcServerDumpRequest { internal }).await
    }

    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> event_listener_primitives::HandlerId {
        let handler_id = self.inner.handlers.close.add(Box::new(callback));
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }
}

impl std::fmt::Debug for WebRtcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcServer").field("id", &self.inner.id).finish()
    }
}
