//! Worker handle (C3): owns one `mediasoup-worker` subprocess, the [`Channel`] wired to its
//! pipes, and every [`Router`]/[`WebRtcServer`] created on it. Dropping the last `Worker` clone
//! sends `SIGTERM` to the subprocess.
// TODO: This is Unix-specific and doesn't support Windows in any way
mod channel;
mod codec;
mod utils;

use crate::data_structures::AppData;
use crate::error::WorkerError;
use crate::messages::{WorkerDumpRequest, WorkerGetResourceRequest, WorkerUpdateSettingsRequest};
use crate::router::webrtc_server::{WebRtcServer, WebRtcServerId, WebRtcServerOptions};
use crate::router::{CreateRouterError, Router, RouterId, RouterOptions};
use crate::worker::channel::RequestTimeoutPolicy;
use async_executor::Executor;
use async_process::{Child, ExitStatus};
use event_listener_primitives::{Bag, BagOnce};
use futures_lite::io::BufReader;
use futures_lite::{future, AsyncBufReadExt, StreamExt};
use log::*;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) use channel::{Channel, SubscriptionHandler};

#[derive(Debug, Copy, Clone)]
pub enum WorkerLogLevel {
    Debug,
    Warn,
    Error,
    None,
}

impl Default for WorkerLogLevel {
    fn default() -> Self {
        Self::Error
    }
}

impl Serialize for WorkerLogLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl WorkerLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub enum WorkerLogTag {
    Info,
    Ice,
    Dtls,
    Rtp,
    Srtp,
    Rtcp,
    Rtx,
    Bwe,
    Score,
    Simulcast,
    Svc,
    Sctp,
    Message,
}

impl Serialize for WorkerLogTag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl WorkerLogTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Ice => "ice",
            Self::Dtls => "dtls",
            Self::Rtp => "rtp",
            Self::Srtp => "srtp",
            Self::Rtcp => "rtcp",
            Self::Rtx => "rtx",
            Self::Bwe => "bwe",
            Self::Score => "score",
            Self::Simulcast => "simulcast",
            Self::Svc => "svc",
            Self::Sctp => "sctp",
            Self::Message => "message",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub app_data: AppData,
    /// Logging level for logs generated by the worker subprocess.
    pub log_level: WorkerLogLevel,
    /// Log tags for debugging; an empty vec lets the worker's own default stand.
    pub log_tags: Vec<WorkerLogTag>,
    /// Minimum RTC port for ICE, DTLS, RTP, etc. Default 10000.
    pub rtc_min_port: u16,
    /// Maximum RTC port for ICE, DTLS, RTP, etc. Default 59999.
    pub rtc_max_port: u16,
    /// Path to the DTLS public certificate file in PEM format. If unset, a certificate is
    /// dynamically created.
    pub dtls_certificate_file: Option<PathBuf>,
    /// Path to the DTLS certificate private key file in PEM format. If unset, a certificate is
    /// dynamically created.
    pub dtls_private_key_file: Option<PathBuf>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            app_data: AppData::default(),
            log_level: WorkerLogLevel::default(),
            log_tags: Vec::new(),
            rtc_min_port: 10000,
            rtc_max_port: 59999,
            dtls_certificate_file: None,
            dtls_private_key_file: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerUpdateSettings {
    pub log_level: WorkerLogLevel,
    pub log_tags: Vec<WorkerLogTag>,
}

#[derive(Debug, Copy, Clone, Deserialize)]
pub struct WorkerResourceUsage {
    /// User CPU time used (in ms).
    pub ru_utime: u64,
    /// System CPU time used (in ms).
    pub ru_stime: u64,
    /// Maximum resident set size.
    pub ru_maxrss: u64,
    /// Integral shared memory size.
    pub ru_ixrss: u64,
    /// Integral unshared data size.
    pub ru_idrss: u64,
    /// Integral unshared stack size.
    pub ru_isrss: u64,
    /// Page reclaims (soft page faults).
    pub ru_minflt: u64,
    /// Page faults (hard page faults).
    pub ru_majflt: u64,
    /// Swaps.
    pub ru_nswap: u64,
    /// Block input operations.
    pub ru_inblock: u64,
    /// Block output operations.
    pub ru_oublock: u64,
    /// IPC messages sent.
    pub ru_msgsnd: u64,
    /// IPC messages received.
    pub ru_msgrcv: u64,
    /// Signals received.
    pub ru_nsignals: u64,
    /// Voluntary context switches.
    pub ru_nvcsw: u64,
    /// Involuntary context switches.
    pub ru_nivcsw: u64,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[doc(hidden)]
pub struct WorkerDump {
    pub pid: u32,
    pub router_ids: Vec<RouterId>,
    #[serde(default)]
    pub webrtc_server_ids: Vec<WebRtcServerId>,
}

#[derive(Default)]
struct Handlers {
    new_router: Bag<Box<dyn Fn(&Router) + Send + Sync>>,
    new_webrtc_server: Bag<Box<dyn Fn(&WebRtcServer) + Send + Sync>>,
    died: BagOnce<Box<dyn FnOnce(&WorkerError) + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    channel: Channel,
    child: Child,
    executor: Arc<Executor<'static>>,
    pid: u32,
    handlers: Arc<Handlers>,
    app_data: AppData,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("close()");
            self.handlers.close.call_simple();
            self.channel.close();

            if matches!(self.child.try_status(), Ok(None)) {
                unsafe {
                    libc::kill(self.pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
    }
}

impl Inner {
    async fn new(
        executor: Arc<Executor<'static>>,
        worker_binary: PathBuf,
        settings: WorkerSettings,
    ) -> io::Result<Arc<Self>> {
        debug!("new()");

        let WorkerSettings {
            app_data,
            log_level,
            log_tags,
            rtc_min_port,
            rtc_max_port,
            dtls_certificate_file,
            dtls_private_key_file,
        } = settings;

        let mut spawn_args: Vec<OsString> = Vec::new();
        spawn_args.push(format!("--logLevel={}", log_level.as_str()).into());
        if !log_tags.is_empty() {
            let log_tags = log_tags.iter().map(|tag| tag.as_str()).collect::<Vec<_>>().join(",");
            spawn_args.push(format!("--logTags={}", log_tags).into());
        }
        spawn_args.push(format!("--rtcMinPort={}", rtc_min_port).into());
        spawn_args.push(format!("--rtcMaxPort={}", rtc_max_port).into());

        if let Some(dtls_certificate_file) = dtls_certificate_file {
            let mut arg = OsString::new();
            arg.push("--dtlsCertificateFile=");
            arg.push(dtls_certificate_file);
            spawn_args.push(arg);
        }
        if let Some(dtls_private_key_file) = dtls_private_key_file {
            let mut arg = OsString::new();
            arg.push("--dtlsPrivateKeyFile=");
            arg.push(dtls_private_key_file);
            spawn_args.push(arg);
        }

        debug!(
            "spawning worker process: {} {}",
            worker_binary.to_string_lossy(),
            spawn_args.iter().map(|arg| arg.to_string_lossy()).collect::<Vec<_>>().join(" "),
        );

        let mut command = async_process::Command::new(worker_binary);
        command
            .args(spawn_args)
            .stdin(async_process::Stdio::null())
            .stdout(async_process::Stdio::piped())
            .stderr(async_process::Stdio::piped())
            .env("MEDIASOUP_VERSION", env!("CARGO_PKG_VERSION"));

        let utils::SpawnResult { mut child, channel } = utils::spawn_with_worker_channel(
            Arc::clone(&executor),
            &mut command,
            RequestTimeoutPolicy::default(),
        )?;

        let pid = child.id();
        let handlers = Arc::<Handlers>::default();

        Self::forward_output(Arc::clone(&executor), &mut child);

        Self::wait_for_worker_running(&channel, pid, &mut child).await?;

        // Captured before `child` moves into `Inner`: this future owns its own handle into the
        // OS process and doesn't borrow `Inner` further, so it can be polled from a spawned task
        // for the lifetime of the worker without any aliasing of `child`.
        let status_fut = child.status();

        let inner = Arc::new(Self {
            channel,
            child,
            executor,
            pid,
            handlers,
            app_data,
            closed: AtomicBool::new(false),
        });

        Self::watch_for_exit(Arc::clone(&inner), status_fut);

        Ok(inner)
    }

    fn forward_output(executor: Arc<Executor<'static>>, child: &mut Child) {
        let stdout = child.stdout.take().unwrap();
        executor
            .spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Some(Ok(line)) = lines.next().await {
                    debug!("(stdout) {}", line);
                }
            })
            .detach();

        let stderr = child.stderr.take().unwrap();
        executor
            .spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Some(Ok(line)) = lines.next().await {
                    error!("(stderr) {}", line);
                }
            })
            .detach();
    }

    async fn wait_for_worker_running(channel: &Channel, pid: u32, child: &mut Child) -> io::Result<()> {
        let (sender, receiver) = async_oneshot::oneshot();
        let sender = Cell::new(Some(sender));
        let subscription = channel.subscribe_to_notifications(String::new(), move |notification| {
            let result = if notification.event == "running" {
                debug!("worker process running [pid:{}]", pid);
                Ok(())
            } else {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("unexpected first notification from worker [pid:{}]: {:?}", pid, notification.event),
                ))
            };
            if let Some(mut sender) = sender.take() {
                let _ = sender.send(result);
            }
        });

        let status = child.status();
        let outcome = future::or(
            async move {
                status.await?;
                Err(io::Error::new(io::ErrorKind::NotFound, "worker process exited before becoming ready"))
            },
            async move { receiver.await.unwrap_or(Err(io::Error::new(io::ErrorKind::Other, "worker channel closed"))) },
        )
        .await;
        drop(subscription);
        outcome
    }

    /// `status_fut` was obtained from `child.status()` before `child` moved into `Inner`; it owns
    /// its own handle into the OS process and doesn't borrow `Inner` further.
    fn watch_for_exit(
        inner: Arc<Self>,
        status_fut: impl std::future::Future<Output = io::Result<ExitStatus>> + Send + 'static,
    ) {
        let inner_weak = Arc::downgrade(&inner);
        inner
            .executor
            .spawn(async move {
                if let Ok(status) = status_fut.await {
                    if let Some(inner) = inner_weak.upgrade() {
                        Self::on_exit(&inner, status);
                    }
                }
            })
            .detach();
    }

    fn on_exit(inner: &Arc<Self>, status: ExitStatus) {
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        warn!("worker process exited with status {}", status);
        let error = match status.code() {
            Some(42) => WorkerError::BadSettings,
            _ => WorkerError::Crashed,
        };
        inner.handlers.died.call(|callback| callback(&error));
    }
}

/// Handle to one `mediasoup-worker` subprocess.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<Inner>,
}

impl Worker {
    pub(crate) async fn new(
        executor: Arc<Executor<'static>>,
        worker_binary: PathBuf,
        worker_settings: WorkerSettings,
    ) -> io::Result<Self> {
        let inner = Inner::new(executor, worker_binary, worker_settings).await?;
        Ok(Self { inner })
    }

    /// Worker process identifier (PID).
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// App custom data.
    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Dump worker.
    #[doc(hidden)]
    pub async fn dump(&self) -> Result<WorkerDump, crate::error::ChannelError> {
        debug!("dump()");
        self.inner.channel.request(String::new(), WorkerDumpRequest {}).await
    }

    /// Get mediasoup-worker process resource usage.
    pub async fn get_resource_usage(&self) -> Result<WorkerResourceUsage, crate::error::ChannelError> {
        debug!("get_resource_usage()");
        self.inner.channel.request(String::new(), WorkerGetResourceRequest {}).await
    }

    /// Update settings.
    pub async fn update_settings(&self, data: WorkerUpdateSettings) -> Result<(), crate::error::ChannelError> {
        debug!("update_settings()");
        self.inner.channel.request(String::new(), WorkerUpdateSettingsRequest { data }).await
    }

    /// Create a Router. Worker is kept alive as long as at least one router clone is alive
    /// (every [`Router`] holds its own `Channel` clone, independent of this `Worker` handle).
    pub async fn create_router(&self, router_options: RouterOptions) -> Result<Router, CreateRouterError> {
        debug!("create_router()");

        let router = Router::new(Arc::clone(&self.inner.executor), self.inner.channel.clone(), router_options).await?;

        self.inner.handlers.new_router.call(|callback| callback(&router));

        Ok(router)
    }

    /// Create a WebRtcServer for shared-port WebRTC transports on this worker.
    pub async fn create_webrtc_server(
        &self,
        options: WebRtcServerOptions,
    ) -> Result<WebRtcServer, crate::error::ChannelError> {
        debug!("create_webrtc_server()");

        let server = WebRtcServer::new(Arc::clone(&self.inner.executor), self.inner.channel.clone(), options).await?;

        self.inner.handlers.new_webrtc_server.call(|callback| callback(&server));

        Ok(server)
    }

    pub fn on_new_router<F: Fn(&Router) + Send + Sync + 'static>(&self, callback: F) -> event_listener_primitives::HandlerId {
        self.inner.handlers.new_router.add(Box::new(callback))
    }

    pub fn on_new_webrtc_server<F: Fn(&WebRtcServer) + Send + Sync + 'static>(&self, callback: F) -> event_listener_primitives::HandlerId {
        self.inner.handlers.new_webrtc_server.add(Box::new(callback))
    }

    pub fn on_died<F: FnOnce(&WorkerError) + Send + 'static>(&self, callback: F) -> event_listener_primitives::HandlerId {
        self.inner.handlers.died.add(Box::new(callback))
    }

    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> event_listener_primitives::HandlerId {
        let handler_id = self.inner.handlers.close.add(Box::new(callback));
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }
}

#[cfg(test)]
mod tests;

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("pid", &self.inner.pid).finish()
    }
}
