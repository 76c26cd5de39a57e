//! Worker pool / engine (C6): spawns a fixed number of workers at startup, round-robins router
//! creation across them, and optionally seeds each worker with a [`WebRtcServer`] for
//! single-port WebRTC mode (`spec.md` §4.6).

#[cfg(test)]
mod tests;

use crate::data_structures::{ListenInfo, TransportProtocol};
use crate::router::webrtc_server::{WebRtcServer, WebRtcServerOptions};
use crate::router::{CreateRouterError, Router, RouterOptions};
use crate::worker::{Worker, WorkerSettings};
use async_executor::Executor;
use event_listener_primitives::Bag;
use log::*;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-worker single-port WebRTC seeding: the base listen IP/announced IP, and the starting
/// port that gets incremented by worker ordinal (`spec.md` §4.6).
#[derive(Debug, Clone)]
pub struct WebRtcServerSettings {
    pub ip: String,
    pub announced_ip: Option<IpAddr>,
    pub base_port: u16,
}

impl WebRtcServerSettings {
    fn listen_infos_for(&self, ordinal: u16) -> Vec<ListenInfo> {
        let port = Some(self.base_port + ordinal);
        vec![
            ListenInfo {
                protocol: TransportProtocol::Udp,
                ip: self.ip.clone(),
                announced_ip: self.announced_ip,
                port,
            },
            ListenInfo {
                protocol: TransportProtocol::Tcp,
                ip: self.ip.clone(),
                announced_ip: self.announced_ip,
                port,
            },
        ]
    }
}

#[derive(Default)]
struct Handlers {
    new_worker: Bag<Box<dyn Fn(&Worker) + Send + Sync>>,
}

struct Inner {
    executor: Arc<Executor<'static>>,
    worker_binary: PathBuf,
    workers: Vec<Worker>,
    webrtc_servers: Vec<WebRtcServer>,
    next_worker: AtomicUsize,
    handlers: Arc<Handlers>,
}

/// Spawns and owns every `Worker` process in the pool. Holds its workers strongly: a worker
/// lives as long as the `WorkerManager` does (or as long as a `Router`/`WebRtcServer` clone
/// created on it is still alive, since those hold their own `Channel` clone independently).
#[derive(Clone)]
pub struct WorkerManager {
    inner: Arc<Inner>,
}

impl WorkerManager {
    /// Spawns `num_workers` workers from `worker_binary`, each constructed from
    /// `worker_settings(ordinal)`. If `webrtc_server_settings` is given, seeds every worker with
    /// a `WebRtcServer` whose listen port is `base_port + ordinal`.
    pub async fn new(
        executor: Arc<Executor<'static>>,
        worker_binary: PathBuf,
        num_workers: u16,
        mut worker_settings: impl FnMut(u16) -> WorkerSettings,
        webrtc_server_settings: Option<WebRtcServerSettings>,
    ) -> io::Result<Self> {
        let handlers = Arc::<Handlers>::default();
        let mut workers = Vec::with_capacity(num_workers as usize);
        let mut webrtc_servers = Vec::new();

        for ordinal in 0..num_workers {
            let worker = Worker::new(Arc::clone(&executor), worker_binary.clone(), worker_settings(ordinal)).await?;
            debug!("worker #{ordinal} started, pid {}", worker.pid());
            handlers.new_worker.call(|callback| callback(&worker));

            if let Some(settings) = &webrtc_server_settings {
                let options = WebRtcServerOptions::new(settings.listen_infos_for(ordinal));
                let server = worker
                    .create_webrtc_server(options)
                    .await
                    .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;
                webrtc_servers.push(server);
            }

            workers.push(worker);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                executor,
                worker_binary,
                workers,
                webrtc_servers,
                next_worker: AtomicUsize::new(0),
                handlers,
            }),
        })
    }

    /// Convenience constructor for a pool with no single-port WebRTC seeding, all workers built
    /// from the same settings.
    pub async fn new_uniform(
        executor: Arc<Executor<'static>>,
        worker_binary: PathBuf,
        num_workers: u16,
        worker_settings: WorkerSettings,
    ) -> io::Result<Self> {
        Self::new(executor, worker_binary, num_workers, move |_| worker_settings.clone(), None).await
    }

    pub fn workers(&self) -> &[Worker] {
        &self.inner.workers
    }

    pub fn webrtc_servers(&self) -> &[WebRtcServer] {
        &self.inner.webrtc_servers
    }

    /// Path passed to every spawned worker process.
    pub fn worker_binary(&self) -> &PathBuf {
        &self.inner.worker_binary
    }

    /// Creates a Router on the next worker in round-robin order; the pointer wraps at the pool
    /// size (`spec.md` §4.6).
    pub async fn create_router(&self, router_options: RouterOptions) -> Result<Router, CreateRouterError> {
        let len = self.inner.workers.len();
        let index = self.inner.next_worker.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |previous| Some((previous + 1) % len)).unwrap_or(0);
        let worker = &self.inner.workers[index % len];
        worker.create_router(router_options).await
    }

    pub fn on_new_worker<F: Fn(&Worker) + Send + Sync + 'static>(&self, callback: F) -> event_listener_primitives::HandlerId {
        self.inner.handlers.new_worker.add(Box::new(callback))
    }
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager").field("workers", &self.inner.workers.len()).finish()
    }
}

// kept for callers that only need the executor used internally, e.g. spawning room-level tasks
// off the same pool.
impl WorkerManager {
    pub fn executor(&self) -> &Arc<Executor<'static>> {
        &self.inner.executor
    }
}
