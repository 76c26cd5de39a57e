//! Channel (C2): multiplexes concurrent request/response pairs and fans out notifications over
//! one duplex byte stream to a worker.
//!
//! Grounded on the teacher's `worker.rs` usage (`self.inner.channel.request(...)`,
//! `channel.subscribe_to_notifications(handler_id, closure)`) and `spec.md` §4.2/§5.

use crate::error::ChannelError;
use crate::worker::codec::{FramingMode, LogMessage, LogSeverity, Message, NotificationMessage, RequestMessage, ResponseMessage};
use async_channel::{Receiver, Sender, TrySendError};
use async_executor::Executor;
use async_oneshot::Sender as OneshotSender;
use bytes::BytesMut;
use futures_lite::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures_lite::future;
use log::*;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outbound queue capacity. Implementation-defined per `spec.md` §4.2 ("must be at least 1");
/// chosen generously since a full queue degrades `request` (fails outright) and `notify` (drops
/// silently).
const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

pub(crate) trait Request: Debug + Serialize {
    type Response: DeserializeOwned;

    fn as_method(&self) -> &'static str;
}

/// `15s + 100ms * in_flight_count` kept verbatim from the source (`spec.md` §9 open question),
/// exposed as a policy so tests can shrink it.
#[derive(Debug, Copy, Clone)]
pub(crate) struct RequestTimeoutPolicy {
    base: Duration,
    per_in_flight: Duration,
}

impl Default for RequestTimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(15),
            per_in_flight: Duration::from_millis(100),
        }
    }
}

impl RequestTimeoutPolicy {
    #[cfg(test)]
    pub(crate) fn new(base: Duration, per_in_flight: Duration) -> Self {
        Self { base, per_in_flight }
    }

    fn deadline(&self, in_flight_count: usize) -> Duration {
        self.base + self.per_in_flight * (in_flight_count as u32)
    }
}

type NotificationCallback = Box<dyn Fn(&NotificationMessage) + Send + Sync>;

/// Handle returned by [`Channel::subscribe_to_notifications`]. Unsubscribes on drop.
#[must_use]
pub(crate) struct SubscriptionHandler {
    handler_id: String,
    subscription_id: u64,
    inner: Arc<Inner>,
}

impl Drop for SubscriptionHandler {
    fn drop(&mut self) {
        if let Some(subscribers) = self.inner.notifications.lock().get_mut(&self.handler_id) {
            subscribers.retain(|(id, _)| *id != self.subscription_id);
        }
    }
}

struct Inner {
    closed: std::sync::atomic::AtomicBool,
    next_request_id: AtomicU32,
    next_subscription_id: AtomicU64,
    in_flight: Mutex<HashMap<u32, OneshotSender<Result<Option<Value>, ChannelError>>>>,
    notifications: Mutex<HashMap<String, Vec<(u64, NotificationCallback)>>>,
    outbound: Sender<Message>,
    timeout_policy: RequestTimeoutPolicy,
}

impl Inner {
    fn allocate_request_id(&self) -> u32 {
        // Wraps `u32::MAX` back to `1`; `0` is reserved and never allocated (`spec.md` §4.2/§8).
        loop {
            let previous = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            let id = previous.wrapping_add(1);
            if id != 0 {
                return id;
            }
            // previous + 1 wrapped to exactly 0. Repair the counter to 1 only if it's still 0;
            // if another thread's fetch_add already raced ahead and claimed 1, fall through and
            // retry from its advanced value instead of handing out a duplicate id.
            if self
                .next_request_id
                .compare_exchange(0, 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return 1;
            }
        }
    }
}

/// Full-duplex framed pipe transport to one worker (or in-process worker thread).
#[derive(Clone)]
pub(crate) struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    /// Spawns the read and write loops over `reader`/`writer` on `executor`.
    pub(crate) fn new(
        executor: Arc<Executor<'static>>,
        reader: impl AsyncRead + Unpin + Send + 'static,
        writer: impl AsyncWrite + Unpin + Send + 'static,
        framing: FramingMode,
        timeout_policy: RequestTimeoutPolicy,
    ) -> Self {
        let (outbound_tx, outbound_rx) = async_channel::bounded(OUTBOUND_QUEUE_CAPACITY);

        let inner = Arc::new(Inner {
            closed: std::sync::atomic::AtomicBool::new(false),
            next_request_id: AtomicU32::new(0),
            next_subscription_id: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
            notifications: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
            timeout_policy,
        });

        executor
            .spawn(Self::write_loop(writer, outbound_rx, framing))
            .detach();
        executor
            .spawn(Self::read_loop(Arc::clone(&inner), reader, framing))
            .detach();

        Self { inner }
    }

    async fn write_loop(
        mut writer: impl AsyncWrite + Unpin + Send + 'static,
        outbound_rx: Receiver<Message>,
        framing: FramingMode,
    ) {
        while let Ok(message) = outbound_rx.recv().await {
            let encoded = match framing {
                FramingMode::SizePrefixed => message.encode_frame(),
                FramingMode::Direct => message.encode_payload(),
            };
            let bytes = match encoded {
                Ok(bytes) => bytes,
                Err(error) => {
                    error!("dropping outbound message that failed to encode: {error}");
                    continue;
                }
            };
            if let Err(error) = writer.write_all(&bytes).await {
                warn!("worker channel write failed, closing: {error}");
                break;
            }
        }
    }

    async fn read_loop(
        inner: Arc<Inner>,
        mut reader: impl AsyncRead + Unpin + Send + 'static,
        framing: FramingMode,
    ) {
        let mut buffer = BytesMut::with_capacity(64 * 1024);
        let mut chunk = [0_u8; 64 * 1024];
        loop {
            match framing {
                FramingMode::SizePrefixed => loop {
                    match Message::try_decode_frame(&mut buffer) {
                        Ok(Some(message)) => Self::dispatch(&inner, message),
                        Ok(None) => break,
                        Err(error) => {
                            warn!("dropping oversized/malformed frame: {error}");
                        }
                    }
                },
                FramingMode::Direct => {
                    if !buffer.is_empty() {
                        match Message::decode_payload(&buffer) {
                            Ok(message) => Self::dispatch(&inner, message),
                            Err(error) => warn!("dropping malformed direct message: {error}"),
                        }
                        buffer.clear();
                    }
                }
            }

            match reader.read(&mut chunk).await {
                Ok(0) => {
                    debug!("worker channel EOF, closing");
                    break;
                }
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(error) => {
                    warn!("worker channel read failed, closing: {error}");
                    break;
                }
            }
        }
        inner.close();
    }

    fn dispatch(inner: &Arc<Inner>, message: Message) {
        match message {
            Message::Response(response) => Self::handle_response(inner, response),
            Message::Notification(notification) => Self::handle_notification(inner, notification),
            Message::Log(log) => Self::handle_log(log),
            Message::Request(_) => {
                warn!("worker sent a Request, which this channel does not serve; ignoring");
            }
        }
    }

    fn handle_response(inner: &Arc<Inner>, response: ResponseMessage) {
        let sender = inner.in_flight.lock().remove(&response.id);
        let Some(mut sender) = sender else {
            warn!("unmatched response for request id {}", response.id);
            return;
        };
        let result = if response.accepted {
            Ok(response.data)
        } else {
            match response.error.as_deref() {
                Some("TypeError") => Err(ChannelError::TypeError(
                    response.reason.unwrap_or_default(),
                )),
                _ => Err(ChannelError::Remote(response.reason.unwrap_or_default())),
            }
        };
        let _ = sender.send(result);
    }

    fn handle_notification(inner: &Arc<Inner>, notification: NotificationMessage) {
        let guard = inner.notifications.lock();
        if let Some(subscribers) = guard.get(&notification.handler_id) {
            for (_, callback) in subscribers {
                callback(&notification);
            }
        }
    }

    fn handle_log(log: LogMessage) {
        match log.severity {
            LogSeverity::Debug => debug!("{}", log.text),
            LogSeverity::Warn => warn!("{}", log.text),
            LogSeverity::Error => error!("{}", log.text),
            LogSeverity::Dump => println!("{}", log.text),
        }
    }

    /// Fire-and-forget. Fails silently (with a log) if the channel is closed, the message is too
    /// large, or the outbound queue is full (`spec.md` §4.2).
    pub(crate) fn notify<Req: Request>(&self, handler_id: impl Into<String>, request: Req) {
        if self.is_closed() {
            debug!("dropping notify on closed channel: {}", request.as_method());
            return;
        }
        let data = match serde_json::to_value(&request) {
            Ok(data) => Some(data),
            Err(error) => {
                warn!("failed to serialize notification body: {error}");
                return;
            }
        };
        let message = Message::Notification(NotificationMessage {
            handler_id: handler_id.into(),
            event: request.as_method().to_string(),
            data,
        });
        if let Err(error) = message.encode_payload() {
            warn!("dropping oversized notification: {error}");
            return;
        }
        if let Err(TrySendError::Full(_)) = self.inner.outbound.try_send(message) {
            warn!("dropping notification, outbound queue full");
        }
    }

    /// Blocks the caller until a matching response arrives, the channel closes, or the
    /// per-request deadline elapses.
    pub(crate) async fn request<Req: Request>(
        &self,
        handler_id: impl Into<String>,
        request: Req,
    ) -> Result<Req::Response, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let body = serde_json::to_value(&request)
            .map_err(|error| ChannelError::TypeError(error.to_string()))?;
        let in_flight_count = self.inner.in_flight.lock().len();
        let timeout = self.inner.timeout_policy.deadline(in_flight_count);
        let id = self.inner.allocate_request_id();

        let (sender, mut receiver) = async_oneshot::oneshot();
        // Insertion happens strictly before the outbound write (`spec.md` §3 invariant).
        self.inner.in_flight.lock().insert(id, sender);

        let message = Message::Request(RequestMessage {
            id,
            method: request.as_method().to_string(),
            handler_id: handler_id.into(),
            data: Some(body),
        });
        if let Err(error) = message.encode_payload() {
            self.inner.in_flight.lock().remove(&id);
            return Err(match error {
                crate::worker::codec::CodecError::TooLarge(_) => ChannelError::TooLarge,
                other => ChannelError::TypeError(other.to_string()),
            });
        }
        if self.inner.outbound.try_send(message).is_err() {
            self.inner.in_flight.lock().remove(&id);
            return Err(ChannelError::Backpressure);
        }

        let wait_for_response = async {
            match receiver.await {
                Ok(outcome) => outcome,
                Err(_closed) => Err(ChannelError::Closed),
            }
        };
        let wait_for_timeout = async {
            async_io::Timer::after(timeout).await;
            Err(ChannelError::Timeout)
        };

        let outcome = future::or(wait_for_response, wait_for_timeout).await;
        if matches!(outcome, Err(ChannelError::Timeout)) {
            self.inner.in_flight.lock().remove(&id);
        }
        let value = outcome?;
        serde_json::from_value(value.unwrap_or(Value::Null))
            .map_err(|error| ChannelError::TypeError(error.to_string()))
    }

    /// Registers `callback` to run for every notification targeting `handler_id`. Delivery runs
    /// synchronously inside the read loop's call site here, but callers are expected to bounce
    /// onto their own executor for anything that might itself call back into `request` (the
    /// teacher's own note: a notification handler issuing a request must not run on the channel's
    /// read thread). This crate's entity controllers never block in their notification callbacks.
    pub(crate) fn subscribe_to_notifications(
        &self,
        handler_id: impl Into<String>,
        callback: impl Fn(&NotificationMessage) + Send + Sync + 'static,
    ) -> SubscriptionHandler {
        let handler_id = handler_id.into();
        let subscription_id = self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .notifications
            .lock()
            .entry(handler_id.clone())
            .or_default()
            .push((subscription_id, Box::new(callback)));
        SubscriptionHandler {
            handler_id,
            subscription_id,
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Idempotent. All pending requests fail with `ChannelError::Closed`; further notify/request
    /// are no-ops.
    pub(crate) fn close(&self) {
        self.inner.close();
    }
}

impl Inner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the senders resolves every pending receiver with a disconnect error, which
        // `request()` maps to `ChannelError::Closed`.
        self.in_flight.lock().clear();
        self.notifications.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::codec::RequestMessage as RawRequest;
    use std::time::Duration;

    #[derive(Debug, Serialize)]
    struct Ping;

    impl Request for Ping {
        type Response = String;

        fn as_method(&self) -> &'static str {
            "test.ping"
        }
    }

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn request_id_never_yields_zero_and_wraps() {
        init();
        let inner = Inner {
            closed: std::sync::atomic::AtomicBool::new(false),
            next_request_id: AtomicU32::new(u32::MAX - 1),
            next_subscription_id: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
            notifications: Mutex::new(HashMap::new()),
            outbound: async_channel::bounded(1).0,
            timeout_policy: RequestTimeoutPolicy::default(),
        };
        let first = inner.allocate_request_id();
        let second = inner.allocate_request_id();
        let third = inner.allocate_request_id();
        assert_eq!(first, u32::MAX);
        assert_ne!(second, 0);
        assert_eq!(second, 1);
        assert_eq!(third, 2);
    }

    #[test]
    fn request_id_wraparound_is_race_free_under_concurrency() {
        init();
        let inner = Arc::new(Inner {
            closed: std::sync::atomic::AtomicBool::new(false),
            next_request_id: AtomicU32::new(u32::MAX - 8),
            next_subscription_id: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
            notifications: Mutex::new(HashMap::new()),
            outbound: async_channel::bounded(1).0,
            timeout_policy: RequestTimeoutPolicy::default(),
        });

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let inner = Arc::clone(&inner);
                std::thread::spawn(move || {
                    (0..64).map(|_| inner.allocate_request_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.extend(handle.join().unwrap());
        }

        assert!(ids.iter().all(|&id| id != 0));
        let unique: std::collections::HashSet<u32> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len(), "allocate_request_id handed out a duplicate id across the wraparound");
    }

    #[test]
    fn request_times_out_and_clears_in_flight_table() {
        init();
        let executor = Arc::new(Executor::new());
        future::block_on(executor.run(async {
            let (client_writer, worker_reader) = async_pipe_pair();
            let (worker_writer, client_reader) = async_pipe_pair();
            // Worker side never responds; drop its ends immediately so reads park forever
            // instead of returning EOF, simulating a blocked worker.
            std::mem::forget(worker_reader);
            std::mem::forget(worker_writer);

            let channel = Channel::new(
                Arc::clone(&executor),
                client_reader,
                client_writer,
                FramingMode::SizePrefixed,
                RequestTimeoutPolicy::new(Duration::from_millis(10), Duration::from_millis(1)),
            );

            let result = channel.request("handler", Ping).await;
            assert!(matches!(result, Err(ChannelError::Timeout)));
        }));
    }

    /// Minimal in-memory duplex byte stream pair for tests, standing in for the worker pipes.
    fn async_pipe_pair() -> (
        impl AsyncWrite + Unpin + Send + 'static,
        impl AsyncRead + Unpin + Send + 'static,
    ) {
        let (tx, rx) = async_channel::unbounded::<Vec<u8>>();
        (ChannelWriter(tx), ChannelReader(rx, Vec::new()))
    }

    struct ChannelWriter(async_channel::Sender<Vec<u8>>);

    impl AsyncWrite for ChannelWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            let _ = self.0.try_send(buf.to_vec());
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_close(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    struct ChannelReader(async_channel::Receiver<Vec<u8>>, Vec<u8>);

    impl AsyncRead for ChannelReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut [u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            if self.1.is_empty() {
                match self.0.try_recv() {
                    Ok(chunk) => self.1 = chunk,
                    Err(async_channel::TryRecvError::Empty) => {
                        cx.waker().wake_by_ref();
                        return std::task::Poll::Pending;
                    }
                    Err(async_channel::TryRecvError::Closed) => {
                        return std::task::Poll::Ready(Ok(0))
                    }
                }
            }
            let n = buf.len().min(self.1.len());
            buf[..n].copy_from_slice(&self.1[..n]);
            self.1.drain(..n);
            std::task::Poll::Ready(Ok(n))
        }
    }
}
