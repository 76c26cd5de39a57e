//! Error kinds for the channel, topology store, peer session and worker handle.
//!
//! Named after the error *kinds* in the spec, not after implementation types: each variant here
//! is returned to callers as-is, nothing is wrapped in a catch-all `anyhow::Error` inside the
//! core (ambient error handling, not `anyhow`, is used all the way out to the room orchestrator;
//! `anyhow` belongs to the outer binary, if anywhere).

use thiserror::Error;

/// Failure modes of [`crate::worker::Channel::request`] and `notify`.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Channel was already closed (or closed while the request was in flight).
    #[error("channel closed")]
    Closed,
    /// Request deadline elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,
    /// Outbound write queue was full.
    #[error("channel backpressure, outbound queue is full")]
    Backpressure,
    /// Framed message exceeded the 4 MiB limit.
    #[error("message too large")]
    TooLarge,
    /// Worker rejected the request with `kind = TypeError` (caller's request was malformed).
    #[error("type error: {0}")]
    TypeError(String),
    /// Worker rejected the request with an opaque reason.
    #[error("worker rejected request: {0}")]
    Remote(String),
}

/// Failure modes of the topology registry.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Attempted to insert an entity id that is already live.
    #[error("duplicate entity id")]
    Duplicate,
    /// Looked up an entity id that doesn't exist (or is already closed).
    #[error("entity not found")]
    NotFound,
    /// `consume()` was attempted with RTP capabilities incompatible with the producer.
    #[error("incompatible RTP capabilities")]
    IncompatibleCapabilities,
}

/// Failure modes surfaced by a [`crate::room::PeerSession`].
#[derive(Debug, Error)]
pub enum PeerError {
    /// Request issued before `join` succeeded, for a method that requires it.
    #[error("peer not yet joined")]
    NotJoined,
    /// Malformed request envelope (missing fields, wrong method, etc.).
    #[error("bad message: {0}")]
    BadMessage(String),
    /// Aggregated incoming message exceeded the configured size limit.
    #[error("message too large")]
    MessageTooLarge,
    /// Request named an entity id (producer/consumer/transport/...) the peer doesn't own or that
    /// doesn't exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The underlying worker/topology operation failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PeerError {
    /// HTTP-style error code used in the peer protocol's error response envelope (`spec.md` §7).
    pub fn error_code(&self) -> u32 {
        match self {
            PeerError::NotJoined => 403,
            PeerError::BadMessage(_) | PeerError::MessageTooLarge => 400,
            PeerError::NotFound(_) => 404,
            PeerError::Internal(_) => 500,
        }
    }
}

/// Failure modes of a [`crate::worker::Worker`] process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Worker exited with code 42: a settings error, fatal and non-retryable.
    #[error("worker exited with a settings error")]
    BadSettings,
    /// Worker exited (or was killed) unexpectedly.
    #[error("worker crashed")]
    Crashed,
}

/// Error produced while generating router RTP capabilities or mapping a producer's parameters.
#[derive(Debug, Error)]
pub enum RtpCapabilitiesError {
    #[error("invalid codec apt parameter: {0}")]
    InvalidApt(String),
    #[error("no matching codec for producer codec with payload type {0}")]
    UnsupportedCodec(u8),
    #[error("duplicate preferred payload type {0}")]
    DuplicatePreferredPayloadType(u8),
    #[error("cannot allocate more dynamic payload types")]
    NoMorePayloadTypesAvailable,
}

/// Failure modes of [`crate::router::transport`]'s `produce()` family of methods.
#[derive(Debug, Error)]
pub enum ProduceError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    RtpCapabilities(#[from] RtpCapabilitiesError),
}

/// Failure modes of [`crate::router::transport`]'s `consume()` family of methods.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// The producer being consumed is no longer registered with the router.
    #[error("producer {0} not found")]
    ProducerNotFound(crate::router::producer::ProducerId),
    /// The consuming side's RTP capabilities can't decode anything the producer sends.
    #[error("consuming client's RTP capabilities are incompatible with the producer")]
    IncompatibleCapabilities,
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    RtpCapabilities(#[from] RtpCapabilitiesError),
}

/// Failure modes of `produce_data()`.
#[derive(Debug, Error)]
pub enum ProduceDataError {
    /// SCTP-capable transports (WebRTC, Plain, Pipe) require SCTP stream parameters.
    #[error("sctp stream parameters are required on this transport")]
    SctpStreamParametersRequired,
    /// A direct transport's data producers carry messages in-process; they can't declare SCTP
    /// stream parameters.
    #[error("sctp stream parameters are not allowed on a direct transport")]
    SctpStreamParametersNotAllowed,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Failure modes of `consume_data()`.
#[derive(Debug, Error)]
pub enum ConsumeDataError {
    /// The data producer being consumed is no longer registered with the router.
    #[error("data producer {0} not found")]
    DataProducerNotFound(crate::router::data_producer::DataProducerId),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
