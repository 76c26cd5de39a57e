//! Shared surface for RTP observers (audio level / active speaker) that watch a set of producers
//! without forwarding media themselves (`spec.md` §4.8).

use crate::data_structures::RtpObserverInternal;
use crate::error::ChannelError;
use crate::messages::{
    RtpObserverAddProducerRequest, RtpObserverAddRemoveProducerData, RtpObserverCloseRequest,
    RtpObserverPauseRequest, RtpObserverRemoveProducerRequest, RtpObserverResumeRequest,
};
use crate::router::producer::ProducerId;
use crate::router::RouterId;
use crate::uuid_based_wrapper_type;
use crate::worker::channel::Channel;
use event_listener_primitives::HandlerId;
use std::fmt::Debug;

uuid_based_wrapper_type!(
    /// RTP observer identifier, unique within its router.
    RtpObserverId
);

/// Common operations every RTP observer kind (audio level, active speaker) exposes.
pub(crate) trait RtpObserver: Debug + Send + Sync {
    fn id(&self) -> RtpObserverId;
    fn router_id(&self) -> RouterId;
    fn channel(&self) -> &Channel;
    fn paused(&self) -> bool;
    fn closed(&self) -> bool;
    fn on_close(&self, callback: Box<dyn FnOnce() + Send>) -> HandlerId;

    fn internal(&self) -> RtpObserverInternal {
        RtpObserverInternal {
            router_id: self.router_id(),
            rtp_observer_id: self.id(),
        }
    }
}

/// What a router's RTP observer registry stores (mirrors [`crate::router::transport::WeakTransport`]).
pub(crate) trait WeakRtpObserver: Debug + Send + Sync {
    fn upgrade(&self) -> Option<Box<dyn RtpObserver>>;
}

pub(crate) async fn close(channel: &Channel, internal: RtpObserverInternal) -> Result<(), ChannelError> {
    channel
        .request(internal.rtp_observer_id.to_string(), RtpObserverCloseRequest { internal })
        .await
}

pub(crate) async fn pause(channel: &Channel, internal: RtpObserverInternal) -> Result<(), ChannelError> {
    channel
        .request(internal.rtp_observer_id.to_string(), RtpObserverPauseRequest { internal })
        .await
}

pub(crate) async fn resume(channel: &Channel, internal: RtpObserverInternal) -> Result<(), ChannelError> {
    channel
        .request(internal.rtp_observer_id.to_string(), RtpObserverResumeRequest { internal })
        .await
}

pub(crate) async fn add_producer(
    channel: &Channel,
    internal: RtpObserverInternal,
    producer_id: ProducerId,
) -> Result<(), ChannelError> {
    channel
        .request(
            internal.rtp_observer_id.to_string(),
            RtpObserverAddProducerRequest {
                internal,
                data: RtpObserverAddRemoveProducerData { producer_id },
            },
        )
        .await
}

pub(crate) async fn remove_producer(
    channel: &Channel,
    internal: RtpObserverInternal,
    producer_id: ProducerId,
) -> Result<(), ChannelError> {
    channel
        .request(
            internal.rtp_observer_id.to_string(),
            RtpObserverRemoveProducerRequest {
                internal,
                data: RtpObserverAddRemoveProducerData { producer_id },
            },
        )
        .await
}
