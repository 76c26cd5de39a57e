//! Peer Session (C7) and Room Orchestrator (C8): the conference-level layer built on top of the
//! router/worker machinery below it. `spec.md` §4.7-§4.8.

pub mod orchestrator;
pub mod peer;
pub mod protocol;

pub use orchestrator::{PeerTransport, Room, RoomStats, SharingSlot, VideoProducerQualityController};
pub use peer::{PeerSession, PeerState};
pub use protocol::{ClientRequest, PeerId, ServerNotification, ServerRequest};
