//! SFU control plane core: worker process supervision, channel protocol, router/transport
//! topology, ORTC capability negotiation, and the room/peer signaling layer built on top of it.
//!
//! The crate never talks to a browser or websocket library directly (see `spec.md` §1
//! Non-goals); `room` exposes a transport-agnostic protocol and orchestrator that an outer
//! binary wires to its own websocket stack.

#[macro_use]
mod macros;

pub mod config;
pub mod data_structures;
pub mod error;
mod messages;
pub mod ortc;
pub mod room;
pub mod router;
pub mod rtp_parameters;
pub mod scalability_mode;
pub mod sctp_parameters;
pub mod supported_rtp_capabilities;
pub mod worker;
pub mod worker_manager;

pub use config::Config;
pub use room::Room;
pub use router::Router;
pub use worker::Worker;
pub use worker_manager::WorkerManager;
