//! MVCCP core: a deterministic, simulation-time-driven protocol engine for
//! multi-hop VANET charging coordination. Neighbor discovery builds a
//! QoS-weighted OLSR MPR set; provider announcements flood through that MPR
//! set with TTL and dedup; a four-way handshake coordinates charging
//! sessions between consumers and providers; platoon coordination layers an
//! intra-platoon energy-routing graph and inter-platoon discovery on top.
//!
//! This crate has no clock of its own, opens no sockets, and spawns no
//! threads — every unit of work happens inside `tick`, `receive`, or
//! `apply_mobility_and_energy`, driven by a harness that owns real time and
//! the transport.

pub mod codec;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod layers;
pub mod metrics;
pub mod tables;

pub use config::{ProtocolConfig, TtlMode};
pub use context::{Context, NodeState, Position, Velocity};
pub use dispatch::{Engine, Sink};
pub use error::{CoreError, CoreResult};
pub use identity::NodeIdentity;
pub use layers::{ChargingCoordination, NeighborDiscovery, PlatoonCoordination, ProviderAnnounce, Role, SessionId};
pub use metrics::Stats;
