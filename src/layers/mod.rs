pub mod charging;
pub mod neighbor_discovery;
pub mod platoon;
pub mod provider_announce;

pub use charging::{ChargingCoordination, GridState, Role, Session, SessionId};
pub use neighbor_discovery::NeighborDiscovery;
pub use platoon::{EdgeGraph, PlatoonCoordination, PlatoonMember};
pub use provider_announce::ProviderAnnounce;
