mod config;
mod error;
#[cfg(feature = "iroh")]
mod iroh;
mod ledger;
mod lobby;
mod mapping;
mod members;
mod packet;
mod replication;
mod sandbox;
mod session;
mod socket;
mod transport;
mod world;

pub use config::{MAX_MEMBERS, SessionConfig};
pub use error::{Error, Result};
#[cfg(feature = "iroh")]
pub use iroh::{ALPN, IrohNetwork};
pub use ledger::TeamLedger;
pub use lobby::{
    DirectRendezvous, Directory, GameSetup, Lobby, LobbyEvent, LobbyState, Rendezvous, RoomCode,
    finalize_clubs,
};
pub use mapping::{NetId, ObjectMapping};
pub use members::{Member, MemberEvent, MemberSet, MemberState};
pub use packet::{
    CharaChara, CharaState, FrameStart, GameInit, GameResult, LobbyPacket, NetPacket,
    PROTOCOL_VERSION, UnitDeath, UnitOrders, UnitPop, UnitState, decode, encode,
};
pub use replication::{FollowerReplicator, HostReplicator, LocalOrder, OrderTap, StatusOverride};
pub use sandbox::SandboxWorld;
pub use session::{GameHandoff, GameSession};
pub use socket::Socket;
pub use transport::{Link, LinkStatus, Listener, MemoryNetwork, Network, SendError};
pub use world::{
    CharacterStats, Clock, GameOutcome, GetMessage, LogEvent, LogMessage, Rgba, RoomId,
    RoomSnapshot, TeamIndex, UnitKey, UnitSnapshot, WaypointId, World,
};
