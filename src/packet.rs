//! Wire messages.
//!
//! Every transport message is one [`NetPacket`]: a version byte followed by
//! the postcard encoding of the enum. Variant order is the wire tag.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    mapping::NetId,
    members::MemberState,
    world::{
        CharacterStats, Clock, GameOutcome, GetMessage, LogMessage, RoomId, RoomSnapshot,
        TeamIndex, WaypointId,
    },
};

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum NetPacket {
    GameInit(GameInit),
    UnitPop(UnitPop),
    CharaState(CharaState),
    UnitState(UnitState),
    RoomState(RoomSnapshot),
    FrameStart(FrameStart),
    FrameComplete,
    LogCreateMessage(LogMessage),
    LogCreateGetMessage(GetMessage),
    Lobby(LobbyPacket),
    UnitOrders(UnitOrders),
    GameResult(GameResult),
    UnitDeath(UnitDeath),
    CharaChara(CharaChara),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum LobbyPacket {
    /// A member's own state, pushed upstream.
    MemberState(MemberState),
    StartGame {
        team_index: TeamIndex,
        clubs: Vec<String>,
    },
    AckStartGame,
    MemberSync {
        slot: u8,
        state: MemberState,
    },
    MemberDrop {
        slot: u8,
    },
    /// Host to follower: your slot. Follower to host on a game link: my slot.
    Hello {
        index: u8,
    },
    Renumber {
        from: u8,
        to: u8,
    },
    /// Start signal carrying the host's game address.
    Prepare {
        address: String,
    },
    /// Host to joiner: every slot is taken.
    Full,
}

/// Sent first in a full sync; the receiver wipes its population.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GameInit {
    /// Indexed by team.
    pub clubs: Vec<String>,
    pub player_names: Vec<String>,
    pub your_index: TeamIndex,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitPop {
    pub team: TeamIndex,
    pub chara: NetId,
    pub unit: NetId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CharaState {
    pub id: NetId,
    pub stats: CharacterStats,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnitState {
    pub unit: NetId,
    pub energy: i32,
    pub energy_max: i32,
    pub in_room: Option<RoomId>,
    pub last_room: Option<RoomId>,
    pub team: TeamIndex,
    pub action_progress: f32,
    pub action_name: String,
    pub target_room: Option<RoomId>,
    pub target_way: Option<WaypointId>,
    pub way: Option<WaypointId>,
    pub is_leader: bool,
    pub power: i32,
    pub speed: i32,
    pub intelligence: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrameStart {
    pub tick: u64,
    pub clock: Clock,
    /// Indexed by team.
    pub money: Vec<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnitOrders {
    pub unit: NetId,
    pub move_to: Option<RoomId>,
    pub command: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameResult {
    /// `None` is a draw.
    pub winner: Option<TeamIndex>,
}

impl From<GameOutcome> for GameResult {
    fn from(outcome: GameOutcome) -> Self {
        Self {
            winner: outcome.winner(),
        }
    }
}

impl From<GameResult> for GameOutcome {
    fn from(result: GameResult) -> Self {
        match result.winner {
            Some(team) => GameOutcome::Winner(team),
            None => GameOutcome::Draw,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitDeath {
    pub unit: NetId,
}

/// A roster entry: one unlockable character and its gear.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CharaChara {
    pub name: String,
    pub effort: i32,
    pub items: Vec<String>,
    pub owned: bool,
}

impl From<LobbyPacket> for NetPacket {
    fn from(packet: LobbyPacket) -> Self {
        NetPacket::Lobby(packet)
    }
}

impl NetPacket {
    pub fn kind(&self) -> &'static str {
        match self {
            NetPacket::GameInit(_) => "GameInit",
            NetPacket::UnitPop(_) => "UnitPop",
            NetPacket::CharaState(_) => "CharaState",
            NetPacket::UnitState(_) => "UnitState",
            NetPacket::RoomState(_) => "RoomState",
            NetPacket::FrameStart(_) => "FrameStart",
            NetPacket::FrameComplete => "FrameComplete",
            NetPacket::LogCreateMessage(_) => "LogCreateMessage",
            NetPacket::LogCreateGetMessage(_) => "LogCreateGetMessage",
            NetPacket::Lobby(_) => "Lobby",
            NetPacket::UnitOrders(_) => "UnitOrders",
            NetPacket::GameResult(_) => "GameResult",
            NetPacket::UnitDeath(_) => "UnitDeath",
            NetPacket::CharaChara(_) => "CharaChara",
        }
    }
}

pub fn encode(packet: &NetPacket) -> Result<Bytes> {
    let body = postcard::to_stdvec(packet)?;
    let mut frame = BytesMut::with_capacity(1 + body.len());
    frame.put_u8(PROTOCOL_VERSION);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

pub fn decode(frame: &[u8]) -> Result<NetPacket> {
    let (&version, body) = frame.split_first().ok_or(Error::EmptyPacket)?;
    if version != PROTOCOL_VERSION {
        return Err(Error::ProtocolVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}
