//! The simulation facade.
//!
//! The replication engines never touch the game directly; the embedding
//! integration implements [`World`] against whatever the game exposes.

use serde::{Deserialize, Serialize};

use crate::{error::Result, replication::OrderTap};

/// Lobby slot, reused as in-game team ownership.
pub type TeamIndex = u8;
pub type RoomId = u32;
pub type WaypointId = u32;

/// Local identity of a live unit. Only meaningful to the owning [`World`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitKey(pub u64);

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Clock {
    pub day: i32,
    pub hour: i32,
    pub minute: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub domination_team: Option<TeamIndex>,
    pub dominance: f32,
    pub training_power: i32,
}

/// Scalar state of a character template.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CharacterStats {
    pub name: String,
    pub display_name: String,
    pub level: i32,
    pub effort: i32,
    pub kind: i32,
    pub energy: i32,
    pub energy_max: i32,
    pub power: i32,
    pub speed: i32,
    pub intelligence: i32,
    pub ap_energy: i32,
    pub ap_power: i32,
    pub ap_speed: i32,
    pub ap_intelligence: i32,
    pub exp: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitSnapshot {
    pub key: UnitKey,
    /// Name of the character template the unit was popped from.
    pub character: String,
    pub team: TeamIndex,
    pub energy: i32,
    pub energy_max: i32,
    pub in_room: Option<RoomId>,
    pub last_room: Option<RoomId>,
    pub action_name: String,
    pub action_progress: f32,
    pub target_room: Option<RoomId>,
    pub way: Option<WaypointId>,
    pub is_leader: bool,
    pub power: i32,
    pub speed: i32,
    pub intelligence: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// A log line the simulation raised on the host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogMessage {
    pub club: String,
    pub color: Rgba,
    pub name: String,
    pub display_name: String,
    pub text: String,
    pub level: i32,
    pub secondary_name: String,
}

/// An "item obtained" style log line.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GetMessage {
    pub name: String,
    pub display_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Message(LogMessage),
    Get(GetMessage),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Winner(TeamIndex),
    Draw,
}

impl GameOutcome {
    /// Decide the outcome from the teams that still own a live unit.
    pub fn from_survivors(teams: impl IntoIterator<Item = TeamIndex>) -> Option<Self> {
        let mut survivors: Vec<TeamIndex> = teams.into_iter().collect();
        survivors.sort_unstable();
        survivors.dedup();
        match survivors.as_slice() {
            [] => Some(GameOutcome::Draw),
            [winner] => Some(GameOutcome::Winner(*winner)),
            _ => None,
        }
    }

    pub fn winner(&self) -> Option<TeamIndex> {
        match self {
            GameOutcome::Winner(team) => Some(*team),
            GameOutcome::Draw => None,
        }
    }
}

/// Everything the replication core reads from or writes to the simulation.
pub trait World {
    fn clock(&self) -> Clock;
    fn set_clock(&mut self, clock: Clock);
    /// Local (single-player) money field.
    fn money(&self) -> i64;
    fn set_money(&mut self, money: i64);
    /// Money the simulation adds at the end of the current tick.
    fn set_money_increment(&mut self, amount: i64);

    fn clubs(&self) -> Vec<String>;
    fn set_clubs(&mut self, clubs: Vec<String>);

    fn rooms(&self) -> Vec<RoomSnapshot>;
    fn has_room(&self, room: RoomId) -> bool;
    fn set_room_state(&mut self, state: &RoomSnapshot);
    fn has_waypoint(&self, way: WaypointId) -> bool;
    /// Units currently standing in `room`.
    fn occupants(&self, room: RoomId) -> Vec<UnitKey>;
    /// Units currently standing on `way`.
    fn waypoint_occupants(&self, way: WaypointId) -> Vec<UnitKey>;

    fn characters(&self) -> Vec<CharacterStats>;
    fn character(&self, name: &str) -> Option<CharacterStats>;
    fn insert_character(&mut self, stats: CharacterStats);

    /// Live units, in a stable order.
    fn units(&self) -> Vec<UnitSnapshot>;
    fn unit(&self, unit: UnitKey) -> Option<UnitSnapshot>;
    fn pop_unit(&mut self, character: &str, team: TeamIndex) -> Result<UnitKey>;
    fn remove_unit(&mut self, unit: UnitKey);
    /// Drop every unit and character template.
    fn clear_population(&mut self);

    fn detach_from_room(&mut self, unit: UnitKey);
    fn set_energy(&mut self, unit: UnitKey, energy: i32, energy_max: i32);
    fn set_in_room(&mut self, unit: UnitKey, room: Option<RoomId>);
    fn set_last_room(&mut self, unit: UnitKey, room: Option<RoomId>);
    fn set_team(&mut self, unit: UnitKey, team: TeamIndex);
    /// Issue a command through the normal path. Resets action progress.
    fn set_command(&mut self, unit: UnitKey, action: &str);
    /// Overwrite the action bookkeeping field without side effects.
    fn set_action_raw(&mut self, unit: UnitKey, action: &str);
    fn set_action_progress(&mut self, unit: UnitKey, progress: f32);
    fn set_target_room(&mut self, unit: UnitKey, room: Option<RoomId>);
    fn set_way(&mut self, unit: UnitKey, way: Option<WaypointId>);
    fn set_leader(&mut self, unit: UnitKey, leader: bool);
    /// Order a unit to walk to `room`.
    fn move_to(&mut self, unit: UnitKey, room: RoomId);

    fn reposition(&mut self, unit: UnitKey);
    fn refresh_view(&mut self, unit: UnitKey);

    fn post_log(&mut self, event: &LogEvent);
    fn game_over(&mut self, outcome: GameOutcome, my_team: TeamIndex);

    /// Called once by a follower. The simulation reports the local player's
    /// commands and moves to `tap`.
    fn install_order_tap(&mut self, _tap: OrderTap) {}
}
