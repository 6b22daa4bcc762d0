//! In-memory [`World`] with just enough simulation to exercise replication.
//!
//! Units walk toward their target room and capture the room they stand in;
//! every other action is inert. Commands reset action progress the way a
//! real simulation does.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::{Error, Result},
    ledger::TeamLedger,
    replication::OrderTap,
    world::{
        CharacterStats, Clock, GameOutcome, LogEvent, RoomId, RoomSnapshot, TeamIndex, UnitKey,
        UnitSnapshot, WaypointId, World,
    },
};

const WALK_STEP: f32 = 0.5;
const CAPTURE_STEP: f32 = 0.25;

#[derive(Debug, Default)]
pub struct SandboxWorld {
    rooms: BTreeMap<RoomId, RoomSnapshot>,
    waypoints: BTreeSet<WaypointId>,
    characters: BTreeMap<String, CharacterStats>,
    units: BTreeMap<UnitKey, UnitSnapshot>,
    next_key: u64,
    clock: Clock,
    money: i64,
    money_increment: i64,
    clubs: Vec<String>,
    tap: Option<OrderTap>,
    /// Every log line posted.
    pub log: Vec<LogEvent>,
    /// Set by `game_over`.
    pub outcome: Option<(GameOutcome, TeamIndex)>,
    pub repositioned: Vec<UnitKey>,
    pub refreshed: Vec<UnitKey>,
}

impl SandboxWorld {
    /// A map with the given rooms (all neutral) and waypoints.
    pub fn new(
        rooms: impl IntoIterator<Item = RoomId>,
        waypoints: impl IntoIterator<Item = WaypointId>,
    ) -> Self {
        Self {
            rooms: rooms
                .into_iter()
                .map(|id| {
                    (
                        id,
                        RoomSnapshot {
                            id,
                            domination_team: None,
                            dominance: 0.0,
                            training_power: 0,
                        },
                    )
                })
                .collect(),
            waypoints: waypoints.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Register a character template with flat stats.
    pub fn add_character(&mut self, name: &str, level: i32) {
        self.insert_character(CharacterStats {
            name: name.to_string(),
            display_name: name.to_uppercase(),
            level,
            energy: 100,
            energy_max: 100,
            power: 10 + level,
            speed: 10,
            intelligence: 10,
            ..CharacterStats::default()
        });
    }

    /// Pop a unit of `character` for `team` standing in `room`.
    pub fn spawn(
        &mut self,
        character: &str,
        team: TeamIndex,
        room: Option<RoomId>,
    ) -> Result<UnitKey> {
        let key = self.pop_unit(character, team)?;
        self.set_in_room(key, room);
        Ok(key)
    }

    /// Hand a room to `team`.
    pub fn capture(&mut self, room: RoomId, team: TeamIndex) {
        if let Some(state) = self.rooms.get_mut(&room) {
            state.domination_team = Some(team);
            state.dominance = 1.0;
        }
    }

    pub fn money_increment(&self) -> i64 {
        self.money_increment
    }

    /// Income `team` would earn this tick at `per_room`.
    pub fn income(&self, team: TeamIndex, per_room: i64) -> i64 {
        TeamLedger::income(&self.rooms(), team, per_room)
    }

    /// Advance the simulation by one tick.
    pub fn tick(&mut self) {
        self.clock.minute += 10.0;
        if self.clock.minute >= 60.0 {
            self.clock.minute -= 60.0;
            self.clock.hour += 1;
        }
        if self.clock.hour >= 24 {
            self.clock.hour = 0;
            self.clock.day += 1;
        }
        self.money += self.money_increment;

        let mut captures = Vec::new();
        for unit in self.units.values_mut() {
            match unit.action_name.as_str() {
                "walk" => {
                    unit.action_progress += WALK_STEP;
                    if unit.action_progress >= 1.0 {
                        unit.last_room = unit.in_room;
                        unit.in_room = unit.target_room.take();
                        unit.action_name = "idle".to_string();
                        unit.action_progress = 0.0;
                    }
                }
                "capture" => {
                    unit.action_progress += CAPTURE_STEP;
                    if unit.action_progress >= 1.0 {
                        if let Some(room) = unit.in_room {
                            captures.push((room, unit.team));
                        }
                        unit.action_name = "idle".to_string();
                        unit.action_progress = 0.0;
                    }
                }
                _ => {}
            }
        }
        for (room, team) in captures {
            self.capture(room, team);
        }
    }

    fn unit_mut(&mut self, unit: UnitKey) -> Option<&mut UnitSnapshot> {
        self.units.get_mut(&unit)
    }
}

impl World for SandboxWorld {
    fn clock(&self) -> Clock {
        self.clock
    }

    fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    fn money(&self) -> i64 {
        self.money
    }

    fn set_money(&mut self, money: i64) {
        self.money = money;
    }

    fn set_money_increment(&mut self, amount: i64) {
        self.money_increment = amount;
    }

    fn clubs(&self) -> Vec<String> {
        self.clubs.clone()
    }

    fn set_clubs(&mut self, clubs: Vec<String>) {
        self.clubs = clubs;
    }

    fn rooms(&self) -> Vec<RoomSnapshot> {
        self.rooms.values().cloned().collect()
    }

    fn has_room(&self, room: RoomId) -> bool {
        self.rooms.contains_key(&room)
    }

    fn set_room_state(&mut self, state: &RoomSnapshot) {
        if let Some(room) = self.rooms.get_mut(&state.id) {
            *room = state.clone();
        }
    }

    fn has_waypoint(&self, way: WaypointId) -> bool {
        self.waypoints.contains(&way)
    }

    fn occupants(&self, room: RoomId) -> Vec<UnitKey> {
        self.units
            .values()
            .filter(|u| u.in_room == Some(room))
            .map(|u| u.key)
            .collect()
    }

    fn waypoint_occupants(&self, way: WaypointId) -> Vec<UnitKey> {
        self.units
            .values()
            .filter(|u| u.way == Some(way))
            .map(|u| u.key)
            .collect()
    }

    fn characters(&self) -> Vec<CharacterStats> {
        self.characters.values().cloned().collect()
    }

    fn character(&self, name: &str) -> Option<CharacterStats> {
        self.characters.get(name).cloned()
    }

    fn insert_character(&mut self, stats: CharacterStats) {
        self.characters.insert(stats.name.clone(), stats);
    }

    fn units(&self) -> Vec<UnitSnapshot> {
        self.units.values().cloned().collect()
    }

    fn unit(&self, unit: UnitKey) -> Option<UnitSnapshot> {
        self.units.get(&unit).cloned()
    }

    fn pop_unit(&mut self, character: &str, team: TeamIndex) -> Result<UnitKey> {
        let stats = self
            .characters
            .get(character)
            .ok_or_else(|| Error::UnknownCharacter(character.to_string()))?;
        let key = UnitKey(self.next_key);
        self.next_key += 1;
        let unit = UnitSnapshot {
            key,
            character: stats.name.clone(),
            team,
            energy: stats.energy,
            energy_max: stats.energy_max,
            in_room: None,
            last_room: None,
            action_name: "idle".to_string(),
            action_progress: 0.0,
            target_room: None,
            way: None,
            is_leader: false,
            power: stats.power,
            speed: stats.speed,
            intelligence: stats.intelligence,
        };
        self.units.insert(key, unit);
        Ok(key)
    }

    fn remove_unit(&mut self, unit: UnitKey) {
        self.units.remove(&unit);
    }

    fn clear_population(&mut self) {
        self.units.clear();
        self.characters.clear();
    }

    fn detach_from_room(&mut self, unit: UnitKey) {
        if let Some(unit) = self.unit_mut(unit) {
            unit.in_room = None;
        }
    }

    fn set_energy(&mut self, unit: UnitKey, energy: i32, energy_max: i32) {
        if let Some(unit) = self.unit_mut(unit) {
            unit.energy = energy;
            unit.energy_max = energy_max;
        }
    }

    fn set_in_room(&mut self, unit: UnitKey, room: Option<RoomId>) {
        if let Some(unit) = self.unit_mut(unit) {
            unit.in_room = room;
        }
    }

    fn set_last_room(&mut self, unit: UnitKey, room: Option<RoomId>) {
        if let Some(unit) = self.unit_mut(unit) {
            unit.last_room = room;
        }
    }

    fn set_team(&mut self, unit: UnitKey, team: TeamIndex) {
        if let Some(unit) = self.unit_mut(unit) {
            unit.team = team;
        }
    }

    fn set_command(&mut self, key: UnitKey, action: &str) {
        if let Some(unit) = self.unit_mut(key) {
            unit.action_name = action.to_string();
            unit.action_progress = 0.0;
        }
        if let Some(tap) = &self.tap {
            tap.command(key, action);
        }
    }

    fn set_action_raw(&mut self, unit: UnitKey, action: &str) {
        if let Some(unit) = self.unit_mut(unit) {
            unit.action_name = action.to_string();
        }
    }

    fn set_action_progress(&mut self, unit: UnitKey, progress: f32) {
        if let Some(unit) = self.unit_mut(unit) {
            unit.action_progress = progress;
        }
    }

    fn set_target_room(&mut self, unit: UnitKey, room: Option<RoomId>) {
        if let Some(unit) = self.unit_mut(unit) {
            unit.target_room = room;
        }
    }

    fn set_way(&mut self, unit: UnitKey, way: Option<WaypointId>) {
        if let Some(unit) = self.unit_mut(unit) {
            unit.way = way;
        }
    }

    fn set_leader(&mut self, unit: UnitKey, leader: bool) {
        if let Some(unit) = self.unit_mut(unit) {
            unit.is_leader = leader;
        }
    }

    fn move_to(&mut self, key: UnitKey, room: RoomId) {
        if let Some(unit) = self.unit_mut(key) {
            unit.target_room = Some(room);
            unit.action_name = "walk".to_string();
            unit.action_progress = 0.0;
        }
        if let Some(tap) = &self.tap {
            tap.move_to(key, room);
        }
    }

    fn reposition(&mut self, unit: UnitKey) {
        self.repositioned.push(unit);
    }

    fn refresh_view(&mut self, unit: UnitKey) {
        self.refreshed.push(unit);
    }

    fn post_log(&mut self, event: &LogEvent) {
        self.log.push(event.clone());
    }

    fn game_over(&mut self, outcome: GameOutcome, my_team: TeamIndex) {
        self.outcome = Some((outcome, my_team));
    }

    fn install_order_tap(&mut self, tap: OrderTap) {
        self.tap = Some(tap);
    }
}
