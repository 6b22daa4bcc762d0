use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use tracing::{debug, info, trace, warn};

use super::{receive, send};
use crate::{
    config::SessionConfig,
    error::{Error, Result},
    ledger::TeamLedger,
    lobby::GameSetup,
    mapping::{MAX_ID_GAP, NetId, ObjectMapping},
    packet::{
        CharaState, FrameStart, GameInit, GameResult, NetPacket, UnitOrders, UnitPop, UnitState,
    },
    socket::Socket,
    transport::lock,
    world::{GameOutcome, LogEvent, RoomId, UnitKey, World},
};

/// Stats the host computed for a unit. Reads of power, speed and intelligence
/// on a follower go through this instead of the local simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusOverride {
    pub power: i32,
    pub speed: i32,
    pub intelligence: i32,
}

/// An order the local player issued through the simulation's normal input path.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalOrder {
    Command { unit: UnitKey, action: String },
    MoveTo { unit: UnitKey, room: RoomId },
}

#[derive(Debug, Default)]
struct Tap {
    /// Set while inbound state is being applied.
    applying: bool,
    orders: Vec<LocalOrder>,
}

/// Shared handle the simulation calls when the local player gives an order.
///
/// Orders raised while the follower is applying host state are echoes of
/// that state and are ignored.
#[derive(Debug, Clone, Default)]
pub struct OrderTap {
    inner: Arc<Mutex<Tap>>,
}

impl OrderTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(&self, unit: UnitKey, action: &str) {
        self.push(LocalOrder::Command {
            unit,
            action: action.to_string(),
        });
    }

    pub fn move_to(&self, unit: UnitKey, room: RoomId) {
        self.push(LocalOrder::MoveTo { unit, room });
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner).orders.len()
    }

    pub fn is_applying(&self) -> bool {
        lock(&self.inner).applying
    }

    fn push(&self, order: LocalOrder) {
        let mut tap = lock(&self.inner);
        if tap.applying {
            trace!(?order, "ignoring echoed order");
            return;
        }
        tap.orders.push(order);
    }

    fn set_applying(&self, applying: bool) {
        lock(&self.inner).applying = applying;
    }

    fn drain(&self) -> Vec<LocalOrder> {
        std::mem::take(&mut lock(&self.inner).orders)
    }
}

/// Order in which the packets of one frame are applied.
fn phase(packet: &NetPacket) -> u8 {
    match packet {
        NetPacket::GameInit(_) => 0,
        NetPacket::FrameStart(_) => 1,
        NetPacket::RoomState(_) => 2,
        NetPacket::CharaState(_) => 3,
        NetPacket::UnitPop(_) => 4,
        NetPacket::UnitState(_) => 5,
        NetPacket::UnitDeath(_) => 6,
        NetPacket::FrameComplete => 8,
        _ => 7,
    }
}

/// Mirror side of a running game.
pub struct FollowerReplicator<W: World> {
    world: W,
    config: SessionConfig,
    setup: GameSetup,
    link: Socket,
    units: ObjectMapping<UnitKey>,
    charas: ObjectMapping<String>,
    /// Packets received but not yet terminated by a `FrameComplete`.
    inbox: Vec<NetPacket>,
    overrides: HashMap<UnitKey, StatusOverride>,
    /// Units whose position must be recomputed once the batch is applied.
    reposition: BTreeSet<UnitKey>,
    tap: OrderTap,
    tick: u64,
    frames: u64,
    outcome: Option<GameOutcome>,
    closed: bool,
}

impl<W: World> FollowerReplicator<W> {
    pub fn new(mut world: W, config: SessionConfig, setup: GameSetup, link: Socket) -> Self {
        let tap = OrderTap::new();
        world.install_order_tap(tap.clone());
        world.set_clubs(setup.clubs.clone());
        Self {
            world,
            config,
            setup,
            link,
            units: ObjectMapping::new(),
            charas: ObjectMapping::new(),
            inbox: Vec::new(),
            overrides: HashMap::new(),
            reposition: BTreeSet::new(),
            tap,
            tick: 0,
            frames: 0,
            outcome: None,
            closed: false,
        }
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn setup(&self) -> &GameSetup {
        &self.setup
    }

    /// Handle to give to the simulation's input path.
    pub fn order_tap(&self) -> OrderTap {
        self.tap.clone()
    }

    /// Host stats for `unit`, once its state has been received.
    pub fn status_override(&self, unit: UnitKey) -> Option<StatusOverride> {
        self.overrides.get(&unit).copied()
    }

    /// Local unit behind a wire id.
    pub fn unit_key(&self, id: NetId) -> Option<UnitKey> {
        self.units.try_get(id).copied()
    }

    pub fn unit_id(&self, unit: UnitKey) -> Option<NetId> {
        self.units.try_id_of(&unit)
    }

    /// Host tick of the last applied frame.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Number of complete frames applied so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Packets waiting for their `FrameComplete`.
    pub fn buffered(&self) -> usize {
        self.inbox.len()
    }

    pub fn outcome(&self) -> Option<GameOutcome> {
        self.outcome
    }

    /// Drive replication. Call once per frame.
    pub fn update(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.step();
        if result.is_err() {
            self.shutdown();
        }
        result
    }

    fn step(&mut self) -> Result<()> {
        for packet in receive(&mut self.link, usize::MAX) {
            self.accept(packet);
        }
        self.apply_complete_frames();
        self.send_orders();
        self.link.flush();
        if self.link.error_state() {
            return Err(Error::ConnectionLost("lost connection to the host".into()));
        }
        Ok(())
    }

    /// Feed one packet into the follower as if it had arrived from the host.
    pub fn accept(&mut self, packet: NetPacket) {
        match packet {
            NetPacket::GameResult(result) => self.game_result(result),
            NetPacket::Lobby(packet) => debug!(?packet, "ignoring lobby packet in game"),
            NetPacket::UnitOrders(_) => warn!("ignoring orders from the host"),
            packet => self.inbox.push(packet),
        }
    }

    fn apply_complete_frames(&mut self) {
        let Some(last) = self
            .inbox
            .iter()
            .rposition(|p| matches!(p, NetPacket::FrameComplete))
        else {
            return;
        };
        let ready: Vec<NetPacket> = self.inbox.drain(..=last).collect();

        self.tap.set_applying(true);
        let mut frame = Vec::new();
        for packet in ready {
            let complete = matches!(packet, NetPacket::FrameComplete);
            frame.push(packet);
            if complete {
                self.apply_frame(std::mem::take(&mut frame));
            }
        }
        for unit in std::mem::take(&mut self.reposition) {
            if self.world.unit(unit).is_some() {
                self.world.reposition(unit);
            }
        }
        self.tap.set_applying(false);
    }

    fn apply_frame(&mut self, mut frame: Vec<NetPacket>) {
        // stable, so same-phase packets keep their arrival order
        frame.sort_by_key(phase);
        for packet in frame {
            let kind = packet.kind();
            if let Err(e) = self.apply(packet) {
                warn!(kind, error = %e, "dropping packet");
            }
        }
        self.frames += 1;
    }

    fn apply(&mut self, packet: NetPacket) -> Result<()> {
        match packet {
            NetPacket::GameInit(init) => self.game_init(init),
            NetPacket::FrameStart(start) => self.frame_start(start),
            NetPacket::RoomState(room) => {
                if self.world.has_room(room.id) {
                    self.world.set_room_state(&room);
                } else {
                    warn!(room = room.id, "state for an unknown room");
                }
            }
            NetPacket::CharaState(chara) => self.chara_state(chara)?,
            NetPacket::UnitPop(pop) => self.unit_pop(pop)?,
            NetPacket::UnitState(state) => self.unit_state(state)?,
            NetPacket::UnitDeath(death) => {
                let key = *self.units.get(death.unit)?;
                debug!(unit = death.unit, %key, "unit died");
                self.world.remove_unit(key);
                self.units.destroy(&key)?;
                self.overrides.remove(&key);
                self.reposition.remove(&key);
            }
            NetPacket::LogCreateMessage(message) => {
                self.world.post_log(&LogEvent::Message(message))
            }
            NetPacket::LogCreateGetMessage(message) => self.world.post_log(&LogEvent::Get(message)),
            NetPacket::FrameComplete => {
                let rooms = self.world.rooms();
                let income =
                    TeamLedger::income(&rooms, self.setup.my_team, self.config.income_per_room);
                self.world.set_money_increment(income);
            }
            NetPacket::CharaChara(chara) => debug!(name = %chara.name, "roster entry in game"),
            other => warn!(kind = other.kind(), "unexpected packet in frame"),
        }
        Ok(())
    }

    fn game_init(&mut self, init: GameInit) {
        info!(team = init.your_index, teams = init.clubs.len(), "game init");
        self.world.clear_population();
        self.units.clear();
        self.charas.clear();
        self.overrides.clear();
        self.reposition.clear();
        if init.your_index != self.setup.my_team {
            warn!(
                lobby = self.setup.my_team,
                host = init.your_index,
                "host assigned a different team"
            );
            self.setup.my_team = init.your_index;
        }
        self.world.set_clubs(init.clubs.clone());
        self.setup.clubs = init.clubs;
        self.setup.player_names = init.player_names;
    }

    fn frame_start(&mut self, start: FrameStart) {
        self.tick = start.tick;
        self.world.set_clock(start.clock);
        if let Some(&money) = start.money.get(self.setup.my_team as usize) {
            self.world.set_money(money);
        }
    }

    fn chara_state(&mut self, chara: CharaState) -> Result<()> {
        trace!(id = chara.id, name = %chara.stats.name, "character");
        self.charas.set(chara.id, chara.stats.name.clone())?;
        self.world.insert_character(chara.stats);
        Ok(())
    }

    fn unit_pop(&mut self, pop: UnitPop) -> Result<()> {
        if let Some(&key) = self.units.try_get(pop.unit)
            && self.world.unit(key).is_some()
        {
            trace!(unit = pop.unit, "unit already popped");
            return Ok(());
        }
        let name = self.charas.get(pop.chara)?.clone();
        if pop.unit as usize > self.units.len() + MAX_ID_GAP {
            return Err(Error::Malformed(format!("unit id {} out of range", pop.unit)));
        }
        let key = self.world.pop_unit(&name, pop.team)?;
        debug!(unit = pop.unit, %key, team = pop.team, character = %name, "unit popped");
        self.units.set(pop.unit, key)
    }

    fn unit_state(&mut self, state: UnitState) -> Result<()> {
        let key = *self.units.get(state.unit)?;
        let before = self.world.unit(key).ok_or(Error::UnknownId(state.unit))?;
        let mut old_neighbours = before
            .in_room
            .map(|room| self.world.occupants(room))
            .unwrap_or_default();
        if let Some(way) = before.way {
            old_neighbours.extend(self.world.waypoint_occupants(way));
        }

        self.world.detach_from_room(key);
        self.world.set_energy(key, state.energy, state.energy_max);
        let in_room = self.known_room(state.in_room);
        self.world.set_in_room(key, in_room);
        let last_room = self.known_room(state.last_room);
        self.world.set_last_room(key, last_room);
        self.world.set_team(key, state.team);
        if self.config.is_continuous(&state.action_name) {
            self.world.set_action_raw(key, &state.action_name);
        } else {
            self.world.set_command(key, &state.action_name);
        }
        // the action setter resets progress
        self.world.set_action_progress(key, state.action_progress);
        let target_room = self.known_room(state.target_room);
        self.world.set_target_room(key, target_room);
        let way = state.way.filter(|way| self.world.has_waypoint(*way));
        if way.is_none() && state.way.is_some() {
            debug!(unit = state.unit, way = ?state.way, "unknown waypoint");
        }
        self.world.set_way(key, way);
        self.world.set_leader(key, state.is_leader);
        self.overrides.insert(
            key,
            StatusOverride {
                power: state.power,
                speed: state.speed,
                intelligence: state.intelligence,
            },
        );

        if before.in_room != in_room || before.way != way {
            self.reposition.insert(key);
            self.reposition.extend(old_neighbours);
            if let Some(room) = in_room {
                self.reposition.extend(self.world.occupants(room));
            }
            if let Some(way) = way {
                self.reposition.extend(self.world.waypoint_occupants(way));
            }
        }
        self.world.refresh_view(key);
        Ok(())
    }

    fn known_room(&self, room: Option<RoomId>) -> Option<RoomId> {
        room.filter(|room| self.world.has_room(*room))
    }

    fn game_result(&mut self, result: GameResult) {
        if self.outcome.is_some() {
            return;
        }
        let outcome = GameOutcome::from(result);
        info!(?outcome, team = self.setup.my_team, "game over");
        self.outcome = Some(outcome);
        self.world.game_over(outcome, self.setup.my_team);
    }

    fn send_orders(&mut self) {
        for order in self.tap.drain() {
            let (unit, orders) = match order {
                LocalOrder::Command { unit, action } => (
                    unit,
                    UnitOrders {
                        unit: 0,
                        move_to: None,
                        command: Some(action),
                    },
                ),
                LocalOrder::MoveTo { unit, room } => (
                    unit,
                    UnitOrders {
                        unit: 0,
                        move_to: Some(room),
                        command: None,
                    },
                ),
            };
            let Some(id) = self.units.try_id_of(&unit) else {
                debug!(%unit, "dropping order for an unsynced unit");
                continue;
            };
            send(
                &mut self.link,
                &NetPacket::UnitOrders(UnitOrders { unit: id, ..orders }),
            );
        }
    }

    /// Close the host link and forget all wire ids. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("follower replication stopped");
        self.link.dispose();
        self.units.clear();
        self.charas.clear();
        self.inbox.clear();
        self.overrides.clear();
        self.reposition.clear();
        self.tap.drain();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
