use tracing::{debug, info, warn};

use super::{receive, send};
use crate::{
    config::SessionConfig,
    error::{Error, Result},
    ledger::TeamLedger,
    lobby::GameSetup,
    mapping::ObjectMapping,
    packet::{
        CharaState, FrameStart, GameInit, GameResult, LobbyPacket, NetPacket, UnitOrders, UnitPop,
        UnitState,
    },
    socket::Socket,
    world::{GameOutcome, LogEvent, TeamIndex, UnitKey, UnitSnapshot, World},
};

struct Peer {
    team: TeamIndex,
    socket: Socket,
    /// Whether this peer has received its full sync.
    synced: bool,
}

/// Authoritative side of a running game.
pub struct HostReplicator<W: World> {
    world: W,
    config: SessionConfig,
    setup: GameSetup,
    peers: Vec<Peer>,
    units: ObjectMapping<UnitKey>,
    charas: ObjectMapping<String>,
    ledger: TeamLedger,
    tick: u64,
    sync_requested: bool,
    /// Log packets raised since the last incremental sync.
    adhoc: Vec<NetPacket>,
    outcome: Option<GameOutcome>,
    closed: bool,
}

impl<W: World> HostReplicator<W> {
    pub fn new(
        mut world: W,
        config: SessionConfig,
        setup: GameSetup,
        links: Vec<(TeamIndex, Socket)>,
    ) -> Self {
        world.set_clubs(setup.clubs.clone());
        let teams = setup.clubs.len().max(setup.player_names.len());
        let peers = links
            .into_iter()
            .map(|(team, socket)| Peer {
                team,
                socket,
                synced: false,
            })
            .collect();
        Self {
            world,
            config,
            setup,
            peers,
            units: ObjectMapping::new(),
            charas: ObjectMapping::new(),
            ledger: TeamLedger::new(teams),
            tick: 0,
            sync_requested: false,
            adhoc: Vec::new(),
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

    pub fn ledger(&self) -> &TeamLedger {
        &self.ledger
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn outcome(&self) -> Option<GameOutcome> {
        self.outcome
    }

    /// Wire id of a live unit, once it has been announced.
    pub fn unit_id(&self, unit: UnitKey) -> Option<u32> {
        self.units.try_id_of(&unit)
    }

    /// Call when the simulation completes a tick.
    pub fn after_tick(&mut self) {
        self.sync_requested = true;
    }

    /// Forward a log line raised by the simulation with the next tick.
    pub fn enqueue_log(&mut self, event: LogEvent) {
        let packet = match event {
            LogEvent::Message(message) => NetPacket::LogCreateMessage(message),
            LogEvent::Get(message) => NetPacket::LogCreateGetMessage(message),
        };
        self.adhoc.push(packet);
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
        self.ingest_orders();
        if self.sync_requested {
            self.sync_requested = false;
            self.incremental_sync();
            self.detect_game_end();
        }
        self.full_sync_new_peers();
        self.flush()
    }

    fn ingest_orders(&mut self) {
        let limit = self.config.max_packets_per_tick;
        let mut inbound = Vec::new();
        for peer in self.peers.iter_mut() {
            for packet in receive(&mut peer.socket, limit) {
                inbound.push((peer.team, packet));
            }
        }
        for (team, packet) in inbound {
            match packet {
                NetPacket::UnitOrders(orders) => self.apply_orders(team, orders),
                NetPacket::Lobby(LobbyPacket::AckStartGame) => {
                    debug!(team, "start acknowledged")
                }
                other => warn!(team, kind = other.kind(), "unexpected packet from follower"),
            }
        }
    }

    fn apply_orders(&mut self, team: TeamIndex, orders: UnitOrders) {
        let Some(&key) = self.units.try_get(orders.unit) else {
            warn!(team, unit = orders.unit, "order for an unknown unit");
            return;
        };
        let Some(unit) = self.world.unit(key) else {
            warn!(team, unit = orders.unit, "order for a dead unit");
            return;
        };
        if unit.team != team {
            warn!(team, owner = unit.team, unit = orders.unit, "order for someone else's unit");
            return;
        }
        if let Some(action) = orders.command.as_deref() {
            debug!(team, %key, action, "command");
            self.world.set_command(key, action);
        }
        if let Some(room) = orders.move_to {
            if self.world.has_room(room) {
                debug!(team, %key, room, "move");
                self.world.move_to(key, room);
            } else {
                warn!(team, room, "move to an unknown room");
            }
        }
    }

    fn full_sync_new_peers(&mut self) {
        if self.peers.iter().all(|p| p.synced) {
            return;
        }
        let already_synced = self.peers.iter().any(|p| p.synced);
        let mut announced = Vec::new();
        let mut body = self.frame_start();
        for room in self.world.rooms() {
            body.push(NetPacket::RoomState(room));
        }
        for stats in self.world.characters() {
            let newly_mapped = !self.charas.contains(&stats.name);
            let id = self.charas.add_or_get(stats.name.clone());
            let packet = NetPacket::CharaState(CharaState { id, stats });
            if newly_mapped && already_synced {
                announced.push(packet.clone());
            }
            body.push(packet);
        }
        for unit in self.world.units() {
            let newly_mapped = !self.units.contains(&unit.key);
            let mut packets = Vec::new();
            if self.unit_packets(&unit, true, &mut packets).is_err() {
                continue;
            }
            // synced peers learn about this unit with the next tick
            if newly_mapped && already_synced {
                announced.extend(
                    packets
                        .iter()
                        .filter(|p| matches!(p, NetPacket::CharaState(_) | NetPacket::UnitPop(_)))
                        .cloned(),
                );
            }
            body.extend(packets);
        }
        body.push(NetPacket::FrameComplete);
        self.adhoc.extend(announced);

        for peer in self.peers.iter_mut().filter(|p| !p.synced) {
            info!(team = peer.team, packets = body.len() + 1, "full sync");
            let init = NetPacket::GameInit(GameInit {
                clubs: self.setup.clubs.clone(),
                player_names: self.setup.player_names.clone(),
                your_index: peer.team,
            });
            send(&mut peer.socket, &init);
            for packet in &body {
                send(&mut peer.socket, packet);
            }
            peer.synced = true;
        }
    }

    fn incremental_sync(&mut self) {
        let host_team = self.setup.my_team;
        let rooms = self.world.rooms();
        self.ledger.set(host_team, self.world.money());
        self.ledger
            .apply_income(&rooms, self.config.income_per_room, host_team);
        self.tick += 1;

        let mut batch = self.frame_start();
        batch.extend(rooms.into_iter().map(NetPacket::RoomState));
        for unit in self.world.units() {
            let _ = self.unit_packets(&unit, false, &mut batch);
        }
        batch.append(&mut self.adhoc);
        batch.push(NetPacket::FrameComplete);

        for peer in self.peers.iter_mut().filter(|p| p.synced) {
            for packet in &batch {
                send(&mut peer.socket, packet);
            }
        }
    }

    fn frame_start(&self) -> Vec<NetPacket> {
        vec![NetPacket::FrameStart(FrameStart {
            tick: self.tick,
            clock: self.world.clock(),
            money: self.ledger.to_vec(),
        })]
    }

    /// Packets announcing one unit: its template and pop when needed, then its state.
    fn unit_packets(
        &mut self,
        unit: &UnitSnapshot,
        always_pop: bool,
        out: &mut Vec<NetPacket>,
    ) -> Result<()> {
        let chara = match self.charas.try_id_of(&unit.character) {
            Some(id) => id,
            None => {
                let Some(stats) = self.world.character(&unit.character) else {
                    warn!(unit = %unit.key, character = %unit.character, "unit without a template");
                    return Err(Error::UnknownCharacter(unit.character.clone()));
                };
                let id = self.charas.add(stats.name.clone());
                out.push(NetPacket::CharaState(CharaState { id, stats }));
                id
            }
        };
        let newly_mapped = !self.units.contains(&unit.key);
        let id = self.units.add_or_get(unit.key);
        if always_pop || newly_mapped {
            out.push(NetPacket::UnitPop(UnitPop {
                team: unit.team,
                chara,
                unit: id,
            }));
        }
        out.push(NetPacket::UnitState(UnitState {
            unit: id,
            energy: unit.energy,
            energy_max: unit.energy_max,
            in_room: unit.in_room,
            last_room: unit.last_room,
            team: unit.team,
            action_progress: unit.action_progress,
            action_name: unit.action_name.clone(),
            target_room: unit.target_room,
            target_way: None,
            way: unit.way,
            is_leader: unit.is_leader,
            power: unit.power,
            speed: unit.speed,
            intelligence: unit.intelligence,
        }));
        Ok(())
    }

    fn detect_game_end(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let alive = self.world.units().into_iter().map(|u| u.team);
        let Some(outcome) = GameOutcome::from_survivors(alive) else {
            return;
        };
        info!(?outcome, "game over");
        self.outcome = Some(outcome);
        let result = NetPacket::GameResult(GameResult::from(outcome));
        for peer in self.peers.iter_mut() {
            send(&mut peer.socket, &result);
        }
        self.world.game_over(outcome, self.setup.my_team);
    }

    fn flush(&mut self) -> Result<()> {
        for peer in self.peers.iter_mut() {
            peer.socket.flush();
            if peer.socket.error_state() {
                let name = self
                    .setup
                    .player_names
                    .get(peer.team as usize)
                    .map(String::as_str)
                    .unwrap_or("a player");
                return Err(Error::ConnectionLost(format!("{name} disconnected")));
            }
        }
        Ok(())
    }

    /// Close every link and forget all wire ids. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("host replication stopped");
        for peer in self.peers.iter_mut() {
            peer.socket.dispose();
        }
        self.peers.clear();
        self.units.clear();
        self.charas.clear();
        self.adhoc.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
