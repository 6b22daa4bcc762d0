use std::{collections::BTreeSet, time::Duration};

use rand::seq::IndexedRandom;
use tracing::{debug, info, warn};

use super::{Deferred, GameSetup, Lobby, LobbyEvent, LobbyState, Role, receive, send};
use crate::{
    error::{Error, Result},
    members::{MemberEvent, MemberSet, MemberState},
    packet::{LobbyPacket, NetPacket},
    session::GameHandoff,
    socket::Socket,
    transport::Listener,
    world::TeamIndex,
};

pub(super) struct HostState {
    listener: Option<Box<dyn Listener>>,
    /// Whether new lobby links are accepted.
    open: bool,
    game_listener: Option<Box<dyn Listener>>,
    /// Game links that have not yet claimed a slot.
    unclaimed: Vec<Socket>,
    /// Slots whose game link is attached.
    attached: BTreeSet<u8>,
    clubs: Vec<String>,
}

impl HostState {
    pub(super) fn new(listener: Box<dyn Listener>) -> Self {
        Self {
            listener: Some(listener),
            open: true,
            game_listener: None,
            unclaimed: Vec::new(),
            attached: BTreeSet::new(),
            clubs: Vec::new(),
        }
    }

    pub(super) fn close(&mut self) {
        self.open = false;
        if let Some(mut listener) = self.listener.take() {
            listener.close();
        }
        if let Some(mut listener) = self.game_listener.take() {
            listener.close();
        }
        for socket in self.unclaimed.iter_mut() {
            socket.dispose();
        }
        self.unclaimed.clear();
    }
}

/// Give every member a distinct club, in slot order.
///
/// A member keeps its pick when it is in the catalog and still free; anyone
/// else draws from what remains.
pub fn finalize_clubs(members: &MemberSet, catalog: &[String]) -> Vec<String> {
    let mut rng = rand::rng();
    let mut taken: Vec<String> = Vec::new();
    for member in members.iter() {
        let wanted = &member.state.selected_club;
        let club = if catalog.contains(wanted) && !taken.contains(wanted) {
            wanted.clone()
        } else {
            let free: Vec<&String> = catalog.iter().filter(|c| !taken.contains(c)).collect();
            match free.choose(&mut rng) {
                Some(club) => (*club).clone(),
                None => wanted.clone(),
            }
        };
        taken.push(club);
    }
    taken
}

impl Lobby {
    fn host_mut(&mut self) -> Option<&mut HostState> {
        match &mut self.role {
            Role::Host(host) => Some(host),
            Role::Follower(_) => None,
        }
    }

    /// HOST: close the lobby and move everyone onto game links.
    pub fn start_game(&mut self) -> Result<()> {
        if !self.is_host() {
            return Err(Error::NotHost("start the game"));
        }
        if self.state != LobbyState::InLobby {
            return Err(self.wrong_state("start the game"));
        }
        info!(members = self.members.len(), "starting game");

        if let Some(code) = self.code.take() {
            self.rendezvous.withdraw(&code);
        }
        if let Some(host) = self.host_mut() {
            host.open = false;
            if let Some(mut listener) = host.listener.take() {
                listener.close();
            }
        }

        // renumber before anyone learns their team
        self.members.defragment();
        self.pump_member_events();

        let clubs = finalize_clubs(&self.members, &self.config.clubs);
        let game_listener = match self.network.listen() {
            Ok(listener) => listener,
            Err(e) => {
                self.fail(e.clone());
                return Err(e);
            }
        };
        let prepare: NetPacket = LobbyPacket::Prepare {
            address: game_listener.address().to_string(),
        }
        .into();
        self.broadcast(&prepare);

        if let Some(host) = self.host_mut() {
            host.clubs = clubs;
            host.game_listener = Some(game_listener);
        }
        self.prep_elapsed = Duration::ZERO;
        self.set_state(LobbyState::GamePreparation);
        Ok(())
    }

    pub(super) fn update_host(&mut self, dt: Duration) -> Result<()> {
        match self.state {
            LobbyState::InLobby => {
                self.accept_members();
                self.poll_members()
            }
            LobbyState::GamePreparation => self.update_preparation(dt),
            _ => Ok(()),
        }
    }

    fn accept_members(&mut self) {
        let Role::Host(host) = &mut self.role else {
            return;
        };
        let Some(listener) = host.listener.as_mut() else {
            return;
        };
        let mut incoming = Vec::new();
        while let Some(link) = listener.try_accept() {
            incoming.push(Socket::new(link));
        }
        let open = host.open;

        for mut socket in incoming {
            if !open || self.members.is_full() {
                debug!(peer = socket.peer(), "rejecting joiner, lobby full");
                send(&mut socket, &LobbyPacket::Full.into());
                socket.flush();
                socket.dispose();
                continue;
            }
            let state = MemberState::new(&self.config);
            let Ok(slot) = self.members.try_join(Some(socket), false, state) else {
                continue;
            };
            info!(slot, "member joined");

            // greet, then replay the roster
            let roster: Vec<NetPacket> = self
                .members
                .iter()
                .filter(|m| m.slot() != slot)
                .map(|m| {
                    LobbyPacket::MemberSync {
                        slot: m.slot(),
                        state: m.state.clone(),
                    }
                    .into()
                })
                .collect();
            if let Some(socket) = self.members.get_mut(slot).and_then(|m| m.socket_mut()) {
                send(socket, &LobbyPacket::Hello { index: slot }.into());
                for packet in &roster {
                    send(socket, packet);
                }
            }
        }
    }

    fn poll_members(&mut self) -> Result<()> {
        let limit = self.config.max_packets_per_tick;
        let mut inbound = Vec::new();
        for member in self.members.iter_mut() {
            let slot = member.slot();
            let Some(socket) = member.socket_mut() else {
                continue;
            };
            socket.flush();
            for packet in receive(socket, limit) {
                inbound.push((slot, packet));
            }
            if socket.error_state() {
                self.deferred.push_back(Deferred::Part(slot));
            }
        }
        for (slot, packet) in inbound {
            self.handle_member_packet(slot, packet)?;
        }
        Ok(())
    }

    fn handle_member_packet(&mut self, sender: u8, packet: LobbyPacket) -> Result<()> {
        match packet {
            LobbyPacket::MemberSync { slot, state } if slot == sender => {
                self.members.set_member_state(slot, state)?;
            }
            LobbyPacket::MemberSync { slot, .. } => {
                warn!(sender, slot, "member tried to change someone else's state");
            }
            LobbyPacket::MemberState(state) => {
                self.members.set_member_state(sender, state)?;
            }
            LobbyPacket::AckStartGame => debug!(sender, "start acknowledged"),
            other => warn!(sender, packet = ?other, "unexpected lobby packet"),
        }
        Ok(())
    }

    /// Host side of a membership notification.
    pub(super) fn gossip(&mut self, event: MemberEvent) {
        let packet: NetPacket = match event {
            MemberEvent::Join(slot) | MemberEvent::Change(slot) => {
                let Some(member) = self.members.get(slot) else {
                    return;
                };
                LobbyPacket::MemberSync {
                    slot,
                    state: member.state.clone(),
                }
                .into()
            }
            MemberEvent::Part(slot) => LobbyPacket::MemberDrop { slot }.into(),
            MemberEvent::Renumber { from, to } => LobbyPacket::Renumber { from, to }.into(),
        };
        self.broadcast(&packet);
    }

    fn broadcast(&mut self, packet: &NetPacket) {
        for member in self.members.iter_mut() {
            if let Some(socket) = member.socket_mut() {
                send(socket, packet);
            }
        }
    }

    fn update_preparation(&mut self, dt: Duration) -> Result<()> {
        self.prep_elapsed += dt;
        let limit = self.config.max_packets_per_tick;
        let Role::Host(host) = &mut self.role else {
            return Ok(());
        };

        if let Some(listener) = host.game_listener.as_mut() {
            while let Some(link) = listener.try_accept() {
                host.unclaimed.push(Socket::new(link));
            }
        }

        // every game link must claim its slot with a hello
        let mut claims = Vec::new();
        let mut still_unclaimed = Vec::new();
        for mut socket in host.unclaimed.drain(..) {
            let hello = receive(&mut socket, limit).into_iter().find_map(|p| match p {
                LobbyPacket::Hello { index } => Some(index),
                other => {
                    warn!(packet = ?other, "expected hello on game link");
                    None
                }
            });
            match hello {
                Some(index) => claims.push((index, socket)),
                None if socket.error_state() => socket.dispose(),
                None => still_unclaimed.push(socket),
            }
        }
        host.unclaimed = still_unclaimed;

        for (index, mut socket) in claims {
            let self_slot = self.members.self_index();
            let Role::Host(host) = &mut self.role else {
                return Ok(());
            };
            let valid = Some(index) != self_slot && !host.attached.contains(&index);
            match self.members.get_mut(index) {
                Some(member) if valid => {
                    info!(slot = index, "game link attached");
                    if let Some(mut lobby_link) = member.attach(socket) {
                        lobby_link.dispose();
                    }
                    host.attached.insert(index);
                }
                _ => {
                    warn!(slot = index, "game link claimed an unknown slot");
                    socket.dispose();
                }
            }
        }

        for member in self.members.iter_mut() {
            if let Some(socket) = member.socket_mut() {
                socket.flush();
                if socket.error_state() {
                    return Err(Error::ConnectionLost(format!(
                        "member {} left during game preparation",
                        member.display_name()
                    )));
                }
            }
        }

        let remote: BTreeSet<u8> = self
            .members
            .iter()
            .filter(|m| Some(m.slot()) != self.members.self_index())
            .map(|m| m.slot())
            .collect();
        let ready = match &self.role {
            Role::Host(host) => remote.iter().all(|slot| host.attached.contains(slot)),
            Role::Follower(_) => false,
        };
        if ready {
            self.launch()
        } else if self.prep_elapsed >= self.config.preparation_timeout() {
            Err(Error::PreparationTimeout)
        } else {
            Ok(())
        }
    }

    /// Everyone is on a game link: assign teams and hand over.
    fn launch(&mut self) -> Result<()> {
        let clubs = match self.host_mut() {
            Some(host) => {
                if let Some(mut listener) = host.game_listener.take() {
                    listener.close();
                }
                host.clubs.clone()
            }
            None => return Ok(()),
        };
        let player_names: Vec<String> = self
            .members
            .iter()
            .map(|m| m.display_name().to_string())
            .collect();

        let mut links: Vec<(TeamIndex, Socket)> = Vec::new();
        for member in self.members.iter_mut() {
            let team = member.slot();
            if let Some(mut socket) = member.take_socket() {
                send(
                    &mut socket,
                    &LobbyPacket::StartGame {
                        team_index: team,
                        clubs: clubs.clone(),
                    }
                    .into(),
                );
                socket.flush();
                links.push((team, socket));
            }
        }

        let setup = GameSetup {
            my_team: self.members.self_index().unwrap_or(0),
            clubs,
            player_names,
        };
        info!(teams = setup.clubs.len(), "game in progress");
        self.handoff = Some(GameHandoff::Host {
            setup: setup.clone(),
            links,
        });
        self.set_state(LobbyState::GameInProgress);
        self.emit(LobbyEvent::GameStarted(setup));
        Ok(())
    }
}
