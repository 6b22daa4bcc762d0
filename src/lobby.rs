//! Lobby and session state machine
//!
//! One [`Lobby`] per player, driven by [`Lobby::update`] once per frame. The
//! host owns the roster and gossips it; followers mirror it. Starting a game
//! moves everyone onto direct game links and hands those to the replication
//! engines through [`Lobby::take_game`].

mod events;
mod follower;
mod host;
mod rendezvous;
mod setup;

use std::{collections::VecDeque, time::Duration};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{error, info, trace, warn};

use crate::{
    config::SessionConfig,
    error::{Error, Result},
    members::{MemberSet, MemberState},
    packet::{self, LobbyPacket, NetPacket},
    session::GameHandoff,
    socket::Socket,
    transport::Network,
};

pub use events::{GameSetup, LobbyEvent, LobbyState};
pub use host::finalize_clubs;
pub use rendezvous::{DirectRendezvous, Directory, Rendezvous, RoomCode};

use follower::FollowerState;
use host::HostState;

enum Role {
    Host(HostState),
    Follower(FollowerState),
}

/// State transitions raised deep inside packet handling, applied at the end
/// of the frame.
#[derive(Debug)]
enum Deferred {
    Part(u8),
    Fail(Error),
}

pub struct Lobby {
    config: SessionConfig,
    state: LobbyState,
    code: Option<String>,
    members: MemberSet,
    network: Box<dyn Network>,
    rendezvous: Box<dyn Rendezvous>,
    role: Role,
    deferred: VecDeque<Deferred>,
    events: mpsc::UnboundedSender<LobbyEvent>,
    handoff: Option<GameHandoff>,
    /// Time spent in game preparation.
    prep_elapsed: Duration,
    torn_down: bool,
}

impl Lobby {
    pub fn state(&self) -> LobbyState {
        self.state
    }

    pub fn is_host(&self) -> bool {
        matches!(self.role, Role::Host(_))
    }

    /// Room code to share with other players (host only, while open).
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn members(&self) -> &MemberSet {
        &self.members
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn self_slot(&self) -> Option<u8> {
        self.members.self_index()
    }

    /// Hand the game links over once the game is running.
    pub fn take_game(&mut self) -> Option<GameHandoff> {
        self.handoff.take()
    }

    /// Drive the lobby. Call once per frame.
    pub fn update(&mut self, dt: Duration) {
        if self.torn_down {
            return;
        }
        let result = match self.role {
            Role::Host(_) => self.update_host(dt),
            Role::Follower(_) => self.update_follower(dt),
        };
        if let Err(e) = result {
            self.deferred.push_back(Deferred::Fail(e));
        }
        self.run_deferred();
    }

    /// Edit the local member's public state and gossip it.
    pub fn update_self(&mut self, edit: impl FnOnce(&mut MemberState)) -> Result<()> {
        match &mut self.role {
            Role::Host(_) => {
                let mut state = self
                    .members
                    .self_member()
                    .map(|m| m.state.clone())
                    .ok_or(Error::SlotEmpty)?;
                edit(&mut state);
                self.members.set_member_state(0, state)?;
                self.pump_member_events();
            }
            Role::Follower(follower) => {
                edit(&mut follower.profile);
                let profile = follower.profile.clone();
                if let Some(slot) = self.members.self_index() {
                    self.members.set_member_state(slot, profile.clone())?;
                    let sync = LobbyPacket::MemberSync {
                        slot,
                        state: profile,
                    };
                    if let Role::Follower(follower) = &mut self.role
                        && let Some(socket) = follower.lobby.as_mut()
                    {
                        send(socket, &sync.into());
                    }
                    self.pump_member_events();
                }
            }
        }
        Ok(())
    }

    pub fn set_ready(&mut self, ready: bool) -> Result<()> {
        self.update_self(|state| state.ready = ready)
    }

    /// Leave voluntarily. Safe to call in any state, any number of times.
    pub fn leave(&mut self) {
        info!("leaving lobby");
        self.teardown(LobbyState::Init);
    }

    fn set_state(&mut self, state: LobbyState) {
        if self.state != state {
            info!(from = %self.state, to = %state, host = self.is_host(), "lobby state");
            self.state = state;
            self.emit(LobbyEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: LobbyEvent) {
        // the UI may have dropped its receiver
        let _ = self.events.send(event);
    }

    fn wrong_state(&self, op: &'static str) -> Error {
        Error::WrongState {
            op,
            state: self.state.to_string(),
        }
    }

    fn run_deferred(&mut self) {
        while let Some(deferred) = self.deferred.pop_front() {
            match deferred {
                Deferred::Part(slot) => {
                    if self.members.part(slot).is_ok() {
                        info!(slot, "member disconnected");
                    }
                }
                Deferred::Fail(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
        self.pump_member_events();
    }

    /// Drain membership notifications into UI events, gossiping them when hosting.
    fn pump_member_events(&mut self) {
        for event in self.members.drain_events() {
            if let Role::Host(_) = self.role {
                self.gossip(event);
            }
            self.emit(event.into());
        }
    }

    fn fail(&mut self, e: Error) {
        if self.torn_down {
            return;
        }
        error!(error = %e, "lobby failed");
        self.emit(LobbyEvent::Error(e.to_string()));
        self.teardown(LobbyState::Error);
    }

    /// Drop every link, forget everyone, withdraw the room. Idempotent.
    fn teardown(&mut self, final_state: LobbyState) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(code) = self.code.take() {
            self.rendezvous.withdraw(&code);
        }
        match &mut self.role {
            Role::Host(host) => host.close(),
            Role::Follower(follower) => follower.close(),
        }
        self.members.clear();
        self.deferred.clear();
        self.handoff = None;
        self.set_state(final_state);
    }
}

impl Drop for Lobby {
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown(LobbyState::Init);
        }
    }
}

fn send(socket: &mut Socket, packet: &NetPacket) {
    match packet::encode(packet) {
        Ok(bytes) => {
            trace!(peer = socket.peer(), kind = packet.kind(), "lobby send");
            socket.send(bytes)
        }
        Err(e) => warn!(error = %e, "failed to encode lobby packet"),
    }
}

/// Read up to `limit` lobby packets. Game packets and garbage are dropped.
fn receive(socket: &mut Socket, limit: usize) -> Vec<LobbyPacket> {
    let mut packets = Vec::new();
    for _ in 0..limit {
        let Some(bytes) = socket.try_receive() else {
            break;
        };
        if let Some(packet) = decode_lobby(socket.peer(), &bytes) {
            packets.push(packet);
        }
    }
    packets
}

fn decode_lobby(peer: &str, bytes: &Bytes) -> Option<LobbyPacket> {
    match packet::decode(bytes) {
        Ok(NetPacket::Lobby(packet)) => Some(packet),
        Ok(other) => {
            warn!(peer, kind = other.kind(), "unexpected game packet in lobby");
            None
        }
        Err(e) => {
            warn!(peer, error = %e, "malformed lobby packet");
            None
        }
    }
}
